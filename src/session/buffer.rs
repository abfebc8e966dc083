//! Fixed-capacity connection buffer
//!
//! ```text
//!   0        start      cursor           end            capacity
//!   |--------|==========|################|..............|
//!   discarded  scanned/   pending          spare
//!              sent
//! ```
//!
//! Bytes in `[start, end)` are the current contents. `cursor` tracks
//! progress through them: how far a request head has been scanned, or how
//! much of a staged response the socket has accepted. `start ≤ cursor ≤
//! end ≤ capacity` holds after every call.

/// Bounds-checked byte buffer with read and write cursors
#[derive(Debug)]
pub struct IoBuffer {
    data: Box<[u8]>,
    start: usize,
    cursor: usize,
    end: usize,
}

impl IoBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            start: 0,
            cursor: 0,
            end: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Current contents, `[start, end)`
    pub fn filled(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    /// Bytes not yet passed by the cursor, `[cursor, end)`
    pub fn pending(&self) -> &[u8] {
        &self.data[self.cursor..self.end]
    }

    /// Bytes the cursor has passed since `start`
    pub fn scanned(&self) -> usize {
        self.cursor - self.start
    }

    pub fn is_drained(&self) -> bool {
        self.cursor == self.end
    }

    /// Writable space after `end`
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.end..]
    }

    /// Mark `n` bytes written into [`spare_mut`](Self::spare_mut) as filled
    pub fn commit(&mut self, n: usize) {
        self.end = (self.end + n).min(self.data.len());
    }

    /// Advance the cursor by `n` bytes
    pub fn advance(&mut self, n: usize) {
        self.cursor = (self.cursor + n).min(self.end);
    }

    /// Drop `n` bytes from the front of the contents
    pub fn discard(&mut self, n: usize) {
        self.start = (self.start + n).min(self.end);
        self.cursor = self.cursor.max(self.start);
    }

    pub fn reset(&mut self) {
        self.start = 0;
        self.cursor = 0;
        self.end = 0;
    }

    /// Replace the contents with as much of `bytes` as fits; returns the count
    pub fn load(&mut self, bytes: &[u8]) -> usize {
        self.reset();
        let n = bytes.len().min(self.data.len());
        self.data[..n].copy_from_slice(&bytes[..n]);
        self.end = n;
        n
    }

    /// Move the contents to the front, reclaiming discarded space
    pub fn compact(&mut self) {
        if self.start == 0 {
            return;
        }
        self.data.copy_within(self.start..self.end, 0);
        self.end -= self.start;
        self.cursor -= self.start;
        self.start = 0;
    }

    /// Whether the cursor invariant holds
    pub fn is_consistent(&self) -> bool {
        self.start <= self.cursor && self.cursor <= self.end && self.end <= self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_and_advance() {
        let mut buf = IoBuffer::with_capacity(8);
        buf.spare_mut()[..3].copy_from_slice(b"abc");
        buf.commit(3);
        assert_eq!(buf.pending(), b"abc");

        buf.advance(2);
        assert_eq!(buf.pending(), b"c");
        assert_eq!(buf.filled(), b"abc");
        assert_eq!(buf.scanned(), 2);

        buf.advance(10);
        assert!(buf.is_drained());
        assert!(buf.is_consistent());
    }

    #[test]
    fn test_commit_clamped_to_capacity() {
        let mut buf = IoBuffer::with_capacity(4);
        buf.commit(100);
        assert_eq!(buf.filled().len(), 4);
        assert!(buf.spare_mut().is_empty());
        assert!(buf.is_consistent());
    }

    #[test]
    fn test_load_truncates() {
        let mut buf = IoBuffer::with_capacity(4);
        assert_eq!(buf.load(b"abcdef"), 4);
        assert_eq!(buf.pending(), b"abcd");
    }

    #[test]
    fn test_discard_then_compact() {
        let mut buf = IoBuffer::with_capacity(8);
        buf.load(b"headbody");
        buf.advance(2);
        buf.discard(4);
        assert_eq!(buf.filled(), b"body");
        assert_eq!(buf.scanned(), 0);
        assert!(buf.is_consistent());

        buf.compact();
        assert_eq!(buf.filled(), b"body");
        assert_eq!(buf.spare_mut().len(), 4);
        assert!(buf.is_consistent());
    }
}
