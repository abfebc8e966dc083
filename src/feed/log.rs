//! Feed ring-buffer log
//!
//! A feed log is a file of fixed-size frames bounded by a maximum size. The
//! first frame is the header; data frames follow and wrap back to the first
//! data slot once the maximum is reached, overwriting the oldest frames.
//!
//! The writer persists its next write position in the header after every
//! append, so a restarted server resumes where the previous one stopped.
//! Readers hold a [`FeedCursor`] and detect when the writer has lapped them.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::error::FeedError;
use super::frame::{FeedHeader, FRAME_SIZE, WRITE_OFFSET_POS};
use crate::media::StreamDescriptor;

/// Offset of the first data frame
pub const HEADER_END: u64 = FRAME_SIZE as u64;

const FS: u64 = FRAME_SIZE as u64;

/// Smallest number of data frames a log may hold
const MIN_CAPACITY: u64 = 2;

/// A reader's position in a feed log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedCursor {
    offset: u64,
    seq: u64,
}

impl FeedCursor {
    /// Byte offset of the next frame to read
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Sequence number of the next frame to read
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// Outcome of reading at a cursor
#[derive(Debug, PartialEq, Eq)]
pub enum ReadNext {
    /// One complete frame
    Frame(Vec<u8>),
    /// The cursor has caught up with the writer
    Pending,
    /// The writer has overwritten the frame at the cursor
    Overrun,
}

/// Bounded on-disk ring of frames
#[derive(Debug)]
pub struct FeedLog {
    path: PathBuf,
    file: File,
    max_size: u64,
    write_offset: u64,
    size: u64,
    /// Frames appended since open, counting recovered frames
    appended: u64,
    streams: Vec<StreamDescriptor>,
}

impl FeedLog {
    /// Open an existing log, recovering its write position, or create a new one.
    ///
    /// A log whose header is unreadable, was written with another frame size
    /// or describes different streams is discarded and recreated.
    pub fn open(
        path: impl AsRef<Path>,
        max_size: u64,
        streams: Vec<StreamDescriptor>,
    ) -> Result<Self, FeedError> {
        let path = path.as_ref();
        if !path.exists() {
            return Self::create(path, max_size, streams);
        }

        let max_size = align_max(max_size);
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();

        let mut header_buf = vec![0u8; FRAME_SIZE];
        let header = if len >= HEADER_END {
            file.read_exact(&mut header_buf)?;
            FeedHeader::decode(&header_buf).ok()
        } else {
            None
        };

        let header = match header {
            Some(h) if h.frame_size as usize == FRAME_SIZE && same_streams(&h.streams, &streams) => h,
            Some(h) if h.frame_size as usize != FRAME_SIZE => {
                tracing::warn!(
                    path = %path.display(),
                    frame_size = h.frame_size,
                    "Feed log written with another frame size, recreating"
                );
                return Self::create(path, max_size, streams);
            }
            Some(_) => {
                tracing::warn!(path = %path.display(), "Feed streams changed, recreating log");
                return Self::create(path, max_size, streams);
            }
            None => {
                tracing::warn!(path = %path.display(), "Feed log header unreadable, recreating");
                return Self::create(path, max_size, streams);
            }
        };

        let size = (HEADER_END + (len - HEADER_END) / FS * FS).min(max_size);
        let mut write_offset = header.write_offset;
        if !valid_write_offset(write_offset, size, max_size) {
            let reset = if size < max_size { size } else { HEADER_END };
            tracing::warn!(
                path = %path.display(),
                stored = write_offset,
                reset,
                "Feed write offset out of range, resetting"
            );
            write_offset = reset;
        }
        if write_offset < size && size < max_size {
            // frame order past the old end is unknown once wrapped
            tracing::warn!(
                path = %path.display(),
                size,
                max_size,
                "Feed log wrapped at a smaller size, recreating"
            );
            return Self::create(path, max_size, streams);
        }

        if len > size {
            file.set_len(size)?;
        }

        let mut log = Self {
            path: path.to_path_buf(),
            file,
            max_size,
            write_offset,
            size,
            appended: 0,
            streams,
        };
        log.appended = log.stored_frames();
        log.write_header()?;

        tracing::info!(
            path = %log.path.display(),
            frames = log.appended,
            write_offset = log.write_offset,
            "Recovered feed log"
        );
        Ok(log)
    }

    /// Create an empty log, truncating any existing file
    pub fn create(
        path: impl AsRef<Path>,
        max_size: u64,
        streams: Vec<StreamDescriptor>,
    ) -> Result<Self, FeedError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let mut log = Self {
            path: path.to_path_buf(),
            file,
            max_size: align_max(max_size),
            write_offset: HEADER_END,
            size: HEADER_END,
            appended: 0,
            streams,
        };
        log.write_header()?;

        tracing::info!(
            path = %log.path.display(),
            max_size = log.max_size,
            streams = log.streams.len(),
            "Created feed log"
        );
        Ok(log)
    }

    /// Append one frame at the write position, wrapping when the log is full.
    ///
    /// The new write position is persisted before this returns.
    pub fn append(&mut self, frame: &[u8]) -> Result<(), FeedError> {
        if frame.len() != FRAME_SIZE {
            return Err(FeedError::FrameSize {
                expected: FRAME_SIZE,
                actual: frame.len(),
            });
        }

        (&self.file).seek(SeekFrom::Start(self.write_offset))?;
        (&self.file).write_all(frame)?;

        let end = self.write_offset + FS;
        if end > self.size {
            self.size = end;
        }

        let next = if end + FS > self.max_size {
            tracing::debug!(path = %self.path.display(), "Feed log wrapped");
            HEADER_END
        } else {
            end
        };
        self.write_offset = next;
        self.persist_write_offset()?;
        self.appended += 1;
        Ok(())
    }

    /// Read the frame at the cursor without moving it
    pub fn peek(&self, cursor: &FeedCursor) -> Result<ReadNext, FeedError> {
        if cursor.seq >= self.appended {
            return Ok(ReadNext::Pending);
        }
        if self.appended - cursor.seq > self.stored_frames() {
            return Ok(ReadNext::Overrun);
        }

        let mut frame = vec![0u8; FRAME_SIZE];
        (&self.file).seek(SeekFrom::Start(cursor.offset))?;
        (&self.file).read_exact(&mut frame)?;
        Ok(ReadNext::Frame(frame))
    }

    /// Read the frame at the cursor and advance past it
    pub fn read_next(&self, cursor: &mut FeedCursor) -> Result<ReadNext, FeedError> {
        let result = self.peek(cursor)?;
        if matches!(result, ReadNext::Frame(_)) {
            cursor.seq += 1;
            cursor.offset += FS;
            if cursor.offset + FS > self.max_size {
                cursor.offset = HEADER_END;
            }
        }
        Ok(result)
    }

    /// Cursor positioned `back` frames before the write position.
    ///
    /// `back` is clamped to the number of frames stored.
    pub fn tail_open(&self, back: u64) -> FeedCursor {
        let back = back.min(self.stored_frames());
        let capacity = self.capacity();
        let write_slot = (self.write_offset - HEADER_END) / FS;
        let slot = (write_slot + capacity - back % capacity) % capacity;
        FeedCursor {
            offset: HEADER_END + slot * FS,
            seq: self.appended - back,
        }
    }

    /// Move a lapped cursor to the live edge
    pub fn resync(&self, cursor: &mut FeedCursor) {
        *cursor = self.tail_open(0);
    }

    /// Next write position
    pub fn write_offset(&self) -> u64 {
        self.write_offset
    }

    /// Logical file size, header included
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Data frames currently held
    pub fn stored_frames(&self) -> u64 {
        (self.size - HEADER_END) / FS
    }

    /// Data frames the log can hold
    pub fn capacity(&self) -> u64 {
        (self.max_size - HEADER_END) / FS
    }

    /// Frames appended since open, recovered frames included
    pub fn appended(&self) -> u64 {
        self.appended
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    /// Header as it is stored in the file
    pub fn header(&self) -> FeedHeader {
        FeedHeader {
            frame_size: FRAME_SIZE as u32,
            write_offset: self.write_offset,
            max_size: self.max_size,
            streams: self.streams.clone(),
        }
    }

    fn write_header(&mut self) -> Result<(), FeedError> {
        let frame = self.header().encode()?;
        (&self.file).seek(SeekFrom::Start(0))?;
        (&self.file).write_all(&frame)?;
        Ok(())
    }

    fn persist_write_offset(&mut self) -> Result<(), FeedError> {
        (&self.file).seek(SeekFrom::Start(WRITE_OFFSET_POS))?;
        (&self.file).write_all(&self.write_offset.to_be_bytes())?;
        Ok(())
    }
}

/// Round a configured maximum down to whole frames
fn align_max(max_size: u64) -> u64 {
    let frames = max_size.saturating_sub(HEADER_END) / FS;
    HEADER_END + frames.max(MIN_CAPACITY) * FS
}

fn valid_write_offset(offset: u64, size: u64, max_size: u64) -> bool {
    offset >= HEADER_END
        && (offset - HEADER_END) % FS == 0
        && offset <= size
        && offset + FS <= max_size
}

fn same_streams(stored: &[StreamDescriptor], configured: &[StreamDescriptor]) -> bool {
    stored.len() == configured.len() && stored.iter().zip(configured).all(|(a, b)| a.matches(b))
}
