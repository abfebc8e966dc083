//! Non-blocking socket abstraction
//!
//! The connection state machine only ever calls `try_read`/`try_write`,
//! which return `WouldBlock` instead of waiting. The event loop waits for
//! readiness separately.

use std::io;

use tokio::net::TcpStream;

/// Non-blocking byte stream
pub trait Transport {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

impl Transport for TcpStream {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        TcpStream::try_read(self, buf)
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        TcpStream::try_write(self, buf)
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory transport for driving connections in tests

    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use super::*;

    #[derive(Debug, Default)]
    struct Shared {
        input: VecDeque<u8>,
        eof: bool,
        output: Vec<u8>,
        /// Bytes accepted per write call (0 = unlimited)
        write_limit: usize,
        /// Refuse writes entirely
        blocked: bool,
    }

    /// Transport half handed to the connection
    #[derive(Debug, Clone, Default)]
    pub struct MockTransport {
        shared: Rc<RefCell<Shared>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue bytes for the connection to read
        pub fn push_input(&self, bytes: &[u8]) {
            self.shared.borrow_mut().input.extend(bytes);
        }

        /// Report end of stream once queued input is consumed
        pub fn close_input(&self) {
            self.shared.borrow_mut().eof = true;
        }

        /// Everything the connection has written so far
        pub fn output(&self) -> Vec<u8> {
            self.shared.borrow().output.clone()
        }

        pub fn set_write_limit(&self, limit: usize) {
            self.shared.borrow_mut().write_limit = limit;
        }

        pub fn set_blocked(&self, blocked: bool) {
            self.shared.borrow_mut().blocked = blocked;
        }
    }

    impl Transport for MockTransport {
        fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut shared = self.shared.borrow_mut();
            if shared.input.is_empty() {
                return if shared.eof {
                    Ok(0)
                } else {
                    Err(io::ErrorKind::WouldBlock.into())
                };
            }
            let n = buf.len().min(shared.input.len());
            for (dst, src) in buf.iter_mut().zip(shared.input.drain(..n)) {
                *dst = src;
            }
            Ok(n)
        }

        fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut shared = self.shared.borrow_mut();
            if shared.blocked {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = match shared.write_limit {
                0 => buf.len(),
                limit => buf.len().min(limit),
            };
            shared.output.extend_from_slice(&buf[..n]);
            Ok(n)
        }
    }
}
