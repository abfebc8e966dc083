//! Feed error types

/// Error type for feed log and feed wire format operations
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// Log file I/O failed
    #[error("feed I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A header frame could not be decoded or encoded
    #[error("bad feed header: {0}")]
    BadHeader(String),

    /// A data frame is malformed
    #[error("bad feed frame: {0}")]
    BadFrame(String),

    /// A frame of the wrong length was handed to the log
    #[error("frame is {actual} bytes, expected {expected}")]
    FrameSize { expected: usize, actual: usize },
}
