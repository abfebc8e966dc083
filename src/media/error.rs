//! Media error types
//!
//! Errors raised by demuxers and muxers.

use super::packet::Codec;

/// Error type for container operations
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    /// Underlying file I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The input is not a valid container of the expected kind
    #[error("invalid container data: {0}")]
    InvalidData(String),

    /// The container cannot carry this codec
    #[error("codec {0} not supported by container")]
    UnsupportedCodec(Codec),

    /// A packet referenced a stream the muxer was not built with
    #[error("no stream with index {0}")]
    UnknownStream(usize),

    /// No demuxer handles this file
    #[error("unsupported input: {0}")]
    UnsupportedInput(String),
}
