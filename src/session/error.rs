//! Session error types
//!
//! Every variant is fatal to the one connection that raised it and to
//! nothing else.

use crate::feed::FeedError;
use crate::media::MediaError;
use crate::protocol::ParseError;
use crate::registry::RegistryError;

use super::state::ConnectionState;

/// Error type for connection steps
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed its end
    #[error("connection closed by peer")]
    Closed,

    #[error("bad request: {0}")]
    Parse(#[from] ParseError),

    /// The request head did not fit the I/O buffer
    #[error("request too large")]
    RequestTooLarge,

    #[error("timed out in {0}")]
    Timeout(ConnectionState),

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The upload's header frame does not describe the feed's streams
    #[error("upload header rejected: {0}")]
    UploadHeader(String),

    #[error("trailer already sent")]
    TrailerAlreadySent,

    /// A streaming state was reached without an open input
    #[error("no input open")]
    NoInput,
}
