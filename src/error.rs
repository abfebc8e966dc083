//! Crate-level error type
//!
//! Each layer has its own error enum; this one wraps them for the
//! operations that cross layers (startup, configuration, client I/O).

use crate::config::ConfigError;
use crate::feed::FeedError;
use crate::media::MediaError;
use crate::registry::RegistryError;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Socket or file I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Feed log failure
    #[error(transparent)]
    Feed(#[from] FeedError),

    /// Container encoding failure
    #[error(transparent)]
    Media(#[from] MediaError),

    /// Stream registry failure
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Configuration failure
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The peer answered with something other than what the client expected
    #[error("protocol error: {0}")]
    Protocol(String),
}
