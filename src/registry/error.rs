//! Registry error types

use crate::feed::FeedError;

/// Error type for registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Two definitions claim the same request path
    #[error("path already registered: {0}")]
    DuplicatePath(String),

    /// A definition refers to a feed that was never registered
    #[error("unknown feed: {0}")]
    UnknownFeed(String),

    /// The feed's log has not been opened yet
    #[error("feed not prepared: {0}")]
    FeedNotOpen(String),

    /// Opening a feed's log failed
    #[error("feed {path}: {source}")]
    Feed {
        path: String,
        #[source]
        source: FeedError,
    },
}
