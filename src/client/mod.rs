//! Feed client
//!
//! Publishes packets to a feed on a running server over the same HTTP
//! upload path an encoder would use.

pub mod publisher;

pub use publisher::{FeedPublisher, PublishEvent, PublisherConfig};
