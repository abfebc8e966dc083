//! Stream registry
//!
//! Maps request paths to stream definitions and owns the feeds.
//!
//! # Layout
//!
//! ```text
//!   StreamRegistry
//!   ├── definitions: [StreamDefinition]   by_path: "live.flv" -> StreamId
//!   │      live.flv  ── Feed { feed1, remap [2, 0] }
//!   │      clip.flv  ── File(/srv/clip.flv)
//!   │      feed1.ffm ── Feed { feed1, remap [0, 1, 2] }   (the feed's own path)
//!   │      status.html
//!   └── feeds: [Feed]
//!          feed1 ── slots [aac, h264 720p, h264 360p], FeedLog, writer claim
//! ```
//!
//! Each definition that reads a feed declares the streams it wants; at
//! `prepare` time those are matched onto feed slots (adding slots where no
//! existing slot matches) and the remap table is cached on the definition.

pub mod error;
pub mod feed;
pub mod router;
pub mod store;
pub mod stream;

pub use error::RegistryError;
pub use feed::{Feed, DEFAULT_FEED_MAX_SIZE};
pub use router::Route;
pub use store::StreamRegistry;
pub use stream::{FeedId, StreamDefinition, StreamId, StreamKind, StreamSource};
