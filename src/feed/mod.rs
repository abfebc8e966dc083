//! Feeds
//!
//! A feed is a named live source that one publisher uploads into and any
//! number of readers tail. Its contents live in a bounded ring-buffer log
//! of fixed-size frames.

pub mod error;
pub mod frame;
pub mod input;
pub mod log;
pub mod relay;

pub use error::FeedError;
pub use frame::{FeedHeader, FrameHeader, FramePacker, FrameUnpacker, FRAME_SIZE};
pub use input::{FeedInput, FeedPull};
pub use log::{FeedCursor, FeedLog, ReadNext, HEADER_END};
pub use relay::FeedMuxer;
