//! Output container formats
//!
//! The formats a stream definition can be served in, with the response
//! header properties that depend on them.

use super::error::MediaError;
use super::flv::FlvMuxer;
use super::muxer::Muxer;
use super::packet::StreamDescriptor;
use crate::feed::FeedMuxer;

/// Content type used when a format has no registered MIME type
pub const DEFAULT_MIME: &str = "application/octet-stream";

/// Container format of a served stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerFormat {
    /// Flash Video, for HTTP players
    Flv,
    /// The feed wire format itself, for relaying a feed to another server
    Feed,
}

impl ContainerFormat {
    /// Configuration name
    pub fn name(&self) -> &'static str {
        match self {
            ContainerFormat::Flv => "flv",
            ContainerFormat::Feed => "feed",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "flv" => Some(ContainerFormat::Flv),
            "feed" | "ffm" => Some(ContainerFormat::Feed),
            _ => None,
        }
    }

    /// Registered MIME type, if any
    pub fn mime_type(&self) -> Option<&'static str> {
        match self {
            ContainerFormat::Flv => Some("video/x-flv"),
            ContainerFormat::Feed => None,
        }
    }

    /// Content type for the response header
    pub fn content_type(&self) -> &'static str {
        self.mime_type().unwrap_or(DEFAULT_MIME)
    }

    /// Whether the response advertises `Pragma: features="broadcast"`
    pub fn broadcast_pragma(&self) -> bool {
        matches!(self, ContainerFormat::Feed)
    }

    /// Build a muxer for the given output streams
    pub fn new_muxer(&self, streams: Vec<StreamDescriptor>) -> Result<Box<dyn Muxer>, MediaError> {
        match self {
            ContainerFormat::Flv => Ok(Box::new(FlvMuxer::new(streams)?)),
            ContainerFormat::Feed => Ok(Box::new(FeedMuxer::new(streams))),
        }
    }
}

impl std::fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
