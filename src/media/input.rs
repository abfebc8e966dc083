//! Input side of the container boundary
//!
//! A [`MediaInput`] is an opened source of packets with a known list of
//! elementary streams. File-backed definitions open one through
//! [`open_file`]; feed-backed definitions use `crate::feed::FeedInput`.

use std::path::Path;
use std::time::Duration;

use super::error::MediaError;
use super::flv::FlvDemuxer;
use super::packet::{Packet, StreamDescriptor};

/// Where playback should start, parsed from the request's `date` parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeekHint {
    /// Live edge for feeds, beginning for files
    #[default]
    Live,
    /// For feeds: this far behind the newest frame. For files: this far in.
    Offset(Duration),
}

impl SeekHint {
    /// Parse a `date` query value.
    ///
    /// `now` means the live edge; anything else must be a humantime duration
    /// such as `30s` or `2m 10s`.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("now") {
            return Some(SeekHint::Live);
        }
        humantime::parse_duration(value).ok().map(SeekHint::Offset)
    }

    /// The offset in milliseconds, saturating at `i64::MAX`
    pub fn offset_ms(&self) -> Option<i64> {
        match self {
            SeekHint::Live => None,
            SeekHint::Offset(d) => Some(i64::try_from(d.as_millis()).unwrap_or(i64::MAX)),
        }
    }
}

/// An opened packet source
pub trait MediaInput {
    /// Elementary streams, indexed by `Packet::stream_index`
    fn streams(&self) -> &[StreamDescriptor];

    /// Pull the next packet. `Ok(None)` means the input is exhausted.
    fn read_packet(&mut self) -> Result<Option<Packet>, MediaError>;
}

/// Open a pre-recorded file, choosing the demuxer by extension
pub fn open_file(path: &Path, seek: SeekHint) -> Result<Box<dyn MediaInput>, MediaError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("flv") => Ok(Box::new(FlvDemuxer::open(path, seek)?)),
        _ => Err(MediaError::UnsupportedInput(path.display().to_string())),
    }
}
