//! Stream definitions
//!
//! A definition is what a request path resolves to. Definitions are built
//! at load time and never change while the server runs.

use std::path::PathBuf;

use crate::media::{ContainerFormat, MediaKind, StreamDescriptor};

/// Index of a definition in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub(crate) usize);

/// Index of a feed in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedId(pub(crate) usize);

impl FeedId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Where a live definition's packets come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSource {
    /// Tail of a feed. `remap[i]` is the feed slot carrying declared stream `i`;
    /// it is filled in by `StreamRegistry::prepare`.
    Feed { feed: FeedId, remap: Vec<usize> },
    /// A pre-recorded file, opened per request
    File(PathBuf),
}

/// What a definition serves
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamKind {
    Live(StreamSource),
    /// The HTML status page
    Status,
}

/// A servable path
#[derive(Debug, Clone)]
pub struct StreamDefinition {
    /// Request path without the leading `/`
    pub path: String,
    pub kind: StreamKind,
    /// Output container
    pub format: ContainerFormat,
    /// Declared elementary streams. Empty for file sources (taken from the
    /// file) and for feed sources that want every feed slot.
    pub streams: Vec<StreamDescriptor>,
}

impl StreamDefinition {
    /// Definition served from a feed
    pub fn from_feed(
        path: impl Into<String>,
        feed: FeedId,
        format: ContainerFormat,
        streams: Vec<StreamDescriptor>,
    ) -> Self {
        Self {
            path: path.into(),
            kind: StreamKind::Live(StreamSource::Feed {
                feed,
                remap: Vec::new(),
            }),
            format,
            streams,
        }
    }

    /// Definition served from a file
    pub fn from_file(path: impl Into<String>, file: impl Into<PathBuf>, format: ContainerFormat) -> Self {
        Self {
            path: path.into(),
            kind: StreamKind::Live(StreamSource::File(file.into())),
            format,
            streams: Vec::new(),
        }
    }

    pub fn status(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: StreamKind::Status,
            format: ContainerFormat::Flv,
            streams: Vec::new(),
        }
    }

    /// Feed this definition reads from, if any
    pub fn feed(&self) -> Option<FeedId> {
        match &self.kind {
            StreamKind::Live(StreamSource::Feed { feed, .. }) => Some(*feed),
            _ => None,
        }
    }

    /// Slot remap table for feed-backed definitions
    pub fn remap(&self) -> Option<&[usize]> {
        match &self.kind {
            StreamKind::Live(StreamSource::Feed { remap, .. }) => Some(remap),
            _ => None,
        }
    }

    pub fn is_status(&self) -> bool {
        matches!(self.kind, StreamKind::Status)
    }

    /// Sum of declared bitrates of one kind, in kbit/s
    pub fn bitrate_kbps(&self, kind: MediaKind) -> u32 {
        self.streams
            .iter()
            .filter(|s| s.kind() == kind)
            .map(|s| s.bitrate)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::Codec;

    #[test]
    fn test_bitrate_by_kind() {
        let def = StreamDefinition::from_feed(
            "live.flv",
            FeedId(0),
            ContainerFormat::Flv,
            vec![
                StreamDescriptor::video(Codec::H264, 640, 360, 800),
                StreamDescriptor::audio(Codec::Aac, 44100, 2, 96),
                StreamDescriptor::audio(Codec::Mp3, 44100, 2, 32),
            ],
        );
        assert_eq!(def.bitrate_kbps(MediaKind::Video), 800);
        assert_eq!(def.bitrate_kbps(MediaKind::Audio), 128);
        assert_eq!(def.feed(), Some(FeedId(0)));
    }

    #[test]
    fn test_file_definition_has_no_feed() {
        let def = StreamDefinition::from_file("clip.flv", "/srv/clip.flv", ContainerFormat::Flv);
        assert_eq!(def.feed(), None);
        assert!(def.remap().is_none());
        assert!(!def.is_status());
    }
}
