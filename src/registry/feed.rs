//! Feed entries
//!
//! A feed owns its ring-buffer log and the single-writer claim. Its slots
//! are the union of the streams every definition reading from it declared.

use std::path::PathBuf;

use super::error::RegistryError;
use super::stream::StreamId;
use crate::feed::{FeedLog, HEADER_END};
use crate::media::StreamDescriptor;

/// Default maximum log size
pub const DEFAULT_FEED_MAX_SIZE: u64 = 5 * 1024 * 1024;

/// A live ingestion channel
#[derive(Debug)]
pub struct Feed {
    /// Request path of the feed itself (the upload target)
    pub path: String,
    /// Backing log file
    pub file: PathBuf,
    /// Configured maximum log size
    pub max_size: u64,
    /// Discard any existing log contents at startup
    pub truncate: bool,
    /// The feed's own definition
    pub(crate) definition: StreamId,
    slots: Vec<StreamDescriptor>,
    log: Option<FeedLog>,
    writer_active: bool,
}

impl Feed {
    pub(crate) fn new(path: String, file: PathBuf, max_size: u64, definition: StreamId) -> Self {
        Self {
            path,
            file,
            max_size: max_size.max(HEADER_END),
            truncate: false,
            definition,
            slots: Vec::new(),
            log: None,
            writer_active: false,
        }
    }

    /// Elementary streams stored in the feed, by slot
    pub fn slots(&self) -> &[StreamDescriptor] {
        &self.slots
    }

    /// Slot index for a descriptor, adding a slot if none matches
    pub(crate) fn slot_for(&mut self, desc: &StreamDescriptor) -> usize {
        if let Some(i) = self.slots.iter().position(|s| s.matches(desc)) {
            return i;
        }
        self.slots.push(desc.clone());
        self.slots.len() - 1
    }

    pub(crate) fn open_log(&mut self) -> Result<(), RegistryError> {
        let wrap = |source| RegistryError::Feed {
            path: self.path.clone(),
            source,
        };
        let log = if self.truncate {
            FeedLog::create(&self.file, self.max_size, self.slots.clone())
        } else {
            FeedLog::open(&self.file, self.max_size, self.slots.clone())
        }
        .map_err(wrap)?;

        tracing::info!(
            feed = %self.path,
            file = %self.file.display(),
            slots = self.slots.len(),
            "Feed opened"
        );
        self.log = Some(log);
        Ok(())
    }

    pub fn log(&self) -> Result<&FeedLog, RegistryError> {
        self.log
            .as_ref()
            .ok_or_else(|| RegistryError::FeedNotOpen(self.path.clone()))
    }

    pub fn log_mut(&mut self) -> Result<&mut FeedLog, RegistryError> {
        let path = &self.path;
        self.log
            .as_mut()
            .ok_or_else(|| RegistryError::FeedNotOpen(path.clone()))
    }

    /// Whether an upload is currently attached
    pub fn has_writer(&self) -> bool {
        self.writer_active
    }

    /// Take the single-writer claim. Returns false if it is already held.
    pub fn claim_writer(&mut self) -> bool {
        if self.writer_active {
            return false;
        }
        self.writer_active = true;
        tracing::info!(feed = %self.path, "Writer attached");
        true
    }

    pub fn release_writer(&mut self) {
        if self.writer_active {
            self.writer_active = false;
            tracing::info!(feed = %self.path, "Writer detached");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::Codec;

    fn feed() -> Feed {
        Feed::new("feed1.ffm".into(), PathBuf::from("/tmp/unused.feed"), 0, StreamId(0))
    }

    #[test]
    fn test_single_writer_claim() {
        let mut feed = feed();
        assert!(!feed.has_writer());
        assert!(feed.claim_writer());
        assert!(!feed.claim_writer());
        feed.release_writer();
        assert!(feed.claim_writer());
    }

    #[test]
    fn test_slot_matching_reuses_slots() {
        let mut feed = feed();
        let video = StreamDescriptor::video(Codec::H264, 640, 360, 800);
        let audio = StreamDescriptor::audio(Codec::Aac, 44100, 2, 64);

        assert_eq!(feed.slot_for(&video), 0);
        assert_eq!(feed.slot_for(&audio), 1);
        assert_eq!(feed.slot_for(&video.clone()), 0);
        assert_eq!(
            feed.slot_for(&StreamDescriptor::video(Codec::H264, 320, 180, 300)),
            2
        );
        assert_eq!(feed.slots().len(), 3);
    }

    #[test]
    fn test_log_before_open() {
        let feed = feed();
        assert!(matches!(feed.log(), Err(RegistryError::FeedNotOpen(_))));
    }
}
