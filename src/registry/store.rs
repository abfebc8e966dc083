//! Stream registry implementation
//!
//! The table every request is resolved against. It is built once at load
//! time, prepared (feed slots computed, logs opened), then owned by the
//! event loop for the life of the process.

use std::collections::HashMap;
use std::path::PathBuf;

use super::error::RegistryError;
use super::feed::Feed;
use super::stream::{FeedId, StreamDefinition, StreamId, StreamKind, StreamSource};
use crate::media::{ContainerFormat, MediaKind};
use crate::protocol::DefinitionRow;

/// Path to definition table plus the feeds
#[derive(Debug, Default)]
pub struct StreamRegistry {
    definitions: Vec<StreamDefinition>,
    by_path: HashMap<String, StreamId>,
    feeds: Vec<Feed>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a feed. Its own path serves the feed in the relay format and
    /// accepts uploads.
    pub fn register_feed(
        &mut self,
        path: impl Into<String>,
        file: impl Into<PathBuf>,
        max_size: u64,
    ) -> Result<FeedId, RegistryError> {
        let path = path.into();
        let feed_id = FeedId(self.feeds.len());
        let definition = StreamDefinition::from_feed(path.clone(), feed_id, ContainerFormat::Feed, Vec::new());
        let def_id = self.insert(definition)?;
        self.feeds.push(Feed::new(path, file.into(), max_size, def_id));
        Ok(feed_id)
    }

    /// Register a definition
    pub fn register(&mut self, definition: StreamDefinition) -> Result<StreamId, RegistryError> {
        if let Some(feed) = definition.feed() {
            if feed.0 >= self.feeds.len() {
                return Err(RegistryError::UnknownFeed(format!("#{}", feed.0)));
            }
        }
        self.insert(definition)
    }

    /// Register the status page at `path`
    pub fn register_status(&mut self, path: impl Into<String>) -> Result<StreamId, RegistryError> {
        self.insert(StreamDefinition::status(path))
    }

    fn insert(&mut self, mut definition: StreamDefinition) -> Result<StreamId, RegistryError> {
        definition.path = definition.path.trim_start_matches('/').to_string();
        if self.by_path.contains_key(&definition.path) {
            return Err(RegistryError::DuplicatePath(definition.path));
        }
        let id = StreamId(self.definitions.len());
        self.by_path.insert(definition.path.clone(), id);
        self.definitions.push(definition);
        Ok(id)
    }

    /// Compute feed slots and remap tables, then open every feed's log
    pub fn prepare(&mut self) -> Result<(), RegistryError> {
        let own: Vec<StreamId> = self.feeds.iter().map(|f| f.definition).collect();

        for (index, def) in self.definitions.iter_mut().enumerate() {
            if own.contains(&StreamId(index)) {
                continue;
            }
            let streams = &def.streams;
            if let StreamKind::Live(StreamSource::Feed { feed, remap }) = &mut def.kind {
                if streams.is_empty() {
                    continue;
                }
                let feed = &mut self.feeds[feed.0];
                *remap = streams.iter().map(|s| feed.slot_for(s)).collect();
            }
        }

        // definitions without declared streams relay every slot
        for def in self.definitions.iter_mut() {
            if let StreamKind::Live(StreamSource::Feed { feed, remap }) = &mut def.kind {
                if def.streams.is_empty() {
                    let slots = self.feeds[feed.0].slots();
                    def.streams = slots.to_vec();
                    *remap = (0..slots.len()).collect();
                }
            }
        }

        for feed in &mut self.feeds {
            feed.open_log()?;
        }
        Ok(())
    }

    /// Resolve a request path (with or without the leading `/`)
    pub fn lookup(&self, path: &str) -> Option<StreamId> {
        self.by_path.get(path.trim_start_matches('/')).copied()
    }

    pub fn definition(&self, id: StreamId) -> &StreamDefinition {
        &self.definitions[id.0]
    }

    /// All definitions, in registration order
    pub fn iter(&self) -> impl Iterator<Item = (StreamId, &StreamDefinition)> {
        self.definitions
            .iter()
            .enumerate()
            .map(|(i, def)| (StreamId(i), def))
    }

    pub fn feed(&self, id: FeedId) -> &Feed {
        &self.feeds[id.0]
    }

    pub fn feed_mut(&mut self, id: FeedId) -> &mut Feed {
        &mut self.feeds[id.0]
    }

    pub fn feeds(&self) -> impl Iterator<Item = (FeedId, &Feed)> {
        self.feeds.iter().enumerate().map(|(i, f)| (FeedId(i), f))
    }

    /// The feed whose own path is `id`, if `id` is a feed's definition
    pub fn ingest_target(&self, id: StreamId) -> Option<FeedId> {
        self.feeds
            .iter()
            .position(|f| f.definition == id)
            .map(FeedId)
    }

    /// Rows for the status page
    pub fn status_rows(&self) -> Vec<DefinitionRow> {
        self.definitions
            .iter()
            .filter(|def| !def.is_status())
            .map(|def| DefinitionRow {
                path: def.path.clone(),
                format: def.format.name().to_string(),
                video_kbps: def.bitrate_kbps(MediaKind::Video),
                audio_kbps: def.bitrate_kbps(MediaKind::Audio),
                feed: def.feed().map(|f| self.feeds[f.0].path.clone()),
            })
            .collect()
    }
}
