//! Configuration file loading
//!
//! The server is described by one TOML file:
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8090"
//! max_connections = 200
//! request_timeout = "15s"
//! status_path = "status.html"
//!
//! [[feed]]
//! path = "feed1.ffm"
//! file = "/tmp/feed1.ffm"
//! max_size = "5M"
//!
//! [[stream]]
//! path = "live.flv"
//! feed = "feed1.ffm"
//! format = "flv"
//!
//! [[stream.media]]
//! codec = "h264"
//! bitrate = 300
//! width = 320
//! height = 240
//!
//! [[stream]]
//! path = "clip.flv"
//! file = "/srv/media/clip.flv"
//! ```
//!
//! Loading validates everything it can without touching the disk and
//! returns a registry ready for [`StreamRegistry::prepare`].

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;

use crate::media::{Codec, ContainerFormat, MediaKind, StreamDescriptor};
use crate::registry::feed::DEFAULT_FEED_MAX_SIZE;
use crate::registry::stream::StreamDefinition;
use crate::registry::{RegistryError, StreamRegistry};
use crate::server::ServerConfig;

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration syntax: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

/// A loaded configuration
#[derive(Debug)]
pub struct Loaded {
    pub server: ServerConfig,
    pub registry: StreamRegistry,
}

/// Load and validate a configuration file
pub fn load(path: &Path) -> Result<Loaded, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let loaded = from_str(&text)?;
    tracing::debug!(
        path = %path.display(),
        feeds = loaded.registry.feeds().count(),
        "Configuration loaded"
    );
    Ok(loaded)
}

/// Parse and validate configuration text
pub fn from_str(text: &str) -> Result<Loaded, ConfigError> {
    let file: FileConfig = toml::from_str(text)?;
    let server = file.server.apply(ServerConfig::default())?;
    let mut registry = StreamRegistry::new();

    for feed in &file.feeds {
        let max_size = match &feed.max_size {
            Some(size) => size.bytes()?,
            None => DEFAULT_FEED_MAX_SIZE,
        };
        let id = registry.register_feed(feed.path.as_str(), feed.file.as_path(), max_size)?;
        registry.feed_mut(id).truncate = feed.truncate;
    }

    for stream in &file.streams {
        registry.register(stream.definition(&registry)?)?;
    }

    Ok(Loaded { server, registry })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    server: ServerSection,
    #[serde(rename = "feed")]
    feeds: Vec<FeedSection>,
    #[serde(rename = "stream")]
    streams: Vec<StreamSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ServerSection {
    bind: Option<String>,
    max_connections: Option<usize>,
    request_timeout: Option<String>,
    poll_interval: Option<String>,
    feed_wait_timeout: Option<String>,
    buffer_size: Option<Size>,
    max_packets_per_step: Option<usize>,
    status_path: Option<String>,
    tcp_nodelay: Option<bool>,
}

impl ServerSection {
    fn apply(&self, mut config: ServerConfig) -> Result<ServerConfig, ConfigError> {
        if let Some(bind) = &self.bind {
            let addr: SocketAddr = bind
                .parse()
                .map_err(|_| invalid(format!("bad bind address {:?}", bind)))?;
            config = config.bind(addr);
        }
        if let Some(max) = self.max_connections {
            config = config.max_connections(max);
        }
        if let Some(t) = &self.request_timeout {
            config = config.request_timeout(duration("request_timeout", t)?);
        }
        if let Some(t) = &self.poll_interval {
            config = config.poll_interval(duration("poll_interval", t)?);
        }
        if let Some(t) = &self.feed_wait_timeout {
            config = config.feed_wait_timeout(duration("feed_wait_timeout", t)?);
        }
        if let Some(size) = &self.buffer_size {
            let bytes = size.bytes()?;
            let bytes = usize::try_from(bytes).map_err(|_| invalid("buffer_size too large"))?;
            config = config.buffer_size(bytes);
        }
        if let Some(count) = self.max_packets_per_step {
            config = config.max_packets_per_step(count);
        }
        if let Some(path) = &self.status_path {
            // an empty path disables the built-in status page
            let path = path.trim_start_matches('/');
            config = config.status_path((!path.is_empty()).then(|| path.to_string()));
        }
        if let Some(nodelay) = self.tcp_nodelay {
            config.tcp_nodelay = nodelay;
        }
        Ok(config)
    }
}

fn duration(key: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value)
        .map_err(|e| invalid(format!("{}: bad duration {:?}: {}", key, value, e)))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FeedSection {
    path: String,
    file: PathBuf,
    max_size: Option<Size>,
    #[serde(default)]
    truncate: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StreamSection {
    path: String,
    feed: Option<String>,
    file: Option<PathBuf>,
    format: Option<String>,
    #[serde(default)]
    status: bool,
    #[serde(default)]
    media: Vec<MediaSection>,
}

impl StreamSection {
    fn definition(&self, registry: &StreamRegistry) -> Result<StreamDefinition, ConfigError> {
        let format = match &self.format {
            Some(name) => ContainerFormat::from_name(name)
                .ok_or_else(|| invalid(format!("stream {}: unknown format {:?}", self.path, name)))?,
            None => ContainerFormat::Flv,
        };

        match (&self.feed, &self.file, self.status) {
            (None, None, true) => Ok(StreamDefinition::status(self.path.as_str())),
            (Some(feed), None, false) => {
                let feed_id = registry
                    .lookup(feed)
                    .and_then(|id| registry.ingest_target(id))
                    .ok_or_else(|| RegistryError::UnknownFeed(feed.clone()))?;
                let streams = self
                    .media
                    .iter()
                    .map(|m| m.descriptor(&self.path))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(StreamDefinition::from_feed(
                    self.path.as_str(),
                    feed_id,
                    format,
                    streams,
                ))
            }
            (None, Some(file), false) => {
                if !self.media.is_empty() {
                    return Err(invalid(format!(
                        "stream {}: file sources take their streams from the file",
                        self.path
                    )));
                }
                Ok(StreamDefinition::from_file(
                    self.path.as_str(),
                    file.as_path(),
                    format,
                ))
            }
            _ => Err(invalid(format!(
                "stream {}: needs exactly one of feed, file or status",
                self.path
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MediaSection {
    codec: String,
    #[serde(default)]
    bitrate: u32,
    #[serde(default)]
    width: u16,
    #[serde(default)]
    height: u16,
    #[serde(default)]
    sample_rate: u32,
    #[serde(default)]
    channels: u8,
    /// Hex-encoded decoder configuration
    extradata: Option<String>,
}

impl MediaSection {
    fn descriptor(&self, stream: &str) -> Result<StreamDescriptor, ConfigError> {
        let codec = Codec::from_name(&self.codec)
            .ok_or_else(|| invalid(format!("stream {}: unknown codec {:?}", stream, self.codec)))?;

        let desc = match codec.kind() {
            MediaKind::Video => {
                if self.width == 0 || self.height == 0 {
                    return Err(invalid(format!(
                        "stream {}: {} needs width and height",
                        stream, codec
                    )));
                }
                StreamDescriptor::video(codec, self.width, self.height, self.bitrate)
            }
            MediaKind::Audio => {
                if self.sample_rate == 0 {
                    return Err(invalid(format!(
                        "stream {}: {} needs sample_rate",
                        stream, codec
                    )));
                }
                let channels = if self.channels == 0 { 2 } else { self.channels };
                StreamDescriptor::audio(codec, self.sample_rate, channels, self.bitrate)
            }
        };

        let Some(text) = &self.extradata else {
            return Ok(desc);
        };
        // digits may be grouped with spaces
        let digits: String = text.split_ascii_whitespace().collect();
        let extradata = hex::decode(&digits).map_err(|e| {
            invalid(format!("stream {}: bad extradata: {}", stream, e))
        })?;
        Ok(desc.with_extradata(Bytes::from(extradata)))
    }
}

/// Byte size written as a plain integer or with a K/M/G suffix
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Size {
    Bytes(u64),
    Text(String),
}

impl Size {
    fn bytes(&self) -> Result<u64, ConfigError> {
        let text = match self {
            Size::Bytes(n) => return Ok(*n),
            Size::Text(text) => text.trim(),
        };
        let split = text
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(text.len());
        let (digits, suffix) = text.split_at(split);
        let value: u64 = digits
            .parse()
            .map_err(|_| invalid(format!("bad size {:?}", text)))?;
        let shift = match suffix.trim().to_ascii_uppercase().as_str() {
            "" | "B" => 0,
            "K" | "KB" => 10,
            "M" | "MB" => 20,
            "G" | "GB" => 30,
            _ => return Err(invalid(format!("bad size suffix in {:?}", text))),
        };
        value
            .checked_mul(1 << shift)
            .ok_or_else(|| invalid(format!("size {:?} overflows", text)))
    }
}
