//! feedcast - live feed streaming server
//!
//! An HTTP-subset media server that accepts live uploads into ring-buffer
//! feeds and serves them (or pre-recorded files) re-muxed on the fly.
//!
//! # Architecture
//!
//! ```text
//!   POST /feed1.ffm ──► [ReceiveData] ──append──► FeedLog (wrap-around file)
//!                                                    │
//!   GET /live.flv ───► [SendData] ◄──read_next───────┘
//!                           │
//!                           └──► Muxer (FLV / feed relay) ──► TCP
//! ```
//!
//! Everything runs on one thread: [`FeedServer`] polls the listener and every
//! connection socket with a bounded timeout, then steps each connection's
//! state machine once per cycle. Feeds are single-writer, many-reader.
//!
//! # Example
//!
//! ```no_run
//! use feedcast::{FeedServer, ServerConfig, StreamRegistry};
//!
//! # async fn example() -> feedcast::Result<()> {
//! let mut registry = StreamRegistry::new();
//! registry.register_status("status.html")?;
//! registry.prepare()?;
//!
//! let server = FeedServer::bind(ServerConfig::default(), registry).await?;
//! server.run().await
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod feed;
pub mod media;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;

pub use error::{Error, Result};
pub use registry::StreamRegistry;
pub use server::{FeedServer, ServerConfig};
