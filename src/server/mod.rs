//! Server implementation
//!
//! The listener and event loop ([`FeedServer`]), the connection collection
//! ([`Dispatcher`]) and the server configuration.

pub mod config;
pub mod dispatch;
pub mod listener;
pub mod slots;

pub use config::ServerConfig;
pub use dispatch::Dispatcher;
pub use listener::FeedServer;
pub use slots::{SlotKey, Slots};
