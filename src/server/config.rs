//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::feed::FRAME_SIZE;

/// Default listening port
pub const DEFAULT_PORT: u16 = 8090;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent connections; accepts beyond this are closed
    pub max_connections: usize,

    /// Time a client has to send its complete request head
    pub request_timeout: Duration,

    /// Upper bound on one readiness wait, so deadlines are checked
    /// even when no socket is ready
    pub poll_interval: Duration,

    /// Per-connection I/O buffer size
    pub buffer_size: usize,

    /// How long a reader may wait for a feed's next frame
    pub feed_wait_timeout: Duration,

    /// Packets muxed per connection per loop cycle
    pub max_packets_per_step: usize,

    /// Path of the status page, registered at startup if not already present
    pub status_path: Option<String>,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_connections: 1000,
            request_timeout: Duration::from_secs(15),
            poll_interval: Duration::from_secs(1),
            buffer_size: 32 * 1024,
            feed_wait_timeout: Duration::from_secs(30),
            max_packets_per_step: 64,
            status_path: Some("status.html".to_string()),
            tcp_nodelay: true,
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections (at least 1)
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max.max(1);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the I/O buffer size. Uploads need room for two frames, so
    /// smaller values are raised.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(2 * FRAME_SIZE);
        self
    }

    pub fn feed_wait_timeout(mut self, timeout: Duration) -> Self {
        self.feed_wait_timeout = timeout;
        self
    }

    pub fn max_packets_per_step(mut self, count: usize) -> Self {
        self.max_packets_per_step = count.max(1);
        self
    }

    pub fn status_path(mut self, path: Option<String>) -> Self {
        self.status_path = path;
        self
    }
}
