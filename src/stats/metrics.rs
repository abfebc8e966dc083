//! Server counters

use std::time::{Duration, Instant};

/// Server-wide counters, owned by the event loop
#[derive(Debug, Clone)]
pub struct ServerStats {
    /// Connections accepted into the collection
    pub accepted: u64,
    /// Connections closed at accept because the collection was full
    pub rejected: u64,
    /// Connections currently in the collection
    pub active: u64,
    /// Total bytes read from clients
    pub bytes_in: u64,
    /// Total bytes written to clients
    pub bytes_out: u64,
    /// Server start time
    pub started_at: Instant,
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            accepted: 0,
            rejected: 0,
            active: 0,
            bytes_in: 0,
            bytes_out: 0,
            started_at: Instant::now(),
        }
    }

    pub fn on_accept(&mut self) {
        self.accepted += 1;
        self.active += 1;
    }

    pub fn on_reject(&mut self) {
        self.rejected += 1;
    }

    pub fn on_close(&mut self) {
        self.active = self.active.saturating_sub(1);
    }

    /// Record bytes moved during one dispatch
    pub fn add_transfer(&mut self, bytes_in: u64, bytes_out: u64) {
        self.bytes_in += bytes_in;
        self.bytes_out += bytes_out;
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}
