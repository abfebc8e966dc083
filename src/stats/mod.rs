//! Statistics
//!
//! Counters shown on the status page.

pub mod metrics;

pub use metrics::ServerStats;
