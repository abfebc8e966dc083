//! Status page rendering
//!
//! The page lists every stream definition and every connection except the
//! one asking for it, plus the server counters.

use std::fmt::Write;
use std::net::SocketAddr;

use chrono::{DateTime, Local};

use super::response::escape_html;
use crate::stats::ServerStats;

/// One stream definition row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionRow {
    pub path: String,
    pub format: String,
    pub video_kbps: u32,
    pub audio_kbps: u32,
    /// Backing feed path, for feed-backed definitions
    pub feed: Option<String>,
}

impl DefinitionRow {
    pub fn total_kbps(&self) -> u32 {
        self.video_kbps + self.audio_kbps
    }
}

/// One connection row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRow {
    pub path: Option<String>,
    /// Whether the connection is uploading into a feed
    pub ingest: bool,
    pub peer: SocketAddr,
    pub state: &'static str,
    pub bytes: u64,
}

/// Render the status page body
pub fn render(
    definitions: &[DefinitionRow],
    connections: &[ConnectionRow],
    stats: &ServerStats,
    generated: DateTime<Local>,
) -> String {
    let mut html = String::with_capacity(4096);
    html.push_str("<html><head><title>feedcast status</title></head>\n<body>\n");
    html.push_str("<h1>feedcast status</h1>\n");

    html.push_str("<h2>Available streams</h2>\n<table>\n");
    html.push_str(
        "<tr><th>Path</th><th>Format</th><th>kbit/s</th><th>Video kbit/s</th>\
         <th>Audio kbit/s</th><th>Feed</th></tr>\n",
    );
    for def in definitions {
        let _ = writeln!(
            html,
            "<tr><td><a href=\"/{path}\">{path}</a></td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            def.format,
            def.total_kbps(),
            def.video_kbps,
            def.audio_kbps,
            def.feed.as_deref().map(escape_html).unwrap_or_default(),
            path = escape_html(&def.path),
        );
    }
    html.push_str("</table>\n");

    let _ = writeln!(html, "<h2>Connections</h2>\n<p>Number of connections: {}</p>", connections.len());
    html.push_str(
        "<table>\n<tr><th>#</th><th>Path</th><th>Ingest</th><th>Address</th>\
         <th>State</th><th>Bytes</th></tr>\n",
    );
    for (i, conn) in connections.iter().enumerate() {
        let _ = writeln!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            i + 1,
            conn.path.as_deref().map(escape_html).unwrap_or_default(),
            if conn.ingest { "yes" } else { "" },
            conn.peer,
            conn.state,
            conn.bytes,
        );
    }
    html.push_str("</table>\n");

    let _ = writeln!(
        html,
        "<h2>Server</h2>\n<p>Accepted: {} Rejected: {} Active: {} Bytes in: {} Bytes out: {} Uptime: {}s</p>",
        stats.accepted,
        stats.rejected,
        stats.active,
        stats.bytes_in,
        stats.bytes_out,
        stats.uptime().as_secs(),
    );
    let _ = writeln!(
        html,
        "<hr><p>Generated at {}</p>\n</body></html>",
        generated.format("%Y-%m-%d %H:%M:%S")
    );
    html
}
