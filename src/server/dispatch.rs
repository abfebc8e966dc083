//! Connection dispatch
//!
//! The [`Dispatcher`] owns the registry and every connection. One call to
//! [`dispatch`](Dispatcher::dispatch) steps each connection once, routes
//! the side effects of those steps (feed wakeups, status pages), and then
//! prunes the connections that finished or failed.

use std::net::SocketAddr;
use std::time::Instant;

use chrono::Local;
use tokio::io::Interest;

use super::config::ServerConfig;
use super::slots::{SlotKey, Slots};
use crate::protocol::status;
use crate::registry::{FeedId, StreamRegistry};
use crate::session::{Connection, SessionError, StepContext, StepOutcome, Transport};
use crate::stats::ServerStats;

/// Connection collection plus the state every step needs
pub struct Dispatcher<T> {
    config: ServerConfig,
    registry: StreamRegistry,
    connections: Slots<Connection<T>>,
    stats: ServerStats,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(config: ServerConfig, registry: StreamRegistry) -> Self {
        Self {
            config,
            registry,
            connections: Slots::new(),
            stats: ServerStats::new(),
        }
    }

    /// Register an accepted socket. At capacity the socket is dropped
    /// without a response and `None` is returned.
    pub fn admit(&mut self, transport: T, peer: SocketAddr, now: Instant) -> Option<SlotKey> {
        if self.connections.len() >= self.config.max_connections {
            self.stats.on_reject();
            tracing::warn!(peer = %peer, "Connection rejected: limit reached");
            return None;
        }

        let key = self
            .connections
            .insert(Connection::new(transport, peer, now, &self.config));
        self.stats.on_accept();
        tracing::debug!(conn = %key, peer = %peer, "New connection");
        Some(key)
    }

    /// Step every connection once, then drop the ones that are done
    pub fn dispatch(&mut self, now: Instant) {
        let mut closed = Vec::new();

        for key in self.connections.keys() {
            let mut result = self.step_one(key, now);
            if let Ok(StepOutcome::StatusRequested) = result {
                let page = self.render_status(key);
                if let Some(conn) = self.connections.get_mut(key) {
                    conn.respond_status(&page);
                }
                result = self.step_one(key, now);
            }

            match result {
                Ok(StepOutcome::Continue) | Ok(StepOutcome::StatusRequested) => {}
                Ok(StepOutcome::Appended(feed)) => self.wake_readers(feed),
                Ok(StepOutcome::Close) => closed.push(key),
                Err(e) => {
                    log_session_error(key, &e);
                    closed.push(key);
                }
            }
        }

        for key in closed {
            self.close(key);
        }
    }

    fn step_one(&mut self, key: SlotKey, now: Instant) -> Result<StepOutcome, SessionError> {
        let Some(conn) = self.connections.get_mut(key) else {
            return Ok(StepOutcome::Continue);
        };
        let mut ctx = StepContext {
            registry: &mut self.registry,
            config: &self.config,
        };
        let result = conn.step(now, &mut ctx);

        let (bytes_in, bytes_out) = conn.take_transfer();
        self.stats.add_transfer(bytes_in, bytes_out);
        result
    }

    /// Move every connection parked on `feed` back to streaming
    fn wake_readers(&mut self, feed: FeedId) {
        for (key, conn) in self.connections.iter_mut() {
            if conn.waiting_on() == Some(feed) && conn.wake() {
                tracing::trace!(conn = %key, "Woken by feed");
            }
        }
    }

    fn close(&mut self, key: SlotKey) {
        let Some(mut conn) = self.connections.remove(key) else {
            return;
        };
        if let Some(feed) = conn.teardown(&mut self.registry) {
            self.wake_readers(feed);
        }
        self.stats.on_close();
        tracing::debug!(
            conn = %key,
            peer = %conn.peer(),
            state = %conn.state(),
            "Connection closed"
        );
    }

    /// Status page as seen by `requester`, which is left out of the list
    fn render_status(&self, requester: SlotKey) -> String {
        let connections: Vec<_> = self
            .connections
            .iter()
            .filter(|(key, _)| *key != requester)
            .map(|(_, conn)| conn.status_row())
            .collect();
        status::render(
            &self.registry.status_rows(),
            &connections,
            &self.stats,
            Local::now(),
        )
    }

    /// Close every connection, releasing feed claims
    pub fn shutdown(&mut self) {
        for key in self.connections.keys() {
            self.close(key);
        }
    }

    /// Transports that need readiness, with the readiness they wait for
    pub fn interests(&self) -> impl Iterator<Item = (&T, Interest)> {
        self.connections
            .iter()
            .filter_map(|(_, conn)| conn.interest().map(|interest| (conn.transport(), interest)))
    }

    pub fn connection(&self, key: SlotKey) -> Option<&Connection<T>> {
        self.connections.get(key)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

fn log_session_error(key: SlotKey, error: &SessionError) {
    match error {
        SessionError::UploadHeader(_) => {
            tracing::warn!(conn = %key, error = %error, "Upload rejected");
        }
        _ => tracing::debug!(conn = %key, error = %error, "Connection error"),
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};

    use super::*;
    use crate::feed::{FeedHeader, FramePacker};
    use crate::media::{Codec, ContainerFormat, Packet, StreamDescriptor};
    use crate::registry::StreamDefinition;
    use crate::session::transport::mock::MockTransport;
    use crate::session::ConnectionState;

    fn slots() -> Vec<StreamDescriptor> {
        vec![StreamDescriptor::audio(Codec::Mp3, 44100, 2, 128)]
    }

    fn dispatcher(dir: &tempfile::TempDir, max_connections: usize) -> Dispatcher<MockTransport> {
        let mut registry = StreamRegistry::new();
        registry.register_status("status.html").unwrap();
        let feed = registry
            .register_feed("feed1.ffm", dir.path().join("feed1.ffm"), 1 << 20)
            .unwrap();
        registry
            .register(StreamDefinition::from_feed(
                "live.flv",
                feed,
                ContainerFormat::Flv,
                slots(),
            ))
            .unwrap();
        registry.prepare().unwrap();

        let config = ServerConfig::default().max_connections(max_connections);
        Dispatcher::new(config, registry)
    }

    fn open(d: &mut Dispatcher<MockTransport>, request: &str, port: u16) -> (SlotKey, MockTransport) {
        let transport = MockTransport::new();
        transport.push_input(request.as_bytes());
        let peer = SocketAddr::from(([127, 0, 0, 1], port));
        let key = d.admit(transport.clone(), peer, Instant::now()).unwrap();
        (key, transport)
    }

    fn upload_header() -> Vec<u8> {
        FeedHeader::new(slots()).encode().unwrap()
    }

    fn data_frame(ts: i64) -> Vec<u8> {
        let mut out = BytesMut::new();
        let mut packer = FramePacker::new();
        packer.pack(&Packet::new(0, ts, true, Bytes::from_static(b"mp3")), &mut out);
        packer.flush(&mut out);
        out.to_vec()
    }

    #[test]
    fn test_status_excludes_requester() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = dispatcher(&dir, 10);
        let (key, transport) = open(&mut d, "GET /status.html HTTP/1.0\r\n\r\n", 5000);

        d.dispatch(Instant::now());
        let page = String::from_utf8(transport.output()).unwrap();
        assert!(page.starts_with("HTTP/1.0 200 OK\r\nContent-type: text/html"));
        assert!(page.contains("Number of connections: 0"));
        assert!(page.contains("live.flv"));
        assert!(page.contains("feed1.ffm"));
        assert!(d.connection(key).is_none());
        assert!(d.is_empty());
    }

    #[test]
    fn test_status_lists_other_connections() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = dispatcher(&dir, 10);
        let _idle = open(&mut d, "GET /li", 5001);
        let (_, transport) = open(&mut d, "GET /status.html HTTP/1.0\r\n\r\n", 5002);

        d.dispatch(Instant::now());
        let page = String::from_utf8(transport.output()).unwrap();
        assert!(page.contains("Number of connections: 1"));
        assert!(page.contains("127.0.0.1:5001"));
        assert!(page.contains("AWAIT_REQUEST"));
    }

    #[test]
    fn test_rejects_at_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = dispatcher(&dir, 1);
        open(&mut d, "GET /li", 5000);

        let extra = MockTransport::new();
        let peer = SocketAddr::from(([127, 0, 0, 1], 5001));
        assert!(d.admit(extra.clone(), peer, Instant::now()).is_none());
        assert!(extra.output().is_empty());
        assert_eq!(d.stats().rejected, 1);
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn test_not_found_is_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = dispatcher(&dir, 10);
        let (key, transport) = open(&mut d, "GET /missing.ext HTTP/1.0\r\n\r\n", 5000);

        d.dispatch(Instant::now());
        assert!(transport.output().starts_with(b"HTTP/1.0 404"));
        assert!(d.connection(key).is_none());
        assert_eq!(d.stats().active, 0);
        assert!(d.stats().bytes_out > 0);
    }

    #[test]
    fn test_append_wakes_reader_within_one_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = dispatcher(&dir, 10);

        let (writer, writer_io) = open(&mut d, "POST /feed1.ffm HTTP/1.0\r\n\r\n", 5000);
        writer_io.push_input(&upload_header());
        let (reader, _reader_io) = open(&mut d, "GET /live.flv HTTP/1.0\r\n\r\n", 5001);

        d.dispatch(Instant::now());
        assert_eq!(d.connection(writer).unwrap().state(), ConnectionState::ReceiveData);
        assert_eq!(d.connection(reader).unwrap().state(), ConnectionState::WaitForFeed);

        writer_io.push_input(&data_frame(0));
        d.dispatch(Instant::now());
        // the writer is stepped before the reader, so the reader consumed the
        // frame in this same cycle and parked again
        let reader_conn = d.connection(reader).unwrap();
        assert_eq!(reader_conn.state(), ConnectionState::WaitForFeed);
        assert!(reader_conn.status_row().bytes > 0);
    }

    #[test]
    fn test_writer_leaving_finishes_readers() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = dispatcher(&dir, 10);

        let (_writer, writer_io) = open(&mut d, "POST /feed1.ffm HTTP/1.0\r\n\r\n", 5000);
        writer_io.push_input(&upload_header());
        let (reader, _reader_io) = open(&mut d, "GET /live.flv HTTP/1.0\r\n\r\n", 5001);
        d.dispatch(Instant::now());
        assert_eq!(d.connection(reader).unwrap().state(), ConnectionState::WaitForFeed);

        writer_io.close_input();
        d.dispatch(Instant::now());
        assert!(!d.registry().feed(FeedId(0)).has_writer());
        assert_eq!(d.connection(reader).unwrap().state(), ConnectionState::SendData);

        d.dispatch(Instant::now());
        assert!(d.connection(reader).is_none());
        assert!(d.is_empty());
    }

    #[test]
    fn test_shutdown_releases_writer() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = dispatcher(&dir, 10);
        let (_writer, writer_io) = open(&mut d, "POST /feed1.ffm HTTP/1.0\r\n\r\n", 5000);
        writer_io.push_input(&upload_header());
        d.dispatch(Instant::now());
        assert!(d.registry().feed(FeedId(0)).has_writer());

        d.shutdown();
        assert!(d.is_empty());
        assert!(!d.registry().feed(FeedId(0)).has_writer());
    }
}
