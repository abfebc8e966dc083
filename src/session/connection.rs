//! Per-connection state machine
//!
//! A [`Connection`] is stepped by the event loop once per cycle. A step runs
//! states back to back until one of them has to wait for the socket (or,
//! in `WaitForFeed`, for a wakeup), so it never blocks and always does a
//! bounded amount of work.
//!
//! ```text
//!   AwaitRequest ──GET──► SendHeader ──► SendDataHeader ──► SendData ◄──► WaitForFeed
//!        │                   │                                 │
//!        │                   └─(404 / status)─► close          ▼
//!        └──POST feed──► ReceiveData                     SendDataTrailer ──► close
//! ```

use std::io;
use std::net::SocketAddr;
use std::time::Instant;

use bytes::{Buf, BytesMut};
use tokio::io::Interest;

use super::buffer::IoBuffer;
use super::error::SessionError;
use super::state::ConnectionState;
use super::transport::Transport;
use crate::feed::{FeedHeader, FeedInput, FeedPull, FRAME_SIZE};
use crate::media::{self, ContainerFormat, MediaInput, MediaKind, Muxer, Packet, StreamDescriptor};
use crate::protocol::{find_terminator, ConnectionRow, Request, Response, ResponseKind};
use crate::registry::{FeedId, Route, StreamId, StreamKind, StreamRegistry, StreamSource};
use crate::server::ServerConfig;

/// What a step needs from the loop
pub struct StepContext<'a> {
    pub registry: &'a mut StreamRegistry,
    pub config: &'a ServerConfig,
}

/// Result of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Keep the connection
    Continue,
    /// The response is complete; tear the connection down
    Close,
    /// Frames were appended to this feed; its waiting readers should be woken
    Appended(FeedId),
    /// The status page was requested; the loop must call
    /// [`Connection::respond_status`]
    StatusRequested,
}

enum Flow {
    /// Run the new state within the same step
    Next,
    Yield(StepOutcome),
}

enum Source {
    Feed { feed: FeedId, reader: FeedInput },
    File(Box<dyn MediaInput>),
}

enum Pull {
    Packet(Packet),
    Pending,
    Discontinuity,
    End,
}

/// Output side of a GET: the opened input and everything needed to mux it
struct Playback {
    format: ContainerFormat,
    source: Source,
    output_streams: Vec<StreamDescriptor>,
    /// Input stream index to output stream index
    input_to_output: Vec<Option<usize>>,
    keyframe_seen: Vec<bool>,
    muxer: Option<Box<dyn Muxer>>,
}

impl Playback {
    fn feed(&self) -> Option<FeedId> {
        match self.source {
            Source::Feed { feed, .. } => Some(feed),
            Source::File(_) => None,
        }
    }

    fn pull(&mut self, registry: &StreamRegistry) -> Result<Pull, SessionError> {
        match &mut self.source {
            Source::Feed { feed, reader } => {
                let log = registry.feed(*feed).log()?;
                Ok(match reader.read_packet(log)? {
                    FeedPull::Packet(packet) => Pull::Packet(packet),
                    FeedPull::Pending => Pull::Pending,
                    FeedPull::Discontinuity => Pull::Discontinuity,
                })
            }
            Source::File(input) => match input.read_packet() {
                Ok(Some(packet)) => Ok(Pull::Packet(packet)),
                Ok(None) => Ok(Pull::End),
                Err(e) => {
                    tracing::debug!(error = %e, "Input read failed, ending stream");
                    Ok(Pull::End)
                }
            },
        }
    }

    /// Remap, gate and mux one packet
    fn emit(&mut self, mut packet: Packet, sink: &mut BytesMut) -> Result<(), SessionError> {
        let Some(out) = self.input_to_output.get(packet.stream_index).copied().flatten() else {
            return Ok(());
        };
        let Some(desc) = self.output_streams.get(out) else {
            return Ok(());
        };

        // a video stream starts at its first keyframe
        if desc.kind() == MediaKind::Video && !self.keyframe_seen[out] {
            if !packet.keyframe {
                tracing::trace!(stream = out, "Dropping packet before first keyframe");
                return Ok(());
            }
            self.keyframe_seen[out] = true;
        }

        packet.stream_index = out;
        let muxer = self.muxer.as_mut().ok_or(SessionError::NoInput)?;
        muxer.write_packet(&packet, sink)?;
        Ok(())
    }

    fn reset_gates(&mut self) {
        self.keyframe_seen.iter_mut().for_each(|seen| *seen = false);
    }
}

/// One client connection
pub struct Connection<T> {
    transport: T,
    peer: SocketAddr,
    state: ConnectionState,
    buffer: IoBuffer,
    /// Muxer output not yet loaded into `buffer`
    outbox: BytesMut,
    deadline: Option<Instant>,
    bytes_in: u64,
    bytes_out: u64,
    reported: (u64, u64),
    path: Option<String>,
    response: Option<ResponseKind>,
    play: Option<Playback>,
    /// Feed this connection holds the writer claim for
    ingest: Option<FeedId>,
    upload_header_seen: bool,
    trailer_sent: bool,
}

impl<T: Transport> Connection<T> {
    /// A freshly accepted connection, waiting for its request
    pub fn new(transport: T, peer: SocketAddr, now: Instant, config: &ServerConfig) -> Self {
        Self {
            transport,
            peer,
            state: ConnectionState::AwaitRequest,
            buffer: IoBuffer::with_capacity(config.buffer_size.max(2 * FRAME_SIZE)),
            outbox: BytesMut::new(),
            deadline: Some(now + config.request_timeout),
            bytes_in: 0,
            bytes_out: 0,
            reported: (0, 0),
            path: None,
            response: None,
            play: None,
            ingest: None,
            upload_header_seen: false,
            trailer_sent: false,
        }
    }

    /// Advance the state machine as far as the socket allows
    pub fn step(
        &mut self,
        now: Instant,
        ctx: &mut StepContext<'_>,
    ) -> Result<StepOutcome, SessionError> {
        if let Some(deadline) = self.deadline {
            if now >= deadline {
                return Err(SessionError::Timeout(self.state));
            }
        }

        loop {
            let flow = match self.state {
                ConnectionState::AwaitRequest => self.await_request(ctx)?,
                ConnectionState::SendHeader => self.send_header()?,
                ConnectionState::SendDataHeader => self.send_data_header()?,
                ConnectionState::SendData => self.send_data(now, ctx)?,
                ConnectionState::SendDataTrailer => self.send_data_trailer()?,
                ConnectionState::ReceiveData => self.receive_data(ctx)?,
                ConnectionState::WaitForFeed => Flow::Yield(StepOutcome::Continue),
            };
            debug_assert!(self.buffer.is_consistent());

            if let Flow::Yield(outcome) = flow {
                return Ok(outcome);
            }
        }
    }

    fn await_request(&mut self, ctx: &mut StepContext<'_>) -> Result<Flow, SessionError> {
        loop {
            let from = self.buffer.scanned().saturating_sub(3);
            if let Some(len) = find_terminator(&self.buffer.filled()[from..]) {
                return self.handle_request(from + len, ctx);
            }
            let unscanned = self.buffer.pending().len();
            self.buffer.advance(unscanned);

            if self.buffer.spare_mut().is_empty() {
                return Err(SessionError::RequestTooLarge);
            }
            if self.read_some()?.is_none() {
                return Ok(Flow::Yield(StepOutcome::Continue));
            }
        }
    }

    fn handle_request(
        &mut self,
        head_len: usize,
        ctx: &mut StepContext<'_>,
    ) -> Result<Flow, SessionError> {
        let request = Request::parse(&self.buffer.filled()[..head_len])?;
        self.buffer.discard(head_len);
        self.deadline = None;

        tracing::debug!(
            peer = %self.peer,
            method = request.method.as_str(),
            path = %request.path,
            "Request"
        );
        self.path = Some(request.path.clone());

        match ctx.registry.route(&request) {
            Route::Status => {
                self.state = ConnectionState::SendHeader;
                Ok(Flow::Yield(StepOutcome::StatusRequested))
            }
            Route::NotFound => {
                self.stage(Response::not_found(&request.path));
                Ok(Flow::Next)
            }
            Route::Ingest(feed) => {
                if !ctx.registry.feed_mut(feed).claim_writer() {
                    self.stage(Response::not_found(&request.path));
                    return Ok(Flow::Next);
                }
                self.ingest = Some(feed);
                self.state = ConnectionState::ReceiveData;
                self.buffer.compact();
                Ok(Flow::Next)
            }
            Route::Play(stream) => {
                match open_playback(stream, &request, ctx.registry) {
                    Ok(play) => {
                        self.stage(Response::streaming(play.format));
                        self.play = Some(play);
                    }
                    Err(e) => {
                        tracing::debug!(peer = %self.peer, path = %request.path, error = %e, "Cannot open input");
                        self.stage(Response::not_found(&request.path));
                    }
                }
                Ok(Flow::Next)
            }
        }
    }

    fn send_header(&mut self) -> Result<Flow, SessionError> {
        if !self.flush()? {
            return Ok(Flow::Yield(StepOutcome::Continue));
        }
        match self.response {
            Some(kind) if !kind.closes() => {
                self.state = ConnectionState::SendDataHeader;
                Ok(Flow::Next)
            }
            _ => Ok(Flow::Yield(StepOutcome::Close)),
        }
    }

    fn send_data_header(&mut self) -> Result<Flow, SessionError> {
        let play = self.play.as_mut().ok_or(SessionError::NoInput)?;
        let mut muxer = play.format.new_muxer(play.output_streams.clone())?;
        muxer.write_header(&mut self.outbox)?;
        play.muxer = Some(muxer);

        self.state = ConnectionState::SendData;
        Ok(Flow::Next)
    }

    fn send_data(&mut self, now: Instant, ctx: &mut StepContext<'_>) -> Result<Flow, SessionError> {
        if !self.flush()? {
            return Ok(Flow::Yield(StepOutcome::Continue));
        }

        let capacity = self.buffer.capacity();
        let play = self.play.as_mut().ok_or(SessionError::NoInput)?;
        let mut caught_up = false;
        for _ in 0..ctx.config.max_packets_per_step {
            match play.pull(ctx.registry)? {
                Pull::Packet(packet) => {
                    play.emit(packet, &mut self.outbox)?;
                    if self.outbox.len() >= capacity {
                        break;
                    }
                }
                Pull::Discontinuity => {
                    tracing::debug!(peer = %self.peer, "Stream discontinuity, waiting for keyframes");
                    play.reset_gates();
                }
                Pull::Pending => {
                    caught_up = true;
                    break;
                }
                Pull::End => {
                    self.state = ConnectionState::SendDataTrailer;
                    return Ok(Flow::Next);
                }
            }
        }

        // park only once everything pulled so far is on the wire
        if !self.flush()? || !caught_up {
            return Ok(Flow::Yield(StepOutcome::Continue));
        }
        let writer = self
            .play
            .as_ref()
            .and_then(Playback::feed)
            .is_some_and(|feed| ctx.registry.feed(feed).has_writer());
        if writer {
            self.state = ConnectionState::WaitForFeed;
            self.deadline = Some(now + ctx.config.feed_wait_timeout);
            Ok(Flow::Yield(StepOutcome::Continue))
        } else {
            self.state = ConnectionState::SendDataTrailer;
            Ok(Flow::Next)
        }
    }

    fn send_data_trailer(&mut self) -> Result<Flow, SessionError> {
        if !self.trailer_sent {
            self.write_trailer()?;
        }
        if self.flush()? {
            Ok(Flow::Yield(StepOutcome::Close))
        } else {
            Ok(Flow::Yield(StepOutcome::Continue))
        }
    }

    /// Stage the container trailer. Fails if it was already staged.
    pub fn write_trailer(&mut self) -> Result<(), SessionError> {
        if self.trailer_sent {
            return Err(SessionError::TrailerAlreadySent);
        }
        let muxer = self
            .play
            .as_mut()
            .and_then(|play| play.muxer.as_mut())
            .ok_or(SessionError::NoInput)?;
        muxer.write_trailer(&mut self.outbox)?;
        self.trailer_sent = true;
        Ok(())
    }

    fn receive_data(&mut self, ctx: &mut StepContext<'_>) -> Result<Flow, SessionError> {
        let feed = self.ingest.ok_or(SessionError::NoInput)?;

        let mut appended = self.drain_frames(feed, ctx)?;
        for _ in 0..ctx.config.max_packets_per_step {
            if self.read_some()?.is_none() {
                break;
            }
            appended += self.drain_frames(feed, ctx)?;
        }

        if appended > 0 {
            tracing::trace!(peer = %self.peer, frames = appended, "Frames appended");
            Ok(Flow::Yield(StepOutcome::Appended(feed)))
        } else {
            Ok(Flow::Yield(StepOutcome::Continue))
        }
    }

    /// Consume every complete frame in the buffer; returns frames appended
    fn drain_frames(&mut self, feed: FeedId, ctx: &mut StepContext<'_>) -> Result<usize, SessionError> {
        let mut appended = 0;
        while self.buffer.filled().len() >= FRAME_SIZE {
            let frame = &self.buffer.filled()[..FRAME_SIZE];
            if self.upload_header_seen {
                ctx.registry.feed_mut(feed).log_mut()?.append(frame)?;
                appended += 1;
            } else {
                check_upload_header(frame, ctx.registry.feed(feed).slots())?;
                self.upload_header_seen = true;
            }
            self.buffer.discard(FRAME_SIZE);
        }
        self.buffer.compact();
        Ok(appended)
    }

    /// Read once into the buffer. `None` means the socket had nothing.
    fn read_some(&mut self) -> Result<Option<usize>, SessionError> {
        loop {
            match self.transport.try_read(self.buffer.spare_mut()) {
                Ok(0) => return Err(SessionError::Closed),
                Ok(n) => {
                    self.buffer.commit(n);
                    self.bytes_in += n as u64;
                    return Ok(Some(n));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Write out the buffer, refilling it from the outbox. Returns true once
    /// both are empty.
    fn flush(&mut self) -> Result<bool, SessionError> {
        loop {
            while !self.buffer.is_drained() {
                match self.transport.try_write(self.buffer.pending()) {
                    Ok(0) => return Err(SessionError::Closed),
                    Ok(n) => {
                        self.buffer.advance(n);
                        self.bytes_out += n as u64;
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                }
            }
            if self.outbox.is_empty() {
                return Ok(true);
            }
            let n = self.buffer.load(&self.outbox);
            self.outbox.advance(n);
        }
    }

    fn stage(&mut self, response: Response) {
        self.buffer.reset();
        self.outbox.clear();
        self.outbox.extend_from_slice(&response.bytes);
        self.response = Some(response.kind);
        self.state = ConnectionState::SendHeader;
    }

    /// Answer a status request with a rendered page
    pub fn respond_status(&mut self, html: &str) {
        self.stage(Response::html(html));
    }

    /// Resume a connection parked in `WaitForFeed`. Returns whether it was.
    pub fn wake(&mut self) -> bool {
        if self.state != ConnectionState::WaitForFeed {
            return false;
        }
        self.state = ConnectionState::SendData;
        self.deadline = None;
        true
    }

    /// Feed this connection is parked on, if any
    pub fn waiting_on(&self) -> Option<FeedId> {
        if self.state != ConnectionState::WaitForFeed {
            return None;
        }
        self.play.as_ref().and_then(Playback::feed)
    }

    /// Release what the connection holds in the registry. Returns the feed
    /// whose writer just left, so its readers can be woken.
    pub fn teardown(&mut self, registry: &mut StreamRegistry) -> Option<FeedId> {
        self.play = None;
        let feed = self.ingest.take()?;
        registry.feed_mut(feed).release_writer();
        Some(feed)
    }

    /// Bytes read and written since the last call
    pub fn take_transfer(&mut self) -> (u64, u64) {
        let delta = (self.bytes_in - self.reported.0, self.bytes_out - self.reported.1);
        self.reported = (self.bytes_in, self.bytes_out);
        delta
    }

    pub fn status_row(&self) -> ConnectionRow {
        ConnectionRow {
            path: self.path.clone(),
            ingest: self.ingest.is_some(),
            peer: self.peer,
            state: self.state.name(),
            bytes: self.bytes_in + self.bytes_out,
        }
    }

    pub fn interest(&self) -> Option<Interest> {
        self.state.interest()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn buffer(&self) -> &IoBuffer {
        &self.buffer
    }
}

/// Open the input behind a definition and work out the output streams
fn open_playback(
    stream: StreamId,
    request: &Request,
    registry: &StreamRegistry,
) -> Result<Playback, SessionError> {
    let seek = request.seek_hint()?;
    let def = registry.definition(stream);

    let (source, output_streams, input_to_output) = match &def.kind {
        StreamKind::Live(StreamSource::Feed { feed, remap }) => {
            let entry = registry.feed(*feed);
            let reader = FeedInput::open(entry.log()?, seek)?;
            let mut input_to_output = vec![None; entry.slots().len()];
            for (out, &slot) in remap.iter().enumerate() {
                if let Some(target) = input_to_output.get_mut(slot) {
                    *target = Some(out);
                }
            }
            let source = Source::Feed {
                feed: *feed,
                reader,
            };
            (source, def.streams.clone(), input_to_output)
        }
        StreamKind::Live(StreamSource::File(path)) => {
            let input = media::open_file(path, seek)?;
            let streams = input.streams().to_vec();
            let identity = (0..streams.len()).map(Some).collect();
            (Source::File(input), streams, identity)
        }
        StreamKind::Status => return Err(SessionError::NoInput),
    };

    Ok(Playback {
        format: def.format,
        source,
        keyframe_seen: vec![false; output_streams.len()],
        output_streams,
        input_to_output,
        muxer: None,
    })
}

/// An upload starts with a feed header describing the same streams, in the
/// same slot order, as the feed it targets.
fn check_upload_header(frame: &[u8], slots: &[StreamDescriptor]) -> Result<(), SessionError> {
    let header = FeedHeader::decode(frame).map_err(|e| SessionError::UploadHeader(e.to_string()))?;
    if header.frame_size as usize != FRAME_SIZE {
        return Err(SessionError::UploadHeader(format!(
            "frame size {}",
            header.frame_size
        )));
    }
    if header.streams.len() != slots.len() {
        return Err(SessionError::UploadHeader(format!(
            "{} streams, feed has {}",
            header.streams.len(),
            slots.len()
        )));
    }
    for (i, (sent, slot)) in header.streams.iter().zip(slots).enumerate() {
        if sent.codec != slot.codec {
            return Err(SessionError::UploadHeader(format!(
                "stream {} is {}, feed expects {}",
                i, sent.codec, slot.codec
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::feed::{FeedHeader, FramePacker, FrameUnpacker};
    use crate::media::Codec;
    use crate::registry::StreamDefinition;
    use crate::session::transport::mock::MockTransport;

    struct Harness {
        _dir: tempfile::TempDir,
        registry: StreamRegistry,
        config: ServerConfig,
        feed: FeedId,
        now: Instant,
    }

    fn slots() -> Vec<StreamDescriptor> {
        vec![
            StreamDescriptor::video(Codec::H264, 320, 240, 300),
            StreamDescriptor::audio(Codec::Aac, 44100, 2, 64),
        ]
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
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

        Harness {
            _dir: dir,
            registry,
            config: ServerConfig::default(),
            feed,
            now: Instant::now(),
        }
    }

    impl Harness {
        fn connect(&self, request: &str) -> (Connection<MockTransport>, MockTransport) {
            let transport = MockTransport::new();
            transport.push_input(request.as_bytes());
            let peer = "127.0.0.1:40000".parse().unwrap();
            let conn = Connection::new(transport.clone(), peer, self.now, &self.config);
            (conn, transport)
        }

        fn step(&mut self, conn: &mut Connection<MockTransport>) -> Result<StepOutcome, SessionError> {
            let mut ctx = StepContext {
                registry: &mut self.registry,
                config: &self.config,
            };
            conn.step(self.now, &mut ctx)
        }
    }

    fn packet(stream: usize, ts: i64, keyframe: bool) -> Packet {
        Packet::new(stream, ts, keyframe, Bytes::from(vec![stream as u8 + 1; 64]))
    }

    /// Header frame followed by the frames carrying `packets`
    fn upload(streams: Vec<StreamDescriptor>, packets: &[Packet]) -> Vec<u8> {
        let mut out = BytesMut::new();
        out.extend_from_slice(&FeedHeader::new(streams).encode().unwrap());
        let mut packer = FramePacker::new();
        for p in packets {
            packer.pack(p, &mut out);
        }
        packer.flush(&mut out);
        out.to_vec()
    }

    fn body(output: &[u8]) -> &[u8] {
        let head = find_terminator(output).expect("response head");
        &output[head..]
    }

    #[test]
    fn test_unknown_path_is_404() {
        let mut h = harness();
        let (mut conn, transport) = h.connect("GET /missing.ext HTTP/1.0\r\n\r\n");

        assert_eq!(h.step(&mut conn).unwrap(), StepOutcome::Close);
        let output = String::from_utf8(transport.output()).unwrap();
        assert!(output.starts_with("HTTP/1.0 404 Not Found\r\n"));
        assert!(output.contains("/missing.ext"));
    }

    #[test]
    fn test_unsupported_version_closes_silently() {
        let mut h = harness();
        let (mut conn, transport) = h.connect("GET /live.flv HTTP/2.0\r\n\r\n");

        assert!(matches!(h.step(&mut conn), Err(SessionError::Parse(_))));
        assert!(transport.output().is_empty());
    }

    #[test]
    fn test_partial_request_waits() {
        let mut h = harness();
        let (mut conn, transport) = h.connect("GET /missing.ext HT");

        assert_eq!(h.step(&mut conn).unwrap(), StepOutcome::Continue);
        assert_eq!(conn.state(), ConnectionState::AwaitRequest);

        transport.push_input(b"TP/1.0\r\n\r\n");
        assert_eq!(h.step(&mut conn).unwrap(), StepOutcome::Close);
    }

    #[test]
    fn test_request_deadline() {
        let mut h = harness();
        let (mut conn, _transport) = h.connect("GET /live");
        h.now += h.config.request_timeout;

        assert!(matches!(
            h.step(&mut conn),
            Err(SessionError::Timeout(ConnectionState::AwaitRequest))
        ));
    }

    #[test]
    fn test_oversized_request() {
        let mut h = harness();
        let long = format!("GET /{} HTTP/1.0", "a".repeat(h.config.buffer_size));
        let (mut conn, _transport) = h.connect(&long);

        assert!(matches!(
            h.step(&mut conn),
            Err(SessionError::RequestTooLarge)
        ));
    }

    #[test]
    fn test_status_page() {
        let mut h = harness();
        let (mut conn, transport) = h.connect("GET /status.html HTTP/1.0\r\n\r\n");

        assert_eq!(h.step(&mut conn).unwrap(), StepOutcome::StatusRequested);
        conn.respond_status("<html>ok</html>");
        assert_eq!(h.step(&mut conn).unwrap(), StepOutcome::Close);

        let output = String::from_utf8(transport.output()).unwrap();
        assert!(output.starts_with("HTTP/1.0 200 OK\r\nContent-type: text/html\r\n"));
        assert!(output.ends_with("<html>ok</html>"));
    }

    #[test]
    fn test_ingest_appends_and_blocks_second_writer() {
        let mut h = harness();
        let packets: Vec<Packet> = (0..4).map(|i| packet(0, i * 40, i == 0)).collect();
        let body = upload(slots(), &packets);
        let (mut conn, transport) = h.connect("POST /feed1.ffm HTTP/1.0\r\n\r\n");
        transport.push_input(&body);

        assert_eq!(h.step(&mut conn).unwrap(), StepOutcome::Appended(h.feed));
        assert_eq!(conn.state(), ConnectionState::ReceiveData);
        assert!(transport.output().is_empty());
        assert!(h.registry.feed(h.feed).has_writer());
        assert_eq!(h.registry.feed(h.feed).log().unwrap().appended(), 1);

        let offset = h.registry.feed(h.feed).log().unwrap().write_offset();
        let (mut second, second_transport) = h.connect("POST /feed1.ffm HTTP/1.0\r\n\r\n");
        assert_eq!(h.step(&mut second).unwrap(), StepOutcome::Close);
        assert!(second_transport.output().starts_with(b"HTTP/1.0 404"));
        assert_eq!(h.registry.feed(h.feed).log().unwrap().write_offset(), offset);
    }

    #[test]
    fn test_ingest_eof_releases_writer() {
        let mut h = harness();
        let (mut conn, transport) = h.connect("POST /feed1.ffm HTTP/1.0\r\n\r\n");
        transport.push_input(&upload(slots(), &[]));
        h.step(&mut conn).unwrap();

        transport.close_input();
        assert!(matches!(h.step(&mut conn), Err(SessionError::Closed)));
        assert_eq!(conn.teardown(&mut h.registry), Some(h.feed));
        assert!(!h.registry.feed(h.feed).has_writer());
        assert_eq!(conn.teardown(&mut h.registry), None);
    }

    #[test]
    fn test_upload_header_mismatch() {
        let mut h = harness();
        let wrong = vec![StreamDescriptor::audio(Codec::Mp3, 44100, 2, 128)];
        let (mut conn, transport) = h.connect("POST /feed1.ffm HTTP/1.0\r\n\r\n");
        transport.push_input(&upload(wrong, &[]));

        assert!(matches!(
            h.step(&mut conn),
            Err(SessionError::UploadHeader(_))
        ));
    }

    #[test]
    fn test_reader_waits_for_writer_then_streams() {
        let mut h = harness();
        let (mut writer, writer_io) = h.connect("POST /feed1.ffm HTTP/1.0\r\n\r\n");
        writer_io.push_input(&upload(slots(), &[]));
        assert_eq!(h.step(&mut writer).unwrap(), StepOutcome::Continue);

        let (mut reader, reader_io) = h.connect("GET /live.flv HTTP/1.0\r\n\r\n");
        assert_eq!(h.step(&mut reader).unwrap(), StepOutcome::Continue);
        assert_eq!(reader.state(), ConnectionState::WaitForFeed);
        assert_eq!(reader.waiting_on(), Some(h.feed));
        assert!(reader.interest().is_none());

        let header_len = reader_io.output().len();
        assert!(body(&reader_io.output()).starts_with(b"FLV"));

        // one frame from the writer
        let frames = upload(slots(), &[packet(0, 0, true), packet(1, 0, true)]);
        writer_io.push_input(&frames[FRAME_SIZE..]);
        assert_eq!(h.step(&mut writer).unwrap(), StepOutcome::Appended(h.feed));

        assert!(reader.wake());
        assert_eq!(h.step(&mut reader).unwrap(), StepOutcome::Continue);
        assert_eq!(reader.state(), ConnectionState::WaitForFeed);
        assert!(reader_io.output().len() > header_len);
    }

    #[test]
    fn test_huge_date_offset_starts_at_oldest_frame() {
        let mut h = harness();
        let (mut writer, writer_io) = h.connect("POST /feed1.ffm HTTP/1.0\r\n\r\n");
        writer_io.push_input(&upload(slots(), &[packet(0, 5000, true)]));
        assert_eq!(h.step(&mut writer).unwrap(), StepOutcome::Appended(h.feed));

        let (mut live, live_io) = h.connect("GET /live.flv HTTP/1.0\r\n\r\n");
        h.step(&mut live).unwrap();

        let (mut behind, behind_io) =
            h.connect("GET /live.flv?date=9223372036854775s%20810ms HTTP/1.0\r\n\r\n");
        assert_eq!(h.step(&mut behind).unwrap(), StepOutcome::Continue);
        assert_eq!(behind.state(), ConnectionState::WaitForFeed);

        let output = behind_io.output();
        assert!(output.starts_with(b"HTTP/1.0 200 OK"));
        assert!(body(&output).len() > body(&live_io.output()).len());
    }

    #[test]
    fn test_wait_for_feed_times_out() {
        let mut h = harness();
        let (mut writer, writer_io) = h.connect("POST /feed1.ffm HTTP/1.0\r\n\r\n");
        writer_io.push_input(&upload(slots(), &[]));
        h.step(&mut writer).unwrap();

        let (mut reader, _reader_io) = h.connect("GET /live.flv HTTP/1.0\r\n\r\n");
        h.step(&mut reader).unwrap();
        assert_eq!(reader.state(), ConnectionState::WaitForFeed);

        h.now += h.config.feed_wait_timeout + Duration::from_millis(1);
        assert!(matches!(
            h.step(&mut reader),
            Err(SessionError::Timeout(ConnectionState::WaitForFeed))
        ));
    }

    #[test]
    fn test_feed_without_writer_ends_with_trailer() {
        let mut h = harness();
        let (mut reader, reader_io) = h.connect("GET /live.flv HTTP/1.0\r\n\r\n");

        assert_eq!(h.step(&mut reader).unwrap(), StepOutcome::Close);
        assert!(body(&reader_io.output()).starts_with(b"FLV"));
        assert!(matches!(
            reader.write_trailer(),
            Err(SessionError::TrailerAlreadySent)
        ));
    }

    #[test]
    fn test_relay_gates_video_until_keyframe() {
        let mut h = harness();
        let (mut writer, writer_io) = h.connect("POST /feed1.ffm HTTP/1.0\r\n\r\n");
        writer_io.push_input(&upload(slots(), &[]));
        h.step(&mut writer).unwrap();

        let (mut reader, reader_io) = h.connect("GET /feed1.ffm HTTP/1.0\r\n\r\n");
        h.step(&mut reader).unwrap();
        assert_eq!(reader.state(), ConnectionState::WaitForFeed);

        let packets = [
            packet(0, 0, false),
            packet(1, 10, true),
            packet(0, 40, true),
            packet(0, 80, false),
        ];
        let frames = upload(slots(), &packets);
        writer_io.push_input(&frames[FRAME_SIZE..]);
        h.step(&mut writer).unwrap();

        // writer leaves; the reader drains and finishes
        writer_io.close_input();
        assert!(h.step(&mut writer).is_err());
        writer.teardown(&mut h.registry);
        assert!(reader.wake());
        assert_eq!(h.step(&mut reader).unwrap(), StepOutcome::Close);

        let output = reader_io.output();
        let text = String::from_utf8_lossy(&output);
        assert!(text.contains("Pragma: features=\"broadcast\""));

        let relayed = body(&output);
        let header = FeedHeader::decode(&relayed[..FRAME_SIZE]).unwrap();
        assert_eq!(header.streams.len(), 2);

        let mut unpacker = FrameUnpacker::new();
        for frame in relayed[FRAME_SIZE..].chunks(FRAME_SIZE) {
            unpacker.push_frame(frame).unwrap();
        }
        let got: Vec<(usize, i64)> = std::iter::from_fn(|| unpacker.next_packet())
            .map(|p| (p.stream_index, p.timestamp))
            .collect();
        assert_eq!(got, vec![(1, 10), (0, 40), (0, 80)]);
    }

    #[test]
    fn test_slow_socket_keeps_buffer_consistent() {
        let mut h = harness();
        let (mut conn, transport) = h.connect("GET /missing.ext HTTP/1.0\r\n\r\n");
        transport.set_write_limit(7);
        transport.set_blocked(true);

        assert_eq!(h.step(&mut conn).unwrap(), StepOutcome::Continue);
        assert_eq!(conn.state(), ConnectionState::SendHeader);
        assert!(conn.buffer().is_consistent());

        transport.set_blocked(false);
        assert_eq!(h.step(&mut conn).unwrap(), StepOutcome::Close);
        assert!(transport.output().starts_with(b"HTTP/1.0 404"));
        assert_eq!(conn.take_transfer().1, transport.output().len() as u64);
    }
}
