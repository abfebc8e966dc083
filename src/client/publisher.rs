//! Feed publisher
//!
//! Uploads packets to a feed: a `POST` request head, the feed header
//! frame describing the streams, then packed data frames for as long as
//! the publisher lives. The server answers only when it refuses the upload.

use std::io;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::feed::FeedMuxer;
use crate::media::{Muxer, Packet, StreamDescriptor};

/// Events from the feed publisher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishEvent {
    /// Connected and the feed header was sent
    Connected,

    /// The server refused the upload (status line attached)
    Rejected(String),

    /// Upload finished cleanly
    Finished { bytes_sent: u64 },
}

/// Where and what to publish
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Server address, `host:port`
    pub addr: String,
    /// Feed path on the server
    pub path: String,
    /// Streams carried by the upload; must match the feed's slots
    pub streams: Vec<StreamDescriptor>,
    pub connect_timeout: Duration,
    /// How long `finish` waits for the server to close
    pub close_timeout: Duration,
    pub tcp_nodelay: bool,
}

impl PublisherConfig {
    pub fn new(
        addr: impl Into<String>,
        path: impl Into<String>,
        streams: Vec<StreamDescriptor>,
    ) -> Self {
        Self {
            addr: addr.into(),
            path: path.into(),
            streams,
            connect_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
            tcp_nodelay: true,
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }
}

/// Feed upload client
///
/// # Example
/// ```no_run
/// use bytes::Bytes;
/// use feedcast::client::{FeedPublisher, PublisherConfig};
/// use feedcast::media::{Codec, Packet, StreamDescriptor};
///
/// # async fn example() -> feedcast::Result<()> {
/// let streams = vec![StreamDescriptor::audio(Codec::Mp3, 44100, 2, 128)];
/// let config = PublisherConfig::new("127.0.0.1:8090", "feed1.ffm", streams);
/// let (mut publisher, _events) = FeedPublisher::new(config);
///
/// publisher.connect().await?;
/// publisher
///     .send_packet(&Packet::new(0, 0, true, Bytes::from_static(b"...")))
///     .await?;
/// publisher.finish().await?;
/// # Ok(())
/// # }
/// ```
pub struct FeedPublisher {
    config: PublisherConfig,
    event_tx: mpsc::Sender<PublishEvent>,
    stream: Option<TcpStream>,
    muxer: FeedMuxer,
    out: BytesMut,
    bytes_sent: u64,
}

impl FeedPublisher {
    /// Create a new publisher.
    ///
    /// Returns the publisher and a receiver for events.
    pub fn new(config: PublisherConfig) -> (Self, mpsc::Receiver<PublishEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let muxer = FeedMuxer::new(config.streams.clone());

        let publisher = Self {
            config,
            event_tx: tx,
            stream: None,
            muxer,
            out: BytesMut::new(),
            bytes_sent: 0,
        };

        (publisher, rx)
    }

    /// Connect, send the request head and the feed header frame.
    pub async fn connect(&mut self) -> Result<()> {
        let connect = TcpStream::connect(self.config.addr.as_str());
        let stream = tokio::time::timeout(self.config.connect_timeout, connect)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
        stream.set_nodelay(self.config.tcp_nodelay)?;
        self.stream = Some(stream);

        let head = format!(
            "POST /{} HTTP/1.0\r\n\r\n",
            self.config.path.trim_start_matches('/')
        );
        self.out.put_slice(head.as_bytes());
        self.muxer.write_header(&mut self.out)?;
        self.write_out().await?;

        tracing::debug!(
            addr = %self.config.addr,
            path = %self.config.path,
            streams = self.config.streams.len(),
            "Publisher connected"
        );
        let _ = self.event_tx.send(PublishEvent::Connected).await;
        Ok(())
    }

    /// Queue one packet; complete frames are written as they fill.
    pub async fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        if self.stream.is_none() {
            return Err(Error::Protocol("not connected".into()));
        }
        self.muxer.write_packet(packet, &mut self.out)?;
        self.write_out().await
    }

    /// Flush the partial frame, close the upload and wait for the server
    /// to hang up.
    ///
    /// Fails with [`Error::Protocol`] if the server answered the upload,
    /// which it only does to refuse it.
    pub async fn finish(&mut self) -> Result<()> {
        if self.stream.is_none() {
            return Err(Error::Protocol("not connected".into()));
        }
        self.muxer.write_trailer(&mut self.out)?;
        self.write_out().await?;

        let Some(mut stream) = self.stream.take() else {
            return Err(Error::Protocol("not connected".into()));
        };
        stream.shutdown().await?;

        let mut reply = Vec::new();
        tokio::time::timeout(self.config.close_timeout, stream.read_to_end(&mut reply))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "server did not close"))??;

        if !reply.is_empty() {
            let status = String::from_utf8_lossy(&reply)
                .lines()
                .next()
                .unwrap_or_default()
                .to_string();
            tracing::warn!(path = %self.config.path, status = %status, "Upload rejected");
            let _ = self.event_tx.send(PublishEvent::Rejected(status.clone())).await;
            return Err(Error::Protocol(format!("upload rejected: {}", status)));
        }

        tracing::debug!(path = %self.config.path, bytes = self.bytes_sent, "Upload finished");
        let _ = self
            .event_tx
            .send(PublishEvent::Finished {
                bytes_sent: self.bytes_sent,
            })
            .await;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Bytes written so far, request head included
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    async fn write_out(&mut self) -> Result<()> {
        if self.out.is_empty() {
            return Ok(());
        }
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::Protocol("not connected".into()))?;
        stream.write_all(&self.out).await?;
        self.bytes_sent += self.out.len() as u64;
        self.out.clear();
        Ok(())
    }
}
