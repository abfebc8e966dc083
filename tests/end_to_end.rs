//! Full server runs over real sockets

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

use feedcast::client::{FeedPublisher, PublisherConfig};
use feedcast::media::{Codec, ContainerFormat, Packet, StreamDescriptor};
use feedcast::registry::StreamDefinition;
use feedcast::{FeedServer, ServerConfig, StreamRegistry};

const FRAME_SIZE: u64 = 4096;

fn audio() -> Vec<StreamDescriptor> {
    vec![StreamDescriptor::audio(Codec::Mp3, 44100, 2, 64)]
}

async fn start(dir: &tempfile::TempDir) -> FeedServer {
    let mut registry = StreamRegistry::new();
    let feed = registry
        .register_feed("feed1.ffm", dir.path().join("feed1.ffm"), 64 * FRAME_SIZE)
        .unwrap();
    registry
        .register(StreamDefinition::from_feed(
            "live.flv",
            feed,
            ContainerFormat::Flv,
            audio(),
        ))
        .unwrap();
    registry.prepare().unwrap();

    let config = ServerConfig::with_addr("127.0.0.1:0".parse().unwrap())
        .poll_interval(Duration::from_millis(20));
    FeedServer::bind(config, registry).await.unwrap()
}

async fn get(addr: SocketAddr, path: &str) -> String {
    let mut socket = TcpStream::connect(addr).await.unwrap();
    socket
        .write_all(format!("GET /{} HTTP/1.0\r\n\r\n", path).as_bytes())
        .await
        .unwrap();
    let mut body = Vec::new();
    socket.read_to_end(&mut body).await.unwrap();
    String::from_utf8_lossy(&body).into_owned()
}

/// Poll the status page until some connection shows `state`
async fn wait_for_state(addr: SocketAddr, state: &str) {
    loop {
        if get(addr, "status.html").await.contains(state) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn read_head(socket: &mut TcpStream) -> Vec<u8> {
    let mut data = Vec::new();
    let mut chunk = [0u8; 1024];
    while !data.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await.unwrap();
        assert!(n > 0, "closed before response head");
        data.extend_from_slice(&chunk[..n]);
    }
    data
}

#[tokio::test]
async fn test_publish_and_play() {
    let dir = tempfile::tempdir().unwrap();
    let server = start(&dir).await;
    let addr = server.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let scenario = async move {
        let (mut publisher, _events) =
            FeedPublisher::new(PublisherConfig::new(addr.to_string(), "feed1.ffm", audio()));
        publisher.connect().await.unwrap();
        wait_for_state(addr, "RECEIVE_DATA").await;

        let mut reader = TcpStream::connect(addr).await.unwrap();
        reader.write_all(b"GET /live.flv HTTP/1.0\r\n\r\n").await.unwrap();
        let mut body = read_head(&mut reader).await;
        let head = String::from_utf8_lossy(&body).into_owned();
        assert!(head.starts_with("HTTP/1.0 200 OK"));
        assert!(head.contains("video/x-flv"));

        for i in 0..20 {
            let packet = Packet::new(0, i * 26, true, Bytes::from(vec![0x5a; 1000]));
            publisher.send_packet(&packet).await.unwrap();
        }
        publisher.finish().await.unwrap();

        // the writer leaving ends the reader's response
        reader.read_to_end(&mut body).await.unwrap();
        let _ = stop_tx.send(());
        body
    };

    let shutdown = async {
        let _ = stop_rx.await;
    };
    let (result, body) = tokio::time::timeout(
        Duration::from_secs(20),
        async { tokio::join!(server.run_until(shutdown), scenario) },
    )
    .await
    .expect("scenario timed out");
    result.unwrap();

    let flv_start = body.windows(3).position(|w| w == b"FLV").unwrap();
    let payload = body[flv_start..].iter().filter(|b| **b == 0x5a).count();
    assert!(payload >= 20 * 1000, "only {} payload bytes relayed", payload);
}

#[tokio::test]
async fn test_status_and_missing_path() {
    let dir = tempfile::tempdir().unwrap();
    let server = start(&dir).await;
    let addr = server.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let scenario = async move {
        let status = get(addr, "status.html").await;
        let missing = get(addr, "missing.flv").await;
        let _ = stop_tx.send(());
        (status, missing)
    };

    let shutdown = async {
        let _ = stop_rx.await;
    };
    let (result, (status, missing)) = tokio::time::timeout(
        Duration::from_secs(10),
        async { tokio::join!(server.run_until(shutdown), scenario) },
    )
    .await
    .expect("scenario timed out");
    result.unwrap();

    assert!(status.starts_with("HTTP/1.0 200 OK"));
    assert!(status.contains("live.flv"));
    assert!(status.contains("feed1.ffm"));
    assert!(status.contains("Number of connections: 0"));

    assert!(missing.starts_with("HTTP/1.0 404"));
    assert!(missing.contains("/missing.flv"));
}

#[tokio::test]
async fn test_second_publisher_refused() {
    let dir = tempfile::tempdir().unwrap();
    let server = start(&dir).await;
    let addr = server.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let scenario = async move {
        let config = PublisherConfig::new(addr.to_string(), "feed1.ffm", audio());
        let (mut first, _) = FeedPublisher::new(config.clone());
        first.connect().await.unwrap();
        wait_for_state(addr, "RECEIVE_DATA").await;

        let (mut second, _) = FeedPublisher::new(config);
        second.connect().await.unwrap();
        let refused = second.finish().await.is_err();

        first.finish().await.unwrap();
        let _ = stop_tx.send(());
        refused
    };

    let shutdown = async {
        let _ = stop_rx.await;
    };
    let (result, refused) = tokio::time::timeout(
        Duration::from_secs(10),
        async { tokio::join!(server.run_until(shutdown), scenario) },
    )
    .await
    .expect("scenario timed out");
    result.unwrap();
    assert!(refused);
}
