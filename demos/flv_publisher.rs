//! Publish an FLV file to a feed in real time
//!
//! Run with: cargo run --example flv_publisher -- FILE [ADDR] [FEED]
//!
//! Examples:
//!   cargo run --example flv_publisher -- input.flv
//!   cargo run --example flv_publisher -- input.flv 127.0.0.1:8090 feed1.ffm
//!
//! Packets are paced by their timestamps, so the feed fills at the rate a
//! live encoder would fill it.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use feedcast::client::{FeedPublisher, PublishEvent, PublisherConfig};
use feedcast::media::{open_file, SeekHint};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("feedcast=info".parse()?),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let file = PathBuf::from(args.next().ok_or("usage: flv_publisher FILE [ADDR] [FEED]")?);
    let addr = args.next().unwrap_or_else(|| "127.0.0.1:8090".to_string());
    let feed = args.next().unwrap_or_else(|| "feed1.ffm".to_string());

    let mut input = open_file(&file, SeekHint::Live)?;
    for (i, stream) in input.streams().iter().enumerate() {
        println!("stream {}: {} {} kbit/s", i, stream.codec, stream.bitrate);
    }

    let config = PublisherConfig::new(addr, feed, input.streams().to_vec());
    let (mut publisher, mut events) = FeedPublisher::new(config);

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                PublishEvent::Connected => println!("connected"),
                PublishEvent::Rejected(status) => println!("rejected: {}", status),
                PublishEvent::Finished { bytes_sent } => println!("done, {} bytes", bytes_sent),
            }
        }
    });

    publisher.connect().await?;

    let started = Instant::now();
    let mut first_ts = None;
    let mut packets = 0u64;
    while let Some(packet) = input.read_packet()? {
        let base = *first_ts.get_or_insert(packet.timestamp);
        let due = Duration::from_millis((packet.timestamp - base).max(0) as u64);
        if let Some(wait) = due.checked_sub(started.elapsed()) {
            tokio::time::sleep(wait).await;
        }
        publisher.send_packet(&packet).await?;
        packets += 1;
    }

    publisher.finish().await?;
    println!("{} packets published", packets);
    Ok(())
}
