//! Minimal feed server
//!
//! Run with: cargo run --example simple_server [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example simple_server                    # binds to 0.0.0.0:8090
//!   cargo run --example simple_server 127.0.0.1:8091     # binds to 127.0.0.1:8091
//!
//! ## Publishing
//!
//! Upload to the feed with the flv_publisher example:
//!   cargo run --example flv_publisher -- input.flv 127.0.0.1:8090 feed1.ffm
//!
//! ## Playing
//!
//! With ffplay:
//!   ffplay http://localhost:8090/live.flv
//!   ffplay "http://localhost:8090/live.flv?date=30s"     # start 30s behind live
//!
//! The status page lives at http://localhost:8090/status.html

use std::net::SocketAddr;

use feedcast::media::{Codec, ContainerFormat, StreamDescriptor};
use feedcast::registry::{StreamDefinition, DEFAULT_FEED_MAX_SIZE};
use feedcast::{FeedServer, ServerConfig, StreamRegistry};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("feedcast=debug".parse()?),
        )
        .init();

    let addr: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "0.0.0.0:8090".to_string())
        .parse()?;

    let mut registry = StreamRegistry::new();
    let feed = registry.register_feed(
        "feed1.ffm",
        std::env::temp_dir().join("feedcast-feed1.ffm"),
        DEFAULT_FEED_MAX_SIZE,
    )?;
    registry.register(StreamDefinition::from_feed(
        "live.flv",
        feed,
        ContainerFormat::Flv,
        vec![
            StreamDescriptor::video(Codec::H264, 640, 360, 800),
            StreamDescriptor::audio(Codec::Aac, 44100, 2, 128),
        ],
    ))?;
    registry.prepare()?;

    println!("Feed server on {}", addr);
    println!("  upload:  POST http://{}/feed1.ffm", addr);
    println!("  play:    http://{}/live.flv", addr);
    println!("  status:  http://{}/status.html", addr);

    let server = FeedServer::bind(ServerConfig::with_addr(addr), registry).await?;
    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
