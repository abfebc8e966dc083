mod cli;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use feedcast::config::{self, Loaded};
use feedcast::registry::{StreamKind, StreamSource};
use feedcast::{FeedServer, ServerConfig, StreamRegistry};

fn load(path: Option<&Path>) -> Result<Loaded> {
    match path {
        Some(path) => config::load(path)
            .with_context(|| format!("Failed to load config file: {}", path.display())),
        None => {
            tracing::warn!("No config file given, serving only the status page");
            Ok(Loaded {
                server: ServerConfig::default(),
                registry: StreamRegistry::new(),
            })
        }
    }
}

async fn serve(config_path: Option<&Path>, bind: Option<std::net::SocketAddr>) -> Result<()> {
    let Loaded {
        mut server,
        mut registry,
    } = load(config_path)?;

    if let Some(addr) = bind {
        server = server.bind(addr);
    }

    registry.prepare().context("Failed to open feeds")?;
    for (_, feed) in registry.feeds() {
        tracing::info!(
            feed = %feed.path,
            file = %feed.file.display(),
            slots = feed.slots().len(),
            "Feed ready"
        );
    }

    let server = FeedServer::bind(server, registry)
        .await
        .context("Failed to start server")?;

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutting down...");
        })
        .await?;
    Ok(())
}

fn check(config_path: Option<&Path>) -> Result<()> {
    let path = config_path.context("check needs --config")?;
    let Loaded { server, registry } = config::load(path)
        .with_context(|| format!("Failed to load config file: {}", path.display()))?;

    println!("Configuration OK: {}", path.display());
    println!("  bind: {}", server.bind_addr);
    println!("  max connections: {}", server.max_connections);
    for (_, feed) in registry.feeds() {
        println!(
            "  feed /{} -> {} ({} bytes)",
            feed.path,
            feed.file.display(),
            feed.max_size
        );
    }
    for (_, def) in registry.iter() {
        let source = match &def.kind {
            StreamKind::Status => "status page".to_string(),
            StreamKind::Live(StreamSource::Feed { feed, .. }) => {
                format!("feed /{}", registry.feed(*feed).path)
            }
            StreamKind::Live(StreamSource::File(file)) => format!("file {}", file.display()),
        };
        println!("  stream /{} [{}] <- {}", def.path, def.format.name(), source);
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise pick defaults based on the verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "feedcast=debug".to_string()
        } else {
            "feedcast=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Serve { bind } => serve(cli.config.as_deref(), bind).await,
        Commands::Check => check(cli.config.as_deref()),
    }
}
