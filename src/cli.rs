use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "feedcast")]
#[command(author, version, about = "Live feed streaming server")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the streaming server
    Serve {
        /// Address to bind to, overriding the config file
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// Validate the configuration file and print the stream table
    Check,
}
