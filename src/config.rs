//! Command line configuration and log setup for the node binary.

use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Default bucket size and replication factor.
pub const DEFAULT_K: usize = 20;
/// Default parallelism for concurrent lookups.
pub const DEFAULT_ALPHA: usize = 3;
/// Default mDNS service name.
pub const DEFAULT_SERVICE: &str = "iroh-dht-values";

/// A content-addressed value store node on an iroh DHT.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Config {
    /// Handle shown to chat peers
    #[arg(long)]
    pub name: Option<String>,

    /// Address token of a peer to bootstrap from (repeatable)
    #[arg(long = "peer", value_name = "ADDR")]
    pub peers: Vec<String>,

    /// mDNS service name used for local discovery
    #[arg(long, default_value = DEFAULT_SERVICE)]
    pub service: String,

    /// Disable mDNS local discovery
    #[arg(long)]
    pub no_mdns: bool,

    /// Bucket size and replication factor
    #[arg(short, default_value_t = DEFAULT_K)]
    pub k: usize,

    /// Parallel requests per lookup round
    #[arg(long, default_value_t = DEFAULT_ALPHA)]
    pub alpha: usize,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    /// The log filter: `RUST_LOG` directives on top of `info`, or `debug` with `-v`.
    pub fn env_filter(&self) -> EnvFilter {
        let level = if self.verbose {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        };
        EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy()
    }
}

/// Install the global tracing subscriber.
pub fn init_tracing(config: &Config) {
    tracing_subscriber::fmt()
        .with_env_filter(config.env_filter())
        .with_target(false)
        .init();
}
