//! wschat Server
//!
//! A standalone relay that accepts WebSocket chat sessions and routes
//! messages between them.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use wschat_core::{DeliveryFormat, DEFAULT_PORT};
use wschat_router::{DuplicateIdentityPolicy, Router, RouterConfig};

#[derive(Parser)]
#[command(name = "wschat-server")]
#[command(about = "wschat relay server")]
#[command(version)]
struct Cli {
    /// Listen address
    #[arg(short, long, default_value_t = SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)))]
    listen: SocketAddr,

    /// Config file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base path for chat sessions
    #[arg(short, long)]
    path: Option<String>,

    /// Outbound delivery format: text or json
    #[arg(short, long)]
    delivery: Option<DeliveryFormat>,

    /// Per-session outbound mailbox capacity
    #[arg(long)]
    mailbox_capacity: Option<usize>,

    /// Maximum concurrent sessions (0 = unlimited)
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Refuse a second session for an identity instead of replacing the first
    #[arg(long)]
    reject_duplicates: bool,

    /// Do not send error frames for malformed payloads
    #[arg(long)]
    no_error_frames: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Command-line values override the config file
    fn apply(&self, config: &mut RouterConfig) {
        if let Some(path) = &self.path {
            config.path = path.clone();
        }
        if let Some(delivery) = self.delivery {
            config.delivery = delivery;
        }
        if let Some(capacity) = self.mailbox_capacity {
            config.mailbox_capacity = capacity;
        }
        if let Some(max) = self.max_sessions {
            config.max_sessions = max;
        }
        if self.reject_duplicates {
            config.duplicate_identity = DuplicateIdentityPolicy::Reject;
        }
        if self.no_error_frames {
            config.error_frames = false;
        }
    }
}

fn load_config(path: &Path) -> Result<RouterConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => RouterConfig::default(),
    };
    cli.apply(&mut config);
    config.validate()?;

    tracing::info!("Starting {}", config.name);
    tracing::info!("Listening on: {}", cli.listen);
    tracing::info!(
        path = %config.path,
        delivery = %config.delivery,
        mailbox_capacity = config.mailbox_capacity,
        max_sessions = config.max_sessions,
        duplicate_identity = ?config.duplicate_identity,
        "Router configuration"
    );

    let router = Router::new(config);
    let addr = cli.listen.to_string();

    // Run until interrupted
    tokio::select! {
        result = router.serve_websocket(&addr) => result?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("Interrupted, shutting down");
            router.stop();
        }
    }

    let stats = router.stats();
    tracing::info!(
        opened = stats.opened,
        closed = stats.closed,
        delivered = stats.delivered,
        offline = stats.offline,
        evicted = stats.evicted,
        malformed = stats.malformed,
        "Router stopped"
    );

    Ok(())
}
