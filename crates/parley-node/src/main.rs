//! Parley channel node binary.
//!
//! # Usage
//!
//! ```bash
//! # Key exchange with an impostor attempt, in-memory state
//! parley handshake
//!
//! # Replay and staleness checks with durable counters and an audit log
//! parley --sequence-db seq.redb --audit-log audit.cbor replay
//! ```

use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use parley_core::{ChannelConfig, FreshnessWindow, KeyExchangeConfig};
use parley_node::{DEFAULT_AUDIT_BUFFER, MemoryDirectory, Node, NodeConfig, SystemEnv, demo};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Parley channel node
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(about = "Authenticated key exchange and replay-protected messaging")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Oldest accepted message timestamp, in seconds
    #[arg(long, global = true, default_value = "300")]
    max_age_secs: u64,

    /// Furthest accepted future message timestamp, in seconds
    #[arg(long, global = true, default_value = "60")]
    max_future_skew_secs: u64,

    /// Lifetime of an unfinished key exchange, in seconds
    #[arg(long, global = true, default_value = "600")]
    handshake_ttl_secs: u64,

    /// How long finished key exchanges stay readable past their lifetime, in seconds
    #[arg(long, global = true, default_value = "3600")]
    terminal_retention_secs: u64,

    /// Accept initiator offers without verifying their signature
    #[arg(long, global = true)]
    skip_initiator_verification: bool,

    /// Redb file for durable sequence counters
    #[arg(long, global = true)]
    sequence_db: Option<PathBuf>,

    /// File to append CBOR audit records to
    #[arg(long, global = true)]
    audit_log: Option<PathBuf>,

    /// Audit records buffered ahead of the writer
    #[arg(long, global = true, default_value_t = DEFAULT_AUDIT_BUFFER)]
    audit_buffer: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Run the key-exchange scenario, including an impostor response
    Handshake,
    /// Run the replay and message-freshness scenario
    Replay,
}

impl Args {
    fn node_config(&self) -> NodeConfig {
        NodeConfig {
            channel: ChannelConfig {
                key_exchange: KeyExchangeConfig {
                    verify_initiator_signature: !self.skip_initiator_verification,
                    handshake_ttl: Duration::from_secs(self.handshake_ttl_secs),
                    terminal_retention: Duration::from_secs(self.terminal_retention_secs),
                },
                freshness: FreshnessWindow {
                    max_age: Duration::from_secs(self.max_age_secs),
                    max_future_skew: Duration::from_secs(self.max_future_skew_secs),
                },
            },
            sequence_db: self.sequence_db.clone(),
            audit_log: self.audit_log.clone(),
            audit_buffer: self.audit_buffer,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = args.node_config();
    if args.skip_initiator_verification {
        tracing::warn!("Initiator signatures will not be verified");
    }

    let env = SystemEnv::new();
    let directory = Arc::new(MemoryDirectory::new());
    let node = Node::start(env, Arc::clone(&directory), &config)?;

    let (stop_expiry, expiry_stopped) = tokio::sync::oneshot::channel();
    let expiry = tokio::spawn(Arc::clone(node.service()).run_expiry(Duration::from_secs(30), expiry_stopped));

    let outcome = match args.command {
        Command::Handshake => demo::handshake(&env, &directory, node.service()),
        Command::Replay => demo::replay(&env, &directory, node.service()),
    };

    let _ = stop_expiry.send(());
    expiry.await?;

    let audited = node.shutdown().await?;
    tracing::info!(audited, "Audit records written");

    outcome
}
