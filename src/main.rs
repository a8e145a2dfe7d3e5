//! Vault MCP — knowledge-base tool server over HTTP
//!
//! A single-process server that exposes a vault of interlinked Markdown
//! notes to AI agents over an MCP-style JSON-RPC 2.0 protocol. Each client
//! gets a private, stateful session keyed by the `Mcp-Session-Id` header;
//! session, channel, and worker lifecycles are managed by the request
//! router in `vault-server`.
//!
//! Usage:
//!   vault-mcp --vault ~/notes                    # Default port 7070
//!   vault-mcp --vault ~/notes --port 8080        # Custom port
//!   vault-mcp --vault ~/notes --max-sessions 1   # Single-session mode

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vault_server::{
    HandlerPool, RequestRouter, ServerIdentity, SessionConfig, SessionRegistry, WorkerConfig,
    WorkerPool,
};
use vault_tools::{ToolRegistry, VaultStore};
use vault_transport::{TransportConfig, TransportRegistry, TransportServer};

#[derive(Parser, Debug)]
#[command(name = "vault-mcp", about = "Vault MCP Server — knowledge-base tools over HTTP")]
struct Cli {
    /// Vault root directory (the notes exposed to clients)
    #[arg(long)]
    vault: PathBuf,

    /// Port to listen on (0 for OS-assigned)
    #[arg(long, default_value = "7070")]
    port: u16,

    /// Hostname to bind to
    #[arg(long, default_value = "127.0.0.1")]
    hostname: String,

    /// Maximum live sessions before least-recently-active eviction
    #[arg(long, default_value = "64")]
    max_sessions: usize,

    /// Seconds of inactivity before a session is reclaimed
    #[arg(long, default_value = "300")]
    idle_timeout_secs: u64,

    /// Seconds between idle sweeps
    #[arg(long, default_value = "60")]
    sweep_interval_secs: u64,

    /// Maximum units of work executing concurrently across all sessions
    #[arg(long, default_value = "16")]
    max_workers: usize,

    /// Queued work items per session before rejection
    #[arg(long, default_value = "32")]
    worker_queue_depth: usize,

    /// Seconds before a queued work item is failed with a timeout
    #[arg(long, default_value = "30")]
    worker_timeout_secs: u64,

    /// Enable permissive CORS (for browser-based clients)
    #[arg(long)]
    enable_cors: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; RUST_LOG overrides the default level.
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let vault_root = cli
        .vault
        .canonicalize()
        .with_context(|| format!("Vault directory not found: {}", cli.vault.display()))?;
    if !vault_root.is_dir() {
        anyhow::bail!("Vault path is not a directory: {}", vault_root.display());
    }

    info!("Vault root: {}", vault_root.display());

    let session_config = SessionConfig {
        max_sessions: cli.max_sessions,
        idle_timeout: Duration::from_secs(cli.idle_timeout_secs),
        sweep_interval: Duration::from_secs(cli.sweep_interval_secs),
    };
    let worker_config = WorkerConfig {
        max_workers: cli.max_workers,
        queue_depth: cli.worker_queue_depth,
        item_timeout: Duration::from_secs(cli.worker_timeout_secs),
    };
    let sweep_interval = session_config.sweep_interval;

    // Wire the core: store → tools → pools → router. Everything is owned
    // state passed down; no globals.
    let store = Arc::new(VaultStore::new(vault_root));
    let tools = Arc::new(ToolRegistry::builtin(store));
    info!("Registered {} tools", tools.len());

    let identity = ServerIdentity::default();
    let workers = Arc::new(WorkerPool::new(worker_config));
    let handlers = HandlerPool::new(
        identity.clone(),
        tools,
        workers.clone(),
        session_config.max_sessions,
    );
    let sessions = SessionRegistry::new(session_config);
    let transports = TransportRegistry::new();
    let router = Arc::new(RequestRouter::new(
        identity, sessions, transports, handlers, workers,
    ));

    // Periodic idle sweep — reclamation is interval-driven, not per-request.
    let sweeper = {
        let router = router.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                router.sweep_idle();
            }
        })
    };

    let transport_config = TransportConfig {
        port: cli.port,
        hostname: cli.hostname.clone(),
        enable_cors: cli.enable_cors,
    };
    let mut transport = match TransportServer::start(transport_config, router.clone()).await {
        Ok(t) => t,
        Err(e) => {
            error!("Failed to start transport: {e}");
            std::process::exit(1);
        }
    };

    info!(
        "Server running at http://{}:{}/mcp — press Ctrl+C to stop",
        cli.hostname,
        transport.port()
    );

    tokio::signal::ctrl_c().await.ok();

    info!("Shutting down...");
    sweeper.abort();
    router.shutdown();
    transport.stop().await;
    info!("Server stopped");
    Ok(())
}
