//! Continuum MCP Server
//!
//! Persistent memory for AI agents over the Model Context Protocol:
//! session handoffs with progressive consolidation, hybrid recall, a typed
//! memory graph, capsules, and agent feedback - all tenant-isolated behind
//! bearer-token auth.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use continuum_core::embeddings::HashingEmbedder;
use continuum_core::{spawn_embed_worker, Engine, EngineConfig, Store};
use continuum_mcp::protocol::http::{HttpTransport, HttpTransportConfig};
use continuum_mcp::scheduler::ConsolidationScheduler;
use continuum_mcp::{McpDispatcher, ServerConfig, StaticTokenProvider};

#[derive(Parser)]
#[command(
    name = "continuum-mcp",
    version,
    about = "Persistent memory MCP server for AI agents"
)]
struct Cli {
    /// Custom data directory for the SQLite store
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Bind host (overrides CONTINUUM_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides CONTINUUM_PORT)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr; stdout stays clean for any piping
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let mut config = ServerConfig::from_env();
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    info!(
        "Continuum MCP server v{} starting (env: {})",
        continuum_core::VERSION,
        config.env
    );

    let db_path = cli.data_dir.map(|dir| dir.join("continuum.db"));
    let store = match Store::open(db_path, config.embedding_dimension) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("failed to initialize storage: {e}");
            std::process::exit(1);
        }
    };
    info!(
        dimension = config.embedding_dimension,
        "storage initialized"
    );

    let embedder = Arc::new(HashingEmbedder::new(config.embedding_dimension));
    let mut engine_config = EngineConfig::default();
    engine_config.consolidation.stale_job_timeout = config.stale_job_timeout;
    let engine = Arc::new(Engine::new(store.clone(), embedder.clone(), None, engine_config));

    // Embedding side effects run off the write path, on a bounded queue
    let queue = spawn_embed_worker(store, embedder, config.embed_queue_depth);
    engine.ops.attach_embed_queue(queue);

    // Identity: the dev token authenticates to tenant `default` outside
    // production. Production deployments plug in a real provider.
    let mut identity = StaticTokenProvider::new();
    if config.is_production() {
        warn!("production mode: dev token disabled; configure a real identity provider");
    } else {
        identity = identity.with_dev_token(config.dev_token.clone());
        info!("dev token enabled for tenant 'default'");
    }
    let identity = Arc::new(identity);

    let dispatcher = Arc::new(McpDispatcher::new(
        engine.clone(),
        identity,
        config.request_deadline,
    ));

    match ConsolidationScheduler::from_config(engine.clone(), &config) {
        Ok(scheduler) => {
            scheduler.spawn();
            info!("consolidation scheduler started");
        }
        Err(e) => {
            error!("invalid consolidation schedule: {e}");
            std::process::exit(1);
        }
    }

    let transport = HttpTransport::new(HttpTransportConfig {
        host: config.host.clone(),
        port: config.port,
    });
    if let Err(e) = transport.run(dispatcher).await {
        error!("server error: {e}");
        std::process::exit(1);
    }

    info!("Continuum MCP server shutting down");
}
