// src/main.rs
// Engram - dual-backend semantic memory over MCP

use anyhow::Result;
use clap::{Parser, Subcommand};
use engram::config::EngramConfig;
use engram::db::{DatabasePool, RecordStore};
use engram::embeddings;
use engram::engine::ConsistencyEngine;
use engram::graph::SqliteGraphStore;
use engram::identity::UserIdentity;
use engram::mcp::EngramServer;
use engram::vector::SqliteVectorIndex;
use engram::FilterSpec;
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "engram")]
#[command(about = "Dual-backend semantic memory server (MCP)")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run as MCP server over stdio (default)
    Serve,

    /// Delete every memory matching a scope, then optionally purge history
    Wipe {
        /// Scope as JSON, e.g. '{"user":"alice"}'
        #[arg(long)]
        scope: String,
        /// Also physically remove superseded/deleted rows
        #[arg(long)]
        purge: bool,
    },
}

async fn build_engine(config: &EngramConfig) -> Result<Arc<ConsistencyEngine>> {
    let pool = match &config.database_path {
        Some(path) => DatabasePool::open(path).await?,
        None => DatabasePool::open_in_memory().await?,
    };
    let pool = Arc::new(pool);

    let records = RecordStore::new(pool.clone());
    let vector = Arc::new(SqliteVectorIndex::new(pool.clone(), config.embedding_dimensions).await?);
    let graph = Arc::new(SqliteGraphStore::new(pool));
    let embedder = embeddings::from_config(config);

    Ok(Arc::new(ConsistencyEngine::new(
        records, vector, graph, embedder,
    )))
}

/// Scope every session starts from: operator-pinned dimensions, with the
/// detected user identity filling in `user` when the operator left it open.
fn server_scope(config: &EngramConfig) -> FilterSpec {
    let mut scope = config.server_scope.clone();
    if scope.get("user").is_none() {
        if let Some(identity) = UserIdentity::detect() {
            info!(user = %identity.identity, source = ?identity.source, "detected user identity");
            scope.insert("user", identity.identity);
        }
    }
    scope
}

async fn run_mcp_server() -> Result<()> {
    let config = EngramConfig::from_env()?;
    let engine = build_engine(&config).await?;
    let scope = server_scope(&config);

    info!(scope = %scope, prefix = %config.tool_prefix, "engram server starting");
    let server = EngramServer::new(engine, scope, config.tool_prefix.clone());

    let transport = rmcp::transport::io::stdio();
    let service = rmcp::serve_server(server, transport).await?;
    service.waiting().await?;

    Ok(())
}

async fn run_wipe(scope_json: &str, purge: bool) -> Result<()> {
    let config = EngramConfig::from_env()?;
    let engine = build_engine(&config).await?;
    let scope = FilterSpec::from_json(scope_json)?;

    let deleted = engine.delete_all(&scope).await?;
    println!("Deleted {deleted} memories in scope {scope}");

    if purge {
        let purged = engine.purge(&scope).await?;
        println!("Purged {purged} history rows");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Quiet on stderr for MCP stdio; the transport owns stdout
    let log_level = match &cli.command {
        Some(Commands::Serve) | None => Level::WARN,
        Some(Commands::Wipe { .. }) => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        None | Some(Commands::Serve) => run_mcp_server().await?,
        Some(Commands::Wipe { scope, purge }) => run_wipe(&scope, purge).await?,
    }

    Ok(())
}
