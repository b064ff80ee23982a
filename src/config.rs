// src/config.rs
// Environment-based configuration

use crate::error::{EngramError, Result};
use std::path::PathBuf;

/// Default embedding dimension count (text-embedding-3-small default).
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;

/// Default tool name prefix. Deployments hosting several MCP servers set
/// ENGRAM_TOOL_PREFIX to disambiguate colliding tool names.
pub const DEFAULT_TOOL_PREFIX: &str = "engram";

/// Server configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct EngramConfig {
    /// SQLite database file. None selects an in-memory database.
    pub database_path: Option<PathBuf>,
    /// Prefix prepended to every advertised tool name, e.g. `engram_add_memory`.
    pub tool_prefix: String,
    /// Dimensions injected into every session's scope, e.g. the server
    /// operator pinning `user`.
    pub server_scope: crate::FilterSpec,
    pub openai_api_key: Option<String>,
    pub embedding_dimensions: usize,
}

impl EngramConfig {
    /// Load configuration from the environment.
    ///
    /// - ENGRAM_DB_PATH: database file (default ~/.engram/engram.db;
    ///   the literal `:memory:` selects in-memory)
    /// - ENGRAM_TOOL_PREFIX: tool name prefix (default "engram")
    /// - ENGRAM_SCOPE: JSON object of server-injected scope dimensions
    /// - OPENAI_API_KEY: enables OpenAI embeddings
    /// - ENGRAM_EMBEDDING_DIMENSIONS: embedding width (default 1536)
    pub fn from_env() -> Result<Self> {
        let database_path = match std::env::var("ENGRAM_DB_PATH") {
            Ok(p) if p == ":memory:" => None,
            Ok(p) => Some(PathBuf::from(p)),
            Err(_) => Some(default_db_path()?),
        };

        let tool_prefix = std::env::var("ENGRAM_TOOL_PREFIX")
            .unwrap_or_else(|_| DEFAULT_TOOL_PREFIX.to_string());
        validate_tool_prefix(&tool_prefix)?;

        let server_scope = match std::env::var("ENGRAM_SCOPE") {
            Ok(json) => crate::FilterSpec::from_json(&json)
                .map_err(|e| EngramError::Config(format!("invalid ENGRAM_SCOPE: {e}")))?,
            Err(_) => crate::FilterSpec::new(),
        };

        let openai_api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());

        let embedding_dimensions = match std::env::var("ENGRAM_EMBEDDING_DIMENSIONS") {
            Ok(v) => v.parse::<usize>().map_err(|_| {
                EngramError::Config(format!("invalid ENGRAM_EMBEDDING_DIMENSIONS: {v}"))
            })?,
            Err(_) => DEFAULT_EMBEDDING_DIMENSIONS,
        };
        if embedding_dimensions == 0 {
            return Err(EngramError::Config(
                "ENGRAM_EMBEDDING_DIMENSIONS must be positive".to_string(),
            ));
        }

        Ok(Self {
            database_path,
            tool_prefix,
            server_scope,
            openai_api_key,
            embedding_dimensions,
        })
    }
}

/// Default location for the database: ~/.engram/engram.db
fn default_db_path() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| EngramError::Config("could not determine home directory".to_string()))?;
    Ok(home.join(".engram").join("engram.db"))
}

/// Tool prefixes become part of MCP tool names, which follow identifier
/// rules.
fn validate_tool_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        return Err(EngramError::Config("tool prefix must not be empty".to_string()));
    }
    if !prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(EngramError::Config(format!(
            "tool prefix '{prefix}' contains invalid characters"
        )));
    }
    Ok(())
}
