// src/mcp/mod.rs
// MCP Server implementation - tool dispatch onto the consistency engine

pub mod handler;

use crate::db::MemoryRecord;
use crate::engine::ConsistencyEngine;
use crate::error::Result;
use crate::scope::FilterSpec;
use futures::TryStreamExt;
use rmcp::{
    handler::server::wrapper::Parameters, handler::server::router::tool::ToolRouter, schemars,
    tool, tool_router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default result count for search when the caller does not pass k.
const DEFAULT_SEARCH_K: usize = 10;

/// MCP server state: one instance per process, shared by every session.
///
/// All registries (tool table, adapter instances) live here, explicitly
/// constructed at startup and passed to the transport. No ambient globals.
#[derive(Clone)]
pub struct EngramServer {
    pub engine: Arc<ConsistencyEngine>,
    /// Server-injected scope dimensions merged into every call. Caller
    /// attempts to override these fail with a scope violation.
    pub server_scope: FilterSpec,
    /// Collision-avoidance prefix applied to every advertised tool name.
    pub tool_prefix: String,
    tool_router: ToolRouter<Self>,
}

impl EngramServer {
    pub fn new(engine: Arc<ConsistencyEngine>, server_scope: FilterSpec, tool_prefix: String) -> Self {
        Self {
            engine,
            server_scope,
            tool_prefix,
            tool_router: Self::tool_router(),
        }
    }

    /// Bind a caller-supplied partial scope to this server's scope. The
    /// dispatch layer never trusts a caller scope without this merge.
    fn merge_scope(&self, caller: Option<FilterSpec>) -> Result<FilterSpec> {
        FilterSpec::merge(&self.server_scope, &caller.unwrap_or_default())
    }
}

/// Advertised name for an internal tool.
pub(crate) fn prefixed_name(prefix: &str, name: &str) -> String {
    format!("{prefix}_{name}")
}

/// Reverse of `prefixed_name`: recover the internal tool name, or None if
/// the call does not belong to this provider.
pub(crate) fn strip_tool_prefix<'a>(prefix: &str, name: &'a str) -> Option<&'a str> {
    name.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('_'))
        .filter(|rest| !rest.is_empty())
}

// Request types for tools with parameters

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct AddMemoryRequest {
    /// The text to remember
    pub text: String,
    /// Additional scope dimensions, e.g. {"agent": "coder"}
    pub scope: Option<FilterSpec>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SearchMemoryRequest {
    /// Natural-language query
    pub query: String,
    /// Maximum number of results (default 10)
    pub k: Option<usize>,
    pub scope: Option<FilterSpec>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ListMemoriesRequest {
    pub scope: Option<FilterSpec>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct GetMemoryRequest {
    /// Memory record id
    pub id: String,
    pub scope: Option<FilterSpec>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct UpdateMemoryRequest {
    /// Memory record id to replace
    pub id: String,
    /// Replacement text
    pub text: String,
    pub scope: Option<FilterSpec>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct DeleteMemoryRequest {
    /// Memory record id
    pub id: String,
    pub scope: Option<FilterSpec>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct DeleteAllMemoriesRequest {
    pub scope: Option<FilterSpec>,
}

// Response payloads, serialized as JSON text content

#[derive(Debug, Serialize)]
struct MemoryView {
    id: String,
    text: String,
    created_at: String,
}

impl From<MemoryRecord> for MemoryView {
    fn from(record: MemoryRecord) -> Self {
        Self {
            id: record.id.to_string(),
            text: record.text,
            created_at: record.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SearchView {
    id: String,
    text: String,
    score: f32,
}

fn to_json<T: Serialize>(value: &T) -> std::result::Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| e.to_string())
}

#[tool_router]
impl EngramServer {
    #[tool(description = "Store a memory for later semantic recall.")]
    async fn add_memory(
        &self,
        Parameters(req): Parameters<AddMemoryRequest>,
    ) -> std::result::Result<String, String> {
        let scope = self.merge_scope(req.scope)?;
        let record = self.engine.add_memory(&req.text, &scope).await?;
        to_json(&serde_json::json!({ "id": record.id, "text": record.text }))
    }

    #[tool(description = "Search memories by semantic similarity.")]
    async fn search_memory(
        &self,
        Parameters(req): Parameters<SearchMemoryRequest>,
    ) -> std::result::Result<String, String> {
        let scope = self.merge_scope(req.scope)?;
        let k = req.k.unwrap_or(DEFAULT_SEARCH_K);
        let hits = self.engine.search_memory(&req.query, &scope, k).await?;
        let views: Vec<SearchView> = hits
            .into_iter()
            .map(|h| SearchView {
                id: h.id.to_string(),
                text: h.text,
                score: h.score,
            })
            .collect();
        to_json(&views)
    }

    #[tool(description = "List all memories in scope, most recent first.")]
    async fn list_memories(
        &self,
        Parameters(req): Parameters<ListMemoriesRequest>,
    ) -> std::result::Result<String, String> {
        let scope = self.merge_scope(req.scope)?;
        let records: Vec<MemoryRecord> =
            self.engine.list_memories(scope).try_collect().await?;
        let views: Vec<MemoryView> = records.into_iter().map(Into::into).collect();
        to_json(&views)
    }

    #[tool(description = "Fetch one memory by id.")]
    async fn get_memory(
        &self,
        Parameters(req): Parameters<GetMemoryRequest>,
    ) -> std::result::Result<String, String> {
        let scope = self.merge_scope(req.scope)?;
        let record = self.engine.get_memory(&req.id.as_str().into(), &scope).await?;
        to_json(&MemoryView::from(record))
    }

    #[tool(description = "Replace a memory's text, keeping its history.")]
    async fn update_memory(
        &self,
        Parameters(req): Parameters<UpdateMemoryRequest>,
    ) -> std::result::Result<String, String> {
        let scope = self.merge_scope(req.scope)?;
        let record = self
            .engine
            .update_memory(&req.id.as_str().into(), &req.text, &scope)
            .await?;
        to_json(&serde_json::json!({ "id": record.id, "text": record.text }))
    }

    #[tool(description = "Delete a memory by id. Idempotent.")]
    async fn delete_memory(
        &self,
        Parameters(req): Parameters<DeleteMemoryRequest>,
    ) -> std::result::Result<String, String> {
        let scope = self.merge_scope(req.scope)?;
        let transitioned = self
            .engine
            .delete_memory(&req.id.as_str().into(), &scope)
            .await?;
        Ok(if transitioned {
            format!("Deleted memory {}", req.id)
        } else {
            format!("Memory {} was already deleted", req.id)
        })
    }

    #[tool(description = "Delete every memory in the current scope. Returns the count deleted.")]
    async fn delete_all_memories(
        &self,
        Parameters(req): Parameters<DeleteAllMemoriesRequest>,
    ) -> std::result::Result<String, String> {
        let scope = self.merge_scope(req.scope)?;
        let deleted = self.engine.delete_all(&scope).await?;
        to_json(&serde_json::json!({ "deleted": deleted }))
    }
}
