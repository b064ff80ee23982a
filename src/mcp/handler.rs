// src/mcp/handler.rs
// MCP ServerHandler implementation - protocol lifecycle methods
//
// The collision-avoidance prefix is applied here: advertised tool names are
// prefixed in list_tools and stripped again in call_tool, so a host process
// multiplexing several tool providers over one transport never sees a clash.

use super::{EngramServer, prefixed_name, strip_tool_prefix};
use rmcp::{
    ErrorData, ServerHandler,
    handler::server::tool::ToolCallContext,
    model::{
        CallToolRequestParams, CallToolResult, ListToolsResult, PaginatedRequestParams,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
};
use std::borrow::Cow;

impl ServerHandler for EngramServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: rmcp::model::Implementation {
                name: "engram".into(),
                title: Some("Engram - dual-backend semantic memory".into()),
                version: env!("CARGO_PKG_VERSION").into(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Engram stores memories in a vector index and an entity graph, \
                 scoped per user/agent/session. Use add_memory to remember, \
                 search_memory to recall."
                    .into(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, ErrorData>> + Send + '_ {
        let tools = self
            .tool_router
            .list_all()
            .into_iter()
            .map(|mut tool| {
                tool.name = Cow::Owned(prefixed_name(&self.tool_prefix, &tool.name));
                tool
            })
            .collect();
        std::future::ready(Ok(ListToolsResult {
            tools,
            next_cursor: None,
            meta: None,
        }))
    }

    #[allow(clippy::manual_async_fn)]
    fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, ErrorData>> + Send + '_ {
        async move {
            let inner = strip_tool_prefix(&self.tool_prefix, &request.name)
                .filter(|name| {
                    self.tool_router
                        .list_all()
                        .iter()
                        .any(|t| t.name == *name)
                })
                .map(str::to_string);

            let Some(inner) = inner else {
                let err = crate::error::EngramError::UnknownOperation(request.name.to_string());
                return Err(ErrorData::invalid_params(err.to_user_string(), None));
            };

            let mut request = request;
            request.name = Cow::Owned(inner);

            let ctx = ToolCallContext::new(self, request, context);
            self.tool_router.call(ctx).await
        }
    }
}
