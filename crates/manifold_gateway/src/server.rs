//! The meta-toolset the gateway presents upstream.
//!
//! Six fixed tools fan out to the registry: search the aggregated
//! catalog, execute a downstream tool, manage peer lifecycles, run the
//! OAuth flow, inspect metadata, and hand scripts to the scripting
//! collaborator.

use crate::types::{
    AuthAction, AuthRequest, ExecuteToolRequest, ManageAction, ManageRequest, MetadataRequest,
    RunSlopRequest, SearchToolsRequest, TokenSummary,
};
use manifold_auth::{OAuthFlow, TokenRecord};
use manifold_core::{ConfigScope, PeerConfig, ScriptRunner, TransportKind};
use manifold_registry::Registry;
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{
    CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo,
};
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Clone)]
pub struct MetaGateway {
    registry: Arc<Registry>,
    auth: Arc<OAuthFlow>,
    script: Option<Arc<dyn ScriptRunner>>,
    tool_router: ToolRouter<Self>,
}

fn ok_json<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("{{\"error\":\"serialization failed: {e}\"}}"));
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

fn fail(text: impl Into<String>) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::error(vec![Content::text(text.into())]))
}

#[tool_router]
impl MetaGateway {
    pub fn new(
        registry: Arc<Registry>,
        auth: Arc<OAuthFlow>,
        script: Option<Arc<dyn ScriptRunner>>,
    ) -> Self {
        Self {
            registry,
            auth,
            script,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Search tools across all connected MCP servers with fuzzy ranking. \
                       Empty query lists everything; results are paginated."
    )]
    async fn search_tools(
        &self,
        Parameters(req): Parameters<SearchToolsRequest>,
    ) -> Result<CallToolResult, McpError> {
        let page = self
            .registry
            .search(
                req.query.as_deref().unwrap_or(""),
                req.mcp_name.as_deref(),
                req.limit.unwrap_or(0),
                req.offset.unwrap_or(0),
            )
            .await;
        ok_json(&page)
    }

    #[tool(
        description = "Execute a tool on a connected MCP server and return its content verbatim."
    )]
    async fn execute_tool(
        &self,
        Parameters(req): Parameters<ExecuteToolRequest>,
    ) -> Result<CallToolResult, McpError> {
        match self
            .registry
            .execute(&req.mcp_name, &req.tool_name, req.parameters, None)
            .await
        {
            Ok(outcome) => {
                if outcome.text.is_empty() {
                    ok_json(&outcome.content)
                } else {
                    Ok(CallToolResult::success(vec![Content::text(outcome.text)]))
                }
            }
            Err(e) => fail(e.to_string()),
        }
    }

    #[tool(
        description = "Manage MCP server connections: register, unregister, reconnect, \
                       list, status, health_check."
    )]
    async fn manage_mcps(
        &self,
        Parameters(req): Parameters<ManageRequest>,
    ) -> Result<CallToolResult, McpError> {
        match req.action {
            ManageAction::Register => self.register(req).await,
            ManageAction::Unregister => {
                let Some(name) = req.name else {
                    return fail("unregister requires a name");
                };
                match self.registry.remove(&name).await {
                    Ok(()) => ok_json(&json!({
                        "message": format!("MCP server '{name}' unregistered")
                    })),
                    Err(e) => fail(e.to_string()),
                }
            }
            ManageAction::Reconnect => {
                let Some(name) = req.name else {
                    return fail("reconnect requires a name");
                };
                match self.registry.reconnect(&name).await {
                    Ok(count) => ok_json(&json!({
                        "message": format!("MCP server '{name}' reconnected ({count} tools)")
                    })),
                    Err(e) => fail(e.to_string()),
                }
            }
            ManageAction::List => {
                let statuses = self.registry.status().await;
                ok_json(&json!({ "mcps": statuses }))
            }
            ManageAction::Status => match req.name {
                Some(name) => match self.registry.status_of(&name).await {
                    Ok(status) => ok_json(&json!({ "status": status })),
                    Err(e) => fail(e.to_string()),
                },
                None => {
                    let statuses = self.registry.status().await;
                    ok_json(&json!({ "status": statuses }))
                }
            },
            ManageAction::HealthCheck => {
                let checks = self.registry.health_check_now().await;
                let rendered: Vec<serde_json::Value> = checks
                    .into_iter()
                    .map(|(name, health)| json!({ "name": name, "health": health }))
                    .collect();
                ok_json(&json!({ "health_checks": rendered }))
            }
        }
    }

    #[tool(
        description = "Authenticate against an MCP server that requires OAuth: \
                       login, logout, status, list."
    )]
    async fn auth_mcp(
        &self,
        Parameters(req): Parameters<AuthRequest>,
    ) -> Result<CallToolResult, McpError> {
        match req.action {
            AuthAction::Login => {
                let Some(name) = req.name else {
                    return fail("login requires a name");
                };
                let config = match self.registry.config_of(&name).await {
                    Ok(c) => c,
                    Err(e) => return fail(e.to_string()),
                };
                if config.url.trim().is_empty() {
                    return fail(format!(
                        "MCP server '{name}' has no URL; only HTTP servers support OAuth"
                    ));
                }
                if let Err(e) = self.auth.login(&name, &config.url).await {
                    return fail(format!("login failed: {e}"));
                }
                match self.registry.reconnect(&name).await {
                    Ok(count) => ok_json(&json!({
                        "message": format!(
                            "authenticated '{name}' and reconnected ({count} tools)"
                        )
                    })),
                    Err(e) => fail(format!(
                        "authenticated '{name}' but reconnect failed: {e}"
                    )),
                }
            }
            AuthAction::Logout => {
                let Some(name) = req.name else {
                    return fail("logout requires a name");
                };
                match self.auth.store().delete(&name) {
                    Ok(true) => ok_json(&json!({
                        "message": format!("credentials for '{name}' removed")
                    })),
                    Ok(false) => fail(format!("no stored credentials for '{name}'")),
                    Err(e) => fail(e.to_string()),
                }
            }
            AuthAction::Status => {
                let Some(name) = req.name else {
                    return fail("status requires a name");
                };
                match self.auth.store().get(&name) {
                    Ok(Some(record)) => ok_json(&json!({ "status": summarize(&record) })),
                    Ok(None) => fail(format!("no stored credentials for '{name}'")),
                    Err(e) => fail(e.to_string()),
                }
            }
            AuthAction::List => match self.auth.store().list() {
                Ok(records) => {
                    let tokens: Vec<TokenSummary> = records.iter().map(summarize).collect();
                    ok_json(&json!({ "tokens": tokens }))
                }
                Err(e) => fail(e.to_string()),
            },
        }
    }

    #[tool(
        description = "Inspect tools, prompts and resources of connected MCP servers. \
                       Schemas are included when verbose or when filtered to one tool."
    )]
    async fn get_metadata(
        &self,
        Parameters(req): Parameters<MetadataRequest>,
    ) -> Result<CallToolResult, McpError> {
        let mut entries = match self
            .registry
            .metadata(req.mcp_name.as_deref(), req.tool_name.as_deref())
            .await
        {
            Ok(entries) => entries,
            Err(e) => return fail(e.to_string()),
        };

        let tool_rows = entries.iter().filter(|e| e.kind == "tool").count();
        let verbose = req.verbose.unwrap_or(false)
            || (req.mcp_name.is_some() && req.tool_name.is_some() && tool_rows == 1);
        if !verbose {
            for entry in &mut entries {
                entry.input_schema = None;
            }
        }

        let total = entries.len();
        ok_json(&json!({ "metadata": entries, "total": total }))
    }

    #[tool(
        description = "Run a script that can call MCP tools programmatically. \
                       Provide inline source or a file path."
    )]
    async fn run_slop(
        &self,
        Parameters(req): Parameters<RunSlopRequest>,
    ) -> Result<CallToolResult, McpError> {
        let Some(runner) = &self.script else {
            return fail("no script runtime is installed in this gateway");
        };
        let source = match (req.script, req.file_path) {
            (Some(source), _) => source,
            (None, Some(path)) => match tokio::fs::read_to_string(&path).await {
                Ok(s) => s,
                Err(e) => return fail(format!("cannot read script file '{path}': {e}")),
            },
            (None, None) => return fail("provide either script or file_path"),
        };
        match runner.run(&source).await {
            Ok(output) => ok_json(&output),
            Err(e) => fail(format!("script failed: {e:#}")),
        }
    }

    async fn register(&self, req: ManageRequest) -> Result<CallToolResult, McpError> {
        let Some(name) = req.name else {
            return fail("register requires a name");
        };
        let transport = match req.transport.as_deref() {
            None | Some("stdio") | Some("subprocess") => TransportKind::Stdio,
            Some("sse") => TransportKind::Sse,
            Some("http") | Some("streamable-http") => TransportKind::Http,
            Some(other) => {
                return fail(format!(
                    "unknown transport '{other}'; expected stdio, sse or http"
                ))
            }
        };
        let config = PeerConfig {
            name: name.clone(),
            transport,
            command: req.command.unwrap_or_default(),
            args: req.args.unwrap_or_default(),
            env: req.env.unwrap_or_default(),
            url: req.url.unwrap_or_default(),
            headers: req.headers.unwrap_or_default(),
            connect_timeout: req.connect_timeout,
            max_reconnect_attempts: req.max_retries.unwrap_or(0),
            health_check_interval: req.health_check_interval.unwrap_or_default(),
            scope: ConfigScope::Runtime,
            dynamic: req.dynamic.unwrap_or(false),
        };
        if let Err(e) = config.validate() {
            return fail(e.to_string());
        }
        match self.registry.connect(config).await {
            Ok(count) => ok_json(&json!({
                "message": format!("MCP server '{name}' registered ({count} tools)")
            })),
            Err(e) => fail(e.to_string()),
        }
    }
}

fn summarize(record: &TokenRecord) -> TokenSummary {
    let status = if record.expires_at == 0 {
        "no expiry".to_string()
    } else if !record.is_expired() {
        "valid".to_string()
    } else if record.refresh_token.is_some() {
        "expired (refresh available)".to_string()
    } else {
        "expired".to_string()
    };
    TokenSummary {
        name: record.server_name.clone(),
        server_url: record.server_url.clone(),
        status,
        expires_at: chrono::DateTime::from_timestamp(record.expires_at, 0)
            .filter(|_| record.expires_at != 0)
            .map(|t| t.to_rfc3339()),
    }
}

#[tool_handler]
impl ServerHandler for MetaGateway {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "manifold".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            instructions: Some(
                "Aggregating gateway over multiple MCP servers. Use search_tools to find \
                 a tool, execute_tool to call it, manage_mcps to control connections, \
                 auth_mcp for servers that require OAuth, and get_metadata for schemas."
                    .into(),
            ),
        }
    }
}
