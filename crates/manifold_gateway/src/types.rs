//! Request and response shapes of the upstream meta-toolset.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct SearchToolsRequest {
    /// Search text; empty returns every indexed tool.
    #[serde(default)]
    pub query: Option<String>,
    /// Restrict results to one MCP server.
    #[serde(default)]
    pub mcp_name: Option<String>,
    /// Page size, default 20, capped at 100.
    #[serde(default)]
    pub limit: Option<i64>,
    /// Rows to skip; negative values are treated as 0.
    #[serde(default)]
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExecuteToolRequest {
    /// Name of the MCP server hosting the tool.
    pub mcp_name: String,
    pub tool_name: String,
    /// Arguments passed through to the tool, verbatim.
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ManageAction {
    Register,
    Unregister,
    Reconnect,
    List,
    Status,
    HealthCheck,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ManageRequest {
    pub action: ManageAction,
    /// Server name; required for register, unregister, reconnect and the
    /// single-server status.
    #[serde(default)]
    pub name: Option<String>,
    /// "stdio", "sse" or "http"; register only.
    #[serde(default)]
    pub transport: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    /// -1 disables reconnection, 0 means the default of 5.
    #[serde(default)]
    pub max_retries: Option<i32>,
    #[serde(default)]
    pub health_check_interval: Option<String>,
    /// Dynamic servers never serve a cached catalog.
    #[serde(default)]
    pub dynamic: Option<bool>,
    #[serde(default)]
    pub connect_timeout: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthAction {
    Login,
    Logout,
    Status,
    List,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AuthRequest {
    pub action: AuthAction,
    /// Server name; required for login, logout and single-server status.
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct MetadataRequest {
    #[serde(default)]
    pub mcp_name: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    /// Include input schemas even when listing many tools.
    #[serde(default)]
    pub verbose: Option<bool>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct RunSlopRequest {
    /// Script source, inline.
    #[serde(default)]
    pub script: Option<String>,
    /// Path of a script file to run instead.
    #[serde(default)]
    pub file_path: Option<String>,
}

/// Token summary safe to show upstream: no token bytes.
#[derive(Debug, Serialize)]
pub struct TokenSummary {
    pub name: String,
    pub server_url: String,
    /// "valid", "expired (refresh available)", "expired" or "no expiry".
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}
