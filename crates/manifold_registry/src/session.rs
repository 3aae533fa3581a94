//! One live protocol conversation with a downstream peer.
//!
//! A session owns the transport, performs the handshake announcing our
//! implementation identity, snapshots the peer's tool catalog, and routes
//! tool calls. Sessions are single-writer at the protocol level; callers
//! serialize access per peer (the registry does this with the peer's own
//! mutex, not the global one).

use manifold_core::{PeerConfig, TransportKind};
use rmcp::model::{
    CallToolRequestParams, ClientCapabilities, ClientInfo, Implementation, RawContent,
};
use rmcp::service::{RoleClient, RunningService, ServiceExt};
use rmcp::transport::sse_client::{SseClientConfig, SseClientTransport};
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::{StreamableHttpClientTransport, TokioChildProcess};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::process::Command;

/// Deadline for health pings.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("{0}")]
    Config(String),

    #[error("failed to spawn '{command}': {reason}")]
    Spawn { command: String, reason: String },

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("authorization required: {0}")]
    AuthRequired(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Rpc(String),
}

impl SessionError {
    /// Authentication-required failures must not be retried; everything
    /// else connect-related is fair game for the reconnect supervisor.
    pub fn is_auth_required(&self) -> bool {
        matches!(self, SessionError::AuthRequired(_))
    }
}

/// Does this error text carry an authorization-required signal?
fn auth_signal(text: &str) -> bool {
    let t = text.to_lowercase();
    t.contains("401")
        || t.contains("unauthorized")
        || t.contains("authorization required")
        || t.contains("invalid_token")
}

fn classify_handshake<E: std::fmt::Display>(err: E) -> SessionError {
    let text = err.to_string();
    if auth_signal(&text) {
        SessionError::AuthRequired(text)
    } else {
        SessionError::Handshake(text)
    }
}

/// A tool advertised by a peer, snapshotted at list time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredTool {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptInfo {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceInfo {
    pub uri: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceTemplateInfo {
    pub uri_template: String,
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Result of one forwarded tool call.
#[derive(Debug, Clone)]
pub struct ToolCallOutcome {
    /// The peer's content blocks, verbatim.
    pub content: serde_json::Value,
    /// Concatenated text blocks, used for error interpretation.
    pub text: String,
    pub is_error: bool,
}

pub struct PeerSession {
    name: String,
    service: RunningService<RoleClient, ClientInfo>,
    tools: Vec<DiscoveredTool>,
}

impl PeerSession {
    /// Open the transport, perform the handshake and snapshot the tool
    /// catalog, all bounded by `connect_timeout`. An empty tool list is a
    /// successful connect; a server with zero tools is a legal peer.
    pub async fn establish(
        config: &PeerConfig,
        connect_timeout: Duration,
        bearer: Option<String>,
    ) -> Result<Self, SessionError> {
        config
            .validate()
            .map_err(|e| SessionError::Config(e.to_string()))?;

        let service = match config.transport {
            TransportKind::Stdio => Self::open_stdio(config, connect_timeout).await?,
            TransportKind::Sse => Self::open_sse(config, connect_timeout, bearer).await?,
            TransportKind::Http => Self::open_http(config, connect_timeout, bearer).await?,
        };

        let listed =
            tokio::time::timeout(connect_timeout, service.peer().list_all_tools()).await;
        let tools = match listed {
            Ok(Ok(tools)) => tools,
            Ok(Err(e)) => {
                // Reap the transport (and any child process) before
                // reporting the failed handshake.
                let _ = service.cancel().await;
                return Err(classify_handshake(e));
            }
            Err(_) => {
                let _ = service.cancel().await;
                return Err(SessionError::Timeout(connect_timeout));
            }
        };

        let tools: Vec<DiscoveredTool> = tools
            .iter()
            .map(|t| DiscoveredTool {
                name: t.name.to_string(),
                description: t
                    .description
                    .as_ref()
                    .map(|d| d.to_string())
                    .unwrap_or_default(),
                input_schema: serde_json::to_value(&t.input_schema)
                    .unwrap_or_else(|_| serde_json::json!({"type": "object"})),
            })
            .collect();

        tracing::debug!(
            "MCP '{}': session established, {} tool(s)",
            config.name,
            tools.len()
        );

        Ok(Self {
            name: config.name.clone(),
            service,
            tools,
        })
    }

    fn client_info() -> ClientInfo {
        ClientInfo {
            meta: None,
            protocol_version: Default::default(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: "manifold".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
        }
    }

    async fn open_stdio(
        config: &PeerConfig,
        connect_timeout: Duration,
    ) -> Result<RunningService<RoleClient, ClientInfo>, SessionError> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);
        for (k, v) in &config.env {
            cmd.env(k, v);
        }

        let transport = TokioChildProcess::new(cmd).map_err(|e| SessionError::Spawn {
            command: config.command.clone(),
            reason: e.to_string(),
        })?;

        tokio::time::timeout(connect_timeout, Self::client_info().serve(transport))
            .await
            .map_err(|_| SessionError::Timeout(connect_timeout))?
            .map_err(classify_handshake)
    }

    async fn open_sse(
        config: &PeerConfig,
        connect_timeout: Duration,
        bearer: Option<String>,
    ) -> Result<RunningService<RoleClient, ClientInfo>, SessionError> {
        let client = Self::http_client(config, connect_timeout, bearer)?;

        let transport = tokio::time::timeout(
            connect_timeout,
            SseClientTransport::start_with_client(
                client,
                SseClientConfig {
                    sse_endpoint: config.url.clone().into(),
                    ..Default::default()
                },
            ),
        )
        .await
        .map_err(|_| SessionError::Timeout(connect_timeout))?
        .map_err(classify_handshake)?;

        tokio::time::timeout(connect_timeout, Self::client_info().serve(transport))
            .await
            .map_err(|_| SessionError::Timeout(connect_timeout))?
            .map_err(classify_handshake)
    }

    async fn open_http(
        config: &PeerConfig,
        connect_timeout: Duration,
        bearer: Option<String>,
    ) -> Result<RunningService<RoleClient, ClientInfo>, SessionError> {
        let client = Self::http_client(config, connect_timeout, bearer)?;

        let transport = StreamableHttpClientTransport::with_client(
            client,
            StreamableHttpClientTransportConfig::with_uri(config.url.as_str()),
        );

        tokio::time::timeout(connect_timeout, Self::client_info().serve(transport))
            .await
            .map_err(|_| SessionError::Timeout(connect_timeout))?
            .map_err(classify_handshake)
    }

    /// Build the reqwest client used by the HTTP transports. Only the
    /// connect phase gets a timeout: the SSE stream is long-lived and must
    /// not be killed by a global deadline.
    fn http_client(
        config: &PeerConfig,
        connect_timeout: Duration,
        bearer: Option<String>,
    ) -> Result<reqwest::Client, SessionError> {
        let mut headers = reqwest::header::HeaderMap::new();
        for (key, value) in &config.headers {
            match (
                reqwest::header::HeaderName::from_bytes(key.as_bytes()),
                reqwest::header::HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(val)) => {
                    headers.insert(name, val);
                }
                _ => {
                    tracing::warn!("MCP '{}': skipping invalid header: {}", config.name, key);
                }
            }
        }
        if let Some(token) = bearer {
            if let Ok(val) =
                reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token))
            {
                headers.insert(reqwest::header::AUTHORIZATION, val);
            }
        }

        reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| SessionError::Config(format!("failed to build HTTP client: {e}")))
    }

    pub fn tools(&self) -> &[DiscoveredTool] {
        &self.tools
    }

    /// Forward one tool call. The peer's content comes back verbatim; its
    /// is-error flag is surfaced, not turned into a transport error.
    pub async fn call(
        &self,
        tool: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
        deadline: Option<Duration>,
    ) -> Result<ToolCallOutcome, SessionError> {
        let params = CallToolRequestParams {
            meta: None,
            name: tool.to_string().into(),
            arguments,
            task: None,
        };

        let fut = self.service.peer().call_tool(params);
        let result = match deadline {
            Some(d) => tokio::time::timeout(d, fut)
                .await
                .map_err(|_| SessionError::Timeout(d))?,
            None => fut.await,
        }
        .map_err(|e| SessionError::Rpc(e.to_string()))?;

        let is_error = result.is_error.unwrap_or(false);
        let text: String = result
            .content
            .iter()
            .filter_map(|c| match &c.raw {
                RawContent::Text(t) => Some(t.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        Ok(ToolCallOutcome {
            content: serde_json::to_value(&result.content)
                .unwrap_or(serde_json::Value::Null),
            text,
            is_error,
        })
    }

    /// Lightweight liveness probe: an empty tools/list bounded by the
    /// health deadline.
    pub async fn ping(&self) -> Result<(), SessionError> {
        tokio::time::timeout(
            HEALTH_CHECK_TIMEOUT,
            self.service.peer().list_tools(Default::default()),
        )
        .await
        .map_err(|_| SessionError::Timeout(HEALTH_CHECK_TIMEOUT))?
        .map_err(|e| SessionError::Rpc(e.to_string()))?;
        Ok(())
    }

    pub async fn list_prompts(&self) -> Result<Vec<PromptInfo>, SessionError> {
        let result = self
            .service
            .peer()
            .list_prompts(Default::default())
            .await
            .map_err(|e| SessionError::Rpc(e.to_string()))?;
        Ok(result
            .prompts
            .into_iter()
            .map(|p| PromptInfo {
                name: p.name.to_string(),
                description: p.description.map(|d| d.to_string()),
            })
            .collect())
    }

    pub async fn list_resources(&self) -> Result<Vec<ResourceInfo>, SessionError> {
        let result = self
            .service
            .peer()
            .list_resources(Default::default())
            .await
            .map_err(|e| SessionError::Rpc(e.to_string()))?;
        Ok(result
            .resources
            .into_iter()
            .map(|r| ResourceInfo {
                uri: r.uri.to_string(),
                name: Some(r.name.to_string()),
                description: r.description.clone().map(|d| d.to_string()),
                mime_type: r.mime_type.clone().map(|m| m.to_string()),
            })
            .collect())
    }

    pub async fn list_resource_templates(
        &self,
    ) -> Result<Vec<ResourceTemplateInfo>, SessionError> {
        let result = self
            .service
            .peer()
            .list_resource_templates(Default::default())
            .await
            .map_err(|e| SessionError::Rpc(e.to_string()))?;
        Ok(result
            .resource_templates
            .into_iter()
            .map(|t| ResourceTemplateInfo {
                uri_template: t.uri_template.to_string(),
                name: Some(t.name.to_string()),
                description: t.description.clone().map(|d| d.to_string()),
            })
            .collect())
    }

    /// Cancel the service, which closes the transport and reaps a child
    /// process peer.
    pub async fn close(self) {
        if let Err(e) = self.service.cancel().await {
            tracing::warn!("MCP '{}': error closing session: {:?}", self.name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_signals() {
        assert!(auth_signal("HTTP status 401 Unauthorized"));
        assert!(auth_signal("authorization required to access this server"));
        assert!(auth_signal("invalid_token"));
        assert!(!auth_signal("connection refused"));
    }

    #[test]
    fn classify_routes_auth_separately() {
        let err = classify_handshake("server returned 401");
        assert!(err.is_auth_required());
        let err = classify_handshake("broken pipe");
        assert!(!err.is_auth_required());
        assert!(matches!(err, SessionError::Handshake(_)));
    }
}
