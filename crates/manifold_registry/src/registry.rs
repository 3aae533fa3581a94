//! The registry: single serialization point for every peer's lifecycle.
//!
//! One read-write lock guards the peer table; each peer carries its own
//! mutex serializing protocol I/O, so calls on different peers interleave
//! freely while calls on one peer are linearizable. Background actors
//! (health monitor, reconnect supervisors) receive the registry as a
//! parameter and mutate the same state under the same locks.

use crate::cache::{self, CatalogFile};
use crate::diagnose::{
    self, looks_like_schema_violation, protocol_hint, suggest, RegistryError,
};
use crate::health::{self, HealthHandle};
use crate::index::{IndexedTool, SearchPage, ToolIndex};
use crate::reconnect;
use crate::session::{
    PeerSession, PromptInfo, ResourceInfo, ResourceTemplateInfo, SessionError, ToolCallOutcome,
};
use crate::state::{HealthState, HealthStatus, Lifecycle, Peer, PeerState};
use chrono::Utc;
use manifold_core::{ConfigScope, CredentialSource, PeerConfig, TransportKind};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Read-only snapshot of one peer's state.
#[derive(Debug, Clone, Serialize)]
pub struct PeerStatus {
    pub name: String,
    pub lifecycle: Lifecycle,
    pub transport: TransportKind,
    pub scope: ConfigScope,
    pub tool_count: usize,
    pub reconnect_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub health: HealthState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<u64>,
}

/// One entry of the metadata view: a tool, prompt, resource or resource
/// template advertised by a peer.
#[derive(Debug, Clone, Serialize)]
pub struct ToolMetadata {
    pub mcp_name: String,
    /// "tool", "prompt", "resource" or "resource_template".
    pub kind: &'static str,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

pub struct Registry {
    peers: RwLock<HashMap<String, Arc<Peer>>>,
    index: ToolIndex,
    credentials: Option<Arc<dyn CredentialSource>>,
    cache_path: Option<PathBuf>,
    root: CancellationToken,
    health: std::sync::Mutex<Option<HealthHandle>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            index: ToolIndex::new(),
            credentials: None,
            cache_path: None,
            root: CancellationToken::new(),
            health: std::sync::Mutex::new(None),
        }
    }

    /// Attach a credential source consulted when opening HTTP transports.
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialSource>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Set the tool-catalog cache file location.
    pub fn with_cache_path(mut self, path: PathBuf) -> Self {
        self.cache_path = Some(path);
        self
    }

    pub(crate) fn child_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    // ------------------------------------------------------------------
    // Install / remove
    // ------------------------------------------------------------------

    /// Insert a peer in lifecycle=configured, or merge new config into an
    /// existing entry. Merging preserves lifecycle and the reconnect
    /// counter so config can be re-read without dropping connections.
    pub async fn install_configured(&self, config: PeerConfig) -> Arc<Peer> {
        let mut peers = self.peers.write().await;
        match peers.get(&config.name) {
            Some(peer) => {
                let peer = peer.clone();
                drop(peers);
                {
                    let mut state = peer.state.lock().await;
                    state.config = config;
                }
                peer
            }
            None => {
                let peer = Arc::new(Peer::new(config));
                peers.insert(peer.name.clone(), peer.clone());
                peer
            }
        }
    }

    /// Disconnect and forget a peer entirely.
    pub async fn remove(&self, name: &str) -> Result<(), RegistryError> {
        let peer = {
            let mut peers = self.peers.write().await;
            peers.remove(name)
        };
        let Some(peer) = peer else {
            return Err(self.peer_not_found(name).await);
        };
        let mut state = peer.state.lock().await;
        state.drop_session().await;
        state.lifecycle = Lifecycle::Disconnected;
        self.index.remove_peer(name);
        tracing::info!("MCP '{}' unregistered", name);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Connect / disconnect
    // ------------------------------------------------------------------

    /// Install (or merge) the config and drive the peer to connected.
    /// Returns the number of tools discovered. On non-auth failure a
    /// reconnect supervisor is started if the peer's budget allows.
    pub async fn connect(self: &Arc<Self>, config: PeerConfig) -> Result<usize, RegistryError> {
        let peer = self.install_configured(config).await;
        let mut state = peer.state.lock().await;
        match self.establish_locked(&peer, &mut state).await {
            Ok(count) => Ok(count),
            Err(err) => {
                if state.lifecycle == Lifecycle::Error {
                    if let Some(max) = state.config.reconnect_budget() {
                        drop(state);
                        reconnect::spawn_supervisor(self.clone(), peer, max);
                    }
                }
                Err(err)
            }
        }
    }

    /// Install every config and connect each one, logging failures
    /// instead of aborting: a peer that cannot connect leaves the
    /// registry usable with that peer in an error or needs-auth state.
    pub async fn connect_all(self: &Arc<Self>, configs: Vec<PeerConfig>) {
        for config in configs {
            let name = config.name.clone();
            match self.connect(config).await {
                Ok(count) => {
                    tracing::info!("MCP '{}': connected, {} tool(s)", name, count);
                }
                Err(e) => {
                    tracing::error!("MCP '{}': connect failed: {}", name, e);
                }
            }
        }
    }

    /// Close the session and remove the peer's tool-index rows.
    /// Idempotent: disconnecting a peer that is not connected is a no-op.
    pub async fn disconnect(&self, name: &str) -> Result<(), RegistryError> {
        let peer = self.get_peer(name).await?;
        let mut state = peer.state.lock().await;
        state.drop_session().await;
        state.lifecycle = Lifecycle::Disconnected;
        self.index.remove_peer(name);
        tracing::info!("MCP '{}' disconnected", name);
        Ok(())
    }

    /// Disconnect followed by connect with the stored config.
    pub async fn reconnect(self: &Arc<Self>, name: &str) -> Result<usize, RegistryError> {
        let peer = self.get_peer(name).await?;
        let mut state = peer.state.lock().await;
        state.drop_session().await;
        self.index.remove_peer(name);
        match self.establish_locked(&peer, &mut state).await {
            Ok(count) => Ok(count),
            Err(err) => {
                if state.lifecycle == Lifecycle::Error {
                    if let Some(max) = state.config.reconnect_budget() {
                        drop(state);
                        reconnect::spawn_supervisor(self.clone(), peer, max);
                    }
                }
                Err(err)
            }
        }
    }

    /// Create the transport, perform the handshake, list tools and
    /// populate the index, all while the caller holds the peer's state
    /// mutex. Does not touch the reconnect counter on failure; the
    /// supervisor owns that accounting.
    pub(crate) async fn establish_locked(
        &self,
        peer: &Arc<Peer>,
        state: &mut PeerState,
    ) -> Result<usize, RegistryError> {
        state.lifecycle = Lifecycle::Connecting;
        state.last_error = None;

        let connect_timeout = match state.config.effective_connect_timeout() {
            Ok(t) => t,
            Err(e) => {
                state.last_error = Some(e.to_string());
                state.lifecycle = Lifecycle::Error;
                return Err(RegistryError::Config(e));
            }
        };

        let bearer = match &self.credentials {
            Some(source) => source.bearer_token(&peer.name).await,
            None => None,
        };

        match PeerSession::establish(&state.config, connect_timeout, bearer).await {
            Ok(session) => {
                let tools: Vec<IndexedTool> = session
                    .tools()
                    .iter()
                    .map(|t| IndexedTool {
                        peer: peer.name.clone(),
                        tool: t.name.clone(),
                        description: t.description.clone(),
                        input_schema: t.input_schema.clone(),
                    })
                    .collect();
                let count = tools.len();
                self.index.replace_peer(&peer.name, tools);

                state.session = Some(session);
                state.lifecycle = Lifecycle::Connected;
                state.reconnect_attempts = 0;
                state.connected_at = Some(Utc::now());
                tracing::info!("MCP '{}': connected ({} tool(s))", peer.name, count);
                Ok(count)
            }
            Err(e) => {
                // Index rows exist only for connected peers or peers
                // still serving a cached snapshot.
                self.index.remove_peer(&peer.name);
                state.cached_catalog = None;
                state.last_error = Some(e.to_string());
                if e.is_auth_required() {
                    state.lifecycle = Lifecycle::NeedsAuth;
                    Err(RegistryError::AuthRequired {
                        name: peer.name.clone(),
                        reason: e.to_string(),
                    })
                } else {
                    state.lifecycle = Lifecycle::Error;
                    Err(RegistryError::Connect {
                        name: peer.name.clone(),
                        reason: e.to_string(),
                    })
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Execute
    // ------------------------------------------------------------------

    /// Forward one tool call to the named peer. A peer serving a cached
    /// catalog is connected lazily first; a connect failure surfaces as
    /// the call's error.
    pub async fn execute(
        self: &Arc<Self>,
        name: &str,
        tool: &str,
        parameters: Option<serde_json::Value>,
        deadline: Option<Duration>,
    ) -> Result<ToolCallOutcome, RegistryError> {
        let peer = self.get_peer(name).await?;
        let mut state = peer.state.lock().await;

        if state.lifecycle == Lifecycle::Cached {
            tracing::debug!("MCP '{}': lazy connect for execute", name);
            if let Err(err) = self.establish_locked(&peer, &mut state).await {
                if state.lifecycle == Lifecycle::Error {
                    if let Some(max) = state.config.reconnect_budget() {
                        drop(state);
                        reconnect::spawn_supervisor(self.clone(), peer.clone(), max);
                    }
                }
                return Err(err);
            }
        }

        let Some(session) = state.session.as_ref() else {
            return Err(RegistryError::NotConnected {
                name: name.to_string(),
                lifecycle: state.lifecycle,
                last_error: state.last_error.clone(),
            });
        };

        let Some(entry) = session.tools().iter().find(|t| t.name == tool) else {
            let available: Vec<String> =
                session.tools().iter().map(|t| t.name.clone()).collect();
            let suggestion = suggest(tool, available.iter().map(|s| s.as_str()), 40);
            return Err(RegistryError::ToolNotFound {
                peer: name.to_string(),
                tool: tool.to_string(),
                available,
                suggestion,
            });
        };
        let schema = entry.input_schema.clone();

        let arguments = parameters.as_ref().and_then(|v| v.as_object().cloned());
        let provided: Vec<String> = arguments
            .as_ref()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();

        match session.call(tool, arguments, deadline).await {
            Ok(outcome) if outcome.is_error => {
                // Peer-reported error: interpret, do not change lifecycle.
                if looks_like_schema_violation(&outcome.text) {
                    Err(diagnose::diagnose_parameters(
                        name,
                        tool,
                        &schema,
                        &provided,
                        outcome.text,
                    ))
                } else if let Some(hint) = protocol_hint(&outcome.text) {
                    Err(RegistryError::Protocol {
                        peer: name.to_string(),
                        message: outcome.text,
                        hint: hint.to_string(),
                    })
                } else {
                    Err(RegistryError::CallFailed {
                        peer: name.to_string(),
                        tool: tool.to_string(),
                        message: outcome.text,
                    })
                }
            }
            Ok(outcome) => Ok(outcome),
            Err(SessionError::Timeout(d)) => Err(RegistryError::CallFailed {
                peer: name.to_string(),
                tool: tool.to_string(),
                message: format!("timed out after {d:?}"),
            }),
            Err(e) => {
                // Transport-level failure: the session is gone.
                tracing::warn!("MCP '{}': call transport error: {}", name, e);
                state.last_error = Some(e.to_string());
                state.drop_session().await;
                state.lifecycle = Lifecycle::Error;
                self.index.remove_peer(name);
                if let Some(max) = state.config.reconnect_budget() {
                    drop(state);
                    reconnect::spawn_supervisor(self.clone(), peer.clone(), max);
                }
                Err(RegistryError::CallFailed {
                    peer: name.to_string(),
                    tool: tool.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    // ------------------------------------------------------------------
    // Read-only views
    // ------------------------------------------------------------------

    /// Ranked tool search. Negative offsets clamp to zero; non-positive
    /// limits fall back to the default.
    pub async fn search(
        &self,
        query: &str,
        scope: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> SearchPage {
        let limit = limit.max(0) as usize;
        let offset = offset.max(0) as usize;
        self.index.search(query, scope, limit, offset)
    }

    pub async fn status(&self) -> Vec<PeerStatus> {
        let peers: Vec<Arc<Peer>> = {
            let map = self.peers.read().await;
            map.values().cloned().collect()
        };
        let mut statuses = Vec::with_capacity(peers.len());
        for peer in peers {
            let state = peer.state.lock().await;
            statuses.push(Self::status_snapshot(&peer.name, &state));
        }
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    pub async fn status_of(&self, name: &str) -> Result<PeerStatus, RegistryError> {
        let peer = self.get_peer(name).await?;
        let state = peer.state.lock().await;
        Ok(Self::status_snapshot(name, &state))
    }

    fn status_snapshot(name: &str, state: &PeerState) -> PeerStatus {
        let uptime = state
            .connected_at
            .map(|t| (Utc::now() - t).num_seconds().max(0) as u64);
        PeerStatus {
            name: name.to_string(),
            lifecycle: state.lifecycle,
            transport: state.config.transport,
            scope: state.config.scope,
            tool_count: state.catalog().map(|c| c.len()).unwrap_or(0),
            reconnect_attempts: state.reconnect_attempts,
            last_error: state.last_error.clone(),
            health: state.health.clone(),
            connected_at: state.connected_at.map(|t| t.to_rfc3339()),
            uptime_seconds: uptime,
        }
    }

    /// Enumerate tools, prompts, resources and resource templates.
    /// Tools come from the live or cached catalog; the other kinds
    /// require a live session and are skipped otherwise.
    pub async fn metadata(
        &self,
        peer_filter: Option<&str>,
        tool_filter: Option<&str>,
    ) -> Result<Vec<ToolMetadata>, RegistryError> {
        let peers: Vec<Arc<Peer>> = {
            let map = self.peers.read().await;
            if let Some(name) = peer_filter {
                match map.get(name) {
                    Some(p) => vec![p.clone()],
                    None => return Err(self.peer_not_found(name).await),
                }
            } else {
                let mut all: Vec<Arc<Peer>> = map.values().cloned().collect();
                all.sort_by(|a, b| a.name.cmp(&b.name));
                all
            }
        };

        let mut entries = Vec::new();
        for peer in peers {
            let state = peer.state.lock().await;
            if let Some(catalog) = state.catalog() {
                for tool in catalog {
                    if tool_filter.map_or(true, |t| t == tool.name) {
                        entries.push(ToolMetadata {
                            mcp_name: peer.name.clone(),
                            kind: "tool",
                            name: tool.name.clone(),
                            description: Some(tool.description.clone()),
                            input_schema: Some(tool.input_schema.clone()),
                            uri: None,
                        });
                    }
                }
            }
            if tool_filter.is_some() {
                continue;
            }
            let Some(session) = state.session.as_ref() else {
                continue;
            };
            // Servers without these capabilities commonly reject the
            // listing; that is not an error worth surfacing here.
            if let Ok(prompts) = session.list_prompts().await {
                entries.extend(prompts.into_iter().map(|p: PromptInfo| ToolMetadata {
                    mcp_name: peer.name.clone(),
                    kind: "prompt",
                    name: p.name,
                    description: p.description,
                    input_schema: None,
                    uri: None,
                }));
            }
            if let Ok(resources) = session.list_resources().await {
                entries.extend(resources.into_iter().map(|r: ResourceInfo| ToolMetadata {
                    mcp_name: peer.name.clone(),
                    kind: "resource",
                    name: r.name.unwrap_or_else(|| r.uri.clone()),
                    description: r.description,
                    input_schema: None,
                    uri: Some(r.uri),
                }));
            }
            if let Ok(templates) = session.list_resource_templates().await {
                entries.extend(templates.into_iter().map(
                    |t: ResourceTemplateInfo| ToolMetadata {
                        mcp_name: peer.name.clone(),
                        kind: "resource_template",
                        name: t.name.unwrap_or_else(|| t.uri_template.clone()),
                        description: t.description,
                        input_schema: None,
                        uri: Some(t.uri_template),
                    },
                ));
            }
        }
        Ok(entries)
    }

    /// Clone of the stored config for one peer.
    pub async fn config_of(&self, name: &str) -> Result<PeerConfig, RegistryError> {
        let peer = self.get_peer(name).await?;
        let state = peer.state.lock().await;
        Ok(state.config.clone())
    }

    pub async fn installed_names(&self) -> Vec<String> {
        let map = self.peers.read().await;
        let mut names: Vec<String> = map.keys().cloned().collect();
        names.sort();
        names
    }

    async fn get_peer(&self, name: &str) -> Result<Arc<Peer>, RegistryError> {
        let map = self.peers.read().await;
        match map.get(name) {
            Some(peer) => Ok(peer.clone()),
            None => {
                drop(map);
                Err(self.peer_not_found(name).await)
            }
        }
    }

    async fn peer_not_found(&self, name: &str) -> RegistryError {
        RegistryError::PeerNotFound {
            name: name.to_string(),
            installed: self.installed_names().await,
        }
    }

    // ------------------------------------------------------------------
    // Health
    // ------------------------------------------------------------------

    /// Probe every connected peer once and return the recorded states.
    pub async fn health_check_now(&self) -> Vec<(String, HealthState)> {
        let token = CancellationToken::new();
        self.run_health_pass(&token).await;
        let mut results = Vec::new();
        let peers: Vec<Arc<Peer>> = {
            let map = self.peers.read().await;
            map.values().cloned().collect()
        };
        for peer in peers {
            let state = peer.state.lock().await;
            results.push((peer.name.clone(), state.health.clone()));
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    /// One monitor pass: probe each connected peer in parallel, bounded
    /// by the per-call health deadline, and record the outcome. Never
    /// triggers reconnects by itself.
    pub(crate) async fn run_health_pass(&self, token: &CancellationToken) {
        let peers: Vec<Arc<Peer>> = {
            let map = self.peers.read().await;
            map.values().cloned().collect()
        };

        let probes = peers.into_iter().map(|peer| {
            let token = token.clone();
            async move {
                let mut state = peer.state.lock().await;
                if !Self::health_due(&state) {
                    return;
                }
                let Some(session) = state.session.as_ref() else {
                    return;
                };
                let result = tokio::select! {
                    _ = token.cancelled() => return,
                    r = session.ping() => r,
                };
                state.health = match result {
                    Ok(()) => HealthState {
                        status: HealthStatus::Healthy,
                        last_check: Some(Utc::now()),
                        last_error: None,
                    },
                    Err(e) => {
                        tracing::debug!("MCP '{}': health probe failed: {}", peer.name, e);
                        HealthState {
                            status: HealthStatus::Unhealthy,
                            last_check: Some(Utc::now()),
                            last_error: Some(e.to_string()),
                        }
                    }
                };
            }
        });
        futures_util::future::join_all(probes).await;
    }

    /// Per-peer gate on the global monitor tick: "0" opts the peer out
    /// entirely, a set interval rate-limits its probes, empty follows
    /// every tick.
    fn health_due(state: &PeerState) -> bool {
        let raw = state.config.health_check_interval.trim();
        if raw.is_empty() {
            return true;
        }
        if raw == "0" {
            return false;
        }
        let Ok(Some(min_gap)) = manifold_core::config::parse_interval(raw) else {
            return true;
        };
        match state.health.last_check {
            Some(last) => {
                let since = Utc::now().signed_duration_since(last);
                since.num_milliseconds() >= min_gap.as_millis() as i64
            }
            None => true,
        }
    }

    /// Start (or restart) the background health monitor. `None` stops it.
    pub fn start_background_health(self: &Arc<Self>, interval: Option<Duration>) {
        let mut guard = self.health.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = guard.take() {
            handle.stop();
        }
        if let Some(interval) = interval {
            let token = self.child_token();
            let task = health::spawn_monitor(self.clone(), interval, token.clone());
            *guard = Some(HealthHandle { token, task });
        }
    }

    pub fn stop_background_health(&self) {
        let mut guard = self.health.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = guard.take() {
            handle.stop();
        }
    }

    // ------------------------------------------------------------------
    // Catalog cache
    // ------------------------------------------------------------------

    /// Hydrate cached catalogs: every non-dynamic config with a snapshot
    /// on disk is installed in lifecycle=cached with its tools already
    /// searchable. Peers that are past Configured are left alone.
    pub async fn load_cache(&self, configs: &[PeerConfig]) -> anyhow::Result<usize> {
        let Some(path) = &self.cache_path else {
            return Ok(0);
        };
        let file = cache::load(path)?;
        let mut hydrated = 0;
        for config in configs.iter().filter(|c| !c.dynamic) {
            let Some(tools) = file.peers.get(&config.name) else {
                continue;
            };
            let peer = self.install_configured(config.clone()).await;
            let mut state = peer.state.lock().await;
            if state.lifecycle != Lifecycle::Configured {
                continue;
            }
            let rows: Vec<IndexedTool> = tools
                .iter()
                .map(|t| IndexedTool {
                    peer: config.name.clone(),
                    tool: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: t.input_schema.clone(),
                })
                .collect();
            self.index.replace_peer(&config.name, rows);
            state.cached_catalog = Some(tools.clone());
            state.lifecycle = Lifecycle::Cached;
            hydrated += 1;
            tracing::debug!(
                "MCP '{}': serving {} cached tool(s) until first use",
                config.name,
                tools.len()
            );
        }
        Ok(hydrated)
    }

    /// Snapshot the catalogs of connected non-dynamic peers to disk.
    /// Existing snapshots of peers that are currently offline survive.
    pub async fn save_cache(&self) -> anyhow::Result<()> {
        let Some(path) = &self.cache_path else {
            return Ok(());
        };
        let mut file = cache::load(path).unwrap_or_else(|_| CatalogFile::default());
        let peers: Vec<Arc<Peer>> = {
            let map = self.peers.read().await;
            map.values().cloned().collect()
        };
        for peer in peers {
            let state = peer.state.lock().await;
            if state.config.dynamic {
                file.peers.remove(&peer.name);
                continue;
            }
            if let Some(session) = state.session.as_ref() {
                file.peers
                    .insert(peer.name.clone(), session.tools().to_vec());
            }
        }
        cache::save(path, &file)
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Stop background actors, close every session and clear the index.
    /// Idempotent.
    pub async fn close(&self) {
        self.root.cancel();
        self.stop_background_health();
        let peers: Vec<Arc<Peer>> = {
            let map = self.peers.read().await;
            map.values().cloned().collect()
        };
        for peer in peers {
            let mut state = peer.state.lock().await;
            state.drop_session().await;
            if state.lifecycle == Lifecycle::Connected {
                state.lifecycle = Lifecycle::Disconnected;
            }
        }
        self.index.clear();
        tracing::debug!("registry closed");
    }

    /// Accessor for the tool index (used by the meta-tool layer to fetch
    /// full schemas).
    pub fn index(&self) -> &ToolIndex {
        &self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stdio_config(name: &str, command: &str) -> PeerConfig {
        PeerConfig {
            name: name.into(),
            transport: TransportKind::Stdio,
            command: command.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn install_is_idempotent_and_merges() {
        let registry = Arc::new(Registry::new());
        let peer = registry.install_configured(stdio_config("demo", "./a")).await;
        {
            let mut state = peer.state.lock().await;
            state.reconnect_attempts = 2;
            state.lifecycle = Lifecycle::Error;
        }
        // Re-install with new config: lifecycle and counter survive.
        let peer2 = registry.install_configured(stdio_config("demo", "./b")).await;
        let state = peer2.state.lock().await;
        assert_eq!(state.config.command, "./b");
        assert_eq!(state.reconnect_attempts, 2);
        assert_eq!(state.lifecycle, Lifecycle::Error);
    }

    #[tokio::test]
    async fn execute_unknown_peer_lists_installed() {
        let registry = Arc::new(Registry::new());
        registry.install_configured(stdio_config("alpha", "./a")).await;
        registry.install_configured(stdio_config("beta", "./b")).await;

        let err = registry.execute("ghost", "echo", None, None).await.unwrap_err();
        match err {
            RegistryError::PeerNotFound { name, installed } => {
                assert_eq!(name, "ghost");
                assert_eq!(installed, vec!["alpha", "beta"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn execute_on_configured_peer_is_not_connected() {
        let registry = Arc::new(Registry::new());
        registry.install_configured(stdio_config("demo", "./a")).await;
        let err = registry.execute("demo", "echo", None, None).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotConnected { .. }));
    }

    #[tokio::test]
    async fn connect_to_missing_binary_sets_error_state() {
        let registry = Arc::new(Registry::new());
        let mut config = stdio_config("bad", "/does/not/exist-manifold");
        config.max_reconnect_attempts = -1; // keep the supervisor out of this test
        let err = registry.connect(config).await.unwrap_err();
        assert!(matches!(err, RegistryError::Connect { .. }));

        let status = registry.status_of("bad").await.unwrap();
        assert_eq!(status.lifecycle, Lifecycle::Error);
        assert!(status.last_error.is_some());
        assert_eq!(status.tool_count, 0);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let registry = Arc::new(Registry::new());
        registry.install_configured(stdio_config("demo", "./a")).await;
        registry.disconnect("demo").await.unwrap();
        registry.disconnect("demo").await.unwrap();
        let status = registry.status_of("demo").await.unwrap();
        assert_eq!(status.lifecycle, Lifecycle::Disconnected);
    }

    #[tokio::test]
    async fn remove_forgets_the_peer() {
        let registry = Arc::new(Registry::new());
        registry.install_configured(stdio_config("demo", "./a")).await;
        registry.remove("demo").await.unwrap();
        assert!(registry.installed_names().await.is_empty());
        assert!(matches!(
            registry.remove("demo").await,
            Err(RegistryError::PeerNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let registry = Arc::new(Registry::new());
        registry.install_configured(stdio_config("demo", "./a")).await;
        registry.close().await;
        registry.close().await;
    }

    #[tokio::test]
    async fn search_clamps_negative_offset() {
        let registry = Arc::new(Registry::new());
        let page = registry.search("anything", None, -5, -10).await;
        assert_eq!(page.offset, 0);
        assert_eq!(page.total, 0);
    }
}
