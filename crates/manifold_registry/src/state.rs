//! Per-peer lifecycle state owned by the registry.

use crate::session::{DiscoveredTool, PeerSession};
use chrono::{DateTime, Utc};
use manifold_core::PeerConfig;
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use tokio::sync::Mutex;

/// Where a peer is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Installed but never connected.
    Configured,
    Connecting,
    Connected,
    Disconnected,
    Error,
    /// Connect was refused for lack of credentials; user action required.
    NeedsAuth,
    /// A reconnect supervisor is driving retry attempts.
    Reconnecting,
    /// Serving a cached tool catalog; connects lazily on first execute.
    Cached,
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Lifecycle::Configured => "configured",
            Lifecycle::Connecting => "connecting",
            Lifecycle::Connected => "connected",
            Lifecycle::Disconnected => "disconnected",
            Lifecycle::Error => "error",
            Lifecycle::NeedsAuth => "needs_auth",
            Lifecycle::Reconnecting => "reconnecting",
            Lifecycle::Cached => "cached",
        };
        f.write_str(s)
    }
}

/// Health probe outcome for one peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthState {
    pub status: HealthStatus,
    pub last_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Mutable state of one installed peer. Guarded by the owning
/// [`Peer`]'s mutex; protocol I/O for the peer serializes on that same
/// lock so calls on one peer never block calls on another.
pub struct PeerState {
    pub config: PeerConfig,
    pub lifecycle: Lifecycle,
    /// Present iff lifecycle is Connected.
    pub session: Option<PeerSession>,
    pub last_error: Option<String>,
    pub reconnect_attempts: u32,
    pub health: HealthState,
    /// Snapshot served while lifecycle is Cached (dynamic=false peers only).
    pub cached_catalog: Option<Vec<DiscoveredTool>>,
    pub connected_at: Option<DateTime<Utc>>,
}

impl PeerState {
    pub fn new(config: PeerConfig) -> Self {
        Self {
            config,
            lifecycle: Lifecycle::Configured,
            session: None,
            last_error: None,
            reconnect_attempts: 0,
            health: HealthState::default(),
            cached_catalog: None,
            connected_at: None,
        }
    }

    /// Close and clear the session handle, if any. Must be called when
    /// leaving Connected so the handle-iff-connected invariant holds.
    pub async fn drop_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
        }
        self.connected_at = None;
    }

    /// The tools this peer currently offers: the live session's catalog
    /// when connected, the snapshot while serving from cache, nothing in
    /// any other lifecycle (mirroring the tool index).
    pub fn catalog(&self) -> Option<&[DiscoveredTool]> {
        match self.lifecycle {
            Lifecycle::Connected => self.session.as_ref().map(|s| s.tools()),
            Lifecycle::Cached => self.cached_catalog.as_deref(),
            _ => None,
        }
    }
}

/// One installed peer: its state mutex plus the single-supervisor guard.
pub struct Peer {
    pub name: String,
    pub state: Mutex<PeerState>,
    /// Set while a reconnect supervisor task is running for this peer.
    pub reconnect_active: AtomicBool,
}

impl Peer {
    pub fn new(config: PeerConfig) -> Self {
        Self {
            name: config.name.clone(),
            state: Mutex::new(PeerState::new(config)),
            reconnect_active: AtomicBool::new(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Lifecycle::NeedsAuth).unwrap(),
            "\"needs_auth\""
        );
        assert_eq!(Lifecycle::Reconnecting.to_string(), "reconnecting");
    }

    #[test]
    fn new_state_is_configured() {
        let state = PeerState::new(PeerConfig {
            name: "demo".into(),
            ..Default::default()
        });
        assert_eq!(state.lifecycle, Lifecycle::Configured);
        assert!(state.session.is_none());
        assert_eq!(state.reconnect_attempts, 0);
        assert_eq!(state.health.status, HealthStatus::Unknown);
    }
}
