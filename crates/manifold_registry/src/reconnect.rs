//! Exponential-backoff reconnect supervisor, one task per failing peer.

use crate::registry::Registry;
use crate::state::{Lifecycle, Peer};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);
pub const BACKOFF_MULTIPLIER: u32 = 2;

/// Delay before the nth attempt (1-based): 1s, 2s, 4s, 8s, 16s, 32s,
/// then 60s forever.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(31);
    let delay = INITIAL_BACKOFF.saturating_mul(BACKOFF_MULTIPLIER.saturating_pow(exp));
    delay.min(MAX_BACKOFF)
}

/// Start the supervisor for `peer` unless one is already running.
///
/// The supervisor transitions the peer to Reconnecting, then alternates
/// backoff waits with connect attempts until one succeeds, the budget is
/// exhausted, the failure turns into authorization-required, or the
/// registry shuts down.
pub(crate) fn spawn_supervisor(registry: Arc<Registry>, peer: Arc<Peer>, max_attempts: u32) {
    // Only one supervisor per peer may be active.
    if peer
        .reconnect_active
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return;
    }

    let cancel = registry.child_token();
    tokio::spawn(async move {
        {
            let mut state = peer.state.lock().await;
            state.lifecycle = Lifecycle::Reconnecting;
        }
        tracing::info!(
            "MCP '{}': starting reconnect supervisor (max {} attempts)",
            peer.name,
            max_attempts
        );

        for attempt in 1..=max_attempts {
            let delay = backoff_delay(attempt);
            tracing::debug!(
                "MCP '{}': reconnect attempt {}/{} in {:?}",
                peer.name,
                attempt,
                max_attempts,
                delay
            );
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("MCP '{}': reconnect supervisor canceled", peer.name);
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            if cancel.is_cancelled() {
                break;
            }

            let mut state = peer.state.lock().await;
            match registry.establish_locked(&peer, &mut state).await {
                Ok(tool_count) => {
                    tracing::info!(
                        "MCP '{}': reconnected on attempt {} ({} tool(s))",
                        peer.name,
                        attempt,
                        tool_count
                    );
                    break;
                }
                Err(e) => {
                    state.reconnect_attempts += 1;
                    if state.lifecycle == Lifecycle::NeedsAuth {
                        // User action required; retrying cannot help.
                        tracing::warn!("MCP '{}': reconnect requires authentication", peer.name);
                        break;
                    }
                    if attempt < max_attempts {
                        state.lifecycle = Lifecycle::Reconnecting;
                    }
                    tracing::debug!(
                        "MCP '{}': reconnect attempt {} failed: {}",
                        peer.name,
                        attempt,
                        e
                    );
                }
            }
        }

        peer.reconnect_active.store(false, Ordering::SeqCst);
    });
}
