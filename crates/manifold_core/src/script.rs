//! Collaborator contract for the embedded scripting runtime.
//!
//! The language implementation lives outside this workspace; the gateway
//! only needs a way to hand it source text and receive a result plus
//! whatever the script emitted along the way.

use serde::Serialize;

/// What a script run produced.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ScriptOutput {
    /// The script's final value.
    pub result: serde_json::Value,
    /// Lines emitted during execution, in order.
    pub emitted: Vec<String>,
}

/// Executes user-supplied scripts that may call downstream peers.
#[async_trait::async_trait]
pub trait ScriptRunner: Send + Sync {
    /// Run `source` to completion. Script-level failures are errors here;
    /// the caller renders them, it does not retry.
    async fn run(&self, source: &str) -> anyhow::Result<ScriptOutput>;
}
