pub mod config;
pub mod script;

pub use config::{
    ConfigScope, GatewayConfig, PeerConfig, TransportKind, CONNECT_TIMEOUT_ENV,
    DEFAULT_CONNECT_TIMEOUT,
};
pub use script::{ScriptOutput, ScriptRunner};

/// Source of bearer credentials for peers that require authentication.
///
/// Implemented by the token store; the registry consults it when opening
/// HTTP transports so that a previously completed login is picked up on
/// reconnect without the two crates referencing each other.
#[async_trait::async_trait]
pub trait CredentialSource: Send + Sync {
    /// Return a bearer token for the named peer, refreshing it first if
    /// the stored one has expired and a refresh is possible. `None` means
    /// the peer has no usable credential.
    async fn bearer_token(&self, peer: &str) -> Option<String>;
}
