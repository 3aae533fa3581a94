//! OAuth 2.1 authorization-code flow with PKCE and dynamic client
//! registration, for peers that answer the handshake with an
//! authorization-required signal.
//!
//! The flow: discover the protected-resource metadata, fetch the first
//! authorization server's metadata, register a public client, open the
//! browser at the authorization URL, receive the code on a loopback
//! callback, exchange it for tokens and persist them.

use crate::callback::CallbackServer;
use crate::pkce::{random_state, Pkce};
use crate::tokens::{TokenRecord, TokenStore, TokenStoreError};
use chrono::Utc;
use manifold_core::CredentialSource;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// How long we wait for the user to finish in the browser.
pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("metadata discovery failed: {0}")]
    Discovery(String),

    #[error("dynamic client registration failed: {0}")]
    Registration(String),

    #[error("token exchange failed: {0}")]
    Exchange(String),

    #[error("callback error: {0}")]
    Callback(String),

    #[error("state parameter mismatch; aborting login")]
    StateMismatch,

    #[error("timed out after {0:?} waiting for authorization")]
    Timeout(Duration),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Store(#[from] TokenStoreError),
}

#[derive(Debug, Deserialize)]
struct ProtectedResourceMetadata {
    #[serde(default)]
    authorization_servers: Vec<String>,
    #[serde(default)]
    scopes_supported: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AuthServerMetadata {
    authorization_endpoint: String,
    token_endpoint: String,
    #[serde(default)]
    registration_endpoint: Option<String>,
}

#[derive(Debug, Serialize)]
struct RegistrationRequest<'a> {
    client_name: &'a str,
    redirect_uris: Vec<String>,
    token_endpoint_auth_method: &'a str,
    grant_types: Vec<&'a str>,
    response_types: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    client_id: String,
    #[serde(default)]
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

pub struct OAuthFlow {
    http: reqwest::Client,
    store: Arc<TokenStore>,
}

impl OAuthFlow {
    pub fn new(store: Arc<TokenStore>) -> Self {
        Self {
            http: reqwest::Client::new(),
            store,
        }
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    /// Run the full login flow for a peer and persist the resulting
    /// record. The caller reconnects the peer afterwards.
    pub async fn login(&self, peer_name: &str, server_url: &str) -> Result<TokenRecord, AuthError> {
        let resource = self.discover_resource(server_url).await?;
        let auth_server = resource.authorization_servers.first().ok_or_else(|| {
            AuthError::Discovery(format!(
                "'{server_url}' advertises no authorization servers"
            ))
        })?;
        let as_meta = self.discover_auth_server(auth_server).await?;

        let listener = CallbackServer::bind().await?;
        let redirect_uri = listener.redirect_uri();

        let registration = self.register_client(&as_meta, &redirect_uri).await?;

        let pkce = Pkce::generate();
        let state = random_state();
        let scope = resource.scopes_supported.join(" ");

        let authorize_url = build_authorize_url(
            &as_meta.authorization_endpoint,
            &registration.client_id,
            &redirect_uri,
            &state,
            &pkce.challenge,
            server_url,
            &scope,
        )?;

        if open::that(authorize_url.as_str()).is_err() {
            eprintln!("Open this URL to authorize access:\n{authorize_url}");
        }
        tracing::info!("waiting for authorization of '{}'", peer_name);

        let code = listener.wait(&state, CALLBACK_TIMEOUT).await?;

        let token = self
            .exchange_code(
                &as_meta.token_endpoint,
                &registration,
                &code,
                &redirect_uri,
                &pkce.verifier,
                server_url,
            )
            .await?;

        let record = TokenRecord {
            server_name: peer_name.to_string(),
            server_url: server_url.to_string(),
            client_id: registration.client_id,
            client_secret: registration.client_secret,
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            token_type: token.token_type.unwrap_or_default(),
            expires_at: expiry_from_now(token.expires_in),
            scope: token.scope.unwrap_or(scope),
        };
        self.store.set(record.clone())?;
        tracing::info!("stored credentials for '{}'", peer_name);
        Ok(record)
    }

    /// Exchange a refresh token for a fresh access token. The new refresh
    /// token replaces the old one when the server rotates it; otherwise
    /// the old one is kept.
    pub async fn refresh(&self, record: &TokenRecord) -> Result<TokenRecord, AuthError> {
        let refresh_token = record.refresh_token.as_ref().ok_or_else(|| {
            AuthError::Exchange(format!("'{}' has no refresh token", record.server_name))
        })?;

        let resource = self.discover_resource(&record.server_url).await?;
        let auth_server = resource.authorization_servers.first().ok_or_else(|| {
            AuthError::Discovery(format!(
                "'{}' advertises no authorization servers",
                record.server_url
            ))
        })?;
        let as_meta = self.discover_auth_server(auth_server).await?;

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", record.client_id.as_str()),
            ("resource", record.server_url.as_str()),
        ];
        let mut request = self.http.post(&as_meta.token_endpoint).form(&params);
        if let Some(secret) = &record.client_secret {
            request = request.basic_auth(&record.client_id, Some(secret));
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Exchange(format!(
                "refresh returned {status}: {body}"
            )));
        }
        let token: TokenResponse = response.json().await?;

        let mut updated = record.clone();
        updated.access_token = token.access_token;
        updated.expires_at = expiry_from_now(token.expires_in);
        if let Some(new_refresh) = token.refresh_token {
            updated.refresh_token = Some(new_refresh);
        }
        if let Some(t) = token.token_type {
            updated.token_type = t;
        }
        Ok(updated)
    }

    async fn discover_resource(
        &self,
        server_url: &str,
    ) -> Result<ProtectedResourceMetadata, AuthError> {
        let url = well_known(server_url, "/.well-known/oauth-protected-resource")?;
        let response = self.http.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(AuthError::Discovery(format!(
                "GET {url} returned {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    async fn discover_auth_server(&self, as_url: &str) -> Result<AuthServerMetadata, AuthError> {
        let url = well_known(as_url, "/.well-known/oauth-authorization-server")?;
        let response = self.http.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(AuthError::Discovery(format!(
                "GET {url} returned {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    /// Dynamic client registration is required: without it we have no
    /// client id to authorize with.
    async fn register_client(
        &self,
        as_meta: &AuthServerMetadata,
        redirect_uri: &str,
    ) -> Result<RegistrationResponse, AuthError> {
        let endpoint = as_meta.registration_endpoint.as_ref().ok_or_else(|| {
            AuthError::Registration(
                "the authorization server does not support dynamic client registration; \
                 this server cannot be used without pre-provisioned credentials"
                    .into(),
            )
        })?;

        let payload = RegistrationRequest {
            client_name: "manifold",
            redirect_uris: vec![redirect_uri.to_string()],
            token_endpoint_auth_method: "none",
            grant_types: vec!["authorization_code", "refresh_token"],
            response_types: vec!["code"],
        };
        let response = self.http.post(endpoint).json(&payload).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Registration(format!(
                "POST {endpoint} returned {status}: {body}"
            )));
        }
        Ok(response.json().await?)
    }

    async fn exchange_code(
        &self,
        token_endpoint: &str,
        registration: &RegistrationResponse,
        code: &str,
        redirect_uri: &str,
        verifier: &str,
        resource: &str,
    ) -> Result<TokenResponse, AuthError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", registration.client_id.as_str()),
            ("code_verifier", verifier),
            ("resource", resource),
        ];
        let mut request = self.http.post(token_endpoint).form(&params);
        if let Some(secret) = &registration.client_secret {
            request = request.basic_auth(&registration.client_id, Some(secret));
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Exchange(format!(
                "token endpoint returned {status}: {body}"
            )));
        }
        Ok(response.json().await?)
    }
}

#[async_trait::async_trait]
impl CredentialSource for OAuthFlow {
    async fn bearer_token(&self, peer: &str) -> Option<String> {
        let record = self.store.get(peer).ok()??;
        if !record.is_expired() {
            return Some(record.access_token);
        }
        if record.refresh_token.is_none() {
            tracing::debug!("'{}': token expired and no refresh token held", peer);
            return None;
        }
        match self.refresh(&record).await {
            Ok(updated) => {
                if let Err(e) = self.store.set(updated.clone()) {
                    tracing::warn!("'{}': failed to persist refreshed token: {}", peer, e);
                }
                Some(updated.access_token)
            }
            Err(e) => {
                tracing::warn!("'{}': token refresh failed: {}", peer, e);
                None
            }
        }
    }
}

fn expiry_from_now(expires_in: Option<i64>) -> i64 {
    match expires_in {
        Some(secs) if secs > 0 => Utc::now().timestamp() + secs,
        _ => 0,
    }
}

/// Build a well-known URL on the origin of `base`, dropping any path and
/// query the base carried.
fn well_known(base: &str, path: &str) -> Result<Url, AuthError> {
    let mut url = Url::parse(base)?;
    url.set_path(path);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn build_authorize_url(
    endpoint: &str,
    client_id: &str,
    redirect_uri: &str,
    state: &str,
    challenge: &str,
    resource: &str,
    scope: &str,
) -> Result<Url, AuthError> {
    let mut url = Url::parse(endpoint)?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("state", state)
        .append_pair("code_challenge", challenge)
        .append_pair("code_challenge_method", "S256")
        .append_pair("resource", resource)
        .append_pair("scope", scope);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_replaces_path_and_query() {
        let url = well_known(
            "https://mcp.example.com/api/v1?session=9",
            "/.well-known/oauth-protected-resource",
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://mcp.example.com/.well-known/oauth-protected-resource"
        );
    }

    #[test]
    fn authorize_url_carries_all_parameters() {
        let url = build_authorize_url(
            "https://as.example.com/authorize",
            "cid",
            "http://127.0.0.1:4242/callback",
            "st",
            "chal",
            "https://mcp.example.com/",
            "read write",
        )
        .unwrap();
        let query: std::collections::HashMap<String, String> =
            url.query_pairs().into_owned().collect();
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["client_id"], "cid");
        assert_eq!(query["code_challenge_method"], "S256");
        assert_eq!(query["code_challenge"], "chal");
        assert_eq!(query["resource"], "https://mcp.example.com/");
        assert_eq!(query["scope"], "read write");
        assert_eq!(query["state"], "st");
    }

    #[test]
    fn expiry_maps_expires_in() {
        assert_eq!(expiry_from_now(None), 0);
        assert_eq!(expiry_from_now(Some(0)), 0);
        let at = expiry_from_now(Some(3600));
        let now = Utc::now().timestamp();
        assert!((at - now - 3600).abs() <= 2);
    }

    #[test]
    fn token_response_parses_minimal_and_full() {
        let minimal: TokenResponse = serde_json::from_str(r#"{"access_token":"a"}"#).unwrap();
        assert_eq!(minimal.access_token, "a");
        assert!(minimal.refresh_token.is_none());

        let full: TokenResponse = serde_json::from_str(
            r#"{"access_token":"a","token_type":"Bearer","expires_in":3600,
                "refresh_token":"r","scope":"read"}"#,
        )
        .unwrap();
        assert_eq!(full.token_type.as_deref(), Some("Bearer"));
        assert_eq!(full.expires_in, Some(3600));
    }
}
