//! Single-use loopback listener receiving the authorization redirect.

use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::oauth::AuthError;

/// Keep the listener alive briefly after delivering the code so the
/// browser's request completes cleanly.
const LINGER: Duration = Duration::from_millis(100);

const LANDING_PAGE: &str = "<html><body>\
<h3>Authentication complete</h3>\
<p>You can close this window and return to the terminal.</p>\
</body></html>";

#[derive(Debug)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

type Pending = Arc<Mutex<Option<oneshot::Sender<CallbackQuery>>>>;

pub struct CallbackServer {
    port: u16,
    rx: oneshot::Receiver<CallbackQuery>,
    shutdown: oneshot::Sender<()>,
}

impl CallbackServer {
    /// Bind a loopback TCP listener on an OS-chosen port and expose
    /// `/callback`.
    pub async fn bind() -> Result<Self, AuthError> {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|e| AuthError::Callback(format!("cannot bind loopback listener: {e}")))?;
        let port = listener
            .local_addr()
            .map_err(|e| AuthError::Callback(format!("cannot read listener address: {e}")))?
            .port();

        let (tx, rx) = oneshot::channel();
        let pending: Pending = Arc::new(Mutex::new(Some(tx)));
        let app = Router::new()
            .route("/callback", get(handle_callback))
            .with_state(pending);

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = serve.await {
                tracing::debug!("callback listener exited: {}", e);
            }
        });

        tracing::debug!("OAuth callback listener on 127.0.0.1:{}", port);
        Ok(Self { port, rx, shutdown })
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}/callback", self.port)
    }

    /// Wait for the redirect, verify the state, and return the
    /// authorization code. The listener is closed shortly after the code
    /// arrives; it only ever serves one redirect.
    pub async fn wait(self, expected_state: &str, timeout: Duration) -> Result<String, AuthError> {
        let query = tokio::time::timeout(timeout, self.rx)
            .await
            .map_err(|_| AuthError::Timeout(timeout))?
            .map_err(|_| AuthError::Callback("callback listener dropped".into()))?;

        tokio::time::sleep(LINGER).await;
        let _ = self.shutdown.send(());

        if let Some(error) = query.error {
            return Err(AuthError::Callback(format!(
                "authorization server returned error: {error}"
            )));
        }
        match query.state.as_deref() {
            Some(s) if s == expected_state => {}
            _ => return Err(AuthError::StateMismatch),
        }
        query
            .code
            .ok_or_else(|| AuthError::Callback("redirect carried no code".into()))
    }
}

async fn handle_callback(
    State(pending): State<Pending>,
    Query(params): Query<HashMap<String, String>>,
) -> Html<&'static str> {
    let query = CallbackQuery {
        code: params.get("code").cloned(),
        state: params.get("state").cloned(),
        error: params.get("error").cloned(),
    };
    if let Some(tx) = pending.lock().unwrap_or_else(|e| e.into_inner()).take() {
        let _ = tx.send(query);
    }
    Html(LANDING_PAGE)
}
