//! Interactive consent for the installed-app OAuth flow.
//!
//! A loopback listener on an ephemeral port receives the authorization
//! redirect; the operator's browser is pointed at the consent page.

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use directory_core::error::AppError;
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::Url;
use sha2::{Digest, Sha256};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Shows the consent page to the operator.
#[async_trait]
pub trait ConsentPrompt: Send + Sync {
    async fn open(&self, authorization_url: &str) -> Result<(), AppError>;
}

/// Launches the desktop's default browser.
pub struct SystemBrowser;

#[async_trait]
impl ConsentPrompt for SystemBrowser {
    async fn open(&self, authorization_url: &str) -> Result<(), AppError> {
        let url = authorization_url.to_string();
        let launched = tokio::task::spawn_blocking(move || open::that(&url))
            .await
            .map_err(|e| {
                AppError::AuthTransient(anyhow::anyhow!("browser launch panicked: {}", e))
            })?;
        if let Err(e) = launched {
            // The URL carries no secret; the operator can paste it by hand.
            warn!(
                error = %e,
                url = %authorization_url,
                "Could not open a browser; open the URL manually"
            );
        }
        Ok(())
    }
}

/// PKCE verifier and its S256 challenge.
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    pub fn generate() -> Self {
        let verifier: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(64)
            .map(char::from)
            .collect();
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

pub struct AuthorizationRequest<'a> {
    pub auth_uri: &'a str,
    pub client_id: &'a str,
    pub redirect_uri: &'a str,
    pub scopes: &'a [String],
    pub state: &'a str,
    pub code_challenge: &'a str,
}

impl AuthorizationRequest<'_> {
    /// Offline access with a forced consent screen so a refresh token is issued.
    pub fn url(&self) -> Result<Url, AppError> {
        let scope = self.scopes.join(" ");
        Url::parse_with_params(
            self.auth_uri,
            &[
                ("client_id", self.client_id),
                ("redirect_uri", self.redirect_uri),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("state", self.state),
                ("code_challenge", self.code_challenge),
                ("code_challenge_method", "S256"),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| {
            AppError::AuthConfigMissing(anyhow::anyhow!(
                "invalid auth_uri in client secrets: {}",
                e
            ))
        })
    }
}

/// One-shot callback server on `127.0.0.1:<ephemeral>`.
pub struct LoopbackListener {
    listener: TcpListener,
    redirect_uri: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConsentCallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

type Outcome = Result<String, AppError>;

#[derive(Clone)]
struct CallbackState {
    expected_state: Arc<str>,
    outcome: Arc<Mutex<Option<oneshot::Sender<Outcome>>>>,
}

impl CallbackState {
    async fn finish(&self, outcome: Outcome) {
        if let Some(sender) = self.outcome.lock().await.take() {
            let _ = sender.send(outcome);
        }
    }
}

impl LoopbackListener {
    pub async fn bind() -> Result<Self, AppError> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        debug!(port, "Consent listener bound");
        Ok(Self {
            listener,
            redirect_uri: format!("http://127.0.0.1:{}/", port),
        })
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Serve until the redirect carrying `code` and a matching `state` arrives.
    /// Requests without either (favicon requests) are answered and ignored.
    pub async fn wait_for_code(
        self,
        expected_state: &str,
        timeout: Duration,
    ) -> Result<String, AppError> {
        let (sender, receiver) = oneshot::channel();
        let state = CallbackState {
            expected_state: Arc::from(expected_state),
            outcome: Arc::new(Mutex::new(Some(sender))),
        };
        let app = Router::new()
            .route("/", get(consent_callback))
            .with_state(state);

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let server = axum::serve(self.listener, app)
            .with_graceful_shutdown(async move { signal.cancelled().await });
        let handle = tokio::spawn(async move {
            if let Err(e) = server.await {
                warn!(error = %e, "Consent listener stopped with an error");
            }
        });

        let outcome = tokio::time::timeout(timeout, receiver).await;
        shutdown.cancel();
        if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
            debug!("Consent listener still draining a connection; leaving it behind");
        }

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AppError::AuthTransient(anyhow::anyhow!(
                "consent listener closed before a redirect arrived"
            ))),
            Err(_) => Err(AppError::AuthDenied(anyhow::anyhow!(
                "consent was not completed within {}s",
                timeout.as_secs()
            ))),
        }
    }
}

async fn consent_callback(
    State(state): State<CallbackState>,
    Query(params): Query<ConsentCallbackParams>,
) -> impl IntoResponse {
    match params.into_redirect(&state.expected_state) {
        Redirect::Ignored => (StatusCode::NOT_FOUND, "").into_response(),
        Redirect::Code(code) => {
            state.finish(Ok(code)).await;
            (
                StatusCode::OK,
                "Authorization complete. You may close this window.",
            )
                .into_response()
        }
        Redirect::Failed(err) => {
            state.finish(Err(err)).await;
            (StatusCode::BAD_REQUEST, "Authorization failed.").into_response()
        }
    }
}

#[derive(Debug)]
enum Redirect {
    Ignored,
    Code(String),
    Failed(AppError),
}

impl ConsentCallbackParams {
    fn into_redirect(self, expected_state: &str) -> Redirect {
        if let Some(error) = self.error {
            info!(error = %error, "Consent page returned an error");
            return Redirect::Failed(if error == "access_denied" {
                AppError::AuthDenied(anyhow::anyhow!("operator declined consent"))
            } else {
                AppError::AuthInvalid(anyhow::anyhow!("authorization failed: {}", error))
            });
        }
        let Some(code) = self.code else {
            return Redirect::Ignored;
        };
        if self.state.as_deref() != Some(expected_state) {
            return Redirect::Failed(AppError::AuthInvalid(anyhow::anyhow!(
                "authorization response state does not match the request"
            )));
        }
        Redirect::Code(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use directory_core::ErrorKind;

    #[test]
    fn test_pkce_challenge_is_s256_of_verifier() {
        let pkce = Pkce::generate();
        assert_eq!(pkce.verifier.len(), 64);
        let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(pkce.verifier.as_bytes()));
        assert_eq!(pkce.challenge, expected);
    }

    #[test]
    fn test_authorization_url_parameters() {
        let scopes = vec!["s1".to_string(), "s2".to_string()];
        let url = AuthorizationRequest {
            auth_uri: "https://accounts.example.com/o/oauth2/auth",
            client_id: "cid",
            redirect_uri: "http://127.0.0.1:5000/",
            scopes: &scopes,
            state: "st",
            code_challenge: "ch",
        }
        .url()
        .unwrap();
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["scope"], "s1 s2");
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["access_type"], "offline");
    }

    fn params(
        code: Option<&str>,
        state: Option<&str>,
        error: Option<&str>,
    ) -> ConsentCallbackParams {
        ConsentCallbackParams {
            code: code.map(str::to_string),
            state: state.map(str::to_string),
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn test_redirect_parsing() {
        assert!(matches!(
            ConsentCallbackParams::default().into_redirect("s"),
            Redirect::Ignored
        ));
        assert!(matches!(
            params(Some("abc"), Some("s"), None).into_redirect("s"),
            Redirect::Code(ref c) if c == "abc"
        ));
        match params(None, Some("s"), Some("access_denied")).into_redirect("s") {
            Redirect::Failed(e) => assert_eq!(e.kind(), ErrorKind::AuthDenied),
            other => panic!("unexpected {:?}", other),
        }
        match params(Some("abc"), Some("forged"), None).into_redirect("s") {
            Redirect::Failed(e) => assert_eq!(e.kind(), ErrorKind::AuthInvalid),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_listener_receives_code() {
        let listener = LoopbackListener::bind().await.unwrap();
        let redirect = format!("{}?state=xyz&code=4%2Fcode", listener.redirect_uri());
        let waiter = tokio::spawn(listener.wait_for_code("xyz", Duration::from_secs(5)));

        let response = reqwest::get(&redirect).await.unwrap();
        assert!(response.status().is_success());
        assert_eq!(waiter.await.unwrap().unwrap(), "4/code");
    }

    #[tokio::test]
    async fn test_listener_ignores_stray_requests() {
        let listener = LoopbackListener::bind().await.unwrap();
        let base = listener.redirect_uri().to_string();
        let waiter = tokio::spawn(listener.wait_for_code("xyz", Duration::from_secs(5)));

        let favicon = reqwest::get(format!("{}favicon.ico", base)).await.unwrap();
        assert_eq!(favicon.status(), reqwest::StatusCode::NOT_FOUND);
        let bare = reqwest::get(&base).await.unwrap();
        assert_eq!(bare.status(), reqwest::StatusCode::NOT_FOUND);

        let response = reqwest::get(format!("{}?state=xyz&code=abc", base)).await.unwrap();
        assert!(response.status().is_success());
        assert_eq!(waiter.await.unwrap().unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_listener_rejects_forged_state() {
        let listener = LoopbackListener::bind().await.unwrap();
        let redirect = format!("{}?state=forged&code=abc", listener.redirect_uri());
        let waiter = tokio::spawn(listener.wait_for_code("xyz", Duration::from_secs(5)));

        let response = reqwest::get(&redirect).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthInvalid);
    }

    #[tokio::test]
    async fn test_listener_times_out_as_denied() {
        let listener = LoopbackListener::bind().await.unwrap();
        let err = listener
            .wait_for_code("xyz", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthDenied);
    }
}
