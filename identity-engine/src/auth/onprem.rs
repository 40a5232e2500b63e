//! Password login and session cookies for the on-prem directory.

use crate::config::OnPremConfig;
use directory_core::error::AppError;
use reqwest::header::{ACCEPT, REFERER};
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode, Url};
use secrecy::{ExposeSecret, Secret};
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

const LOGIN_PATH: &str = "ipa/session/login_password";
const LOGOUT_PATH: &str = "ipa/session/logout";
const SESSION_COOKIE: &str = "ipa_session";

/// Body fragments that only appear on an authenticated landing page.
const LOGGED_IN_MARKERS: &[&str] = &["ipa_session", "Logged In As", "logout"];

/// Logged-in HTTP session. Cloning shares the cookie jar.
#[derive(Clone)]
pub struct OnPremSession {
    http: Client,
    base_url: Url,
    generation: u64,
}

impl fmt::Debug for OnPremSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnPremSession")
            .field("base_url", &self.base_url.as_str())
            .field("generation", &self.generation)
            .finish()
    }
}

impl OnPremSession {
    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Increments on every fresh login; used to detect a stale session.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, AppError> {
        join(&self.base_url, path)
    }

    /// `Referer` value the server requires for CSRF protection.
    pub fn referer(&self) -> String {
        format!("{}ipa", self.base_url)
    }
}

fn join(base: &Url, path: &str) -> Result<Url, AppError> {
    base.join(path)
        .map_err(|e| AppError::Config(anyhow::anyhow!("cannot build URL for '{}': {}", path, e)))
}

/// Outcome of one username form.
enum LoginAttempt {
    Accepted,
    Rejected(StatusCode),
}

struct SessionSlot {
    current: Option<OnPremSession>,
    logins: u64,
}

pub struct OnPremBroker {
    base_url: Url,
    username: String,
    password: Secret<String>,
    realm: String,
    verify_tls: bool,
    timeout: Duration,
    slot: Mutex<SessionSlot>,
}

impl fmt::Debug for OnPremBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnPremBroker")
            .field("base_url", &self.base_url.as_str())
            .field("username", &self.username)
            .field("verify_tls", &self.verify_tls)
            .finish()
    }
}

/// Prefix `https://` when the operator omitted the scheme, and make the path
/// end with `/` so relative joins land under it.
pub fn normalize_server_url(raw: &str) -> Result<Url, AppError> {
    let trimmed = raw.trim();
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    let mut url = Url::parse(&with_scheme).map_err(|e| {
        AppError::Config(anyhow::anyhow!(
            "invalid on-prem server URL '{}': {}",
            raw,
            e
        ))
    })?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

impl OnPremBroker {
    pub fn new(config: &OnPremConfig) -> Result<Self, AppError> {
        if !config.verify_tls {
            warn!(
                server = %config.server_url,
                "TLS certificate verification is disabled for the on-prem directory"
            );
        }
        Ok(Self {
            base_url: normalize_server_url(&config.server_url)?,
            username: config.username.clone(),
            password: config.password.clone(),
            realm: config.realm(),
            verify_tls: config.verify_tls,
            timeout: config.timeout(),
            slot: Mutex::new(SessionSlot {
                current: None,
                logins: 0,
            }),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Cached session, logging in on first use.
    pub async fn session(&self) -> Result<OnPremSession, AppError> {
        let mut slot = self.slot.lock().await;
        if let Some(session) = &slot.current {
            return Ok(session.clone());
        }
        self.login_into(&mut slot).await
    }

    /// Replace a session the server rejected. If another caller already
    /// replaced it, that newer session is returned without a second login.
    pub async fn relogin(&self, stale: &OnPremSession) -> Result<OnPremSession, AppError> {
        let mut slot = self.slot.lock().await;
        if let Some(current) = &slot.current {
            if current.generation != stale.generation {
                return Ok(current.clone());
            }
        }
        info!("On-prem session rejected; logging in again");
        slot.current = None;
        self.login_into(&mut slot).await
    }

    /// Best effort: errors are logged and swallowed.
    pub async fn logout(&self) {
        let session = self.slot.lock().await.current.take();
        let Some(session) = session else {
            return;
        };
        let url = match session.endpoint(LOGOUT_PATH) {
            Ok(url) => url,
            Err(_) => return,
        };
        match session
            .http
            .post(url)
            .header(REFERER, session.referer())
            .send()
            .await
        {
            Ok(response) => debug!(status = %response.status(), "On-prem logout"),
            Err(e) => debug!(error = %e, "On-prem logout failed; ignoring"),
        }
    }

    /// Bare, lower-cased, then realm-qualified; duplicates removed.
    pub fn username_forms(&self) -> Vec<String> {
        let mut forms: Vec<String> = Vec::with_capacity(3);
        let candidates = [
            self.username.clone(),
            self.username.to_lowercase(),
            if self.username.contains('@') {
                self.username.clone()
            } else {
                format!("{}@{}", self.username, self.realm)
            },
        ];
        for candidate in candidates {
            if !forms.contains(&candidate) {
                forms.push(candidate);
            }
        }
        forms
    }

    fn build_client(&self) -> Result<Client, AppError> {
        Client::builder()
            .cookie_store(true)
            .danger_accept_invalid_certs(!self.verify_tls)
            .redirect(Policy::none())
            .timeout(self.timeout)
            .build()
            .map_err(|e| {
                AppError::Config(anyhow::Error::new(e).context("cannot build on-prem HTTP client"))
            })
    }

    #[instrument(skip(self, slot), fields(server = %self.base_url))]
    async fn login_into(&self, slot: &mut SessionSlot) -> Result<OnPremSession, AppError> {
        let http = self.build_client()?;
        let login_url = join(&self.base_url, LOGIN_PATH)?;
        let referer = format!("{}ipa", self.base_url);

        let mut last_status = None;
        for form in self.username_forms() {
            match self.try_login(&http, &login_url, &referer, &form).await? {
                LoginAttempt::Accepted => {
                    slot.logins += 1;
                    info!(user = %form, "Logged in to on-prem directory");
                    let session = OnPremSession {
                        http,
                        base_url: self.base_url.clone(),
                        generation: slot.logins,
                    };
                    slot.current = Some(session.clone());
                    return Ok(session);
                }
                LoginAttempt::Rejected(status) => {
                    debug!(user = %form, status = %status, "Username form rejected");
                    last_status = Some(status);
                }
            }
        }

        Err(AppError::AuthInvalid(anyhow::anyhow!(
            "on-prem server rejected the credentials for '{}' ({})",
            self.username,
            last_status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "no attempt".to_string())
        )))
    }

    async fn try_login(
        &self,
        http: &Client,
        login_url: &Url,
        referer: &str,
        user: &str,
    ) -> Result<LoginAttempt, AppError> {
        let params = [("user", user), ("password", self.password.expose_secret().as_str())];
        let response = http
            .post(login_url.clone())
            .header(REFERER, referer)
            .header(ACCEPT, "text/plain")
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                AppError::AuthTransient(anyhow::anyhow!(
                    "on-prem login request failed: {}",
                    e.without_url()
                ))
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(AppError::AuthTransient(anyhow::anyhow!(
                "on-prem login returned {}",
                status
            )));
        }
        if status.is_redirection() {
            return Ok(LoginAttempt::Accepted);
        }
        if !status.is_success() {
            return Ok(LoginAttempt::Rejected(status));
        }
        if response.cookies().any(|c| c.name() == SESSION_COOKIE) {
            return Ok(LoginAttempt::Accepted);
        }
        let body = response.text().await.unwrap_or_default();
        if LOGGED_IN_MARKERS.iter().any(|marker| body.contains(marker)) {
            return Ok(LoginAttempt::Accepted);
        }
        Ok(LoginAttempt::Rejected(status))
    }
}
