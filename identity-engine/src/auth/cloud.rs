//! OAuth 2.0 installed-app credentials for the cloud directory.

use super::artifact::TokenArtifact;
use super::consent::{AuthorizationRequest, ConsentPrompt, LoopbackListener, Pkce, SystemBrowser};
use super::TokenSource;
use crate::config::{resolve_credentials_path, CloudConfig};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use directory_core::error::AppError;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Client-secrets file as downloaded from the provider console.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub auth_uri: String,
    pub token_uri: String,
}

#[derive(Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    pub fn from_json(bytes: &[u8]) -> Result<Self, AppError> {
        let file: ClientSecretsFile = serde_json::from_slice(bytes).map_err(|e| {
            AppError::AuthConfigMissing(
                anyhow::Error::new(e).context("client secrets file is malformed"),
            )
        })?;
        file.installed.or(file.web).ok_or_else(|| {
            AppError::AuthConfigMissing(anyhow::anyhow!(
                "client secrets file has neither an 'installed' nor a 'web' section"
            ))
        })
    }

    pub async fn load(path: &Path) -> Result<Self, AppError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            AppError::AuthConfigMissing(anyhow::Error::new(e).context(format!(
                "cannot read client secrets at {}",
                path.display()
            )))
        })?;
        Self::from_json(&bytes)
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Result of a refresh attempt that did not produce a token.
enum RefreshFailure {
    /// The refresh token was revoked or expired; consent is needed again.
    Revoked,
    Failed(AppError),
}

/// Hands out bearer tokens, refreshing in place and falling back to the
/// interactive consent flow when there is no usable artifact.
pub struct CloudBroker {
    credentials_path: Option<PathBuf>,
    artifact_path: PathBuf,
    scopes: Vec<String>,
    consent_timeout: Duration,
    http: reqwest::Client,
    prompt: Arc<dyn ConsentPrompt>,
    state: Mutex<Option<TokenArtifact>>,
    /// Refresh this long before the provider-reported expiry.
    grace: ChronoDuration,
}

impl CloudBroker {
    pub fn new(config: &CloudConfig) -> Self {
        Self {
            credentials_path: config.credentials_path.clone(),
            artifact_path: config.token_artifact_path.clone(),
            scopes: config.scopes.clone(),
            consent_timeout: Duration::from_secs(config.consent_timeout_seconds),
            http: reqwest::Client::new(),
            prompt: Arc::new(SystemBrowser),
            state: Mutex::new(None),
            grace: ChronoDuration::seconds(60),
        }
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn ConsentPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    async fn client_secrets(&self) -> Result<ClientSecrets, AppError> {
        let path = resolve_credentials_path(self.credentials_path.as_deref())?;
        debug!(path = %path.display(), "Using client secrets");
        ClientSecrets::load(&path).await
    }

    #[instrument(skip(self))]
    async fn acquire(&self) -> Result<Secret<String>, AppError> {
        let mut state = self.state.lock().await;

        if state.is_none() {
            *state = TokenArtifact::load(&self.artifact_path).await?;
        }
        if let Some(artifact) = state.as_ref() {
            if !artifact.covers_scopes(&self.scopes) {
                info!("Requested scope set differs from the stored grant; consent required");
                *state = None;
            }
        }

        if let Some(artifact) = state.as_ref() {
            if !artifact.is_expired(self.grace) {
                return Ok(Secret::new(artifact.access_token.clone()));
            }
            if let Some(refresh_token) = artifact.refresh_token.clone() {
                match self.refresh(artifact, &refresh_token).await {
                    Ok(renewed) => {
                        renewed.save(&self.artifact_path).await?;
                        let token = Secret::new(renewed.access_token.clone());
                        *state = Some(renewed);
                        return Ok(token);
                    }
                    Err(RefreshFailure::Revoked) => {
                        info!("Refresh token no longer valid; consent required");
                    }
                    Err(RefreshFailure::Failed(e)) => return Err(e),
                }
            }
        }

        let artifact = self.consent().await?;
        artifact.save(&self.artifact_path).await?;
        let token = Secret::new(artifact.access_token.clone());
        *state = Some(artifact);
        Ok(token)
    }

    async fn refresh(
        &self,
        current: &TokenArtifact,
        refresh_token: &str,
    ) -> Result<TokenArtifact, RefreshFailure> {
        let secrets = self.client_secrets().await.map_err(RefreshFailure::Failed)?;
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", secrets.client_id.as_str()),
            ("client_secret", secrets.client_secret.expose_secret().as_str()),
        ];

        let response = self
            .http
            .post(&secrets.token_uri)
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                RefreshFailure::Failed(AppError::AuthTransient(
                    anyhow::Error::new(e).context("token refresh request failed"),
                ))
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(RefreshFailure::Failed(AppError::AuthTransient(anyhow::anyhow!(
                "token endpoint returned {}",
                status
            ))));
        }
        if !status.is_success() {
            let body: TokenErrorResponse = response.json().await.unwrap_or(TokenErrorResponse {
                error: String::new(),
                error_description: None,
            });
            if body.error == "invalid_grant" {
                return Err(RefreshFailure::Revoked);
            }
            return Err(RefreshFailure::Failed(AppError::AuthInvalid(anyhow::anyhow!(
                "token refresh rejected ({}): {}",
                status,
                body.error_description.unwrap_or(body.error)
            ))));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            RefreshFailure::Failed(AppError::AuthTransient(
                anyhow::Error::new(e).context("unreadable token response"),
            ))
        })?;
        debug!(expires_in = token.expires_in, "Access token refreshed");

        Ok(TokenArtifact {
            access_token: token.access_token,
            refresh_token: token.refresh_token.or_else(|| current.refresh_token.clone()),
            expires_at: Utc::now() + ChronoDuration::seconds(token.expires_in),
            scopes: current.scopes.clone(),
            token_uri: secrets.token_uri,
            client_id: secrets.client_id,
        })
    }

    #[instrument(skip(self))]
    async fn consent(&self) -> Result<TokenArtifact, AppError> {
        let secrets = self.client_secrets().await?;
        let listener = LoopbackListener::bind().await?;
        let pkce = Pkce::generate();
        let state = uuid::Uuid::new_v4().to_string();
        let redirect_uri = listener.redirect_uri().to_string();

        let url = AuthorizationRequest {
            auth_uri: &secrets.auth_uri,
            client_id: &secrets.client_id,
            redirect_uri: &redirect_uri,
            scopes: &self.scopes,
            state: &state,
            code_challenge: &pkce.challenge,
        }
        .url()?;

        info!("Opening consent page in the browser");
        self.prompt.open(url.as_str()).await?;
        let code = listener.wait_for_code(&state, self.consent_timeout).await?;

        let params = [
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("client_id", secrets.client_id.as_str()),
            ("client_secret", secrets.client_secret.expose_secret().as_str()),
            ("code_verifier", pkce.verifier.as_str()),
        ];
        let response = self
            .http
            .post(&secrets.token_uri)
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                AppError::AuthTransient(anyhow::Error::new(e).context("code exchange failed"))
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(AppError::AuthTransient(anyhow::anyhow!(
                "token endpoint returned {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(AppError::AuthInvalid(anyhow::anyhow!(
                "authorization code rejected ({})",
                status
            )));
        }
        let token: TokenResponse = response.json().await.map_err(|e| {
            AppError::AuthTransient(anyhow::Error::new(e).context("unreadable token response"))
        })?;
        if token.refresh_token.is_none() {
            warn!("Provider issued no refresh token; consent will be needed again on expiry");
        }
        info!("Consent granted");

        Ok(TokenArtifact {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: Utc::now() + ChronoDuration::seconds(token.expires_in),
            scopes: self.scopes.clone(),
            token_uri: secrets.token_uri,
            client_id: secrets.client_id,
        })
    }
}

#[async_trait]
impl TokenSource for CloudBroker {
    async fn access_token(&self) -> Result<Secret<String>, AppError> {
        self.acquire().await
    }

    async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        if let Some(artifact) = state.as_mut() {
            debug!("Access token invalidated after rejection");
            artifact.expire_now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use directory_core::ErrorKind;

    #[test]
    fn test_client_secrets_installed_and_web() {
        let installed = br#"{"installed": {"client_id": "a", "client_secret": "s",
            "auth_uri": "https://auth", "token_uri": "https://token"}}"#;
        let web = br#"{"web": {"client_id": "b", "client_secret": "s",
            "auth_uri": "https://auth", "token_uri": "https://token", "redirect_uris": []}}"#;
        assert_eq!(ClientSecrets::from_json(installed).unwrap().client_id, "a");
        assert_eq!(ClientSecrets::from_json(web).unwrap().client_id, "b");
    }

    #[test]
    fn test_client_secrets_without_section() {
        let err = ClientSecrets::from_json(br#"{"other": {}}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthConfigMissing);
        let err = ClientSecrets::from_json(b"[").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthConfigMissing);
    }
}
