//! Credential acquisition for both directories.
//!
//! The cloud side hands out bearer tokens ([`CloudBroker`]); the on-prem side
//! hands out cookie-authenticated HTTP sessions ([`OnPremBroker`]). Both cache
//! what they acquire for the lifetime of the process and renew it on demand.

pub mod artifact;
pub mod cloud;
pub mod consent;
pub mod onprem;

pub use artifact::TokenArtifact;
pub use cloud::{ClientSecrets, CloudBroker};
pub use consent::{ConsentPrompt, SystemBrowser};
pub use onprem::{OnPremBroker, OnPremSession};

use async_trait::async_trait;
use directory_core::error::AppError;
use secrecy::Secret;
use std::sync::Arc;

/// Source of bearer tokens for the cloud client.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// A token valid for at least the next request, refreshed if needed.
    async fn access_token(&self) -> Result<Secret<String>, AppError>;

    /// Forget the current access token after the server rejected it.
    async fn invalidate(&self);
}

/// Fixed token, for service accounts provisioned out of band and for tests.
pub struct StaticToken(Secret<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Secret::new(token.into()))
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> Result<Secret<String>, AppError> {
        Ok(self.0.clone())
    }

    async fn invalidate(&self) {}
}

/// Both sub-brokers behind one handle. Either may be absent when the
/// corresponding directory is not configured.
#[derive(Clone, Default)]
pub struct AuthBroker {
    cloud: Option<Arc<dyn TokenSource>>,
    onprem: Option<Arc<OnPremBroker>>,
}

impl AuthBroker {
    pub fn new(cloud: Option<Arc<dyn TokenSource>>, onprem: Option<Arc<OnPremBroker>>) -> Self {
        Self { cloud, onprem }
    }

    pub fn cloud(&self) -> Option<Arc<dyn TokenSource>> {
        self.cloud.clone()
    }

    pub fn onprem(&self) -> Option<Arc<OnPremBroker>> {
        self.onprem.clone()
    }

    /// Valid cloud bearer token.
    pub async fn credentials(&self) -> Result<Secret<String>, AppError> {
        match &self.cloud {
            Some(source) => source.access_token().await,
            None => Err(AppError::AuthConfigMissing(anyhow::anyhow!(
                "cloud directory credentials are not configured"
            ))),
        }
    }

    /// Logged-in on-prem session.
    pub async fn session(&self) -> Result<OnPremSession, AppError> {
        match &self.onprem {
            Some(broker) => broker.session().await,
            None => Err(AppError::AuthConfigMissing(anyhow::anyhow!(
                "on-prem directory is not configured"
            ))),
        }
    }

    /// Best-effort logout of the on-prem session.
    pub async fn logout(&self) {
        if let Some(broker) = &self.onprem {
            broker.logout().await;
        }
    }
}
