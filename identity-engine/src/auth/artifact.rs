//! On-disk refresh material for the cloud directory.

use chrono::{DateTime, Duration, Utc};
use directory_core::error::AppError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Persisted token set. Written atomically; never logged.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenArtifact {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub scopes: Vec<String>,
    pub token_uri: String,
    pub client_id: String,
}

impl fmt::Debug for TokenArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenArtifact")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .field("client_id", &self.client_id)
            .finish()
    }
}

impl TokenArtifact {
    /// True if the token is expired or will expire within the grace period.
    pub fn is_expired(&self, grace: Duration) -> bool {
        Utc::now() + grace >= self.expires_at
    }

    /// The artifact is only usable for exactly the scope set it was granted for.
    pub fn covers_scopes(&self, scopes: &[String]) -> bool {
        let granted: BTreeSet<&str> = self.scopes.iter().map(String::as_str).collect();
        let wanted: BTreeSet<&str> = scopes.iter().map(String::as_str).collect();
        granted == wanted
    }

    /// Mark the access token as unusable while keeping the refresh token.
    pub fn expire_now(&mut self) {
        self.expires_at = Utc::now() - Duration::seconds(1);
    }

    /// Read the artifact. A missing file is `None`; an unreadable or corrupt
    /// one is logged and treated as missing so the operator can re-consent.
    pub async fn load(path: &Path) -> Result<Option<Self>, AppError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No token artifact on disk");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(artifact) => Ok(Some(artifact)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable token artifact");
                Ok(None)
            }
        }
    }

    /// Write-tmp-then-rename so a concurrently starting process never reads a
    /// half-written file.
    pub async fn save(&self, path: &Path) -> Result<(), AppError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = tmp_path(path);
        let bytes = serde_json::to_vec(self)?;
        tokio::fs::write(&tmp, &bytes).await?;
        restrict_permissions(&tmp).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), "Token artifact written");
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<(), AppError> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<(), AppError> {
    Ok(())
}
