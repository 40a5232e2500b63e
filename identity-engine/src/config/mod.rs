//! Configuration module for the identity engine.

use directory_core::config as core_config;
use directory_core::error::AppError;
use directory_core::retry::RetryConfig;
use secrecy::Secret;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CREDENTIALS_ENV: &str = "CLOUD_CREDENTIALS_PATH";
pub const DEFAULT_CREDENTIALS_ENV: &str = "APPLICATION_DEFAULT_CREDENTIALS";

/// Scopes needed for the directory, calendar and drive operation set.
pub const DEFAULT_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/admin.directory.user",
    "https://www.googleapis.com/auth/admin.directory.group",
    "https://www.googleapis.com/auth/admin.directory.group.member",
    "https://www.googleapis.com/auth/admin.directory.orgunit.readonly",
    "https://www.googleapis.com/auth/calendar",
    "https://www.googleapis.com/auth/drive",
];

#[derive(Debug, Clone, Deserialize)]
pub struct ConsoleConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    #[serde(default)]
    pub cloud: CloudConfig,
    pub onprem: Option<OnPremConfig>,
    #[serde(default)]
    pub bulk: BulkConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudConfig {
    /// Explicit client-secrets path; consulted after the env and `./config` locations.
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
    #[serde(default = "default_token_artifact_path")]
    pub token_artifact_path: PathBuf,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    /// Customer id used for directory listings when no domain filter is given.
    #[serde(default = "default_customer")]
    pub customer: String,
    #[serde(default)]
    pub domain: Option<String>,
    /// Seconds to wait for the operator to finish the consent page.
    #[serde(default = "default_consent_timeout")]
    pub consent_timeout_seconds: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            credentials_path: None,
            token_artifact_path: default_token_artifact_path(),
            scopes: default_scopes(),
            customer: default_customer(),
            domain: None,
            consent_timeout_seconds: default_consent_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OnPremConfig {
    pub server_url: String,
    pub domain: String,
    pub username: String,
    pub password: Secret<String>,
    #[serde(default = "default_true")]
    pub verify_tls: bool,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

impl OnPremConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Kerberos realm derived from the configured domain.
    pub fn realm(&self) -> String {
        self.domain.to_uppercase()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkConfig {
    #[serde(default = "default_inter_op_delay_ms")]
    pub inter_op_delay_ms: u64,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            inter_op_delay_ms: default_inter_op_delay_ms(),
        }
    }
}

impl BulkConfig {
    pub fn inter_op_delay(&self) -> Duration {
        Duration::from_millis(self.inter_op_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_timeout_seconds")]
    pub read_timeout_seconds: u64,
    #[serde(default = "default_timeout_seconds")]
    pub write_timeout_seconds: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            read_timeout_seconds: default_timeout_seconds(),
            write_timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl HttpConfig {
    pub fn retry(&self) -> RetryConfig {
        RetryConfig::new(self.max_retries, self.initial_backoff_ms)
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            read: Duration::from_secs(self.read_timeout_seconds),
            write: Duration::from_secs(self.write_timeout_seconds),
        }
    }
}

/// Per operation class request deadlines.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub read: Duration,
    pub write: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(default_timeout_seconds()),
            write: Duration::from_secs(default_timeout_seconds()),
        }
    }
}

fn default_token_artifact_path() -> PathBuf {
    PathBuf::from("./config/token.bin")
}

fn default_scopes() -> Vec<String> {
    DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()
}

fn default_customer() -> String {
    "my_customer".to_string()
}

fn default_consent_timeout() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_api_version() -> String {
    "2.251".to_string()
}

fn default_inter_op_delay_ms() -> u64 {
    500
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

impl ConsoleConfig {
    pub fn load() -> Result<Self, AppError> {
        core_config::load_layered("config/console")
    }
}

/// Locate the client-secrets file.
///
/// Order: `CLOUD_CREDENTIALS_PATH`, `APPLICATION_DEFAULT_CREDENTIALS`,
/// `./config/credentials.json`, the explicit argument, `./credentials.json`.
/// Only candidates that exist on disk are accepted.
pub fn resolve_credentials_path(explicit: Option<&Path>) -> Result<PathBuf, AppError> {
    resolve_credentials_path_in(Path::new("."), explicit)
}

pub fn resolve_credentials_path_in(
    base_dir: &Path,
    explicit: Option<&Path>,
) -> Result<PathBuf, AppError> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    for var in [CREDENTIALS_ENV, DEFAULT_CREDENTIALS_ENV] {
        if let Ok(value) = std::env::var(var) {
            if !value.trim().is_empty() {
                candidates.push(PathBuf::from(value));
            }
        }
    }
    candidates.push(base_dir.join("config").join("credentials.json"));
    if let Some(path) = explicit {
        candidates.push(path.to_path_buf());
    }
    candidates.push(base_dir.join("credentials.json"));

    candidates
        .iter()
        .find(|path| path.is_file())
        .cloned()
        .ok_or_else(|| {
            AppError::AuthConfigMissing(anyhow::anyhow!(
                "No client secrets file found (checked {})",
                candidates
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use directory_core::ErrorKind;
    use serial_test::serial;

    fn clear_env() {
        std::env::remove_var(CREDENTIALS_ENV);
        std::env::remove_var(DEFAULT_CREDENTIALS_ENV);
    }

    #[test]
    #[serial]
    fn test_env_path_wins() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let from_env = dir.path().join("env.json");
        std::fs::write(&from_env, "{}").unwrap();
        std::fs::create_dir_all(dir.path().join("config")).unwrap();
        std::fs::write(dir.path().join("config/credentials.json"), "{}").unwrap();

        std::env::set_var(CREDENTIALS_ENV, &from_env);
        let resolved = resolve_credentials_path_in(dir.path(), None);
        clear_env();

        assert_eq!(resolved.unwrap(), from_env);
    }

    #[test]
    #[serial]
    fn test_config_dir_precedes_explicit_argument() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("config")).unwrap();
        std::fs::write(dir.path().join("config/credentials.json"), "{}").unwrap();
        let explicit = dir.path().join("explicit.json");
        std::fs::write(&explicit, "{}").unwrap();

        let resolved = resolve_credentials_path_in(dir.path(), Some(&explicit)).unwrap();
        assert_eq!(resolved, dir.path().join("config/credentials.json"));
    }

    #[test]
    #[serial]
    fn test_explicit_then_working_dir_fallback() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("credentials.json"), "{}").unwrap();

        let missing = dir.path().join("missing.json");
        let resolved = resolve_credentials_path_in(dir.path(), Some(&missing)).unwrap();
        assert_eq!(resolved, dir.path().join("credentials.json"));
    }

    #[test]
    #[serial]
    fn test_nothing_found_is_auth_config_missing() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_credentials_path_in(dir.path(), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthConfigMissing);
    }

    #[test]
    fn test_defaults() {
        let http = HttpConfig::default();
        assert_eq!(http.max_retries, 3);
        assert_eq!(http.initial_backoff_ms, 1000);
        assert_eq!(BulkConfig::default().inter_op_delay_ms, 500);
        let cloud = CloudConfig::default();
        assert_eq!(cloud.token_artifact_path, PathBuf::from("./config/token.bin"));
        assert_eq!(cloud.scopes.len(), DEFAULT_SCOPES.len());
    }

    #[test]
    fn test_onprem_defaults_verify_tls() {
        let onprem: OnPremConfig = serde_json::from_value(serde_json::json!({
            "server_url": "ipa.example.com",
            "domain": "example.com",
            "username": "admin",
            "password": "secret"
        }))
        .unwrap();
        assert!(onprem.verify_tls);
        assert_eq!(onprem.timeout_seconds, 30);
        assert_eq!(onprem.realm(), "EXAMPLE.COM");
    }
}
