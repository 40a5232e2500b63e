use crate::retry::OperationClass;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Discriminant of [`AppError`], cheap to copy into per-item reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AuthConfigMissing,
    AuthInvalid,
    AuthExpired,
    AuthDenied,
    AuthTransient,
    PermissionDenied,
    NotFound,
    Conflict,
    Validation,
    RateLimited,
    Transient,
    Cancelled,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthConfigMissing => "auth_config_missing",
            Self::AuthInvalid => "auth_invalid",
            Self::AuthExpired => "auth_expired",
            Self::AuthDenied => "auth_denied",
            Self::AuthTransient => "auth_transient",
            Self::PermissionDenied => "permission_denied",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Validation => "validation",
            Self::RateLimited => "rate_limited",
            Self::Transient => "transient",
            Self::Cancelled => "cancelled",
            Self::Config => "config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Credentials not configured: {0}")]
    AuthConfigMissing(anyhow::Error),

    #[error("Authentication rejected: {0}")]
    AuthInvalid(anyhow::Error),

    #[error("Session expired: {0}")]
    AuthExpired(anyhow::Error),

    #[error("Consent declined: {0}")]
    AuthDenied(anyhow::Error),

    #[error("Authentication temporarily unavailable: {0}")]
    AuthTransient(anyhow::Error),

    #[error("Permission denied: {0}")]
    PermissionDenied(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    #[error("Validation error: {0}")]
    Validation(anyhow::Error),

    #[error("Rate limited: {0}")]
    RateLimited(anyhow::Error, Option<u64>),

    #[error("Transient failure: {0}")]
    Transient(anyhow::Error),

    #[error("Cancelled: {0}")]
    Cancelled(anyhow::Error),

    #[error("Configuration error: {0}")]
    Config(anyhow::Error),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::AuthConfigMissing(_) => ErrorKind::AuthConfigMissing,
            AppError::AuthInvalid(_) => ErrorKind::AuthInvalid,
            AppError::AuthExpired(_) => ErrorKind::AuthExpired,
            AppError::AuthDenied(_) => ErrorKind::AuthDenied,
            AppError::AuthTransient(_) => ErrorKind::AuthTransient,
            AppError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Conflict(_) => ErrorKind::Conflict,
            AppError::Validation(_) => ErrorKind::Validation,
            AppError::RateLimited(_, _) => ErrorKind::RateLimited,
            AppError::Transient(_) => ErrorKind::Transient,
            AppError::Cancelled(_) => ErrorKind::Cancelled,
            AppError::Config(_) => ErrorKind::Config,
        }
    }

    fn inner(&self) -> &anyhow::Error {
        match self {
            AppError::AuthConfigMissing(e)
            | AppError::AuthInvalid(e)
            | AppError::AuthExpired(e)
            | AppError::AuthDenied(e)
            | AppError::AuthTransient(e)
            | AppError::PermissionDenied(e)
            | AppError::NotFound(e)
            | AppError::Conflict(e)
            | AppError::Validation(e)
            | AppError::RateLimited(e, _)
            | AppError::Transient(e)
            | AppError::Cancelled(e)
            | AppError::Config(e) => e,
        }
    }

    /// Short message suitable for an operator-facing dialog.
    pub fn message(&self) -> String {
        self.inner().to_string()
    }

    /// Message followed by the full cause chain, for logs.
    pub fn detail(&self) -> String {
        format!("{}: {:#}", self.kind(), self.inner())
    }

    /// Seconds the server asked us to wait, when it said so.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            AppError::RateLimited(_, retry) => *retry,
            _ => None,
        }
    }

    /// Reads may be retried on any transient condition. Writes are retried only
    /// when the server confirmed it did not apply the request (429).
    pub fn is_retryable(&self, class: OperationClass) -> bool {
        match class {
            OperationClass::Read => matches!(
                self,
                AppError::RateLimited(_, _) | AppError::Transient(_) | AppError::AuthTransient(_)
            ),
            OperationClass::Write => matches!(self, AppError::RateLimited(_, _)),
        }
    }

    /// Map an HTTP status returned by a directory backend to an error kind.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400 | 422 => AppError::Validation(anyhow::anyhow!(message)),
            401 => AppError::AuthInvalid(anyhow::anyhow!(message)),
            403 => AppError::PermissionDenied(anyhow::anyhow!(message)),
            404 | 410 => AppError::NotFound(anyhow::anyhow!(message)),
            409 => AppError::Conflict(anyhow::anyhow!(message)),
            429 => AppError::RateLimited(anyhow::anyhow!(message), None),
            500..=599 => AppError::Transient(anyhow::anyhow!(message)),
            _ => AppError::Validation(anyhow::anyhow!(
                "unexpected status {}: {}",
                status,
                message
            )),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(anyhow::Error::new(err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(anyhow::Error::new(err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Validation(anyhow::Error::new(err).context("malformed payload"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => AppError::NotFound(anyhow::Error::new(err)),
            std::io::ErrorKind::PermissionDenied => {
                AppError::PermissionDenied(anyhow::Error::new(err))
            }
            _ => AppError::Transient(anyhow::Error::new(err)),
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return AppError::Transient(
                anyhow::Error::new(err).context("request deadline exceeded"),
            );
        }
        if err.is_decode() {
            return AppError::Validation(anyhow::Error::new(err).context("malformed response body"));
        }
        if let Some(status) = err.status() {
            return AppError::from_status(status.as_u16(), err.to_string());
        }
        AppError::Transient(anyhow::Error::new(err).context("network failure"))
    }
}
