//! HTTP response classification shared by both clients.

use crate::models::wire::workspace::WsErrorEnvelope;
use directory_core::error::AppError;
use reqwest::header::RETRY_AFTER;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;

/// `403` reasons the cloud API uses for quota exhaustion instead of `429`.
const RATE_LIMIT_REASONS: &[&str] = &[
    "rateLimitExceeded",
    "userRateLimitExceeded",
    "quotaExceeded",
];

const MAX_MESSAGE_CHARS: usize = 300;

/// Body of a successful response, or the classified error.
pub async fn read_body(response: Response) -> Result<Vec<u8>, AppError> {
    if response.status().is_success() {
        Ok(response.bytes().await?.to_vec())
    } else {
        Err(error_from_response(response).await)
    }
}

pub fn parse_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, AppError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Map a non-success response to an error kind with a readable message.
pub async fn error_from_response(response: Response) -> AppError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    classify(status, &body, retry_after)
}

pub fn classify(status: StatusCode, body: &str, retry_after: Option<u64>) -> AppError {
    let (message, reasons) = match serde_json::from_str::<WsErrorEnvelope>(body) {
        Ok(envelope) => (
            envelope.error.message,
            envelope
                .error
                .errors
                .into_iter()
                .map(|e| e.reason)
                .collect::<Vec<_>>(),
        ),
        Err(_) => (body.trim().chars().take(MAX_MESSAGE_CHARS).collect(), Vec::new()),
    };
    let message = if message.is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        message
    };
    let message = format!("{} (HTTP {})", message, status.as_u16());

    if status == StatusCode::FORBIDDEN
        && reasons.iter().any(|r| RATE_LIMIT_REASONS.contains(&r.as_str()))
    {
        return AppError::RateLimited(anyhow::anyhow!(message), retry_after);
    }
    match AppError::from_status(status.as_u16(), message) {
        AppError::RateLimited(e, _) => AppError::RateLimited(e, retry_after),
        other => other,
    }
}
