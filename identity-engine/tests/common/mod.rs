#![allow(dead_code)]

use directory_core::retry::RetryConfig;
use identity_engine::auth::{OnPremBroker, StaticToken, TokenSource};
use identity_engine::clients::{IpaClient, WorkspaceClient};
use identity_engine::config::{HttpConfig, OnPremConfig};
use identity_engine::services::OrchestrationService;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::MockServer;

// Test constants
pub const TEST_TOKEN: &str = "test-token";
pub const TEST_DOMAIN: &str = "example.com";
pub const TEST_CUSTOMER: &str = "my_customer";
pub const USERS_PATH: &str = "/admin/directory/v1/users";
pub const LOGIN_PATH: &str = "/ipa/session/login_password";
pub const RPC_PATH: &str = "/ipa/session/json";

/// Short backoff so retry tests stay fast but measurable.
pub const TEST_BACKOFF_MS: u64 = 150;

pub fn test_retry() -> RetryConfig {
    RetryConfig::new(3, TEST_BACKOFF_MS)
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

/// Cloud directory mocked by a local server.
pub struct TestCloud {
    pub server: MockServer,
    pub client: Arc<WorkspaceClient>,
}

impl TestCloud {
    pub async fn spawn() -> Self {
        Self::spawn_with(Arc::new(StaticToken::new(TEST_TOKEN))).await
    }

    pub async fn spawn_with(tokens: Arc<dyn TokenSource>) -> Self {
        let server = MockServer::start().await;
        let client = WorkspaceClient::new(tokens, TEST_CUSTOMER, &HttpConfig::default())
            .with_api_root(&server.uri())
            .expect("Mock server URI is a valid API root")
            .with_retry(test_retry());

        TestCloud {
            server,
            client: Arc::new(client),
        }
    }

    /// Facade over the mocked cloud directory only.
    pub fn service(&self, inter_op_delay: Duration) -> OrchestrationService {
        OrchestrationService::new(Some(self.client.clone()), None, inter_op_delay)
    }
}

/// On-prem server mocked by a local server.
pub struct TestOnPrem {
    pub server: MockServer,
    pub broker: Arc<OnPremBroker>,
    pub client: Arc<IpaClient>,
}

impl TestOnPrem {
    pub async fn spawn(username: &str) -> Self {
        let server = MockServer::start().await;
        let config: OnPremConfig = serde_json::from_value(json!({
            "server_url": server.uri(),
            "domain": TEST_DOMAIN,
            "username": username,
            "password": "pw",
            "timeout_seconds": 5
        }))
        .expect("Failed to build on-prem config");

        let broker = Arc::new(OnPremBroker::new(&config).expect("Failed to build broker"));
        let client = IpaClient::new(
            broker.clone(),
            TEST_DOMAIN,
            config.api_version.clone(),
            &HttpConfig::default(),
        )
        .with_retry(test_retry());

        TestOnPrem {
            server,
            broker,
            client: Arc::new(client),
        }
    }
}

/// Token source that hands out `token-<n>` and moves to the next `n` on
/// every invalidation.
#[derive(Default)]
pub struct RotatingToken {
    generation: AtomicUsize,
}

impl RotatingToken {
    pub fn invalidations(&self) -> usize {
        self.generation.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TokenSource for RotatingToken {
    async fn access_token(&self) -> Result<secrecy::Secret<String>, directory_core::AppError> {
        Ok(secrecy::Secret::new(format!(
            "token-{}",
            self.generation.load(Ordering::SeqCst)
        )))
    }

    async fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

// ===== Wire fixtures =====

pub fn user_json(email: &str, given: &str, family: &str) -> Value {
    json!({
        "id": format!("id-{}", email),
        "primaryEmail": email,
        "name": { "givenName": given, "familyName": family },
        "orgUnitPath": "/",
        "suspended": false,
        "creationTime": "2024-01-31T12:00:00.000Z"
    })
}

pub fn users_page(users: Vec<Value>, next_page_token: Option<&str>) -> Value {
    match next_page_token {
        Some(token) => json!({ "users": users, "nextPageToken": token }),
        None => json!({ "users": users }),
    }
}

pub fn member_json(email: &str, role: &str) -> Value {
    json!({ "email": email, "role": role, "type": "USER", "status": "ACTIVE" })
}

pub fn google_error(code: u16, message: &str, reason: &str) -> Value {
    json!({
        "error": {
            "code": code,
            "message": message,
            "errors": [{ "reason": reason, "message": message }]
        }
    })
}

/// Successful JSON-RPC envelope around `result`.
pub fn rpc_ok(result: Value) -> Value {
    json!({
        "result": { "result": result, "summary": null },
        "error": null,
        "id": 0
    })
}

pub fn rpc_err(code: i64, name: &str, message: &str) -> Value {
    json!({
        "result": null,
        "error": { "code": code, "name": name, "message": message },
        "id": 0
    })
}

pub fn ipa_user(uid: &str, mail: &str, given: &str, family: &str) -> Value {
    json!({
        "uid": [uid],
        "mail": [mail],
        "givenname": [given],
        "sn": [family],
        "nsaccountlock": false
    })
}

/// Membership call result; `rejected` holds the `[uid, reason]` pairs the
/// server refused.
pub fn rpc_membership(group: &str, rejected: Value) -> Value {
    let completed = match rejected.as_array() {
        Some(items) if !items.is_empty() => 0,
        _ => 1,
    };
    json!({
        "result": {
            "result": { "cn": [group] },
            "failed": { "member": { "group": [], "user": rejected } },
            "completed": completed
        },
        "error": null,
        "id": 0
    })
}
