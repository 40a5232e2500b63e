//! Engine assembly from configuration.

use crate::auth::{AuthBroker, CloudBroker, OnPremBroker, TokenSource};
use crate::clients::{IpaClient, WorkspaceClient};
use crate::config::ConsoleConfig;
use crate::services::{OrchestrationService, Reconciler};
use directory_core::error::AppError;
use std::sync::Arc;

/// Everything a caller needs: the auth broker for session management, the
/// orchestration facade and, when both directories are configured, the
/// reconciler.
pub struct Console {
    config: ConsoleConfig,
    auth: AuthBroker,
    service: OrchestrationService,
}

impl Console {
    /// Wire brokers and clients. No network traffic happens here; credentials
    /// are acquired on first use.
    pub fn build(config: ConsoleConfig) -> Result<Self, AppError> {
        let cloud_broker: Arc<dyn TokenSource> = Arc::new(CloudBroker::new(&config.cloud));
        let workspace = Arc::new(WorkspaceClient::new(
            cloud_broker.clone(),
            config.cloud.customer.clone(),
            &config.http,
        ));

        let (onprem_broker, ipa) = match &config.onprem {
            Some(onprem) => {
                let broker = Arc::new(OnPremBroker::new(onprem).map_err(|e| {
                    tracing::error!(error = %e, "Invalid on-prem directory settings");
                    e
                })?);
                let client = IpaClient::new(
                    broker.clone(),
                    onprem.domain.clone(),
                    onprem.api_version.clone(),
                    &config.http,
                );
                tracing::info!(
                    server = %broker.base_url(),
                    domain = %onprem.domain,
                    "On-prem directory configured"
                );
                (Some(broker), Some(Arc::new(client)))
            }
            None => {
                tracing::info!("On-prem directory not configured - reconciliation is unavailable");
                (None, None)
            }
        };

        let auth = AuthBroker::new(Some(cloud_broker), onprem_broker);
        let service = OrchestrationService::new(
            Some(workspace),
            ipa,
            config.bulk.inter_op_delay(),
        );

        tracing::info!(
            artifact = %config.cloud.token_artifact_path.display(),
            scopes = config.cloud.scopes.len(),
            max_retries = config.http.max_retries,
            inter_op_delay_ms = config.bulk.inter_op_delay_ms,
            "Identity engine assembled"
        );

        Ok(Self {
            config,
            auth,
            service,
        })
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    pub fn auth(&self) -> &AuthBroker {
        &self.auth
    }

    pub fn service(&self) -> &OrchestrationService {
        &self.service
    }

    pub fn reconciler(&self) -> Result<Reconciler, AppError> {
        Reconciler::from_service(&self.service)
    }
}
