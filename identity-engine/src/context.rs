//! Per-operation cancellation and deadline.

use directory_core::error::AppError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Carried by every client operation. Cloning shares the same cancellation.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl OpContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Child context: cancelled with the parent, cancellable on its own.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Error out if the caller cancelled or the overall deadline passed.
    pub fn check(&self) -> Result<(), AppError> {
        if self.cancel.is_cancelled() {
            return Err(AppError::Cancelled(anyhow::anyhow!("operation cancelled by caller")));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(AppError::Cancelled(anyhow::anyhow!("operation deadline exceeded")));
        }
        Ok(())
    }

    /// Run one request under the operation-class timeout, clipped to the
    /// context deadline. A request timeout surfaces as `Transient`; caller
    /// cancellation or the context deadline surfaces as `Cancelled`.
    pub async fn run<F, T>(&self, request_timeout: Duration, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        self.check()?;
        let request_deadline = Instant::now() + request_timeout;
        let (effective, from_context) = match self.deadline {
            Some(d) if d < request_deadline => (d, true),
            _ => (request_deadline, false),
        };

        tokio::select! {
            _ = self.cancel.cancelled() => {
                Err(AppError::Cancelled(anyhow::anyhow!("operation cancelled by caller")))
            }
            result = tokio::time::timeout_at(effective, fut) => match result {
                Ok(inner) => inner,
                Err(_) if from_context => {
                    Err(AppError::Cancelled(anyhow::anyhow!("operation deadline exceeded")))
                }
                Err(_) => Err(AppError::Transient(anyhow::anyhow!(
                    "request deadline of {}s exceeded",
                    request_timeout.as_secs_f64()
                ))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use directory_core::ErrorKind;

    #[tokio::test]
    async fn test_request_timeout_is_transient() {
        let ctx = OpContext::new();
        let result: Result<(), _> = ctx
            .run(Duration::from_millis(10), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Transient);
    }

    #[tokio::test]
    async fn test_context_deadline_is_cancelled() {
        let ctx = OpContext::new().with_timeout(Duration::from_millis(10));
        let result: Result<(), _> = ctx
            .run(Duration::from_secs(5), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_cancelled_parent_cancels_child() {
        let parent = OpContext::new();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
        assert_eq!(child.check().unwrap_err().kind(), ErrorKind::Cancelled);
    }
}
