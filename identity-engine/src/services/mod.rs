//! High-level operations composed from the directory clients.

pub mod orchestration;
pub mod reconciler;
pub mod reports;

pub use orchestration::OrchestrationService;
pub use reconciler::{Reconciler, BUILTIN_GROUPS};
pub use reports::{
    BulkReport, ComparisonReport, CreateUserReport, ImportReport, ItemOutcome,
    MembershipFailure,
};

use crate::context::OpContext;
use directory_core::error::AppError;
use std::time::Duration;

/// Gate before the `index`-th write of a sequential batch: waits the
/// inter-operation delay (skipped for the first item) and fails with
/// `Cancelled` as soon as the caller cancels.
pub(crate) async fn pace(ctx: &OpContext, delay: Duration, index: usize) -> Result<(), AppError> {
    ctx.check()?;
    if index > 0 && !delay.is_zero() {
        tokio::select! {
            _ = ctx.token().cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }
    ctx.check()
}
