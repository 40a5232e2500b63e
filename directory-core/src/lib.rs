//! directory-core: Shared infrastructure for the identity console crates.
pub mod config;
pub mod error;
pub mod observability;
pub mod retry;

pub use error::{AppError, ErrorKind};
pub use retry::{OperationClass, RetryConfig, retry_call};

pub use serde;
pub use serde_json;
pub use tokio;
pub use tracing;
