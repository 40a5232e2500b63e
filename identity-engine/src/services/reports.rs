//! Results returned by bulk and comparison operations.

use directory_core::error::{AppError, ErrorKind};
use serde::Serialize;
use std::collections::BTreeMap;

/// Terminal result for one item of a bulk operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    Added,
    Created,
    AlreadyPresent,
    Failed { kind: ErrorKind, message: String },
}

impl ItemOutcome {
    pub fn failed(err: &AppError) -> Self {
        Self::Failed {
            kind: err.kind(),
            message: err.message(),
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

/// One entry per input, in input order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkReport {
    pub outcomes: Vec<(String, ItemOutcome)>,
    /// Set when the caller cancelled before every item was processed.
    pub cancelled: bool,
}

impl BulkReport {
    pub fn push(&mut self, key: impl Into<String>, outcome: ItemOutcome) {
        self.outcomes.push((key.into(), outcome));
    }

    pub fn get(&self, key: &str) -> Option<&ItemOutcome> {
        self.outcomes.iter().find(|(k, _)| k == key).map(|(_, o)| o)
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// A follow-up enrollment that failed after its user was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MembershipFailure {
    pub email: String,
    pub group: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Per-key outcomes of an import or export, keyed by email or group name.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub outcomes: BTreeMap<String, ItemOutcome>,
    pub membership_failures: Vec<MembershipFailure>,
    pub cancelled: bool,
}

impl ImportReport {
    pub fn record(&mut self, key: impl Into<String>, outcome: ItemOutcome) {
        self.outcomes.insert(key.into(), outcome);
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Set difference between the two directories, keys case-folded and sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ComparisonReport {
    pub only_in_cloud: Vec<String>,
    pub only_in_onprem: Vec<String>,
    pub in_both: Vec<String>,
    pub total_cloud: usize,
    pub total_onprem: usize,
}

/// A created user plus the initial groups it could not be added to.
#[derive(Debug, Clone, Serialize)]
pub struct CreateUserReport {
    pub user: crate::models::User,
    pub group_failures: Vec<(String, ItemOutcome)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_lookup() {
        let mut report = BulkReport::default();
        report.push("a@example.com", ItemOutcome::Added);
        report.push("b@example.com", ItemOutcome::AlreadyPresent);
        report.push(
            "c@invalid",
            ItemOutcome::failed(&AppError::Validation(anyhow::anyhow!("bad address"))),
        );
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert!(matches!(
            report.get("c@invalid"),
            Some(ItemOutcome::Failed { kind: ErrorKind::Validation, .. })
        ));
    }

    #[test]
    fn test_outcome_serializes_with_tag() {
        let value = serde_json::to_value(ItemOutcome::failed(&AppError::Conflict(anyhow::anyhow!(
            "already a member"
        ))))
        .unwrap();
        assert_eq!(value["outcome"], "failed");
        assert_eq!(value["kind"], "conflict");
    }
}
