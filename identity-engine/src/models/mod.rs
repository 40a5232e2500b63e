//! Canonical directory entities, independent of either backend's wire format.

pub mod acl;
pub mod group;
pub mod user;
pub mod wire;

pub use acl::{CalendarAcl, CalendarEntry, CalendarRole, DocumentAcl, DocumentRole, ScopeType};
pub use group::{Group, Member, MemberRole};
pub use user::{User, UserPatch};

use directory_core::error::AppError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

pub static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$")
        .expect("email pattern is a valid regex")
});

/// Which backend an entity lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Directory {
    Cloud,
    OnPrem,
}

impl Directory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cloud => "cloud",
            Self::OnPrem => "onprem",
        }
    }
}

impl fmt::Display for Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn validate_email(email: &str) -> Result<(), AppError> {
    if EMAIL_REGEX.is_match(email) {
        Ok(())
    } else {
        Err(AppError::Validation(anyhow::anyhow!(
            "'{}' is not a valid email address",
            email
        )))
    }
}

/// The part before `@`; the whole string when there is no `@`.
pub fn local_part(email: &str) -> &str {
    email.split_once('@').map(|(local, _)| local).unwrap_or(email)
}

pub fn domain_part(email: &str) -> Option<&str> {
    email.split_once('@').map(|(_, domain)| domain)
}

/// Cross-directory identity key.
pub fn identity_key(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_pattern() {
        assert!(validate_email("alice@example.com").is_ok());
        assert!(validate_email("a.b+tag@sub.example.co").is_ok());
        assert!(validate_email("c@invalid").is_err());
        assert!(validate_email("no-at-sign.example.com").is_err());
        assert!(validate_email("x@example.c").is_err());
    }

    #[test]
    fn test_local_and_domain_part() {
        assert_eq!(local_part("alice@example.com"), "alice");
        assert_eq!(local_part("engineers"), "engineers");
        assert_eq!(domain_part("alice@example.com"), Some("example.com"));
        assert_eq!(domain_part("alice"), None);
    }

    #[test]
    fn test_identity_key_is_case_folded() {
        assert_eq!(identity_key(" U2@E.com "), "u2@e.com");
    }
}
