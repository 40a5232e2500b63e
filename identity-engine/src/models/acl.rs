use directory_core::error::AppError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Calendar ACL
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeType {
    User,
    Group,
    Domain,
    Default,
}

impl ScopeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Group => "group",
            Self::Domain => "domain",
            Self::Default => "default",
        }
    }
}

impl FromStr for ScopeType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "group" => Ok(Self::Group),
            "domain" => Ok(Self::Domain),
            "default" => Ok(Self::Default),
            other => Err(AppError::Validation(anyhow::anyhow!(
                "'{}' is not a calendar scope type",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CalendarRole {
    #[serde(rename = "owner")]
    Owner,
    #[serde(rename = "writer")]
    Writer,
    #[serde(rename = "reader")]
    Reader,
    #[serde(rename = "freeBusyReader")]
    FreeBusyReader,
}

impl CalendarRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Writer => "writer",
            Self::Reader => "reader",
            Self::FreeBusyReader => "freeBusyReader",
        }
    }
}

impl fmt::Display for CalendarRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CalendarRole {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Self::Owner),
            "writer" => Ok(Self::Writer),
            "reader" => Ok(Self::Reader),
            "freeBusyReader" => Ok(Self::FreeBusyReader),
            other => Err(AppError::Validation(anyhow::anyhow!(
                "'{}' is not a calendar role (expected owner, writer, reader or freeBusyReader)",
                other
            ))),
        }
    }
}

/// One access rule on a calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarAcl {
    pub calendar_id: String,
    /// Server-assigned rule id (`user:alice@example.com`); absent before creation.
    pub rule_id: Option<String>,
    pub scope_type: ScopeType,
    pub scope_value: String,
    pub role: CalendarRole,
}

impl CalendarAcl {
    pub fn for_user(
        calendar_id: impl Into<String>,
        email: impl Into<String>,
        role: CalendarRole,
    ) -> Self {
        Self {
            calendar_id: calendar_id.into(),
            rule_id: None,
            scope_type: ScopeType::User,
            scope_value: email.into(),
            role,
        }
    }

    pub fn matches_scope(&self, scope_type: ScopeType, value: &str) -> bool {
        self.scope_type == scope_type && self.scope_value.eq_ignore_ascii_case(value)
    }
}

/// Calendar list entry visible to the authenticated operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEntry {
    pub id: String,
    pub summary: String,
    pub access_role: Option<String>,
    pub primary: bool,
}

// ============================================================================
// Document ACL
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentRole {
    Owner,
    Writer,
    Commenter,
    Reader,
}

impl DocumentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Writer => "writer",
            Self::Commenter => "commenter",
            Self::Reader => "reader",
        }
    }
}

impl fmt::Display for DocumentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentRole {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Self::Owner),
            "writer" => Ok(Self::Writer),
            "commenter" => Ok(Self::Commenter),
            "reader" => Ok(Self::Reader),
            other => Err(AppError::Validation(anyhow::anyhow!(
                "'{}' is not a document role (expected owner, writer, commenter or reader)",
                other
            ))),
        }
    }
}

/// One permission on a drive document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentAcl {
    pub document_id: String,
    pub grantee_email: String,
    pub role: DocumentRole,
    pub permission_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calendar_role_round_trips_through_str() {
        for role in [
            CalendarRole::Owner,
            CalendarRole::Writer,
            CalendarRole::Reader,
            CalendarRole::FreeBusyReader,
        ] {
            assert_eq!(role.as_str().parse::<CalendarRole>().unwrap(), role);
        }
        assert!("editor".parse::<CalendarRole>().is_err());
    }

    #[test]
    fn test_document_role_rejects_unknown() {
        assert_eq!("commenter".parse::<DocumentRole>().unwrap(), DocumentRole::Commenter);
        let err = "organizer".parse::<DocumentRole>().unwrap_err();
        assert_eq!(err.kind(), directory_core::ErrorKind::Validation);
    }

    #[test]
    fn test_scope_match_is_case_insensitive() {
        let rule = CalendarAcl::for_user("cal", "Alice@Example.com", CalendarRole::Reader);
        assert!(rule.matches_scope(ScopeType::User, "alice@example.com"));
        assert!(!rule.matches_scope(ScopeType::Group, "alice@example.com"));
    }
}
