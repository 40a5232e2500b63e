use directory_core::error::AppError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named collection of users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    /// Present for cloud groups, absent on-prem.
    pub email: Option<String>,
    pub description: Option<String>,
    pub member_count: u64,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: None,
            description: None,
            member_count: 0,
        }
    }

    /// Name used to pair groups across directories: the local part of the
    /// group address when there is one, the name otherwise.
    pub fn short_name(&self) -> &str {
        match &self.email {
            Some(email) => super::local_part(email),
            None => &self.name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Owner,
    Member,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Member => "member",
        }
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemberRole {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "owner" => Ok(Self::Owner),
            "member" => Ok(Self::Member),
            other => Err(AppError::Validation(anyhow::anyhow!(
                "'{}' is not a group role (expected owner or member)",
                other
            ))),
        }
    }
}

/// One (group, user) membership edge as seen from the group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub email: String,
    pub role: MemberRole,
}
