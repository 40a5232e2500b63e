use super::{local_part, EMAIL_REGEX};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

pub const EXTRA_TITLE: &str = "title";
pub const EXTRA_DEPARTMENT: &str = "department";
pub const EXTRA_PHONE: &str = "phone";

/// Canonical identity. `primary_email` is the key across directories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct User {
    /// Local part of the primary address (cloud) or uid (on-prem).
    pub login: String,
    #[validate(regex(path = *EMAIL_REGEX, message = "primary_email is not a valid address"))]
    pub primary_email: String,
    #[validate(length(min = 1, message = "given_name must not be empty"))]
    pub given_name: String,
    #[validate(length(min = 1, message = "family_name must not be empty"))]
    pub family_name: String,
    pub org_path: String,
    pub suspended: bool,
    /// Set by the directory; ignored on create.
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub extras: BTreeMap<String, String>,
}

impl User {
    pub fn new(
        primary_email: impl Into<String>,
        given_name: impl Into<String>,
        family_name: impl Into<String>,
    ) -> Self {
        let primary_email = primary_email.into();
        Self {
            login: local_part(&primary_email).to_string(),
            primary_email,
            given_name: given_name.into(),
            family_name: family_name.into(),
            org_path: "/".to_string(),
            suspended: false,
            created_at: None,
            extras: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<String>) -> Self {
        self.extras.insert(key.to_string(), value.into());
        self
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.given_name, self.family_name)
    }

    pub fn title(&self) -> Option<&str> {
        self.extras.get(EXTRA_TITLE).map(String::as_str)
    }

    pub fn department(&self) -> Option<&str> {
        self.extras.get(EXTRA_DEPARTMENT).map(String::as_str)
    }

    /// Copy of this user shaped for creation in the other directory:
    /// login re-derived from the address, names verbatim, title and department kept.
    pub fn for_cross_directory_create(&self) -> User {
        let mut extras = BTreeMap::new();
        for key in [EXTRA_TITLE, EXTRA_DEPARTMENT] {
            if let Some(value) = self.extras.get(key) {
                extras.insert(key.to_string(), value.clone());
            }
        }
        User {
            login: local_part(&self.primary_email).to_string(),
            primary_email: self.primary_email.clone(),
            given_name: self.given_name.clone(),
            family_name: self.family_name.clone(),
            org_path: "/".to_string(),
            suspended: false,
            created_at: None,
            extras,
        }
    }

    /// Attributes compared by the create/read invariant; `created_at` is server-owned.
    pub fn same_attributes(&self, other: &User) -> bool {
        self.login == other.login
            && self.primary_email.eq_ignore_ascii_case(&other.primary_email)
            && self.given_name == other.given_name
            && self.family_name == other.family_name
            && self.org_path == other.org_path
            && self.suspended == other.suspended
            && self.extras == other.extras
    }
}

/// Field mask for an update: only `Some` fields are sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPatch {
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub org_path: Option<String>,
    pub suspended: Option<bool>,
    pub extras: Option<BTreeMap<String, String>>,
}

impl UserPatch {
    pub fn suspended(suspended: bool) -> Self {
        Self {
            suspended: Some(suspended),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.given_name.is_none()
            && self.family_name.is_none()
            && self.org_path.is_none()
            && self.suspended.is_none()
            && self.extras.is_none()
    }

    pub fn apply(&self, user: &mut User) {
        if let Some(given) = &self.given_name {
            user.given_name = given.clone();
        }
        if let Some(family) = &self.family_name {
            user.family_name = family.clone();
        }
        if let Some(path) = &self.org_path {
            user.org_path = path.clone();
        }
        if let Some(suspended) = self.suspended {
            user.suspended = suspended;
        }
        if let Some(extras) = &self.extras {
            user.extras.extend(extras.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }
}
