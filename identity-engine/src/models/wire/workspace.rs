//! Cloud directory (Admin SDK, Calendar, Drive) JSON shapes.

use crate::models::user::{EXTRA_DEPARTMENT, EXTRA_PHONE, EXTRA_TITLE};
use crate::models::{
    local_part, CalendarAcl, CalendarEntry, CalendarRole, DocumentAcl, DocumentRole, Group,
    Member, MemberRole, ScopeType, User, UserPatch,
};
use chrono::{DateTime, Utc};
use directory_core::error::AppError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

// ============================================================================
// Users
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsUserName {
    #[serde(default)]
    pub given_name: String,
    #[serde(default)]
    pub family_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsOrganization {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsPhone {
    pub value: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub primary_email: String,
    #[serde(default)]
    pub name: WsUserName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_unit_path: Option<String>,
    #[serde(default)]
    pub suspended: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub organizations: Vec<WsOrganization>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phones: Vec<WsPhone>,
}

impl WsUser {
    pub fn from_user(user: &User) -> Self {
        let organizations = if user.title().is_some() || user.department().is_some() {
            vec![WsOrganization {
                title: user.title().map(str::to_string),
                department: user.department().map(str::to_string),
                primary: Some(true),
            }]
        } else {
            Vec::new()
        };
        let phones = user
            .extras
            .get(EXTRA_PHONE)
            .map(|phone| {
                vec![WsPhone {
                    value: phone.clone(),
                    kind: Some("work".to_string()),
                    primary: Some(true),
                }]
            })
            .unwrap_or_default();

        Self {
            id: None,
            primary_email: user.primary_email.clone(),
            name: WsUserName {
                given_name: user.given_name.clone(),
                family_name: user.family_name.clone(),
                full_name: None,
            },
            org_unit_path: Some(user.org_path.clone()),
            suspended: user.suspended,
            creation_time: user.created_at,
            organizations,
            phones,
        }
    }

    pub fn into_user(self) -> Result<User, AppError> {
        if self.primary_email.is_empty() {
            return Err(AppError::Validation(anyhow::anyhow!(
                "directory user without primaryEmail"
            )));
        }

        let mut extras = BTreeMap::new();
        let organization = self
            .organizations
            .iter()
            .find(|o| o.primary == Some(true))
            .or_else(|| self.organizations.first());
        if let Some(org) = organization {
            if let Some(title) = org.title.as_ref().filter(|t| !t.is_empty()) {
                extras.insert(EXTRA_TITLE.to_string(), title.clone());
            }
            if let Some(department) = org.department.as_ref().filter(|d| !d.is_empty()) {
                extras.insert(EXTRA_DEPARTMENT.to_string(), department.clone());
            }
        }
        let phone = self
            .phones
            .iter()
            .find(|p| p.primary == Some(true))
            .or_else(|| self.phones.first());
        if let Some(phone) = phone {
            extras.insert(EXTRA_PHONE.to_string(), phone.value.clone());
        }

        Ok(User {
            login: local_part(&self.primary_email).to_string(),
            primary_email: self.primary_email,
            given_name: self.name.given_name,
            family_name: self.name.family_name,
            org_path: self
                .org_unit_path
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| "/".to_string()),
            suspended: self.suspended,
            created_at: self.creation_time,
            extras,
        })
    }
}

/// Insert body for a new account. Not `Debug`: it carries the initial password.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WsCreateUser<'a> {
    #[serde(flatten)]
    pub user: WsUser,
    pub password: &'a str,
    pub change_password_at_next_login: bool,
}

/// Body for a partial update carrying only the masked fields.
pub fn user_patch_body(patch: &UserPatch) -> Value {
    let mut body = Map::new();
    let mut name = Map::new();
    if let Some(given) = &patch.given_name {
        name.insert("givenName".to_string(), json!(given));
    }
    if let Some(family) = &patch.family_name {
        name.insert("familyName".to_string(), json!(family));
    }
    if !name.is_empty() {
        body.insert("name".to_string(), Value::Object(name));
    }
    if let Some(path) = &patch.org_path {
        body.insert("orgUnitPath".to_string(), json!(path));
    }
    if let Some(suspended) = patch.suspended {
        body.insert("suspended".to_string(), json!(suspended));
    }
    if let Some(extras) = &patch.extras {
        let title = extras.get(EXTRA_TITLE);
        let department = extras.get(EXTRA_DEPARTMENT);
        if title.is_some() || department.is_some() {
            body.insert(
                "organizations".to_string(),
                json!([{ "title": title, "department": department, "primary": true }]),
            );
        }
        if let Some(phone) = extras.get(EXTRA_PHONE) {
            body.insert(
                "phones".to_string(),
                json!([{ "value": phone, "type": "work", "primary": true }]),
            );
        }
    }
    Value::Object(body)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsersPage {
    #[serde(default)]
    pub users: Vec<WsUser>,
    pub next_page_token: Option<String>,
}

// ============================================================================
// Groups and members
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsGroup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        default,
        deserialize_with = "count_from_string_or_number",
        skip_serializing
    )]
    pub direct_members_count: u64,
}

/// The directory API encodes int64 counters as JSON strings.
fn count_from_string_or_number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| serde::de::Error::custom("member count is not a positive integer")),
        Some(Value::String(s)) => s.parse().map_err(serde::de::Error::custom),
        Some(other) => Err(serde::de::Error::custom(format!(
            "unexpected member count {}",
            other
        ))),
    }
}

impl WsGroup {
    pub fn from_group(group: &Group) -> Result<Self, AppError> {
        let email = group.email.clone().ok_or_else(|| {
            AppError::Validation(anyhow::anyhow!(
                "cloud group '{}' needs an email address",
                group.name
            ))
        })?;
        Ok(Self {
            id: None,
            email,
            name: group.name.clone(),
            description: group.description.clone(),
            direct_members_count: group.member_count,
        })
    }

    pub fn into_group(self) -> Group {
        let name = if self.name.is_empty() {
            local_part(&self.email).to_string()
        } else {
            self.name
        };
        Group {
            name,
            email: Some(self.email),
            description: self.description.filter(|d| !d.is_empty()),
            member_count: self.direct_members_count,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupsPage {
    #[serde(default)]
    pub groups: Vec<WsGroup>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsMember {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default = "default_member_role")]
    pub role: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

fn default_member_role() -> String {
    "MEMBER".to_string()
}

impl WsMember {
    pub fn new(email: &str, role: MemberRole) -> Self {
        Self {
            email: Some(email.to_string()),
            role: member_role_to_wire(role).to_string(),
            kind: None,
            status: None,
        }
    }

    /// Entries without an address (whole-customer members) are not addressable.
    pub fn into_member(self) -> Option<Member> {
        let email = self.email?;
        let role = if self.role.eq_ignore_ascii_case("OWNER") {
            MemberRole::Owner
        } else {
            MemberRole::Member
        };
        Some(Member { email, role })
    }
}

pub fn member_role_to_wire(role: MemberRole) -> &'static str {
    match role {
        MemberRole::Owner => "OWNER",
        MemberRole::Member => "MEMBER",
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembersPage {
    #[serde(default)]
    pub members: Vec<WsMember>,
    pub next_page_token: Option<String>,
}

// ============================================================================
// Calendar
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsAclScope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsAclRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub scope: WsAclScope,
    pub role: String,
}

impl WsAclRule {
    pub fn from_acl(rule: &CalendarAcl) -> Self {
        Self {
            id: rule.rule_id.clone(),
            scope: WsAclScope {
                kind: rule.scope_type.as_str().to_string(),
                value: match rule.scope_type {
                    ScopeType::Default => None,
                    _ => Some(rule.scope_value.clone()),
                },
            },
            role: rule.role.as_str().to_string(),
        }
    }

    pub fn into_acl(self, calendar_id: &str) -> Result<CalendarAcl, AppError> {
        Ok(CalendarAcl {
            calendar_id: calendar_id.to_string(),
            rule_id: self.id,
            scope_type: self.scope.kind.parse()?,
            scope_value: self.scope.value.unwrap_or_default(),
            role: self.role.parse::<CalendarRole>()?,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AclPage {
    #[serde(default)]
    pub items: Vec<WsAclRule>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsCalendarListEntry {
    pub id: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub summary_override: Option<String>,
    #[serde(default)]
    pub access_role: Option<String>,
    #[serde(default)]
    pub primary: bool,
}

impl WsCalendarListEntry {
    pub fn into_entry(self) -> CalendarEntry {
        CalendarEntry {
            id: self.id,
            summary: self.summary_override.unwrap_or(self.summary),
            access_role: self.access_role,
            primary: self.primary,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarListPage {
    #[serde(default)]
    pub items: Vec<WsCalendarListEntry>,
    pub next_page_token: Option<String>,
}

// ============================================================================
// Drive permissions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsPermission {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,
    pub role: String,
}

/// Fields requested on every permissions call so the mapper sees the address.
pub const PERMISSION_FIELDS: &str = "nextPageToken,permissions(id,type,emailAddress,role)";

impl WsPermission {
    pub fn for_user(email: &str, role: DocumentRole) -> Self {
        Self {
            id: None,
            kind: "user".to_string(),
            email_address: Some(email.to_string()),
            role: role.as_str().to_string(),
        }
    }

    /// Only grants to a person or group carry an address; `anyone`/`domain`
    /// link-sharing entries are skipped. Drive's `fileOrganizer` and
    /// `organizer` roles are outside the documented role set and skipped too.
    pub fn into_document_acl(self, document_id: &str) -> Option<DocumentAcl> {
        let email = self.email_address?;
        let role = self.role.parse::<DocumentRole>().ok()?;
        Some(DocumentAcl {
            document_id: document_id.to_string(),
            grantee_email: email,
            role,
            permission_id: self.id.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionsPage {
    #[serde(default)]
    pub permissions: Vec<WsPermission>,
    pub next_page_token: Option<String>,
}

/// Google API error envelope: `{"error": {"code": 404, "message": "..."}}`.
#[derive(Debug, Deserialize)]
pub struct WsErrorEnvelope {
    pub error: WsErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct WsErrorBody {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub errors: Vec<WsErrorItem>,
}

#[derive(Debug, Deserialize)]
pub struct WsErrorItem {
    #[serde(default)]
    pub reason: String,
}
