//! On-prem directory JSON-RPC shapes.
//!
//! The server wraps almost every attribute value in a single-element list and
//! timestamps in `{"__datetime__": "..."}` objects. Both are unwrapped here and
//! nowhere else.

use crate::models::user::{EXTRA_DEPARTMENT, EXTRA_PHONE, EXTRA_TITLE};
use crate::models::{Group, User, UserPatch};
use chrono::{DateTime, NaiveDateTime, Utc};
use directory_core::error::AppError;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

pub type Entry = Map<String, Value>;

/// Extra attributes carried beyond the title/department/phone trio.
const PASSTHROUGH_ATTRS: &[(&str, &str)] = &[
    ("mobile", "mobile"),
    ("employeenumber", "employee_number"),
    ("manager", "manager"),
];

// ============================================================================
// Envelope
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RpcEnvelope {
    #[serde(default)]
    pub result: Option<RpcResult>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub message: String,
}

/// Body of a successful call: `{"result": ..., "count": .., "failed": ..}`.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResult {
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub failed: Option<Value>,
    #[serde(default)]
    pub completed: Option<u64>,
}

impl RpcResult {
    /// `*_find` results: a list of entries.
    pub fn entries(self) -> Result<Vec<Entry>, AppError> {
        match self.result {
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(entry) => Ok(entry),
                    other => Err(unexpected_shape("entry object", &other)),
                })
                .collect(),
            other => Err(unexpected_shape("entry list", &other)),
        }
    }

    /// `*_find` results for a full listing. A search the server cut short at
    /// its size or time limit is an error, never a partial listing.
    pub fn complete_entries(self) -> Result<Vec<Entry>, AppError> {
        if self.truncated {
            return Err(AppError::Transient(anyhow::anyhow!(
                "server truncated the search after {} entries: {}",
                self.count.unwrap_or_default(),
                self.summary.as_deref().unwrap_or("size or time limit exceeded")
            )));
        }
        self.entries()
    }

    /// `*_show`, `*_add`, `*_mod` results: one entry.
    pub fn entry(self) -> Result<Entry, AppError> {
        match self.result {
            Value::Object(entry) => Ok(entry),
            other => Err(unexpected_shape("entry object", &other)),
        }
    }

    /// Per-item rejections of a membership call, as `(name, reason)` pairs.
    pub fn failures(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        if let Some(failed) = &self.failed {
            collect_failures(failed, &mut out);
        }
        out
    }
}

/// `failed` nests `{"member": {"user": [["bob", "This entry is already a member"]]}}`.
fn collect_failures(value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => map.values().for_each(|v| collect_failures(v, out)),
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Array(pair) if pair.len() == 2 => out.push((
                        scalar_to_string(&pair[0]).unwrap_or_default(),
                        scalar_to_string(&pair[1]).unwrap_or_default(),
                    )),
                    other => collect_failures(other, out),
                }
            }
        }
        _ => {}
    }
}

/// Parse the response envelope. Exactly one of `error` / `result` is expected.
pub fn parse_envelope(body: Value) -> Result<Result<RpcResult, RpcError>, AppError> {
    let envelope: RpcEnvelope = serde_json::from_value(body)?;
    match (envelope.error, envelope.result) {
        (Some(error), _) => Ok(Err(error)),
        (None, Some(result)) => Ok(Ok(result)),
        (None, None) => Err(AppError::Validation(anyhow::anyhow!(
            "response carries neither result nor error"
        ))),
    }
}

/// JSON-RPC request body.
pub fn request_body(method: &str, args: Vec<Value>, mut options: Entry, version: &str) -> Value {
    options.insert("version".to_string(), json!(version));
    json!({
        "method": method,
        "params": [args, options],
        "id": 0,
    })
}

fn unexpected_shape(expected: &str, got: &Value) -> AppError {
    let kind = match got {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    };
    AppError::Validation(anyhow::anyhow!("expected {}, got {}", expected, kind))
}

// ============================================================================
// Attribute access
// ============================================================================

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(map) => map.get("__datetime__").and_then(scalar_to_string),
        _ => None,
    }
}

/// First value of an attribute, whether sent bare or as a one-element list.
pub fn attr(entry: &Entry, name: &str) -> Option<String> {
    let value = match entry.get(name)? {
        Value::Array(items) => items.first().and_then(scalar_to_string),
        other => scalar_to_string(other),
    };
    value.filter(|s| !s.is_empty())
}

/// Every value of a multi-valued attribute.
pub fn attr_list(entry: &Entry, name: &str) -> Vec<String> {
    match entry.get(name) {
        Some(Value::Array(items)) => items.iter().filter_map(scalar_to_string).collect(),
        Some(other) => scalar_to_string(other).into_iter().collect(),
        None => Vec::new(),
    }
}

fn attr_bool(entry: &Entry, name: &str) -> bool {
    attr(entry, name)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Generalized time, as in `20240131120000Z`.
fn parse_generalized_time(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, "%Y%m%d%H%M%SZ")
        .ok()
        .map(|naive| naive.and_utc())
}

// ============================================================================
// Users
// ============================================================================

/// Map a user entry. Entries without `mail` fall back to `uid@default_domain`.
pub fn user_from_entry(entry: &Entry, default_domain: Option<&str>) -> Result<User, AppError> {
    let uid = attr(entry, "uid")
        .ok_or_else(|| AppError::Validation(anyhow::anyhow!("user entry without uid")))?;
    let primary_email = match (attr(entry, "mail"), default_domain) {
        (Some(mail), _) => mail,
        (None, Some(domain)) => format!("{}@{}", uid, domain),
        (None, None) => {
            return Err(AppError::Validation(anyhow::anyhow!(
                "user '{}' has no mail attribute",
                uid
            )))
        }
    };

    let mut extras = BTreeMap::new();
    for (attr_name, key) in [
        ("title", EXTRA_TITLE),
        ("departmentnumber", EXTRA_DEPARTMENT),
        ("telephonenumber", EXTRA_PHONE),
    ]
    .iter()
    .chain(PASSTHROUGH_ATTRS.iter())
    {
        if let Some(value) = attr(entry, attr_name) {
            extras.insert(key.to_string(), value);
        }
    }

    Ok(User {
        login: uid,
        primary_email,
        given_name: attr(entry, "givenname").unwrap_or_default(),
        family_name: attr(entry, "sn").unwrap_or_default(),
        org_path: "/".to_string(),
        suspended: attr_bool(entry, "nsaccountlock"),
        created_at: attr(entry, "createtimestamp").and_then(|t| parse_generalized_time(&t)),
        extras,
    })
}

/// Options for `user_add`; the uid travels as the positional argument.
pub fn user_add_options(user: &User) -> Entry {
    let mut options = Entry::new();
    options.insert("givenname".to_string(), json!(user.given_name));
    options.insert("sn".to_string(), json!(user.family_name));
    options.insert("cn".to_string(), json!(user.full_name()));
    options.insert("mail".to_string(), json!(user.primary_email));
    if user.suspended {
        options.insert("nsaccountlock".to_string(), json!(true));
    }
    insert_extras(&mut options, &user.extras);
    options
}

fn insert_extras(options: &mut Entry, extras: &BTreeMap<String, String>) {
    for (attr_name, key) in [
        ("title", EXTRA_TITLE),
        ("departmentnumber", EXTRA_DEPARTMENT),
        ("telephonenumber", EXTRA_PHONE),
    ]
    .iter()
    .chain(PASSTHROUGH_ATTRS.iter())
    {
        if let Some(value) = extras.get(*key) {
            options.insert(attr_name.to_string(), json!(value));
        }
    }
}

/// Options for `user_mod`. The on-prem directory has no organizational path,
/// so `org_path` is not sent.
pub fn user_mod_options(patch: &UserPatch) -> Entry {
    let mut options = Entry::new();
    if let Some(given) = &patch.given_name {
        options.insert("givenname".to_string(), json!(given));
    }
    if let Some(family) = &patch.family_name {
        options.insert("sn".to_string(), json!(family));
    }
    if let Some(extras) = &patch.extras {
        insert_extras(&mut options, extras);
    }
    options
}

// ============================================================================
// Groups
// ============================================================================

pub fn group_from_entry(entry: &Entry) -> Result<Group, AppError> {
    let name = attr(entry, "cn")
        .ok_or_else(|| AppError::Validation(anyhow::anyhow!("group entry without cn")))?;
    Ok(Group {
        name,
        email: None,
        description: attr(entry, "description"),
        member_count: member_uids(entry).len() as u64,
    })
}

pub fn group_add_options(group: &Group) -> Entry {
    let mut options = Entry::new();
    if let Some(description) = &group.description {
        options.insert("description".to_string(), json!(description));
    }
    options
}

/// Direct user members of a group entry, as uids.
fn member_uids(entry: &Entry) -> Vec<String> {
    attr_list(entry, "member_user")
}

/// Users allowed to manage the group's membership, as uids.
pub fn manager_uids(entry: &Entry) -> Vec<String> {
    attr_list(entry, "membermanager_user")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(value: Value) -> Entry {
        match value {
            Value::Object(map) => map,
            _ => panic!("test entry must be an object"),
        }
    }

    #[test]
    fn test_list_wrapped_attributes_are_unwrapped() {
        let e = entry(json!({
            "uid": ["jdoe"],
            "mail": ["jdoe@corp.example.com"],
            "givenname": ["John"],
            "sn": ["Doe"],
            "title": ["Engineer"],
            "departmentnumber": ["42"],
            "nsaccountlock": true,
            "createtimestamp": [{"__datetime__": "20240131120000Z"}]
        }));
        let user = user_from_entry(&e, None).unwrap();
        assert_eq!(user.login, "jdoe");
        assert_eq!(user.primary_email, "jdoe@corp.example.com");
        assert_eq!(user.department(), Some("42"));
        assert!(user.suspended);
        assert_eq!(
            user.created_at.unwrap().to_rfc3339(),
            "2024-01-31T12:00:00+00:00"
        );
    }

    #[test]
    fn test_missing_mail_uses_default_domain() {
        let e = entry(json!({"uid": ["svc"], "givenname": ["Svc"], "sn": ["Account"]}));
        assert_eq!(
            user_from_entry(&e, Some("corp.example.com")).unwrap().primary_email,
            "svc@corp.example.com"
        );
        assert!(matches!(
            user_from_entry(&e, None),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_user_round_trip_over_documented_subset() {
        let mut user = User::new("jdoe@corp.example.com", "John", "Doe")
            .with_extra(EXTRA_TITLE, "Engineer")
            .with_extra(EXTRA_PHONE, "+1 555 0101")
            .with_extra("employee_number", "1001");
        user.login = "jdoe".to_string();

        let mut wire = user_add_options(&user);
        wire.insert("uid".to_string(), json!(user.login));
        assert_eq!(user_from_entry(&wire, None).unwrap(), user);
    }

    #[test]
    fn test_group_entry_counts_members() {
        let e = entry(json!({
            "cn": ["engineers"],
            "description": ["Engineering staff"],
            "member_user": ["jdoe", "asmith"]
        }));
        let group = group_from_entry(&e).unwrap();
        assert_eq!(group.name, "engineers");
        assert_eq!(group.member_count, 2);
        assert_eq!(member_uids(&e), vec!["jdoe", "asmith"]);
    }

    #[test]
    fn test_envelope_with_result() {
        let body = json!({
            "result": {"result": [{"uid": ["a"]}], "count": 1, "truncated": false},
            "error": null,
            "id": 0
        });
        let result = parse_envelope(body).unwrap().unwrap();
        assert_eq!(result.count, Some(1));
        assert_eq!(result.entries().unwrap().len(), 1);
    }

    #[test]
    fn test_truncated_search_is_not_a_listing() {
        let body = json!({
            "result": {
                "result": [{"uid": ["a"]}],
                "count": 1,
                "truncated": true,
                "summary": "1 user matched"
            }
        });
        let err = parse_envelope(body).unwrap().unwrap().complete_entries().unwrap_err();
        assert_eq!(err.kind(), directory_core::ErrorKind::Transient);
        assert!(err.to_string().contains("1 user matched"));
    }

    #[test]
    fn test_envelope_with_error() {
        let body = json!({
            "result": null,
            "error": {"code": 4001, "name": "NotFound", "message": "bob: user not found"}
        });
        let error = parse_envelope(body).unwrap().unwrap_err();
        assert_eq!(error.code, 4001);
    }

    #[test]
    fn test_unexpected_shape_is_validation_error() {
        let body = json!({"result": {"result": "oops"}, "error": null});
        let result = parse_envelope(body).unwrap().unwrap();
        assert!(matches!(result.entries(), Err(AppError::Validation(_))));
        assert!(parse_envelope(json!({"id": 0})).is_err());
    }

    #[test]
    fn test_membership_failures_are_collected() {
        let body = json!({
            "result": {
                "result": {"cn": ["engineers"]},
                "failed": {"member": {"group": [], "user": [["jdoe", "This entry is already a member"]]}},
                "completed": 0
            },
            "error": null
        });
        let result = parse_envelope(body).unwrap().unwrap();
        assert_eq!(
            result.failures(),
            vec![("jdoe".to_string(), "This entry is already a member".to_string())]
        );
    }
}
