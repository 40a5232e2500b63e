//! Cloud directory client: Admin SDK directory, Calendar and Drive REST APIs.

use super::paging::{paginate, Page};
use super::transport::{parse_json, read_body};
use super::{DirectoryClient, UserFilter};
use crate::auth::TokenSource;
use crate::config::{HttpConfig, Timeouts};
use crate::context::OpContext;
use crate::models::wire::workspace::{
    member_role_to_wire, user_patch_body, AclPage, CalendarListPage, GroupsPage, MembersPage,
    PermissionsPage, UsersPage, WsAclRule, WsCreateUser, WsGroup, WsMember, WsPermission, WsUser,
    PERMISSION_FIELDS,
};
use crate::models::{
    CalendarAcl, CalendarEntry, CalendarRole, Directory, DocumentAcl, DocumentRole, Group, Member,
    MemberRole, ScopeType, User, UserPatch,
};
use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use directory_core::error::AppError;
use directory_core::retry::{retry_call, OperationClass, RetryConfig};
use futures::stream::BoxStream;
use once_cell::sync::Lazy;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use secrecy::{ExposeSecret, Secret};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub const DEFAULT_API_ROOT: &str = "https://www.googleapis.com";
pub const CALENDAR_SHARE_BASE: &str = "https://calendar.google.com/calendar/u/0";

static DEFAULT_ROOT: Lazy<Url> =
    Lazy::new(|| Url::parse(DEFAULT_API_ROOT).expect("default API root is a valid URL"));

const USER_PAGE_SIZE: u32 = 500;
const GROUP_PAGE_SIZE: u32 = 200;
const MEMBER_PAGE_SIZE: u32 = 200;
const ACL_PAGE_SIZE: u32 = 250;
const PERMISSION_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy)]
enum Api {
    Directory,
    Calendar,
    Drive,
}

impl Api {
    fn prefix(&self) -> &'static [&'static str] {
        match self {
            Api::Directory => &["admin", "directory", "v1"],
            Api::Calendar => &["calendar", "v3"],
            Api::Drive => &["drive", "v3"],
        }
    }
}

pub struct WorkspaceClient {
    http: Client,
    tokens: Arc<dyn TokenSource>,
    api_root: Url,
    customer: String,
    retry: RetryConfig,
    timeouts: Timeouts,
}

impl WorkspaceClient {
    pub fn new(
        tokens: Arc<dyn TokenSource>,
        customer: impl Into<String>,
        http: &HttpConfig,
    ) -> Self {
        Self {
            http: Client::new(),
            tokens,
            api_root: DEFAULT_ROOT.clone(),
            customer: customer.into(),
            retry: http.retry(),
            timeouts: http.timeouts(),
        }
    }

    /// Point every API at another root, e.g. a mock server.
    pub fn with_api_root(mut self, root: &str) -> Result<Self, AppError> {
        self.api_root = Url::parse(root)
            .map_err(|e| AppError::Config(anyhow::anyhow!("invalid API root '{}': {}", root, e)))?;
        Ok(self)
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self, api: Api, segments: &[&str]) -> Result<Url, AppError> {
        let mut url = self.api_root.clone();
        url.path_segments_mut()
            .map_err(|_| AppError::Config(anyhow::anyhow!("API root cannot carry a path")))?
            .pop_if_empty()
            .extend(api.prefix())
            .extend(segments);
        Ok(url)
    }

    fn timeout_for(&self, class: OperationClass) -> std::time::Duration {
        match class {
            OperationClass::Read => self.timeouts.read,
            OperationClass::Write => self.timeouts.write,
        }
    }

    /// Send with the bearer token. A `401` invalidates the token and the
    /// request is replayed once with a fresh one.
    async fn send_authorized<B>(&self, build: &B) -> Result<Vec<u8>, AppError>
    where
        B: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let token = self.tokens.access_token().await?;
        let response = build(&self.http)
            .bearer_auth(token.expose_secret())
            .send()
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return read_body(response).await;
        }

        debug!("Bearer token rejected; renewing");
        self.tokens.invalidate().await;
        let token = self.tokens.access_token().await?;
        let response = build(&self.http)
            .bearer_auth(token.expose_secret())
            .send()
            .await?;
        read_body(response).await
    }

    async fn execute<B>(
        &self,
        ctx: &OpContext,
        class: OperationClass,
        operation: &str,
        build: B,
    ) -> Result<Vec<u8>, AppError>
    where
        B: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let timeout = self.timeout_for(class);
        let build = &build;
        retry_call(&self.retry, operation, class, || async move {
            ctx.run(timeout, self.send_authorized(build)).await
        })
        .await
    }

    async fn fetch<T, B>(
        &self,
        ctx: &OpContext,
        class: OperationClass,
        operation: &str,
        build: B,
    ) -> Result<T, AppError>
    where
        T: DeserializeOwned,
        B: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let body = self.execute(ctx, class, operation, build).await?;
        parse_json(&body)
    }

    // ------------------------------------------------------------------------
    // Calendar
    // ------------------------------------------------------------------------

    /// Calendars visible to the authenticated operator.
    pub fn list_calendars<'a>(
        &'a self,
        ctx: &'a OpContext,
    ) -> BoxStream<'a, Result<CalendarEntry, AppError>> {
        paginate(move |token| async move {
            let url = self.url(Api::Calendar, &["users", "me", "calendarList"])?;
            let page: CalendarListPage = self
                .fetch(ctx, OperationClass::Read, "list_calendars", |http| {
                    with_page_token(
                        http.get(url.clone())
                            .query(&[("maxResults", ACL_PAGE_SIZE.to_string())]),
                        token.as_deref(),
                    )
                })
                .await?;
            Ok(Page::new(
                page.items.into_iter().map(|e| e.into_entry()).collect(),
                page.next_page_token,
            ))
        })
    }

    pub fn list_calendar_acl<'a>(
        &'a self,
        ctx: &'a OpContext,
        calendar_id: &'a str,
    ) -> BoxStream<'a, Result<CalendarAcl, AppError>> {
        paginate(move |token| async move {
            let url = self.url(Api::Calendar, &["calendars", calendar_id, "acl"])?;
            let page: AclPage = self
                .fetch(ctx, OperationClass::Read, "list_calendar_acl", |http| {
                    with_page_token(
                        http.get(url.clone())
                            .query(&[("maxResults", ACL_PAGE_SIZE.to_string())]),
                        token.as_deref(),
                    )
                })
                .await?;
            let items = page
                .items
                .into_iter()
                .map(|rule| rule.into_acl(calendar_id))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Page::new(items, page.next_page_token))
        })
    }

    #[instrument(
        skip(self, ctx, rule),
        fields(calendar = %rule.calendar_id, scope = %rule.scope_value)
    )]
    pub async fn add_calendar_acl(
        &self,
        ctx: &OpContext,
        rule: &CalendarAcl,
    ) -> Result<CalendarAcl, AppError> {
        let url = self.url(Api::Calendar, &["calendars", &rule.calendar_id, "acl"])?;
        let body = WsAclRule::from_acl(rule);
        let created: WsAclRule = self
            .fetch(ctx, OperationClass::Write, "add_calendar_acl", |http| {
                http.post(url.clone())
                    .query(&[("sendNotifications", "false")])
                    .json(&body)
            })
            .await?;
        info!(role = %rule.role, "Calendar access granted");
        created.into_acl(&rule.calendar_id)
    }

    #[instrument(skip(self, ctx))]
    pub async fn update_calendar_acl(
        &self,
        ctx: &OpContext,
        calendar_id: &str,
        rule_id: &str,
        role: CalendarRole,
    ) -> Result<CalendarAcl, AppError> {
        let url = self.url(Api::Calendar, &["calendars", calendar_id, "acl", rule_id])?;
        let body = json!({ "role": role.as_str() });
        let updated: WsAclRule = self
            .fetch(ctx, OperationClass::Write, "update_calendar_acl", |http| {
                http.patch(url.clone()).json(&body)
            })
            .await?;
        updated.into_acl(calendar_id)
    }

    #[instrument(skip(self, ctx))]
    pub async fn remove_calendar_acl(
        &self,
        ctx: &OpContext,
        calendar_id: &str,
        rule_id: &str,
    ) -> Result<(), AppError> {
        let url = self.url(Api::Calendar, &["calendars", calendar_id, "acl", rule_id])?;
        self.execute(ctx, OperationClass::Write, "remove_calendar_acl", |http| {
            http.delete(url.clone())
        })
        .await?;
        info!("Calendar access rule removed");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Drive permissions
    // ------------------------------------------------------------------------

    pub fn list_document_acl<'a>(
        &'a self,
        ctx: &'a OpContext,
        document_id: &'a str,
    ) -> BoxStream<'a, Result<DocumentAcl, AppError>> {
        paginate(move |token| async move {
            let url = self.url(Api::Drive, &["files", document_id, "permissions"])?;
            let page: PermissionsPage = self
                .fetch(ctx, OperationClass::Read, "list_document_acl", |http| {
                    with_page_token(
                        http.get(url.clone()).query(&[
                            ("fields", PERMISSION_FIELDS.to_string()),
                            ("pageSize", PERMISSION_PAGE_SIZE.to_string()),
                            ("supportsAllDrives", "true".to_string()),
                        ]),
                        token.as_deref(),
                    )
                })
                .await?;
            Ok(Page::new(
                page.permissions
                    .into_iter()
                    .filter_map(|p| p.into_document_acl(document_id))
                    .collect(),
                page.next_page_token,
            ))
        })
    }

    #[instrument(skip(self, ctx))]
    pub async fn grant_document_acl(
        &self,
        ctx: &OpContext,
        document_id: &str,
        email: &str,
        role: DocumentRole,
        notify: bool,
    ) -> Result<DocumentAcl, AppError> {
        let url = self.url(Api::Drive, &["files", document_id, "permissions"])?;
        let body = WsPermission::for_user(email, role);
        let mut query = vec![
            ("sendNotificationEmail", notify.to_string()),
            ("supportsAllDrives", "true".to_string()),
            ("fields", "id,type,emailAddress,role".to_string()),
        ];
        if role == DocumentRole::Owner {
            query.push(("transferOwnership", "true".to_string()));
        }
        let created: WsPermission = self
            .fetch(ctx, OperationClass::Write, "grant_document_acl", |http| {
                http.post(url.clone()).query(&query).json(&body)
            })
            .await?;
        info!("Document access granted");
        created.into_document_acl(document_id).ok_or_else(|| {
            AppError::Validation(anyhow::anyhow!("permission response carries no grantee address"))
        })
    }

    #[instrument(skip(self, ctx))]
    pub async fn update_document_acl_role(
        &self,
        ctx: &OpContext,
        document_id: &str,
        permission_id: &str,
        role: DocumentRole,
    ) -> Result<DocumentAcl, AppError> {
        let url = self.url(Api::Drive, &["files", document_id, "permissions", permission_id])?;
        let body = json!({ "role": role.as_str() });
        let mut query = vec![
            ("supportsAllDrives", "true".to_string()),
            ("fields", "id,type,emailAddress,role".to_string()),
        ];
        if role == DocumentRole::Owner {
            query.push(("transferOwnership", "true".to_string()));
        }
        let updated: WsPermission = self
            .fetch(ctx, OperationClass::Write, "update_document_acl_role", |http| {
                http.patch(url.clone()).query(&query).json(&body)
            })
            .await?;
        updated.into_document_acl(document_id).ok_or_else(|| {
            AppError::Validation(anyhow::anyhow!("permission response carries no grantee address"))
        })
    }

    #[instrument(skip(self, ctx))]
    pub async fn revoke_document_acl(
        &self,
        ctx: &OpContext,
        document_id: &str,
        permission_id: &str,
    ) -> Result<(), AppError> {
        let url = self.url(Api::Drive, &["files", document_id, "permissions", permission_id])?;
        self.execute(ctx, OperationClass::Write, "revoke_document_acl", |http| {
            http.delete(url.clone()).query(&[("supportsAllDrives", "true")])
        })
        .await?;
        info!("Document access revoked");
        Ok(())
    }

    fn list_scope(&self, domain: Option<&str>) -> (&'static str, String) {
        match domain {
            Some(domain) => ("domain", domain.to_string()),
            None => ("customer", self.customer.clone()),
        }
    }
}

fn with_page_token(request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => request.query(&[("pageToken", token)]),
        None => request,
    }
}

/// Server-side user search expression for the filter.
fn user_query(filter: &UserFilter) -> Option<String> {
    let mut terms = Vec::new();
    if let Some(path) = filter.org_path.as_deref().filter(|p| *p != "/") {
        terms.push(format!("orgUnitPath='{}'", path.replace('\'', "\\'")));
    }
    if !filter.include_suspended {
        terms.push("isSuspended=false".to_string());
    }
    if let Some(query) = filter.query.as_deref().filter(|q| !q.trim().is_empty()) {
        terms.push(query.trim().to_string());
    }
    (!terms.is_empty()).then(|| terms.join(" "))
}

#[async_trait]
impl DirectoryClient for WorkspaceClient {
    fn directory(&self) -> Directory {
        Directory::Cloud
    }

    fn list_users<'a>(
        &'a self,
        ctx: &'a OpContext,
        filter: &'a UserFilter,
    ) -> BoxStream<'a, Result<User, AppError>> {
        paginate(move |token| async move {
            let url = self.url(Api::Directory, &["users"])?;
            let mut query = vec![
                self.list_scope(filter.domain.as_deref()),
                ("maxResults", USER_PAGE_SIZE.to_string()),
                // Same sort key on every page keeps the cursor stable.
                ("orderBy", "email".to_string()),
                ("sortOrder", "ASCENDING".to_string()),
            ];
            if let Some(q) = user_query(filter) {
                query.push(("query", q));
            }
            let page: UsersPage = self
                .fetch(ctx, OperationClass::Read, "list_users", |http| {
                    with_page_token(http.get(url.clone()).query(&query), token.as_deref())
                })
                .await?;
            let mut users = Vec::with_capacity(page.users.len());
            for wire in page.users {
                let user = wire.into_user()?;
                if filter.matches(&user) {
                    users.push(user);
                }
            }
            Ok(Page::new(users, page.next_page_token))
        })
    }

    #[instrument(skip(self, ctx))]
    async fn get_user(&self, ctx: &OpContext, email: &str) -> Result<User, AppError> {
        let url = self.url(Api::Directory, &["users", email])?;
        let user: WsUser = self
            .fetch(ctx, OperationClass::Read, "get_user", |http| http.get(url.clone()))
            .await?;
        user.into_user()
    }

    #[instrument(skip(self, ctx, user, initial_password), fields(email = %user.primary_email))]
    async fn create_user(
        &self,
        ctx: &OpContext,
        user: &User,
        initial_password: &Secret<String>,
    ) -> Result<User, AppError> {
        let url = self.url(Api::Directory, &["users"])?;
        let body = WsCreateUser {
            user: WsUser::from_user(user),
            password: initial_password.expose_secret(),
            change_password_at_next_login: true,
        };
        let created: WsUser = self
            .fetch(ctx, OperationClass::Write, "create_user", |http| {
                http.post(url.clone()).json(&body)
            })
            .await?;
        info!("Cloud user created");
        created.into_user()
    }

    #[instrument(skip(self, ctx, patch))]
    async fn update_user(
        &self,
        ctx: &OpContext,
        email: &str,
        patch: &UserPatch,
    ) -> Result<User, AppError> {
        let url = self.url(Api::Directory, &["users", email])?;
        let body = user_patch_body(patch);
        let updated: WsUser = self
            .fetch(ctx, OperationClass::Write, "update_user", |http| {
                http.patch(url.clone()).json(&body)
            })
            .await?;
        updated.into_user()
    }

    #[instrument(skip(self, ctx))]
    async fn delete_user(&self, ctx: &OpContext, email: &str) -> Result<(), AppError> {
        let url = self.url(Api::Directory, &["users", email])?;
        self.execute(ctx, OperationClass::Write, "delete_user", |http| http.delete(url.clone()))
            .await?;
        info!("Cloud user deleted");
        Ok(())
    }

    fn list_groups<'a>(
        &'a self,
        ctx: &'a OpContext,
        domain: Option<&'a str>,
    ) -> BoxStream<'a, Result<Group, AppError>> {
        paginate(move |token| async move {
            let url = self.url(Api::Directory, &["groups"])?;
            let query = vec![
                self.list_scope(domain),
                ("maxResults", GROUP_PAGE_SIZE.to_string()),
                ("orderBy", "email".to_string()),
                ("sortOrder", "ASCENDING".to_string()),
            ];
            let page: GroupsPage = self
                .fetch(ctx, OperationClass::Read, "list_groups", |http| {
                    with_page_token(http.get(url.clone()).query(&query), token.as_deref())
                })
                .await?;
            Ok(Page::new(
                page.groups.into_iter().map(WsGroup::into_group).collect(),
                page.next_page_token,
            ))
        })
    }

    #[instrument(skip(self, ctx))]
    async fn get_group(&self, ctx: &OpContext, group: &str) -> Result<Group, AppError> {
        let url = self.url(Api::Directory, &["groups", group])?;
        let found: WsGroup = self
            .fetch(ctx, OperationClass::Read, "get_group", |http| http.get(url.clone()))
            .await?;
        Ok(found.into_group())
    }

    #[instrument(skip(self, ctx, group), fields(group = %group.name))]
    async fn create_group(&self, ctx: &OpContext, group: &Group) -> Result<Group, AppError> {
        let url = self.url(Api::Directory, &["groups"])?;
        let body = WsGroup::from_group(group)?;
        let created: WsGroup = self
            .fetch(ctx, OperationClass::Write, "create_group", |http| {
                http.post(url.clone()).json(&body)
            })
            .await?;
        info!("Cloud group created");
        Ok(created.into_group())
    }

    #[instrument(skip(self, ctx))]
    async fn delete_group(&self, ctx: &OpContext, group: &str) -> Result<(), AppError> {
        let url = self.url(Api::Directory, &["groups", group])?;
        self.execute(ctx, OperationClass::Write, "delete_group", |http| http.delete(url.clone()))
            .await?;
        info!("Cloud group deleted");
        Ok(())
    }

    fn list_group_members<'a>(
        &'a self,
        ctx: &'a OpContext,
        group: &'a str,
    ) -> BoxStream<'a, Result<Member, AppError>> {
        paginate(move |token| async move {
            let url = self.url(Api::Directory, &["groups", group, "members"])?;
            let page: MembersPage = self
                .fetch(ctx, OperationClass::Read, "list_group_members", |http| {
                    with_page_token(
                        http.get(url.clone())
                            .query(&[("maxResults", MEMBER_PAGE_SIZE.to_string())]),
                        token.as_deref(),
                    )
                })
                .await?;
            Ok(Page::new(
                page.members.into_iter().filter_map(WsMember::into_member).collect(),
                page.next_page_token,
            ))
        })
    }

    #[instrument(skip(self, ctx))]
    async fn add_group_member(
        &self,
        ctx: &OpContext,
        group: &str,
        email: &str,
        role: MemberRole,
    ) -> Result<(), AppError> {
        let url = self.url(Api::Directory, &["groups", group, "members"])?;
        let body = WsMember::new(email, role);
        self.execute(ctx, OperationClass::Write, "add_group_member", |http| {
            http.post(url.clone()).json(&body)
        })
        .await?;
        info!("Member added to cloud group");
        Ok(())
    }

    #[instrument(skip(self, ctx))]
    async fn remove_group_member(
        &self,
        ctx: &OpContext,
        group: &str,
        email: &str,
    ) -> Result<(), AppError> {
        let url = self.url(Api::Directory, &["groups", group, "members", email])?;
        self.execute(ctx, OperationClass::Write, "remove_group_member", |http| {
            http.delete(url.clone())
        })
        .await?;
        info!("Member removed from cloud group");
        Ok(())
    }

    #[instrument(skip(self, ctx))]
    async fn change_member_role(
        &self,
        ctx: &OpContext,
        group: &str,
        email: &str,
        role: MemberRole,
    ) -> Result<(), AppError> {
        let url = self.url(Api::Directory, &["groups", group, "members", email])?;
        let body = json!({ "role": member_role_to_wire(role) });
        self.execute(ctx, OperationClass::Write, "change_member_role", |http| {
            http.patch(url.clone()).json(&body)
        })
        .await?;
        Ok(())
    }
}

/// Rule id the calendar API assigns to a scope.
pub fn calendar_rule_id(scope_type: ScopeType, value: &str) -> String {
    match scope_type {
        ScopeType::Default => "default".to_string(),
        other => format!("{}:{}", other.as_str(), value),
    }
}

/// Extract the calendar id from a share or embed URL.
///
/// Share links carry the id base64url-encoded in `cid`; embed links carry it
/// verbatim in `src`. Returns `None` when neither yields a usable id.
pub fn calendar_id_from_share_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    let mut cid = None;
    let mut src = None;
    for (key, value) in parsed.query_pairs() {
        match key.as_ref() {
            "cid" => cid = Some(value.into_owned()),
            "src" => src = Some(value.into_owned()),
            _ => {}
        }
    }
    match (cid, src) {
        (Some(cid), _) => decode_cid(&cid),
        (None, Some(src)) => Some(src.trim().to_string()).filter(|s| !s.is_empty()),
        (None, None) => None,
    }
}

fn decode_cid(cid: &str) -> Option<String> {
    // Query decoding turns a literal `+` into a space.
    let cleaned = cid.trim().trim_end_matches('=').replace(' ', "+");
    let bytes = URL_SAFE_NO_PAD
        .decode(&cleaned)
        .or_else(|_| STANDARD_NO_PAD.decode(&cleaned))
        .ok()?;
    let id = String::from_utf8(bytes).ok()?;
    if id.is_empty() || id.chars().any(char::is_control) {
        return None;
    }
    Some(id)
}

/// Share URL for a calendar; [`calendar_id_from_share_url`] inverts it.
pub fn share_url_for_calendar(calendar_id: &str) -> String {
    format!(
        "{}?cid={}",
        CALENDAR_SHARE_BASE,
        URL_SAFE_NO_PAD.encode(calendar_id.as_bytes())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;

    #[test]
    fn test_share_url_literal() {
        let url = "https://calendar.google.com/calendar/u/0?cid=dGNvNXZpcWxjNnZ0MjBsYmtsaDAzdTJrYjhAZ3JvdXAuY2FsZW5kYXIuZ29vZ2xlLmNvbQ";
        assert_eq!(
            calendar_id_from_share_url(url).as_deref(),
            Some("tco5viqlc6vt20lbklh03u2kb8@group.calendar.google.com")
        );
    }

    #[test]
    fn test_share_url_round_trip() {
        for id in [
            "tco5viqlc6vt20lbklh03u2kb8@group.calendar.google.com",
            "alice@example.com",
            "en.usa#holiday@group.v.calendar.google.com",
        ] {
            assert_eq!(
                calendar_id_from_share_url(&share_url_for_calendar(id)).as_deref(),
                Some(id)
            );
        }
    }

    #[test]
    fn test_padded_cid_and_embed_src() {
        let padded = format!(
            "https://calendar.google.com/calendar/u/0?cid={}%3D%3D",
            URL_SAFE_NO_PAD.encode("team@example.com")
        );
        assert_eq!(
            calendar_id_from_share_url(&padded).as_deref(),
            Some("team@example.com")
        );
        let embed = "https://calendar.google.com/calendar/embed?src=team%40example.com&ctz=UTC";
        assert_eq!(
            calendar_id_from_share_url(embed).as_deref(),
            Some("team@example.com")
        );
    }

    #[test]
    fn test_malformed_share_urls() {
        assert_eq!(calendar_id_from_share_url("not a url"), None);
        assert_eq!(calendar_id_from_share_url("https://calendar.google.com/calendar/u/0"), None);
        assert_eq!(
            calendar_id_from_share_url("https://calendar.google.com/calendar/u/0?cid=%%%"),
            None
        );
    }

    #[test]
    fn test_rule_ids() {
        assert_eq!(calendar_rule_id(ScopeType::User, "a@example.com"), "user:a@example.com");
        assert_eq!(calendar_rule_id(ScopeType::Default, ""), "default");
    }

    #[test]
    fn test_user_query_terms() {
        let filter = UserFilter {
            org_path: Some("/Sales".to_string()),
            include_suspended: false,
            query: Some("givenName:Al*".to_string()),
            ..Default::default()
        };
        assert_eq!(
            user_query(&filter).as_deref(),
            Some("orgUnitPath='/Sales' isSuspended=false givenName:Al*")
        );
        assert_eq!(user_query(&UserFilter::default()), None);
    }

    #[test]
    fn test_urls_escape_segments() {
        let tokens = Arc::new(StaticToken::new("t"));
        let client = WorkspaceClient::new(tokens, "my_customer", &HttpConfig::default())
            .with_api_root("http://127.0.0.1:9000")
            .unwrap();
        let url = client
            .url(Api::Calendar, &["calendars", "en.usa#holiday@group.v.calendar.google.com", "acl"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:9000/calendar/v3/calendars/en.usa%23holiday@group.v.calendar.google.com/acl"
        );
    }
}
