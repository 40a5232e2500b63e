//! On-prem directory client over the JSON-RPC session endpoint.

use super::paging::{paginate, Page};
use super::transport::{parse_json, read_body};
use super::{DirectoryClient, UserFilter};
use crate::auth::{OnPremBroker, OnPremSession};
use crate::config::{HttpConfig, Timeouts};
use crate::context::OpContext;
use crate::models::wire::ipa::{
    self, group_add_options, group_from_entry, manager_uids, parse_envelope, request_body,
    user_add_options, user_from_entry, user_mod_options, Entry, RpcError, RpcResult,
};
use crate::models::{
    domain_part, identity_key, local_part, Directory, Group, Member, MemberRole, User, UserPatch,
};
use async_trait::async_trait;
use directory_core::error::AppError;
use directory_core::retry::{retry_call, OperationClass, RetryConfig};
use futures::stream::BoxStream;
use reqwest::header::{ACCEPT, REFERER};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, Secret};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};

const JSON_PATH: &str = "ipa/session/json";

// Server error codes.
const ERR_ACI: i64 = 2100;
const ERR_NOT_FOUND: i64 = 4001;
const ERR_DUPLICATE: i64 = 4002;
const ERR_ALREADY_ACTIVE: i64 = 4009;
const ERR_ALREADY_INACTIVE: i64 = 4010;
const ERR_EMPTY_MODLIST: i64 = 4202;

/// Classify a JSON-RPC error object.
pub fn rpc_error(err: RpcError) -> AppError {
    let message = if err.message.is_empty() {
        format!("{} ({})", err.name, err.code)
    } else {
        err.message
    };
    match err.code {
        ERR_NOT_FOUND => AppError::NotFound(anyhow::anyhow!(message)),
        ERR_DUPLICATE | ERR_ALREADY_ACTIVE | ERR_ALREADY_INACTIVE | ERR_EMPTY_MODLIST => {
            AppError::Conflict(anyhow::anyhow!(message))
        }
        ERR_ACI => AppError::PermissionDenied(anyhow::anyhow!(message)),
        900..=999 => AppError::Transient(anyhow::anyhow!(message)),
        1000..=1999 => AppError::AuthInvalid(anyhow::anyhow!(message)),
        _ => AppError::Validation(anyhow::anyhow!(message)),
    }
}

fn is_code(err: &RpcError, codes: &[i64]) -> bool {
    codes.contains(&err.code)
}

/// Outcome of one call: the server either answered or reported an RPC error.
type RpcOutcome = Result<RpcResult, RpcError>;

pub struct IpaClient {
    broker: Arc<OnPremBroker>,
    domain: String,
    api_version: String,
    retry: RetryConfig,
    timeouts: Timeouts,
}

impl IpaClient {
    pub fn new(
        broker: Arc<OnPremBroker>,
        domain: impl Into<String>,
        api_version: impl Into<String>,
        http: &HttpConfig,
    ) -> Self {
        Self {
            broker,
            domain: domain.into(),
            api_version: api_version.into(),
            retry: http.retry(),
            timeouts: http.timeouts(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    async fn post(&self, session: &OnPremSession, body: &Value) -> Result<RpcOutcome, AppError> {
        let response = session
            .http()
            .post(session.endpoint(JSON_PATH)?)
            .header(REFERER, session.referer())
            .header(ACCEPT, "application/json")
            .json(body)
            .send()
            .await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(AppError::AuthExpired(anyhow::anyhow!(
                "on-prem session was rejected"
            )));
        }
        let bytes = read_body(response).await?;
        parse_envelope(parse_json(&bytes)?)
    }

    /// One re-login on a rejected session; a second rejection is surfaced.
    async fn post_with_session(&self, body: &Value) -> Result<RpcOutcome, AppError> {
        let session = self.broker.session().await?;
        match self.post(&session, body).await {
            Err(AppError::AuthExpired(_)) => {
                let fresh = self.broker.relogin(&session).await?;
                self.post(&fresh, body).await
            }
            other => other,
        }
    }

    /// Issue a call and keep RPC errors separate so callers can treat some
    /// codes as benign.
    async fn call_raw(
        &self,
        ctx: &OpContext,
        class: OperationClass,
        method: &str,
        args: Vec<Value>,
        options: Entry,
    ) -> Result<RpcOutcome, AppError> {
        let body = request_body(method, args, options, &self.api_version);
        let timeout = match class {
            OperationClass::Read => self.timeouts.read,
            OperationClass::Write => self.timeouts.write,
        };
        let body = &body;
        retry_call(&self.retry, method, class, || async move {
            ctx.run(timeout, self.post_with_session(body)).await
        })
        .await
    }

    async fn call(
        &self,
        ctx: &OpContext,
        class: OperationClass,
        method: &str,
        args: Vec<Value>,
        options: Entry,
    ) -> Result<RpcResult, AppError> {
        self.call_raw(ctx, class, method, args, options)
            .await?
            .map_err(rpc_error)
    }

    fn entry_to_user(&self, entry: &Entry) -> Result<User, AppError> {
        user_from_entry(entry, Some(&self.domain))
    }

    /// Look a user up by address: the `mail` attribute first, then the
    /// local part as uid when the address is in the directory's domain.
    async fn find_user_entry(&self, ctx: &OpContext, email: &str) -> Result<Entry, AppError> {
        let mut options = Entry::new();
        options.insert("mail".to_string(), json!(email));
        options.insert("all".to_string(), json!(true));
        let mut entries = self
            .call(ctx, OperationClass::Read, "user_find", vec![json!("")], options)
            .await?
            .entries()?;
        if entries.len() > 1 {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "{} on-prem users share the address {}",
                entries.len(),
                email
            )));
        }
        if let Some(entry) = entries.pop() {
            return Ok(entry);
        }

        let in_domain = domain_part(email).is_some_and(|d| d.eq_ignore_ascii_case(&self.domain));
        if in_domain {
            let mut options = Entry::new();
            options.insert("all".to_string(), json!(true));
            return self
                .call(
                    ctx,
                    OperationClass::Read,
                    "user_show",
                    vec![json!(local_part(email))],
                    options,
                )
                .await?
                .entry();
        }
        Err(AppError::NotFound(anyhow::anyhow!(
            "no on-prem user with address {}",
            email
        )))
    }

    async fn resolve_uid(&self, ctx: &OpContext, email: &str) -> Result<String, AppError> {
        let entry = self.find_user_entry(ctx, email).await?;
        ipa::attr(&entry, "uid")
            .ok_or_else(|| AppError::Validation(anyhow::anyhow!("user entry without uid")))
    }

    async fn set_account_lock(
        &self,
        ctx: &OpContext,
        email: &str,
        locked: bool,
    ) -> Result<(), AppError> {
        let uid = self.resolve_uid(ctx, email).await?;
        let method = if locked { "user_disable" } else { "user_enable" };
        match self
            .call_raw(ctx, OperationClass::Write, method, vec![json!(uid)], Entry::new())
            .await?
        {
            Ok(_) => {
                info!(uid = %uid, locked, "On-prem account lock changed");
                Ok(())
            }
            Err(e) if is_code(&e, &[ERR_ALREADY_ACTIVE, ERR_ALREADY_INACTIVE]) => {
                debug!(uid = %uid, locked, "Account already in requested state");
                Ok(())
            }
            Err(e) => Err(rpc_error(e)),
        }
    }

    /// Member/manager change on a group, turning per-item rejections into errors.
    async fn change_membership(
        &self,
        ctx: &OpContext,
        method: &str,
        group: &str,
        uid: &str,
        conflict: &str,
    ) -> Result<(), AppError> {
        let mut options = Entry::new();
        options.insert("user".to_string(), json!([uid]));
        let result = self
            .call(ctx, OperationClass::Write, method, vec![json!(group_cn(group))], options)
            .await?;
        match result.failures().into_iter().next() {
            None => Ok(()),
            Some((name, reason)) if reason.to_lowercase().contains("no such entry") => {
                Err(AppError::NotFound(anyhow::anyhow!("{}: {}", name, reason)))
            }
            Some((name, reason)) => Err(AppError::Conflict(anyhow::anyhow!(
                "{} {} ({})",
                name,
                conflict,
                reason
            ))),
        }
    }
}

/// On-prem groups are keyed by name; an address is reduced to its local part.
fn group_cn(group: &str) -> &str {
    local_part(group)
}

#[async_trait]
impl DirectoryClient for IpaClient {
    fn directory(&self) -> Directory {
        Directory::OnPrem
    }

    /// The server returns the full result in one response; it is exposed as
    /// a single page sorted by address.
    fn list_users<'a>(
        &'a self,
        ctx: &'a OpContext,
        filter: &'a UserFilter,
    ) -> BoxStream<'a, Result<User, AppError>> {
        paginate(move |_token| async move {
            let mut options = Entry::new();
            options.insert("all".to_string(), json!(true));
            options.insert("sizelimit".to_string(), json!(0));
            let criteria = filter.query.clone().unwrap_or_default();
            let entries = self
                .call(ctx, OperationClass::Read, "user_find", vec![json!(criteria)], options)
                .await?
                .complete_entries()?;
            let mut users = Vec::with_capacity(entries.len());
            for entry in &entries {
                let user = self.entry_to_user(entry)?;
                if filter.matches(&user) {
                    users.push(user);
                }
            }
            users.sort_by_key(|u| identity_key(&u.primary_email));
            Ok(Page::last(users))
        })
    }

    #[instrument(skip(self, ctx))]
    async fn get_user(&self, ctx: &OpContext, email: &str) -> Result<User, AppError> {
        let entry = self.find_user_entry(ctx, email).await?;
        self.entry_to_user(&entry)
    }

    #[instrument(skip(self, ctx, user, initial_password), fields(email = %user.primary_email))]
    async fn create_user(
        &self,
        ctx: &OpContext,
        user: &User,
        initial_password: &Secret<String>,
    ) -> Result<User, AppError> {
        let uid = if user.login.is_empty() {
            local_part(&user.primary_email).to_string()
        } else {
            user.login.clone()
        };
        let mut options = user_add_options(user);
        options.insert("userpassword".to_string(), json!(initial_password.expose_secret()));
        options.insert("all".to_string(), json!(true));
        let entry = self
            .call(ctx, OperationClass::Write, "user_add", vec![json!(uid)], options)
            .await?
            .entry()?;
        info!(uid = %uid, "On-prem user created");
        self.entry_to_user(&entry)
    }

    #[instrument(skip(self, ctx, patch))]
    async fn update_user(
        &self,
        ctx: &OpContext,
        email: &str,
        patch: &UserPatch,
    ) -> Result<User, AppError> {
        let uid = self.resolve_uid(ctx, email).await?;
        let mut options = user_mod_options(patch);
        if !options.is_empty() {
            options.insert("all".to_string(), json!(true));
            match self
                .call_raw(ctx, OperationClass::Write, "user_mod", vec![json!(uid)], options)
                .await?
            {
                Ok(_) => {}
                Err(e) if is_code(&e, &[ERR_EMPTY_MODLIST]) => {
                    debug!(uid = %uid, "No attribute changes to apply");
                }
                Err(e) => return Err(rpc_error(e)),
            }
        }
        if let Some(locked) = patch.suspended {
            self.set_account_lock(ctx, email, locked).await?;
        }
        self.get_user(ctx, email).await
    }

    #[instrument(skip(self, ctx))]
    async fn suspend_user(&self, ctx: &OpContext, email: &str) -> Result<(), AppError> {
        self.set_account_lock(ctx, email, true).await
    }

    #[instrument(skip(self, ctx))]
    async fn restore_user(&self, ctx: &OpContext, email: &str) -> Result<(), AppError> {
        self.set_account_lock(ctx, email, false).await
    }

    #[instrument(skip(self, ctx))]
    async fn delete_user(&self, ctx: &OpContext, email: &str) -> Result<(), AppError> {
        let uid = self.resolve_uid(ctx, email).await?;
        self.call(ctx, OperationClass::Write, "user_del", vec![json!(uid)], Entry::new())
            .await?;
        info!(uid = %uid, "On-prem user deleted");
        Ok(())
    }

    fn list_groups<'a>(
        &'a self,
        ctx: &'a OpContext,
        _domain: Option<&'a str>,
    ) -> BoxStream<'a, Result<Group, AppError>> {
        paginate(move |_token| async move {
            let mut options = Entry::new();
            options.insert("sizelimit".to_string(), json!(0));
            options.insert("no_members".to_string(), json!(false));
            let entries = self
                .call(ctx, OperationClass::Read, "group_find", vec![json!("")], options)
                .await?
                .complete_entries()?;
            let mut groups = entries
                .iter()
                .map(group_from_entry)
                .collect::<Result<Vec<_>, _>>()?;
            groups.sort_by_key(|g| g.name.to_lowercase());
            Ok(Page::last(groups))
        })
    }

    #[instrument(skip(self, ctx))]
    async fn get_group(&self, ctx: &OpContext, group: &str) -> Result<Group, AppError> {
        let mut options = Entry::new();
        options.insert("no_members".to_string(), json!(false));
        let entry = self
            .call(ctx, OperationClass::Read, "group_show", vec![json!(group_cn(group))], options)
            .await?
            .entry()?;
        group_from_entry(&entry)
    }

    #[instrument(skip(self, ctx, group), fields(group = %group.name))]
    async fn create_group(&self, ctx: &OpContext, group: &Group) -> Result<Group, AppError> {
        let entry = self
            .call(
                ctx,
                OperationClass::Write,
                "group_add",
                vec![json!(group_cn(&group.name))],
                group_add_options(group),
            )
            .await?
            .entry()?;
        info!("On-prem group created");
        group_from_entry(&entry)
    }

    #[instrument(skip(self, ctx))]
    async fn delete_group(&self, ctx: &OpContext, group: &str) -> Result<(), AppError> {
        self.call(
            ctx,
            OperationClass::Write,
            "group_del",
            vec![json!(group_cn(group))],
            Entry::new(),
        )
        .await?;
        info!("On-prem group deleted");
        Ok(())
    }

    fn list_group_members<'a>(
        &'a self,
        ctx: &'a OpContext,
        group: &'a str,
    ) -> BoxStream<'a, Result<Member, AppError>> {
        paginate(move |_token| async move {
            let cn = group_cn(group);
            let mut show = Entry::new();
            show.insert("no_members".to_string(), json!(false));
            let group_entry = self
                .call(ctx, OperationClass::Read, "group_show", vec![json!(cn)], show)
                .await?
                .entry()?;
            let managers: HashSet<String> = manager_uids(&group_entry).into_iter().collect();

            let mut find = Entry::new();
            find.insert("in_group".to_string(), json!(cn));
            find.insert("sizelimit".to_string(), json!(0));
            let entries = self
                .call(ctx, OperationClass::Read, "user_find", vec![json!("")], find)
                .await?
                .complete_entries()?;

            let mut members = Vec::with_capacity(entries.len());
            for entry in &entries {
                let user = self.entry_to_user(entry)?;
                let role = if managers.contains(&user.login) {
                    MemberRole::Owner
                } else {
                    MemberRole::Member
                };
                members.push(Member {
                    email: user.primary_email,
                    role,
                });
            }
            members.sort_by_key(|m| identity_key(&m.email));
            Ok(Page::last(members))
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
        let uid = self.resolve_uid(ctx, email).await?;
        self.change_membership(ctx, "group_add_member", group, &uid, "is already a member")
            .await?;
        if role == MemberRole::Owner {
            self.change_membership(
                ctx,
                "group_add_member_manager",
                group,
                &uid,
                "already manages the group",
            )
            .await?;
        }
        info!(uid = %uid, "Member added to on-prem group");
        Ok(())
    }

    #[instrument(skip(self, ctx))]
    async fn remove_group_member(
        &self,
        ctx: &OpContext,
        group: &str,
        email: &str,
    ) -> Result<(), AppError> {
        let uid = self.resolve_uid(ctx, email).await?;
        self.change_membership(ctx, "group_remove_member", group, &uid, "is not a member")
            .await?;
        info!(uid = %uid, "Member removed from on-prem group");
        Ok(())
    }

    /// Owners are member managers; demotion removes the manager right.
    #[instrument(skip(self, ctx))]
    async fn change_member_role(
        &self,
        ctx: &OpContext,
        group: &str,
        email: &str,
        role: MemberRole,
    ) -> Result<(), AppError> {
        let uid = self.resolve_uid(ctx, email).await?;
        let (method, conflict) = match role {
            MemberRole::Owner => ("group_add_member_manager", "already manages the group"),
            MemberRole::Member => ("group_remove_member_manager", "does not manage the group"),
        };
        match self.change_membership(ctx, method, group, &uid, conflict).await {
            Err(AppError::Conflict(e)) => {
                debug!(uid = %uid, reason = %e, "Role already in requested state");
                Ok(())
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use directory_core::ErrorKind;

    fn err(code: i64) -> RpcError {
        RpcError {
            code,
            name: "Err".to_string(),
            message: "boom".to_string(),
        }
    }

    #[test]
    fn test_rpc_error_codes() {
        assert_eq!(rpc_error(err(4001)).kind(), ErrorKind::NotFound);
        assert_eq!(rpc_error(err(4002)).kind(), ErrorKind::Conflict);
        assert_eq!(rpc_error(err(2100)).kind(), ErrorKind::PermissionDenied);
        assert_eq!(rpc_error(err(903)).kind(), ErrorKind::Transient);
        assert_eq!(rpc_error(err(3009)).kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_group_key_from_address() {
        assert_eq!(group_cn("engineers@example.com"), "engineers");
        assert_eq!(group_cn("engineers"), "engineers");
    }
}
