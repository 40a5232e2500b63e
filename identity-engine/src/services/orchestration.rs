//! Operator-facing operations: validation first, then one or more client calls.

use super::pace;
use super::reports::{BulkReport, CreateUserReport, ItemOutcome};
use crate::clients::workspace::calendar_rule_id;
use crate::clients::{DirectoryClient, IpaClient, UserFilter, WorkspaceClient};
use crate::context::OpContext;
use crate::models::{
    validate_email, CalendarAcl, CalendarEntry, CalendarRole, Directory, DocumentAcl,
    DocumentRole, Group, Member, MemberRole, ScopeType, User, UserPatch,
};
use directory_core::error::{AppError, ErrorKind};
use futures::TryStreamExt;
use secrecy::{ExposeSecret, Secret};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use validator::Validate;

/// Stateless facade over both directories. Holds no mutable state of its own,
/// so a failed mutation cannot leave it half-committed.
#[derive(Clone)]
pub struct OrchestrationService {
    cloud: Option<Arc<WorkspaceClient>>,
    onprem: Option<Arc<IpaClient>>,
    inter_op_delay: Duration,
}

impl OrchestrationService {
    pub fn new(
        cloud: Option<Arc<WorkspaceClient>>,
        onprem: Option<Arc<IpaClient>>,
        inter_op_delay: Duration,
    ) -> Self {
        Self {
            cloud,
            onprem,
            inter_op_delay,
        }
    }

    pub fn cloud(&self) -> Result<&WorkspaceClient, AppError> {
        self.cloud.as_deref().ok_or_else(|| not_configured(Directory::Cloud))
    }

    pub fn onprem(&self) -> Result<&IpaClient, AppError> {
        self.onprem.as_deref().ok_or_else(|| not_configured(Directory::OnPrem))
    }

    pub fn cloud_handle(&self) -> Option<Arc<WorkspaceClient>> {
        self.cloud.clone()
    }

    pub fn onprem_handle(&self) -> Option<Arc<IpaClient>> {
        self.onprem.clone()
    }

    pub fn inter_op_delay(&self) -> Duration {
        self.inter_op_delay
    }

    pub fn client(&self, directory: Directory) -> Result<&dyn DirectoryClient, AppError> {
        match directory {
            Directory::Cloud => Ok(self.cloud()?),
            Directory::OnPrem => Ok(self.onprem()?),
        }
    }

    // =========================================================================
    // Users
    // =========================================================================

    pub async fn list_users(
        &self,
        ctx: &OpContext,
        directory: Directory,
        filter: &UserFilter,
    ) -> Result<Vec<User>, AppError> {
        self.client(directory)?.list_users(ctx, filter).try_collect().await
    }

    pub async fn get_user(
        &self,
        ctx: &OpContext,
        directory: Directory,
        email: &str,
    ) -> Result<User, AppError> {
        validate_email(email)?;
        self.client(directory)?.get_user(ctx, email).await
    }

    /// Create a user and enroll it in `initial_groups`. Enrollment failures
    /// are reported next to the created user; the user is kept.
    #[instrument(skip(self, ctx, user, initial_password), fields(email = %user.primary_email))]
    pub async fn create_user(
        &self,
        ctx: &OpContext,
        directory: Directory,
        user: &User,
        initial_password: &Secret<String>,
        initial_groups: &[String],
    ) -> Result<CreateUserReport, AppError> {
        user.validate()?;
        if initial_password.expose_secret().is_empty() {
            return Err(AppError::Validation(anyhow::anyhow!(
                "an initial password is required"
            )));
        }
        if directory == Directory::Cloud {
            for group in initial_groups {
                validate_email(group)?;
            }
        }
        let client = self.client(directory)?;

        match client.get_user(ctx, &user.primary_email).await {
            Ok(_) => {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "{} already exists in the {} directory",
                    user.primary_email,
                    directory
                )))
            }
            Err(AppError::NotFound(_)) => {}
            Err(e) if matches!(e.kind(), ErrorKind::Transient | ErrorKind::RateLimited) => {
                warn!(error = %e, "Existence check failed, attempting create anyway");
            }
            Err(e) => return Err(e),
        }

        let created = client.create_user(ctx, user, initial_password).await?;

        let mut group_failures = Vec::new();
        for group in initial_groups {
            match client
                .add_group_member(ctx, group, &created.primary_email, MemberRole::Member)
                .await
            {
                Ok(()) | Err(AppError::Conflict(_)) => {}
                Err(e) => {
                    warn!(group = %group, error = %e, "Initial group enrollment failed");
                    group_failures.push((group.clone(), ItemOutcome::failed(&e)));
                }
            }
        }

        info!(
            directory = %directory,
            groups = initial_groups.len(),
            failures = group_failures.len(),
            "User created"
        );
        Ok(CreateUserReport {
            user: created,
            group_failures,
        })
    }

    #[instrument(skip(self, ctx, patch))]
    pub async fn update_user(
        &self,
        ctx: &OpContext,
        directory: Directory,
        email: &str,
        patch: &UserPatch,
    ) -> Result<User, AppError> {
        validate_email(email)?;
        validate_patch(patch)?;
        self.client(directory)?.update_user(ctx, email, patch).await
    }

    pub async fn suspend_user(
        &self,
        ctx: &OpContext,
        directory: Directory,
        email: &str,
    ) -> Result<(), AppError> {
        validate_email(email)?;
        self.client(directory)?.suspend_user(ctx, email).await
    }

    pub async fn restore_user(
        &self,
        ctx: &OpContext,
        directory: Directory,
        email: &str,
    ) -> Result<(), AppError> {
        validate_email(email)?;
        self.client(directory)?.restore_user(ctx, email).await
    }

    pub async fn delete_user(
        &self,
        ctx: &OpContext,
        directory: Directory,
        email: &str,
    ) -> Result<(), AppError> {
        validate_email(email)?;
        self.client(directory)?.delete_user(ctx, email).await
    }

    // =========================================================================
    // Groups and membership
    // =========================================================================

    pub async fn list_groups(
        &self,
        ctx: &OpContext,
        directory: Directory,
        domain: Option<&str>,
    ) -> Result<Vec<Group>, AppError> {
        self.client(directory)?.list_groups(ctx, domain).try_collect().await
    }

    pub async fn get_group(
        &self,
        ctx: &OpContext,
        directory: Directory,
        group: &str,
    ) -> Result<Group, AppError> {
        self.client(directory)?.get_group(ctx, group).await
    }

    pub async fn create_group(
        &self,
        ctx: &OpContext,
        directory: Directory,
        group: &Group,
    ) -> Result<Group, AppError> {
        if group.name.trim().is_empty() {
            return Err(AppError::Validation(anyhow::anyhow!("group name must not be empty")));
        }
        if let Some(email) = &group.email {
            validate_email(email)?;
        } else if directory == Directory::Cloud {
            return Err(AppError::Validation(anyhow::anyhow!(
                "cloud groups need an address"
            )));
        }
        self.client(directory)?.create_group(ctx, group).await
    }

    pub async fn delete_group(
        &self,
        ctx: &OpContext,
        directory: Directory,
        group: &str,
    ) -> Result<(), AppError> {
        self.client(directory)?.delete_group(ctx, group).await
    }

    pub async fn list_group_members(
        &self,
        ctx: &OpContext,
        directory: Directory,
        group: &str,
    ) -> Result<Vec<Member>, AppError> {
        self.client(directory)?
            .list_group_members(ctx, group)
            .try_collect()
            .await
    }

    pub async fn add_member(
        &self,
        ctx: &OpContext,
        directory: Directory,
        group: &str,
        email: &str,
        role: MemberRole,
    ) -> Result<(), AppError> {
        validate_email(email)?;
        self.client(directory)?
            .add_group_member(ctx, group, email, role)
            .await
    }

    pub async fn remove_member(
        &self,
        ctx: &OpContext,
        directory: Directory,
        group: &str,
        email: &str,
    ) -> Result<(), AppError> {
        validate_email(email)?;
        self.client(directory)?
            .remove_group_member(ctx, group, email)
            .await
    }

    pub async fn change_member_role(
        &self,
        ctx: &OpContext,
        directory: Directory,
        group: &str,
        email: &str,
        role: &str,
    ) -> Result<(), AppError> {
        validate_email(email)?;
        let role: MemberRole = role.parse()?;
        self.client(directory)?
            .change_member_role(ctx, group, email, role)
            .await
    }

    /// Add each address to `group`, one call per member with a pause between
    /// calls. Never stops on a failure; a cancelled run returns the outcomes
    /// gathered so far.
    #[instrument(skip(self, ctx, members), fields(count = members.len()))]
    pub async fn add_members_bulk(
        &self,
        ctx: &OpContext,
        directory: Directory,
        group: &str,
        members: &[String],
        role: MemberRole,
    ) -> Result<BulkReport, AppError> {
        let client = self.client(directory)?;
        let mut report = BulkReport::default();

        for (index, email) in members.iter().enumerate() {
            if let Err(e) = validate_email(email) {
                report.push(email.clone(), ItemOutcome::failed(&e));
                continue;
            }
            if pace(ctx, self.inter_op_delay, index).await.is_err() {
                report.cancelled = true;
                break;
            }
            let outcome = match client.add_group_member(ctx, group, email, role).await {
                Ok(()) => ItemOutcome::Added,
                Err(AppError::Conflict(_)) => ItemOutcome::AlreadyPresent,
                Err(e) => {
                    warn!(email = %email, error = %e, "Member add failed");
                    ItemOutcome::failed(&e)
                }
            };
            report.push(email.clone(), outcome);
        }

        info!(
            added = report.succeeded(),
            failed = report.failed(),
            cancelled = report.cancelled,
            "Bulk member add finished"
        );
        Ok(report)
    }

    // =========================================================================
    // Calendars
    // =========================================================================

    pub async fn list_calendars(&self, ctx: &OpContext) -> Result<Vec<CalendarEntry>, AppError> {
        self.cloud()?.list_calendars(ctx).try_collect().await
    }

    pub async fn list_calendar_acl(
        &self,
        ctx: &OpContext,
        calendar_id: &str,
    ) -> Result<Vec<CalendarAcl>, AppError> {
        self.cloud()?
            .list_calendar_acl(ctx, calendar_id)
            .try_collect()
            .await
    }

    pub async fn add_calendar_member(
        &self,
        ctx: &OpContext,
        calendar_id: &str,
        email: &str,
        role: &str,
    ) -> Result<CalendarAcl, AppError> {
        validate_email(email)?;
        let role: CalendarRole = role.parse()?;
        self.cloud()?
            .add_calendar_acl(ctx, &CalendarAcl::for_user(calendar_id, email, role))
            .await
    }

    pub async fn update_calendar_member(
        &self,
        ctx: &OpContext,
        calendar_id: &str,
        email: &str,
        role: &str,
    ) -> Result<CalendarAcl, AppError> {
        validate_email(email)?;
        let role: CalendarRole = role.parse()?;
        let rule = self.find_calendar_rule(ctx, calendar_id, email).await?;
        self.cloud()?
            .update_calendar_acl(ctx, calendar_id, &rule_id(&rule), role)
            .await
    }

    /// Delete the user's rule on the calendar; `NotFound` when there is none.
    #[instrument(skip(self, ctx))]
    pub async fn remove_calendar_member(
        &self,
        ctx: &OpContext,
        calendar_id: &str,
        email: &str,
    ) -> Result<(), AppError> {
        validate_email(email)?;
        let rule = self.find_calendar_rule(ctx, calendar_id, email).await?;
        self.cloud()?
            .remove_calendar_acl(ctx, calendar_id, &rule_id(&rule))
            .await
    }

    /// Walk the ACL pages until the user's rule turns up.
    async fn find_calendar_rule(
        &self,
        ctx: &OpContext,
        calendar_id: &str,
        email: &str,
    ) -> Result<CalendarAcl, AppError> {
        let mut rules = self.cloud()?.list_calendar_acl(ctx, calendar_id);
        while let Some(rule) = rules.try_next().await? {
            if rule.matches_scope(ScopeType::User, email) {
                return Ok(rule);
            }
        }
        Err(AppError::NotFound(anyhow::anyhow!(
            "{} has no access rule on calendar {}",
            email,
            calendar_id
        )))
    }

    // =========================================================================
    // Documents
    // =========================================================================

    pub async fn list_document_acl(
        &self,
        ctx: &OpContext,
        document_id: &str,
    ) -> Result<Vec<DocumentAcl>, AppError> {
        self.cloud()?
            .list_document_acl(ctx, document_id)
            .try_collect()
            .await
    }

    pub async fn grant_document_acl(
        &self,
        ctx: &OpContext,
        document_id: &str,
        email: &str,
        role: &str,
        notify: bool,
        allow_owner_transfer: bool,
    ) -> Result<DocumentAcl, AppError> {
        validate_email(email)?;
        let role = document_role(role, allow_owner_transfer)?;
        self.cloud()?
            .grant_document_acl(ctx, document_id, email, role, notify)
            .await
    }

    pub async fn revoke_document_acl(
        &self,
        ctx: &OpContext,
        document_id: &str,
        email: &str,
    ) -> Result<(), AppError> {
        validate_email(email)?;
        let permission = self.find_permission(ctx, document_id, email).await?;
        self.cloud()?
            .revoke_document_acl(ctx, document_id, &permission.permission_id)
            .await
    }

    /// Patch only the role of the grantee's existing permission.
    #[instrument(skip(self, ctx))]
    pub async fn change_document_acl_role(
        &self,
        ctx: &OpContext,
        document_id: &str,
        email: &str,
        new_role: &str,
        allow_owner_transfer: bool,
    ) -> Result<DocumentAcl, AppError> {
        validate_email(email)?;
        let role = document_role(new_role, allow_owner_transfer)?;
        let permission = self.find_permission(ctx, document_id, email).await?;
        if permission.role == role {
            return Ok(permission);
        }
        self.cloud()?
            .update_document_acl_role(ctx, document_id, &permission.permission_id, role)
            .await
    }

    async fn find_permission(
        &self,
        ctx: &OpContext,
        document_id: &str,
        email: &str,
    ) -> Result<DocumentAcl, AppError> {
        let mut permissions = self.cloud()?.list_document_acl(ctx, document_id);
        while let Some(permission) = permissions.try_next().await? {
            if permission.grantee_email.eq_ignore_ascii_case(email) {
                return Ok(permission);
            }
        }
        Err(AppError::NotFound(anyhow::anyhow!(
            "{} has no permission on document {}",
            email,
            document_id
        )))
    }
}

fn not_configured(directory: Directory) -> AppError {
    AppError::AuthConfigMissing(anyhow::anyhow!(
        "the {} directory is not configured",
        directory
    ))
}

fn rule_id(rule: &CalendarAcl) -> String {
    rule.rule_id
        .clone()
        .unwrap_or_else(|| calendar_rule_id(rule.scope_type, &rule.scope_value))
}

fn document_role(role: &str, allow_owner_transfer: bool) -> Result<DocumentRole, AppError> {
    let role: DocumentRole = role.parse()?;
    if role == DocumentRole::Owner && !allow_owner_transfer {
        return Err(AppError::Validation(anyhow::anyhow!(
            "ownership transfer was not enabled for this call"
        )));
    }
    Ok(role)
}

fn validate_patch(patch: &UserPatch) -> Result<(), AppError> {
    if patch.is_empty() {
        return Err(AppError::Validation(anyhow::anyhow!("nothing to update")));
    }
    for (field, value) in [
        ("given_name", &patch.given_name),
        ("family_name", &patch.family_name),
    ] {
        if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
            return Err(AppError::Validation(anyhow::anyhow!(
                "{} must not be empty",
                field
            )));
        }
    }
    if let Some(path) = &patch.org_path {
        if !path.starts_with('/') {
            return Err(AppError::Validation(anyhow::anyhow!(
                "org path '{}' must start with '/'",
                path
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unconfigured() -> OrchestrationService {
        OrchestrationService::new(None, None, Duration::ZERO)
    }

    #[test]
    fn test_owner_role_needs_explicit_opt_in() {
        assert_eq!(
            document_role("owner", false).unwrap_err().kind(),
            ErrorKind::Validation
        );
        assert_eq!(document_role("owner", true).unwrap(), DocumentRole::Owner);
        assert_eq!(document_role("commenter", false).unwrap(), DocumentRole::Commenter);
        assert!(document_role("editor", true).is_err());
    }

    #[test]
    fn test_patch_validation() {
        assert!(validate_patch(&UserPatch::default()).is_err());
        assert!(validate_patch(&UserPatch::suspended(true)).is_ok());
        let blank = UserPatch {
            given_name: Some(" ".to_string()),
            ..Default::default()
        };
        assert!(validate_patch(&blank).is_err());
        let relative = UserPatch {
            org_path: Some("Engineering".to_string()),
            ..Default::default()
        };
        assert!(validate_patch(&relative).is_err());
    }

    #[test]
    fn test_rule_id_falls_back_to_scope() {
        let mut rule = CalendarAcl::for_user("cal", "a@example.com", CalendarRole::Reader);
        rule.rule_id = None;
        assert_eq!(rule_id(&rule), "user:a@example.com");
        rule.rule_id = Some("custom".to_string());
        assert_eq!(rule_id(&rule), "custom");
    }

    #[tokio::test]
    async fn test_unconfigured_directory_is_reported() {
        let err = unconfigured()
            .get_user(&OpContext::new(), Directory::OnPrem, "a@example.com")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthConfigMissing);
    }

    #[tokio::test]
    async fn test_invalid_email_rejected_before_any_call() {
        let err = unconfigured()
            .remove_calendar_member(&OpContext::new(), "cal", "c@invalid")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_invalid_role_rejected_before_any_call() {
        let err = unconfigured()
            .add_calendar_member(&OpContext::new(), "cal", "a@example.com", "admin")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
