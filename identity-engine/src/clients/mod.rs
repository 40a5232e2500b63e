//! Typed clients for the two directories.

pub mod ipa;
#[cfg(test)]
pub(crate) mod memory;
pub mod paging;
pub mod transport;
pub mod workspace;

pub use ipa::IpaClient;
pub use paging::{paginate, Page};
pub use workspace::{calendar_id_from_share_url, share_url_for_calendar, WorkspaceClient};

use crate::context::OpContext;
use crate::models::{domain_part, Directory, Group, Member, MemberRole, User, UserPatch};
use async_trait::async_trait;
use directory_core::error::AppError;
use futures::stream::BoxStream;
use secrecy::Secret;
use serde::Deserialize;

/// Narrowing applied to user listings. Server-side where the backend
/// supports it; [`UserFilter::matches`] is applied to every item regardless.
#[derive(Debug, Clone, Deserialize)]
pub struct UserFilter {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub org_path: Option<String>,
    #[serde(default = "default_include_suspended")]
    pub include_suspended: bool,
    /// Backend-specific free-text search, passed through verbatim.
    #[serde(default)]
    pub query: Option<String>,
}

fn default_include_suspended() -> bool {
    true
}

impl Default for UserFilter {
    fn default() -> Self {
        Self {
            domain: None,
            org_path: None,
            include_suspended: true,
            query: None,
        }
    }
}

impl UserFilter {
    pub fn domain(domain: impl Into<String>) -> Self {
        Self {
            domain: Some(domain.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, user: &User) -> bool {
        if !self.include_suspended && user.suspended {
            return false;
        }
        if let Some(domain) = &self.domain {
            match domain_part(&user.primary_email) {
                Some(d) if d.eq_ignore_ascii_case(domain) => {}
                _ => return false,
            }
        }
        if let Some(path) = self.org_path.as_deref().filter(|p| *p != "/") {
            let path = path.trim_end_matches('/');
            let under = user
                .org_path
                .strip_prefix(path)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'));
            if !under {
                return false;
            }
        }
        true
    }
}

/// Operations both directories support. Group keys are the group address for
/// the cloud directory and the group name on-prem; an address passed to the
/// on-prem client is reduced to its local part.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    fn directory(&self) -> Directory;

    fn list_users<'a>(
        &'a self,
        ctx: &'a OpContext,
        filter: &'a UserFilter,
    ) -> BoxStream<'a, Result<User, AppError>>;

    async fn get_user(&self, ctx: &OpContext, email: &str) -> Result<User, AppError>;

    async fn create_user(
        &self,
        ctx: &OpContext,
        user: &User,
        initial_password: &Secret<String>,
    ) -> Result<User, AppError>;

    async fn update_user(
        &self,
        ctx: &OpContext,
        email: &str,
        patch: &UserPatch,
    ) -> Result<User, AppError>;

    async fn suspend_user(&self, ctx: &OpContext, email: &str) -> Result<(), AppError> {
        self.update_user(ctx, email, &UserPatch::suspended(true)).await.map(|_| ())
    }

    async fn restore_user(&self, ctx: &OpContext, email: &str) -> Result<(), AppError> {
        self.update_user(ctx, email, &UserPatch::suspended(false)).await.map(|_| ())
    }

    async fn delete_user(&self, ctx: &OpContext, email: &str) -> Result<(), AppError>;

    fn list_groups<'a>(
        &'a self,
        ctx: &'a OpContext,
        domain: Option<&'a str>,
    ) -> BoxStream<'a, Result<Group, AppError>>;

    async fn get_group(&self, ctx: &OpContext, group: &str) -> Result<Group, AppError>;

    async fn create_group(&self, ctx: &OpContext, group: &Group) -> Result<Group, AppError>;

    async fn delete_group(&self, ctx: &OpContext, group: &str) -> Result<(), AppError>;

    fn list_group_members<'a>(
        &'a self,
        ctx: &'a OpContext,
        group: &'a str,
    ) -> BoxStream<'a, Result<Member, AppError>>;

    /// `Conflict` when the user is already a member.
    async fn add_group_member(
        &self,
        ctx: &OpContext,
        group: &str,
        email: &str,
        role: MemberRole,
    ) -> Result<(), AppError>;

    /// `NotFound` or `Conflict` when the user is not a member.
    async fn remove_group_member(
        &self,
        ctx: &OpContext,
        group: &str,
        email: &str,
    ) -> Result<(), AppError>;

    async fn change_member_role(
        &self,
        ctx: &OpContext,
        group: &str,
        email: &str,
        role: MemberRole,
    ) -> Result<(), AppError>;
}
