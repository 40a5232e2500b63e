//! Directional diffs between the two directories and the imports that apply them.
//!
//! Reads on both sides run concurrently; writes run one at a time with the
//! configured pause between them. Nothing is ever rolled back: every item ends
//! in its own terminal outcome and the report is returned even when all of
//! them failed.

use super::pace;
use super::reports::{ComparisonReport, ImportReport, ItemOutcome, MembershipFailure};
use super::OrchestrationService;
use crate::clients::{DirectoryClient, UserFilter};
use crate::context::OpContext;
use crate::models::{identity_key, local_part, validate_email, Group, Member, MemberRole, User};
use directory_core::error::AppError;
use futures::TryStreamExt;
use rand::distributions::Alphanumeric;
use rand::Rng;
use secrecy::Secret;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Groups every on-prem server ships with; never compared or imported.
pub const BUILTIN_GROUPS: &[&str] = &[
    "admins",
    "editors",
    "ipausers",
    "trust admins",
    "default smb group",
    "domain admins",
    "domain users",
];

const TEMP_PASSWORD_LEN: usize = 20;

pub struct Reconciler {
    cloud: Arc<dyn DirectoryClient>,
    onprem: Arc<dyn DirectoryClient>,
    inter_op_delay: Duration,
}

impl Reconciler {
    pub fn new(
        cloud: Arc<dyn DirectoryClient>,
        onprem: Arc<dyn DirectoryClient>,
        inter_op_delay: Duration,
    ) -> Self {
        Self {
            cloud,
            onprem,
            inter_op_delay,
        }
    }

    /// Both directories must be configured.
    pub fn from_service(service: &OrchestrationService) -> Result<Self, AppError> {
        let cloud = service.cloud_handle().ok_or_else(|| {
            AppError::AuthConfigMissing(anyhow::anyhow!("the cloud directory is not configured"))
        })?;
        let onprem = service.onprem_handle().ok_or_else(|| {
            AppError::AuthConfigMissing(anyhow::anyhow!("the onprem directory is not configured"))
        })?;
        Ok(Self::new(cloud, onprem, service.inter_op_delay()))
    }

    async fn users_on_both_sides(
        &self,
        ctx: &OpContext,
        filter: &UserFilter,
    ) -> Result<(Vec<User>, Vec<User>), AppError> {
        tokio::try_join!(
            self.cloud.list_users(ctx, filter).try_collect::<Vec<_>>(),
            self.onprem.list_users(ctx, filter).try_collect::<Vec<_>>(),
        )
    }

    async fn groups_on_both_sides(
        &self,
        ctx: &OpContext,
        domain: Option<&str>,
    ) -> Result<(Vec<Group>, Vec<Group>), AppError> {
        tokio::try_join!(
            self.cloud.list_groups(ctx, domain).try_collect::<Vec<_>>(),
            self.onprem.list_groups(ctx, domain).try_collect::<Vec<_>>(),
        )
    }

    // =========================================================================
    // Comparison
    // =========================================================================

    #[instrument(skip(self, ctx))]
    pub async fn compare_users(
        &self,
        ctx: &OpContext,
        domain: Option<&str>,
    ) -> Result<ComparisonReport, AppError> {
        let (cloud, onprem) = self.users_on_both_sides(ctx, &user_filter(domain)).await?;
        let report = diff(
            cloud.iter().map(|u| identity_key(&u.primary_email)).collect(),
            onprem.iter().map(|u| identity_key(&u.primary_email)).collect(),
        );
        info!(
            only_in_cloud = report.only_in_cloud.len(),
            only_in_onprem = report.only_in_onprem.len(),
            in_both = report.in_both.len(),
            "User comparison finished"
        );
        Ok(report)
    }

    #[instrument(skip(self, ctx))]
    pub async fn compare_groups(
        &self,
        ctx: &OpContext,
        domain: Option<&str>,
    ) -> Result<ComparisonReport, AppError> {
        let (cloud, onprem) = self.groups_on_both_sides(ctx, domain).await?;
        let report = diff(group_keys(&cloud), group_keys(&onprem));
        info!(
            only_in_cloud = report.only_in_cloud.len(),
            only_in_onprem = report.only_in_onprem.len(),
            in_both = report.in_both.len(),
            "Group comparison finished"
        );
        Ok(report)
    }

    // =========================================================================
    // Imports
    // =========================================================================

    /// Create every cloud user missing on-prem, then enroll it in
    /// `default_groups`. Enrollment failures do not undo the create.
    #[instrument(skip(self, ctx, default_groups))]
    pub async fn import_users_to_onprem(
        &self,
        ctx: &OpContext,
        domain: Option<&str>,
        default_groups: &[String],
    ) -> Result<ImportReport, AppError> {
        let (cloud, onprem) = self.users_on_both_sides(ctx, &user_filter(domain)).await?;
        let missing = missing_users(&cloud, &onprem);
        let mut report = ImportReport::default();

        // Account creations and default-group enrollments share one pacing sequence.
        let mut writes = 0;
        for user in missing {
            if pace(ctx, self.inter_op_delay, writes).await.is_err() {
                report.cancelled = true;
                break;
            }
            writes += 1;
            let key = identity_key(&user.primary_email);
            let candidate = user.for_cross_directory_create();
            match self
                .onprem
                .create_user(ctx, &candidate, &temporary_password())
                .await
            {
                Ok(_) => {
                    for group in default_groups {
                        if pace(ctx, self.inter_op_delay, writes).await.is_err() {
                            report.cancelled = true;
                            break;
                        }
                        writes += 1;
                        let enrolled = self
                            .onprem
                            .add_group_member(
                                ctx,
                                group,
                                &candidate.primary_email,
                                MemberRole::Member,
                            )
                            .await;
                        match enrolled {
                            Ok(()) | Err(AppError::Conflict(_)) => {}
                            Err(e) => {
                                warn!(
                                    email = %key,
                                    group = %group,
                                    error = %e,
                                    "Default group enrollment failed"
                                );
                                report.membership_failures.push(MembershipFailure {
                                    email: key.clone(),
                                    group: group.clone(),
                                    kind: e.kind(),
                                    message: e.message(),
                                });
                            }
                        }
                    }
                    report.record(key, ItemOutcome::Created);
                    if report.cancelled {
                        break;
                    }
                }
                Err(e) => {
                    warn!(email = %key, error = %e, "On-prem user import failed");
                    report.record(key, ItemOutcome::failed(&e));
                }
            }
        }

        info!(
            created = report.succeeded(),
            failed = report.failed(),
            cancelled = report.cancelled,
            "User import finished"
        );
        Ok(report)
    }

    /// Create every cloud group missing on-prem, named by its short name.
    #[instrument(skip(self, ctx))]
    pub async fn import_groups_to_onprem(
        &self,
        ctx: &OpContext,
        domain: Option<&str>,
    ) -> Result<ImportReport, AppError> {
        let (cloud, onprem) = self.groups_on_both_sides(ctx, domain).await?;
        let present = group_keys(&onprem);
        let mut missing: Vec<&Group> = cloud
            .iter()
            .filter(|g| {
                let key = group_key(g);
                !present.contains(&key) && !is_builtin(&key)
            })
            .collect();
        missing.sort_by_key(|g| group_key(g));
        missing.dedup_by_key(|g| group_key(g));

        let mut report = ImportReport::default();
        for (index, group) in missing.into_iter().enumerate() {
            if pace(ctx, self.inter_op_delay, index).await.is_err() {
                report.cancelled = true;
                break;
            }
            let key = group_key(group);
            let candidate = Group {
                name: group.short_name().to_string(),
                email: None,
                description: group.description.clone(),
                member_count: 0,
            };
            let outcome = match self.onprem.create_group(ctx, &candidate).await {
                Ok(_) => ItemOutcome::Created,
                Err(AppError::Conflict(_)) => ItemOutcome::AlreadyPresent,
                Err(e) => {
                    warn!(group = %key, error = %e, "On-prem group import failed");
                    ItemOutcome::failed(&e)
                }
            };
            report.record(key, outcome);
        }

        info!(
            created = report.succeeded(),
            failed = report.failed(),
            cancelled = report.cancelled,
            "Group import finished"
        );
        Ok(report)
    }

    /// Copy the members of a cloud group into the on-prem group with the same
    /// short name, keeping each member's role.
    #[instrument(skip(self, ctx))]
    pub async fn import_group_members(
        &self,
        ctx: &OpContext,
        cloud_group: &str,
    ) -> Result<ImportReport, AppError> {
        validate_email(cloud_group)?;
        let target = local_part(cloud_group);
        let (cloud, onprem): (Vec<Member>, Vec<Member>) = tokio::try_join!(
            self.cloud.list_group_members(ctx, cloud_group).try_collect::<Vec<_>>(),
            self.onprem.list_group_members(ctx, target).try_collect::<Vec<_>>(),
        )?;
        let present: HashSet<String> = onprem.iter().map(|m| identity_key(&m.email)).collect();
        let mut members: Vec<&Member> = cloud.iter().collect();
        members.sort_by_key(|m| identity_key(&m.email));

        let mut report = ImportReport::default();
        let mut writes = 0;
        for member in members {
            let key = identity_key(&member.email);
            if present.contains(&key) {
                report.record(key, ItemOutcome::AlreadyPresent);
                continue;
            }
            if pace(ctx, self.inter_op_delay, writes).await.is_err() {
                report.cancelled = true;
                break;
            }
            writes += 1;
            let outcome = match self
                .onprem
                .add_group_member(ctx, target, &member.email, member.role)
                .await
            {
                Ok(()) => ItemOutcome::Added,
                Err(AppError::Conflict(_)) => ItemOutcome::AlreadyPresent,
                Err(e) => {
                    warn!(email = %key, error = %e, "Member import failed");
                    ItemOutcome::failed(&e)
                }
            };
            report.record(key, outcome);
        }

        info!(
            target = %target,
            succeeded = report.succeeded(),
            failed = report.failed(),
            cancelled = report.cancelled,
            "Member import finished"
        );
        Ok(report)
    }

    /// Create cloud accounts for on-prem users in `domain` that the cloud
    /// directory does not have yet.
    #[instrument(skip(self, ctx, initial_password))]
    pub async fn export_users_to_cloud(
        &self,
        ctx: &OpContext,
        domain: &str,
        initial_password: &Secret<String>,
    ) -> Result<ImportReport, AppError> {
        if domain.trim().is_empty() {
            return Err(AppError::Validation(anyhow::anyhow!(
                "export needs a target domain"
            )));
        }
        let (cloud, onprem) = self.users_on_both_sides(ctx, &UserFilter::domain(domain)).await?;
        let missing = missing_users(&onprem, &cloud);
        let mut report = ImportReport::default();

        for (index, user) in missing.into_iter().enumerate() {
            if pace(ctx, self.inter_op_delay, index).await.is_err() {
                report.cancelled = true;
                break;
            }
            let key = identity_key(&user.primary_email);
            let outcome = match self
                .cloud
                .create_user(ctx, &user.for_cross_directory_create(), initial_password)
                .await
            {
                Ok(_) => ItemOutcome::Created,
                Err(e) => {
                    warn!(email = %key, error = %e, "Cloud user export failed");
                    ItemOutcome::failed(&e)
                }
            };
            report.record(key, outcome);
        }

        info!(
            created = report.succeeded(),
            failed = report.failed(),
            cancelled = report.cancelled,
            "User export finished"
        );
        Ok(report)
    }
}

fn user_filter(domain: Option<&str>) -> UserFilter {
    domain.map(UserFilter::domain).unwrap_or_default()
}

fn group_key(group: &Group) -> String {
    group.short_name().to_lowercase()
}

fn is_builtin(key: &str) -> bool {
    BUILTIN_GROUPS.contains(&key)
}

fn group_keys(groups: &[Group]) -> BTreeSet<String> {
    groups
        .iter()
        .map(group_key)
        .filter(|key| !is_builtin(key))
        .collect()
}

/// Users of `source` whose address `target` does not know, sorted by key.
fn missing_users<'a>(source: &'a [User], target: &[User]) -> Vec<&'a User> {
    let present: HashSet<String> = target
        .iter()
        .map(|u| identity_key(&u.primary_email))
        .collect();
    let mut missing: Vec<&User> = source
        .iter()
        .filter(|u| !present.contains(&identity_key(&u.primary_email)))
        .collect();
    missing.sort_by_key(|u| identity_key(&u.primary_email));
    missing.dedup_by_key(|u| identity_key(&u.primary_email));
    missing
}

fn diff(cloud: BTreeSet<String>, onprem: BTreeSet<String>) -> ComparisonReport {
    ComparisonReport {
        only_in_cloud: cloud.difference(&onprem).cloned().collect(),
        only_in_onprem: onprem.difference(&cloud).cloned().collect(),
        in_both: cloud.intersection(&onprem).cloned().collect(),
        total_cloud: cloud.len(),
        total_onprem: onprem.len(),
    }
}

/// Initial password for imported accounts; the server expires it at first login.
fn temporary_password() -> Secret<String> {
    let body: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TEMP_PASSWORD_LEN)
        .map(char::from)
        .collect();
    Secret::new(format!("{}#9", body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::memory::MemoryDirectory;
    use crate::models::Directory;
    use directory_core::ErrorKind;

    type Fixture = (Reconciler, Arc<MemoryDirectory>, Arc<MemoryDirectory>);

    fn reconciler(cloud: MemoryDirectory, onprem: MemoryDirectory) -> Fixture {
        paced_reconciler(cloud, onprem, Duration::ZERO)
    }

    fn paced_reconciler(
        cloud: MemoryDirectory,
        onprem: MemoryDirectory,
        delay: Duration,
    ) -> Fixture {
        let cloud = Arc::new(cloud);
        let onprem = Arc::new(onprem);
        let reconciler = Reconciler::new(cloud.clone(), onprem.clone(), delay);
        (reconciler, cloud, onprem)
    }

    fn cloud_group(email: &str) -> Group {
        let mut group = Group::new(local_part(email));
        group.email = Some(email.to_string());
        group
    }

    #[tokio::test]
    async fn test_import_paces_group_enrollments() {
        let delay = Duration::from_millis(40);
        let (reconciler, _, onprem) = paced_reconciler(
            MemoryDirectory::new(Directory::Cloud).with_users(&["a@e.com", "b@e.com"]),
            MemoryDirectory::new(Directory::OnPrem)
                .with_group(Group::new("staff"), &[])
                .with_group(Group::new("vpn"), &[]),
            delay,
        );
        let groups = vec!["staff".to_string(), "vpn".to_string()];

        let started = std::time::Instant::now();
        let report = reconciler
            .import_users_to_onprem(&OpContext::new(), Some("e.com"), &groups)
            .await
            .unwrap();

        // Two creations and four enrollments: five gaps between six writes.
        assert!(started.elapsed() >= delay * 5);
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(onprem.members("vpn"), vec!["a@e.com", "b@e.com"]);
    }

    #[tokio::test]
    async fn test_compare_users() {
        let (reconciler, _, _) = reconciler(
            MemoryDirectory::new(Directory::Cloud).with_users(&["u1@e.com", "U2@e.com"]),
            MemoryDirectory::new(Directory::OnPrem).with_users(&["u2@e.com", "u3@e.com"]),
        );
        let report = reconciler.compare_users(&OpContext::new(), None).await.unwrap();
        assert_eq!(report.only_in_cloud, vec!["u1@e.com"]);
        assert_eq!(report.only_in_onprem, vec!["u3@e.com"]);
        assert_eq!(report.in_both, vec!["u2@e.com"]);
        assert_eq!(report.total_cloud, 2);
        assert_eq!(report.total_onprem, 2);
    }

    #[tokio::test]
    async fn test_compare_groups_skips_builtins() {
        let (reconciler, _, _) = reconciler(
            MemoryDirectory::new(Directory::Cloud)
                .with_group(cloud_group("engineers@e.com"), &[])
                .with_group(cloud_group("admins@e.com"), &[]),
            MemoryDirectory::new(Directory::OnPrem)
                .with_group(Group::new("Engineers"), &[])
                .with_group(Group::new("ipausers"), &[])
                .with_group(Group::new("Domain Users"), &[])
                .with_group(Group::new("ops"), &[]),
        );
        let report = reconciler.compare_groups(&OpContext::new(), None).await.unwrap();
        assert!(report.only_in_cloud.is_empty());
        assert_eq!(report.only_in_onprem, vec!["ops"]);
        assert_eq!(report.in_both, vec!["engineers"]);
        assert_eq!(report.total_onprem, 2);
    }

    #[tokio::test]
    async fn test_import_then_compare_leaves_nothing_only_in_cloud() {
        let (reconciler, _, onprem) = reconciler(
            MemoryDirectory::new(Directory::Cloud).with_users(&["a@e.com", "b@e.com", "c@e.com"]),
            MemoryDirectory::new(Directory::OnPrem)
                .with_users(&["c@e.com"])
                .with_group(Group::new("staff"), &[]),
        );
        let ctx = OpContext::new();
        let report = reconciler
            .import_users_to_onprem(&ctx, Some("e.com"), &["staff".to_string()])
            .await
            .unwrap();
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.outcomes["a@e.com"], ItemOutcome::Created);
        assert!(report.membership_failures.is_empty());
        assert_eq!(onprem.members("staff"), vec!["a@e.com", "b@e.com"]);

        let after = reconciler.compare_users(&ctx, Some("e.com")).await.unwrap();
        assert!(after.only_in_cloud.is_empty());
    }

    #[tokio::test]
    async fn test_import_isolates_failures() {
        let onprem = MemoryDirectory::new(Directory::OnPrem);
        onprem.fail_on("b@e.com");
        let (reconciler, _, _) = reconciler(
            MemoryDirectory::new(Directory::Cloud).with_users(&["a@e.com", "b@e.com", "c@e.com"]),
            onprem,
        );
        let report = reconciler
            .import_users_to_onprem(&OpContext::new(), None, &[])
            .await
            .unwrap();
        assert_eq!(report.succeeded(), 2);
        assert!(matches!(
            report.outcomes["b@e.com"],
            ItemOutcome::Failed { kind: ErrorKind::Transient, .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_default_group_is_reported_not_rolled_back() {
        let (reconciler, _, onprem) = reconciler(
            MemoryDirectory::new(Directory::Cloud).with_users(&["a@e.com"]),
            MemoryDirectory::new(Directory::OnPrem),
        );
        let report = reconciler
            .import_users_to_onprem(&OpContext::new(), None, &["nope".to_string()])
            .await
            .unwrap();
        assert_eq!(report.outcomes["a@e.com"], ItemOutcome::Created);
        assert_eq!(report.membership_failures.len(), 1);
        assert_eq!(report.membership_failures[0].kind, ErrorKind::NotFound);
        assert!(onprem.get_user(&OpContext::new(), "a@e.com").await.is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_import_returns_partial_report() {
        let (reconciler, _, onprem) = reconciler(
            MemoryDirectory::new(Directory::Cloud).with_users(&["a@e.com", "b@e.com"]),
            MemoryDirectory::new(Directory::OnPrem),
        );
        let ctx = OpContext::new();
        ctx.cancel();
        // The in-memory listing ignores the context; the writes must not.
        let report = reconciler.import_users_to_onprem(&ctx, None, &[]).await.unwrap();
        assert!(report.cancelled);
        assert!(report.outcomes.is_empty());
        assert_eq!(onprem.writes(), 0);
    }

    #[tokio::test]
    async fn test_import_groups_uses_short_names() {
        let (reconciler, _, onprem) = reconciler(
            MemoryDirectory::new(Directory::Cloud)
                .with_group(cloud_group("engineers@e.com"), &[])
                .with_group(cloud_group("design@e.com"), &[])
                .with_group(cloud_group("editors@e.com"), &[]),
            MemoryDirectory::new(Directory::OnPrem).with_group(Group::new("design"), &[]),
        );
        let report = reconciler.import_groups_to_onprem(&OpContext::new(), None).await.unwrap();
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes["engineers"], ItemOutcome::Created);
        let created = onprem.get_group(&OpContext::new(), "engineers").await.unwrap();
        assert_eq!(created.name, "engineers");
        assert!(created.email.is_none());
    }

    #[tokio::test]
    async fn test_import_group_members() {
        let (reconciler, _, onprem) = reconciler(
            MemoryDirectory::new(Directory::Cloud).with_group(
                cloud_group("team@e.com"),
                &["a@e.com", "b@e.com", "c@e.com"],
            ),
            MemoryDirectory::new(Directory::OnPrem).with_group(Group::new("team"), &["b@e.com"]),
        );
        let report = reconciler
            .import_group_members(&OpContext::new(), "team@e.com")
            .await
            .unwrap();
        assert_eq!(report.outcomes["a@e.com"], ItemOutcome::Added);
        assert_eq!(report.outcomes["b@e.com"], ItemOutcome::AlreadyPresent);
        assert_eq!(report.outcomes["c@e.com"], ItemOutcome::Added);
        assert_eq!(onprem.members("team").len(), 3);
        assert_eq!(onprem.writes(), 2);
    }

    #[tokio::test]
    async fn test_export_users_to_cloud() {
        let (reconciler, cloud, _) = reconciler(
            MemoryDirectory::new(Directory::Cloud).with_users(&["a@e.com"]),
            MemoryDirectory::new(Directory::OnPrem).with_users(&[
                "a@e.com",
                "b@e.com",
                "x@other.com",
            ]),
        );
        let password = Secret::new("Temp!1234".to_string());
        let report = reconciler
            .export_users_to_cloud(&OpContext::new(), "e.com", &password)
            .await
            .unwrap();
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes["b@e.com"], ItemOutcome::Created);
        assert!(cloud.get_user(&OpContext::new(), "b@e.com").await.is_ok());
    }

    #[test]
    fn test_temporary_password_shape() {
        use secrecy::ExposeSecret;
        let password = temporary_password();
        assert_eq!(password.expose_secret().len(), TEMP_PASSWORD_LEN + 2);
    }
}
