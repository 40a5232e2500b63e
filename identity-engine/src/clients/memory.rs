//! In-process directory used by unit tests of the services layer.

use super::paging::{paginate, Page};
use super::{DirectoryClient, UserFilter};
use crate::context::OpContext;
use crate::models::{
    identity_key, local_part, Directory, Group, Member, MemberRole, User, UserPatch,
};
use async_trait::async_trait;
use directory_core::error::AppError;
use futures::stream::BoxStream;
use secrecy::Secret;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
struct State {
    users: BTreeMap<String, User>,
    groups: BTreeMap<String, (Group, BTreeMap<String, MemberRole>)>,
    failing: HashSet<String>,
    writes: usize,
}

pub struct MemoryDirectory {
    directory: Directory,
    state: Mutex<State>,
}

impl MemoryDirectory {
    pub fn new(directory: Directory) -> Self {
        Self {
            directory,
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_users(self, emails: &[&str]) -> Self {
        for email in emails {
            self.insert_user(User::new(*email, "Given", "Family"));
        }
        self
    }

    pub fn with_group(self, group: Group, members: &[&str]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let key = self.group_key(group.email.as_deref().unwrap_or(&group.name));
            let members = members
                .iter()
                .map(|m| (identity_key(m), MemberRole::Member))
                .collect();
            state.groups.insert(key, (group, members));
        }
        self
    }

    pub fn insert_user(&self, user: User) {
        let mut state = self.state.lock().unwrap();
        state.users.insert(identity_key(&user.primary_email), user);
    }

    /// Every write naming `key` fails with `Transient`.
    pub fn fail_on(&self, key: &str) {
        self.state.lock().unwrap().failing.insert(identity_key(key));
    }

    pub fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }

    pub fn members(&self, group: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .groups
            .get(&self.group_key(group))
            .map(|(_, members)| members.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn group_key(&self, group: &str) -> String {
        match self.directory {
            Directory::Cloud => group.to_lowercase(),
            Directory::OnPrem => local_part(group).to_lowercase(),
        }
    }

    fn write(&self, key: &str) -> Result<std::sync::MutexGuard<'_, State>, AppError> {
        let mut state = self.state.lock().unwrap();
        if state.failing.contains(&identity_key(key)) {
            return Err(AppError::Transient(anyhow::anyhow!("injected failure for {}", key)));
        }
        state.writes += 1;
        Ok(state)
    }
}

fn missing(what: &str) -> AppError {
    AppError::NotFound(anyhow::anyhow!("{} not found", what))
}

#[async_trait]
impl DirectoryClient for MemoryDirectory {
    fn directory(&self) -> Directory {
        self.directory
    }

    fn list_users<'a>(
        &'a self,
        _ctx: &'a OpContext,
        filter: &'a UserFilter,
    ) -> BoxStream<'a, Result<User, AppError>> {
        paginate(move |_token| async move {
            let state = self.state.lock().unwrap();
            let users = state
                .users
                .values()
                .filter(|u| filter.matches(u))
                .cloned()
                .collect();
            Ok(Page::last(users))
        })
    }

    async fn get_user(&self, _ctx: &OpContext, email: &str) -> Result<User, AppError> {
        let state = self.state.lock().unwrap();
        state.users.get(&identity_key(email)).cloned().ok_or_else(|| missing(email))
    }

    async fn create_user(
        &self,
        _ctx: &OpContext,
        user: &User,
        _initial_password: &Secret<String>,
    ) -> Result<User, AppError> {
        let mut state = self.write(&user.primary_email)?;
        let key = identity_key(&user.primary_email);
        if state.users.contains_key(&key) {
            return Err(AppError::Conflict(anyhow::anyhow!("{} exists", user.primary_email)));
        }
        state.users.insert(key, user.clone());
        Ok(user.clone())
    }

    async fn update_user(
        &self,
        _ctx: &OpContext,
        email: &str,
        patch: &UserPatch,
    ) -> Result<User, AppError> {
        let mut state = self.write(email)?;
        let user = state.users.get_mut(&identity_key(email)).ok_or_else(|| missing(email))?;
        patch.apply(user);
        Ok(user.clone())
    }

    async fn delete_user(&self, _ctx: &OpContext, email: &str) -> Result<(), AppError> {
        let mut state = self.write(email)?;
        state.users.remove(&identity_key(email)).map(|_| ()).ok_or_else(|| missing(email))
    }

    fn list_groups<'a>(
        &'a self,
        _ctx: &'a OpContext,
        _domain: Option<&'a str>,
    ) -> BoxStream<'a, Result<Group, AppError>> {
        paginate(move |_token| async move {
            let state = self.state.lock().unwrap();
            Ok(Page::last(state.groups.values().map(|(g, _)| g.clone()).collect()))
        })
    }

    async fn get_group(&self, _ctx: &OpContext, group: &str) -> Result<Group, AppError> {
        let state = self.state.lock().unwrap();
        state
            .groups
            .get(&self.group_key(group))
            .map(|(g, _)| g.clone())
            .ok_or_else(|| missing(group))
    }

    async fn create_group(&self, _ctx: &OpContext, group: &Group) -> Result<Group, AppError> {
        let key = self.group_key(group.email.as_deref().unwrap_or(&group.name));
        let mut state = self.write(&key)?;
        if state.groups.contains_key(&key) {
            return Err(AppError::Conflict(anyhow::anyhow!("{} exists", key)));
        }
        state.groups.insert(key, (group.clone(), BTreeMap::new()));
        Ok(group.clone())
    }

    async fn delete_group(&self, _ctx: &OpContext, group: &str) -> Result<(), AppError> {
        let key = self.group_key(group);
        let mut state = self.write(&key)?;
        state.groups.remove(&key).map(|_| ()).ok_or_else(|| missing(group))
    }

    fn list_group_members<'a>(
        &'a self,
        _ctx: &'a OpContext,
        group: &'a str,
    ) -> BoxStream<'a, Result<Member, AppError>> {
        paginate(move |_token| async move {
            let state = self.state.lock().unwrap();
            let (_, members) = state
                .groups
                .get(&self.group_key(group))
                .ok_or_else(|| missing(group))?;
            Ok(Page::last(
                members
                    .iter()
                    .map(|(email, role)| Member {
                        email: email.clone(),
                        role: *role,
                    })
                    .collect(),
            ))
        })
    }

    async fn add_group_member(
        &self,
        _ctx: &OpContext,
        group: &str,
        email: &str,
        role: MemberRole,
    ) -> Result<(), AppError> {
        let key = self.group_key(group);
        let mut state = self.write(email)?;
        let (_, members) = state.groups.get_mut(&key).ok_or_else(|| missing(group))?;
        if members.contains_key(&identity_key(email)) {
            return Err(AppError::Conflict(anyhow::anyhow!("{} is already a member", email)));
        }
        members.insert(identity_key(email), role);
        Ok(())
    }

    async fn remove_group_member(
        &self,
        _ctx: &OpContext,
        group: &str,
        email: &str,
    ) -> Result<(), AppError> {
        let key = self.group_key(group);
        let mut state = self.write(email)?;
        let (_, members) = state.groups.get_mut(&key).ok_or_else(|| missing(group))?;
        members.remove(&identity_key(email)).map(|_| ()).ok_or_else(|| missing(email))
    }

    async fn change_member_role(
        &self,
        _ctx: &OpContext,
        group: &str,
        email: &str,
        role: MemberRole,
    ) -> Result<(), AppError> {
        let key = self.group_key(group);
        let mut state = self.write(email)?;
        let (_, members) = state.groups.get_mut(&key).ok_or_else(|| missing(group))?;
        let current = members.get_mut(&identity_key(email)).ok_or_else(|| missing(email))?;
        *current = role;
        Ok(())
    }
}
