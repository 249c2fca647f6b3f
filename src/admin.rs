//! Protected administration of users, groups and rules
//!
//! Management operations require a guardian caller, re-checked against the
//! store on every call. Any logged-in user may read their own record.
//! Changes are durable at once but reach enforcement only at the next cache
//! refresh.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::constants::{perms_to_names, GROOT_USER, GUARDIANS_GROUP};
use crate::db::Store;
use crate::enforce::{Authorized, Caller, Credentials, Enforcer, Resolved};
use crate::error::{AclError, Result};

/// A group as seen by one of its members
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupInfo {
    pub name: String,
    /// (predicate, permission) in predicate order
    pub rules: Vec<(String, u8)>,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserInfo {
    pub name: String,
    pub groups: Vec<GroupInfo>,
}

pub struct AclAdmin {
    store: Arc<Store>,
    enforcer: Arc<Enforcer>,
}

impl AclAdmin {
    pub fn new(store: Arc<Store>, enforcer: Arc<Enforcer>) -> Self {
        Self { store, enforcer }
    }

    // ========================================================================
    // Permission Checks
    // ========================================================================

    /// Guardian status is taken from the store, not from the caller value
    fn is_guardian(&self, caller: &Caller) -> Result<bool> {
        match caller.user() {
            Some(user) if caller.is_guardian() => {
                self.store.read(|d, tx| d.members.contains(tx, user, GUARDIANS_GROUP))
            }
            _ => Ok(false),
        }
    }

    fn require_guardian(&self, caller: &Caller, action: &str) -> Result<()> {
        if self.is_guardian(caller)? {
            return Ok(());
        }
        Err(AclError::PermissionDenied(format!(
            "{} is not allowed to {action}; only guardians may manage ACLs",
            caller.name()
        )))
    }

    fn group_info(&self, group: &str) -> Result<GroupInfo> {
        Ok(GroupInfo {
            name: group.to_string(),
            rules: self.store.group_rules(group)?,
            members: self.store.group_members(group)?,
        })
    }

    // ========================================================================
    // Self-service reads
    // ========================================================================

    /// The caller's own record: current groups with their rules and members
    pub fn current_user(&self, creds: &Credentials) -> Result<Authorized<UserInfo>> {
        let Resolved { caller, renewed } = self.enforcer.resolve(creds)?;
        let user = match caller.user() {
            Some(user) if self.store.user_exists(user)? => user.to_string(),
            Some(user) => return Err(AclError::Unauthenticated(format!("user {user} no longer exists"))),
            None => return Err(AclError::Unauthenticated("login required to read user info".into())),
        };
        let groups = self
            .store
            .user_groups(&user)?
            .iter()
            .map(|g| self.group_info(g))
            .collect::<Result<Vec<_>>>()?;
        Ok(Authorized { request: UserInfo { name: user, groups }, caller, renewed })
    }

    /// One group, visible to its members and to guardians. `None` when the
    /// group does not exist or the caller may not see it.
    pub fn group(&self, creds: &Credentials, group: &str) -> Result<Authorized<Option<GroupInfo>>> {
        let Resolved { caller, renewed } = self.enforcer.resolve(creds)?;
        let user = caller
            .user()
            .ok_or_else(|| AclError::Unauthenticated("login required to read groups".into()))?;
        let visible = self.store.group_exists(group)?
            && (self.is_guardian(&caller)? || self.store.read(|d, tx| d.members.contains(tx, user, group))?);
        let info = if visible { Some(self.group_info(group)?) } else { None };
        Ok(Authorized { request: info, caller, renewed })
    }

    // ========================================================================
    // Users
    // ========================================================================

    pub fn create_user(&self, caller: &Caller, user: &str, password: &str) -> Result<()> {
        self.require_guardian(caller, "create users")?;
        self.store.transact(|tx| tx.create_user(user, password))?;
        info!(by = caller.name(), user, "user created");
        Ok(())
    }

    /// Delete a user, its memberships and its refresh tokens
    pub fn delete_user(&self, caller: &Caller, user: &str) -> Result<bool> {
        self.require_guardian(caller, "delete users")?;
        if user == GROOT_USER {
            return Err(AclError::InvalidRequest(format!("{GROOT_USER} cannot be deleted")));
        }
        let deleted = self.store.transact(|tx| tx.delete_user(user))?;
        if deleted {
            info!(by = caller.name(), user, "user deleted");
        }
        Ok(deleted)
    }

    pub fn set_password(&self, caller: &Caller, user: &str, password: &str) -> Result<()> {
        self.require_guardian(caller, "change passwords")?;
        self.store.transact(|tx| tx.set_password(user, password))
    }

    pub fn list_users(&self, caller: &Caller) -> Result<Vec<String>> {
        self.require_guardian(caller, "list users")?;
        self.store.list_users()
    }

    // ========================================================================
    // Groups & membership
    // ========================================================================

    pub fn create_group(&self, caller: &Caller, group: &str) -> Result<()> {
        self.require_guardian(caller, "create groups")?;
        self.store.transact(|tx| tx.create_group(group))?;
        info!(by = caller.name(), group, "group created");
        Ok(())
    }

    /// Delete a group with its rules and memberships
    pub fn delete_group(&self, caller: &Caller, group: &str) -> Result<bool> {
        self.require_guardian(caller, "delete groups")?;
        if group == GUARDIANS_GROUP {
            return Err(AclError::InvalidRequest(format!("{GUARDIANS_GROUP} cannot be deleted")));
        }
        let deleted = self.store.transact(|tx| tx.delete_group(group))?;
        if deleted {
            info!(by = caller.name(), group, "group deleted");
        }
        Ok(deleted)
    }

    pub fn list_groups(&self, caller: &Caller) -> Result<Vec<String>> {
        self.require_guardian(caller, "list groups")?;
        self.store.list_groups()
    }

    pub fn add_member(&self, caller: &Caller, user: &str, group: &str) -> Result<()> {
        self.require_guardian(caller, "change group membership")?;
        self.store.transact(|tx| tx.add_member(user, group))?;
        info!(by = caller.name(), user, group, "member added");
        Ok(())
    }

    pub fn remove_member(&self, caller: &Caller, user: &str, group: &str) -> Result<bool> {
        self.require_guardian(caller, "change group membership")?;
        if user == GROOT_USER && group == GUARDIANS_GROUP {
            return Err(AclError::InvalidRequest(format!(
                "{GROOT_USER} cannot be removed from {GUARDIANS_GROUP}"
            )));
        }
        let removed = self.store.transact(|tx| tx.remove_member(user, group))?;
        if removed {
            info!(by = caller.name(), user, group, "member removed");
        }
        Ok(removed)
    }

    pub fn group_members(&self, caller: &Caller, group: &str) -> Result<Vec<String>> {
        self.require_guardian(caller, "list group members")?;
        self.store.group_members(group)
    }

    // ========================================================================
    // Rules
    // ========================================================================

    /// Grant `permission` on `predicate` to `group`, replacing any earlier rule
    pub fn set_rule(&self, caller: &Caller, group: &str, predicate: &str, permission: u8) -> Result<()> {
        self.require_guardian(caller, "change rules")?;
        self.store.transact(|tx| tx.set_rule(group, predicate, permission))?;
        info!(by = caller.name(), group, predicate, perms = ?perms_to_names(permission), "rule set");
        Ok(())
    }

    pub fn remove_rule(&self, caller: &Caller, group: &str, predicate: &str) -> Result<bool> {
        self.require_guardian(caller, "change rules")?;
        let removed = self.store.transact(|tx| tx.remove_rule(group, predicate))?;
        if removed {
            info!(by = caller.name(), group, predicate, "rule removed");
        }
        Ok(removed)
    }

    pub fn list_rules(&self, caller: &Caller, group: &str) -> Result<Vec<(String, u8)>> {
        self.require_guardian(caller, "list rules")?;
        if !self.store.group_exists(group)? {
            return Err(AclError::InvalidRequest(format!("group {group} does not exist")));
        }
        self.store.group_rules(group)
    }
}
