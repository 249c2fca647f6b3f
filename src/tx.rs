//! Transaction wrapper for batched writes

use heed::RwTxn;

use crate::auth::encode_credential;
use crate::db::{list_second, pair_key, pair_prefix, split_pair, Dbs};
use crate::error::{AclError, Result};
use crate::reserved::is_reserved;

/// Milliseconds since the Unix epoch
pub fn current_epoch() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn require_name(kind: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(AclError::InvalidRequest(format!("{kind} name must not be empty")));
    }
    Ok(())
}

/// Transaction wrapper for batched writes
pub struct Tx<'a> {
    txn: RwTxn<'a>,
    dbs: &'a Dbs,
}

impl<'a> Tx<'a> {
    #[inline]
    pub(crate) fn new(txn: RwTxn<'a>, dbs: &'a Dbs) -> Self {
        Tx { txn, dbs }
    }

    #[inline]
    pub(crate) fn commit(self) -> Result<()> {
        self.txn.commit().map_err(AclError::from)
    }

    pub(crate) fn clear_all(&mut self) -> Result<()> {
        let d = self.dbs;
        d.users.clear(&mut self.txn)?;
        d.groups.clear(&mut self.txn)?;
        d.members.fwd.clear(&mut self.txn)?;
        d.members.rev.clear(&mut self.txn)?;
        d.rules.clear(&mut self.txn)?;
        d.refresh.clear(&mut self.txn)?;
        d.refresh_by_user.clear(&mut self.txn)?;
        d.schema.clear(&mut self.txn)?;
        d.meta.clear(&mut self.txn)?;
        Ok(())
    }

    pub fn meta(&self, k: &str) -> Result<Option<String>> {
        Ok(self.dbs.meta.get(&self.txn, k)?.map(|s| s.to_string()))
    }

    pub fn set_meta(&mut self, k: &str, v: &str) -> Result<()> {
        Ok(self.dbs.meta.put(&mut self.txn, k, v)?)
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    pub fn user_exists(&self, user: &str) -> Result<bool> {
        Ok(self.dbs.users.get(&self.txn, user)?.is_some())
    }

    /// Create a user; fails if the name is taken
    pub fn create_user(&mut self, user: &str, password: &str) -> Result<()> {
        require_name("user", user)?;
        if self.user_exists(user)? {
            return Err(AclError::InvalidRequest(format!("user {user} already exists")));
        }
        let record = encode_credential(password)?;
        Ok(self.dbs.users.put(&mut self.txn, user, &record)?)
    }

    /// Replace a user's password
    pub fn set_password(&mut self, user: &str, password: &str) -> Result<()> {
        if !self.user_exists(user)? {
            return Err(AclError::InvalidRequest(format!("user {user} does not exist")));
        }
        let record = encode_credential(password)?;
        Ok(self.dbs.users.put(&mut self.txn, user, &record)?)
    }

    /// Delete a user with its memberships and refresh tokens
    pub fn delete_user(&mut self, user: &str) -> Result<bool> {
        if !self.dbs.users.delete(&mut self.txn, user)? {
            return Ok(false);
        }
        for group in self.dbs.members.list_fwd(&self.txn, user)? {
            self.dbs.members.del(&mut self.txn, user, &group)?;
        }
        self.revoke_user_refresh(user)?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Groups & membership
    // ------------------------------------------------------------------

    pub fn group_exists(&self, group: &str) -> Result<bool> {
        Ok(self.dbs.groups.get(&self.txn, group)?.is_some())
    }

    pub fn create_group(&mut self, group: &str) -> Result<()> {
        require_name("group", group)?;
        if self.group_exists(group)? {
            return Err(AclError::InvalidRequest(format!("group {group} already exists")));
        }
        Ok(self.dbs.groups.put(&mut self.txn, group, &current_epoch())?)
    }

    /// Delete a group with its rules and memberships
    pub fn delete_group(&mut self, group: &str) -> Result<bool> {
        if !self.dbs.groups.delete(&mut self.txn, group)? {
            return Ok(false);
        }
        for user in self.dbs.members.list_rev(&self.txn, group)? {
            self.dbs.members.del(&mut self.txn, &user, group)?;
        }
        for predicate in list_second(&self.txn, &self.dbs.rules, group)? {
            self.dbs.rules.delete(&mut self.txn, &pair_key(group, &predicate))?;
        }
        Ok(true)
    }

    pub fn add_member(&mut self, user: &str, group: &str) -> Result<()> {
        if !self.user_exists(user)? {
            return Err(AclError::InvalidRequest(format!("user {user} does not exist")));
        }
        if !self.group_exists(group)? {
            return Err(AclError::InvalidRequest(format!("group {group} does not exist")));
        }
        self.dbs.members.put(&mut self.txn, user, group, current_epoch())
    }

    pub fn remove_member(&mut self, user: &str, group: &str) -> Result<bool> {
        self.dbs.members.del(&mut self.txn, user, group)
    }

    pub fn is_member(&self, user: &str, group: &str) -> Result<bool> {
        self.dbs.members.contains(&self.txn, user, group)
    }

    // ------------------------------------------------------------------
    // Rules
    // ------------------------------------------------------------------

    /// Set the rule for (group, predicate); a later grant replaces the earlier one
    pub fn set_rule(&mut self, group: &str, predicate: &str, permission: u8) -> Result<()> {
        require_name("predicate", predicate)?;
        if permission > crate::constants::ALL {
            return Err(AclError::InvalidRequest(format!(
                "permission {permission} is out of range 0..=7"
            )));
        }
        if !self.group_exists(group)? {
            return Err(AclError::InvalidRequest(format!("group {group} does not exist")));
        }
        Ok(self.dbs.rules.put(&mut self.txn, &pair_key(group, predicate), &(permission as u64))?)
    }

    pub fn remove_rule(&mut self, group: &str, predicate: &str) -> Result<bool> {
        Ok(self.dbs.rules.delete(&mut self.txn, &pair_key(group, predicate))?)
    }

    // ------------------------------------------------------------------
    // Schema
    // ------------------------------------------------------------------

    pub fn schema(&self, predicate: &str) -> Result<Option<String>> {
        Ok(self.dbs.schema.get(&self.txn, predicate)?.map(|s| s.to_string()))
    }

    pub fn put_schema(&mut self, predicate: &str, definition: &str) -> Result<()> {
        Ok(self.dbs.schema.put(&mut self.txn, predicate, definition)?)
    }

    pub fn drop_schema(&mut self, predicate: &str) -> Result<bool> {
        Ok(self.dbs.schema.delete(&mut self.txn, predicate)?)
    }

    /// Drop every non-reserved predicate definition
    pub fn drop_user_schema(&mut self) -> Result<usize> {
        let mut doomed = Vec::new();
        for item in self.dbs.schema.iter(&self.txn)? {
            let (k, _) = item?;
            if !is_reserved(k) {
                doomed.push(k.to_string());
            }
        }
        for predicate in &doomed {
            self.dbs.schema.delete(&mut self.txn, predicate)?;
        }
        Ok(doomed.len())
    }

    // ------------------------------------------------------------------
    // Refresh tokens (stored by hash)
    // ------------------------------------------------------------------

    pub fn store_refresh(&mut self, hash: &str, user: &str, expires_at: u64) -> Result<()> {
        let value = format!("{user}|{expires_at}");
        self.dbs.refresh.put(&mut self.txn, hash, &value)?;
        self.dbs.refresh_by_user.put(&mut self.txn, &pair_key(user, hash), &expires_at)?;
        Ok(())
    }

    /// Remove a refresh token and return its (user, expires_at) record
    pub fn take_refresh(&mut self, hash: &str) -> Result<Option<(String, u64)>> {
        let value = match self.dbs.refresh.get(&self.txn, hash)? {
            Some(v) => v.to_string(),
            None => return Ok(None),
        };
        let (user, expires) = value
            .rsplit_once('|')
            .ok_or_else(|| AclError::Storage("corrupted refresh token record".into()))?;
        let expires: u64 = expires
            .parse()
            .map_err(|_| AclError::Storage("corrupted refresh token expiry".into()))?;
        self.dbs.refresh.delete(&mut self.txn, hash)?;
        self.dbs.refresh_by_user.delete(&mut self.txn, &pair_key(user, hash))?;
        Ok(Some((user.to_string(), expires)))
    }

    /// Revoke all refresh tokens of a user
    pub fn revoke_user_refresh(&mut self, user: &str) -> Result<u64> {
        let mut hashes = Vec::new();
        for item in self.dbs.refresh_by_user.prefix_iter(&self.txn, &pair_prefix(user))? {
            let (k, _) = item?;
            if let Some((_, hash)) = split_pair(k) {
                hashes.push(hash);
            }
        }
        for hash in &hashes {
            self.dbs.refresh.delete(&mut self.txn, hash)?;
            self.dbs.refresh_by_user.delete(&mut self.txn, &pair_key(user, hash))?;
        }
        Ok(hashes.len() as u64)
    }
}
