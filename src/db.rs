//! LMDB-backed persistent state

use std::borrow::Cow;
use std::path::Path;

use heed::types::{Str, U64};
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use tracing::info;

use crate::auth::verify_credential;
use crate::constants::{GROOT_USER, GUARDIANS_GROUP, INITIAL_SCHEMA};
use crate::error::{AclError, Result};
use crate::tx::Tx;

// Database type aliases
pub type DbU64 = Database<Str, U64<byteorder::BigEndian>>;
pub type DbStr = Database<Str, Str>;

const MAP_SIZE: usize = 1 << 30;

// Escape forward slashes so `a/b` pairs can be split back unambiguously
fn escape_key_part(s: &str) -> Cow<'_, str> {
    if s.contains('/') || s.contains('\\') {
        Cow::Owned(s.replace('\\', "\\\\").replace('/', "\\/"))
    } else {
        Cow::Borrowed(s)
    }
}

fn unescape_key_part(s: &str) -> Cow<'_, str> {
    if s.contains('\\') {
        Cow::Owned(s.replace("\\/", "/").replace("\\\\", "\\"))
    } else {
        Cow::Borrowed(s)
    }
}

/// Build a `a/b` key from two names
#[inline]
pub fn pair_key(a: &str, b: &str) -> String {
    format!("{}/{}", escape_key_part(a), escape_key_part(b))
}

/// Prefix matching every pair key whose first part is `a`
#[inline]
pub fn pair_prefix(a: &str) -> String {
    format!("{}/", escape_key_part(a))
}

/// Split a pair key at its first unescaped slash
pub fn split_pair(k: &str) -> Option<(String, String)> {
    let mut escaped = false;
    for (i, c) in k.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            '/' if !escaped => {
                return Some((
                    unescape_key_part(&k[..i]).into_owned(),
                    unescape_key_part(&k[i + 1..]).into_owned(),
                ))
            }
            _ => escaped = false,
        }
    }
    None
}

/// Bidirectional index: fwd[a/b] and rev[b/a] stay in sync
pub struct BiIndex {
    pub fwd: DbU64,
    pub rev: DbU64,
}

impl BiIndex {
    #[inline]
    pub fn contains(&self, tx: &RoTxn, a: &str, b: &str) -> Result<bool> {
        Ok(self.fwd.get(tx, &pair_key(a, b))?.is_some())
    }

    #[inline]
    pub fn put(&self, tx: &mut RwTxn, a: &str, b: &str, v: u64) -> Result<()> {
        self.fwd.put(tx, &pair_key(a, b), &v)?;
        self.rev.put(tx, &pair_key(b, a), &v)?;
        Ok(())
    }

    #[inline]
    pub fn del(&self, tx: &mut RwTxn, a: &str, b: &str) -> Result<bool> {
        let r = self.fwd.delete(tx, &pair_key(a, b))?;
        self.rev.delete(tx, &pair_key(b, a))?;
        Ok(r)
    }

    pub fn list_fwd(&self, tx: &RoTxn, a: &str) -> Result<Vec<String>> {
        list_second(tx, &self.fwd, a)
    }

    pub fn list_rev(&self, tx: &RoTxn, b: &str) -> Result<Vec<String>> {
        list_second(tx, &self.rev, b)
    }
}

/// List the second halves of all pair keys starting with `a`
pub fn list_second(tx: &RoTxn, db: &DbU64, a: &str) -> Result<Vec<String>> {
    let mut r = Vec::new();
    for item in db.prefix_iter(tx, &pair_prefix(a))? {
        let (k, _) = item?;
        if let Some((_, b)) = split_pair(k) {
            r.push(b);
        }
    }
    Ok(r)
}

/// All database handles
pub struct Dbs {
    pub users: DbStr,
    pub groups: DbU64,
    pub members: BiIndex,
    pub rules: DbU64,
    pub refresh: DbStr,
    pub refresh_by_user: DbU64,
    pub schema: DbStr,
    pub meta: DbStr,
}

/// One persisted rule, in storage order (group, then predicate)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleEntry {
    pub group: String,
    pub predicate: String,
    pub permission: u8,
}

/// Owned LMDB environment plus its named databases
pub struct Store {
    env: Env,
    dbs: Dbs,
}

impl Store {
    /// Open (or create) a store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        // SAFETY: LMDB requires no other processes access this path concurrently during open.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(MAP_SIZE)
                .max_dbs(9)
                .open(path)?
        };
        let mut tx = env.write_txn()?;
        let dbs = Dbs {
            users: env.create_database(&mut tx, Some("users"))?,
            groups: env.create_database(&mut tx, Some("groups"))?,
            members: BiIndex {
                fwd: env.create_database(&mut tx, Some("members"))?,
                rev: env.create_database(&mut tx, Some("members_rev"))?,
            },
            rules: env.create_database(&mut tx, Some("rules"))?,
            refresh: env.create_database(&mut tx, Some("refresh"))?,
            refresh_by_user: env.create_database(&mut tx, Some("refresh_by_user"))?,
            schema: env.create_database(&mut tx, Some("schema"))?,
            meta: env.create_database(&mut tx, Some("meta"))?,
        };
        tx.commit()?;
        Ok(Store { env, dbs })
    }

    /// Execute a read-only operation
    #[inline]
    pub fn read<T, F: FnOnce(&Dbs, &RoTxn) -> Result<T>>(&self, f: F) -> Result<T> {
        let tx = self.env.read_txn()?;
        f(&self.dbs, &tx)
    }

    /// Run multiple writes in a single transaction
    pub fn transact<T, F: FnOnce(&mut Tx<'_>) -> Result<T>>(&self, f: F) -> Result<T> {
        let mut tx = Tx::new(self.env.write_txn()?, &self.dbs);
        let r = f(&mut tx)?;
        tx.commit()?;
        Ok(r)
    }

    /// Clear all databases (for testing)
    pub fn clear_all(&self) -> Result<()> {
        self.transact(|tx| tx.clear_all())
    }

    // ------------------------------------------------------------------
    // Bootstrap
    // ------------------------------------------------------------------

    pub fn is_bootstrapped(&self) -> Result<bool> {
        self.read(|d, tx| Ok(d.meta.get(tx, "boot")?.is_some()))
    }

    /// Create groot, guardians and the reserved schema. Returns `true` on the
    /// first run; later runs only re-assert missing reserved schema entries.
    pub fn bootstrap(&self, groot_password: &str) -> Result<bool> {
        self.transact(|tx| {
            for (predicate, definition) in INITIAL_SCHEMA {
                if tx.schema(predicate)?.is_none() {
                    tx.put_schema(predicate, definition)?;
                }
            }
            if tx.meta("boot")?.is_some() {
                return Ok(false);
            }
            tx.create_group(GUARDIANS_GROUP)?;
            tx.create_user(GROOT_USER, groot_password)?;
            tx.add_member(GROOT_USER, GUARDIANS_GROUP)?;
            tx.set_meta("boot", "1")?;
            info!(user = GROOT_USER, group = GUARDIANS_GROUP, "bootstrapped ACL store");
            Ok(true)
        })
    }

    // ------------------------------------------------------------------
    // Users & groups
    // ------------------------------------------------------------------

    pub fn user_exists(&self, user: &str) -> Result<bool> {
        self.read(|d, tx| Ok(d.users.get(tx, user)?.is_some()))
    }

    pub fn group_exists(&self, group: &str) -> Result<bool> {
        self.read(|d, tx| Ok(d.groups.get(tx, group)?.is_some()))
    }

    /// Verify a password; unknown users simply do not match
    pub fn password_matches(&self, user: &str, password: &str) -> Result<bool> {
        self.read(|d, tx| match d.users.get(tx, user)? {
            Some(record) => verify_credential(record, password),
            None => Ok(false),
        })
    }

    pub fn user_groups(&self, user: &str) -> Result<Vec<String>> {
        self.read(|d, tx| d.members.list_fwd(tx, user))
    }

    pub fn group_members(&self, group: &str) -> Result<Vec<String>> {
        self.read(|d, tx| d.members.list_rev(tx, group))
    }

    pub fn list_users(&self) -> Result<Vec<String>> {
        self.read(|d, tx| {
            let mut r = Vec::new();
            for item in d.users.iter(tx)? {
                r.push(item?.0.to_string());
            }
            Ok(r)
        })
    }

    pub fn list_groups(&self) -> Result<Vec<String>> {
        self.read(|d, tx| {
            let mut r = Vec::new();
            for item in d.groups.iter(tx)? {
                r.push(item?.0.to_string());
            }
            Ok(r)
        })
    }

    // ------------------------------------------------------------------
    // Rules
    // ------------------------------------------------------------------

    pub fn group_rules(&self, group: &str) -> Result<Vec<(String, u8)>> {
        self.read(|d, tx| {
            let mut r = Vec::new();
            for item in d.rules.prefix_iter(tx, &pair_prefix(group))? {
                let (k, v) = item?;
                if let Some((_, predicate)) = split_pair(k) {
                    r.push((predicate, v as u8));
                }
            }
            Ok(r)
        })
    }

    /// Every rule in storage order
    pub fn all_rules(&self) -> Result<Vec<RuleEntry>> {
        self.read(|d, tx| {
            let mut r = Vec::new();
            for item in d.rules.iter(tx)? {
                let (k, v) = item?;
                let (group, predicate) = split_pair(k)
                    .ok_or_else(|| AclError::Storage(format!("corrupted rule key {k}")))?;
                r.push(RuleEntry { group, predicate, permission: v as u8 });
            }
            Ok(r)
        })
    }

    // ------------------------------------------------------------------
    // Schema
    // ------------------------------------------------------------------

    pub fn schema(&self, predicate: &str) -> Result<Option<String>> {
        self.read(|d, tx| Ok(d.schema.get(tx, predicate)?.map(|s| s.to_string())))
    }

    pub fn list_schema(&self) -> Result<Vec<(String, String)>> {
        self.read(|d, tx| {
            let mut r = Vec::new();
            for item in d.schema.iter(tx)? {
                let (k, v) = item?;
                r.push((k.to_string(), v.to_string()));
            }
            Ok(r)
        })
    }

    // ------------------------------------------------------------------
    // Refresh tokens
    // ------------------------------------------------------------------

    /// Number of live refresh tokens persisted for a user
    pub fn refresh_token_count(&self, user: &str) -> Result<usize> {
        self.read(|d, tx| Ok(d.refresh_by_user.prefix_iter(tx, &pair_prefix(user))?.count()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_keys_split_back() {
        assert_eq!(split_pair(&pair_key("dev", "name")), Some(("dev".into(), "name".into())));
        assert_eq!(
            split_pair(&pair_key("a/b", "c\\d/e")),
            Some(("a/b".into(), "c\\d/e".into()))
        );
        assert_eq!(split_pair("noslash"), None);
    }

    #[test]
    fn prefix_does_not_match_escaped_names() {
        let k = pair_key("a/b", "x");
        assert!(!k.starts_with(&pair_prefix("a")));
        assert!(k.starts_with(&pair_prefix("a/b")));
    }
}
