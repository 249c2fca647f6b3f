//! Read adapter over the persisted group/user/rule graph
//!
//! No caching and no retries: a failed load is reported to the caller,
//! which decides what to keep serving.

use crate::db::{RuleEntry, Store};
use crate::error::Result;

pub trait RuleStore: Send + Sync {
    /// Every (group, predicate, permission) triple, ordered by group then predicate
    fn load_all(&self) -> Result<Vec<RuleEntry>>;

    /// Current members of a group
    fn load_group_members(&self, group: &str) -> Result<Vec<String>>;
}

impl RuleStore for Store {
    fn load_all(&self) -> Result<Vec<RuleEntry>> {
        self.all_rules()
    }

    fn load_group_members(&self, group: &str) -> Result<Vec<String>> {
        self.group_members(group)
    }
}
