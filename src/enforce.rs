//! Request interceptor
//!
//! Resolves the caller from its tokens, then authorizes a parsed request
//! against one permission snapshot. Queries are rewritten (unreadable
//! references are removed), mutations and alters are accepted or rejected
//! as a whole.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{PermissionCache, Snapshot};
use crate::constants::{ALL, GROOT_USER, MODIFY, READ, WRITE};
use crate::db::Store;
use crate::error::{AclError, Result};
use crate::request::{Alter, Field, Filter, Mutation, Query, QueryBlock, SchemaQuery};
use crate::reserved::{check_alter, is_acl_predicate, is_reserved, normalize_schema};
use crate::token::{TokenManager, TokenPair};

/// Tokens presented with a request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl Credentials {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn access(token: impl Into<String>) -> Self {
        Credentials { access_token: Some(token.into()), refresh_token: None }
    }

    pub fn from_pair(pair: &TokenPair) -> Self {
        Credentials {
            access_token: Some(pair.access_token.clone()),
            refresh_token: Some(pair.refresh_token.clone()),
        }
    }
}

/// The identity a request runs as. Only produced by resolving credentials;
/// outside the crate the sole constructible value is the anonymous caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Caller {
    pub(crate) user: Option<String>,
    pub(crate) groups: Vec<String>,
    pub(crate) guardian: bool,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Groups embedded in the access token at issue time
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn is_guardian(&self) -> bool {
        self.guardian
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn name(&self) -> &str {
        self.user.as_deref().unwrap_or("<anonymous>")
    }
}

#[derive(Debug, Clone)]
pub struct Resolved {
    pub caller: Caller,
    /// Set when an expired access token was renewed on the way in
    pub renewed: Option<TokenPair>,
}

/// An accepted (possibly rewritten) request and the identity it runs as
#[derive(Debug, Clone, Serialize)]
pub struct Authorized<T> {
    pub request: T,
    pub caller: Caller,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renewed: Option<TokenPair>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaEntry {
    pub predicate: String,
    pub definition: String,
}

pub struct Enforcer {
    store: Arc<Store>,
    tokens: Arc<TokenManager>,
    cache: Arc<PermissionCache>,
}

impl Enforcer {
    pub fn new(store: Arc<Store>, tokens: Arc<TokenManager>, cache: Arc<PermissionCache>) -> Self {
        Self { store, tokens, cache }
    }

    /// Identify the caller. No access token means anonymous; an expired one
    /// is renewed when a refresh token came along.
    pub fn resolve(&self, creds: &Credentials) -> Result<Resolved> {
        self.resolve_with(creds, &self.cache.snapshot())
    }

    fn resolve_with(&self, creds: &Credentials, snap: &Snapshot) -> Result<Resolved> {
        let token = match creds.access_token.as_deref() {
            Some(t) if !t.is_empty() => t,
            _ => return Ok(Resolved { caller: Caller::anonymous(), renewed: None }),
        };
        let (session, renewed) = match self.tokens.verify_access(token) {
            Ok(session) => (session, None),
            Err(AclError::TokenExpired) => {
                let refresh = creds
                    .refresh_token
                    .as_deref()
                    .ok_or_else(|| AclError::Unauthenticated("access token expired".into()))?;
                let pair = self.tokens.refresh(refresh).map_err(|e| {
                    AclError::Unauthenticated(format!("access token expired and renewal failed ({e})"))
                })?;
                debug!("renewed expired access token");
                (self.tokens.verify_access(&pair.access_token)?, Some(pair))
            }
            Err(e) => return Err(e),
        };
        let guardian = session.user == GROOT_USER || snap.is_guardian(&session.user);
        Ok(Resolved {
            caller: Caller { user: Some(session.user), groups: session.groups, guardian },
            renewed,
        })
    }

    /// Effective permission bits of `caller` on `predicate`
    pub fn permission(&self, caller: &Caller, predicate: &str) -> u8 {
        permission_in(&self.cache.snapshot(), caller, predicate)
    }

    /// Strip every reference the caller may not read. A block whose root
    /// function reads an unreadable predicate is removed entirely.
    pub fn authorize_query(&self, creds: &Credentials, query: Query) -> Result<Authorized<Query>> {
        let snap = self.cache.snapshot();
        let Resolved { caller, renewed } = self.resolve_with(creds, &snap)?;
        let can_read = |p: &str| permission_in(&snap, &caller, p) & READ != 0;
        let blocks = query
            .blocks
            .into_iter()
            .filter_map(|b| rewrite_block(b, &can_read))
            .collect();
        Ok(Authorized { request: Query { blocks }, caller, renewed })
    }

    /// Schema introspection is open to any logged-in user
    pub fn query_schema(&self, creds: &Credentials, query: &SchemaQuery) -> Result<Authorized<Vec<SchemaEntry>>> {
        let Resolved { caller, renewed } = self.resolve(creds)?;
        if !caller.is_authenticated() {
            return Err(AclError::Unauthenticated("schema queries require a logged-in user".into()));
        }
        let entries = self
            .store
            .list_schema()?
            .into_iter()
            .filter(|(p, _)| query.predicates.is_empty() || query.predicates.iter().any(|q| q == p))
            .map(|(predicate, definition)| SchemaEntry { predicate, definition })
            .collect();
        Ok(Authorized { request: entries, caller, renewed })
    }

    /// Every triple needs WRITE on its predicate; one failure rejects all
    pub fn authorize_mutation(&self, creds: &Credentials, mutation: Mutation) -> Result<Authorized<Mutation>> {
        if mutation.is_empty() {
            return Err(AclError::InvalidRequest("mutation contains no triples".into()));
        }
        if mutation.set.iter().any(|t| t.is_wildcard()) {
            return Err(AclError::InvalidRequest("wildcard predicates are only valid in deletes".into()));
        }
        let snap = self.cache.snapshot();
        let Resolved { caller, renewed } = self.resolve_with(creds, &snap)?;

        let mut denied = BTreeSet::new();
        for triple in mutation.triples() {
            if triple.is_wildcard() {
                if !caller.guardian {
                    warn!(user = caller.name(), "wildcard delete rejected");
                    return Err(AclError::PermissionDenied(
                        "only guardians may delete all predicates of a node".into(),
                    ));
                }
                continue;
            }
            if permission_in(&snap, &caller, triple.predicate.as_str()) & WRITE == 0 {
                denied.insert(triple.predicate.as_str());
            }
        }
        if !denied.is_empty() {
            let list = denied.into_iter().collect::<Vec<_>>().join(", ");
            warn!(user = caller.name(), predicates = %list, "mutation rejected");
            return Err(AclError::PermissionDenied(format!(
                "unauthorized to mutate following predicates: {list}"
            )));
        }
        Ok(Authorized { request: mutation, caller, renewed })
    }

    /// Check, then apply, a schema change. The reserved guard runs over every
    /// predicate before any MODIFY check; nothing is applied unless all pass.
    pub fn alter(&self, creds: &Credentials, alter: Alter) -> Result<Authorized<Alter>> {
        let snap = self.cache.snapshot();
        let Resolved { caller, renewed } = self.resolve_with(creds, &snap)?;
        let require_modify = |predicate: &str| -> Result<()> {
            if permission_in(&snap, &caller, predicate) & MODIFY == 0 {
                warn!(user = caller.name(), predicate, "alter rejected");
                return Err(AclError::PermissionDenied(format!(
                    "unauthorized to alter the predicate: {predicate}"
                )));
            }
            Ok(())
        };

        match &alter {
            Alter::Schema(updates) => {
                if updates.is_empty() {
                    return Err(AclError::InvalidRequest("alter contains no schema statements".into()));
                }
                for u in updates {
                    check_alter(&u.predicate, Some(u.definition.as_str()), self.store.schema(&u.predicate)?.as_deref())?;
                }
                // Reserved predicates that passed the guard are unchanged re-declarations
                let changed: Vec<_> = updates.iter().filter(|u| !is_reserved(&u.predicate)).collect();
                for u in &changed {
                    require_modify(u.predicate.as_str())?;
                }
                self.store.transact(|tx| {
                    for u in &changed {
                        tx.put_schema(&u.predicate, &normalize_schema(&u.definition))?;
                    }
                    Ok(())
                })?;
            }
            Alter::DropAttr(predicate) => {
                check_alter(predicate, None, self.store.schema(predicate)?.as_deref())?;
                require_modify(predicate.as_str())?;
                self.store.transact(|tx| tx.drop_schema(predicate))?;
            }
            Alter::DropAll => {
                if !caller.guardian {
                    warn!(user = caller.name(), "drop all rejected");
                    return Err(AclError::PermissionDenied("only guardians may drop all data".into()));
                }
                let dropped = self.store.transact(|tx| tx.drop_user_schema())?;
                debug!(dropped, "dropped all user predicates");
            }
        }
        Ok(Authorized { request: alter, caller, renewed })
    }
}

fn permission_in(snap: &Snapshot, caller: &Caller, predicate: &str) -> u8 {
    if caller.guardian {
        return ALL;
    }
    let predicate = predicate.strip_prefix('~').unwrap_or(predicate);
    if is_acl_predicate(predicate) {
        return 0;
    }
    snap.lookup_effective(&caller.groups, predicate)
}

fn rewrite_block<F: Fn(&str) -> bool>(mut block: QueryBlock, can_read: &F) -> Option<QueryBlock> {
    if let Some(p) = block.root.predicate() {
        if !can_read(p) {
            debug!(block = %block.name, predicate = p, "root predicate unreadable; block dropped");
            return None;
        }
    }
    if !block.group_by.is_empty() {
        block.group_by.retain(|p| can_read(p.as_str()));
        if block.group_by.is_empty() {
            debug!(block = %block.name, "groupby unreadable; block dropped");
            return None;
        }
    }
    block.filter = block.filter.and_then(|f| prune_filter(f, can_read));
    block.order.retain(|o| can_read(o.predicate.as_str()));
    block.fields = prune_fields(block.fields, can_read);
    Some(block)
}

fn prune_fields<F: Fn(&str) -> bool>(fields: Vec<Field>, can_read: &F) -> Vec<Field> {
    fields
        .into_iter()
        .filter_map(|mut field| {
            if let Some(p) = field.reads() {
                if !can_read(p) {
                    debug!(predicate = p, "field elided");
                    return None;
                }
            }
            field.filter = field.filter.and_then(|f| prune_filter(f, can_read));
            field.order.retain(|o| can_read(o.predicate.as_str()));
            field.children = prune_fields(field.children, can_read);
            Some(field)
        })
        .collect()
}

fn prune_filter<F: Fn(&str) -> bool>(filter: Filter, can_read: &F) -> Option<Filter> {
    match filter {
        Filter::Func(func) => match func.predicate() {
            Some(p) if !can_read(p) => {
                debug!(predicate = p, "filter clause elided");
                None
            }
            _ => Some(Filter::Func(func)),
        },
        Filter::And(items) => collapse(items, can_read, Filter::And),
        Filter::Or(items) => collapse(items, can_read, Filter::Or),
        Filter::Not(inner) => prune_filter(*inner, can_read).map(|f| Filter::Not(Box::new(f))),
    }
}

fn collapse<F: Fn(&str) -> bool>(
    items: Vec<Filter>,
    can_read: &F,
    join: fn(Vec<Filter>) -> Filter,
) -> Option<Filter> {
    let mut kept: Vec<Filter> = items.into_iter().filter_map(|f| prune_filter(f, can_read)).collect();
    match kept.len() {
        0 => None,
        1 => kept.pop(),
        _ => Some(join(kept)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Field, Func, Order};

    fn only(allowed: &'static [&'static str]) -> impl Fn(&str) -> bool {
        move |p: &str| allowed.contains(&p)
    }

    fn has(p: &str) -> Filter {
        Filter::Func(Func::new("has", vec![p.to_string()]))
    }

    #[test]
    fn filter_leaves_are_pruned_and_collapsed() {
        let f = Filter::And(vec![has("name"), Filter::Or(vec![has("age"), has("secret")])]);
        let pruned = prune_filter(f, &only(&["name", "age"])).unwrap();
        assert_eq!(pruned, Filter::And(vec![has("name"), has("age")]));

        let f = Filter::And(vec![has("name"), Filter::Not(Box::new(has("age")))]);
        assert_eq!(prune_filter(f, &only(&["name"])), Some(has("name")));

        assert_eq!(prune_filter(Filter::Not(Box::new(has("age"))), &only(&[])), None);
    }

    #[test]
    fn ungated_filter_functions_survive() {
        let f = Filter::Func(Func::new("uid", vec!["0x1".into()]));
        assert_eq!(prune_filter(f.clone(), &only(&[])), Some(f));
    }

    #[test]
    fn nested_fields_are_pruned() {
        let fields = vec![
            Field::new("uid"),
            Field::new("name"),
            Field::new("friend").with_children(vec![Field::new("name"), Field::new("age")]),
            Field::new("age"),
        ];
        let kept = prune_fields(fields, &only(&["name", "friend"]));
        let names: Vec<_> = kept.iter().map(|f| f.predicate.as_str()).collect();
        assert_eq!(names, vec!["uid", "name", "friend"]);
        assert_eq!(kept[2].children.len(), 1);
    }

    #[test]
    fn block_with_unreadable_root_is_dropped() {
        let block = QueryBlock::new("q", Func::new("has", vec!["age".into()]));
        assert!(rewrite_block(block, &only(&["name"])).is_none());

        let block = QueryBlock::new("q", Func::new("uid", vec!["0x1".into()]));
        assert!(rewrite_block(block, &only(&[])).is_some());
    }

    #[test]
    fn order_and_groupby_elision() {
        let mut block = QueryBlock::new("q", Func::new("has", vec!["name".into()]));
        block.order = vec![Order { predicate: "age".into(), desc: false }];
        block.group_by = vec!["age".into(), "name".into()];
        let b = rewrite_block(block.clone(), &only(&["name"])).unwrap();
        assert!(b.order.is_empty());
        assert_eq!(b.group_by, vec!["name"]);

        block.group_by = vec!["age".into()];
        assert!(rewrite_block(block, &only(&["name"])).is_none());
    }

    #[test]
    fn guardians_and_acl_predicates() {
        let snap = Snapshot::default();
        let guardian = Caller { user: Some("g".into()), groups: vec![], guardian: true };
        assert_eq!(permission_in(&snap, &guardian, "dgraph.password"), ALL);
        let user = Caller { user: Some("u".into()), groups: vec!["dev".into()], guardian: false };
        assert_eq!(permission_in(&snap, &user, "dgraph.password"), 0);
        assert_eq!(permission_in(&snap, &user, "name"), 0);
    }
}
