//! Permission cache: an immutable snapshot of predicate permissions per group,
//! rebuilt from the rule store and published with a single pointer swap.
//!
//! Readers never block. A request loads the current snapshot once and uses it
//! for every check, so it never sees entries from two refresh cycles. A failed
//! rebuild leaves the previous snapshot in place.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use arc_swap::ArcSwap;
use tracing::{info, warn};

use crate::constants::GUARDIANS_GROUP;
use crate::db::RuleEntry;
use crate::error::Result;
use crate::rules::RuleStore;
use crate::tx::current_epoch;

/// One published view of the rule table
#[derive(Debug, Default)]
pub struct Snapshot {
    generation: u64,
    loaded_at: u64,
    // predicate -> group -> permission bits
    perms: HashMap<String, HashMap<String, u8>>,
    guardians: HashSet<String>,
}

impl Snapshot {
    /// Build a snapshot from rules in storage order; for a repeated
    /// (group, predicate) pair the last entry wins.
    pub fn build(rules: Vec<RuleEntry>, guardians: Vec<String>, generation: u64) -> Self {
        let mut perms: HashMap<String, HashMap<String, u8>> = HashMap::new();
        for rule in rules {
            perms.entry(rule.predicate).or_default().insert(rule.group, rule.permission);
        }
        Snapshot {
            generation,
            loaded_at: current_epoch(),
            perms,
            guardians: guardians.into_iter().collect(),
        }
    }

    /// Generation counter, 0 for the never-loaded snapshot
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Load time in epoch milliseconds
    pub fn loaded_at(&self) -> u64 {
        self.loaded_at
    }

    pub fn rule_count(&self) -> usize {
        self.perms.values().map(HashMap::len).sum()
    }

    /// Permission of one group on one predicate, 0 if absent
    #[inline]
    pub fn lookup(&self, group: &str, predicate: &str) -> u8 {
        self.perms
            .get(predicate)
            .and_then(|groups| groups.get(group))
            .copied()
            .unwrap_or(0)
    }

    /// Union of the permissions of all `groups` on `predicate`
    pub fn lookup_effective<S: AsRef<str>>(&self, groups: &[S], predicate: &str) -> u8 {
        match self.perms.get(predicate) {
            Some(by_group) => groups
                .iter()
                .filter_map(|g| by_group.get(g.as_ref()))
                .fold(0, |acc, p| acc | p),
            None => 0,
        }
    }

    /// Whether `user` was a member of the guardians group at load time
    pub fn is_guardian(&self, user: &str) -> bool {
        self.guardians.contains(user)
    }
}

pub struct PermissionCache {
    store: Arc<dyn RuleStore>,
    current: ArcSwap<Snapshot>,
    refresh_lock: Mutex<()>,
}

impl PermissionCache {
    /// Create a cache serving an empty snapshot until the first refresh
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        PermissionCache {
            store,
            current: ArcSwap::from_pointee(Snapshot::default()),
            refresh_lock: Mutex::new(()),
        }
    }

    /// The currently published snapshot
    #[inline]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    #[inline]
    pub fn lookup(&self, group: &str, predicate: &str) -> u8 {
        self.current.load().lookup(group, predicate)
    }

    #[inline]
    pub fn lookup_effective<S: AsRef<str>>(&self, groups: &[S], predicate: &str) -> u8 {
        self.current.load().lookup_effective(groups, predicate)
    }

    /// Rebuild from the rule store and publish. Concurrent calls are
    /// serialized; on error the old snapshot stays authoritative.
    pub fn refresh(&self) -> Result<u64> {
        let _guard = self.refresh_lock.lock().unwrap_or_else(|p| p.into_inner());
        let rules = self.store.load_all()?;
        let guardians = self.store.load_group_members(GUARDIANS_GROUP)?;
        let generation = self.current.load().generation() + 1;
        let snapshot = Snapshot::build(rules, guardians, generation);
        info!(generation, rules = snapshot.rule_count(), "publishing ACL snapshot");
        self.current.store(Arc::new(snapshot));
        Ok(generation)
    }
}

/// Background task refreshing a cache on a fixed interval
pub struct Refresher {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Refresher {
    /// Load once synchronously, then refresh every `interval` on a dedicated thread
    pub fn start(cache: Arc<PermissionCache>, interval: Duration) -> Result<Self> {
        if let Err(e) = cache.refresh() {
            warn!(error = %e, "initial ACL cache load failed; serving empty snapshot");
        }
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("acl-refresh".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if let Err(e) = cache.refresh() {
                            warn!(error = %e, "ACL cache refresh failed; keeping previous snapshot");
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                }
            })?;
        info!(interval_ms = interval.as_millis() as u64, "ACL cache refresher started");
        Ok(Refresher { stop_tx: Some(stop_tx), handle: Some(handle) })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    /// Stop the refresher and wait for its thread to exit
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            info!("ACL cache refresher stopped");
        }
    }
}

impl Drop for Refresher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use tracing::field::{Field, Visit};
    use tracing::span::{Attributes, Id, Record};
    use tracing::{Event, Level, Metadata, Subscriber};

    struct NoRules;

    impl RuleStore for NoRules {
        fn load_all(&self) -> Result<Vec<RuleEntry>> {
            Ok(Vec::new())
        }

        fn load_group_members(&self, _group: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    /// Keeps (level, message) of every event
    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<(Level, String)>>>);

    struct Message(String);

    impl Visit for Message {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            if field.name() == "message" {
                self.0 = format!("{value:?}");
            }
        }
    }

    impl Subscriber for Recorder {
        fn enabled(&self, _: &Metadata<'_>) -> bool {
            true
        }
        fn new_span(&self, _: &Attributes<'_>) -> Id {
            Id::from_u64(1)
        }
        fn record(&self, _: &Id, _: &Record<'_>) {}
        fn record_follows_from(&self, _: &Id, _: &Id) {}
        fn event(&self, event: &Event<'_>) {
            let mut msg = Message(String::new());
            event.record(&mut msg);
            self.0.lock().unwrap().push((*event.metadata().level(), msg.0));
        }
        fn enter(&self, _: &Id) {}
        fn exit(&self, _: &Id) {}
    }

    #[test]
    fn snapshot_swap_is_logged_at_info() {
        let recorder = Recorder::default();
        let cache = PermissionCache::new(Arc::new(NoRules));
        tracing::subscriber::with_default(recorder.clone(), || cache.refresh()).unwrap();

        let events = recorder.0.lock().unwrap();
        assert!(events
            .iter()
            .any(|(level, msg)| *level == Level::INFO && msg.contains("publishing ACL snapshot")));
    }
}
