//! Process-scoped ACL component with an explicit lifecycle

use std::sync::{Arc, Mutex};

use tracing::info;

use crate::admin::AclAdmin;
use crate::cache::{PermissionCache, Refresher};
use crate::config::AclConfig;
use crate::db::Store;
use crate::enforce::{Caller, Credentials, Enforcer};
use crate::error::Result;
use crate::token::{TokenManager, TokenPair};

pub struct AclService {
    config: AclConfig,
    store: Arc<Store>,
    tokens: Arc<TokenManager>,
    cache: Arc<PermissionCache>,
    enforcer: Arc<Enforcer>,
    admin: AclAdmin,
    refresher: Mutex<Option<Refresher>>,
}

impl AclService {
    /// Open the store at `config.db_path` and bootstrap it if needed
    pub fn open(config: AclConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(Store::open(&config.db_path)?);
        Self::build(config, store)
    }

    /// Build an instance over an already opened store. Instances sharing a
    /// store keep separate caches and refresh schedules.
    pub fn with_store(config: AclConfig, store: Arc<Store>) -> Result<Self> {
        config.validate()?;
        Self::build(config, store)
    }

    fn build(config: AclConfig, store: Arc<Store>) -> Result<Self> {
        if store.bootstrap(&config.groot_password)? {
            info!(path = %config.db_path.display(), "initialized new ACL store");
        }
        let tokens = Arc::new(TokenManager::from_config(store.clone(), &config));
        let cache = Arc::new(PermissionCache::new(store.clone()));
        let enforcer = Arc::new(Enforcer::new(store.clone(), tokens.clone(), cache.clone()));
        let admin = AclAdmin::new(store.clone(), enforcer.clone());
        Ok(Self {
            config,
            store,
            tokens,
            cache,
            enforcer,
            admin,
            refresher: Mutex::new(None),
        })
    }

    /// Load the cache and start periodic refresh. No-op if already running.
    pub fn start(&self) -> Result<()> {
        let mut slot = self.refresher.lock().unwrap_or_else(|p| p.into_inner());
        if slot.as_ref().map(Refresher::is_running).unwrap_or(false) {
            return Ok(());
        }
        *slot = Some(Refresher::start(self.cache.clone(), self.config.cache_refresh_interval)?);
        Ok(())
    }

    pub fn stop(&self) {
        let running = self.refresher.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(refresher) = running {
            refresher.stop();
        }
    }

    pub fn is_running(&self) -> bool {
        self.refresher
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .map(Refresher::is_running)
            .unwrap_or(false)
    }

    pub fn login(&self, user: &str, password: &str) -> Result<TokenPair> {
        self.tokens.authenticate(user, password)
    }

    /// Resolve credentials to a caller, for admin operations
    pub fn caller(&self, creds: &Credentials) -> Result<Caller> {
        Ok(self.enforcer.resolve(creds)?.caller)
    }

    pub fn config(&self) -> &AclConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn cache(&self) -> &Arc<PermissionCache> {
        &self.cache
    }

    pub fn enforcer(&self) -> &Enforcer {
        &self.enforcer
    }

    pub fn admin(&self) -> &AclAdmin {
        &self.admin
    }
}

impl Drop for AclService {
    fn drop(&mut self) {
        self.stop();
    }
}
