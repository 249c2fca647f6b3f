//! Service configuration sourced from environment variables

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AclError, Result};

/// HS256 secrets shorter than this are rejected
pub const MIN_SECRET_LEN: usize = 32;

/// Upper bound for either token TTL (ten years)
pub const MAX_TOKEN_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct AclConfig {
    pub db_path: PathBuf,
    pub secret: Vec<u8>,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub cache_refresh_interval: Duration,
    pub groot_password: String,
    pub bind_addr: String,
}

impl Default for AclConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/predacl.mdb"),
            secret: Vec::new(),
            access_ttl: Duration::from_secs(6 * 60 * 60),
            refresh_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            cache_refresh_interval: Duration::from_secs(30),
            groot_password: "password".to_string(),
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl AclConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("PREDACL_DB") {
            config.db_path = PathBuf::from(path);
        }
        config.secret = std::env::var("PREDACL_SECRET")
            .map_err(|_| AclError::Config("PREDACL_SECRET is not set".into()))?
            .into_bytes();
        if let Some(secs) = secs_var("PREDACL_ACCESS_TTL_SECS")? {
            config.access_ttl = secs;
        }
        if let Some(secs) = secs_var("PREDACL_REFRESH_TTL_SECS")? {
            config.refresh_ttl = secs;
        }
        if let Some(secs) = secs_var("PREDACL_CACHE_REFRESH_SECS")? {
            config.cache_refresh_interval = secs;
        }
        if let Ok(password) = std::env::var("PREDACL_GROOT_PASSWORD") {
            config.groot_password = password;
        }
        if let Ok(bind) = std::env::var("PREDACL_BIND") {
            config.bind_addr = bind;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.secret.len() < MIN_SECRET_LEN {
            return Err(AclError::Config(format!(
                "signing secret must be at least {} bytes, got {}",
                MIN_SECRET_LEN,
                self.secret.len()
            )));
        }
        if self.access_ttl.is_zero() || self.refresh_ttl.is_zero() {
            return Err(AclError::Config("token TTLs must be non-zero".into()));
        }
        if self.access_ttl > MAX_TOKEN_TTL || self.refresh_ttl > MAX_TOKEN_TTL {
            return Err(AclError::Config(format!(
                "token TTLs must not exceed {} seconds",
                MAX_TOKEN_TTL.as_secs()
            )));
        }
        if self.access_ttl > self.refresh_ttl {
            return Err(AclError::Config(
                "access token TTL must not exceed refresh token TTL".into(),
            ));
        }
        if self.cache_refresh_interval.is_zero() {
            return Err(AclError::Config("cache refresh interval must be non-zero".into()));
        }
        Ok(())
    }
}

fn secs_var(name: &str) -> Result<Option<Duration>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|s| Some(Duration::from_secs(s)))
            .map_err(|e| AclError::Config(format!("parse {name}: {e}"))),
        Err(_) => Ok(None),
    }
}
