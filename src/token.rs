//! Session tokens
//!
//! Access tokens are HS256 JWTs carrying the user and the groups they held at
//! issue time. Refresh tokens are opaque random strings persisted by hash and
//! redeemable once.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::auth::{generate_token, hash_token};
use crate::config::AclConfig;
use crate::db::Store;
use crate::error::{AclError, Result};
use crate::tx::current_epoch;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccessClaims {
    sub: String,
    groups: Vec<String>,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// A verified access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub user: String,
    /// Membership at issue time
    pub groups: Vec<String>,
    /// Epoch seconds
    pub issued_at: i64,
    /// Epoch seconds
    pub expires_at: i64,
}

pub struct TokenManager {
    store: Arc<Store>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenManager {
    pub fn new(store: Arc<Store>, secret: &[u8], access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            store,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn from_config(store: Arc<Store>, config: &AclConfig) -> Self {
        Self::new(store, &config.secret, config.access_ttl, config.refresh_ttl)
    }

    /// Log in with a password; unknown users and wrong passwords are
    /// indistinguishable to the caller
    pub fn authenticate(&self, user: &str, password: &str) -> Result<TokenPair> {
        if !self.store.password_matches(user, password)? {
            warn!(user, "login rejected");
            return Err(AclError::InvalidCredentials);
        }
        let pair = self.issue(user)?;
        info!(user, "login succeeded");
        Ok(pair)
    }

    pub fn verify_access(&self, token: &str) -> Result<Session> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        let data = jsonwebtoken::decode::<AccessClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AclError::TokenExpired,
                _ => AclError::TokenInvalid(e.to_string()),
            })?;
        let claims = data.claims;
        Ok(Session {
            user: claims.sub,
            groups: claims.groups,
            issued_at: claims.iat,
            expires_at: claims.exp,
        })
    }

    /// Redeem a refresh token for a new pair. The presented token is consumed
    /// whether or not redemption succeeds.
    pub fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let hash = hash_token(refresh_token);
        let (user, expires_at) = self
            .store
            .transact(|tx| tx.take_refresh(&hash))?
            .ok_or_else(|| AclError::RefreshInvalid("refresh token is unknown or already used".into()))?;
        if expires_at <= current_epoch() {
            debug!(user = %user, "expired refresh token presented");
            return Err(AclError::RefreshExpired);
        }
        if !self.store.user_exists(&user)? {
            return Err(AclError::RefreshInvalid(format!("user {user} no longer exists")));
        }
        self.issue(&user)
    }

    /// Logout: drop one refresh token. Returns whether it was live.
    pub fn revoke(&self, refresh_token: &str) -> Result<bool> {
        let hash = hash_token(refresh_token);
        Ok(self.store.transact(|tx| tx.take_refresh(&hash))?.is_some())
    }

    /// Drop every refresh token of a user
    pub fn revoke_all(&self, user: &str) -> Result<u64> {
        let n = self.store.transact(|tx| tx.revoke_user_refresh(user))?;
        info!(user, revoked = n, "refresh tokens revoked");
        Ok(n)
    }

    fn issue(&self, user: &str) -> Result<TokenPair> {
        let groups = self.store.user_groups(user)?;
        let now = now_epoch_seconds();
        let claims = AccessClaims {
            sub: user.to_string(),
            groups,
            iat: now,
            exp: now.saturating_add(i64::try_from(self.access_ttl.as_secs()).unwrap_or(i64::MAX)),
        };
        let access_token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AclError::Config(format!("cannot sign access token: {e}")))?;

        let refresh_token = generate_token()?;
        let expires_at = current_epoch().saturating_add(u64::try_from(self.refresh_ttl.as_millis()).unwrap_or(u64::MAX));
        self.store
            .transact(|tx| tx.store_refresh(&hash_token(&refresh_token), user, expires_at))?;
        Ok(TokenPair { access_token, refresh_token })
    }
}

fn now_epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs() as i64
}
