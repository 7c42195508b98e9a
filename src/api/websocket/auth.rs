// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Identity token verification for chat connections
//!
//! Clients present a Firebase ID token (an RS256 JWT). [`FirebaseVerifier`]
//! checks its signature against Google's published signing keys, which are
//! fetched as a JWKS document and cached for `keys_cache_ttl`. A token
//! signed with a key id missing from the cache triggers a refresh, so key
//! rotation is picked up before the TTL runs out. Those refreshes happen at
//! most once per [`MIN_REFRESH_INTERVAL`].

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::AuthConfig;

/// Authentication error types
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,

    #[error("{0}")]
    InvalidToken(String),

    #[error("token has expired")]
    TokenExpired,

    #[error("unknown signing key {0}")]
    UnknownKey(String),

    #[error("could not fetch signing keys: {0}")]
    KeyFetch(String),
}

/// Minimum spacing of key refreshes triggered by unknown key ids
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Result type for authentication
pub type AuthResult<T> = std::result::Result<T, AuthError>;

/// Claims of a verified Firebase ID token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Firebase user id
    pub sub: String,
    pub aud: String,
    pub iss: String,
    pub exp: u64,
    pub iat: u64,
    #[serde(default)]
    pub email: Option<String>,
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> AuthResult<IdentityClaims>;
}

#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    kid: String,
    n: String,
    e: String,
}

#[derive(Debug, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

/// Key cache entry
struct KeyCache {
    keys: HashMap<String, Jwk>,
    fetched_at: Instant,
}

pub struct FirebaseVerifier {
    config: AuthConfig,
    client: reqwest::Client,
    cache: RwLock<Option<KeyCache>>,
}

impl FirebaseVerifier {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            cache: RwLock::new(None),
        }
    }

    async fn fetch_keys(&self) -> AuthResult<HashMap<String, Jwk>> {
        let response = self
            .client
            .get(&self.config.jwks_url)
            .send()
            .await
            .map_err(|e| AuthError::KeyFetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::KeyFetch(format!(
                "{} returned {}",
                self.config.jwks_url,
                response.status()
            )));
        }

        let set: JwkSet = response
            .json()
            .await
            .map_err(|e| AuthError::KeyFetch(e.to_string()))?;
        info!("Fetched {} identity signing keys", set.keys.len());

        Ok(set.keys.into_iter().map(|k| (k.kid.clone(), k)).collect())
    }

    async fn refresh(&self) -> AuthResult<()> {
        let keys = self.fetch_keys().await?;
        *self.cache.write().await = Some(KeyCache {
            keys,
            fetched_at: Instant::now(),
        });
        Ok(())
    }

    async fn cached_key(&self, kid: &str) -> Option<Jwk> {
        let cache = self.cache.read().await;
        cache
            .as_ref()
            .filter(|c| c.fetched_at.elapsed() < self.config.keys_cache_ttl)
            .and_then(|c| c.keys.get(kid).cloned())
    }

    /// No cache yet, an expired cache, or the last fetch is older than the refresh interval
    async fn refresh_allowed(&self) -> bool {
        let cache = self.cache.read().await;
        let interval = self.config.keys_cache_ttl.min(MIN_REFRESH_INTERVAL);
        cache
            .as_ref()
            .map_or(true, |c| c.fetched_at.elapsed() >= interval)
    }

    async fn signing_key(&self, kid: &str) -> AuthResult<DecodingKey> {
        let jwk = match self.cached_key(kid).await {
            Some(jwk) => jwk,
            None => {
                if !self.refresh_allowed().await {
                    debug!("Signing key {} unknown, keys refreshed recently", kid);
                    return Err(AuthError::UnknownKey(kid.to_string()));
                }
                debug!("Signing key {} not cached, refreshing", kid);
                self.refresh().await?;
                self.cached_key(kid)
                    .await
                    .ok_or_else(|| AuthError::UnknownKey(kid.to_string()))?
            }
        };

        DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
            .map_err(|e| AuthError::KeyFetch(format!("malformed key {}: {}", kid, e)))
    }
}

#[async_trait]
impl IdentityVerifier for FirebaseVerifier {
    async fn verify(&self, token: &str) -> AuthResult<IdentityClaims> {
        if token.trim().is_empty() {
            return Err(AuthError::MissingToken);
        }

        let header = decode_header(token).map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(AuthError::InvalidToken(format!(
                "unexpected algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| AuthError::InvalidToken("missing key id".to_string()))?;

        let key = self.signing_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[self.config.project_id.as_str()]);
        validation.set_issuer(&[self.config.issuer()]);

        let data = decode::<IdentityClaims>(token, &key, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(e.to_string()),
            }
        })?;

        if data.claims.sub.is_empty() {
            return Err(AuthError::InvalidToken("empty subject".to_string()));
        }

        Ok(data.claims)
    }
}
