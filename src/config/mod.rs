// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Environment-driven configuration
//!
//! Every setting is read through a lookup function so the same parsing is
//! used for the real process environment (`from_env`) and for tests, which
//! pass a plain map instead of mutating global state.

pub mod vector_store;

pub use vector_store::VectorStoreConfig;

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-large";
pub const DEFAULT_FIREBASE_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

fn required<F>(lookup: &F, key: &'static str) -> ConfigResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(key))
}

fn optional<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parsed<F, T>(lookup: &F, key: &'static str, default: T) -> ConfigResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn http_url<F>(lookup: &F, key: &'static str, default: &str) -> ConfigResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = optional(lookup, key, default);
    url::Url::parse(&raw).map_err(|e| ConfigError::Invalid {
        key,
        reason: e.to_string(),
    })?;
    Ok(raw.trim_end_matches('/').to_string())
}

pub(crate) fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// OpenAI-compatible endpoint used for both chat completions and embeddings
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub request_timeout: Duration,
}

impl OpenAiConfig {
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            api_key: required(&lookup, "OPENAI_API_KEY")?,
            base_url: http_url(&lookup, "OPENAI_BASE_URL", DEFAULT_OPENAI_BASE_URL)?,
            chat_model: optional(&lookup, "OPENAI_MODEL", DEFAULT_CHAT_MODEL),
            embedding_model: optional(&lookup, "EMBEDDING_MODEL", DEFAULT_EMBEDDING_MODEL),
            request_timeout: Duration::from_secs(parsed(&lookup, "OPENAI_TIMEOUT_SECS", 120)?),
        })
    }
}

/// Firebase ID token verification settings
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub project_id: String,
    pub jwks_url: String,
    pub keys_cache_ttl: Duration,
}

impl AuthConfig {
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            project_id: required(&lookup, "FIREBASE_PROJECT_ID")?,
            jwks_url: http_url(&lookup, "FIREBASE_JWKS_URL", DEFAULT_FIREBASE_JWKS_URL)?,
            keys_cache_ttl: Duration::from_secs(parsed(&lookup, "FIREBASE_KEYS_TTL_SECS", 3600)?),
        })
    }

    /// Issuer Firebase stamps into every ID token for this project
    pub fn issuer(&self) -> String {
        format!("https://securetoken.google.com/{}", self.project_id)
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
        }
    }
}

impl ServerConfig {
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            host: optional(&lookup, "API_HOST", &defaults.host),
            port: parsed(&lookup, "API_PORT", defaults.port)?,
            idle_timeout: Duration::from_secs(parsed(
                &lookup,
                "IDLE_TIMEOUT_SECS",
                DEFAULT_IDLE_TIMEOUT_SECS,
            )?),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Prompt files read by the chat server
#[derive(Debug, Clone)]
pub struct PromptConfig {
    /// First-turn system message
    pub system_prompt: PathBuf,
    /// Template prepended to retrieved content during generation
    pub rag_prompt: PathBuf,
}

impl PromptConfig {
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            system_prompt: PathBuf::from(required(&lookup, "SYSTEM_PROMPT")?),
            rag_prompt: PathBuf::from(required(&lookup, "PROMPT_FILE")?),
        })
    }
}

/// Full configuration of the chat server process
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub openai: OpenAiConfig,
    pub auth: AuthConfig,
    pub prompts: PromptConfig,
    pub vector_store: VectorStoreConfig,
    /// When set, session histories are written here instead of kept in memory only
    pub checkpoint_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            server: ServerConfig::from_lookup(&lookup)?,
            openai: OpenAiConfig::from_lookup(&lookup)?,
            auth: AuthConfig::from_lookup(&lookup)?,
            prompts: PromptConfig::from_lookup(&lookup)?,
            vector_store: VectorStoreConfig::from_lookup(&lookup)?,
            checkpoint_dir: lookup("CHECKPOINT_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        })
    }
}
