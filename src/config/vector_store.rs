// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use std::path::PathBuf;

use super::{optional, required, ConfigError, ConfigResult};

pub const DEFAULT_PERSIST_DIRECTORY: &str = "./vector_data";

/// Where chunks and embeddings live
#[derive(Debug, Clone)]
pub enum VectorStoreConfig {
    /// JSON-backed store on local disk
    Local { persist_directory: PathBuf },
    /// MongoDB Atlas collection with a vector search index
    Atlas {
        cluster_uri: String,
        database: String,
        collection: String,
        index_name: String,
    },
}

impl VectorStoreConfig {
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(super::env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend = optional(&lookup, "VECTOR_STORE", "local").to_lowercase();
        match backend.as_str() {
            "local" => Ok(Self::Local {
                persist_directory: PathBuf::from(optional(
                    &lookup,
                    "PERSIST_DIRECTORY",
                    DEFAULT_PERSIST_DIRECTORY,
                )),
            }),
            "atlas" | "mongodb" => Ok(Self::Atlas {
                cluster_uri: required(&lookup, "MONGODB_ATLAS_CLUSTER_URI")?,
                database: required(&lookup, "DB_NAME")?,
                collection: required(&lookup, "COLLECTION_NAME")?,
                index_name: required(&lookup, "ATLAS_VECTOR_SEARCH_INDEX_NAME")?,
            }),
            other => Err(ConfigError::Invalid {
                key: "VECTOR_STORE",
                reason: format!("unknown backend '{}', expected 'local' or 'atlas'", other),
            }),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Local { .. } => "local",
            Self::Atlas { .. } => "atlas",
        }
    }
}
