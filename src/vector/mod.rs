// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Vector stores for document chunks
//!
//! Two backends share the [`VectorStore`] trait:
//! - [`LocalVectorStore`]: JSON file on local disk, exact cosine search
//! - [`AtlasVectorStore`]: MongoDB Atlas collection queried with `$vectorSearch`

pub mod atlas;
pub mod local;

pub use atlas::AtlasVectorStore;
pub use local::LocalVectorStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::config::VectorStoreConfig;

#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("Invalid vector dimensions: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid vector values: contains NaN or Infinity")]
    NonFiniteVector,

    #[error("Vector store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Vector store data is corrupt: {0}")]
    Corrupt(String),

    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("Failed to commit {attempted} documents: {reason}")]
    CommitFailed { attempted: usize, reason: String },
}

pub type VectorStoreResult<T> = std::result::Result<T, VectorStoreError>;

/// A chunk of source text plus its provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub page_content: String,
    pub metadata: Value,
}

impl Document {
    pub fn new(page_content: impl Into<String>, metadata: Value) -> Self {
        Self {
            page_content: page_content.into(),
            metadata,
        }
    }
}

/// A document staged for insertion together with its embedding
#[derive(Debug, Clone)]
pub struct EmbeddedDocument {
    pub document: Document,
    pub embedding: Vec<f32>,
}

/// A search hit; higher score means more similar
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredDocument {
    pub id: String,
    pub document: Document,
    pub score: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert all documents or none of them; returns the assigned ids in input order
    async fn add_documents(&self, documents: Vec<EmbeddedDocument>) -> VectorStoreResult<Vec<String>>;

    /// Top-k documents ordered by decreasing similarity to `embedding`
    async fn similarity_search(
        &self,
        embedding: &[f32],
        k: usize,
    ) -> VectorStoreResult<Vec<ScoredDocument>>;

    async fn count(&self) -> VectorStoreResult<usize>;

    fn backend_name(&self) -> &'static str;
}

pub(crate) fn validate_embedding(embedding: &[f32]) -> VectorStoreResult<()> {
    if embedding.iter().any(|v| !v.is_finite()) {
        return Err(VectorStoreError::NonFiniteVector);
    }
    Ok(())
}

/// Open the backend selected by configuration
pub async fn open_vector_store(config: &VectorStoreConfig) -> VectorStoreResult<Arc<dyn VectorStore>> {
    match config {
        VectorStoreConfig::Local { persist_directory } => {
            let store = LocalVectorStore::open(persist_directory).await?;
            Ok(Arc::new(store))
        }
        VectorStoreConfig::Atlas {
            cluster_uri,
            database,
            collection,
            index_name,
        } => {
            let store =
                AtlasVectorStore::connect(cluster_uri, database, collection, index_name).await?;
            Ok(Arc::new(store))
        }
    }
}
