// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// On-disk vector store: one JSON file per directory, loaded fully into memory.
// Writes go to a temp file that is renamed over the live file, so a failed
// commit leaves the previous contents intact.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    validate_embedding, Document, EmbeddedDocument, ScoredDocument, VectorStore, VectorStoreError,
    VectorStoreResult,
};
use crate::embeddings::cosine_similarity;

const DATA_FILE: &str = "collection.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    id: String,
    page_content: String,
    metadata: serde_json::Value,
    embedding: Vec<f32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CollectionFile {
    dimension: Option<usize>,
    records: Vec<StoredRecord>,
}

pub struct LocalVectorStore {
    data_path: PathBuf,
    collection: RwLock<CollectionFile>,
}

impl LocalVectorStore {
    /// Open (or create) the store rooted at `persist_directory`
    pub async fn open(persist_directory: &Path) -> VectorStoreResult<Self> {
        fs::create_dir_all(persist_directory).await?;
        let data_path = persist_directory.join(DATA_FILE);

        let collection = if fs::try_exists(&data_path).await? {
            let raw = fs::read_to_string(&data_path).await?;
            serde_json::from_str::<CollectionFile>(&raw)
                .map_err(|e| VectorStoreError::Corrupt(format!("{}: {}", data_path.display(), e)))?
        } else {
            CollectionFile::default()
        };

        info!(
            "Opened local vector store at {} ({} records)",
            data_path.display(),
            collection.records.len()
        );

        Ok(Self {
            data_path,
            collection: RwLock::new(collection),
        })
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    async fn write_atomically(&self, collection: &CollectionFile) -> VectorStoreResult<()> {
        let json = serde_json::to_vec(collection)
            .map_err(|e| VectorStoreError::Corrupt(e.to_string()))?;

        let temp_path = self.data_path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &self.data_path).await?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for LocalVectorStore {
    async fn add_documents(&self, documents: Vec<EmbeddedDocument>) -> VectorStoreResult<Vec<String>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let mut collection = self.collection.write().await;
        let mut dimension = collection.dimension;

        let mut staged = Vec::with_capacity(documents.len());
        for doc in documents {
            validate_embedding(&doc.embedding)?;
            match dimension {
                Some(expected) if expected != doc.embedding.len() => {
                    return Err(VectorStoreError::DimensionMismatch {
                        expected,
                        actual: doc.embedding.len(),
                    });
                }
                Some(_) => {}
                None => dimension = Some(doc.embedding.len()),
            }
            staged.push(StoredRecord {
                id: Uuid::new_v4().to_string(),
                page_content: doc.document.page_content,
                metadata: doc.document.metadata,
                embedding: doc.embedding,
            });
        }

        let ids: Vec<String> = staged.iter().map(|r| r.id.clone()).collect();

        let mut next = CollectionFile {
            dimension,
            records: collection.records.clone(),
        };
        next.records.extend(staged);

        self.write_atomically(&next).await?;
        *collection = next;

        debug!("Committed {} records to {}", ids.len(), self.data_path.display());
        Ok(ids)
    }

    async fn similarity_search(
        &self,
        embedding: &[f32],
        k: usize,
    ) -> VectorStoreResult<Vec<ScoredDocument>> {
        validate_embedding(embedding)?;
        let collection = self.collection.read().await;

        if k == 0 || collection.records.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(expected) = collection.dimension {
            if expected != embedding.len() {
                return Err(VectorStoreError::DimensionMismatch {
                    expected,
                    actual: embedding.len(),
                });
            }
        }

        let mut results: Vec<ScoredDocument> = collection
            .records
            .iter()
            .map(|record| ScoredDocument {
                id: record.id.clone(),
                document: Document::new(record.page_content.clone(), record.metadata.clone()),
                score: cosine_similarity(embedding, &record.embedding),
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(k);

        Ok(results)
    }

    async fn count(&self) -> VectorStoreResult<usize> {
        Ok(self.collection.read().await.records.len())
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
