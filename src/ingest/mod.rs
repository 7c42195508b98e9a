// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! PDF ingestion pipeline
//!
//! Loading a document runs in two phases:
//!
//! 1. **Staging**: extract page text, split it into overlapping chunks and
//!    embed every chunk (in batches of `batch_size` inputs per request)
//! 2. **Commit**: hand the fully embedded set to the vector store in a single
//!    `add_documents` call, which stores all of it or none of it
//!
//! A failure during staging leaves the store untouched.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rag_chat_node::ingest::{DocumentLoader, IngestProgress};
//! use tokio::sync::mpsc;
//!
//! let loader = DocumentLoader::new(embedder, store).with_batch_size(32);
//! let (progress_tx, progress_rx) = mpsc::channel(16);
//!
//! let report = loader.load_pdf(Path::new("manual.pdf"), Some(progress_tx)).await?;
//! ```

pub mod pdf;
pub mod splitter;

pub use pdf::{extract_pages, Page};
pub use splitter::TextSplitter;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc::Sender;
use tracing::{info, warn};

use crate::embeddings::{Embedder, EmbeddingError};
use crate::vector::{EmbeddedDocument, VectorStore, VectorStoreError};

pub const DEFAULT_BATCH_SIZE: usize = 64;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Failed to read PDF {path}: {reason}")]
    Pdf { path: String, reason: String },

    #[error("PDF is encrypted: {0}")]
    Encrypted(String),

    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Vector store rejected documents: {0}")]
    Store(#[from] VectorStoreError),

    #[error("Invalid ingestion settings: {0}")]
    InvalidSettings(String),

    #[error("Extraction task failed: {0}")]
    Task(String),
}

/// Progress updates during ingestion
#[derive(Debug, Clone, PartialEq)]
pub enum IngestProgress {
    /// Page text extracted
    PagesExtracted { pages: usize },

    /// Pages split into chunks
    Split { chunks: usize },

    /// One embedding request finished
    BatchEmbedded { embedded: usize, total: usize },

    /// Staged chunks handed to the store
    Committing,

    /// Ingestion complete
    Complete { chunks: usize, duration_ms: u64 },
}

/// Outcome of a successful ingestion
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub pages: usize,
    pub chunks: usize,
    pub stored_ids: Vec<String>,
}

pub struct DocumentLoader {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    splitter: TextSplitter,
    batch_size: usize,
}

async fn report(tx: &Option<Sender<IngestProgress>>, progress: IngestProgress) {
    if let Some(tx) = tx {
        let _ = tx.send(progress).await;
    }
}

impl DocumentLoader {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            store,
            splitter: TextSplitter::default(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Inputs per embedding request; values below 1 are clamped to 1
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_splitter(mut self, splitter: TextSplitter) -> Self {
        self.splitter = splitter;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Extract, split, embed and store one PDF
    pub async fn load_pdf(
        &self,
        path: &Path,
        progress_tx: Option<Sender<IngestProgress>>,
    ) -> Result<IngestReport, IngestError> {
        info!("Loading data from {}", path.display());
        let pages = extract_pages(path).await?;
        report(&progress_tx, IngestProgress::PagesExtracted { pages: pages.len() }).await;
        self.load_pages(&pages, progress_tx).await
    }

    /// Split, embed and store already extracted pages
    pub async fn load_pages(
        &self,
        pages: &[Page],
        progress_tx: Option<Sender<IngestProgress>>,
    ) -> Result<IngestReport, IngestError> {
        let start = Instant::now();

        let documents = self.splitter.split_documents(pages);
        report(&progress_tx, IngestProgress::Split { chunks: documents.len() }).await;

        if documents.is_empty() {
            warn!("No text found in {} pages; nothing to store", pages.len());
            report(
                &progress_tx,
                IngestProgress::Complete {
                    chunks: 0,
                    duration_ms: start.elapsed().as_millis() as u64,
                },
            )
            .await;
            return Ok(IngestReport {
                pages: pages.len(),
                chunks: 0,
                stored_ids: Vec::new(),
            });
        }

        // Staging
        let total = documents.len();
        let mut staged = Vec::with_capacity(total);
        for batch in documents.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|d| d.page_content.clone()).collect();
            let embeddings = self.embedder.embed_documents(&texts).await?;
            if embeddings.len() != batch.len() {
                return Err(EmbeddingError::CountMismatch {
                    expected: batch.len(),
                    returned: embeddings.len(),
                }
                .into());
            }

            staged.extend(
                batch
                    .iter()
                    .cloned()
                    .zip(embeddings)
                    .map(|(document, embedding)| EmbeddedDocument { document, embedding }),
            );
            report(
                &progress_tx,
                IngestProgress::BatchEmbedded {
                    embedded: staged.len(),
                    total,
                },
            )
            .await;
        }

        // Commit
        report(&progress_tx, IngestProgress::Committing).await;
        let stored_ids = self.store.add_documents(staged).await?;

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Stored {} chunks from {} pages in {} ms ({} backend)",
            stored_ids.len(),
            pages.len(),
            duration_ms,
            self.store.backend_name()
        );
        report(
            &progress_tx,
            IngestProgress::Complete {
                chunks: stored_ids.len(),
                duration_ms,
            },
        )
        .await;

        Ok(IngestReport {
            pages: pages.len(),
            chunks: stored_ids.len(),
            stored_ids,
        })
    }
}
