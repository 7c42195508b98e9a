// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Error types for retrieval and conversation orchestration

use thiserror::Error;

use crate::embeddings::EmbeddingError;
use crate::llm::LlmError;
use crate::vector::VectorStoreError;

/// Errors that can occur while answering a chat turn
#[derive(Error, Debug)]
pub enum RagError {
    /// The chat model request or stream failed
    #[error("Language model error: {0}")]
    Llm(#[from] LlmError),

    /// Embedding the retrieval query failed
    #[error("Query embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Similarity search failed
    #[error("Vector search failed: {0}")]
    VectorStore(#[from] VectorStoreError),

    /// RAG prompt template could not be read
    #[error("Failed to read prompt file {path}: {source}")]
    PromptFile {
        path: String,
        source: std::io::Error,
    },

    /// Session history could not be loaded or saved
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),
}

pub type RagResult<T> = std::result::Result<T, RagError>;
