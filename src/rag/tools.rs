// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Retrieval tool exposed to the chat model

use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::errors::RagResult;
use crate::embeddings::Embedder;
use crate::llm::ToolSpec;
use crate::vector::{ScoredDocument, VectorStore};

pub const RETRIEVE_TOOL_NAME: &str = "retrieve";
pub const RETRIEVE_TOOL_DESCRIPTION: &str = "Retrieve information related to a query.";
pub const DEFAULT_TOP_K: usize = 2;

/// Result of one retrieval: text for the model plus the raw hits
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub content: String,
    pub artifact: Vec<ScoredDocument>,
}

pub struct RetrieveTool {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    k: usize,
}

impl RetrieveTool {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            store,
            k: DEFAULT_TOP_K,
        }
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: RETRIEVE_TOOL_NAME.to_string(),
            description: RETRIEVE_TOOL_DESCRIPTION.to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" }
                },
                "required": ["query"]
            }),
        }
    }

    pub async fn retrieve(&self, query: &str) -> RagResult<ToolOutput> {
        let embedding = self.embedder.embed_query(query).await?;
        let hits = self.store.similarity_search(&embedding, self.k).await?;
        info!("{} docs retrieved", hits.len());

        Ok(ToolOutput {
            content: serialize_hits(&hits),
            artifact: hits,
        })
    }
}

/// `Source: <metadata>\nContent: <text>` blocks separated by blank lines
pub fn serialize_hits(hits: &[ScoredDocument]) -> String {
    hits.iter()
        .map(|hit| {
            format!(
                "Source: {}\nContent: {}",
                hit.document.metadata, hit.document.page_content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
