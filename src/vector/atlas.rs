// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! MongoDB Atlas Vector Search backend
//!
//! Each chunk is one document `{_id, text, embedding, metadata, ingest_batch}`.
//! Similarity search runs the `$vectorSearch` aggregation stage against the
//! configured Atlas index (cosine similarity, `embedding` path).

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document as BsonDocument};
use mongodb::{Client, Collection};
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    validate_embedding, Document, EmbeddedDocument, ScoredDocument, VectorStore, VectorStoreError,
    VectorStoreResult,
};

/// Candidates scanned per requested result by the approximate search
const NUM_CANDIDATES_PER_RESULT: usize = 10;

pub struct AtlasVectorStore {
    collection: Collection<BsonDocument>,
    index_name: String,
}

impl AtlasVectorStore {
    pub async fn connect(
        cluster_uri: &str,
        database: &str,
        collection: &str,
        index_name: &str,
    ) -> VectorStoreResult<Self> {
        let client = Client::with_uri_str(cluster_uri).await?;
        let collection = client.database(database).collection::<BsonDocument>(collection);
        info!(
            "Connected to Atlas collection {}.{} (index {})",
            database,
            collection.name(),
            index_name
        );

        Ok(Self {
            collection,
            index_name: index_name.to_string(),
        })
    }

    fn search_pipeline(&self, embedding: &[f32], k: usize) -> Vec<BsonDocument> {
        let query_vector: Vec<Bson> = embedding.iter().map(|v| Bson::Double(f64::from(*v))).collect();
        let limit = k as i64;
        let num_candidates = (k * NUM_CANDIDATES_PER_RESULT) as i64;

        vec![
            doc! {
                "$vectorSearch": {
                    "index": self.index_name.as_str(),
                    "path": "embedding",
                    "queryVector": query_vector,
                    "numCandidates": num_candidates,
                    "limit": limit,
                }
            },
            doc! {
                "$project": {
                    "_id": 1,
                    "text": 1,
                    "metadata": 1,
                    "score": { "$meta": "vectorSearchScore" },
                }
            },
        ]
    }
}

fn to_bson_document(record: EmbeddedDocument, id: &str, batch_id: &str) -> VectorStoreResult<BsonDocument> {
    let metadata = mongodb::bson::to_bson(&record.document.metadata)
        .map_err(|e| VectorStoreError::Corrupt(format!("metadata not representable: {}", e)))?;
    let embedding: Vec<Bson> = record
        .embedding
        .iter()
        .map(|v| Bson::Double(f64::from(*v)))
        .collect();

    Ok(doc! {
        "_id": id,
        "text": record.document.page_content,
        "embedding": embedding,
        "metadata": metadata,
        "ingest_batch": batch_id,
    })
}

fn from_bson_document(raw: BsonDocument) -> VectorStoreResult<ScoredDocument> {
    let id = match raw.get("_id") {
        Some(Bson::String(s)) => s.clone(),
        Some(Bson::ObjectId(oid)) => oid.to_hex(),
        _ => return Err(VectorStoreError::Corrupt("search hit without _id".to_string())),
    };
    let text = raw
        .get_str("text")
        .map_err(|e| VectorStoreError::Corrupt(format!("hit {}: {}", id, e)))?
        .to_string();
    let metadata = match raw.get("metadata") {
        Some(value) => value.clone().into_relaxed_extjson(),
        None => serde_json::Value::Object(Default::default()),
    };
    let score = raw.get_f64("score").unwrap_or(0.0) as f32;

    Ok(ScoredDocument {
        id,
        document: Document::new(text, metadata),
        score,
    })
}

#[async_trait]
impl VectorStore for AtlasVectorStore {
    async fn add_documents(&self, documents: Vec<EmbeddedDocument>) -> VectorStoreResult<Vec<String>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let batch_id = Uuid::new_v4().to_string();
        let mut ids = Vec::with_capacity(documents.len());
        let mut records = Vec::with_capacity(documents.len());
        for document in documents {
            validate_embedding(&document.embedding)?;
            let id = Uuid::new_v4().to_string();
            records.push(to_bson_document(document, &id, &batch_id)?);
            ids.push(id);
        }

        let attempted = records.len();
        if let Err(e) = self.collection.insert_many(records, None).await {
            // Roll back whatever part of the batch made it in.
            warn!("Insert of batch {} failed, removing partial writes: {}", batch_id, e);
            if let Err(cleanup) = self
                .collection
                .delete_many(doc! { "ingest_batch": batch_id.as_str() }, None)
                .await
            {
                warn!("Cleanup of batch {} failed: {}", batch_id, cleanup);
            }
            return Err(VectorStoreError::CommitFailed {
                attempted,
                reason: e.to_string(),
            });
        }

        info!("Inserted {} documents (batch {})", attempted, batch_id);
        Ok(ids)
    }

    async fn similarity_search(
        &self,
        embedding: &[f32],
        k: usize,
    ) -> VectorStoreResult<Vec<ScoredDocument>> {
        validate_embedding(embedding)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut cursor = self
            .collection
            .aggregate(self.search_pipeline(embedding, k), None)
            .await?;

        let mut results = Vec::with_capacity(k);
        while let Some(raw) = cursor.try_next().await? {
            results.push(from_bson_document(raw)?);
        }

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(k);
        Ok(results)
    }

    async fn count(&self) -> VectorStoreResult<usize> {
        Ok(self.collection.count_documents(None, None).await? as usize)
    }

    fn backend_name(&self) -> &'static str {
        "atlas"
    }
}
