// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Per-session conversation history storage
//!
//! The graph loads a session's history at the start of every run and saves
//! it when the run ends. [`MemoryCheckpointStore`] is the default and drops
//! a session once its connection is released; [`FileCheckpointStore`] keeps
//! one JSON file per session so histories survive restarts.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::llm::Message;

/// Trait for session history backends
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// History of a session; empty when the session is unknown
    async fn load(&self, session_id: &str) -> Result<Vec<Message>>;

    /// Replace the stored history of a session
    async fn save(&self, session_id: &str, messages: &[Message]) -> Result<()>;

    async fn delete(&self, session_id: &str) -> Result<()>;

    async fn list_sessions(&self) -> Result<Vec<String>>;

    /// Called once a session can no longer receive messages
    async fn release(&self, session_id: &str) -> Result<()> {
        self.delete(session_id).await
    }
}

#[derive(Default)]
pub struct MemoryCheckpointStore {
    sessions: RwLock<HashMap<String, Vec<Message>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, session_id: &str) -> Result<Vec<Message>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).cloned().unwrap_or_default())
    }

    async fn save(&self, session_id: &str, messages: &[Message]) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session_id.to_string(), messages.to_vec());
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<String>> {
        Ok(self.sessions.read().await.keys().cloned().collect())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    session_id: String,
    saved_at: DateTime<Utc>,
    messages: Vec<Message>,
}

/// File-based storage, one `<session_id>.json` per session
pub struct FileCheckpointStore {
    base_path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn session_path(&self, session_id: &str) -> Result<PathBuf> {
        // Session ids are hex digests; anything else could escape base_path
        let valid = !session_id.is_empty()
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            anyhow::bail!("Invalid session id: {:?}", session_id);
        }
        Ok(self.base_path.join(format!("{}.json", session_id)))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, session_id: &str) -> Result<Vec<Message>> {
        let path = self.session_path(session_id)?;
        if !path.exists() {
            return Ok(Vec::new());
        }

        let contents = fs::read_to_string(&path).await?;
        let file: CheckpointFile = serde_json::from_str(&contents)?;
        if file.session_id != session_id {
            tracing::warn!(
                "Checkpoint {:?} belongs to session {}, expected {}",
                path,
                file.session_id,
                session_id
            );
        }
        Ok(file.messages)
    }

    async fn save(&self, session_id: &str, messages: &[Message]) -> Result<()> {
        let path = self.session_path(session_id)?;
        fs::create_dir_all(&self.base_path).await?;

        let json = serde_json::to_string(&CheckpointFile {
            session_id: session_id.to_string(),
            saved_at: Utc::now(),
            messages: messages.to_vec(),
        })?;

        // Write atomically using a temp file
        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
        fs::rename(temp_path, path).await?;

        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        let path = self.session_path(session_id)?;
        if path.exists() {
            fs::remove_file(&path).await?;
        }
        Ok(())
    }

    /// Saved histories outlive their connection
    async fn release(&self, session_id: &str) -> Result<()> {
        tracing::debug!("Keeping checkpoint of closed session {}", session_id);
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<String>> {
        if !self.base_path.exists() {
            return Ok(Vec::new());
        }

        let mut sessions = Vec::new();
        let mut entries = fs::read_dir(&self.base_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    sessions.push(stem.to_string());
                }
            }
        }
        Ok(sessions)
    }
}
