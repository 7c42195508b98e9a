// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// In-process chat server plus websocket client helpers

use crate::common::{embedder, seeded_store, write_prompt, ScriptedModel, StaticVerifier, HANDBOOK};
use async_trait::async_trait;
use futures_util::StreamExt;
use rag_chat_node::api::websocket::ServerFrame;
use rag_chat_node::api::{serve, AppState};
use rag_chat_node::llm::Message as ChatMessage;
use rag_chat_node::rag::{CheckpointStore, MemoryCheckpointStore, RagGraph, RetrieveTool};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

pub const SYSTEM_PROMPT: &str = "You are a patient Rust tutor.";

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub checkpoints: Arc<TrackingCheckpoints>,
    shutdown: Option<oneshot::Sender<()>>,
    _dir: TempDir,
}

impl TestServer {
    pub async fn start(model: Arc<ScriptedModel>, idle_timeout: Duration) -> Self {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir.path().join("store"), HANDBOOK).await;
        let checkpoints = Arc::new(TrackingCheckpoints::default());
        let graph = RagGraph::new(
            model,
            RetrieveTool::new(embedder(), store),
            checkpoints.clone(),
            write_prompt(dir.path(), "Answer from the context."),
        );

        let state = AppState {
            graph: Arc::new(graph),
            verifier: Arc::new(StaticVerifier),
            system_prompt: Arc::new(SYSTEM_PROMPT.to_string()),
            idle_timeout,
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            serve(listener, state, async move {
                let _ = rx.await;
            })
            .await
            .unwrap();
        });

        Self {
            addr,
            checkpoints,
            shutdown: Some(tx),
            _dir: dir,
        }
    }

    pub async fn connect(&self, token: Option<&str>) -> Client {
        let url = match token {
            Some(token) => format!("ws://{}/chat?token={}", self.addr, token),
            None => format!("ws://{}/chat", self.addr),
        };
        let (client, response) = connect_async(url).await.unwrap();
        assert_eq!(response.status(), 101);
        client
    }
}

impl TestServer {
    /// Wait until `count` sessions were released, or fail after `limit`
    pub async fn wait_for_released(&self, count: usize, limit: Duration) {
        let deadline = tokio::time::Instant::now() + limit;
        while self.checkpoints.released_count() < count {
            assert!(
                tokio::time::Instant::now() < deadline,
                "only {} of {} sessions released",
                self.checkpoints.released_count(),
                count
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// In-memory checkpoints that record which sessions were released
#[derive(Default)]
pub struct TrackingCheckpoints {
    inner: MemoryCheckpointStore,
    released: Mutex<Vec<String>>,
}

impl TrackingCheckpoints {
    pub fn released_count(&self) -> usize {
        self.released.lock().unwrap().len()
    }
}

#[async_trait]
impl CheckpointStore for TrackingCheckpoints {
    async fn load(&self, session_id: &str) -> anyhow::Result<Vec<ChatMessage>> {
        self.inner.load(session_id).await
    }

    async fn save(&self, session_id: &str, messages: &[ChatMessage]) -> anyhow::Result<()> {
        self.inner.save(session_id, messages).await
    }

    async fn delete(&self, session_id: &str) -> anyhow::Result<()> {
        self.inner.delete(session_id).await
    }

    async fn list_sessions(&self) -> anyhow::Result<Vec<String>> {
        self.inner.list_sessions().await
    }

    async fn release(&self, session_id: &str) -> anyhow::Result<()> {
        self.released.lock().unwrap().push(session_id.to_string());
        self.inner.release(session_id).await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Next JSON frame; panics on close or after five seconds
pub async fn next_frame(client: &mut Client) -> ServerFrame {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Close(frame) => panic!("unexpected close: {:?}", frame),
            _ => continue,
        }
    }
}

/// Close code sent by the server; panics if a data frame arrives first
pub async fn expect_close(client: &mut Client) -> u16 {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for close")
            .expect("connection ended without close frame")
            .expect("websocket error");
        match msg {
            Message::Close(Some(frame)) => return u16::from(frame.code),
            Message::Close(None) => panic!("close frame without code"),
            Message::Text(text) => panic!("unexpected frame before close: {}", text),
            _ => continue,
        }
    }
}
