// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Shared test doubles for the integration suites
#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use rag_chat_node::api::websocket::auth::{AuthError, AuthResult, IdentityClaims, IdentityVerifier};
use rag_chat_node::embeddings::{Embedder, HashEmbedder};
use rag_chat_node::llm::{ChatModel, LlmError, LlmResult, Message, Role, TokenStream, ToolCall, ToolSpec};
use rag_chat_node::vector::{Document, EmbeddedDocument, LocalVectorStore, VectorStore};
use serde_json::json;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const VALID_TOKEN: &str = "valid-test-token";

/// Chat model that replays scripted tool-enabled responses and streams fixed deltas
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Message>>,
    retrieve_by_default: bool,
    deltas: Vec<String>,
    fail_stream: bool,
    delta_delay: Option<Duration>,
    invoke_delay: Option<Duration>,
    pub invocations: Mutex<Vec<Vec<Message>>>,
    pub stream_prompts: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    /// Every turn asks for retrieval with the latest human text, then streams `deltas`
    pub fn retrieving(deltas: &[&str]) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            retrieve_by_default: true,
            deltas: deltas.iter().map(|d| d.to_string()).collect(),
            fail_stream: false,
            delta_delay: None,
            invoke_delay: None,
            invocations: Mutex::new(Vec::new()),
            stream_prompts: Mutex::new(Vec::new()),
        }
    }

    /// Returns `responses` in order from the tool-enabled call, then answers "ok" directly
    pub fn scripted(responses: Vec<Message>, deltas: &[&str]) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            retrieve_by_default: false,
            ..Self::retrieving(deltas)
        }
    }

    pub fn failing_stream(mut self) -> Self {
        self.fail_stream = true;
        self
    }

    /// Wait `delay` before every streamed delta
    pub fn with_delta_delay(mut self, delay: Duration) -> Self {
        self.delta_delay = Some(delay);
        self
    }

    /// Wait `delay` before answering every tool-enabled call
    pub fn with_invoke_delay(mut self, delay: Duration) -> Self {
        self.invoke_delay = Some(delay);
        self
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }
}

pub fn retrieve_call(id: &str, query: &str) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: "retrieve".to_string(),
        args: json!({ "query": query }),
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn invoke(&self, messages: &[Message], _tools: &[ToolSpec]) -> LlmResult<Message> {
        self.invocations.lock().unwrap().push(messages.to_vec());
        if let Some(delay) = self.invoke_delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(response) = self.responses.lock().unwrap().pop_front() {
            return Ok(response);
        }

        if self.retrieve_by_default {
            let query = messages
                .iter()
                .rev()
                .find(|m| m.role == Role::Human)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            let id = format!("call_{}", self.invocation_count());
            Ok(Message::ai_with_tool_calls("", vec![retrieve_call(&id, &query)]))
        } else {
            Ok(Message::ai("ok"))
        }
    }

    async fn stream(&self, messages: &[Message]) -> LlmResult<TokenStream> {
        self.stream_prompts.lock().unwrap().push(messages.to_vec());

        if self.fail_stream {
            return Err(LlmError::Api {
                status: 500,
                message: "upstream failure".to_string(),
            });
        }

        let deltas: Vec<LlmResult<String>> = self.deltas.iter().cloned().map(Ok).collect();
        match self.delta_delay {
            Some(delay) => Ok(Box::pin(futures::stream::iter(deltas).then(move |delta| async move {
                tokio::time::sleep(delay).await;
                delta
            }))),
            None => Ok(Box::pin(futures::stream::iter(deltas))),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Accepts exactly [`VALID_TOKEN`]
pub struct StaticVerifier;

#[async_trait]
impl IdentityVerifier for StaticVerifier {
    async fn verify(&self, token: &str) -> AuthResult<IdentityClaims> {
        if token != VALID_TOKEN {
            return Err(AuthError::InvalidToken("signature mismatch".to_string()));
        }
        Ok(IdentityClaims {
            sub: "test-user".to_string(),
            aud: "rag-chat-test".to_string(),
            iss: "https://securetoken.google.com/rag-chat-test".to_string(),
            exp: u64::MAX / 2,
            iat: 0,
            email: None,
        })
    }
}

pub fn embedder() -> Arc<HashEmbedder> {
    Arc::new(HashEmbedder::new(256).unwrap())
}

/// Local store under `dir` seeded with `texts` (one page each of `handbook.pdf`)
pub async fn seeded_store(dir: &Path, texts: &[&str]) -> Arc<LocalVectorStore> {
    let store = Arc::new(LocalVectorStore::open(dir).await.unwrap());
    let embedder = embedder();

    let contents: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
    let embeddings = embedder.embed_documents(&contents).await.unwrap();
    let documents = contents
        .into_iter()
        .zip(embeddings)
        .enumerate()
        .map(|(page, (text, embedding))| EmbeddedDocument {
            document: Document::new(text, json!({ "page": page, "source": "handbook.pdf" })),
            embedding,
        })
        .collect();

    store.add_documents(documents).await.unwrap();
    store
}

pub const HANDBOOK: &[&str] = &[
    "The borrow checker enforces that references never outlive the data they point to.",
    "Cargo is the Rust package manager and build tool.",
    "Traits define shared behavior that types can implement.",
];

pub fn write_prompt(dir: &Path, text: &str) -> std::path::PathBuf {
    let path = dir.join("rag_prompt.txt");
    std::fs::write(&path, text).unwrap();
    path
}
