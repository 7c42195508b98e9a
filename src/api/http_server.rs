// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::Context;
use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::Uri,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use super::errors::ApiError;
use super::websocket::auth::{FirebaseVerifier, IdentityVerifier};
use super::websocket::handler::handle_chat;
use crate::config::AppConfig;
use crate::embeddings::OpenAiEmbeddings;
use crate::llm::OpenAiChatModel;
use crate::rag::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, RagGraph, RetrieveTool};
use crate::vector::open_vector_store;

/// Shared by every connection
#[derive(Clone)]
pub struct AppState {
    pub graph: Arc<RagGraph>,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub system_prompt: Arc<String>,
    pub idle_timeout: Duration,
}

impl AppState {
    /// Wire up model, embeddings, vector store, checkpoints and verifier from configuration
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let system_prompt = tokio::fs::read_to_string(&config.prompts.system_prompt)
            .await
            .with_context(|| {
                format!(
                    "failed to read system prompt {}",
                    config.prompts.system_prompt.display()
                )
            })?;

        let model = Arc::new(OpenAiChatModel::new(&config.openai)?);
        let embedder = Arc::new(OpenAiEmbeddings::new(&config.openai)?);
        let store = open_vector_store(&config.vector_store).await?;
        info!(
            "Using {} vector store ({} documents)",
            store.backend_name(),
            store.count().await?
        );

        let checkpoints: Arc<dyn CheckpointStore> = match &config.checkpoint_dir {
            Some(dir) => {
                let store = FileCheckpointStore::new(dir.clone());
                info!(
                    "Persisting session histories to {} ({} saved)",
                    dir.display(),
                    store.list_sessions().await?.len()
                );
                Arc::new(store)
            }
            None => Arc::new(MemoryCheckpointStore::new()),
        };

        let graph = RagGraph::new(
            model,
            RetrieveTool::new(embedder, store),
            checkpoints,
            config.prompts.rag_prompt.clone(),
        );

        Ok(Self {
            graph: Arc::new(graph),
            verifier: Arc::new(FirebaseVerifier::new(config.auth.clone())),
            system_prompt: Arc::new(system_prompt),
            idle_timeout: config.server.idle_timeout,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    pub token: Option<String>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/chat", get(chat_handler))
        .fallback(not_found_handler)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Serve on an already bound listener until `shutdown` resolves
pub async fn serve<F>(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Bind `bind_address` and serve until Ctrl-C
pub async fn start_server(bind_address: &str, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("failed to bind {}", bind_address))?;

    info!("Chat server listening on {}", listener.local_addr()?);

    serve(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    })
    .await?;

    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

async fn chat_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ChatQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_chat(socket, state, query.token))
}

async fn not_found_handler(uri: Uri) -> ApiError {
    ApiError::NotFound(uri.path().to_string())
}
