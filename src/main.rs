// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::Result;
use rag_chat_node::{
    api::{start_server, AppState},
    config::AppConfig,
    version,
};
use std::env;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Initialize tracing subscriber for logging
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    info!("Starting {}", version::get_version_string());
    info!("Features: {}", version::FEATURES.join(", "));

    let config = AppConfig::from_env()?;
    info!(
        "Chat model {}, embeddings {}, {} vector store",
        config.openai.chat_model,
        config.openai.embedding_model,
        config.vector_store.backend_name()
    );

    let state = AppState::from_config(&config).await?;
    start_server(&config.server.bind_address(), state).await?;

    info!("Server stopped");
    Ok(())
}
