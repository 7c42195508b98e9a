// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Chat model access
//!
//! The graph talks to the language model only through [`ChatModel`]:
//! a single tool-enabled completion, and a token stream for answers.

pub mod messages;
pub mod openai;
pub mod sse;

pub use messages::{Message, Role, ToolCall, ToolSpec};
pub use openai::OpenAiChatModel;

use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Chat request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Chat API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Malformed chat response: {0}")]
    Decode(String),

    #[error("Chat response contained no choices")]
    EmptyResponse,
}

pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// Incremental text deltas of one generation
pub type TokenStream = Pin<Box<dyn Stream<Item = LlmResult<String>> + Send>>;

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// One completion with `tools` available; the returned ai message may carry tool calls
    async fn invoke(&self, messages: &[Message], tools: &[ToolSpec]) -> LlmResult<Message>;

    /// Stream the completion text delta by delta, without tools
    async fn stream(&self, messages: &[Message]) -> LlmResult<TokenStream>;

    fn model_name(&self) -> &str;
}
