// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Conversation state machine
//!
//! One run answers one chat turn:
//!
//! ```text
//! QueryOrRespond --(tool calls)--> Tools --> Generate --> Done
//!        \-----------(no tool calls)-------------------> Done
//! ```
//!
//! - **QueryOrRespond**: the model sees the full history with the retrieval
//!   tool bound and either answers directly or asks for retrieval
//! - **Tools**: every requested retrieval runs and its result is appended as
//!   a tool message
//! - **Generate**: the answer is streamed from the RAG prompt, the retrieved
//!   context and the conversation so far
//!
//! Answers leave the graph as [`GraphEvent`]s on a bounded channel. Each
//! event carries the cumulative answer text, not a delta.

use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::checkpoint::CheckpointStore;
use super::errors::{RagError, RagResult};
use super::tools::{RetrieveTool, RETRIEVE_TOOL_NAME};
use crate::llm::{ChatModel, Message, Role, ToolCall};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    QueryOrRespond,
    Tools,
    Generate,
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    /// Answer text produced so far
    Answer(String),
}

/// Tool messages at the end of the history, in their original order
pub fn trailing_tool_messages(history: &[Message]) -> Vec<Message> {
    let mut tool_messages: Vec<Message> = history
        .iter()
        .rev()
        .take_while(|m| m.is_tool())
        .cloned()
        .collect();
    tool_messages.reverse();
    tool_messages
}

/// History without tool traffic: system, human, and ai messages that carry no tool calls
pub fn conversation_messages(history: &[Message]) -> Vec<Message> {
    history
        .iter()
        .filter(|m| match m.role {
            Role::System | Role::Human => true,
            Role::Ai => !m.has_tool_calls(),
            Role::Tool => false,
        })
        .cloned()
        .collect()
}

pub struct RagGraph {
    model: Arc<dyn ChatModel>,
    retriever: RetrieveTool,
    checkpoints: Arc<dyn CheckpointStore>,
    prompt_file: PathBuf,
}

impl RagGraph {
    pub fn new(
        model: Arc<dyn ChatModel>,
        retriever: RetrieveTool,
        checkpoints: Arc<dyn CheckpointStore>,
        prompt_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            model,
            retriever,
            checkpoints,
            prompt_file: prompt_file.into(),
        }
    }

    /// Stored history of a session
    pub async fn history(&self, session_id: &str) -> RagResult<Vec<Message>> {
        self.checkpoints
            .load(session_id)
            .await
            .map_err(|e| RagError::Checkpoint(e.to_string()))
    }

    /// Forget a finished session; durable checkpoint stores may keep it
    pub async fn end_session(&self, session_id: &str) -> RagResult<()> {
        self.checkpoints
            .release(session_id)
            .await
            .map_err(|e| RagError::Checkpoint(e.to_string()))
    }

    /// Append `new_messages` to the session and drive the graph to completion.
    ///
    /// Stops early, without error, when `cancel` fires or `tx` is closed. The
    /// history reached so far is saved either way.
    pub async fn run(
        &self,
        session_id: &str,
        new_messages: Vec<Message>,
        tx: mpsc::Sender<GraphEvent>,
        cancel: CancellationToken,
    ) -> RagResult<()> {
        let mut history = self.history(session_id).await?;
        history.extend(new_messages);

        let outcome = self.drive(&mut history, &tx, &cancel).await;

        self.checkpoints
            .save(session_id, &history)
            .await
            .map_err(|e| RagError::Checkpoint(e.to_string()))?;

        outcome
    }

    async fn drive(
        &self,
        history: &mut Vec<Message>,
        tx: &mpsc::Sender<GraphEvent>,
        cancel: &CancellationToken,
    ) -> RagResult<()> {
        let mut state = GraphState::QueryOrRespond;

        while state != GraphState::Done {
            if cancel.is_cancelled() || tx.is_closed() {
                debug!("Run cancelled before {:?}", state);
                return Ok(());
            }
            debug!("Entering {:?}", state);

            state = match state {
                GraphState::QueryOrRespond => self.query_or_respond(history, tx, cancel).await?,
                GraphState::Tools => self.run_tools(history).await?,
                GraphState::Generate => self.generate(history, tx, cancel).await?,
                GraphState::Done => GraphState::Done,
            };
        }

        Ok(())
    }

    async fn query_or_respond(
        &self,
        history: &mut Vec<Message>,
        tx: &mpsc::Sender<GraphEvent>,
        cancel: &CancellationToken,
    ) -> RagResult<GraphState> {
        let tools = [self.retriever.spec()];
        let response = tokio::select! {
            _ = cancel.cancelled() => return Ok(GraphState::Done),
            response = self.model.invoke(history.as_slice(), &tools) => response?,
        };

        let next = if response.has_tool_calls() {
            GraphState::Tools
        } else {
            GraphState::Done
        };

        if !response.content.trim().is_empty() {
            let _ = tx.send(GraphEvent::Answer(response.content.clone())).await;
        }
        history.push(response);

        Ok(next)
    }

    async fn run_tools(&self, history: &mut Vec<Message>) -> RagResult<GraphState> {
        let calls: Vec<ToolCall> = history
            .last()
            .map(|m| m.tool_calls.clone())
            .unwrap_or_default();

        for call in calls {
            let content = self.execute_tool(&call).await?;
            history.push(Message::tool(content, call.id, call.name));
        }

        Ok(GraphState::Generate)
    }

    async fn execute_tool(&self, call: &ToolCall) -> RagResult<String> {
        if call.name != RETRIEVE_TOOL_NAME {
            warn!("Model requested unknown tool {:?}", call.name);
            return Ok(format!("Error: unknown tool '{}'", call.name));
        }

        match call.args.get("query").and_then(|q| q.as_str()) {
            Some(query) => Ok(self.retriever.retrieve(query).await?.content),
            None => {
                warn!("Tool call {} has no query argument", call.id);
                Ok("Error: missing required argument 'query'".to_string())
            }
        }
    }

    async fn generate(
        &self,
        history: &mut Vec<Message>,
        tx: &mpsc::Sender<GraphEvent>,
        cancel: &CancellationToken,
    ) -> RagResult<GraphState> {
        let docs_content = trailing_tool_messages(history)
            .into_iter()
            .map(|m| m.content)
            .collect::<Vec<_>>()
            .join("\n\n");

        // Read per run; edits apply to the next turn
        let template = tokio::fs::read_to_string(&self.prompt_file)
            .await
            .map_err(|source| RagError::PromptFile {
                path: self.prompt_file.display().to_string(),
                source,
            })?;

        let mut prompt = vec![Message::system(format!("{}\n\n{}", template, docs_content))];
        prompt.extend(conversation_messages(history));

        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return Ok(GraphState::Done),
            stream = self.model.stream(&prompt) => stream?,
        };

        let mut answer = String::new();
        loop {
            let delta = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Generation cancelled after {} chars", answer.len());
                    return Ok(GraphState::Done);
                }
                delta = stream.next() => delta,
            };

            match delta {
                Some(Ok(text)) => {
                    if text.is_empty() {
                        continue;
                    }
                    answer.push_str(&text);
                    if tx.send(GraphEvent::Answer(answer.clone())).await.is_err() {
                        debug!("Answer receiver dropped");
                        return Ok(GraphState::Done);
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None => break,
            }
        }

        history.push(Message::ai(answer));
        Ok(GraphState::Done)
    }
}
