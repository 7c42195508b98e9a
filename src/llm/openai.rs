// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! OpenAI-compatible `/chat/completions` client with tool calling and streaming

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use tracing::debug;

use super::sse::SseDecoder;
use super::{ChatModel, LlmError, LlmResult, Message, Role, TokenStream, ToolCall, ToolSpec};
use crate::config::OpenAiConfig;

// --- OpenAI-compatible serde structs ---

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct WireMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct WireFunction {
    name: String,
    /// JSON-encoded arguments object
    arguments: String,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireToolFunction<'a>,
}

#[derive(Serialize)]
struct WireToolFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct ChunkResponse {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    content: Option<String>,
}

fn function_type() -> String {
    "function".to_string()
}

fn to_wire(message: &Message) -> WireMessage {
    match message.role {
        Role::System => WireMessage {
            role: "system".to_string(),
            content: Some(message.content.clone()),
            tool_calls: None,
            tool_call_id: None,
        },
        Role::Human => WireMessage {
            role: "user".to_string(),
            content: Some(message.content.clone()),
            tool_calls: None,
            tool_call_id: None,
        },
        Role::Ai => {
            let tool_calls = (!message.tool_calls.is_empty()).then(|| {
                message
                    .tool_calls
                    .iter()
                    .map(|call| WireToolCall {
                        id: call.id.clone(),
                        kind: function_type(),
                        function: WireFunction {
                            name: call.name.clone(),
                            arguments: call.args.to_string(),
                        },
                    })
                    .collect()
            });
            let content = if message.content.is_empty() && tool_calls.is_some() {
                None
            } else {
                Some(message.content.clone())
            };
            WireMessage {
                role: "assistant".to_string(),
                content,
                tool_calls,
                tool_call_id: None,
            }
        }
        Role::Tool => WireMessage {
            role: "tool".to_string(),
            content: Some(message.content.clone()),
            tool_calls: None,
            tool_call_id: message.tool_call_id.clone(),
        },
    }
}

fn from_wire(message: WireMessage) -> LlmResult<Message> {
    let content = message.content.unwrap_or_default();
    let mut tool_calls = Vec::new();
    for call in message.tool_calls.unwrap_or_default() {
        let args: Value = if call.function.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(&call.function.arguments).map_err(|e| {
                LlmError::Decode(format!(
                    "arguments of tool call {} are not JSON: {}",
                    call.id, e
                ))
            })?
        };
        tool_calls.push(ToolCall {
            id: call.id,
            name: call.function.name,
            args,
        });
    }
    Ok(Message::ai_with_tool_calls(content, tool_calls))
}

/// Text delta carried by one streamed chunk; `None` once the stream is done
fn parse_chunk(payload: &str) -> LlmResult<Option<String>> {
    if payload.trim() == "[DONE]" {
        return Ok(None);
    }
    if let Ok(error) = serde_json::from_str::<ApiErrorEnvelope>(payload) {
        return Err(LlmError::Api {
            status: 0,
            message: error.error.message,
        });
    }
    let chunk: ChunkResponse = serde_json::from_str(payload)
        .map_err(|e| LlmError::Decode(format!("stream chunk: {}", e)))?;
    Ok(Some(
        chunk
            .choices
            .into_iter()
            .filter_map(|c| c.delta.content)
            .collect::<String>(),
    ))
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}

type ByteStream = std::pin::Pin<Box<dyn futures::Stream<Item = reqwest::Result<Vec<u8>>> + Send>>;

struct DeltaState {
    bytes: ByteStream,
    decoder: SseDecoder,
    pending: VecDeque<LlmResult<String>>,
    finished: bool,
}

impl DeltaState {
    fn absorb(&mut self, payloads: Vec<String>) {
        for payload in payloads {
            match parse_chunk(&payload) {
                Ok(Some(delta)) if !delta.is_empty() => self.pending.push_back(Ok(delta)),
                Ok(Some(_)) => {}
                Ok(None) => self.finished = true,
                Err(e) => {
                    self.pending.push_back(Err(e));
                    self.finished = true;
                }
            }
            if self.finished {
                break;
            }
        }
    }
}

/// Client for an OpenAI-compatible chat completions API
pub struct OpenAiChatModel {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiChatModel {
    pub fn new(config: &OpenAiConfig) -> LlmResult<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url),
            api_key: config.api_key.clone(),
            model: config.chat_model.clone(),
        })
    }

    async fn send(&self, request: &ChatRequest<'_>) -> LlmResult<reqwest::Response> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn invoke(&self, messages: &[Message], tools: &[ToolSpec]) -> LlmResult<Message> {
        let request = ChatRequest {
            model: &self.model,
            messages: messages.iter().map(to_wire).collect(),
            tools: tools
                .iter()
                .map(|tool| WireTool {
                    kind: "function",
                    function: WireToolFunction {
                        name: &tool.name,
                        description: &tool.description,
                        parameters: &tool.parameters,
                    },
                })
                .collect(),
            stream: false,
        };

        let response: ChatResponse = self
            .send(&request)
            .await?
            .json()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse)?;
        let message = from_wire(choice.message)?;
        debug!(
            "Model {} answered with {} tool calls",
            self.model,
            message.tool_calls.len()
        );
        Ok(message)
    }

    async fn stream(&self, messages: &[Message]) -> LlmResult<TokenStream> {
        let request = ChatRequest {
            model: &self.model,
            messages: messages.iter().map(to_wire).collect(),
            tools: Vec::new(),
            stream: true,
        };

        let response = self.send(&request).await?;
        let bytes: ByteStream = Box::pin(response.bytes_stream().map(|r| r.map(|b| b.to_vec())));

        let state = DeltaState {
            bytes,
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            finished: false,
        };

        let deltas = futures::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(item) = state.pending.pop_front() {
                    return Some((item, state));
                }
                if state.finished {
                    return None;
                }
                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        let payloads = state.decoder.push(&chunk);
                        state.absorb(payloads);
                    }
                    Some(Err(e)) => {
                        state.finished = true;
                        return Some((Err(LlmError::Request(e)), state));
                    }
                    None => {
                        let payloads = state.decoder.finish();
                        state.absorb(payloads);
                        state.finished = true;
                    }
                }
            }
        });

        Ok(Box::pin(deltas))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
