// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use serde::{Deserialize, Serialize};

/// Kind of a server-to-client chat frame
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Info,
    ChatResponse,
    Error,
}

/// JSON frame sent to chat clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerFrame {
    pub message_type: MessageType,
    pub content: String,
}

impl ServerFrame {
    pub fn info(content: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::Info,
            content: content.into(),
        }
    }

    pub fn chat_response(content: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::ChatResponse,
            content: content.into(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::Error,
            content: content.into(),
        }
    }

    pub fn to_json(&self) -> String {
        // Two string fields; serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}
