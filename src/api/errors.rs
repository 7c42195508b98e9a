// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::websocket::auth::AuthError;
use crate::rag::RagError;

pub const TIMEOUT_MESSAGE: &str = "Timeout: No message received, connection closing. Refresh page.";
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error. Connection closed.";

/// Websocket close codes (RFC 6455 section 7.4.1)
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const POLICY: u16 = 1008;
    pub const ERROR: u16 = 1011;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    pub error_type: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApiError {
    NotFound(String),
    Unauthorized(String),
    Timeout,
    InternalError(String),
}

impl ApiError {
    pub fn to_response(&self, request_id: Option<String>) -> ErrorResponse {
        let (error_type, message) = match self {
            ApiError::NotFound(msg) => ("not_found", msg.clone()),
            ApiError::Unauthorized(msg) => ("unauthorized", msg.clone()),
            ApiError::Timeout => ("timeout", "Request timed out".to_string()),
            // Internal details stay in the logs
            ApiError::InternalError(_) => ("internal_error", "Internal server error".to_string()),
        };

        ErrorResponse {
            error_type: error_type.to_string(),
            message,
            request_id,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::NotFound(_) => 404,
            ApiError::Unauthorized(_) => 401,
            ApiError::Timeout => 408,
            ApiError::InternalError(_) => 500,
        }
    }

    /// Text of the error frame sent to a chat client before closing
    pub fn frame_content(&self) -> String {
        match self {
            ApiError::Unauthorized(reason) => format!("Invalid token: {}", reason),
            ApiError::Timeout => TIMEOUT_MESSAGE.to_string(),
            ApiError::NotFound(_) | ApiError::InternalError(_) => {
                INTERNAL_ERROR_MESSAGE.to_string()
            }
        }
    }

    /// Code of the close frame that ends a chat connection
    pub fn close_code(&self) -> u16 {
        match self {
            ApiError::Unauthorized(_) => close_code::POLICY,
            ApiError::Timeout => close_code::NORMAL,
            ApiError::NotFound(_) | ApiError::InternalError(_) => close_code::ERROR,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Timeout => write!(f, "Request timed out"),
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Unauthorized(err.to_string())
    }
}

impl From<RagError> for ApiError {
    fn from(err: RagError) -> Self {
        ApiError::InternalError(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_response(None))).into_response()
    }
}
