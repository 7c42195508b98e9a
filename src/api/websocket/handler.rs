// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Chat connection loop
//!
//! A connection is authenticated once, right after the upgrade. Each text
//! frame is then one chat turn: the graph runs in its own task and feeds
//! cumulative answers through a bounded channel, and every answer that
//! differs from the last one sent goes out as a `chat_response` frame.

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use std::borrow::Cow;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::auth::AuthError;
use super::messages::ServerFrame;
use super::session::generate_session_id;
use crate::api::errors::ApiError;
use crate::api::http_server::AppState;
use crate::llm::Message;
use crate::rag::GraphEvent;

pub const AUTHENTICATED_MESSAGE: &str = "Authenticated successfully";

const ANSWER_CHANNEL_CAPACITY: usize = 32;

enum TurnOutcome {
    Completed,
    ClientGone,
}

pub async fn handle_chat(mut socket: WebSocket, state: AppState, token: Option<String>) {
    let claims = match authenticate(&state, token).await {
        Ok(claims) => claims,
        Err(err) => {
            warn!("Rejected chat connection: {}", err);
            close_with_error(&mut socket, &err).await;
            return;
        }
    };

    if send_frame(&mut socket, ServerFrame::info(AUTHENTICATED_MESSAGE))
        .await
        .is_err()
    {
        return;
    }

    let session_id = generate_session_id();
    info!("Chat session {} started for user {}", session_id, claims.sub);

    match chat_loop(&mut socket, &state, &session_id).await {
        Ok(()) => debug!("Chat session {} ended by client", session_id),
        Err(ApiError::Timeout) => {
            info!("Chat session {} idle, closing", session_id);
            close_with_error(&mut socket, &ApiError::Timeout).await;
        }
        Err(err) => {
            error!("Chat session {} failed: {}", session_id, err);
            close_with_error(&mut socket, &err).await;
        }
    }

    if let Err(e) = state.graph.end_session(&session_id).await {
        warn!("Failed to release session {}: {}", session_id, e);
    }
}

async fn authenticate(
    state: &AppState,
    token: Option<String>,
) -> Result<super::auth::IdentityClaims, ApiError> {
    let token = token
        .filter(|t| !t.trim().is_empty())
        .ok_or(AuthError::MissingToken)?;
    Ok(state.verifier.verify(&token).await?)
}

async fn chat_loop(
    socket: &mut WebSocket,
    state: &AppState,
    session_id: &str,
) -> Result<(), ApiError> {
    let mut first_turn = true;
    // Messages that arrived while a turn was running
    let mut pending = VecDeque::new();

    loop {
        let text = match pending.pop_front() {
            Some(text) => text,
            None => match tokio::time::timeout(state.idle_timeout, next_text(socket)).await {
                Err(_) => return Err(ApiError::Timeout),
                Ok(None) => return Ok(()),
                Ok(Some(text)) => text,
            },
        };

        let mut new_messages = Vec::with_capacity(2);
        if first_turn {
            new_messages.push(Message::system(state.system_prompt.as_str()));
            first_turn = false;
        }
        new_messages.push(Message::human(text));

        match run_turn(socket, state, session_id, new_messages, &mut pending).await? {
            TurnOutcome::Completed => {}
            TurnOutcome::ClientGone => return Ok(()),
        }
    }
}

/// Next text frame; `None` once the client closed or the stream ended
async fn next_text(socket: &mut WebSocket) -> Option<String> {
    loop {
        match incoming(socket.recv().await) {
            Incoming::Text(text) => return Some(text),
            Incoming::Ignored => continue,
            Incoming::Closed => return None,
        }
    }
}

enum Incoming {
    Text(String),
    Ignored,
    Closed,
}

fn incoming(msg: Option<Result<WsMessage, axum::Error>>) -> Incoming {
    match msg {
        Some(Ok(WsMessage::Text(text))) => Incoming::Text(text),
        Some(Ok(WsMessage::Close(_))) | None => Incoming::Closed,
        // Pings are answered by axum; binary frames carry nothing for us
        Some(Ok(_)) => Incoming::Ignored,
        Some(Err(e)) => {
            debug!("Websocket receive error: {}", e);
            Incoming::Closed
        }
    }
}

async fn run_turn(
    socket: &mut WebSocket,
    state: &AppState,
    session_id: &str,
    new_messages: Vec<Message>,
    pending: &mut VecDeque<String>,
) -> Result<TurnOutcome, ApiError> {
    let (tx, mut rx) = mpsc::channel(ANSWER_CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();
    // Stops the producer if this task returns or is dropped mid-turn
    let _guard = cancel.clone().drop_guard();

    let graph = state.graph.clone();
    let producer_session = session_id.to_string();
    let producer_cancel = cancel.clone();
    let producer = tokio::spawn(async move {
        graph
            .run(&producer_session, new_messages, tx, producer_cancel)
            .await
    });

    let mut prev = String::new();
    let mut outcome = TurnOutcome::Completed;
    loop {
        // A close from the client cancels the turn at any state
        tokio::select! {
            event = rx.recv() => {
                let answer = match event {
                    Some(GraphEvent::Answer(answer)) => answer,
                    None => break,
                };
                if answer.is_empty() || answer == prev {
                    continue;
                }
                if send_frame(socket, ServerFrame::chat_response(answer.as_str()))
                    .await
                    .is_err()
                {
                    cancel.cancel();
                    outcome = TurnOutcome::ClientGone;
                    break;
                }
                prev = answer;
            }
            msg = socket.recv() => match incoming(msg) {
                Incoming::Text(text) => pending.push_back(text),
                Incoming::Ignored => {}
                Incoming::Closed => {
                    debug!("Client left session {} mid-turn", session_id);
                    cancel.cancel();
                    outcome = TurnOutcome::ClientGone;
                    break;
                }
            },
        }
    }
    drop(rx);

    let result = producer
        .await
        .map_err(|e| ApiError::InternalError(format!("generation task failed: {}", e)))?;
    match &outcome {
        TurnOutcome::Completed => result?,
        TurnOutcome::ClientGone => {
            if let Err(e) = result {
                debug!("Turn of departed session {} ended with: {}", session_id, e);
            }
        }
    }

    Ok(outcome)
}

async fn send_frame(socket: &mut WebSocket, frame: ServerFrame) -> Result<(), axum::Error> {
    socket.send(WsMessage::Text(frame.to_json())).await
}

async fn close_with_error(socket: &mut WebSocket, err: &ApiError) {
    if send_frame(socket, ServerFrame::error(err.frame_content()))
        .await
        .is_err()
    {
        return;
    }

    let reason = match err {
        ApiError::Unauthorized(_) => "Invalid token",
        ApiError::Timeout => "Idle timeout",
        _ => "Internal error",
    };
    let _ = socket
        .send(WsMessage::Close(Some(CloseFrame {
            code: err.close_code(),
            reason: Cow::Borrowed(reason),
        })))
        .await;
}
