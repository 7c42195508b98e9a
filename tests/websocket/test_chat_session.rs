// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use super::support::{next_frame, TestServer, SYSTEM_PROMPT};
use crate::common::{retrieve_call, ScriptedModel, VALID_TOKEN};
use futures_util::SinkExt;
use rag_chat_node::api::websocket::{MessageType, ServerFrame};
use rag_chat_node::llm::{Message, Role};
use rag_chat_node::rag::CheckpointStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message as WsMessage;

#[tokio::test]
async fn test_authenticated_chat_streams_cumulative_answers() {
    let model = Arc::new(ScriptedModel::retrieving(&["References ", "cannot ", "dangle."]));
    let server = TestServer::start(model.clone(), Duration::from_secs(30)).await;
    let mut client = server.connect(Some(VALID_TOKEN)).await;

    assert_eq!(
        next_frame(&mut client).await,
        ServerFrame::info("Authenticated successfully")
    );

    client
        .send(WsMessage::Text("What does the borrow checker enforce?".to_string()))
        .await
        .unwrap();

    let mut answers = Vec::new();
    for _ in 0..3 {
        let frame = next_frame(&mut client).await;
        assert_eq!(frame.message_type, MessageType::ChatResponse);
        answers.push(frame.content);
    }
    assert_eq!(
        answers,
        vec!["References ", "References cannot ", "References cannot dangle."]
    );

    let first_turn = &model.invocations.lock().unwrap()[0];
    assert_eq!(first_turn[0], Message::system(SYSTEM_PROMPT));
    assert_eq!(first_turn[1], Message::human("What does the borrow checker enforce?"));
}

#[tokio::test]
async fn test_system_prompt_sent_once_per_session() {
    let model = Arc::new(ScriptedModel::retrieving(&["Answer."]));
    let server = TestServer::start(model.clone(), Duration::from_secs(30)).await;
    let mut client = server.connect(Some(VALID_TOKEN)).await;
    next_frame(&mut client).await;

    for question in ["What is Cargo?", "And traits?"] {
        client.send(WsMessage::Text(question.to_string())).await.unwrap();
        assert_eq!(next_frame(&mut client).await.content, "Answer.");
    }

    let invocations = model.invocations.lock().unwrap();
    assert_eq!(invocations.len(), 2);
    let systems = invocations[1].iter().filter(|m| m.role == Role::System).count();
    assert_eq!(systems, 1);
    assert_eq!(invocations[1].last().unwrap().content, "And traits?");
}

#[tokio::test]
async fn test_each_connection_gets_fresh_session() {
    let model = Arc::new(ScriptedModel::retrieving(&["Answer."]));
    let server = TestServer::start(model.clone(), Duration::from_secs(30)).await;

    for _ in 0..2 {
        let mut client = server.connect(Some(VALID_TOKEN)).await;
        next_frame(&mut client).await;
        client.send(WsMessage::Text("What is Cargo?".to_string())).await.unwrap();
        next_frame(&mut client).await;
        client.close(None).await.unwrap();
    }

    // Second connection started from an empty history
    let invocations = model.invocations.lock().unwrap();
    assert_eq!(invocations[1].len(), 2);
    assert_eq!(invocations[1][0].role, Role::System);
}

#[tokio::test]
async fn test_direct_answer_and_preamble_reach_client() {
    let model = Arc::new(ScriptedModel::scripted(
        vec![
            Message::ai("Hello! What would you like to learn?"),
            Message::ai_with_tool_calls("Let me look that up.", vec![retrieve_call("c1", "Cargo")]),
        ],
        &["Cargo ", "is the build tool."],
    ));
    let server = TestServer::start(model, Duration::from_secs(30)).await;
    let mut client = server.connect(Some(VALID_TOKEN)).await;
    next_frame(&mut client).await;

    client.send(WsMessage::Text("hi".to_string())).await.unwrap();
    assert_eq!(
        next_frame(&mut client).await,
        ServerFrame::chat_response("Hello! What would you like to learn?")
    );

    client.send(WsMessage::Text("What is Cargo?".to_string())).await.unwrap();
    let contents: Vec<String> = [
        next_frame(&mut client).await,
        next_frame(&mut client).await,
        next_frame(&mut client).await,
    ]
    .into_iter()
    .map(|f| f.content)
    .collect();
    assert_eq!(
        contents,
        vec!["Let me look that up.", "Cargo ", "Cargo is the build tool."]
    );
}

#[tokio::test]
async fn test_repeated_answers_not_resent() {
    // Empty deltas leave the cumulative answer unchanged
    let model = Arc::new(ScriptedModel::retrieving(&["Same", "", "", " text"]));
    let server = TestServer::start(model, Duration::from_secs(30)).await;
    let mut client = server.connect(Some(VALID_TOKEN)).await;
    next_frame(&mut client).await;

    client.send(WsMessage::Text("borrow checker".to_string())).await.unwrap();
    assert_eq!(next_frame(&mut client).await.content, "Same");
    assert_eq!(next_frame(&mut client).await.content, "Same text");
}

#[tokio::test]
async fn test_closed_sessions_are_released() {
    let model = Arc::new(ScriptedModel::retrieving(&["Done."]));
    let server = TestServer::start(model, Duration::from_secs(30)).await;

    for _ in 0..5 {
        let mut client = server.connect(Some(VALID_TOKEN)).await;
        next_frame(&mut client).await;
        client.send(WsMessage::Text("What is Cargo?".to_string())).await.unwrap();
        assert_eq!(next_frame(&mut client).await.content, "Done.");
        client.close(None).await.unwrap();
    }

    server.wait_for_released(5, Duration::from_secs(2)).await;
    assert!(server.checkpoints.list_sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_disconnect_during_retrieval_cancels_turn() {
    let model = Arc::new(
        ScriptedModel::retrieving(&["never sent"]).with_invoke_delay(Duration::from_secs(5)),
    );
    let server = TestServer::start(model.clone(), Duration::from_secs(30)).await;
    let mut client = server.connect(Some(VALID_TOKEN)).await;
    next_frame(&mut client).await;

    client.send(WsMessage::Text("What is Cargo?".to_string())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    client.close(None).await.unwrap();

    // Released well before the model call would have returned
    server.wait_for_released(1, Duration::from_secs(1)).await;
    assert!(server.checkpoints.list_sessions().await.unwrap().is_empty());
    assert!(model.stream_prompts.lock().unwrap().is_empty());
}
