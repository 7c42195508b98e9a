// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use crate::common::{embedder, retrieve_call, seeded_store, write_prompt, ScriptedModel, HANDBOOK};
use rag_chat_node::llm::{Message, Role, ToolCall};
use rag_chat_node::rag::{
    GraphEvent, MemoryCheckpointStore, RagError, RagGraph, RetrieveTool,
};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const PROMPT: &str = "Answer using only the context below.";

async fn graph(dir: &Path, model: Arc<ScriptedModel>) -> RagGraph {
    let store = seeded_store(&dir.join("store"), HANDBOOK).await;
    RagGraph::new(
        model,
        RetrieveTool::new(embedder(), store),
        Arc::new(MemoryCheckpointStore::new()),
        write_prompt(dir, PROMPT),
    )
}

async fn run_turn(graph: &RagGraph, session: &str, messages: Vec<Message>) -> (Result<(), RagError>, Vec<String>) {
    let (tx, mut rx) = mpsc::channel(64);
    let result = graph.run(session, messages, tx, CancellationToken::new()).await;

    let mut answers = Vec::new();
    while let Ok(GraphEvent::Answer(answer)) = rx.try_recv() {
        answers.push(answer);
    }
    (result, answers)
}

#[tokio::test]
async fn test_direct_answer_skips_retrieval() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::scripted(vec![Message::ai("Hello! Ask me about Rust.")], &[]));
    let graph = graph(dir.path(), model.clone()).await;

    let (result, answers) = run_turn(
        &graph,
        "s1",
        vec![Message::system("You are a tutor."), Message::human("hi")],
    )
    .await;

    result.unwrap();
    assert_eq!(answers, vec!["Hello! Ask me about Rust.".to_string()]);
    assert!(model.stream_prompts.lock().unwrap().is_empty());

    let history = graph.history("s1").await.unwrap();
    let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::Human, Role::Ai]);
}

#[tokio::test]
async fn test_retrieval_then_streamed_answer() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::retrieving(&["References ", "cannot ", "dangle."]));
    let graph = graph(dir.path(), model.clone()).await;

    let (result, answers) = run_turn(
        &graph,
        "s2",
        vec![
            Message::system("You are a tutor."),
            Message::human("What does the borrow checker enforce?"),
        ],
    )
    .await;

    result.unwrap();
    assert_eq!(
        answers,
        vec![
            "References ".to_string(),
            "References cannot ".to_string(),
            "References cannot dangle.".to_string(),
        ]
    );

    let prompts = model.stream_prompts.lock().unwrap();
    let prompt = &prompts[0];
    assert_eq!(prompt[0].role, Role::System);
    assert!(prompt[0].content.starts_with(&format!("{}\n\n", PROMPT)));
    assert!(prompt[0].content.contains("Content: The borrow checker"));
    // Tool traffic is folded into the system message, not replayed
    assert!(prompt.iter().all(|m| m.role != Role::Tool && !m.has_tool_calls()));
    assert_eq!(prompt.last().unwrap().content, "What does the borrow checker enforce?");

    let history = graph.history("s2").await.unwrap();
    let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::System, Role::Human, Role::Ai, Role::Tool, Role::Ai]
    );
    assert_eq!(history.last().unwrap().content, "References cannot dangle.");
}

#[tokio::test]
async fn test_only_latest_tool_results_used() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::retrieving(&["answer"]));
    let graph = graph(dir.path(), model.clone()).await;

    run_turn(&graph, "s3", vec![Message::system("sys"), Message::human("borrow checker")])
        .await
        .0
        .unwrap();
    run_turn(&graph, "s3", vec![Message::human("Cargo package manager")])
        .await
        .0
        .unwrap();

    let prompts = model.stream_prompts.lock().unwrap();
    let second_system = &prompts[1][0].content;
    assert!(second_system.contains("Cargo is the Rust package manager"));
    // Only the second turn's retrieval (k = 2 blocks) reaches the prompt
    assert_eq!(second_system.matches("Source: ").count(), 2);

    // The system message is only ever the one sent on the first turn
    let invocations = model.invocations.lock().unwrap();
    let second_turn = &invocations[1];
    assert_eq!(second_turn.iter().filter(|m| m.role == Role::System).count(), 1);
    assert_eq!(second_turn.last().unwrap().content, "Cargo package manager");
}

#[tokio::test]
async fn test_parallel_tool_calls_keep_order() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::scripted(
        vec![Message::ai_with_tool_calls(
            "",
            vec![
                retrieve_call("call_a", "Cargo build tool"),
                retrieve_call("call_b", "traits shared behavior"),
            ],
        )],
        &["done"],
    ));
    let graph = graph(dir.path(), model.clone()).await;

    run_turn(&graph, "s4", vec![Message::human("tools and traits?")])
        .await
        .0
        .unwrap();

    let history = graph.history("s4").await.unwrap();
    let tool_ids: Vec<_> = history
        .iter()
        .filter(|m| m.is_tool())
        .map(|m| m.tool_call_id.clone().unwrap())
        .collect();
    assert_eq!(tool_ids, vec!["call_a".to_string(), "call_b".to_string()]);

    let system = &model.stream_prompts.lock().unwrap()[0][0].content;
    let cargo = system.find("Cargo is the Rust").unwrap();
    let traits = system.find("Traits define").unwrap();
    assert!(cargo < traits);
}

#[tokio::test]
async fn test_unknown_tool_reported_to_model() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::scripted(
        vec![Message::ai_with_tool_calls(
            "",
            vec![ToolCall {
                id: "call_x".to_string(),
                name: "web_search".to_string(),
                args: json!({"q": "rust"}),
            }],
        )],
        &["I could not search."],
    ));
    let graph = graph(dir.path(), model.clone()).await;

    let (result, answers) = run_turn(&graph, "s5", vec![Message::human("search the web")]).await;
    result.unwrap();
    assert_eq!(answers.last().unwrap(), "I could not search.");

    let history = graph.history("s5").await.unwrap();
    let tool = history.iter().find(|m| m.is_tool()).unwrap();
    assert_eq!(tool.content, "Error: unknown tool 'web_search'");
}

#[tokio::test]
async fn test_missing_prompt_file_fails_turn() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::retrieving(&["never"]));
    let store = seeded_store(&dir.path().join("store"), HANDBOOK).await;
    let graph = RagGraph::new(
        model,
        RetrieveTool::new(embedder(), store),
        Arc::new(MemoryCheckpointStore::new()),
        dir.path().join("missing_prompt.txt"),
    );

    let (result, answers) = run_turn(&graph, "s6", vec![Message::human("borrow checker")]).await;

    assert!(matches!(result, Err(RagError::PromptFile { .. })));
    assert!(answers.is_empty());
}

#[tokio::test]
async fn test_stream_failure_propagates() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::retrieving(&[]).failing_stream());
    let graph = graph(dir.path(), model).await;

    let (result, _) = run_turn(&graph, "s7", vec![Message::human("borrow checker")]).await;
    assert!(matches!(result, Err(RagError::Llm(_))));
}

#[tokio::test]
async fn test_cancelled_run_emits_nothing() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::retrieving(&["never sent"]));
    let graph = graph(dir.path(), model.clone()).await;

    let (tx, mut rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    cancel.cancel();

    graph
        .run("s8", vec![Message::human("borrow checker")], tx, cancel)
        .await
        .unwrap();

    assert!(rx.recv().await.is_none());
    assert_eq!(model.invocation_count(), 0);
    // The human message is still recorded
    assert_eq!(graph.history("s8").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_dropped_receiver_stops_run() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::retrieving(&["a", "b"]));
    let graph = graph(dir.path(), model.clone()).await;

    let (tx, rx) = mpsc::channel(8);
    drop(rx);

    graph
        .run("s9", vec![Message::human("borrow checker")], tx, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(model.invocation_count(), 0);
}

#[tokio::test]
async fn test_cancel_mid_stream_stops_answers() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(
        ScriptedModel::retrieving(&["Cargo ", "builds ", "crates."])
            .with_delta_delay(Duration::from_millis(150)),
    );
    let graph = Arc::new(graph(dir.path(), model).await);

    let (tx, mut rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let run = {
        let graph = graph.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            graph
                .run("s10", vec![Message::human("Cargo build tool")], tx, cancel)
                .await
        })
    };

    assert_eq!(rx.recv().await, Some(GraphEvent::Answer("Cargo ".to_string())));
    cancel.cancel();

    // Nothing follows the first delta; the channel closes when the run returns
    assert_eq!(rx.recv().await, None);
    run.await.unwrap().unwrap();

    let history = graph.history("s10").await.unwrap();
    let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::Human, Role::Ai, Role::Tool]);
    assert!(history.iter().all(|m| m.content != "Cargo "));
}
