// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// RAG (Retrieval-Augmented Generation) module
// Retrieval tool, per-session history and the answer state machine

pub mod checkpoint;
pub mod errors;
pub mod graph;
pub mod tools;

pub use checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use errors::{RagError, RagResult};
pub use graph::{GraphEvent, GraphState, RagGraph};
pub use tools::{RetrieveTool, ToolOutput};
