// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Version information for the RAG chat node

/// Semantic version number
pub const VERSION_NUMBER: &str = env!("CARGO_PKG_VERSION");

/// Capabilities of this build
pub const FEATURES: &[&str] = &[
    "pdf-ingestion",
    "local-vector-store",
    "atlas-vector-search",
    "firebase-auth",
    "streaming-answers",
];

/// Get formatted version string for logging
pub fn get_version_string() -> String {
    format!("RAG Chat Node {}", VERSION_NUMBER)
}
