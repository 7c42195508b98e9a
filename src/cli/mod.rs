// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! PDF loader command line

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::{OpenAiConfig, VectorStoreConfig};
use crate::embeddings::OpenAiEmbeddings;
use crate::ingest::splitter::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::ingest::{
    DocumentLoader, IngestError, IngestProgress, IngestReport, TextSplitter, DEFAULT_BATCH_SIZE,
};
use crate::vector::open_vector_store;

/// Load a PDF into the vector store used by the chat server
#[derive(Parser, Debug)]
#[command(name = "loader")]
#[command(version = crate::version::VERSION_NUMBER)]
#[command(about = "Ingest a PDF document into the vector store", long_about = None)]
pub struct Cli {
    /// PDF file to ingest
    pub pdf_path: PathBuf,

    /// Chunks per embedding request
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE, env = "EMBEDDING_BATCH_SIZE")]
    pub batch_size: usize,

    /// Maximum chunk length in characters
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Characters shared by consecutive chunks
    #[arg(long, default_value_t = DEFAULT_CHUNK_OVERLAP)]
    pub chunk_overlap: usize,
}

impl Cli {
    pub fn splitter(&self) -> Result<TextSplitter, IngestError> {
        TextSplitter::new(self.chunk_size, self.chunk_overlap)
    }
}

fn describe(progress: &IngestProgress) -> String {
    match progress {
        IngestProgress::PagesExtracted { pages } => format!("Extracted {} pages", pages),
        IngestProgress::Split { chunks } => format!("Split into {} chunks", chunks),
        IngestProgress::BatchEmbedded { embedded, total } => {
            format!("Embedded {}/{} chunks", embedded, total)
        }
        IngestProgress::Committing => "Writing to vector store".to_string(),
        IngestProgress::Complete { chunks, duration_ms } => {
            format!("Stored {} chunks in {} ms", chunks, duration_ms)
        }
    }
}

/// Execute CLI command
pub async fn execute(cli: Cli) -> Result<IngestReport> {
    if !cli.pdf_path.is_file() {
        anyhow::bail!("PDF file not found: {}", cli.pdf_path.display());
    }
    let splitter = cli.splitter()?;

    let openai = OpenAiConfig::from_env()?;
    let store_config = VectorStoreConfig::from_env()?;

    let embedder = Arc::new(OpenAiEmbeddings::new(&openai)?);
    let store = open_vector_store(&store_config)
        .await
        .context("failed to open vector store")?;

    println!("Loading data from {}", cli.pdf_path.display());
    println!(
        "  Chunk size {} chars, overlap {}",
        splitter.chunk_size(),
        splitter.chunk_overlap()
    );

    let (progress_tx, mut progress_rx) = mpsc::channel(16);
    let printer = tokio::spawn(async move {
        while let Some(progress) = progress_rx.recv().await {
            println!("  {}", describe(&progress));
        }
    });

    let loader = DocumentLoader::new(embedder, store)
        .with_batch_size(cli.batch_size)
        .with_splitter(splitter);
    let result = loader.load_pdf(&cli.pdf_path, Some(progress_tx)).await;
    let _ = printer.await;

    let report = result?;
    println!(
        "Finished loading {}: {} chunks from {} pages into the {} store",
        cli.pdf_path.display(),
        report.chunks,
        report.pages,
        store_config.backend_name()
    );
    Ok(report)
}
