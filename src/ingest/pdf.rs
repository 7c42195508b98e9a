// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Page-level text extraction from PDF files

use flate2::read::ZlibDecoder;
use lopdf::{Document as PdfDocument, Object, ObjectId};
use std::io::Read;
use std::path::Path;
use tracing::debug;

use super::IngestError;

/// Extracted text of one PDF page
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Path the page was read from, as given by the caller
    pub source: String,
    /// 0-based page index
    pub number: u32,
    pub text: String,
}

/// Read every page of the PDF at `path`; pages without text are skipped.
///
/// A page whose content cannot be decoded fails the whole extraction.
pub async fn extract_pages(path: &Path) -> Result<Vec<Page>, IngestError> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || extract_pages_blocking(&owned))
        .await
        .map_err(|e| IngestError::Task(e.to_string()))?
}

fn extract_pages_blocking(path: &Path) -> Result<Vec<Page>, IngestError> {
    let source = path.display().to_string();
    let document = PdfDocument::load(path).map_err(|e| IngestError::Pdf {
        path: source.clone(),
        reason: e.to_string(),
    })?;
    pages_from_document(&document, &source)
}

pub(crate) fn pages_from_document(
    document: &PdfDocument,
    source: &str,
) -> Result<Vec<Page>, IngestError> {
    if document.is_encrypted() {
        return Err(IngestError::Encrypted(source.to_string()));
    }

    let mut pages = Vec::new();
    // get_pages is keyed by 1-based page number in document order
    for (page_number, page_id) in document.get_pages() {
        let number = page_number.saturating_sub(1);
        let page_error = |reason: String| IngestError::Pdf {
            path: source.to_string(),
            reason: format!("page {}: {}", number, reason),
        };

        check_content_streams(document, page_id).map_err(&page_error)?;
        let text = document
            .extract_text(&[page_number])
            .map_err(|e| page_error(e.to_string()))?;

        if text.trim().is_empty() {
            debug!("Page {} of {} has no text", number, source);
            continue;
        }

        pages.push(Page {
            source: source.to_string(),
            number,
            text,
        });
    }

    Ok(pages)
}

/// lopdf decodes a broken Flate stream to empty output, which would read as a blank page
fn check_content_streams(document: &PdfDocument, page_id: ObjectId) -> Result<(), String> {
    for stream_id in document.get_page_contents(page_id) {
        let Ok(stream) = document.get_object(stream_id).and_then(Object::as_stream) else {
            return Err(format!("content stream {:?} is missing", stream_id));
        };
        let flate_encoded = stream
            .filters()
            .map(|filters| filters.first().map(String::as_str) == Some("FlateDecode"))
            .unwrap_or(false);
        if !flate_encoded || stream.content.is_empty() {
            continue;
        }

        let mut decoded = Vec::new();
        ZlibDecoder::new(stream.content.as_slice())
            .read_to_end(&mut decoded)
            .map_err(|e| format!("corrupt content stream {:?}: {}", stream_id, e))?;
    }
    Ok(())
}
