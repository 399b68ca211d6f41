// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Types for the RAG indexing and search subsystem.

use serde::{Deserialize, Serialize};

/// Current index file schema version. Loaders reject anything else.
pub const INDEX_FILE_VERSION: u32 = 1;

/// Text extracted from one page (or the whole file when `page_number` is
/// absent).
#[derive(Debug, Clone)]
pub struct PageText {
    pub page_number: Option<u32>,
    pub text: String,
    pub estimated_tokens: u32,
}

impl PageText {
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// A sentinel-delimited region of a document; the unit of chunker input.
///
/// `page_start <= page_end` whenever both are present.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionText {
    pub text: String,
    pub page_start: Option<u32>,
    pub page_end: Option<u32>,
}

/// A bounded text segment with its embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagChunk {
    /// `chunk_<docId>_<ordinal>`, ordinals dense from zero.
    pub id: String,
    pub doc_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_start: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_end: Option<u32>,
    /// L2-normalized embedding; same length for every chunk in one index.
    pub vector: Vec<f32>,
}

impl RagChunk {
    /// Format the chunk id for a document and build-time ordinal.
    pub fn make_id(doc_id: &str, ordinal: usize) -> String {
        format!("chunk_{}_{}", doc_id, ordinal)
    }

    /// Build-time ordinal recovered from the id suffix.
    pub fn ordinal(&self) -> usize {
        self.id
            .rsplit('_')
            .next()
            .and_then(|n| n.parse().ok())
            .unwrap_or(0)
    }
}

/// The persisted per-document index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagIndexFile {
    pub version: u32,
    pub doc_id: String,
    pub token_estimate: u64,
    pub chunks: Vec<RagChunk>,
}

/// Pipeline stage of an index build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Preparing,
    Ocr,
    Chunking,
    Vectorizing,
    Saving,
    Completed,
    Error,
}

/// One progress update from the index builder.
#[derive(Debug, Clone)]
pub struct RagIndexProgress {
    pub stage: ProgressStage,
    pub current: u32,
    pub total: u32,
    pub message: String,
    pub processed_tokens: u64,
    pub estimated_tokens: u64,
}

impl RagIndexProgress {
    pub fn stage(stage: ProgressStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            current: 0,
            total: 0,
            message: message.into(),
            processed_tokens: 0,
            estimated_tokens: 0,
        }
    }
}

/// Outcome of a successful (or empty) index build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RagIndexResult {
    pub document_id: String,
    pub chunk_count: u32,
    pub estimated_tokens: u64,
}

impl RagIndexResult {
    /// The zero-chunk result returned when a build ends without an index.
    pub fn empty(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            chunk_count: 0,
            estimated_tokens: 0,
        }
    }
}

/// One search hit: a chunk and its cosine score in `[-1, 1]`.
#[derive(Debug, Clone)]
pub struct RagMatch {
    pub chunk: RagChunk,
    pub score: f32,
}
