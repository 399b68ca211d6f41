// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! studyrag - RAG indexing and semantic search for study documents.
//!
//! The core behind a study assistant: it ingests documents (plain text,
//! Markdown, PDF page images, standalone images), makes their content
//! searchable through dense-vector retrieval, and mediates streaming access
//! to chat-completion providers. PDF and image ingestion runs OCR by
//! prompting a vision-capable model with rendered page images.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`types`] - Shared types (ChatMessage, ProviderSettings, ResponseState, ...)
//! - [`error`] - Error types and result aliases
//! - [`config`] - Collaborator traits: settings provider and document store
//! - [`tokens`] - Heuristic token estimation for budgeting and progress
//! - [`llm`] - Streaming multi-provider chat-completion client
//! - [`rag`] - Index build pipeline, embedding backends, store, and search
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use studyrag::config::{StaticDocuments, StaticSettings};
//! use studyrag::rag::{default_data_dir, RagService};
//!
//! let service = RagService::new(settings, documents, &default_data_dir());
//!
//! // Build an index with progress reporting
//! let result = service
//!     .build_index("doc1", Box::new(|p| println!("{:?} {}", p.stage, p.message)))
//!     .await?;
//!
//! // Query it
//! let matches = service.search("什么是动态规划", &["doc1".into()], 5).await;
//! for m in matches {
//!     println!("{:.2} {}", m.score, m.chunk.text);
//! }
//! ```
//!
//! This crate is a library: no CLI flags, no environment variables. All
//! configuration flows through the [`config::SettingsProvider`] the host
//! injects.

pub mod config;
pub mod error;
pub mod llm;
pub mod rag;
pub mod tokens;
pub mod types;

// Re-export commonly used types at crate root
pub use config::{DocumentDescriptor, DocumentStore, DocumentType, SettingsProvider};
pub use error::{ProviderError, RagError, Result};
pub use llm::LlmClient;
pub use rag::types::{
    ProgressStage, RagChunk, RagIndexFile, RagIndexProgress, RagIndexResult, RagMatch,
};
pub use rag::RagService;
pub use types::{
    ChatMessage, EmbeddingConfig, EmbeddingMode, ProviderKind, ProviderSettings, ResponseState,
    Role,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
