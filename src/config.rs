// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! External collaborator interfaces.
//!
//! The core consumes settings and document metadata through these traits; the
//! host wires in its own persistence. Nothing in this crate reads environment
//! variables or config files directly.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{EmbeddingConfig, EmbeddingMode, ProviderSettings};

/// Kind of a study document, as recorded by the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    PlainText,
    Markdown,
    Pdf,
    Image,
    Other,
}

/// Descriptor of one imported document. Immutable during a build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentDescriptor {
    pub id: String,
    pub path: PathBuf,
    #[serde(rename = "type")]
    pub doc_type: DocumentType,
    pub name: String,
}

/// Read access to user settings.
///
/// Implemented by the host's settings store; the core only reads.
pub trait SettingsProvider: Send + Sync {
    /// Embedding backend selection policy.
    fn embedding_mode(&self) -> EmbeddingMode;

    /// Remote embedding endpoint, if the user configured one.
    fn embedding_config(&self) -> Option<EmbeddingConfig>;

    /// The vision-capable provider used for page OCR.
    fn vision_provider(&self) -> Option<ProviderSettings>;

    /// Source path of the bundled local embedding model, if the host ships
    /// one. Copied into the models directory on first local use.
    fn local_model_asset(&self) -> Option<PathBuf> {
        None
    }
}

/// Read access to imported documents. Backed by the host's persistence, so
/// lookups may suspend.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_document(&self, id: &str) -> Option<DocumentDescriptor>;
}

/// In-memory settings, for hosts with fixed configuration and for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticSettings {
    pub embedding_mode: Option<EmbeddingMode>,
    pub embedding_config: Option<EmbeddingConfig>,
    pub vision_provider: Option<ProviderSettings>,
    pub local_model_asset: Option<PathBuf>,
}

impl SettingsProvider for StaticSettings {
    fn embedding_mode(&self) -> EmbeddingMode {
        self.embedding_mode.unwrap_or_default()
    }

    fn embedding_config(&self) -> Option<EmbeddingConfig> {
        self.embedding_config.clone()
    }

    fn vision_provider(&self) -> Option<ProviderSettings> {
        self.vision_provider.clone()
    }

    fn local_model_asset(&self) -> Option<PathBuf> {
        self.local_model_asset.clone()
    }
}

/// In-memory document store, for tests and single-shot hosts.
#[derive(Debug, Clone, Default)]
pub struct StaticDocuments {
    pub documents: Vec<DocumentDescriptor>,
}

impl StaticDocuments {
    pub fn new(documents: Vec<DocumentDescriptor>) -> Arc<Self> {
        Arc::new(Self { documents })
    }
}

#[async_trait]
impl DocumentStore for StaticDocuments {
    async fn get_document(&self, id: &str) -> Option<DocumentDescriptor> {
        self.documents.iter().find(|d| d.id == id).cloned()
    }
}
