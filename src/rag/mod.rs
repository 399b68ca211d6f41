// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! RAG indexing and semantic search over study documents.
//!
//! This module wires the pipeline together:
//!
//! - **Extraction**: PDF page rasterization + OCR, image OCR, text reads
//! - **Chunking**: sentinel sectioning and overlapping windows
//! - **Embedding**: local GGUF engine with remote fallback
//! - **Persistence**: one JSON index file per document
//! - **Search**: cosine-scored top-K retrieval across named documents
//!
//! ```text
//! build:  DocumentDescriptor → OCR* → Chunker → EmbeddingRouter → IndexStore
//! query:  (query, doc ids)   → EmbeddingRouter → IndexStore → cosine → top-K
//! ```
//!
//! [`RagService`] is the host-facing facade. Builds are keyed by document id:
//! a second build for the same document is rejected while the first runs.
//! Different documents may build concurrently, each on its own builder.

pub mod chunker;
pub mod embedding;
pub mod extract;
pub mod indexer;
pub mod ocr;
pub mod retriever;
pub mod store;
pub mod types;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::config::{DocumentStore, SettingsProvider};
use crate::error::RagError;
use crate::rag::embedding::EmbeddingRouter;
use crate::rag::indexer::{IndexBuilder, ProgressCallback};
use crate::rag::store::IndexStore;
use crate::rag::types::{RagIndexResult, RagMatch};

/// Default application data directory.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("studyrag")
}

/// Host-facing facade over index building and search.
pub struct RagService {
    settings: Arc<dyn SettingsProvider>,
    documents: Arc<dyn DocumentStore>,
    store: IndexStore,
    data_dir: PathBuf,
    builds: Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>,
}

impl RagService {
    pub fn new(
        settings: Arc<dyn SettingsProvider>,
        documents: Arc<dyn DocumentStore>,
        data_dir: &Path,
    ) -> Self {
        Self {
            settings,
            documents,
            store: IndexStore::new(data_dir),
            data_dir: data_dir.to_path_buf(),
            builds: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Build (or rebuild) the index for one document.
    ///
    /// `on_progress` is invoked synchronously from the build task at every
    /// stage transition and per-unit advance. A concurrent build for the same
    /// document is rejected with [`RagError::BuildInProgress`].
    pub async fn build_index(
        &self,
        doc_id: &str,
        on_progress: ProgressCallback,
    ) -> Result<RagIndexResult, RagError> {
        let document = self
            .documents
            .get_document(doc_id)
            .await
            .ok_or_else(|| RagError::DocumentNotFound(doc_id.to_string()))?;

        let builder = IndexBuilder::new(Arc::clone(&self.settings), &self.data_dir);

        let _guard = {
            let mut builds = lock_unpoisoned(&self.builds);
            if builds.contains_key(doc_id) {
                return Err(RagError::BuildInProgress(doc_id.to_string()));
            }
            builds.insert(doc_id.to_string(), builder.cancel_flag());
            BuildGuard {
                doc_id: doc_id.to_string(),
                builds: Arc::clone(&self.builds),
            }
        };

        builder.build(&document, on_progress.as_ref()).await
    }

    /// Cancel a running build for `doc_id`, if any.
    pub fn cancel_build(&self, doc_id: &str) {
        if let Some(flag) = lock_unpoisoned(&self.builds).get(doc_id) {
            flag.store(true, Ordering::SeqCst);
        }
    }

    /// Search the named documents for passages relevant to `query`.
    ///
    /// Returns matches in non-increasing score order, at most `top_k`. A
    /// blank query, empty document list, or unresolved embedding backend
    /// yields an empty result.
    pub async fn search(&self, query: &str, doc_ids: &[String], top_k: usize) -> Vec<RagMatch> {
        if query.trim().is_empty() || doc_ids.is_empty() {
            return Vec::new();
        }

        let router = match EmbeddingRouter::resolve(self.settings.as_ref(), &self.data_dir).await {
            Ok(router) => router,
            Err(e) => {
                warn!(err = %e, "Search skipped: embedding backend unresolved");
                return Vec::new();
            }
        };

        match retriever::search_indexes(&self.store, &router, query, doc_ids, top_k).await {
            Ok(matches) => matches,
            Err(e) => {
                warn!(err = %e, "Search failed");
                Vec::new()
            }
        }
    }

    /// Whether an index file exists for `doc_id`.
    pub fn is_indexed(&self, doc_id: &str) -> bool {
        self.store.exists(doc_id)
    }

    /// Delete the index for `doc_id`. Missing indexes are not an error.
    pub fn remove_index(&self, doc_id: &str) -> Result<(), RagError> {
        self.store.remove(doc_id)
    }
}

/// Removes the build entry when the build ends, on every path.
struct BuildGuard {
    doc_id: String,
    builds: Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>,
}

impl Drop for BuildGuard {
    fn drop(&mut self) {
        lock_unpoisoned(&self.builds).remove(&self.doc_id);
    }
}

fn lock_unpoisoned<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DocumentDescriptor, DocumentType, StaticDocuments, StaticSettings};
    use crate::types::{EmbeddingConfig, EmbeddingMode};

    fn service_with_remote(dir: &Path, server_uri: &str) -> RagService {
        let settings = Arc::new(StaticSettings {
            embedding_mode: Some(EmbeddingMode::RemoteOnly),
            embedding_config: Some(EmbeddingConfig::new(server_uri, "key", "embed-v1")),
            ..Default::default()
        });
        let documents = StaticDocuments::new(vec![DocumentDescriptor {
            id: "doc1".to_string(),
            path: dir.join("doc1.txt"),
            doc_type: DocumentType::PlainText,
            name: "资料".to_string(),
        }]);
        RagService::new(settings, documents, dir)
    }

    #[tokio::test]
    async fn test_build_unknown_document() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with_remote(dir.path(), "https://api.example.com");

        let result = service.build_index("missing", Box::new(|_| {})).await;
        assert!(matches!(result, Err(RagError::DocumentNotFound(_))));
    }

    #[tokio::test]
    async fn test_search_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with_remote(dir.path(), "https://api.example.com");

        assert!(service.search("  ", &["doc1".to_string()], 5).await.is_empty());
        assert!(service.search("query", &[], 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_search_with_unresolved_backend_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(StaticSettings {
            embedding_mode: Some(EmbeddingMode::RemoteOnly),
            ..Default::default()
        });
        let documents = StaticDocuments::new(vec![]);
        let service = RagService::new(settings, documents, dir.path());

        assert!(service
            .search("query", &["doc1".to_string()], 5)
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_remove_index_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with_remote(dir.path(), "https://api.example.com");

        assert!(!service.is_indexed("doc1"));
        service.remove_index("doc1").unwrap();
    }

    #[tokio::test]
    async fn test_cancel_build_without_running_build_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with_remote(dir.path(), "https://api.example.com");
        service.cancel_build("doc1");
    }
}
