// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-document index persistence.
//!
//! One UTF-8 JSON file per document under `rag_indexes/`. Saves go through a
//! temp file and rename so a failed write leaves the prior index intact.
//! Corrupt or unknown-version files load as `None`; the caller treats the
//! document as unindexed.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::RagError;
use crate::rag::types::{RagIndexFile, INDEX_FILE_VERSION};

/// Directory under the application data dir holding index files.
const INDEX_DIR: &str = "rag_indexes";

/// Per-document index store.
#[derive(Debug, Clone)]
pub struct IndexStore {
    dir: PathBuf,
}

impl IndexStore {
    /// Create a store rooted at `<data_dir>/rag_indexes`. The directory is
    /// created on first save.
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join(INDEX_DIR),
        }
    }

    /// Path of the index file for `doc_id`.
    pub fn file_path(&self, doc_id: &str) -> PathBuf {
        self.dir.join(format!("rag_index_{}.json", doc_id))
    }

    /// Whether an index file exists for `doc_id`.
    pub fn exists(&self, doc_id: &str) -> bool {
        self.file_path(doc_id).is_file()
    }

    /// Delete the index file for `doc_id`. Missing files are not an error.
    pub fn remove(&self, doc_id: &str) -> Result<(), RagError> {
        let path = self.file_path(doc_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Serialize and persist an index file.
    ///
    /// The write lands in `<file>.tmp` first and is renamed over the target,
    /// so a failure preserves whatever index existed before.
    pub async fn save(&self, index: &RagIndexFile) -> Result<(), RagError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.file_path(&index.doc_id);
        let tmp_path = path.with_extension("json.tmp");

        let json = serde_json::to_string(index)
            .map_err(|e| RagError::Store(format!("serialize index: {}", e)))?;

        tokio::fs::write(&tmp_path, json.as_bytes()).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        debug!(doc_id = %index.doc_id, chunks = index.chunks.len(), "Saved index file");
        Ok(())
    }

    /// Load the index for `doc_id`.
    ///
    /// Returns `None` when the file is missing, unreadable, malformed, or
    /// carries an unknown schema version.
    pub async fn load(&self, doc_id: &str) -> Option<RagIndexFile> {
        let path = self.file_path(doc_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(doc_id, err = %e, "Failed to read index file");
                return None;
            }
        };

        let index: RagIndexFile = match serde_json::from_slice(&bytes) {
            Ok(index) => index,
            Err(e) => {
                warn!(doc_id, err = %e, "Corrupt index file, treating document as unindexed");
                return None;
            }
        };

        if index.version != INDEX_FILE_VERSION {
            warn!(
                doc_id,
                version = index.version,
                supported = INDEX_FILE_VERSION,
                "Rejecting index file with unknown version"
            );
            return None;
        }

        Some(index)
    }
}
