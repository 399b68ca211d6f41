// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Embedding backend resolution and routing.
//!
//! The router decides once per build between the local engine and the remote
//! service, then embeds chunk and query texts. When a local call fails the
//! router falls back to the remote backend for the remainder of the build.
//! Vectors leaving the router are always L2-normalized.

#[cfg(feature = "local-embeddings")]
pub mod local;
pub mod remote;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::SettingsProvider;
use crate::error::RagError;
use crate::types::{EmbeddingConfig, EmbeddingMode};

pub use remote::RemoteEmbeddingClient;

/// Instruction wrapped around query text before embedding. Chunk texts are
/// embedded verbatim.
pub const QUERY_INSTRUCTION_PREFIX: &str =
    "Instruct: Given a web search query, retrieve relevant passages that answer the query\nQuery:";

/// Directory under the application data dir holding materialized models.
const MODELS_DIR: &str = "models";

/// Boundary over the native engine, so routing and fallback can be exercised
/// without the native build.
pub trait LocalBackend: Send + Sync {
    fn embed(&self, model_path: &Path, text: &str) -> Option<Vec<f32>>;
}

/// Resolved backend choice for one build or query.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingBackendState {
    pub use_local: bool,
    pub remote_config: Option<EmbeddingConfig>,
}

/// Routes embedding calls to the resolved backend with per-call fallback.
pub struct EmbeddingRouter {
    use_local: AtomicBool,
    local: Option<(Arc<dyn LocalBackend>, PathBuf)>,
    remote: RemoteEmbeddingClient,
    remote_config: Option<EmbeddingConfig>,
}

impl EmbeddingRouter {
    /// Resolve the backend from settings.
    ///
    /// With `LocalPreferred` and a capable device, the local model file is
    /// materialized under `<data_dir>/models/` on first use. Fails with
    /// [`RagError::ConfigurationMissing`] when neither backend is usable.
    pub async fn resolve(
        settings: &dyn SettingsProvider,
        data_dir: &Path,
    ) -> Result<Self, RagError> {
        let remote_config = settings.embedding_config().filter(|c| c.is_valid());

        let mut local: Option<(Arc<dyn LocalBackend>, PathBuf)> = None;
        if settings.embedding_mode() == EmbeddingMode::LocalPreferred && local_engine_available() {
            match materialize_local_model(settings, data_dir).await {
                Ok(Some(model_path)) => {
                    if let Some(engine) = local_engine() {
                        local = Some((engine, model_path));
                    }
                }
                Ok(None) => {
                    debug!("No local embedding model asset configured");
                }
                Err(e) => {
                    warn!(err = %e, "Failed to materialize local embedding model");
                }
            }
        }

        Self::from_parts(local, remote_config)
    }

    /// Assemble a router from explicit parts. Fails when neither backend is
    /// usable.
    pub fn from_parts(
        local: Option<(Arc<dyn LocalBackend>, PathBuf)>,
        remote_config: Option<EmbeddingConfig>,
    ) -> Result<Self, RagError> {
        if local.is_none() && remote_config.is_none() {
            return Err(RagError::ConfigurationMissing);
        }

        Ok(Self {
            use_local: AtomicBool::new(local.is_some()),
            local,
            remote: RemoteEmbeddingClient::new(),
            remote_config,
        })
    }

    /// The current backend state.
    pub fn state(&self) -> EmbeddingBackendState {
        EmbeddingBackendState {
            use_local: self.use_local.load(Ordering::SeqCst),
            remote_config: self.remote_config.clone(),
        }
    }

    /// Embed a chunk text verbatim.
    pub async fn embed_chunk(&self, text: &str) -> Result<Vec<f32>, RagError> {
        self.embed_text(text).await
    }

    /// Embed a query with the retrieval instruction prefix.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>, RagError> {
        let wrapped = format!("{}{}", QUERY_INSTRUCTION_PREFIX, query);
        self.embed_text(&wrapped).await
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, RagError> {
        if self.use_local.load(Ordering::SeqCst) {
            if let Some(vector) = self.embed_local(text).await {
                return Ok(l2_normalize(vector));
            }
            // One local failure demotes the backend for the rest of this
            // router's lifetime.
            warn!("Local embedding failed, falling back to remote backend");
            self.use_local.store(false, Ordering::SeqCst);
        }

        let Some(config) = &self.remote_config else {
            return Err(RagError::Embedding(
                "no remote embedding backend configured".to_string(),
            ));
        };

        match self.remote.embed(text, config).await {
            Some(vector) => Ok(l2_normalize(vector)),
            None => Err(RagError::Embedding(
                "remote embedding request failed".to_string(),
            )),
        }
    }

    async fn embed_local(&self, text: &str) -> Option<Vec<f32>> {
        let (engine, model_path) = self.local.as_ref()?;
        let engine = Arc::clone(engine);
        let model_path = model_path.clone();
        let text = text.to_string();

        match tokio::task::spawn_blocking(move || engine.embed(&model_path, &text)).await {
            Ok(result) => result,
            Err(e) => {
                warn!(err = %e, "Local embedding task panicked");
                None
            }
        }
    }
}

/// L2-normalize a vector. A zero vector is returned unchanged.
pub fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

/// Copy the host-shipped model asset into the models directory on first use.
async fn materialize_local_model(
    settings: &dyn SettingsProvider,
    data_dir: &Path,
) -> Result<Option<PathBuf>, RagError> {
    let Some(asset) = settings.local_model_asset() else {
        return Ok(None);
    };

    let file_name = asset
        .file_name()
        .ok_or_else(|| RagError::Embedding("local model asset has no file name".to_string()))?;
    let dest = data_dir.join(MODELS_DIR).join(file_name);

    if !dest.exists() {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&asset, &dest).await?;
        debug!(dest = %dest.display(), "Materialized local embedding model");
    }

    Ok(Some(dest))
}

#[cfg(feature = "local-embeddings")]
fn local_engine_available() -> bool {
    local::LocalEmbedder::is_available()
}

#[cfg(feature = "local-embeddings")]
fn local_engine() -> Option<Arc<dyn LocalBackend>> {
    Some(Arc::new(local::LocalEmbedder::new()))
}

#[cfg(not(feature = "local-embeddings"))]
fn local_engine_available() -> bool {
    false
}

#[cfg(not(feature = "local-embeddings"))]
fn local_engine() -> Option<Arc<dyn LocalBackend>> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticSettings;
    use std::sync::atomic::AtomicUsize;

    /// Fake native engine failing from a configurable call index onward.
    struct FlakyLocal {
        calls: AtomicUsize,
        fail_from: usize,
    }

    impl LocalBackend for FlakyLocal {
        fn embed(&self, _model_path: &Path, _text: &str) -> Option<Vec<f32>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call >= self.fail_from {
                None
            } else {
                Some(vec![3.0, 4.0])
            }
        }
    }

    fn remote_config() -> EmbeddingConfig {
        EmbeddingConfig::new("https://api.example.com/v1/embeddings", "key", "embed-v1")
    }

    #[test]
    fn test_l2_normalize() {
        let normalized = l2_normalize(vec![3.0, 4.0]);
        assert!((normalized[0] - 0.6).abs() < 1e-6);
        assert!((normalized[1] - 0.8).abs() < 1e-6);

        // Zero vectors pass through unchanged.
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_from_parts_requires_some_backend() {
        let result = EmbeddingRouter::from_parts(None, None);
        assert!(matches!(result, Err(RagError::ConfigurationMissing)));
    }

    #[tokio::test]
    async fn test_remote_only_never_uses_local() {
        // RemoteOnly policy resolves without a local backend regardless of
        // device capability.
        let settings = StaticSettings {
            embedding_mode: Some(EmbeddingMode::RemoteOnly),
            embedding_config: Some(remote_config()),
            local_model_asset: Some(PathBuf::from("/models/embed.gguf")),
            ..Default::default()
        };
        let dir = tempfile::tempdir().unwrap();

        let router = EmbeddingRouter::resolve(&settings, dir.path()).await.unwrap();
        assert!(!router.state().use_local);
    }

    #[tokio::test]
    async fn test_unconfigured_resolution_fails() {
        let settings = StaticSettings {
            embedding_mode: Some(EmbeddingMode::RemoteOnly),
            ..Default::default()
        };
        let dir = tempfile::tempdir().unwrap();

        let result = EmbeddingRouter::resolve(&settings, dir.path()).await;
        assert!(matches!(result, Err(RagError::ConfigurationMissing)));
    }

    #[tokio::test]
    async fn test_local_vectors_are_normalized() {
        let local: Arc<dyn LocalBackend> = Arc::new(FlakyLocal {
            calls: AtomicUsize::new(0),
            fail_from: usize::MAX,
        });
        let router = EmbeddingRouter::from_parts(
            Some((local, PathBuf::from("/models/embed.gguf"))),
            None,
        )
        .unwrap();

        let vector = router.embed_chunk("text").await.unwrap();
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_local_failure_without_remote_aborts() {
        let local: Arc<dyn LocalBackend> = Arc::new(FlakyLocal {
            calls: AtomicUsize::new(0),
            fail_from: 0,
        });
        let router = EmbeddingRouter::from_parts(
            Some((local, PathBuf::from("/models/embed.gguf"))),
            None,
        )
        .unwrap();

        let result = router.embed_chunk("text").await;
        assert!(matches!(result, Err(RagError::Embedding(_))));
        assert!(!router.state().use_local);
    }

    #[tokio::test]
    async fn test_fallback_is_sticky_for_remaining_calls() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [ { "embedding": [1.0, 0.0] } ]
            })))
            .expect(3)
            .mount(&server)
            .await;

        // Local succeeds for chunks 0-1, fails at chunk 2.
        let local: Arc<dyn LocalBackend> = Arc::new(FlakyLocal {
            calls: AtomicUsize::new(0),
            fail_from: 2,
        });
        let router = EmbeddingRouter::from_parts(
            Some((local, PathBuf::from("/models/embed.gguf"))),
            Some(EmbeddingConfig::new(server.uri(), "key", "embed-v1")),
        )
        .unwrap();

        for i in 0..5 {
            let vector = router.embed_chunk(&format!("chunk {}", i)).await.unwrap();
            assert!(!vector.is_empty());
        }

        // Chunks 2..5 went remote; the router never flips back.
        assert!(!router.state().use_local);
    }

    #[tokio::test]
    async fn test_query_prefix_applied() {
        use wiremock::matchers::{body_partial_json, method};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let expected_input = format!("{}什么是泛化误差", QUERY_INSTRUCTION_PREFIX);
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({ "input": expected_input })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [ { "embedding": [0.0, 1.0] } ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let router = EmbeddingRouter::from_parts(
            None,
            Some(EmbeddingConfig::new(server.uri(), "key", "embed-v1")),
        )
        .unwrap();

        let vector = router.embed_query("什么是泛化误差").await.unwrap();
        assert_eq!(vector, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_model_materialization_copies_once() {
        let asset_dir = tempfile::tempdir().unwrap();
        let asset = asset_dir.path().join("embed.gguf");
        tokio::fs::write(&asset, b"fake model bytes").await.unwrap();

        let data_dir = tempfile::tempdir().unwrap();
        let settings = StaticSettings {
            local_model_asset: Some(asset.clone()),
            ..Default::default()
        };

        let dest = materialize_local_model(&settings, data_dir.path())
            .await
            .unwrap()
            .unwrap();
        assert!(dest.exists());
        assert_eq!(dest.file_name().unwrap(), "embed.gguf");

        // Second call is a no-op on the existing file.
        tokio::fs::write(&dest, b"user modified").await.unwrap();
        let again = materialize_local_model(&settings, data_dir.path())
            .await
            .unwrap()
            .unwrap();
        let content = tokio::fs::read(&again).await.unwrap();
        assert_eq!(content, b"user modified");
    }
}
