// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Local GGUF embedding engine.
//!
//! A safe wrapper over llama.cpp. One model is loaded at a time behind a
//! mutex; a request naming a different model path tears the current handle
//! down and loads the new one. Every failure path returns `None` with one
//! warning and never panics across the boundary.
//!
//! Backend initialization is one-shot and idempotent: the first caller
//! initializes llama.cpp, every later caller reuses the handle.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use llama_cpp_2::context::params::{LlamaContextParams, LlamaPoolingType};
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel};
use tracing::{debug, warn};

use super::{l2_normalize, LocalBackend};

/// Context length for embedding passes; inputs are truncated to fit.
const EMBED_CONTEXT_TOKENS: u32 = 2048;

/// Minimum physical memory for the local engine, in bytes.
const MIN_PHYSICAL_MEMORY: u64 = 8 * 1024 * 1024 * 1024;

static BACKEND: OnceLock<Option<LlamaBackend>> = OnceLock::new();

fn backend() -> Option<&'static LlamaBackend> {
    BACKEND
        .get_or_init(|| match LlamaBackend::init() {
            Ok(backend) => Some(backend),
            Err(e) => {
                warn!(err = %e, "llama.cpp backend initialization failed");
                None
            }
        })
        .as_ref()
}

struct LoadedModel {
    path: PathBuf,
    model: LlamaModel,
}

/// Mutex-guarded local embedding engine. Concurrent calls serialize; calls
/// naming a new model path reload atomically.
pub struct LocalEmbedder {
    state: Mutex<Option<LoadedModel>>,
}

impl LocalEmbedder {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
        }
    }

    /// Capability probe: the native backend must initialize, the CPU must be
    /// 64-bit ARM-class, and the device needs at least 8 GiB of physical
    /// memory.
    pub fn is_available() -> bool {
        if !cfg!(target_arch = "aarch64") {
            return false;
        }
        if backend().is_none() {
            return false;
        }
        physical_memory() >= MIN_PHYSICAL_MEMORY
    }

    fn embed_inner(&self, model_path: &Path, text: &str) -> Option<Vec<f32>> {
        let backend = backend()?;

        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let needs_load = match guard.as_ref() {
            Some(loaded) => loaded.path != model_path,
            None => true,
        };

        if needs_load {
            // Release the previous handle before loading the next model.
            *guard = None;

            let params = LlamaModelParams::default();
            let model = match LlamaModel::load_from_file(backend, model_path, &params) {
                Ok(model) => model,
                Err(e) => {
                    warn!(path = %model_path.display(), err = %e, "Failed to load embedding model");
                    return None;
                }
            };
            debug!(path = %model_path.display(), "Loaded local embedding model");
            *guard = Some(LoadedModel {
                path: model_path.to_path_buf(),
                model,
            });
        }

        let loaded = guard.as_ref()?;
        match forward_pass(backend, &loaded.model, text) {
            Ok(vector) => Some(vector),
            Err(e) => {
                warn!(err = %e, "Local embedding pass failed");
                None
            }
        }
    }
}

impl Default for LocalEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBackend for LocalEmbedder {
    fn embed(&self, model_path: &Path, text: &str) -> Option<Vec<f32>> {
        self.embed_inner(model_path, text)
    }
}

/// Tokenize, run one decode with last-token pooling, and L2-normalize.
fn forward_pass(
    backend: &LlamaBackend,
    model: &LlamaModel,
    text: &str,
) -> Result<Vec<f32>, String> {
    let ctx_params = LlamaContextParams::default()
        .with_n_ctx(NonZeroU32::new(EMBED_CONTEXT_TOKENS))
        .with_embeddings(true)
        .with_pooling_type(LlamaPoolingType::Last);

    let mut ctx = model
        .new_context(backend, ctx_params)
        .map_err(|e| format!("context allocation failed: {}", e))?;

    let mut tokens = model
        .str_to_token(text, AddBos::Always)
        .map_err(|e| format!("tokenization failed: {}", e))?;
    if tokens.is_empty() {
        return Err("tokenizer produced no tokens".to_string());
    }

    let n_ctx = ctx.n_ctx() as usize;
    tokens.truncate(n_ctx);

    let mut batch = LlamaBatch::new(n_ctx, 1);
    batch
        .add_sequence(&tokens, 0, false)
        .map_err(|e| format!("batch assembly failed: {}", e))?;

    ctx.clear_kv_cache();
    ctx.decode(&mut batch)
        .map_err(|e| format!("decode failed: {}", e))?;

    let embedding = ctx
        .embeddings_seq_ith(0)
        .map_err(|e| format!("embedding extraction failed: {}", e))?;

    Ok(l2_normalize(embedding.to_vec()))
}

fn physical_memory() -> u64 {
    use sysinfo::System;
    let mut system = System::new();
    system.refresh_memory();
    system.total_memory()
}
