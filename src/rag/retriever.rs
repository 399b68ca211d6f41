// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Query-time scoring and ranking.
//!
//! Loads the named indexes, scores every chunk against the query vector by
//! cosine similarity, and returns the best matches. Builder-time vectors are
//! L2-normalized, so scores are effectively dot products.

use tracing::debug;

use crate::rag::embedding::EmbeddingRouter;
use crate::rag::store::IndexStore;
use crate::rag::types::RagMatch;

/// Cosine similarity between two vectors.
///
/// Positions missing from the shorter vector count as zero; a zero norm on
/// either side scores 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Embed the query and score it against every chunk of the named documents.
///
/// Documents without an index are skipped. Results come back in
/// non-increasing score order, ties broken by `(doc_id, ordinal)` ascending,
/// truncated to `top_k`.
pub async fn search_indexes(
    store: &IndexStore,
    router: &EmbeddingRouter,
    query: &str,
    doc_ids: &[String],
    top_k: usize,
) -> Result<Vec<RagMatch>, crate::error::RagError> {
    let query_vector = router.embed_query(query).await?;

    let mut scored: Vec<(RagMatch, usize)> = Vec::new();
    for doc_id in doc_ids {
        let Some(index) = store.load(doc_id).await else {
            debug!(doc_id, "Document has no index, skipping");
            continue;
        };

        for (ordinal, chunk) in index.chunks.into_iter().enumerate() {
            let score = cosine_similarity(&query_vector, &chunk.vector);
            scored.push((RagMatch { chunk, score }, ordinal));
        }
    }

    scored.sort_by(|(a, a_ord), (b, b_ord)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.doc_id.cmp(&b.chunk.doc_id))
            .then_with(|| a_ord.cmp(b_ord))
    });
    scored.truncate(top_k);

    Ok(scored.into_iter().map(|(m, _)| m).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::embedding::l2_normalize;
    use crate::rag::types::{RagChunk, RagIndexFile, INDEX_FILE_VERSION};

    #[test]
    fn test_cosine_identical_vectors() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal_and_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);

        let c = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &c) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_norm_scores_zero() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
        assert_eq!(cosine_similarity(&[], &b), 0.0);
    }

    #[test]
    fn test_cosine_length_mismatch_pads_with_zero() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0];
        // dot = 1, norms = 1 and 1
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    fn chunk(doc_id: &str, ordinal: usize, vector: Vec<f32>) -> RagChunk {
        RagChunk {
            id: RagChunk::make_id(doc_id, ordinal),
            doc_id: doc_id.to_string(),
            text: format!("chunk {}", ordinal),
            page_start: None,
            page_end: None,
            vector: l2_normalize(vector),
        }
    }

    #[tokio::test]
    async fn test_search_ranks_and_truncates() {
        use crate::rag::embedding::LocalBackend;
        use std::path::{Path, PathBuf};
        use std::sync::Arc;

        // Query embeds to the x axis.
        struct AxisLocal;
        impl LocalBackend for AxisLocal {
            fn embed(&self, _p: &Path, _t: &str) -> Option<Vec<f32>> {
                Some(vec![1.0, 0.0])
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store
            .save(&RagIndexFile {
                version: INDEX_FILE_VERSION,
                doc_id: "a".to_string(),
                token_estimate: 0,
                chunks: vec![
                    chunk("a", 0, vec![0.0, 1.0]),
                    chunk("a", 1, vec![1.0, 0.0]),
                    chunk("a", 2, vec![1.0, 1.0]),
                ],
            })
            .await
            .unwrap();

        let router = EmbeddingRouter::from_parts(
            Some((Arc::new(AxisLocal) as Arc<dyn LocalBackend>, PathBuf::new())),
            None,
        )
        .unwrap();

        let matches = search_indexes(&store, &router, "query", &["a".to_string()], 2)
            .await
            .unwrap();

        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].chunk.ordinal(), 1);
        assert!((matches[0].score - 1.0).abs() < 1e-5);
        assert_eq!(matches[1].chunk.ordinal(), 2);
        assert!(matches[0].score >= matches[1].score);
    }

    #[tokio::test]
    async fn test_search_tie_break_by_doc_then_ordinal() {
        use crate::rag::embedding::LocalBackend;
        use std::path::{Path, PathBuf};
        use std::sync::Arc;

        struct AxisLocal;
        impl LocalBackend for AxisLocal {
            fn embed(&self, _p: &Path, _t: &str) -> Option<Vec<f32>> {
                Some(vec![1.0, 0.0])
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        for doc_id in ["b", "a"] {
            store
                .save(&RagIndexFile {
                    version: INDEX_FILE_VERSION,
                    doc_id: doc_id.to_string(),
                    token_estimate: 0,
                    chunks: vec![
                        chunk(doc_id, 0, vec![1.0, 0.0]),
                        chunk(doc_id, 1, vec![1.0, 0.0]),
                    ],
                })
                .await
                .unwrap();
        }

        let router = EmbeddingRouter::from_parts(
            Some((Arc::new(AxisLocal) as Arc<dyn LocalBackend>, PathBuf::new())),
            None,
        )
        .unwrap();

        let matches = search_indexes(
            &store,
            &router,
            "query",
            &["b".to_string(), "a".to_string()],
            10,
        )
        .await
        .unwrap();

        // All scores tie at 1.0: order must be (doc_id, ordinal) ascending.
        let order: Vec<(String, usize)> = matches
            .iter()
            .map(|m| (m.chunk.doc_id.clone(), m.chunk.ordinal()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("a".to_string(), 0),
                ("a".to_string(), 1),
                ("b".to_string(), 0),
                ("b".to_string(), 1),
            ]
        );
    }

    #[tokio::test]
    async fn test_search_skips_unindexed_documents() {
        use crate::rag::embedding::LocalBackend;
        use std::path::{Path, PathBuf};
        use std::sync::Arc;

        struct AxisLocal;
        impl LocalBackend for AxisLocal {
            fn embed(&self, _p: &Path, _t: &str) -> Option<Vec<f32>> {
                Some(vec![1.0, 0.0])
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        let router = EmbeddingRouter::from_parts(
            Some((Arc::new(AxisLocal) as Arc<dyn LocalBackend>, PathBuf::new())),
            None,
        )
        .unwrap();

        let matches = search_indexes(&store, &router, "query", &["ghost".to_string()], 5)
            .await
            .unwrap();
        assert!(matches.is_empty());
    }
}
