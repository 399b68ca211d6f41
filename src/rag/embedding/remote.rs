// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Remote embeddings client.
//!
//! A thin POST wrapper over an OpenAI-style `/embeddings` endpoint. Failures
//! return `None` with a warning; retry policy belongs to the caller.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::EmbeddingConfig;

/// Connect timeout for embedding requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Overall request timeout for embedding requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Remote embeddings client.
#[derive(Debug, Clone)]
pub struct RemoteEmbeddingClient {
    http: reqwest::Client,
}

impl RemoteEmbeddingClient {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self { http }
    }

    /// Embed one text. Returns `None` on any failure: invalid configuration,
    /// non-2xx status, empty or malformed body, empty data array.
    pub async fn embed(&self, text: &str, config: &EmbeddingConfig) -> Option<Vec<f32>> {
        if !config.is_valid() {
            warn!("Remote embedding config incomplete, skipping request");
            return None;
        }

        let request = EmbeddingRequest {
            model: &config.model,
            input: text,
        };

        debug!(model = %config.model, chars = text.len(), "Requesting remote embedding");

        let response = match self
            .http
            .post(&config.api_url)
            .header("Authorization", format!("Bearer {}", config.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(err = %e, "Remote embedding request failed");
                return None;
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!(err = %e, "Failed to read embedding response body");
                return None;
            }
        };

        if !status.is_success() {
            warn!(
                status = status.as_u16(),
                body = %body.chars().take(200).collect::<String>(),
                "Remote embedding endpoint returned an error"
            );
            return None;
        }

        if body.is_empty() {
            warn!("Remote embedding endpoint returned an empty body");
            return None;
        }

        let parsed: EmbeddingResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(err = %e, "Malformed embedding response");
                return None;
            }
        };

        match parsed.data.into_iter().next() {
            Some(data) => Some(data.embedding),
            None => {
                warn!("Embedding response contained no data");
                None
            }
        }
    }
}

impl Default for RemoteEmbeddingClient {
    fn default() -> Self {
        Self::new()
    }
}
