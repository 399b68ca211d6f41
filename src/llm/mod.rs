// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Streaming LLM client.
//!
//! [`LlmClient`] fans chat-completion requests out to the configured provider
//! dialect and surfaces incremental tokens as a [`ResponseState`] stream
//! observed through a `tokio::sync::watch` channel: late subscribers always
//! see the latest value.
//!
//! One client owns one request at a time. `send_message` may only be called
//! from `Idle` or a terminal state; `cancel_request` closes the in-flight
//! stream and resets to `Idle` without emitting `Success`.

pub mod request;
pub mod sse;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{watch, Notify};
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::types::{ChatMessage, ProviderSettings, ResponseState};

/// Connect timeout for chat requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Overall request timeout; generous because responses stream.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Streaming chat-completion client.
pub struct LlmClient {
    http: reqwest::Client,
    system_prompt: Mutex<Option<String>>,
    state: watch::Sender<ResponseState>,
    cancel: Notify,
    cancelled: AtomicBool,
}

impl LlmClient {
    /// Create a client with default timeouts.
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        let (state, _) = watch::channel(ResponseState::Idle);

        Self {
            http,
            system_prompt: Mutex::new(None),
            state,
            cancel: Notify::new(),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Configure the system message prepended to every request.
    pub fn set_system_prompt(&self, prompt: impl Into<String>) {
        let mut guard = self
            .system_prompt
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(prompt.into());
    }

    /// Subscribe to response state updates. The receiver replays the latest
    /// value to new subscribers.
    pub fn response_state(&self) -> watch::Receiver<ResponseState> {
        self.state.subscribe()
    }

    /// The current response state.
    pub fn current_state(&self) -> ResponseState {
        self.state.borrow().clone()
    }

    /// Close the in-flight stream and reset to `Idle`.
    ///
    /// Any parser output still arriving after cancellation is discarded; no
    /// `Success` is emitted for the cancelled request.
    pub fn cancel_request(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel.notify_waiters();
        self.state.send_replace(ResponseState::Idle);
    }

    /// Begin a request and drive it to a terminal state.
    ///
    /// `context` is the ordered prior conversation; `message` is the new user
    /// turn. All outcomes flow through the state channel; the returned state
    /// is the final one observed (`Idle` when cancelled mid-flight).
    ///
    /// # Errors
    ///
    /// `RequestInFlight` when called while a request is still streaming.
    pub async fn send_message(
        &self,
        message: ChatMessage,
        context: &[ChatMessage],
        provider: &ProviderSettings,
    ) -> Result<ResponseState, ProviderError> {
        if !self.state.borrow().can_start_request() {
            return Err(ProviderError::RequestInFlight);
        }

        if !provider.is_configured() {
            let state = self.enter_error("模型服务未配置，请先在设置中填写 API 地址、密钥和模型".to_string());
            return Ok(state);
        }

        self.cancelled.store(false, Ordering::SeqCst);
        self.state.send_replace(ResponseState::Loading);

        let system_prompt = {
            let guard = self
                .system_prompt
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.clone()
        };

        let prepared =
            request::build_request(provider, system_prompt.as_deref(), context, &message);

        debug!(
            provider = %provider.kind,
            model = %provider.model,
            context_len = context.len(),
            has_image = message.has_image(),
            "Sending streaming chat request"
        );

        let mut req = self.http.post(&prepared.url);
        for (name, value) in &prepared.headers {
            req = req.header(*name, value);
        }

        let response = match req.json(&prepared.body).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(err = %e, url = %prepared.url, "Chat request failed to connect");
                return Ok(self.finish_transport_failure(String::new(), e.to_string()));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %truncate_for_log(&body), "Chat request rejected");
            let state = self.enter_error(format!("请求失败（HTTP {}）", status.as_u16()));
            return Ok(state);
        }

        let mut stream = response.bytes_stream();
        let mut pending = String::new();
        let mut accumulated = String::new();

        'pump: loop {
            if self.cancelled.load(Ordering::SeqCst) {
                return Ok(ResponseState::Idle);
            }

            tokio::select! {
                _ = self.cancel.notified() => {
                    return Ok(ResponseState::Idle);
                }
                next = stream.next() => match next {
                    Some(Ok(bytes)) => {
                        pending.push_str(&String::from_utf8_lossy(&bytes));
                        while let Some(pos) = pending.find('\n') {
                            let line: String = pending.drain(..=pos).collect();
                            let line = line.trim_end_matches(['\n', '\r']);
                            if self.consume_line(provider, line, &mut accumulated) {
                                break 'pump;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(err = %e, "Chat stream transport failure");
                        return Ok(self.finish_transport_failure(accumulated, e.to_string()));
                    }
                    None => break 'pump,
                }
            }
        }

        if self.cancelled.load(Ordering::SeqCst) {
            return Ok(ResponseState::Idle);
        }

        Ok(self.enter_success(accumulated))
    }

    /// Handle one SSE line. Returns `true` when the stream signalled `[DONE]`.
    fn consume_line(
        &self,
        provider: &ProviderSettings,
        line: &str,
        accumulated: &mut String,
    ) -> bool {
        let Some(payload) = sse::parse_data_line(line) else {
            return false;
        };

        if payload.trim() == sse::DONE_PAYLOAD {
            return true;
        }

        if let Some(delta) = sse::extract_delta(provider.kind, payload) {
            if !delta.is_empty() {
                accumulated.push_str(&delta);
                if !self.cancelled.load(Ordering::SeqCst) {
                    self.state.send_replace(ResponseState::Streaming {
                        delta,
                        accumulated: accumulated.clone(),
                    });
                }
            }
        }

        false
    }

    /// Transport failed. A non-empty accumulator still counts as success; the
    /// partial response is what the user saw stream in.
    fn finish_transport_failure(&self, accumulated: String, cause: String) -> ResponseState {
        if self.cancelled.load(Ordering::SeqCst) {
            return ResponseState::Idle;
        }
        if accumulated.is_empty() {
            self.enter_error(format!("网络连接中断：{}", cause))
        } else {
            self.enter_success(accumulated)
        }
    }

    fn enter_success(&self, accumulated: String) -> ResponseState {
        let state = ResponseState::Success(accumulated);
        self.state.send_replace(state.clone());
        state
    }

    fn enter_error(&self, message: String) -> ResponseState {
        let state = ResponseState::Error(message);
        self.state.send_replace(state.clone());
        state
    }
}

impl Default for LlmClient {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate_for_log(body: &str) -> String {
    body.chars().take(200).collect()
}
