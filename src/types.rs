// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core types for the studyrag core.
//!
//! This module defines the fundamental data structures shared by the LLM
//! client and the RAG subsystem: chat messages, provider identities and
//! settings, the streaming response state machine, and embedding backend
//! configuration.

use serde::{Deserialize, Serialize};

// ============================================================================
// Message Types
// ============================================================================

/// Role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A message in a conversation.
///
/// The `image_base64` / `image_mime_type` pair is set together for multimodal
/// user turns (page OCR) and absent for plain text turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_mime_type: Option<String>,
}

impl ChatMessage {
    /// Create a user message with text content.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            image_base64: None,
            image_mime_type: None,
        }
    }

    /// Create an assistant message with text content.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            image_base64: None,
            image_mime_type: None,
        }
    }

    /// Create a system message with text content.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            image_base64: None,
            image_mime_type: None,
        }
    }

    /// Create a user message carrying a base64-encoded image.
    pub fn user_with_image(
        content: impl Into<String>,
        image_base64: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            image_base64: Some(image_base64.into()),
            image_mime_type: Some(mime_type.into()),
        }
    }

    /// Whether this message carries an image payload.
    pub fn has_image(&self) -> bool {
        self.image_base64.is_some()
    }
}

// ============================================================================
// Provider Identity & Settings
// ============================================================================

/// Wire dialect of a chat-completion provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI-compatible `/chat/completions` dialect.
    OpenAiStyle,
    /// Anthropic `/messages` dialect.
    Anthropic,
    /// DashScope text-generation dialect.
    DashScope,
    /// User-defined endpoint speaking the OpenAI dialect.
    Custom,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAiStyle => "openai",
            Self::Anthropic => "anthropic",
            Self::DashScope => "dashscope",
            Self::Custom => "custom",
        }
    }

    /// Whether this dialect folds the system prompt into a top-level field
    /// instead of a message entry.
    pub fn system_is_top_level(&self) -> bool {
        matches!(self, Self::Anthropic)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration of one chat-completion provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub max_context_tokens: u32,
    pub enabled: bool,
}

impl ProviderSettings {
    pub fn new(
        kind: ProviderKind,
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            api_url: api_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            max_context_tokens: 4096,
            enabled: true,
        }
    }

    pub fn with_max_context_tokens(mut self, tokens: u32) -> Self {
        self.max_context_tokens = tokens;
        self
    }

    /// A provider is usable when enabled with a URL, key, and model.
    pub fn is_configured(&self) -> bool {
        self.enabled && !self.api_url.is_empty() && !self.api_key.is_empty() && !self.model.is_empty()
    }
}

// ============================================================================
// Streaming Response State
// ============================================================================

/// Observable state of one LLM request.
///
/// State changes are serialized; observers see a strictly monotonic sequence
/// within one request, and no `Streaming` update follows a terminal state.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseState {
    /// No request in flight.
    Idle,
    /// Request sent, no tokens received yet.
    Loading,
    /// A token delta arrived; `accumulated` is the full text so far.
    Streaming { delta: String, accumulated: String },
    /// Stream finished; carries the full response text.
    Success(String),
    /// Request failed; carries a human-readable message.
    Error(String),
}

impl ResponseState {
    /// Whether a new request may be started from this state.
    pub fn can_start_request(&self) -> bool {
        matches!(self, Self::Idle | Self::Success(_) | Self::Error(_))
    }

    /// Whether this state ends a request.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success(_) | Self::Error(_))
    }

    /// Get the full response text if this is a success state.
    pub fn as_success(&self) -> Option<&str> {
        match self {
            Self::Success(text) => Some(text),
            _ => None,
        }
    }
}

// ============================================================================
// Embedding Configuration
// ============================================================================

/// Remote embedding endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
}

impl EmbeddingConfig {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Valid iff all three fields are non-empty.
    pub fn is_valid(&self) -> bool {
        !self.api_url.is_empty() && !self.api_key.is_empty() && !self.model.is_empty()
    }
}

/// Embedding backend selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingMode {
    /// Use the local engine when the device is capable, remote otherwise.
    LocalPreferred,
    /// Never use the local engine.
    RemoteOnly,
}

impl Default for EmbeddingMode {
    fn default() -> Self {
        Self::LocalPreferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = ChatMessage::user("你好");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "你好");
        assert!(!msg.has_image());
    }

    #[test]
    fn test_message_with_image() {
        let msg = ChatMessage::user_with_image("read this page", "aGVsbG8=", "image/jpeg");
        assert!(msg.has_image());
        assert_eq!(msg.image_mime_type.as_deref(), Some("image/jpeg"));
    }

    #[test]
    fn test_provider_settings_configured() {
        let mut settings =
            ProviderSettings::new(ProviderKind::OpenAiStyle, "https://api.example.com", "key", "gpt-4o");
        assert!(settings.is_configured());

        settings.enabled = false;
        assert!(!settings.is_configured());

        settings.enabled = true;
        settings.api_key.clear();
        assert!(!settings.is_configured());
    }

    #[test]
    fn test_system_top_level_only_for_anthropic() {
        assert!(ProviderKind::Anthropic.system_is_top_level());
        assert!(!ProviderKind::OpenAiStyle.system_is_top_level());
        assert!(!ProviderKind::DashScope.system_is_top_level());
        assert!(!ProviderKind::Custom.system_is_top_level());
    }

    #[test]
    fn test_response_state_transitions() {
        assert!(ResponseState::Idle.can_start_request());
        assert!(ResponseState::Success("done".to_string()).can_start_request());
        assert!(ResponseState::Error("boom".to_string()).can_start_request());
        assert!(!ResponseState::Loading.can_start_request());
        assert!(!ResponseState::Streaming {
            delta: "a".to_string(),
            accumulated: "a".to_string()
        }
        .can_start_request());
    }

    #[test]
    fn test_embedding_config_validity() {
        let config = EmbeddingConfig::new("https://api.example.com/v1/embeddings", "key", "embed-v1");
        assert!(config.is_valid());

        let missing_model = EmbeddingConfig::new("https://api.example.com", "key", "");
        assert!(!missing_model.is_valid());
    }
}
