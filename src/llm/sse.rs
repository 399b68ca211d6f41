// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Server-sent-event frame handling.
//!
//! All three dialects stream one JSON payload per `data:` frame. The payload
//! `[DONE]` terminates OpenAI-style and DashScope streams. Parsing failures
//! are logged and skipped; the stream continues.

use serde::Deserialize;
use tracing::warn;

use crate::types::ProviderKind;

/// Sentinel payload terminating a stream.
pub const DONE_PAYLOAD: &str = "[DONE]";

/// Extract the payload of a `data:` line, if this line carries one.
///
/// Comment lines (leading `:`), `event:` lines, and blank separators return
/// `None`.
pub fn parse_data_line(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("data:")?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// Extract the text delta from one frame payload for the given dialect.
///
/// Returns `None` for frames that carry no text (role preludes, usage frames,
/// malformed JSON).
pub fn extract_delta(kind: ProviderKind, payload: &str) -> Option<String> {
    match kind {
        ProviderKind::OpenAiStyle | ProviderKind::Custom => extract_openai_delta(payload),
        ProviderKind::Anthropic => extract_anthropic_delta(payload),
        ProviderKind::DashScope => extract_dashscope_delta(payload),
    }
}

// ============================================================================
// OpenAI-style: choices[0].delta.content
// ============================================================================

#[derive(Debug, Deserialize)]
struct OpenAiChunk {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    #[serde(default)]
    delta: Option<OpenAiDelta>,
}

#[derive(Debug, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
}

fn extract_openai_delta(payload: &str) -> Option<String> {
    let chunk: OpenAiChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!(err = %e, "Skipping malformed OpenAI stream frame");
            return None;
        }
    };

    chunk.choices.into_iter().next()?.delta?.content
}

// ============================================================================
// Anthropic: content_block_delta → delta.text
// ============================================================================

#[derive(Debug, Deserialize)]
struct AnthropicEvent {
    #[serde(rename = "type", default)]
    event_type: String,
    #[serde(default)]
    delta: Option<AnthropicDelta>,
}

#[derive(Debug, Deserialize)]
struct AnthropicDelta {
    #[serde(default)]
    text: Option<String>,
}

fn extract_anthropic_delta(payload: &str) -> Option<String> {
    let event: AnthropicEvent = match serde_json::from_str(payload) {
        Ok(event) => event,
        Err(e) => {
            warn!(err = %e, "Skipping malformed Anthropic stream frame");
            return None;
        }
    };

    if event.event_type != "content_block_delta" {
        return None;
    }

    event.delta?.text
}

// ============================================================================
// DashScope: output.choices[0].message.content
// ============================================================================

#[derive(Debug, Deserialize)]
struct DashScopeChunk {
    #[serde(default)]
    output: Option<DashScopeOutput>,
}

#[derive(Debug, Deserialize)]
struct DashScopeOutput {
    #[serde(default)]
    choices: Vec<DashScopeChoice>,
}

#[derive(Debug, Deserialize)]
struct DashScopeChoice {
    #[serde(default)]
    message: Option<DashScopeMessage>,
}

#[derive(Debug, Deserialize)]
struct DashScopeMessage {
    #[serde(default)]
    content: Option<String>,
}

fn extract_dashscope_delta(payload: &str) -> Option<String> {
    let chunk: DashScopeChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!(err = %e, "Skipping malformed DashScope stream frame");
            return None;
        }
    };

    chunk.output?.choices.into_iter().next()?.message?.content
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_data_line() {
        assert_eq!(parse_data_line("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(parse_data_line("data:{\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(parse_data_line("data: [DONE]"), Some("[DONE]"));
        assert_eq!(parse_data_line("event: message_start"), None);
        assert_eq!(parse_data_line(": keep-alive"), None);
        assert_eq!(parse_data_line(""), None);
    }

    #[test]
    fn test_openai_delta() {
        let payload = r#"{"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(
            extract_delta(ProviderKind::OpenAiStyle, payload),
            Some("Hel".to_string())
        );

        // Role prelude frame has no content
        let prelude = r#"{"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(extract_delta(ProviderKind::OpenAiStyle, prelude), None);
    }

    #[test]
    fn test_custom_uses_openai_dialect() {
        let payload = r#"{"choices":[{"delta":{"content":"x"}}]}"#;
        assert_eq!(
            extract_delta(ProviderKind::Custom, payload),
            Some("x".to_string())
        );
    }

    #[test]
    fn test_anthropic_delta() {
        let payload = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"你好"}}"#;
        assert_eq!(
            extract_delta(ProviderKind::Anthropic, payload),
            Some("你好".to_string())
        );

        // Other event types carry no text
        let start = r#"{"type":"message_start","message":{"usage":{"input_tokens":10}}}"#;
        assert_eq!(extract_delta(ProviderKind::Anthropic, start), None);
    }

    #[test]
    fn test_dashscope_delta() {
        let payload =
            r#"{"output":{"choices":[{"message":{"role":"assistant","content":"世界"}}]}}"#;
        assert_eq!(
            extract_delta(ProviderKind::DashScope, payload),
            Some("世界".to_string())
        );
    }

    #[test]
    fn test_malformed_frame_is_skipped() {
        assert_eq!(extract_delta(ProviderKind::OpenAiStyle, "{not json"), None);
        assert_eq!(extract_delta(ProviderKind::Anthropic, "{not json"), None);
        assert_eq!(extract_delta(ProviderKind::DashScope, "{not json"), None);
    }
}
