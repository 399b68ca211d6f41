// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Request assembly for the chat-completion dialects.
//!
//! Each provider speaks its own wire format; this module maps a conversation
//! (system prompt + context + new user turn) onto the endpoint, headers, and
//! JSON body for one streaming request.

use serde::Serialize;

use crate::types::{ChatMessage, ProviderKind, ProviderSettings, Role};

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Max tokens requested per completion.
const MAX_TOKENS: u32 = 4096;

/// A fully assembled HTTP request, ready to send.
#[derive(Debug)]
pub struct PreparedRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: serde_json::Value,
}

/// Build the streaming chat request for `provider`.
pub fn build_request(
    provider: &ProviderSettings,
    system_prompt: Option<&str>,
    context: &[ChatMessage],
    message: &ChatMessage,
) -> PreparedRequest {
    let url = endpoint(provider.kind, &provider.api_url);
    let headers = headers(provider.kind, &provider.api_key);
    let body = match provider.kind {
        ProviderKind::OpenAiStyle | ProviderKind::Custom => {
            openai_body(provider, system_prompt, context, message)
        }
        ProviderKind::Anthropic => anthropic_body(provider, system_prompt, context, message),
        ProviderKind::DashScope => dashscope_body(provider, system_prompt, context, message),
    };

    PreparedRequest { url, headers, body }
}

/// Resolve the endpoint URL for a dialect.
fn endpoint(kind: ProviderKind, api_url: &str) -> String {
    let base = api_url.trim_end_matches('/');
    match kind {
        ProviderKind::OpenAiStyle | ProviderKind::Custom => format!("{}/chat/completions", base),
        ProviderKind::Anthropic => format!("{}/messages", base),
        // DashScope settings store the text-generation endpoint itself.
        ProviderKind::DashScope => base.to_string(),
    }
}

/// Auth and dialect headers.
fn headers(kind: ProviderKind, api_key: &str) -> Vec<(&'static str, String)> {
    match kind {
        ProviderKind::OpenAiStyle | ProviderKind::Custom => {
            vec![("authorization", format!("Bearer {}", api_key))]
        }
        ProviderKind::Anthropic => vec![
            ("x-api-key", api_key.to_string()),
            ("anthropic-version", ANTHROPIC_VERSION.to_string()),
        ],
        ProviderKind::DashScope => vec![
            ("authorization", format!("Bearer {}", api_key)),
            ("X-DashScope-SSE", "enable".to_string()),
        ],
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct WireMessage<P> {
    role: &'static str,
    content: WireContent<P>,
}

/// Content is a plain string for text turns and a block array for image turns.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireContent<P> {
    Text(String),
    Parts(Vec<P>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenAiPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrlPayload },
}

#[derive(Debug, Serialize)]
struct ImageUrlPayload {
    url: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicPart {
    Image { source: Base64ImageSource },
    Text { text: String },
}

#[derive(Debug, Serialize)]
struct Base64ImageSource {
    #[serde(rename = "type")]
    source_type: &'static str,
    media_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DashScopePart {
    Text { text: String },
    Image { image: String },
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<WireMessage<OpenAiPart>>,
    stream: bool,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage<AnthropicPart>>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct DashScopeRequest {
    model: String,
    input: DashScopeInput,
    parameters: DashScopeParameters,
}

#[derive(Debug, Serialize)]
struct DashScopeInput {
    messages: Vec<WireMessage<DashScopePart>>,
}

#[derive(Debug, Serialize)]
struct DashScopeParameters {
    result_format: &'static str,
    incremental_output: bool,
}

// ============================================================================
// Body builders
// ============================================================================

fn data_url(message: &ChatMessage) -> String {
    format!(
        "data:{};base64,{}",
        message.image_mime_type.as_deref().unwrap_or("image/jpeg"),
        message.image_base64.as_deref().unwrap_or_default()
    )
}

fn openai_content(message: &ChatMessage) -> WireContent<OpenAiPart> {
    match &message.image_base64 {
        None => WireContent::Text(message.content.clone()),
        Some(_) => {
            let mut parts = Vec::new();
            if !message.content.trim().is_empty() {
                parts.push(OpenAiPart::Text {
                    text: message.content.clone(),
                });
            }
            parts.push(OpenAiPart::ImageUrl {
                image_url: ImageUrlPayload {
                    url: data_url(message),
                },
            });
            WireContent::Parts(parts)
        }
    }
}

fn anthropic_content(message: &ChatMessage) -> WireContent<AnthropicPart> {
    match (&message.image_base64, &message.image_mime_type) {
        (Some(data), mime) => {
            let mut parts = vec![AnthropicPart::Image {
                source: Base64ImageSource {
                    source_type: "base64",
                    media_type: mime.clone().unwrap_or_else(|| "image/jpeg".to_string()),
                    data: data.clone(),
                },
            }];
            if !message.content.trim().is_empty() {
                parts.push(AnthropicPart::Text {
                    text: message.content.clone(),
                });
            }
            WireContent::Parts(parts)
        }
        (None, _) => WireContent::Text(message.content.clone()),
    }
}

fn dashscope_content(message: &ChatMessage) -> WireContent<DashScopePart> {
    match &message.image_base64 {
        None => WireContent::Text(message.content.clone()),
        Some(_) => {
            let mut parts = Vec::new();
            if !message.content.trim().is_empty() {
                parts.push(DashScopePart::Text {
                    text: message.content.clone(),
                });
            }
            parts.push(DashScopePart::Image {
                image: data_url(message),
            });
            WireContent::Parts(parts)
        }
    }
}

/// Conversation order: system prompt, prior context, then the new user turn.
fn conversation<'a>(
    system_prompt: Option<&'a str>,
    context: &'a [ChatMessage],
    message: &'a ChatMessage,
    include_system: bool,
) -> Vec<MessageRef<'a>> {
    let mut out = Vec::with_capacity(context.len() + 2);
    if include_system {
        if let Some(prompt) = system_prompt {
            if !prompt.is_empty() {
                out.push(MessageRef::System(prompt));
            }
        }
    }
    for entry in context {
        if !include_system && entry.role == Role::System {
            continue;
        }
        out.push(MessageRef::Message(entry));
    }
    out.push(MessageRef::Message(message));
    out
}

enum MessageRef<'a> {
    System(&'a str),
    Message(&'a ChatMessage),
}

fn openai_body(
    provider: &ProviderSettings,
    system_prompt: Option<&str>,
    context: &[ChatMessage],
    message: &ChatMessage,
) -> serde_json::Value {
    let messages = conversation(system_prompt, context, message, true)
        .into_iter()
        .map(|entry| match entry {
            MessageRef::System(text) => WireMessage {
                role: "system",
                content: WireContent::Text(text.to_string()),
            },
            MessageRef::Message(m) => WireMessage {
                role: m.role.as_str(),
                content: openai_content(m),
            },
        })
        .collect();

    serde_json::to_value(OpenAiRequest {
        model: provider.model.clone(),
        messages,
        stream: true,
        max_tokens: MAX_TOKENS,
    })
    .unwrap_or_default()
}

fn anthropic_body(
    provider: &ProviderSettings,
    system_prompt: Option<&str>,
    context: &[ChatMessage],
    message: &ChatMessage,
) -> serde_json::Value {
    // System-role entries never appear in the messages array; the prompt moves
    // to the top-level `system` field.
    let messages = conversation(None, context, message, false)
        .into_iter()
        .filter_map(|entry| match entry {
            MessageRef::System(_) => None,
            MessageRef::Message(m) => Some(WireMessage {
                role: m.role.as_str(),
                content: anthropic_content(m),
            }),
        })
        .collect();

    serde_json::to_value(AnthropicRequest {
        model: provider.model.clone(),
        system: system_prompt
            .filter(|p| !p.is_empty())
            .map(|p| p.to_string()),
        messages,
        max_tokens: MAX_TOKENS,
        stream: true,
    })
    .unwrap_or_default()
}

fn dashscope_body(
    provider: &ProviderSettings,
    system_prompt: Option<&str>,
    context: &[ChatMessage],
    message: &ChatMessage,
) -> serde_json::Value {
    let messages = conversation(system_prompt, context, message, true)
        .into_iter()
        .map(|entry| match entry {
            MessageRef::System(text) => WireMessage {
                role: "system",
                content: WireContent::Text(text.to_string()),
            },
            MessageRef::Message(m) => WireMessage {
                role: m.role.as_str(),
                content: dashscope_content(m),
            },
        })
        .collect();

    serde_json::to_value(DashScopeRequest {
        model: provider.model.clone(),
        input: DashScopeInput { messages },
        parameters: DashScopeParameters {
            result_format: "message",
            incremental_output: true,
        },
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProviderKind;

    fn provider(kind: ProviderKind) -> ProviderSettings {
        ProviderSettings::new(kind, "https://api.example.com", "test-key", "test-model")
    }

    #[test]
    fn test_endpoints() {
        assert_eq!(
            endpoint(ProviderKind::OpenAiStyle, "https://api.example.com/v1/"),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            endpoint(ProviderKind::Anthropic, "https://api.anthropic.com/v1"),
            "https://api.anthropic.com/v1/messages"
        );
        assert_eq!(
            endpoint(ProviderKind::DashScope, "https://dashscope.example.com/api/v1/text-generation"),
            "https://dashscope.example.com/api/v1/text-generation"
        );
    }

    #[test]
    fn test_headers_per_dialect() {
        let openai = headers(ProviderKind::OpenAiStyle, "k1");
        assert_eq!(openai, vec![("authorization", "Bearer k1".to_string())]);

        let anthropic = headers(ProviderKind::Anthropic, "k2");
        assert!(anthropic.contains(&("x-api-key", "k2".to_string())));
        assert!(anthropic.contains(&("anthropic-version", ANTHROPIC_VERSION.to_string())));

        let dashscope = headers(ProviderKind::DashScope, "k3");
        assert!(dashscope.contains(&("X-DashScope-SSE", "enable".to_string())));
    }

    #[test]
    fn test_openai_body_shape() {
        let req = build_request(
            &provider(ProviderKind::OpenAiStyle),
            Some("你是学习助手"),
            &[ChatMessage::user("之前的问题")],
            &ChatMessage::user("新的问题"),
        );

        assert_eq!(req.body["model"], "test-model");
        assert_eq!(req.body["stream"], true);
        assert_eq!(req.body["max_tokens"], 4096);
        let messages = req.body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "你是学习助手");
        assert_eq!(messages[2]["content"], "新的问题");
    }

    #[test]
    fn test_anthropic_system_is_top_level() {
        let req = build_request(
            &provider(ProviderKind::Anthropic),
            Some("system prompt"),
            &[ChatMessage::system("stale system entry"), ChatMessage::user("q")],
            &ChatMessage::user("next"),
        );

        assert_eq!(req.body["system"], "system prompt");
        let messages = req.body["messages"].as_array().unwrap();
        // The stale system entry is excluded from the message array.
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m["role"] != "system"));
    }

    #[test]
    fn test_anthropic_image_block_order() {
        let msg = ChatMessage::user_with_image("图中写了什么", "QUJD", "image/jpeg");
        let req = build_request(&provider(ProviderKind::Anthropic), None, &[], &msg);

        let content = req.body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content[0]["type"], "image");
        assert_eq!(content[0]["source"]["type"], "base64");
        assert_eq!(content[0]["source"]["media_type"], "image/jpeg");
        assert_eq!(content[0]["source"]["data"], "QUJD");
        assert_eq!(content[1]["type"], "text");
    }

    #[test]
    fn test_openai_image_data_url() {
        let msg = ChatMessage::user_with_image("describe", "QUJD", "image/jpeg");
        let req = build_request(&provider(ProviderKind::OpenAiStyle), None, &[], &msg);

        let content = req.body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[1]["type"], "image_url");
        assert_eq!(
            content[1]["image_url"]["url"],
            "data:image/jpeg;base64,QUJD"
        );
    }

    #[test]
    fn test_blank_text_omitted_from_image_turn() {
        let msg = ChatMessage::user_with_image("   ", "QUJD", "image/png");
        let req = build_request(&provider(ProviderKind::DashScope), None, &[], &msg);

        let content = req.body["input"]["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 1);
        assert_eq!(content[0]["type"], "image");
        assert_eq!(content[0]["image"], "data:image/png;base64,QUJD");
    }

    #[test]
    fn test_dashscope_parameters() {
        let req = build_request(
            &provider(ProviderKind::DashScope),
            None,
            &[],
            &ChatMessage::user("hi"),
        );

        assert_eq!(req.body["parameters"]["result_format"], "message");
        assert_eq!(req.body["parameters"]["incremental_output"], true);
        assert!(req.body.get("stream").is_none());
    }
}
