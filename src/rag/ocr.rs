// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Page OCR via a vision-capable chat provider.
//!
//! A page image is downscaled, JPEG-encoded, and sent to the configured
//! vision provider together with a prompt that asks for a faithful
//! transcription. The model marks logical section boundaries with the
//! [`SECTION_SENTINEL`](crate::rag::chunker::SECTION_SENTINEL); that sentinel
//! is the only channel by which OCR signals structure to the chunker.
//!
//! A page that fails OCR yields an empty string. Page failures never abort a
//! build.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView};
use tracing::{debug, warn};

use crate::error::RagError;
use crate::llm::LlmClient;
use crate::types::{ChatMessage, ProviderSettings, ResponseState};

/// Longest allowed edge of an uploaded page image, in pixels.
const MAX_PAGE_EDGE: u32 = 1200;

/// JPEG quality for page uploads.
const JPEG_QUALITY: u8 = 85;

/// Floor for the per-page output token budget.
const MIN_OUTPUT_TOKENS: u32 = 512;

/// Floor for the recommended output length.
const MIN_RECOMMENDED_TOKENS: u32 = 256;

/// System prompt for page transcription. The sentinel spelled out here must
/// match [`crate::rag::chunker::SECTION_SENTINEL`] exactly.
const OCR_SYSTEM_PROMPT: &str = "你是一个精确的OCR转写助手。请原样转写图片中的全部文字，保留段落结构，\
不要翻译、不要补全、不要添加任何说明。在每个逻辑章节结束处，另起一行输出字面标记 [[SECTION_END]]，\
除章节结束处外不得在任何位置输出该标记。";

/// Run OCR for one page image.
///
/// `label` is the human page label (for example "第 3 页") referenced in the
/// prompt and in logs. Returns the trimmed transcription, or an empty string
/// when the request fails.
pub async fn ocr_page(image: &DynamicImage, label: &str, vision: &ProviderSettings) -> String {
    let encoded = match encode_page_image(image) {
        Ok(encoded) => encoded,
        Err(e) => {
            warn!(label, err = %e, "Failed to encode page image for OCR");
            return String::new();
        }
    };

    let max_output_tokens = vision.max_context_tokens.max(MIN_OUTPUT_TOKENS);
    let recommended_tokens =
        (((max_output_tokens as f64) * 0.7) as u32).max(MIN_RECOMMENDED_TOKENS);

    let client = LlmClient::new();
    client.set_system_prompt(OCR_SYSTEM_PROMPT);

    let prompt = format!(
        "请转写{}的全部文字内容。输出长度建议控制在 {} 个 token 以内，最多不超过 {} 个 token。",
        label, recommended_tokens, max_output_tokens
    );
    let message = ChatMessage::user_with_image(prompt, encoded, "image/jpeg");

    match client.send_message(message, &[], vision).await {
        Ok(ResponseState::Success(text)) => {
            debug!(label, chars = text.len(), "OCR page complete");
            text.trim().to_string()
        }
        Ok(ResponseState::Error(message)) => {
            warn!(label, message = %message, "OCR page failed");
            String::new()
        }
        Ok(_) => String::new(),
        Err(e) => {
            warn!(label, err = %e, "OCR request rejected");
            String::new()
        }
    }
}

/// Downscale and encode a page image for upload.
///
/// The longer edge is capped at [`MAX_PAGE_EDGE`] preserving aspect ratio
/// with a 1 px floor per edge, then the image is JPEG-encoded at quality 85
/// and base64-encoded without line wrapping.
pub fn encode_page_image(image: &DynamicImage) -> Result<String, RagError> {
    let scaled = scale_to_fit(image, MAX_PAGE_EDGE);
    let rgb = scaled.to_rgb8();

    let mut jpeg = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY);
    encoder
        .encode(
            rgb.as_raw(),
            rgb.width(),
            rgb.height(),
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| RagError::Image(e.to_string()))?;

    Ok(BASE64.encode(&jpeg))
}

/// Scale so the longer edge is at most `max_edge`, preserving aspect ratio.
fn scale_to_fit(image: &DynamicImage, max_edge: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    let longest = width.max(height);
    if longest <= max_edge {
        return image.clone();
    }

    let scale = max_edge as f64 / longest as f64;
    let new_width = ((width as f64 * scale).round() as u32).max(1);
    let new_height = ((height as f64 * scale).round() as u32).max(1);

    image.resize_exact(new_width, new_height, image::imageops::FilterType::Triangle)
}
