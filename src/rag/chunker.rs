// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Sectioning and chunking of extracted page text.
//!
//! Page text is first split into sections at the OCR sentinel, then each
//! section is cut into overlapping windows. All offsets are character
//! offsets, never bytes: study documents are predominantly CJK.

use crate::rag::types::{PageText, RagChunk, SectionText};

/// Literal sentinel the OCR prompt asks the vision model to emit at the end
/// of every logical section. The only channel for section boundaries.
pub const SECTION_SENTINEL: &str = "[[SECTION_END]]";

/// Configuration for the chunker.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Maximum characters per chunk.
    pub max_chars: usize,
    /// Characters of overlap between consecutive chunks.
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chars: 800,
            overlap: 120,
        }
    }
}

/// Sentinel-aware text chunker.
pub struct Chunker {
    config: ChunkerConfig,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Chunk a whole document: section the pages, then window each section.
    ///
    /// Chunk ids are assigned by zero-based ordinal across the document;
    /// vectors are left empty for the vectorizing stage to fill.
    pub fn chunk_document(&self, doc_id: &str, pages: &[PageText]) -> Vec<RagChunk> {
        let mut chunks = Vec::new();
        let mut ordinal = 0usize;

        for section in split_sections(pages) {
            for text in self.chunk_section(&section.text) {
                chunks.push(RagChunk {
                    id: RagChunk::make_id(doc_id, ordinal),
                    doc_id: doc_id.to_string(),
                    text,
                    page_start: section.page_start,
                    page_end: section.page_end,
                    vector: Vec::new(),
                });
                ordinal += 1;
            }
        }

        chunks
    }

    /// Split one section's trimmed text into overlapping windows.
    ///
    /// Each window ends at `start + max_chars`, pulled back to the last line
    /// break in the back half of the window when one exists. The next window
    /// starts `overlap` characters before the previous end.
    pub fn chunk_section(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.trim().chars().collect();
        let len = chars.len();
        if len == 0 {
            return Vec::new();
        }

        let mut out = Vec::new();
        let mut start = 0usize;

        loop {
            let mut end = (start + self.config.max_chars).min(len);

            if end < len {
                // Prefer breaking at a line boundary inside the back half of
                // the window.
                let floor = start + self.config.max_chars / 2;
                if let Some(pos) = (floor + 1..end).rev().find(|&i| chars[i] == '\n') {
                    end = pos;
                }
            }

            let piece: String = chars[start..end].iter().collect();
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }

            if end == len {
                break;
            }
            start = end.saturating_sub(self.config.overlap);
        }

        out
    }
}

/// Split page text into sections at the sentinel.
///
/// Lines are consumed in page order; within each line, splits happen at every
/// sentinel occurrence. Fragments accumulate into a live buffer joined by
/// `\n`. A section's page span covers the first through last page that
/// contributed non-blank text to it.
pub fn split_sections(pages: &[PageText]) -> Vec<SectionText> {
    let mut sections = Vec::new();
    let mut buffer: Vec<String> = Vec::new();
    let mut page_start: Option<u32> = None;
    let mut page_end: Option<u32> = None;

    let flush =
        |buffer: &mut Vec<String>, page_start: &mut Option<u32>, page_end: &mut Option<u32>,
         sections: &mut Vec<SectionText>| {
            let joined = buffer.join("\n");
            let trimmed = joined.trim();
            if !trimmed.is_empty() {
                sections.push(SectionText {
                    text: trimmed.to_string(),
                    page_start: *page_start,
                    page_end: *page_end,
                });
            }
            buffer.clear();
            *page_start = None;
            *page_end = None;
        };

    for page in pages {
        for line in page.text.lines() {
            let mut fragments = line.split(SECTION_SENTINEL);

            // The first fragment extends the current section; every later
            // fragment follows a sentinel and opens a new one.
            if let Some(first) = fragments.next() {
                push_fragment(first, page, &mut buffer, &mut page_start, &mut page_end);
            }
            for fragment in fragments {
                flush(&mut buffer, &mut page_start, &mut page_end, &mut sections);
                push_fragment(fragment, page, &mut buffer, &mut page_start, &mut page_end);
            }
        }
    }

    flush(&mut buffer, &mut page_start, &mut page_end, &mut sections);
    sections
}

fn push_fragment(
    fragment: &str,
    page: &PageText,
    buffer: &mut Vec<String>,
    page_start: &mut Option<u32>,
    page_end: &mut Option<u32>,
) {
    buffer.push(fragment.to_string());
    if !fragment.trim().is_empty() {
        if let Some(number) = page.page_number {
            if page_start.is_none() {
                *page_start = Some(number);
            }
            *page_end = Some(number);
        }
    }
}
