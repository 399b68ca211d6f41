// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Raw content extraction for the index builder.
//!
//! Text files are read directly with a size cap. PDF pages are rasterized on
//! a blocking worker and handed to the async side one page at a time through
//! a bounded channel, so peak memory stays at a couple of rendered pages and
//! the pipeline cancels cleanly when the receiver is dropped.

use std::path::{Path, PathBuf};

use image::DynamicImage;
use pdfium_render::prelude::*;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::RagError;

/// Upper bound on characters read from a plain-text or Markdown file.
pub const MAX_TEXT_CHARS: usize = 1_000_000;

/// Events emitted by the PDF render worker, in page order.
#[derive(Debug)]
pub(crate) enum PdfRenderEvent {
    /// Sent once, before any page.
    DocumentOpened { page_count: u32 },
    /// One rasterized page, 1-based.
    Page { number: u32, image: Box<DynamicImage> },
    /// A page that failed to rasterize; treated as blank.
    PageFailed { number: u32 },
}

/// Read a UTF-8 text document, truncating at [`MAX_TEXT_CHARS`].
pub async fn read_text_file(path: &Path) -> Result<String, RagError> {
    let bytes = tokio::fs::read(path).await?;
    let text = String::from_utf8_lossy(&bytes);

    if text.chars().count() > MAX_TEXT_CHARS {
        warn!(
            path = %path.display(),
            limit = MAX_TEXT_CHARS,
            "Text document exceeds size cap, truncating"
        );
        return Ok(text.chars().take(MAX_TEXT_CHARS).collect());
    }

    Ok(text.into_owned())
}

/// Load a standalone image document.
pub async fn load_image(path: &Path) -> Result<DynamicImage, RagError> {
    let bytes = tokio::fs::read(path).await?;
    image::load_from_memory(&bytes).map_err(|e| RagError::Image(e.to_string()))
}

/// Start rasterizing a PDF on the blocking pool.
///
/// The returned receiver yields [`PdfRenderEvent::DocumentOpened`] first and
/// then one event per page. Fatal errors (missing pdfium library, unreadable
/// document) arrive as a single `Err` item. Dropping the receiver stops the
/// worker at the next page boundary.
pub(crate) fn spawn_pdf_renderer(path: PathBuf) -> mpsc::Receiver<Result<PdfRenderEvent, RagError>> {
    let (tx, rx) = mpsc::channel(2);

    tokio::task::spawn_blocking(move || render_pdf_pages(&path, &tx));

    rx
}

fn render_pdf_pages(path: &Path, tx: &mpsc::Sender<Result<PdfRenderEvent, RagError>>) {
    let bindings = match Pdfium::bind_to_system_library() {
        Ok(bindings) => bindings,
        Err(e) => {
            let _ = tx.blocking_send(Err(RagError::Pdf(format!(
                "pdfium library unavailable: {:?}",
                e
            ))));
            return;
        }
    };
    let pdfium = Pdfium::new(bindings);

    let document = match pdfium.load_pdf_from_file(path, None) {
        Ok(document) => document,
        Err(e) => {
            let _ = tx.blocking_send(Err(RagError::Pdf(format!(
                "failed to open {}: {:?}",
                path.display(),
                e
            ))));
            return;
        }
    };

    let pages = document.pages();
    let page_count = pages.len() as u32;
    if tx
        .blocking_send(Ok(PdfRenderEvent::DocumentOpened { page_count }))
        .is_err()
    {
        return;
    }

    // Cap the raster size up front; the OCR step applies the exact long-edge
    // clamp afterwards.
    let render_config = PdfRenderConfig::new()
        .set_target_width(1200)
        .set_maximum_height(1200);

    for (index, page) in pages.iter().enumerate() {
        let number = index as u32 + 1;

        let event = match page.render_with_config(&render_config) {
            Ok(bitmap) => PdfRenderEvent::Page {
                number,
                image: Box::new(bitmap.as_image()),
            },
            Err(e) => {
                warn!(page = number, err = ?e, "Failed to rasterize PDF page");
                PdfRenderEvent::PageFailed { number }
            }
        };

        if tx.blocking_send(Ok(event)).is_err() {
            // Receiver dropped: build cancelled or aborted.
            return;
        }
    }
}
