// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Index build pipeline.
//!
//! One builder drives one document through prepare → OCR → chunk → vectorize
//! → save, emitting progress at every transition and per-unit advance. Page
//! OCR failures are absorbed as blank pages; embedding failures abort the
//! build. A cancelled build leaves no index file behind.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::{DocumentDescriptor, DocumentType, SettingsProvider};
use crate::error::RagError;
use crate::rag::chunker::Chunker;
use crate::rag::embedding::EmbeddingRouter;
use crate::rag::extract::{self, PdfRenderEvent};
use crate::rag::ocr;
use crate::rag::store::IndexStore;
use crate::rag::types::{
    PageText, ProgressStage, RagIndexFile, RagIndexProgress, RagIndexResult, INDEX_FILE_VERSION,
};
use crate::tokens::estimate_tokens;
use crate::types::{ProviderKind, ProviderSettings};

/// Progress callback invoked synchronously from the builder's task. Must be
/// cheap: a build can emit hundreds of updates.
pub type ProgressCallback = Box<dyn Fn(RagIndexProgress) + Send + Sync>;

/// Borrowed form of [`ProgressCallback`] used inside the pipeline.
pub type ProgressFn = dyn Fn(RagIndexProgress) + Send + Sync;

/// Builds the index for one document at a time.
pub struct IndexBuilder {
    settings: Arc<dyn SettingsProvider>,
    store: IndexStore,
    data_dir: PathBuf,
    chunker: Chunker,
    cancelled: Arc<AtomicBool>,
}

impl IndexBuilder {
    pub fn new(settings: Arc<dyn SettingsProvider>, data_dir: &Path) -> Self {
        Self {
            settings,
            store: IndexStore::new(data_dir),
            data_dir: data_dir.to_path_buf(),
            chunker: Chunker::default(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation. The build aborts at its next suspension point
    /// and returns [`RagError::Cancelled`]; no index file is written.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// A handle that cancels this builder from another task.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    fn check_cancelled(&self) -> Result<(), RagError> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(RagError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run the full pipeline for `document`.
    ///
    /// Configuration and extraction problems surface as an `Error` progress
    /// event with a zero-chunk result; embedding and save failures abort with
    /// an error after emitting the same event.
    pub async fn build(
        &self,
        document: &DocumentDescriptor,
        on_progress: &ProgressFn,
    ) -> Result<RagIndexResult, RagError> {
        let doc_id = document.id.clone();
        info!(doc_id = %doc_id, name = %document.name, "Starting index build");

        emit(on_progress, ProgressStage::Preparing, 0, 0, "正在准备构建索引", 0, 0);

        let router = match EmbeddingRouter::resolve(self.settings.as_ref(), &self.data_dir).await {
            Ok(router) => router,
            Err(e) => {
                error!(doc_id = %doc_id, err = %e, "Embedding backend unresolved");
                emit(
                    on_progress,
                    ProgressStage::Error,
                    0,
                    0,
                    "嵌入模型未配置，请在设置中配置本地或远程嵌入服务",
                    0,
                    0,
                );
                return Ok(RagIndexResult::empty(doc_id));
            }
        };
        self.check_cancelled()?;

        // ── Extraction ───────────────────────────────────────────────────
        let mut ocr_tokens = 0u64;
        let pages = match self
            .extract_pages(document, on_progress, &mut ocr_tokens)
            .await
        {
            Ok(pages) => pages,
            Err(RagError::Cancelled) => return Err(RagError::Cancelled),
            Err(e) => {
                error!(doc_id = %doc_id, err = %e, "Document extraction failed");
                emit(
                    on_progress,
                    ProgressStage::Error,
                    0,
                    0,
                    format!("文档解析失败：{}", e),
                    ocr_tokens,
                    ocr_tokens,
                );
                return Ok(RagIndexResult::empty(doc_id));
            }
        };

        if pages.iter().all(|p| p.is_blank()) {
            warn!(doc_id = %doc_id, "Extraction produced no text");
            emit(
                on_progress,
                ProgressStage::Error,
                0,
                0,
                "未能识别出任何文字，请检查OCR配置或文件清晰度",
                ocr_tokens,
                ocr_tokens,
            );
            return Ok(RagIndexResult::empty(doc_id));
        }

        // ── Chunking ─────────────────────────────────────────────────────
        emit(
            on_progress,
            ProgressStage::Chunking,
            0,
            0,
            "正在分段处理文本",
            ocr_tokens,
            ocr_tokens,
        );
        let chunks = self.chunker.chunk_document(&doc_id, &pages);
        let embedding_tokens: u64 = chunks
            .iter()
            .map(|c| estimate_tokens(&c.text) as u64)
            .sum();
        let total_tokens = ocr_tokens + embedding_tokens;
        let chunk_total = chunks.len() as u32;

        // ── Vectorizing ──────────────────────────────────────────────────
        emit(
            on_progress,
            ProgressStage::Vectorizing,
            0,
            chunk_total,
            "正在生成向量",
            ocr_tokens,
            total_tokens,
        );

        let mut processed_tokens = ocr_tokens;
        let mut vectorized = Vec::with_capacity(chunks.len());
        for (i, mut chunk) in chunks.into_iter().enumerate() {
            self.check_cancelled()?;

            let label = chunk
                .page_start
                .map(|p| format!("第{}页", p))
                .unwrap_or_else(|| "全文".to_string());
            emit(
                on_progress,
                ProgressStage::Vectorizing,
                i as u32,
                chunk_total,
                format!("正在向量化 {} ({}/{})", label, i + 1, chunk_total),
                processed_tokens,
                total_tokens,
            );

            match router.embed_chunk(&chunk.text).await {
                Ok(vector) => chunk.vector = vector,
                Err(e) => {
                    error!(doc_id = %doc_id, chunk = %chunk.id, err = %e, "Chunk embedding failed");
                    emit(
                        on_progress,
                        ProgressStage::Error,
                        i as u32,
                        chunk_total,
                        format!("向量化失败：{}", e),
                        processed_tokens,
                        total_tokens,
                    );
                    return Err(e);
                }
            }

            processed_tokens += estimate_tokens(&chunk.text) as u64;
            vectorized.push(chunk);
        }

        // ── Saving ───────────────────────────────────────────────────────
        self.check_cancelled()?;
        emit(
            on_progress,
            ProgressStage::Saving,
            chunk_total,
            chunk_total,
            "正在保存索引文件",
            total_tokens,
            total_tokens,
        );

        let index = RagIndexFile {
            version: INDEX_FILE_VERSION,
            doc_id: doc_id.clone(),
            token_estimate: total_tokens,
            chunks: vectorized,
        };
        if let Err(e) = self.store.save(&index).await {
            error!(doc_id = %doc_id, err = %e, "Failed to save index file");
            emit(
                on_progress,
                ProgressStage::Error,
                chunk_total,
                chunk_total,
                "索引文件保存失败，原有索引已保留",
                total_tokens,
                total_tokens,
            );
            return Err(e);
        }

        emit(
            on_progress,
            ProgressStage::Completed,
            chunk_total,
            chunk_total,
            "索引构建完成",
            total_tokens,
            total_tokens,
        );
        info!(doc_id = %doc_id, chunks = chunk_total, tokens = total_tokens, "Index build complete");

        Ok(RagIndexResult {
            document_id: doc_id,
            chunk_count: chunk_total,
            estimated_tokens: total_tokens,
        })
    }

    /// Extract page text according to the document type.
    async fn extract_pages(
        &self,
        document: &DocumentDescriptor,
        on_progress: &ProgressFn,
        ocr_tokens: &mut u64,
    ) -> Result<Vec<PageText>, RagError> {
        match document.doc_type {
            DocumentType::Pdf => self.extract_pdf(document, on_progress, ocr_tokens).await,
            DocumentType::Image => self.extract_image(document, on_progress, ocr_tokens).await,
            DocumentType::PlainText | DocumentType::Markdown | DocumentType::Other => {
                let text = extract::read_text_file(&document.path).await?;
                let estimated_tokens = estimate_tokens(&text);
                Ok(vec![PageText {
                    page_number: None,
                    text,
                    estimated_tokens,
                }])
            }
        }
    }

    async fn extract_pdf(
        &self,
        document: &DocumentDescriptor,
        on_progress: &ProgressFn,
        ocr_tokens: &mut u64,
    ) -> Result<Vec<PageText>, RagError> {
        let vision = self.vision_settings();
        let mut rx = extract::spawn_pdf_renderer(document.path.clone());

        let mut pages = Vec::new();
        let mut total = 0u32;

        while let Some(event) = rx.recv().await {
            // Dropping `rx` on the error path stops the render worker.
            self.check_cancelled()?;

            match event {
                Ok(PdfRenderEvent::DocumentOpened { page_count }) => {
                    total = page_count;
                }
                Ok(PdfRenderEvent::Page { number, image }) => {
                    emit(
                        on_progress,
                        ProgressStage::Ocr,
                        number,
                        total,
                        format!("正在上传第 {}/{} 页图片进行OCR识别", number, total),
                        *ocr_tokens,
                        *ocr_tokens,
                    );

                    let label = format!("第 {} 页", number);
                    let text = ocr::ocr_page(&image, &label, &vision).await;
                    let estimated_tokens = estimate_tokens(&text);
                    *ocr_tokens += estimated_tokens as u64;

                    emit(
                        on_progress,
                        ProgressStage::Ocr,
                        number,
                        total,
                        format!("第 {}/{} 页识别完成", number, total),
                        *ocr_tokens,
                        *ocr_tokens,
                    );

                    pages.push(PageText {
                        page_number: Some(number),
                        text,
                        estimated_tokens,
                    });
                }
                Ok(PdfRenderEvent::PageFailed { number }) => {
                    // Tolerated: the page contributes no text.
                    pages.push(PageText {
                        page_number: Some(number),
                        text: String::new(),
                        estimated_tokens: 0,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        Ok(pages)
    }

    async fn extract_image(
        &self,
        document: &DocumentDescriptor,
        on_progress: &ProgressFn,
        ocr_tokens: &mut u64,
    ) -> Result<Vec<PageText>, RagError> {
        let vision = self.vision_settings();
        let image = extract::load_image(&document.path).await?;

        emit(
            on_progress,
            ProgressStage::Ocr,
            1,
            1,
            "正在上传图片进行OCR识别",
            0,
            0,
        );

        let text = ocr::ocr_page(&image, "图片", &vision).await;
        let estimated_tokens = estimate_tokens(&text);
        *ocr_tokens += estimated_tokens as u64;

        Ok(vec![PageText {
            page_number: None,
            text,
            estimated_tokens,
        }])
    }

    /// The configured vision provider, or an unconfigured placeholder whose
    /// requests surface as per-page OCR failures.
    fn vision_settings(&self) -> ProviderSettings {
        self.settings.vision_provider().unwrap_or_else(|| {
            let mut placeholder = ProviderSettings::new(ProviderKind::OpenAiStyle, "", "", "");
            placeholder.enabled = false;
            placeholder
        })
    }
}

fn emit(
    on_progress: &ProgressFn,
    stage: ProgressStage,
    current: u32,
    total: u32,
    message: impl Into<String>,
    processed_tokens: u64,
    estimated_tokens: u64,
) {
    on_progress(RagIndexProgress {
        stage,
        current,
        total,
        message: message.into(),
        processed_tokens,
        estimated_tokens,
    });
}
