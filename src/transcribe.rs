//! Document and batch orchestration.
//!
//! ## Data flow for one document
//!
//! ```text
//! resolve ─▶ page_count ─▶ select ─▶ prepare ─▶ worker budget W
//!                                                    │
//!            ┌───────────── WorkerPool (≤ W) ────────┘
//!            ▼
//!   render ─▶ preprocess ─▶ RetryPolicy(transcribe) ─▶ clean_text ─▶ record
//! ```
//!
//! Everything before the pool is checked up front, so an invalid selection
//! or a missing engine fails the document before any page work starts.
//! Inside the pool, page-level failures become placeholders; a fatal engine
//! error or an output write failure raises the pool's halt signal, lets the
//! pages in flight finish, and fails the document.
//!
//! A batch runs documents one after another. A document failure is recorded
//! in the [`BatchSummary`] and the batch moves on.

use crate::assembler::ResultAssembler;
use crate::concurrency::{worker_budget, HaltSignal, WorkerPool};
use crate::config::TranscriptionConfig;
use crate::engine::{build_backend, OcrBackend, TranscribeOptions};
use crate::error::{PageError, TranscribeError};
use crate::job::{DocumentJob, PageOutcome, PageResult, PageTask};
use crate::output::{
    humanize_title, BatchSummary, DocumentHeader, DocumentReport, DocumentStatus,
    DocumentSummary, OutputLayout, PageCounts,
};
use crate::pipeline::preprocess::Preprocessor;
use crate::pipeline::render::{PdfiumRasterizer, Rasterizer};
use crate::pipeline::{input, postprocess};
use crate::progress::{NoopProgress, ProgressCallback};
use crate::retry::Retried;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Runs documents through rasteriser, preprocessing and an OCR backend.
pub struct Transcriber {
    config: TranscriptionConfig,
    backend: Arc<dyn OcrBackend>,
    rasterizer: Arc<dyn Rasterizer>,
    preprocessor: Preprocessor,
    progress: ProgressCallback,
}

/// Per-document state shared by that document's page tasks.
struct DocumentRun<'a> {
    pdf: &'a Path,
    options: &'a TranscribeOptions,
    assembler: &'a ResultAssembler,
    halt: HaltSignal,
}

impl Transcriber {
    /// Assemble a transcriber from explicit collaborators.
    pub fn new(
        config: TranscriptionConfig,
        backend: Arc<dyn OcrBackend>,
        rasterizer: Arc<dyn Rasterizer>,
    ) -> Self {
        let preprocessor = Preprocessor::new(config.preprocess, config.binarize_threshold);
        let progress = config
            .progress_callback
            .clone()
            .unwrap_or_else(|| Arc::new(NoopProgress));
        Self {
            config,
            backend,
            rasterizer,
            preprocessor,
            progress,
        }
    }

    /// Backend chosen by `config.engine`, pdfium for rendering.
    pub fn from_config(config: TranscriptionConfig) -> Result<Self, TranscribeError> {
        let backend = build_backend(&config)?;
        let rasterizer = Arc::new(PdfiumRasterizer::new(
            config.password.clone(),
            config.max_rendered_pixels,
        ));
        Ok(Self::new(config, backend, rasterizer))
    }

    pub fn config(&self) -> &TranscriptionConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn OcrBackend> {
        &self.backend
    }

    /// Transcribe one PDF into its output directory.
    ///
    /// Returns `Ok` even when some pages failed; those pages appear as
    /// placeholders and in [`DocumentSummary::failed_pages`].
    ///
    /// # Errors
    /// Input, selection, engine and output failures that make the document
    /// as a whole unusable.
    pub async fn transcribe_document(&self, pdf: &Path) -> Result<DocumentSummary, TranscribeError> {
        let mut counts = PageCounts::default();
        self.transcribe_counted(pdf, &mut counts).await
    }

    /// As [`Self::transcribe_document`], leaving in `counts` how far a failed
    /// document got.
    async fn transcribe_counted(
        &self,
        pdf: &Path,
        counts: &mut PageCounts,
    ) -> Result<DocumentSummary, TranscribeError> {
        let start = Instant::now();
        let pdf = input::resolve_local(pdf)?;
        let stem = input::document_stem(&pdf);
        info!("Starting transcription: {}", pdf.display());

        // ── Step 1: Page count and selection ─────────────────────────────────
        let total_pages = self.page_count(&pdf).await?;
        let pages = self.config.pages.select(total_pages)?;
        if pages.is_empty() {
            return Err(TranscribeError::EmptyDocument { path: pdf });
        }
        counts.requested = pages.len();
        info!(
            "{} has {} pages, {} selected ({})",
            stem,
            total_pages,
            pages.len(),
            self.config.pages
        );

        // ── Step 2: Engine check ─────────────────────────────────────────────
        let mut options = TranscribeOptions::from_config(&self.config);
        self.backend
            .prepare(&mut options)
            .await
            .map_err(|e| TranscribeError::from_fatal(&self.backend.name(), e))?;

        // ── Step 3: Worker budget ────────────────────────────────────────────
        let workers = worker_budget(
            self.backend.kind(),
            self.config.workers,
            &self.config.tier,
            &self.config.tier_table,
            pages.len(),
        );
        info!(
            "Engine: {} | language: {} | workers: {}",
            self.backend.name(),
            options.language,
            workers
        );
        self.progress.on_document_start(&stem, pages.len(), workers);

        // ── Step 4: Dispatch ─────────────────────────────────────────────────
        let layout = OutputLayout::for_document(&pdf, self.config.output_dir.as_deref());
        let header = self.header(&pdf, &stem, &options);
        let assembler = ResultAssembler::new(DocumentJob::new(stem.clone(), pages.clone()), layout, header);

        let pool = WorkerPool::new(workers);
        let run = DocumentRun {
            pdf: &pdf,
            options: &options,
            assembler: &assembler,
            halt: pool.halt_signal(),
        };
        let results = pool.run(pages, |page| self.run_page(&run, page)).await;

        if let Some(err) = results.into_iter().find_map(Result::err) {
            let job = assembler.job();
            counts.succeeded = job.succeeded();
            counts.failed = job.failed_pages().len();
            error!(
                "{}: transcription aborted after {} of {} pages: {}",
                stem,
                counts.succeeded + counts.failed,
                counts.requested,
                err
            );
            return Err(err);
        }

        // ── Step 5: Summary ──────────────────────────────────────────────────
        let job = assembler.job();
        let merged = assembler.merged().cloned().ok_or_else(|| {
            TranscribeError::Internal(format!(
                "{stem}: {} of {} pages recorded, merge never ran",
                job.completed_count(),
                job.total_pages()
            ))
        })?;

        let mut summary = DocumentSummary {
            document: stem.clone(),
            total_pages,
            requested: job.total_pages(),
            succeeded: job.succeeded(),
            failed_pages: job.failed_pages(),
            workers,
            peak_concurrency: pool.peak_running(),
            merged_path: merged.merged,
            clean_path: merged.clean,
            duration_ms: start.elapsed().as_millis() as u64,
            ..Default::default()
        };
        summary.failed = summary.failed_pages.len();
        for outcome in job.ordered() {
            if let PageOutcome::Transcribed(r) = outcome {
                let (chars, words) = postprocess::text_statistics(&r.text);
                summary.characters += chars;
                summary.words += words;
                summary.input_tokens += r.metadata.input_tokens;
                summary.output_tokens += r.metadata.output_tokens;
            }
        }

        if summary.failed > 0 {
            warn!(
                "{}: {} of {} pages failed: {:?}",
                stem, summary.failed, summary.requested, summary.failed_pages
            );
        }
        info!(
            "{}: {} pages transcribed in {}ms -> {}",
            stem,
            summary.succeeded,
            summary.duration_ms,
            summary.merged_path.display()
        );
        self.progress
            .on_document_complete(&stem, summary.succeeded, summary.failed);
        Ok(summary)
    }

    /// Transcribe `pdfs` one after another, isolating failures per document.
    pub async fn transcribe_batch(&self, pdfs: &[PathBuf]) -> BatchSummary {
        let start = Instant::now();
        let mut documents = Vec::with_capacity(pdfs.len());
        for (i, pdf) in pdfs.iter().enumerate() {
            info!("Document {}/{}: {}", i + 1, pdfs.len(), pdf.display());
            let mut counts = PageCounts::default();
            let status = match self.transcribe_counted(pdf, &mut counts).await {
                Ok(summary) => DocumentStatus::Completed(summary),
                Err(e) => {
                    error!("{}: {}", pdf.display(), e);
                    DocumentStatus::Failed {
                        error: e.to_string(),
                        requested: counts.requested,
                        succeeded: counts.succeeded,
                        failed: counts.failed,
                    }
                }
            };
            documents.push(DocumentReport {
                path: pdf.clone(),
                status,
            });
        }
        let summary = BatchSummary {
            documents,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "Batch finished: {} succeeded, {} failed",
            summary.succeeded(),
            summary.failed()
        );
        summary
    }

    // ── Page task ────────────────────────────────────────────────────────────

    /// One page from render to record. `Err` only for document-fatal errors.
    async fn run_page(&self, run: &DocumentRun<'_>, page: usize) -> Result<(), TranscribeError> {
        let mut task = PageTask::new(page);
        task.start();
        self.progress.on_page_start(page);
        debug!(page, "page started");

        let outcome = match self.render(run.pdf, page).await {
            Ok(image) => match self.recognise(&image, run.options, page).await {
                Ok(outcome) => outcome,
                Err(fatal) => {
                    run.halt.halt();
                    return Err(fatal);
                }
            },
            Err(err) => PageOutcome::Failed(err),
        };

        match &outcome {
            PageOutcome::Transcribed(r) => {
                task.succeed();
                self.progress.on_page_complete(page, r.text.chars().count());
            }
            PageOutcome::Failed(err) => {
                task.fail(err.kind(), attempts_of(err));
                warn!("{}", err);
                self.progress.on_page_error(page, err.reason());
            }
        }
        debug!(page, status = ?task.status, "page finished");

        if let Err(e) = run.assembler.record(outcome).await {
            run.halt.halt();
            return Err(e);
        }
        Ok(())
    }

    async fn render(&self, pdf: &Path, page: usize) -> Result<DynamicImage, PageError> {
        let rasterizer = Arc::clone(&self.rasterizer);
        let preprocessor = self.preprocessor;
        let pdf = pdf.to_path_buf();
        let dpi = self.config.dpi;
        tokio::task::spawn_blocking(move || {
            rasterizer
                .render_page(&pdf, page, dpi)
                .map(|img| preprocessor.apply(img))
        })
        .await
        .map_err(|e| PageError::RenderFailed {
            page,
            detail: format!("render task panicked: {e}"),
        })?
    }

    /// Backend call under the retry policy. Fatal backend errors come back as `Err`.
    async fn recognise(
        &self,
        image: &DynamicImage,
        options: &TranscribeOptions,
        page: usize,
    ) -> Result<PageOutcome, TranscribeError> {
        let backend = &self.backend;
        let progress = &self.progress;
        let result = self
            .config
            .retry
            .run(page, move |attempt| {
                if attempt > 1 {
                    progress.on_page_retry(page, attempt);
                }
                backend.transcribe(image, options)
            })
            .await;

        match result {
            Ok(Retried { value, attempts }) => {
                let text = postprocess::clean_text(&value.text);
                if text.is_empty() {
                    return Ok(PageOutcome::Failed(PageError::RecognitionFailed {
                        page,
                        detail: "no text recognised".to_string(),
                    }));
                }
                if attempts > 1 {
                    debug!(page, attempts, "page recovered after retries");
                }
                let cleaned = value
                    .cleaned
                    .map(|c| postprocess::clean_text(&c))
                    .filter(|c| !c.is_empty());
                Ok(PageOutcome::Transcribed(PageResult {
                    page_num: page,
                    text,
                    cleaned,
                    metadata: value.metadata,
                }))
            }
            Err(failure) if failure.error.is_fatal() => {
                error!("Page {}: fatal engine error: {}", page, failure.error);
                Err(TranscribeError::from_fatal(&backend.name(), failure.error))
            }
            Err(failure) => Ok(PageOutcome::Failed(PageError::from_ocr(
                page,
                failure.attempts,
                &failure.error,
            ))),
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    async fn page_count(&self, pdf: &Path) -> Result<usize, TranscribeError> {
        let rasterizer = Arc::clone(&self.rasterizer);
        let path = pdf.to_path_buf();
        tokio::task::spawn_blocking(move || rasterizer.page_count(&path))
            .await
            .map_err(|e| TranscribeError::Internal(format!("page count task panicked: {e}")))?
    }

    fn header(&self, pdf: &Path, stem: &str, options: &TranscribeOptions) -> String {
        DocumentHeader {
            title: self
                .config
                .title
                .clone()
                .unwrap_or_else(|| humanize_title(stem)),
            source_file: pdf
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| stem.to_string()),
            engine: self.backend.name(),
            language: options.language.clone(),
            dpi: self.config.dpi,
            preprocess: self.config.preprocess.to_string(),
            reflow: options.reflow,
        }
        .render()
    }
}

fn attempts_of(err: &PageError) -> u32 {
    match err {
        PageError::RetriesExhausted { attempts, .. } => *attempts,
        PageError::RenderFailed { .. } => 0,
        _ => 1,
    }
}
