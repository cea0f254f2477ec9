//! # pdf-transcriptor
//!
//! Transcribe scanned PDF documents to text, page by page, with a local
//! Tesseract engine or a remote vision LLM.
//!
//! ## Why a pipeline crate?
//!
//! Scanned archives are long, and OCR is slow either way: Tesseract burns a
//! CPU core per page, a vision model spends seconds per request behind a
//! rate limit. This crate runs pages concurrently within a budget that
//! matches the engine, retries what is worth retrying, and still writes a
//! document whose pages are complete and in order, whatever order they
//! finished in.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Select      page expression → ascending page list
//!  ├─ 2. Budget      CPU count (local) or API tier (remote) → W workers
//!  ├─ 3. Render      pdfium, one page per task (spawn_blocking)
//!  ├─ 4. Preprocess  named filter recipe (binarize, remove-red, …)
//!  ├─ 5. Recognise   OcrBackend::transcribe under RetryPolicy
//!  ├─ 6. Record      page file written at once, first outcome wins
//!  └─ 7. Merge       header + pages in ascending order, exactly once
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf_transcriptor::{EngineKind, Transcriber, TranscriptionConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TranscriptionConfig::builder()
//!         .engine(EngineKind::Local)
//!         .language("spa")
//!         .pages("1-3,7".parse()?)
//!         .build()?;
//!     let transcriber = Transcriber::from_config(config)?;
//!     let summary = transcriber.transcribe_document(Path::new("acta.pdf")).await?;
//!     println!("{} pages -> {}", summary.succeeded, summary.merged_path.display());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `transcriptor` binary (clap + anyhow + tracing-subscriber + indicatif + dotenvy) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdf-transcriptor = { version = "0.3", default-features = false }
//! ```
//!
//! ## Choosing an Engine
//!
//! | Engine | Cost | Concurrency | Best for |
//! |--------|------|-------------|----------|
//! | `local` (Tesseract) | free | one worker per CPU | clean typewritten scans |
//! | `remote` (vision LLM) | per token | from the API tier | handwriting, stamps, faded copies |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod assembler;
pub mod concurrency;
pub mod config;
pub mod engine;
pub mod error;
pub mod job;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod retry;
pub mod selection;
pub mod transcribe;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use assembler::ResultAssembler;
pub use concurrency::{ApiTier, TierTable, WorkerPool, WorkerSetting};
pub use config::{TranscriptionConfig, TranscriptionConfigBuilder};
pub use engine::{EngineKind, ModelClass, OcrBackend, TesseractEngine, VisionEngine};
pub use error::{OcrError, PageError, SelectionError, TranscribeError};
pub use job::{DocumentJob, PageOutcome, PageResult, RecordStatus};
pub use output::{BatchSummary, DocumentSummary};
pub use pipeline::preprocess::PreprocessMode;
pub use progress::{ProgressCallback, TranscriptionProgress};
pub use retry::RetryPolicy;
pub use selection::PageSelection;
pub use transcribe::Transcriber;
