//! Error types for the pdf-transcriptor library.
//!
//! Three error types mirror the three scopes a failure can have:
//!
//! * [`TranscribeError`]: **Fatal for one document**: the document cannot be
//!   transcribed (bad input file, invalid page selection, engine missing,
//!   credentials rejected). Returned as `Err` from
//!   [`crate::transcribe::Transcriber::transcribe_document`]. In batch mode it
//!   is recorded against that document only and the batch moves on.
//!
//! * [`PageError`]: **Non-fatal**: a single page failed (render glitch,
//!   unreadable image, retries exhausted). Stored in the document job and
//!   rendered as a placeholder in the outputs so the page count never shrinks.
//!
//! * [`OcrError`]: the raw failure taxonomy an [`crate::engine::OcrBackend`]
//!   reports. The retry policy and the pipeline classify it into one of the
//!   two types above.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// All fatal errors for a single document.
#[derive(Debug, Error)]
pub enum TranscribeError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// PDF could not be opened by the rasteriser.
    #[error("PDF '{path}' could not be opened: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// The PDF opened but has no pages to transcribe.
    #[error("PDF '{path}' has no pages")]
    EmptyDocument { path: PathBuf },

    /// Batch mode found nothing to do.
    #[error("No PDF files found in '{dir}'")]
    NoDocuments { dir: PathBuf },

    /// The page-selection expression was rejected before any work started.
    #[error("Invalid page selection: {0}")]
    InvalidSelection(#[from] SelectionError),

    // ── Engine errors ─────────────────────────────────────────────────────
    /// OCR engine (binary, language data, rasteriser library or provider) is missing.
    #[error("OCR engine '{engine}' is unavailable: {detail}")]
    EngineUnavailable { engine: String, detail: String },

    /// The remote provider rejected the credentials.
    #[error("Authentication error from provider '{provider}': {detail}")]
    AuthError { provider: String, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TranscribeError {
    /// Promote a fatal backend error to a document-level error.
    ///
    /// Non-fatal kinds end up as [`TranscribeError::Internal`]; callers only
    /// promote errors for which [`OcrError::is_fatal`] holds.
    pub fn from_fatal(engine: &str, err: OcrError) -> Self {
        match err {
            OcrError::Auth(detail) => TranscribeError::AuthError {
                provider: engine.to_string(),
                detail,
            },
            OcrError::EngineUnavailable(detail) => TranscribeError::EngineUnavailable {
                engine: engine.to_string(),
                detail,
            },
            other => TranscribeError::Internal(other.to_string()),
        }
    }
}

/// Why a page-selection expression was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    /// A token is neither an integer nor an `a-b` range.
    #[error("'{token}' is not a page number or an a-b range")]
    InvalidToken { token: String },

    /// A page number lies outside `1..=total`.
    #[error("page {page} is out of range (document has {total} pages)")]
    OutOfRange { page: usize, total: usize },

    /// A range whose start is after its end.
    #[error("range {start}-{end} is reversed (start must be <= end)")]
    ReversedRange { start: usize, end: usize },

    /// "First N pages" with N = 0.
    #[error("the number of leading pages must be at least 1")]
    EmptyFirst,
}

/// Coarse failure class recorded in a failed page's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    EngineUnavailable,
    RecognitionFailed,
    RateLimited,
    Transient,
    Auth,
    InvalidResponse,
    Render,
}

/// Failure reported by an OCR backend for one `transcribe` call.
#[derive(Debug, Clone, Error)]
pub enum OcrError {
    /// Binary, language data or provider configuration missing. Aborts the run.
    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),

    /// The engine ran but could not read this page (corrupt image etc.).
    #[error("recognition failed: {0}")]
    RecognitionFailed(String),

    /// Provider answered 429; `retry_after` is the server hint when present.
    #[error("rate limited by provider{}", .retry_after.map(|d| format!(" (retry after {}s)", d.as_secs())).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    /// Network failure, timeout or 5xx.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Credentials rejected. Aborts the run.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Provider answered, but with something unusable.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl OcrError {
    /// `RateLimited` and `Transient` are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OcrError::RateLimited { .. } | OcrError::Transient(_))
    }

    /// `EngineUnavailable` and `Auth` abort the current document.
    pub fn is_fatal(&self) -> bool {
        matches!(self, OcrError::EngineUnavailable(_) | OcrError::Auth(_))
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            OcrError::EngineUnavailable(_) => FailureKind::EngineUnavailable,
            OcrError::RecognitionFailed(_) => FailureKind::RecognitionFailed,
            OcrError::RateLimited { .. } => FailureKind::RateLimited,
            OcrError::Transient(_) => FailureKind::Transient,
            OcrError::Auth(_) => FailureKind::Auth,
            OcrError::InvalidResponse(_) => FailureKind::InvalidResponse,
        }
    }
}

/// A non-fatal error for a single page.
///
/// Stored in [`crate::job::PageOutcome::Failed`]; the document continues and
/// the page shows up as a placeholder in both the page file and the merge.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum PageError {
    /// Page rasterisation or preprocessing failed.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// The engine could not recognise the page.
    #[error("Page {page}: recognition failed: {detail}")]
    RecognitionFailed { page: usize, detail: String },

    /// The remote engine returned an unusable response.
    #[error("Page {page}: invalid response: {detail}")]
    InvalidResponse { page: usize, detail: String },

    /// Every allowed attempt hit a retryable failure; `last` is the kind of the final one.
    #[error("Page {page}: gave up after {attempts} attempts: {detail}")]
    RetriesExhausted {
        page: usize,
        attempts: u32,
        last: FailureKind,
        detail: String,
    },
}

impl PageError {
    /// Classify a non-fatal backend error for `page` after `attempts` tries.
    pub fn from_ocr(page: usize, attempts: u32, err: &OcrError) -> Self {
        match err {
            OcrError::RecognitionFailed(detail) => PageError::RecognitionFailed {
                page,
                detail: detail.clone(),
            },
            OcrError::InvalidResponse(detail) => PageError::InvalidResponse {
                page,
                detail: detail.clone(),
            },
            other => PageError::RetriesExhausted {
                page,
                attempts,
                last: other.kind(),
                detail: other.to_string(),
            },
        }
    }

    pub fn page(&self) -> usize {
        match self {
            PageError::RenderFailed { page, .. }
            | PageError::RecognitionFailed { page, .. }
            | PageError::InvalidResponse { page, .. }
            | PageError::RetriesExhausted { page, .. } => *page,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            PageError::RenderFailed { .. } => FailureKind::Render,
            PageError::RecognitionFailed { .. } => FailureKind::RecognitionFailed,
            PageError::InvalidResponse { .. } => FailureKind::InvalidResponse,
            PageError::RetriesExhausted { last, .. } => *last,
        }
    }

    /// Short reason without the page prefix, used in placeholders.
    pub fn reason(&self) -> &str {
        match self {
            PageError::RenderFailed { detail, .. }
            | PageError::RecognitionFailed { detail, .. }
            | PageError::InvalidResponse { detail, .. }
            | PageError::RetriesExhausted { detail, .. } => detail,
        }
    }
}
