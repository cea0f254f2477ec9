//! Output layout, Markdown formatting and run summaries.
//!
//! Each document gets its own directory `<out>/<stem>/` (`<out>` defaults
//! to `output`):
//!
//! ```text
//! <stem>.md               merged document (header + every page)
//! <stem>_clean.md         merged cleanup-pass text, when any page has one
//! pages/page_001.md       one file per requested page
//! pages/page_001_clean.md
//! ```
//!
//! Every file is written atomically (temp file + rename), so a reader never
//! observes a half-written page or merge.

use crate::error::{PageError, TranscribeError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where one document's files go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
    stem: String,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>, stem: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            stem: stem.into(),
        }
    }

    /// Layout for `pdf` under `output_dir` (default `output`).
    pub fn for_document(pdf: &Path, output_dir: Option<&Path>) -> Self {
        let stem = crate::pipeline::input::document_stem(pdf);
        let root = output_dir.unwrap_or(Path::new("output")).join(&stem);
        Self { root, stem }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn pages_dir(&self) -> PathBuf {
        self.root.join("pages")
    }

    pub fn page_path(&self, page: usize, clean: bool) -> PathBuf {
        let suffix = if clean { "_clean" } else { "" };
        self.pages_dir().join(format!("page_{page:03}{suffix}.md"))
    }

    pub fn merged_path(&self, clean: bool) -> PathBuf {
        let suffix = if clean { "_clean" } else { "" };
        self.root.join(format!("{}{suffix}.md", self.stem))
    }
}

// ── Formatting ──────────────────────────────────────────────────────────────

/// Contents of a single page file.
pub fn format_page_file(page: usize, text: &str) -> String {
    format!("## Page {page}\n\n{text}\n")
}

/// One page's section inside the merged document.
pub fn format_merged_page(page: usize, text: &str) -> String {
    format!("\n---\n\n## Page {page}\n\n{text}\n")
}

/// Text standing in for a page that has no transcription.
pub fn placeholder(err: &PageError) -> String {
    format!(
        "*[Page {} could not be transcribed: {}]*",
        err.page(),
        err.reason()
    )
}

/// Metadata shown in the merged document's notice block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentHeader {
    pub title: String,
    pub source_file: String,
    pub engine: String,
    pub language: String,
    pub dpi: u32,
    pub preprocess: String,
    pub reflow: bool,
}

impl DocumentHeader {
    pub fn render(&self) -> String {
        let reflow = if self.reflow {
            "\n> - **Text reflow:** Enabled (paragraphs reformatted)"
        } else {
            ""
        };
        format!(
            "# {title}\n\n---\n\n\
             > **NOTE:** This document was generated via OCR (Optical Character Recognition)\n\
             > from a scanned PDF. It may contain transcription errors.\n\
             > Refer to the original document for legal purposes.\n\
             >\n\
             > - **Source file:** {source}\n\
             > - **OCR Engine:** {engine}\n\
             > - **Language:** {language}\n\
             > - **DPI:** {dpi}\n\
             > - **Preprocessing:** {preprocess}{reflow}\n\n---\n\n",
            title = self.title,
            source = self.source_file,
            engine = self.engine,
            language = self.language,
            dpi = self.dpi,
            preprocess = self.preprocess,
        )
    }
}

/// `annual_report-2019` → `Annual Report 2019`.
pub fn humanize_title(stem: &str) -> String {
    stem.split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

// ── Writing ─────────────────────────────────────────────────────────────────

/// Write `contents` to `path` via a sibling temp file and a rename.
pub async fn write_atomic(path: &Path, contents: &str) -> Result<(), TranscribeError> {
    let fail = |source| TranscribeError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(fail)?;
    }
    let tmp_path = path.with_extension("md.tmp");
    tokio::fs::write(&tmp_path, contents).await.map_err(fail)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(fail)?;
    Ok(())
}

// ── Summaries ───────────────────────────────────────────────────────────────

/// Statistics for one transcribed document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub document: String,
    /// Pages in the PDF.
    pub total_pages: usize,
    /// Pages selected for transcription.
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failed_pages: Vec<usize>,
    /// Worker budget the document ran with.
    pub workers: usize,
    /// Highest number of pages observed in flight at once.
    pub peak_concurrency: usize,
    pub merged_path: PathBuf,
    pub clean_path: Option<PathBuf>,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub characters: usize,
    pub words: usize,
    pub duration_ms: u64,
}

/// Pages a document got through before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCounts {
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl PageCounts {
    /// Requested pages that were never recorded.
    pub fn not_reached(&self) -> usize {
        self.requested
            .saturating_sub(self.succeeded + self.failed)
    }
}

/// Terminal state of one document in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentStatus {
    Completed(DocumentSummary),
    /// `requested` is zero when the document stopped before selection.
    Failed {
        error: String,
        requested: usize,
        succeeded: usize,
        failed: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentReport {
    pub path: PathBuf,
    #[serde(flatten)]
    pub status: DocumentStatus,
}

/// Outcome of a batch, one report per input in input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub documents: Vec<DocumentReport>,
    pub duration_ms: u64,
}

impl BatchSummary {
    pub fn succeeded(&self) -> usize {
        self.documents
            .iter()
            .filter(|d| matches!(d.status, DocumentStatus::Completed(_)))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.documents.len() - self.succeeded()
    }

    /// True when there was at least one document and none completed.
    pub fn all_failed(&self) -> bool {
        !self.documents.is_empty() && self.succeeded() == 0
    }
}
