//! Result assembler: per-page output as pages finish, one merge at the end.
//!
//! Page tasks call [`ResultAssembler::record`] in whatever order they finish.
//! The first outcome for a page is stored and its page file written; any
//! later outcome for the same page is ignored. The call that stores the last
//! missing page performs the merge, which walks the pages in ascending order
//! regardless of completion order.

use crate::error::TranscribeError;
use crate::job::{DocumentJob, PageOutcome, RecordStatus};
use crate::output::{self, OutputLayout};
use std::path::PathBuf;
use tracing::{debug, info};

/// Paths produced by the merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedOutput {
    pub merged: PathBuf,
    pub clean: Option<PathBuf>,
}

pub struct ResultAssembler {
    job: DocumentJob,
    layout: OutputLayout,
    header: String,
    merged: std::sync::OnceLock<MergedOutput>,
}

impl ResultAssembler {
    /// `header` is prepended verbatim to the merged documents.
    pub fn new(job: DocumentJob, layout: OutputLayout, header: impl Into<String>) -> Self {
        Self {
            job,
            layout,
            header: header.into(),
            merged: std::sync::OnceLock::new(),
        }
    }

    pub fn job(&self) -> &DocumentJob {
        &self.job
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Paths of the merged documents, once the merge has run.
    pub fn merged(&self) -> Option<&MergedOutput> {
        self.merged.get()
    }

    /// Store `outcome`, write its page file(s), and merge when it was the last page.
    ///
    /// An outcome for an already recorded page returns [`RecordStatus::Duplicate`]
    /// and writes nothing.
    pub async fn record(&self, outcome: PageOutcome) -> Result<RecordStatus, TranscribeError> {
        let page = outcome.page_num();
        let status = self
            .job
            .record(outcome)
            .map_err(|e| TranscribeError::Internal(e.to_string()))?;
        if status == RecordStatus::Duplicate {
            debug!(page, "ignoring duplicate outcome");
            return Ok(status);
        }

        if let Some(stored) = self.job.outcome(page) {
            self.write_page(stored).await?;
        }

        if status == RecordStatus::Completed {
            self.merge().await?;
        }
        Ok(status)
    }

    async fn write_page(&self, outcome: &PageOutcome) -> Result<(), TranscribeError> {
        let page = outcome.page_num();
        match outcome {
            PageOutcome::Transcribed(result) => {
                output::write_atomic(
                    &self.layout.page_path(page, false),
                    &output::format_page_file(page, &result.text),
                )
                .await?;
                if let Some(cleaned) = &result.cleaned {
                    output::write_atomic(
                        &self.layout.page_path(page, true),
                        &output::format_page_file(page, cleaned),
                    )
                    .await?;
                }
            }
            PageOutcome::Failed(err) => {
                output::write_atomic(
                    &self.layout.page_path(page, false),
                    &output::format_page_file(page, &output::placeholder(err)),
                )
                .await?;
            }
        }
        debug!(page, "page file written");
        Ok(())
    }

    async fn merge(&self) -> Result<(), TranscribeError> {
        let any_cleaned = self.job.ordered().any(|o| {
            matches!(o, PageOutcome::Transcribed(r) if r.cleaned.is_some())
        });

        let merged_path = self.layout.merged_path(false);
        output::write_atomic(&merged_path, &self.render_merged(false)).await?;

        let clean_path = if any_cleaned {
            let path = self.layout.merged_path(true);
            output::write_atomic(&path, &self.render_merged(true)).await?;
            Some(path)
        } else {
            None
        };

        info!(
            document = self.job.document_id(),
            pages = self.job.total_pages(),
            path = %merged_path.display(),
            "merged document written"
        );
        let _ = self.merged.set(MergedOutput {
            merged: merged_path,
            clean: clean_path,
        });
        Ok(())
    }

    /// Header followed by every page in ascending order. With `clean`, pages
    /// use their cleanup text when they have one.
    pub fn render_merged(&self, clean: bool) -> String {
        let mut doc = self.header.clone();
        for outcome in self.job.ordered() {
            let text = match outcome {
                PageOutcome::Transcribed(r) if clean => {
                    r.cleaned.clone().unwrap_or_else(|| r.text.clone())
                }
                PageOutcome::Transcribed(r) => r.text.clone(),
                PageOutcome::Failed(err) => output::placeholder(err),
            };
            doc.push_str(&output::format_merged_page(outcome.page_num(), &text));
        }
        doc
    }
}
