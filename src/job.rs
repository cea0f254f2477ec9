//! Per-document job state shared by concurrently running page tasks.
//!
//! ## Concurrency discipline
//!
//! Each requested page owns one slot in [`DocumentJob`]. A slot is a
//! `OnceLock`, so the first outcome recorded for a page wins and later ones
//! are rejected without any lock over unrelated pages. The only shared
//! counter is `completed`: the task whose increment reaches the number of
//! requested pages, and only that task, sees [`RecordStatus::Completed`] and
//! performs the merge.

use crate::engine::EngineMetadata;
use crate::error::{FailureKind, PageError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

/// Lifecycle of a single page task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageStatus {
    Pending,
    Running,
    Succeeded,
    Failed { kind: FailureKind, attempts: u32 },
}

impl PageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PageStatus::Succeeded | PageStatus::Failed { .. })
    }
}

/// One unit of scheduled work, owned by the worker executing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTask {
    pub page_num: usize,
    pub status: PageStatus,
}

impl PageTask {
    pub fn new(page_num: usize) -> Self {
        Self {
            page_num,
            status: PageStatus::Pending,
        }
    }

    pub fn start(&mut self) {
        if self.status == PageStatus::Pending {
            self.status = PageStatus::Running;
        }
    }

    pub fn succeed(&mut self) {
        if !self.status.is_terminal() {
            self.status = PageStatus::Succeeded;
        }
    }

    pub fn fail(&mut self, kind: FailureKind, attempts: u32) {
        if !self.status.is_terminal() {
            self.status = PageStatus::Failed { kind, attempts };
        }
    }
}

/// Text produced for one page. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    pub page_num: usize,
    pub text: String,
    /// Cleanup-pass text, when the engine produced one.
    pub cleaned: Option<String>,
    pub metadata: EngineMetadata,
}

/// Terminal outcome of a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PageOutcome {
    Transcribed(PageResult),
    Failed(PageError),
}

impl PageOutcome {
    pub fn page_num(&self) -> usize {
        match self {
            PageOutcome::Transcribed(r) => r.page_num,
            PageOutcome::Failed(e) => e.page(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PageOutcome::Transcribed(_))
    }
}

/// Result of [`DocumentJob::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    /// The page already had an outcome; this one was ignored.
    Duplicate,
    /// Stored; `completed` pages now have an outcome.
    Recorded { completed: usize },
    /// Stored, and this was the last missing page. Returned exactly once.
    Completed,
}

/// The page was not part of the requested selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("page {0} was not requested for this document")]
pub struct UnknownPage(pub usize);

/// Results of one document, keyed by page number.
#[derive(Debug)]
pub struct DocumentJob {
    document_id: String,
    /// Ascending requested pages; `slots[i]` belongs to `requested[i]`.
    requested: Vec<usize>,
    slots: Vec<OnceLock<PageOutcome>>,
    completed: AtomicUsize,
}

impl DocumentJob {
    /// `requested` must be ascending and deduplicated (as produced by page selection).
    pub fn new(document_id: impl Into<String>, requested: Vec<usize>) -> Self {
        let slots = requested.iter().map(|_| OnceLock::new()).collect();
        Self {
            document_id: document_id.into(),
            requested,
            slots,
            completed: AtomicUsize::new(0),
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn requested(&self) -> &[usize] {
        &self.requested
    }

    pub fn total_pages(&self) -> usize {
        self.requested.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        self.completed_count() == self.total_pages()
    }

    /// Store the outcome for its page if none is stored yet.
    pub fn record(&self, outcome: PageOutcome) -> Result<RecordStatus, UnknownPage> {
        let page = outcome.page_num();
        let slot = self
            .requested
            .binary_search(&page)
            .map(|i| &self.slots[i])
            .map_err(|_| UnknownPage(page))?;

        if slot.set(outcome).is_err() {
            return Ok(RecordStatus::Duplicate);
        }
        let completed = self.completed.fetch_add(1, Ordering::AcqRel) + 1;
        if completed == self.total_pages() {
            Ok(RecordStatus::Completed)
        } else {
            Ok(RecordStatus::Recorded { completed })
        }
    }

    pub fn outcome(&self, page: usize) -> Option<&PageOutcome> {
        let i = self.requested.binary_search(&page).ok()?;
        self.slots[i].get()
    }

    /// Recorded outcomes in ascending page order.
    pub fn ordered(&self) -> impl Iterator<Item = &PageOutcome> {
        self.slots.iter().filter_map(OnceLock::get)
    }

    pub fn succeeded(&self) -> usize {
        self.ordered().filter(|o| o.is_success()).count()
    }

    pub fn failed_pages(&self) -> Vec<usize> {
        self.ordered()
            .filter(|o| !o.is_success())
            .map(PageOutcome::page_num)
            .collect()
    }
}
