//! Pipeline tests for pdf-transcriptor.
//!
//! These drive [`Transcriber`] end to end with an in-memory rasteriser and a
//! scripted backend, so they need neither pdfium, tesseract nor network.
//!
//! The rasteriser paints the document marker and page number into pixel
//! (0, 0); the backend reads them back to decide how to answer.

use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use pdf_transcriptor::concurrency::WorkerSetting;
use pdf_transcriptor::engine::{EngineKind, OcrBackend, TranscribeOptions, Transcription};
use pdf_transcriptor::output::DocumentStatus;
use pdf_transcriptor::pipeline::render::Rasterizer;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use pdf_transcriptor::{
    OcrError, PageError, PageSelection, RetryPolicy, TranscribeError, Transcriber,
    TranscriptionConfig, TranscriptionProgress,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

// ── Test doubles ──────────────────────────────────────────────────────────────

/// Page counts and markers per file stem.
struct FakeRasterizer {
    documents: HashMap<String, (u8, usize)>,
}

impl FakeRasterizer {
    fn new(documents: &[(&str, u8, usize)]) -> Arc<Self> {
        Arc::new(Self {
            documents: documents
                .iter()
                .map(|(stem, marker, pages)| (stem.to_string(), (*marker, *pages)))
                .collect(),
        })
    }

    fn lookup(&self, pdf: &Path) -> Option<(u8, usize)> {
        let stem = pdf.file_stem()?.to_string_lossy().into_owned();
        self.documents.get(&stem).copied()
    }
}

impl Rasterizer for FakeRasterizer {
    fn page_count(&self, pdf: &Path) -> Result<usize, TranscribeError> {
        self.lookup(pdf)
            .map(|(_, pages)| pages)
            .ok_or_else(|| TranscribeError::CorruptPdf {
                path: pdf.to_path_buf(),
                detail: "unknown test document".into(),
            })
    }

    fn render_page(&self, pdf: &Path, page: usize, _dpi: u32) -> Result<DynamicImage, PageError> {
        let (marker, _) = self.lookup(pdf).ok_or(PageError::RenderFailed {
            page,
            detail: "unknown test document".into(),
        })?;
        let img = RgbImage::from_pixel(2, 2, Rgb([page as u8, marker, 0]));
        Ok(DynamicImage::ImageRgb8(img))
    }
}

type Script = dyn Fn(u8, usize, u32) -> Result<String, OcrError> + Send + Sync;

/// Backend answering from a script and recording what it saw.
struct ScriptedBackend {
    kind: EngineKind,
    script: Box<Script>,
    delay: Box<dyn Fn(usize) -> Duration + Send + Sync>,
    cleanup: bool,
    prepare_error: Option<OcrError>,
    attempts: Mutex<HashMap<(u8, usize), u32>>,
    running: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    fn new(
        script: impl Fn(u8, usize, u32) -> Result<String, OcrError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind: EngineKind::Remote,
            script: Box::new(script),
            delay: Box::new(|_| Duration::from_millis(2)),
            cleanup: false,
            prepare_error: None,
            attempts: Mutex::new(HashMap::new()),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    fn echo() -> Self {
        Self::new(|_, page, _| Ok(format!("text of page {page}\x0c")))
    }

    fn with_delay(mut self, delay: impl Fn(usize) -> Duration + Send + Sync + 'static) -> Self {
        self.delay = Box::new(delay);
        self
    }

    fn attempts(&self, marker: u8, page: usize) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(&(marker, page))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl OcrBackend for ScriptedBackend {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    fn name(&self) -> String {
        "scripted".to_string()
    }

    async fn prepare(&self, _options: &mut TranscribeOptions) -> Result<(), OcrError> {
        match &self.prepare_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn transcribe(
        &self,
        image: &DynamicImage,
        _options: &TranscribeOptions,
    ) -> Result<Transcription, OcrError> {
        let px = *image.to_rgb8().get_pixel(0, 0);
        let (page, marker) = (px[0] as usize, px[1]);
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry((marker, page)).or_insert(0);
            *n += 1;
            *n
        };
        self.calls.fetch_add(1, Ordering::SeqCst);

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep((self.delay)(page)).await;
        self.running.fetch_sub(1, Ordering::SeqCst);

        let text = (self.script)(marker, page, attempt)?;
        Ok(Transcription {
            cleaned: self.cleanup.then(|| format!("clean text of page {page}")),
            text,
            ..Default::default()
        })
    }
}

#[derive(Default)]
struct CountingProgress {
    started: AtomicUsize,
    completed: AtomicUsize,
    errors: AtomicUsize,
    retries: AtomicUsize,
    documents: AtomicUsize,
}

impl TranscriptionProgress for CountingProgress {
    fn on_page_start(&self, _page: usize) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_page_retry(&self, _page: usize, _attempt: u32) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }
    fn on_page_complete(&self, _page: usize, _chars: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_page_error(&self, _page: usize, _error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
    fn on_document_complete(&self, _document: &str, _succeeded: usize, _failed: usize) {
        self.documents.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn fake_pdf(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"%PDF-1.4\n% test fixture\n").unwrap();
    path
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        jitter: false,
    }
}

fn config(out: &Path, workers: usize) -> TranscriptionConfig {
    TranscriptionConfig::builder()
        .engine(EngineKind::Remote)
        .workers(WorkerSetting::Fixed(workers))
        .retry(fast_retry(3))
        .output_dir(out)
        .build()
        .unwrap()
}

fn transcriber(
    config: TranscriptionConfig,
    backend: &Arc<ScriptedBackend>,
    rasterizer: Arc<FakeRasterizer>,
) -> Transcriber {
    Transcriber::new(config, backend.clone(), rasterizer)
}

fn page_positions(merged: &str, pages: usize) -> Vec<usize> {
    (1..=pages)
        .map(|p| {
            merged
                .find(&format!("## Page {p}\n"))
                .unwrap_or_else(|| panic!("page {p} missing from merged output"))
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn failed_page_keeps_its_place_in_the_merge() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let pdf = fake_pdf(input.path(), "acta.pdf");
    let backend = Arc::new(ScriptedBackend::new(|_, page, _| {
        if page == 3 {
            Err(OcrError::InvalidResponse("refused to transcribe".into()))
        } else {
            Ok(format!("text of page {page}"))
        }
    }));
    let t = transcriber(
        config(out.path(), 4),
        &backend,
        FakeRasterizer::new(&[("acta", 1, 5)]),
    );

    let summary = assert_ok!(t.transcribe_document(&pdf).await);
    assert_eq!(summary.requested, 5);
    assert_eq!(summary.succeeded, 4);
    assert_eq!(summary.failed_pages, vec![3]);
    // invalid responses are not retried
    assert_eq!(backend.attempts(1, 3), 1);

    let merged = std::fs::read_to_string(&summary.merged_path).unwrap();
    let positions = page_positions(&merged, 5);
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
    assert!(merged.contains("Page 3 could not be transcribed: refused to transcribe"));
    for p in [1, 2, 4, 5] {
        assert!(merged.contains(&format!("text of page {p}")));
    }
    assert!(out.path().join("acta/pages/page_003.md").exists());
}

#[tokio::test]
async fn merge_order_ignores_completion_order() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let pdf = fake_pdf(input.path(), "ledger.pdf");
    // later pages finish first
    let backend = Arc::new(
        ScriptedBackend::echo().with_delay(|page| Duration::from_millis(5 * (9 - page as u64))),
    );
    let t = transcriber(
        config(out.path(), 8),
        &backend,
        FakeRasterizer::new(&[("ledger", 1, 8)]),
    );

    let summary = assert_ok!(t.transcribe_document(&pdf).await);
    assert_eq!(summary.succeeded, 8);
    let merged = std::fs::read_to_string(&summary.merged_path).unwrap();
    let positions = page_positions(&merged, 8);
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "{positions:?}");
    // form feeds from the engine are cleaned away
    assert!(!merged.contains('\x0c'));
    assert!(merged.starts_with("# Ledger\n"));
}

#[tokio::test]
async fn merge_order_holds_for_shuffled_completion() {
    for seed in [1u64, 7, 42, 1234, 9001] {
        let input = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let pdf = fake_pdf(input.path(), "minutes.pdf");
        let mut finish_rank: Vec<u64> = (0..10).collect();
        finish_rank.shuffle(&mut StdRng::seed_from_u64(seed));
        let backend = Arc::new(ScriptedBackend::echo().with_delay(move |page| {
            Duration::from_millis(1 + 4 * finish_rank[page - 1])
        }));
        let t = transcriber(
            config(out.path(), 10),
            &backend,
            FakeRasterizer::new(&[("minutes", 1, 10)]),
        );

        let summary = assert_ok!(t.transcribe_document(&pdf).await);
        assert_eq!(summary.succeeded, 10, "seed {seed}");
        let merged = std::fs::read_to_string(&summary.merged_path).unwrap();
        let positions = page_positions(&merged, 10);
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "seed {seed}: {positions:?}");
        assert_eq!(merged.matches("## Page ").count(), 10, "seed {seed}");
    }
}

#[tokio::test]
async fn running_pages_never_exceed_the_budget() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let pdf = fake_pdf(input.path(), "big.pdf");
    let backend = Arc::new(
        ScriptedBackend::echo().with_delay(|page| Duration::from_millis(3 + (page % 4) as u64 * 2)),
    );
    let t = transcriber(
        config(out.path(), 3),
        &backend,
        FakeRasterizer::new(&[("big", 1, 20)]),
    );

    let summary = assert_ok!(t.transcribe_document(&pdf).await);
    assert_eq!(summary.workers, 3);
    assert_eq!(summary.succeeded, 20);
    assert!(backend.peak.load(Ordering::SeqCst) <= 3);
    assert!(summary.peak_concurrency <= 3);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 20);
}

#[tokio::test]
async fn remote_budget_follows_the_tier() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let pdf = fake_pdf(input.path(), "tiered.pdf");
    let backend = Arc::new(ScriptedBackend::echo());
    let config = TranscriptionConfig::builder()
        .engine(EngineKind::Remote)
        .tier("1")
        .retry(fast_retry(3))
        .output_dir(out.path())
        .build()
        .unwrap();
    let t = transcriber(config, &backend, FakeRasterizer::new(&[("tiered", 1, 30)]));

    let summary = assert_ok!(t.transcribe_document(&pdf).await);
    // 50 rpm: floor(50 / 60 × 20 × 0.8) = 13
    assert_eq!(summary.workers, 13);
    assert!(backend.peak.load(Ordering::SeqCst) <= 13);
}

#[tokio::test]
async fn transient_page_is_tried_max_attempts_times() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let pdf = fake_pdf(input.path(), "flaky.pdf");
    let backend = Arc::new(ScriptedBackend::new(|_, page, _| {
        if page == 2 {
            Err(OcrError::Transient("503 service unavailable".into()))
        } else {
            Ok(format!("text of page {page}"))
        }
    }));
    let progress = Arc::new(CountingProgress::default());
    let mut config = config(out.path(), 2);
    config.progress_callback = Some(progress.clone());
    let t = transcriber(config, &backend, FakeRasterizer::new(&[("flaky", 1, 4)]));

    let summary = assert_ok!(t.transcribe_document(&pdf).await);
    assert_eq!(backend.attempts(1, 2), 3);
    assert_eq!(summary.failed_pages, vec![2]);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(progress.retries.load(Ordering::SeqCst), 2);
    assert_eq!(progress.errors.load(Ordering::SeqCst), 1);
    assert_eq!(progress.completed.load(Ordering::SeqCst), 3);

    let page = std::fs::read_to_string(out.path().join("flaky/pages/page_002.md")).unwrap();
    assert!(page.contains("could not be transcribed"));
}

#[tokio::test]
async fn rate_limited_page_recovers() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let pdf = fake_pdf(input.path(), "busy.pdf");
    let backend = Arc::new(ScriptedBackend::new(|_, page, attempt| {
        if page == 1 && attempt < 3 {
            Err(OcrError::RateLimited {
                retry_after: Some(Duration::from_millis(1)),
            })
        } else {
            Ok(format!("text of page {page}"))
        }
    }));
    let t = transcriber(
        config(out.path(), 2),
        &backend,
        FakeRasterizer::new(&[("busy", 1, 2)]),
    );

    let summary = assert_ok!(t.transcribe_document(&pdf).await);
    assert_eq!(summary.succeeded, 2);
    assert!(summary.failed_pages.is_empty());
    assert_eq!(backend.attempts(1, 1), 3);
}

#[tokio::test]
async fn auth_failure_in_one_document_does_not_stop_the_batch() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let a = fake_pdf(input.path(), "a.pdf");
    let b = fake_pdf(input.path(), "b.pdf");
    let backend = Arc::new(ScriptedBackend::new(|marker, page, _| {
        if marker == 1 {
            Err(OcrError::Auth("invalid x-api-key".into()))
        } else {
            Ok(format!("text of page {page}"))
        }
    }));
    let t = transcriber(
        config(out.path(), 2),
        &backend,
        FakeRasterizer::new(&[("a", 1, 6), ("b", 2, 3)]),
    );

    let batch = t.transcribe_batch(&[a, b]).await;
    assert_eq!(batch.documents.len(), 2);
    assert_eq!(batch.succeeded(), 1);
    assert!(!batch.all_failed());

    match &batch.documents[0].status {
        DocumentStatus::Failed { error, .. } => assert!(error.contains("invalid x-api-key"), "{error}"),
        other => panic!("document a should fail, got {other:?}"),
    }
    // the halt stops admission: document a never gets through all 6 pages
    let a_calls: u32 = (1..=6).map(|p| backend.attempts(1, p)).sum();
    assert!(a_calls < 6, "auth errors are not retried and halt the pool");
    assert!(!out.path().join("a/a.md").exists());

    match &batch.documents[1].status {
        DocumentStatus::Completed(summary) => {
            assert_eq!(summary.succeeded, 3);
            let merged = std::fs::read_to_string(&summary.merged_path).unwrap();
            page_positions(&merged, 3);
        }
        other => panic!("document b should complete, got {other:?}"),
    }
}

#[tokio::test]
async fn fatal_error_mid_document_keeps_recorded_pages() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let pdf = fake_pdf(input.path(), "deeds.pdf");
    let backend = Arc::new(ScriptedBackend::new(|_, page, _| {
        if page == 4 {
            Err(OcrError::Auth("key revoked".into()))
        } else {
            Ok(format!("text of page {page}"))
        }
    }));
    let progress = Arc::new(CountingProgress::default());
    let mut config = config(out.path(), 1);
    config.progress_callback = Some(progress.clone());
    let t = transcriber(config, &backend, FakeRasterizer::new(&[("deeds", 1, 8)]));

    let batch = t.transcribe_batch(&[pdf]).await;
    assert!(batch.all_failed());
    match &batch.documents[0].status {
        DocumentStatus::Failed {
            error,
            requested,
            succeeded,
            failed,
        } => {
            assert!(error.contains("key revoked"), "{error}");
            assert_eq!((*requested, *succeeded, *failed), (8, 3, 0));
        }
        other => panic!("document should fail, got {other:?}"),
    }

    let pages = out.path().join("deeds/pages");
    for p in 1..=3 {
        let page = std::fs::read_to_string(pages.join(format!("page_{p:03}.md"))).unwrap();
        assert!(page.contains(&format!("text of page {p}")));
    }
    for p in 4..=8 {
        assert!(!pages.join(format!("page_{p:03}.md")).exists(), "page {p}");
    }
    assert!(!out.path().join("deeds/deeds.md").exists());

    // nothing is admitted once the halt is raised
    assert_eq!(backend.attempts(1, 4), 1);
    for p in 5..=8 {
        assert_eq!(backend.attempts(1, p), 0, "page {p} started after the halt");
    }
    assert_eq!(progress.started.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn document_without_pages_is_reported() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let pdf = fake_pdf(input.path(), "blank.pdf");
    let backend = Arc::new(ScriptedBackend::echo());

    for pages in [PageSelection::All, PageSelection::First(3)] {
        let mut config = config(out.path(), 2);
        config.pages = pages;
        let t = transcriber(config, &backend, FakeRasterizer::new(&[("blank", 1, 0)]));
        let err = assert_err!(t.transcribe_document(&pdf).await);
        assert!(matches!(err, TranscribeError::EmptyDocument { .. }), "{err}");
        assert!(err.to_string().contains("no pages"));
    }
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    assert!(!out.path().join("blank").exists());
}

#[tokio::test]
async fn invalid_selection_fails_before_dispatch() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let pdf = fake_pdf(input.path(), "short.pdf");
    let backend = Arc::new(ScriptedBackend::echo());
    let mut config = config(out.path(), 2);
    config.pages = PageSelection::parse("11").unwrap();
    let t = transcriber(config, &backend, FakeRasterizer::new(&[("short", 1, 10)]));

    let err = assert_err!(t.transcribe_document(&pdf).await);
    assert!(matches!(err, TranscribeError::InvalidSelection(_)), "{err}");
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    assert!(!out.path().join("short").exists());
}

#[tokio::test]
async fn first_n_pages_only() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let pdf = fake_pdf(input.path(), "long.pdf");
    let backend = Arc::new(ScriptedBackend::echo());
    let mut config = config(out.path(), 4);
    config.pages = PageSelection::First(3);
    let t = transcriber(config, &backend, FakeRasterizer::new(&[("long", 1, 10)]));

    let summary = assert_ok!(t.transcribe_document(&pdf).await);
    assert_eq!(summary.total_pages, 10);
    assert_eq!(summary.requested, 3);
    assert!(out.path().join("long/pages/page_003.md").exists());
    assert!(!out.path().join("long/pages/page_004.md").exists());
}

#[tokio::test]
async fn unavailable_engine_aborts_before_any_page() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let pdf = fake_pdf(input.path(), "doc.pdf");
    let mut backend = ScriptedBackend::echo();
    backend.kind = EngineKind::Local;
    backend.prepare_error = Some(OcrError::EngineUnavailable("tesseract not found".into()));
    let backend = Arc::new(backend);
    let t = transcriber(
        config(out.path(), 2),
        &backend,
        FakeRasterizer::new(&[("doc", 1, 3)]),
    );

    let err = assert_err!(t.transcribe_document(&pdf).await);
    assert!(matches!(err, TranscribeError::EngineUnavailable { .. }), "{err}");
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn non_pdf_input_is_rejected() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let path = input.path().join("notes.pdf");
    std::fs::write(&path, b"hello world").unwrap();
    let backend = Arc::new(ScriptedBackend::echo());
    let t = transcriber(
        config(out.path(), 2),
        &backend,
        FakeRasterizer::new(&[("notes", 1, 1)]),
    );

    let err = assert_err!(t.transcribe_document(&path).await);
    assert!(matches!(err, TranscribeError::NotAPdf { .. }), "{err}");

    let err = assert_err!(t.transcribe_document(&input.path().join("missing.pdf")).await);
    assert!(matches!(err, TranscribeError::FileNotFound { .. }), "{err}");
}

#[tokio::test]
async fn cleanup_text_goes_to_clean_files() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let pdf = fake_pdf(input.path(), "scan.pdf");
    let mut backend = ScriptedBackend::echo();
    backend.cleanup = true;
    let backend = Arc::new(backend);
    let progress = Arc::new(CountingProgress::default());
    let mut config = config(out.path(), 2);
    config.title = Some("Municipal Records".into());
    config.progress_callback = Some(progress.clone());
    let t = transcriber(config, &backend, FakeRasterizer::new(&[("scan", 1, 2)]));

    let summary = assert_ok!(t.transcribe_document(&pdf).await);
    let clean_path = summary.clean_path.clone().expect("clean merge written");
    let clean = std::fs::read_to_string(clean_path).unwrap();
    assert!(clean.starts_with("# Municipal Records\n"));
    assert!(clean.contains("clean text of page 1"));
    assert!(clean.contains("clean text of page 2"));
    let raw = std::fs::read_to_string(&summary.merged_path).unwrap();
    assert!(raw.contains("text of page 1"));
    assert!(!raw.contains("clean text"));
    assert!(out.path().join("scan/pages/page_002_clean.md").exists());

    assert_eq!(progress.started.load(Ordering::SeqCst), 2);
    assert_eq!(progress.documents.load(Ordering::SeqCst), 1);
}
