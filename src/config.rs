//! Configuration for a transcription run.
//!
//! Every knob lives in [`TranscriptionConfig`], built through
//! [`TranscriptionConfigBuilder`]. One value is shared by every document of
//! a batch and every page task of a document, so it is cheap to clone and
//! never mutated once built.
//!
//! The library reads no environment variables of its own, except for the
//! per-class model ids in [`crate::engine::ModelClass::model_id`]. The CLI
//! maps flags and `ANTHROPIC_TIER` / `TRANSCRIPTOR_*` onto the builder.

use crate::concurrency::{TierTable, WorkerSetting};
use crate::engine::{EngineKind, ModelClass};
use crate::error::TranscribeError;
use crate::pipeline::preprocess::PreprocessMode;
use crate::progress::ProgressCallback;
use crate::retry::RetryPolicy;
use crate::selection::PageSelection;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default rendering resolution.
pub const DEFAULT_DPI: u32 = 150;

/// Configuration for transcribing one or more documents.
///
/// # Example
/// ```rust
/// use pdf_transcriptor::{EngineKind, TranscriptionConfig};
///
/// let config = TranscriptionConfig::builder()
///     .engine(EngineKind::Remote)
///     .tier("2")
///     .language("spa")
///     .reflow(true)
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi, 150);
/// ```
#[derive(Clone)]
pub struct TranscriptionConfig {
    // ── Rendering ─────────────────────────────────────────────────────────
    /// Rendering DPI. Range: 72–600. Default: 150.
    ///
    /// 150 is enough for clean scans; 300 helps with small or faded type at
    /// four times the pixels per page.
    pub dpi: u32,

    /// Longest rendered edge in pixels, independent of DPI. Default: 5000.
    pub max_rendered_pixels: u32,

    /// Password for encrypted PDFs.
    pub password: Option<String>,

    // ── Engine ────────────────────────────────────────────────────────────
    pub engine: EngineKind,

    /// Worker count: `Auto` or a fixed number (remote: can only lower the tier budget).
    pub workers: WorkerSetting,

    /// Provider rate-limit tier name. Default: "1".
    pub tier: String,

    /// Tier → requests-per-minute table and the worker formula parameters.
    pub tier_table: TierTable,

    /// Tesseract language spec (`eng`, `spa+eng`); also names the language in remote prompts.
    pub language: String,

    /// Tesseract page segmentation mode, 0–13. Default: 3 (automatic).
    pub psm: u8,

    /// Tesseract engine mode, 0–3. Default: 3.
    pub oem: u8,

    /// Detect orientation with Tesseract OSD and rotate before recognition.
    pub auto_rotate: bool,

    /// Minimum OSD confidence for a rotation to be applied. Default: 5.0.
    pub rotate_confidence: f32,

    // ── Preprocessing ─────────────────────────────────────────────────────
    pub preprocess: PreprocessMode,

    /// Binarisation threshold, 0–255. Default: 140.
    pub binarize_threshold: u8,

    // ── Remote engine ─────────────────────────────────────────────────────
    pub model_class: ModelClass,

    /// `edgequake-llm` provider name. None → "anthropic".
    pub provider_name: Option<String>,

    /// Pre-built provider; takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Second text-only pass fixing recognition errors (remote only).
    pub cleanup: bool,

    /// Join hard-wrapped lines into paragraphs (remote only).
    pub reflow: bool,

    /// Maximum generated tokens per request. Default: 4096.
    pub max_tokens: usize,

    /// Sampling temperature. Default: 0.0, transcription should not be creative.
    pub temperature: f32,

    /// Per-request timeout in seconds; a timeout counts as a transient failure. Default: 120.
    pub api_timeout_secs: u64,

    /// Retry policy around each remote call.
    pub retry: RetryPolicy,

    // ── Selection and output ──────────────────────────────────────────────
    pub pages: PageSelection,

    /// Parent of the per-document output directories. None → `output`;
    /// each document writes to `<output_dir>/<stem>/`.
    pub output_dir: Option<PathBuf>,

    /// Document title for the merged header. None → humanised file stem.
    pub title: Option<String>,

    pub progress_callback: Option<ProgressCallback>,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            dpi: DEFAULT_DPI,
            max_rendered_pixels: 5000,
            password: None,
            engine: EngineKind::default(),
            workers: WorkerSetting::default(),
            tier: "1".to_string(),
            tier_table: TierTable::default(),
            language: "eng".to_string(),
            psm: 3,
            oem: 3,
            auto_rotate: false,
            rotate_confidence: 5.0,
            preprocess: PreprocessMode::default(),
            binarize_threshold: 140,
            model_class: ModelClass::default(),
            provider_name: None,
            provider: None,
            cleanup: false,
            reflow: false,
            max_tokens: 4096,
            temperature: 0.0,
            api_timeout_secs: 120,
            retry: RetryPolicy::default(),
            pages: PageSelection::default(),
            output_dir: None,
            title: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for TranscriptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscriptionConfig")
            .field("dpi", &self.dpi)
            .field("engine", &self.engine)
            .field("workers", &self.workers)
            .field("tier", &self.tier)
            .field("language", &self.language)
            .field("psm", &self.psm)
            .field("oem", &self.oem)
            .field("auto_rotate", &self.auto_rotate)
            .field("preprocess", &self.preprocess)
            .field("model_class", &self.model_class)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("cleanup", &self.cleanup)
            .field("reflow", &self.reflow)
            .field("retry", &self.retry)
            .field("pages", &self.pages)
            .field("output_dir", &self.output_dir)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl TranscriptionConfig {
    pub fn builder() -> TranscriptionConfigBuilder {
        TranscriptionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`TranscriptionConfig`].
#[derive(Debug)]
pub struct TranscriptionConfigBuilder {
    config: TranscriptionConfig,
}

impl TranscriptionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn engine(mut self, engine: EngineKind) -> Self {
        self.config.engine = engine;
        self
    }

    pub fn workers(mut self, workers: WorkerSetting) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn tier(mut self, tier: impl Into<String>) -> Self {
        self.config.tier = tier.into();
        self
    }

    pub fn tier_table(mut self, table: TierTable) -> Self {
        self.config.tier_table = table;
        self
    }

    pub fn language(mut self, lang: impl Into<String>) -> Self {
        self.config.language = lang.into();
        self
    }

    pub fn psm(mut self, psm: u8) -> Self {
        self.config.psm = psm;
        self
    }

    pub fn oem(mut self, oem: u8) -> Self {
        self.config.oem = oem;
        self
    }

    pub fn auto_rotate(mut self, v: bool) -> Self {
        self.config.auto_rotate = v;
        self
    }

    pub fn rotate_confidence(mut self, c: f32) -> Self {
        self.config.rotate_confidence = c.max(0.0);
        self
    }

    pub fn preprocess(mut self, mode: PreprocessMode) -> Self {
        self.config.preprocess = mode;
        self
    }

    pub fn binarize_threshold(mut self, t: u8) -> Self {
        self.config.binarize_threshold = t;
        self
    }

    pub fn model_class(mut self, class: ModelClass) -> Self {
        self.config.model_class = class;
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn cleanup(mut self, v: bool) -> Self {
        self.config.cleanup = v;
        self
    }

    pub fn reflow(mut self, v: bool) -> Self {
        self.config.reflow = v;
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.retry.max_attempts = n;
        self
    }

    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.config.retry.base_delay = delay;
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = Some(dir.into());
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.config.title = Some(title.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Preset for poor scans: every filter, auto-rotation, and 300 DPI
    /// unless a DPI was already chosen.
    pub fn enhance(mut self) -> Self {
        self.config.preprocess = PreprocessMode::All;
        self.config.auto_rotate = true;
        if self.config.dpi == DEFAULT_DPI {
            self.config.dpi = 300;
        }
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<TranscriptionConfig, TranscribeError> {
        let c = &self.config;
        if !(72..=600).contains(&c.dpi) {
            return Err(TranscribeError::InvalidConfig(format!(
                "DPI must be 72-600, got {}",
                c.dpi
            )));
        }
        if c.psm > 13 {
            return Err(TranscribeError::InvalidConfig(format!(
                "Tesseract PSM must be 0-13, got {}",
                c.psm
            )));
        }
        if c.oem > 3 {
            return Err(TranscribeError::InvalidConfig(format!(
                "Tesseract OEM must be 0-3, got {}",
                c.oem
            )));
        }
        if c.language.trim().is_empty() {
            return Err(TranscribeError::InvalidConfig("language must not be empty".into()));
        }
        if c.retry.max_attempts == 0 {
            return Err(TranscribeError::InvalidConfig(
                "max_attempts must be at least 1".into(),
            ));
        }
        if c.retry.max_delay < c.retry.base_delay {
            return Err(TranscribeError::InvalidConfig(format!(
                "max retry delay ({:?}) is shorter than the base delay ({:?})",
                c.retry.max_delay, c.retry.base_delay
            )));
        }
        Ok(self.config)
    }
}
