//! OCR backends.
//!
//! Every engine implements [`OcrBackend`]: one page image in, text out,
//! failures reported through the [`OcrError`] taxonomy. The pipeline never
//! branches on the engine type; it only reads [`OcrBackend::kind`] to size
//! the worker pool.
//!
//! | Engine | Type | Cost per concurrent page |
//! |--------|------|--------------------------|
//! | local  | [`TesseractEngine`] | one CPU core |
//! | remote | [`VisionEngine`] | one in-flight request against a rate limit |

pub mod local;
pub mod remote;

pub use local::TesseractEngine;
pub use remote::VisionEngine;

use crate::config::TranscriptionConfig;
use crate::error::{OcrError, TranscribeError};
use async_trait::async_trait;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Which backend processes the pages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Tesseract, CPU-bound, no network.
    #[default]
    Local,
    /// Vision LLM behind a rate-limited API.
    Remote,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EngineKind::Local => "local",
            EngineKind::Remote => "remote",
        })
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "tesseract" => Ok(EngineKind::Local),
            "remote" | "claude" | "vision" => Ok(EngineKind::Remote),
            other => Err(format!("unknown engine '{other}' (expected local or remote)")),
        }
    }
}

/// Cost/quality class of the remote model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelClass {
    Cheap,
    #[default]
    Default,
    Expensive,
}

impl ModelClass {
    /// Model id for this class, overridable through the environment.
    pub fn model_id(&self) -> String {
        let (var, fallback) = match self {
            ModelClass::Cheap => ("CLAUDE_CHEAPO_MODEL", "claude-haiku-4-5-20251001"),
            ModelClass::Default => ("CLAUDE_MODEL", "claude-sonnet-4-5-20250929"),
            ModelClass::Expensive => ("CLAUDE_EXPENSIVE_MODEL", "claude-opus-4-5-20251101"),
        };
        std::env::var(var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| fallback.to_string())
    }
}

impl fmt::Display for ModelClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModelClass::Cheap => "cheap",
            ModelClass::Default => "default",
            ModelClass::Expensive => "expensive",
        })
    }
}

/// Per-call options. Each engine reads the fields that concern it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscribeOptions {
    /// Tesseract language spec, e.g. `spa` or `spa+eng`.
    pub language: String,
    /// Tesseract page segmentation mode.
    pub psm: u8,
    /// Tesseract OCR engine mode.
    pub oem: u8,
    pub auto_rotate: bool,
    pub rotate_confidence: f32,
    /// Ask the remote engine for a second, text-only cleanup pass.
    pub cleanup: bool,
    /// Ask the remote engine to join hard-wrapped lines into paragraphs.
    pub reflow: bool,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl Default for TranscribeOptions {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            psm: 3,
            oem: 3,
            auto_rotate: false,
            rotate_confidence: 5.0,
            cleanup: false,
            reflow: false,
            max_tokens: 4096,
            temperature: 0.0,
        }
    }
}

impl TranscribeOptions {
    pub fn from_config(config: &TranscriptionConfig) -> Self {
        Self {
            language: config.language.clone(),
            psm: config.psm,
            oem: config.oem,
            auto_rotate: config.auto_rotate,
            rotate_confidence: config.rotate_confidence,
            cleanup: config.cleanup,
            reflow: config.reflow,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

/// What the engine observed while transcribing a page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineMetadata {
    pub engine: String,
    pub model: Option<String>,
    /// Clockwise rotation applied before recognition, in degrees.
    pub rotation: u16,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub duration_ms: u64,
}

/// Output of one successful `transcribe` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcription {
    pub text: String,
    /// Cleanup-pass output, when requested and supported.
    pub cleaned: Option<String>,
    pub metadata: EngineMetadata,
}

/// A page transcription engine.
///
/// Implementations must be cheap to share across tasks (`Arc<dyn OcrBackend>`).
#[async_trait]
pub trait OcrBackend: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// Human-readable engine name for logs and document headers.
    fn name(&self) -> String;

    /// Check the engine once per document and adjust `options` to what it
    /// can actually do (e.g. language fallback). Errors here are fatal.
    async fn prepare(&self, options: &mut TranscribeOptions) -> Result<(), OcrError> {
        let _ = options;
        Ok(())
    }

    async fn transcribe(
        &self,
        image: &DynamicImage,
        options: &TranscribeOptions,
    ) -> Result<Transcription, OcrError>;
}

/// Construct the backend selected by `config.engine`.
pub fn build_backend(config: &TranscriptionConfig) -> Result<Arc<dyn OcrBackend>, TranscribeError> {
    match config.engine {
        EngineKind::Local => Ok(Arc::new(TesseractEngine::new())),
        EngineKind::Remote => Ok(Arc::new(VisionEngine::from_config(config)?)),
    }
}
