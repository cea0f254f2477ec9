//! Local engine: the Tesseract command-line tool.
//!
//! Each call writes the page to a temporary PNG and runs
//! `tesseract <png> stdout -l <lang> --psm N --oem M` on a blocking thread.
//! Shelling out keeps the crate free of libtesseract bindings and works with
//! whatever Tesseract and traineddata the host has installed.
//!
//! Optional auto-rotation runs an orientation pass (`--psm 0`) first and
//! turns the image clockwise when Tesseract is confident enough.

use super::{EngineKind, EngineMetadata, OcrBackend, TranscribeOptions, Transcription};
use crate::error::OcrError;
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Instant;
use tracing::{debug, warn};

static OSD_ROTATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Rotate:\s*(\d+)").expect("valid regex"));
static OSD_CONFIDENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Orientation confidence:\s*([\d.]+)").expect("valid regex"));

/// Tesseract OCR through its CLI.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    binary: PathBuf,
}

impl Default for TesseractEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TesseractEngine {
    /// Use `tesseract` from `PATH`.
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
        }
    }

    /// Use a specific tesseract executable.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Languages installed for this Tesseract (`--list-langs`).
    pub fn list_languages(&self) -> Result<Vec<String>, OcrError> {
        let output = self.command(&["--list-langs"])?;
        if !output.status.success() {
            return Err(OcrError::EngineUnavailable(format!(
                "tesseract --list-langs failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        // Older releases print the list on stderr.
        let text = if output.stdout.is_empty() {
            String::from_utf8_lossy(&output.stderr).into_owned()
        } else {
            String::from_utf8_lossy(&output.stdout).into_owned()
        };
        Ok(parse_language_list(&text))
    }

    fn command(&self, args: &[&str]) -> Result<Output, OcrError> {
        Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|e| spawn_error(&self.binary, e))
    }

    fn recognise(&self, png: &Path, options: &TranscribeOptions) -> Result<String, OcrError> {
        let psm = options.psm.to_string();
        let oem = options.oem.to_string();
        let output = Command::new(&self.binary)
            .arg(png)
            .arg("stdout")
            .args(["-l", &options.language, "--psm", &psm, "--oem", &oem])
            .output()
            .map_err(|e| spawn_error(&self.binary, e))?;

        if output.status.success() {
            let text = String::from_utf8_lossy(&output.stdout);
            return Ok(text.trim_end_matches(['\x0c', '\n', ' ']).to_string());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("Failed loading language") || stderr.contains("Error opening data file") {
            Err(OcrError::EngineUnavailable(format!(
                "language data for '{}' is missing: {}",
                options.language,
                stderr.trim()
            )))
        } else {
            Err(OcrError::RecognitionFailed(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )))
        }
    }

    /// Orientation pass. Any failure means "leave the page as it is".
    fn detect_rotation(&self, png: &Path, min_confidence: f32) -> u16 {
        let output = match Command::new(&self.binary)
            .arg(png)
            .arg("stdout")
            .args(["--psm", "0"])
            .output()
        {
            Ok(o) if o.status.success() => o,
            Ok(o) => {
                debug!(
                    "OSD failed, keeping orientation: {}",
                    String::from_utf8_lossy(&o.stderr).trim()
                );
                return 0;
            }
            Err(e) => {
                debug!("OSD could not run: {e}");
                return 0;
            }
        };
        match parse_osd(&String::from_utf8_lossy(&output.stdout)) {
            Some((angle, confidence)) if angle != 0 && confidence >= min_confidence => angle,
            _ => 0,
        }
    }

    fn run_blocking(
        &self,
        image: &DynamicImage,
        options: &TranscribeOptions,
    ) -> Result<(String, u16), OcrError> {
        let tmp = tempfile::Builder::new()
            .prefix("transcriptor-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| OcrError::RecognitionFailed(format!("temp file: {e}")))?;
        save_png(image, tmp.path())?;

        let mut rotation = 0;
        if options.auto_rotate {
            rotation = self.detect_rotation(tmp.path(), options.rotate_confidence);
            if rotation != 0 {
                debug!(rotation, "rotating page before recognition");
                save_png(&rotate_clockwise(image, rotation), tmp.path())?;
            }
        }

        let text = self.recognise(tmp.path(), options)?;
        Ok((text, rotation))
    }
}

#[async_trait]
impl OcrBackend for TesseractEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Local
    }

    fn name(&self) -> String {
        "Tesseract".to_string()
    }

    async fn prepare(&self, options: &mut TranscribeOptions) -> Result<(), OcrError> {
        let engine = self.clone();
        let installed = tokio::task::spawn_blocking(move || engine.list_languages())
            .await
            .map_err(|e| OcrError::EngineUnavailable(format!("task panicked: {e}")))??;
        options.language = resolve_language(&options.language, &installed)?;
        Ok(())
    }

    async fn transcribe(
        &self,
        image: &DynamicImage,
        options: &TranscribeOptions,
    ) -> Result<Transcription, OcrError> {
        let start = Instant::now();
        let engine = self.clone();
        let image = image.clone();
        let opts = options.clone();
        let (text, rotation) =
            tokio::task::spawn_blocking(move || engine.run_blocking(&image, &opts))
                .await
                .map_err(|e| OcrError::RecognitionFailed(format!("task panicked: {e}")))??;

        Ok(Transcription {
            text,
            cleaned: None,
            metadata: EngineMetadata {
                engine: self.name(),
                model: None,
                rotation,
                duration_ms: start.elapsed().as_millis() as u64,
                ..Default::default()
            },
        })
    }
}

fn spawn_error(binary: &Path, e: io::Error) -> OcrError {
    if e.kind() == io::ErrorKind::NotFound {
        OcrError::EngineUnavailable(format!(
            "'{}' not found (install tesseract-ocr)",
            binary.display()
        ))
    } else {
        OcrError::EngineUnavailable(format!("could not run '{}': {e}", binary.display()))
    }
}

fn save_png(image: &DynamicImage, path: &Path) -> Result<(), OcrError> {
    image
        .save_with_format(path, ImageFormat::Png)
        .map_err(|e| OcrError::RecognitionFailed(format!("could not write page image: {e}")))
}

/// Parse `--list-langs` output, skipping the header line.
pub fn parse_language_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("List of available languages"))
        .map(str::to_string)
        .collect()
}

/// Validate a `+`-joined language spec against the installed languages.
///
/// A missing component falls back to `eng`; if `eng` is missing too the
/// engine is unusable.
pub fn resolve_language(spec: &str, installed: &[String]) -> Result<String, OcrError> {
    let has = |code: &str| installed.iter().any(|l| l == code);
    let missing: Vec<&str> = spec.split('+').filter(|code| !has(code)).collect();
    if missing.is_empty() {
        return Ok(spec.to_string());
    }
    if has("eng") {
        warn!(
            "Tesseract language(s) {} not installed (available: {}); falling back to 'eng'",
            missing.join(", "),
            installed.join(", ")
        );
        return Ok("eng".to_string());
    }
    Err(OcrError::EngineUnavailable(format!(
        "language '{spec}' is not installed and 'eng' is not available either"
    )))
}

/// Extract `(rotate, orientation confidence)` from OSD output.
pub fn parse_osd(text: &str) -> Option<(u16, f32)> {
    let angle = OSD_ROTATE
        .captures(text)
        .and_then(|c| c[1].parse::<u16>().ok())?;
    let confidence = OSD_CONFIDENCE
        .captures(text)
        .and_then(|c| c[1].parse::<f32>().ok())
        .unwrap_or(0.0);
    Some((angle, confidence))
}

fn rotate_clockwise(image: &DynamicImage, degrees: u16) -> DynamicImage {
    match degrees % 360 {
        90 => image.rotate90(),
        180 => image.rotate180(),
        270 => image.rotate270(),
        _ => image.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn langs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn language_list_skips_header() {
        let out = "List of available languages in \"/usr/share/tessdata/\" (3):\neng\nosd\nspa\n";
        assert_eq!(parse_language_list(out), langs(&["eng", "osd", "spa"]));
    }

    #[test]
    fn installed_languages_pass_through() {
        let installed = langs(&["eng", "spa"]);
        assert_eq!(resolve_language("spa+eng", &installed).unwrap(), "spa+eng");
    }

    #[test]
    fn missing_language_falls_back_to_english() {
        let installed = langs(&["eng", "osd"]);
        assert_eq!(resolve_language("deu", &installed).unwrap(), "eng");
        assert_eq!(resolve_language("spa+eng", &installed).unwrap(), "eng");
    }

    #[test]
    fn missing_english_is_fatal() {
        let err = resolve_language("deu", &langs(&["spa"])).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn osd_output_parses() {
        let out = "Page number: 0\nOrientation in degrees: 270\nRotate: 90\n\
                   Orientation confidence: 12.34\nScript: Latin\nScript confidence: 3.1\n";
        assert_eq!(parse_osd(out), Some((90, 12.34)));
        assert_eq!(parse_osd("garbage"), None);
    }

    #[test]
    fn rotation_turns_dimensions() {
        let img = DynamicImage::new_rgb8(40, 10);
        let turned = rotate_clockwise(&img, 90);
        assert_eq!((turned.width(), turned.height()), (10, 40));
        let same = rotate_clockwise(&img, 180);
        assert_eq!((same.width(), same.height()), (40, 10));
    }

    #[tokio::test]
    async fn missing_binary_is_engine_unavailable() {
        let engine = TesseractEngine::with_binary("/nonexistent/tesseract-binary");
        let err = engine
            .transcribe(&DynamicImage::new_luma8(8, 8), &TranscribeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::EngineUnavailable(_)), "{err:?}");

        let mut opts = TranscribeOptions::default();
        assert!(engine.prepare(&mut opts).await.unwrap_err().is_fatal());
    }
}
