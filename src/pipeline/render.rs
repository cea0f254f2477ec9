//! PDF rasterisation.
//!
//! The pipeline only talks to the [`Rasterizer`] trait: count the pages,
//! then render one page at a time at a given DPI. [`PdfiumRasterizer`] is
//! the production implementation; tests plug in in-memory rasterisers.
//!
//! ## Why one page per call?
//!
//! Each page task renders its own page right before recognition, so at most
//! `workers` page images are alive at once instead of the whole document.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with thread-local state and CPU-heavy rendering.
//! Callers run these methods inside `tokio::task::spawn_blocking` so the
//! async workers never stall on a render.
//!
//! ## Why cap pixels as well as DPI?
//!
//! A 300-DPI render of an A0 poster is 10 000 × 14 000 px. The longest edge
//! is capped at `max_pixels`, scaling the other edge proportionally.

use crate::error::{PageError, TranscribeError};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Produces one image per page of a document.
pub trait Rasterizer: Send + Sync {
    /// Number of pages in the document. Fails when it cannot be opened.
    fn page_count(&self, pdf: &Path) -> Result<usize, TranscribeError>;

    /// Render 1-indexed `page` at `dpi`.
    fn render_page(&self, pdf: &Path, page: usize, dpi: u32) -> Result<DynamicImage, PageError>;
}

/// pdfium-backed rasteriser.
///
/// The pdfium library is located through `PDFIUM_LIB_PATH` (a directory
/// holding the platform library) and otherwise through the system loader.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    password: Option<String>,
    max_pixels: u32,
    library_dir: Option<PathBuf>,
}

impl PdfiumRasterizer {
    pub fn new(password: Option<String>, max_pixels: u32) -> Self {
        Self {
            password,
            max_pixels: max_pixels.max(100),
            library_dir: std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from),
        }
    }

    fn bind(&self) -> Result<Pdfium, PdfiumError> {
        let bindings = match &self.library_dir {
            Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir))?,
            None => Pdfium::bind_to_system_library()?,
        };
        Ok(Pdfium::new(bindings))
    }

    fn open_error(&self, path: &Path, e: PdfiumError) -> TranscribeError {
        let detail = format!("{e:?}");
        let detail = if detail.to_ascii_lowercase().contains("password") {
            if self.password.is_some() {
                format!("wrong password ({detail})")
            } else {
                format!("document is encrypted; pass a password ({detail})")
            }
        } else {
            detail
        };
        TranscribeError::CorruptPdf {
            path: path.to_path_buf(),
            detail,
        }
    }
}

impl Rasterizer for PdfiumRasterizer {
    fn page_count(&self, pdf: &Path) -> Result<usize, TranscribeError> {
        let pdfium = self.bind().map_err(|e| TranscribeError::EngineUnavailable {
            engine: "pdfium".to_string(),
            detail: format!("could not load the pdfium library: {e:?} (set PDFIUM_LIB_PATH)"),
        })?;
        let document = pdfium
            .load_pdf_from_file(pdf, self.password.as_deref())
            .map_err(|e| self.open_error(pdf, e))?;
        Ok(document.pages().len() as usize)
    }

    fn render_page(&self, pdf: &Path, page: usize, dpi: u32) -> Result<DynamicImage, PageError> {
        let fail = |detail: String| PageError::RenderFailed { page, detail };

        let pdfium = self.bind().map_err(|e| fail(format!("pdfium unavailable: {e:?}")))?;
        let document = pdfium
            .load_pdf_from_file(pdf, self.password.as_deref())
            .map_err(|e| fail(format!("could not reopen document: {e:?}")))?;
        let index = page
            .checked_sub(1)
            .and_then(|i| u16::try_from(i).ok())
            .ok_or_else(|| fail(format!("page {page} has no pdfium index")))?;
        let pdf_page = document
            .pages()
            .get(index)
            .map_err(|e| fail(format!("{e:?}")))?;

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(dpi as f32 / 72.0)
            .set_maximum_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);

        let bitmap = pdf_page
            .render_with_config(&render_config)
            .map_err(|e| fail(format!("{e:?}")))?;
        let image = bitmap.as_image();
        debug!(page, dpi, width = image.width(), height = image.height(), "rendered page");
        Ok(image)
    }
}
