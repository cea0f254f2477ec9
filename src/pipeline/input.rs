//! Input validation and batch discovery.
//!
//! Every document is checked for existence, readability and the `%PDF`
//! magic bytes before a rasteriser sees it, so a wrong file produces a
//! readable error instead of a pdfium failure deep in the pipeline.

use crate::error::TranscribeError;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Validate a local PDF path.
pub fn resolve_local(path: &Path) -> Result<PathBuf, TranscribeError> {
    let path = path.to_path_buf();
    if !path.is_file() {
        return Err(TranscribeError::FileNotFound { path });
    }

    match File::open(&path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            match f.read_exact(&mut magic) {
                Ok(()) if &magic == b"%PDF" => {}
                Ok(()) => return Err(TranscribeError::NotAPdf { path, magic }),
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(TranscribeError::NotAPdf { path, magic })
                }
                Err(e) => {
                    return Err(TranscribeError::CorruptPdf {
                        path,
                        detail: e.to_string(),
                    })
                }
            }
        }
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            return Err(TranscribeError::PermissionDenied { path });
        }
        Err(_) => return Err(TranscribeError::FileNotFound { path }),
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(path)
}

/// All `*.pdf` files (case-insensitive extension) directly inside `dir`,
/// sorted by file name.
pub fn discover_pdfs(dir: &Path) -> Result<Vec<PathBuf>, TranscribeError> {
    let entries = std::fs::read_dir(dir).map_err(|e| match e.kind() {
        io::ErrorKind::PermissionDenied => TranscribeError::PermissionDenied {
            path: dir.to_path_buf(),
        },
        _ => TranscribeError::NoDocuments {
            dir: dir.to_path_buf(),
        },
    })?;

    let mut pdfs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && has_pdf_extension(p))
        .collect();
    if pdfs.is_empty() {
        return Err(TranscribeError::NoDocuments {
            dir: dir.to_path_buf(),
        });
    }
    pdfs.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(pdfs)
}

fn has_pdf_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// File stem used for output naming; `document` when the path has none.
pub fn document_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "document".to_string())
}
