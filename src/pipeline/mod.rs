//! Collaborator stages around the OCR engines.
//!
//! ```text
//! input ──▶ render ──▶ preprocess ──▶ [engine] ──▶ postprocess
//! (path)    (pdfium)   (filters)      (encode)     (cleanup)
//! ```
//!
//! 1. [`input`]: validate the PDF, discover batch inputs
//! 2. [`render`]: rasterise one page; blocking, runs in `spawn_blocking`
//! 3. [`preprocess`]: named filter recipes applied before recognition
//! 4. [`encode`]: PNG/base64 for the remote engine's request body
//! 5. [`postprocess`]: deterministic text cleanup of engine output

pub mod encode;
pub mod input;
pub mod postprocess;
pub mod preprocess;
pub mod render;
