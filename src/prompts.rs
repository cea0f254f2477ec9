//! Prompts for the remote vision engine.
//!
//! Every prompt the crate sends lives here so wording changes touch one
//! file and unit tests can inspect the text without calling a provider.

/// Full language name for a Tesseract-style code, used inside prompts.
///
/// Unknown codes are returned unchanged; `+`-joined specs use the first code.
pub fn language_name(code: &str) -> &str {
    let primary = code.split('+').next().unwrap_or(code);
    match primary {
        "spa" => "Spanish",
        "eng" => "English",
        "fra" => "French",
        "deu" => "German",
        "por" => "Portuguese",
        "ita" => "Italian",
        "cat" => "Catalan",
        "nld" => "Dutch",
        _ => primary,
    }
}

const SHARED_RULES: &str = "\
- If text is faded or unclear, make your best interpretation based on context
- Ignore any highlighter marks, stamps, or non-text elements
- Do NOT add any commentary, notes, or headers - only output the transcribed text
- Do NOT add titles like \"TRANSCRIBED TEXT\" or similar
- Do NOT translate - keep the original language
- Start directly with the document content";

/// Transcription prompt for one page image.
///
/// With `reflow` the model joins hard-wrapped lines into paragraphs;
/// otherwise the original paragraph structure is kept.
pub fn ocr_prompt(language: &str, reflow: bool) -> String {
    let lang = language_name(language);
    let layout = if reflow {
        "- REFLOW the text into logical paragraphs, do NOT preserve the original line breaks\n\
         - Join lines that belong to the same sentence or paragraph into flowing text\n\
         - Start new paragraphs only at logical breaks (new section, numbered clauses)\n\
         - Keep section headers and numbered items on their own lines"
    } else {
        "- Preserve the original paragraph structure"
    };
    format!(
        "Transcribe ALL the text from this scanned document image{exact}.\n\n\
         Instructions:\n\
         - This is a scanned document in {lang}\n\
         - Transcribe every word, number, and punctuation mark exactly as shown\n\
         {layout}\n\
         {SHARED_RULES}\n\n\
         Output ONLY the transcribed text:",
        exact = if reflow { "" } else { " exactly as it appears" },
    )
}

/// Text-only prompt asking the model to fix recognition errors in `text`.
pub fn cleanup_prompt(text: &str, language: &str) -> String {
    let lang = language_name(language);
    format!(
        "Clean up this OCR-transcribed text in {lang}. Fix obvious errors while \
         preserving the EXACT meaning and structure.\n\n\
         Rules:\n\
         - Fix character recognition errors (e.g., \"rn\" that should be \"m\", \"1\" that should be \"l\")\n\
         - Fix broken words and sentences\n\
         - Fix punctuation and accents\n\
         - Preserve ALL original content - do not add, remove, or paraphrase anything\n\
         - Keep the same paragraph structure\n\
         - If unsure about a word, keep the original\n\
         - Do NOT translate or summarize\n\
         - Do NOT add any commentary\n\n\
         Original text:\n{text}\n\n\
         Cleaned text:"
    )
}
