//! Post-processing: deterministic cleanup of engine output.
//!
//! Both engines produce plain text with small, predictable quirks. Tesseract
//! ends every page with a form feed and leaves trailing spaces; vision models
//! sometimes wrap their answer in code fences or open with a banner such as
//! "TRANSCRIBED TEXT:" despite the prompt. The rules below remove those
//! artefacts without touching the words themselves.
//!
//! ## Rule order
//!
//! Fences are stripped first so the remaining rules see the real text;
//! line endings are normalised before any per-line rule runs.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply every cleanup rule to raw engine output.
///
/// 1. Strip outer code fences
/// 2. Normalise line endings (CRLF/CR → LF) and drop form feeds
/// 3. Remove invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 4. Drop a leading banner line ("TRANSCRIBED TEXT:", …)
/// 5. Trim trailing whitespace per line
/// 6. Collapse runs of blank lines to a single blank line
/// 7. Trim leading/trailing blank lines
pub fn clean_text(input: &str) -> String {
    let s = strip_code_fences(input);
    let s = normalise_line_endings(&s);
    let s = remove_invisible_chars(&s);
    let s = drop_leading_banner(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    s.trim_matches('\n').to_string()
}

/// Word and character counts for summaries.
pub fn text_statistics(text: &str) -> (usize, usize) {
    (text.chars().count(), text.split_whitespace().count())
}

// ── Rule 1: Outer fences ─────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```(?:markdown|text|plaintext)?\r?\n(.*?)\r?\n```\s*$").expect("valid regex")
});

fn strip_code_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 2: Line endings and form feeds ──────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\x0c', "\n")
}

// ── Rule 3: Invisible characters ─────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    )
}

// ── Rule 4: Leading banner ───────────────────────────────────────────────

static RE_BANNER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:#+\s*)?(?:\*\*)?(?:transcribed text|transcription|documento transcrito|texto transcrito)(?:\*\*)?\s*:?\s*(?:\*\*)?\s*$",
    )
    .expect("valid regex")
});

fn drop_leading_banner(input: &str) -> String {
    let mut lines = input.lines().skip_while(|l| l.trim().is_empty()).peekable();
    if lines.peek().is_some_and(|first| RE_BANNER.is_match(first)) {
        lines.next();
        return lines.collect::<Vec<_>>().join("\n");
    }
    input.to_string()
}

// ── Rule 5: Trailing whitespace ──────────────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 6: Blank-line runs ──────────────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").into_owned()
}
