//! CLI binary for pdf-transcriptor.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `TranscriptionConfig`, runs one document or a batch, and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdf_transcriptor::{
    BatchSummary, EngineKind, ModelClass, PageSelection, PreprocessMode, ProgressCallback,
    TesseractEngine, Transcriber, TranscriptionConfig, TranscriptionProgress, WorkerSetting,
};
use pdf_transcriptor::output::{DocumentStatus, PageCounts};
use pdf_transcriptor::pipeline::input;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live page bar plus one log line per finished page. Pages finish out of
/// order, so per-page timers are keyed by page number.
struct CliProgress {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed(&self, page: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl TranscriptionProgress for CliProgress {
    fn on_document_start(&self, document: &str, pages: usize, workers: usize) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} pages  \
                 ⏱ {elapsed_precise}  ETA {eta_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_length(pages as u64);
        self.bar.set_position(0);
        self.bar.set_prefix(document.to_string());
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            bold("◆"),
            bold(&format!("{document}: {pages} pages, {workers} workers"))
        ));
    }

    fn on_page_start(&self, page: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(page, Instant::now());
        }
        self.bar.set_message(format!("page {page}"));
    }

    fn on_page_retry(&self, page: usize, attempt: u32) {
        self.bar.println(format!(
            "  {} Page {:>3}  {}",
            yellow("↻"),
            page,
            dim(&format!("attempt {attempt}"))
        ));
    }

    fn on_page_complete(&self, page: usize, chars: usize) {
        let secs = self.elapsed(page);
        self.bar.println(format!(
            "  {} Page {:>3}  {:<8}  {}",
            green("✓"),
            page,
            dim(&format!("{chars:>5} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page: usize, error: &str) {
        let secs = self.elapsed(page);
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>3}  {}  {}",
            red("✗"),
            page,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_document_complete(&self, document: &str, succeeded: usize, failed: usize) {
        let mark = if failed == 0 { green("✔") } else { yellow("⚠") };
        self.bar.println(format!(
            "{mark} {document}: {succeeded} pages transcribed, {failed} failed"
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Every PDF in ./input with Tesseract
  transcriptor

  # One document, Spanish, pages 1-3 and 7
  transcriptor acta.pdf -l spa --pages 1-3,7

  # Faded scan with red stamps
  transcriptor acta.pdf -p clean --dpi 300

  # Vision model, paragraphs reflowed, second cleanup pass
  transcriptor acta.pdf -e remote --reflow --cleanup

  # First 5 pages with the cheap model on tier 2
  transcriptor acta.pdf -e remote --cheapo --first 5 --tier 2

OUTPUT:
  output/<document>/<document>.md          merged transcription
  output/<document>/<document>_clean.md    merged cleanup text (--cleanup)
  output/<document>/pages/page_NNN.md      one file per page

ENVIRONMENT VARIABLES:
  ANTHROPIC_API_KEY       API key for the remote engine
  ANTHROPIC_TIER          API rate-limit tier (1-4), sizes the remote worker pool
  CLAUDE_MODEL            Default model id
  CLAUDE_CHEAPO_MODEL     Model id for --cheapo
  CLAUDE_EXPENSIVE_MODEL  Model id for --expensive
  PDFIUM_LIB_PATH         Directory holding the pdfium library
  RUST_LOG                Log filter (overrides -v / -q)

  A .env file in the working directory is loaded when present.
"#;

/// Transcribe scanned PDF documents to text.
#[derive(Parser, Debug)]
#[command(
    name = "transcriptor",
    version,
    about = "Transcribe scanned PDF documents to text with Tesseract or a vision LLM",
    long_about = "Transcribe scanned PDF documents page by page with a local Tesseract engine \
or a remote vision model. Pages run concurrently within a budget sized from the CPU count \
(local) or the API rate-limit tier (remote); the merged output is always in page order.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF to transcribe. Without it every PDF in --input-dir is processed.
    pdf: Option<PathBuf>,

    /// Directory scanned for PDFs in batch mode.
    #[arg(long, env = "TRANSCRIPTOR_INPUT_DIR", default_value = "input")]
    input_dir: PathBuf,

    /// OCR engine.
    #[arg(short, long, env = "TRANSCRIPTOR_ENGINE", value_enum, default_value = "local")]
    engine: EngineArg,

    /// Output directory; each document writes to <OUTPUT>/<name>/.
    #[arg(short, long, env = "TRANSCRIPTOR_OUTPUT")]
    output: Option<PathBuf>,

    /// Title for the merged document (default: from the file name).
    #[arg(long)]
    title: Option<String>,

    /// Rendering DPI (72–600).
    #[arg(long, env = "TRANSCRIPTOR_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Language code(s): spa, eng, spa+eng, …
    #[arg(short, long, env = "TRANSCRIPTOR_LANG", default_value = "eng")]
    lang: String,

    /// Worker count: auto or a number (remote: can only lower the tier budget).
    #[arg(short, long, env = "TRANSCRIPTOR_WORKERS", default_value = "auto")]
    workers: WorkerSetting,

    /// API rate-limit tier for the remote engine.
    #[arg(long, env = "ANTHROPIC_TIER", default_value = "1")]
    tier: String,

    /// Pages to transcribe: 5, 1-3,7, all.
    #[arg(long, env = "TRANSCRIPTOR_PAGES", conflicts_with = "first")]
    pages: Option<PageSelection>,

    /// Transcribe only the first N pages.
    #[arg(long)]
    first: Option<usize>,

    /// Second AI pass fixing OCR errors; writes *_clean.md files (remote).
    #[arg(long)]
    cleanup: bool,

    /// Join hard-wrapped lines into paragraphs (remote).
    #[arg(long)]
    reflow: bool,

    /// Use the cheaper model class.
    #[arg(long, conflicts_with = "expensive")]
    cheapo: bool,

    /// Use the most capable model class.
    #[arg(long)]
    expensive: bool,

    /// edgequake-llm provider for the remote engine.
    #[arg(long, env = "TRANSCRIPTOR_PROVIDER")]
    provider: Option<String>,

    /// Image preprocessing mode (see --list-preprocess).
    #[arg(short, long, env = "TRANSCRIPTOR_PREPROCESS", default_value = "none")]
    preprocess: PreprocessMode,

    /// Preset for poor scans: all filters, auto-rotate, 300 DPI.
    #[arg(long)]
    enhance: bool,

    /// Detect page orientation and rotate before recognition.
    #[arg(short = 'r', long)]
    auto_rotate: bool,

    /// Minimum orientation confidence for auto-rotation.
    #[arg(long, default_value_t = 5.0)]
    rotate_confidence: f32,

    /// Binarisation threshold (0–255).
    #[arg(long, default_value_t = 140)]
    threshold: u8,

    /// Tesseract page segmentation mode (0–13).
    #[arg(long, default_value_t = 3)]
    psm: u8,

    /// Tesseract OCR engine mode (0–3).
    #[arg(long, default_value_t = 3)]
    oem: u8,

    /// Attempts per remote call (first try included).
    #[arg(long, env = "TRANSCRIPTOR_MAX_ATTEMPTS", default_value_t = 4)]
    max_attempts: u32,

    /// Base retry delay in milliseconds.
    #[arg(long, env = "TRANSCRIPTOR_RETRY_BASE_MS", default_value_t = 1000)]
    retry_base_ms: u64,

    /// Per-request timeout for the remote engine in seconds.
    #[arg(long, env = "TRANSCRIPTOR_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "TRANSCRIPTOR_PASSWORD")]
    password: Option<String>,

    /// Print the batch summary as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "TRANSCRIPTOR_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,

    /// List installed Tesseract languages and exit.
    #[arg(long)]
    list_langs: bool,

    /// List preprocessing modes and exit.
    #[arg(long)]
    list_preprocess: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum EngineArg {
    Local,
    Remote,
}

impl From<EngineArg> for EngineKind {
    fn from(v: EngineArg) -> Self {
        match v {
            EngineArg::Local => EngineKind::Local,
            EngineArg::Remote => EngineKind::Remote,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless -v asks for everything.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Utility commands ─────────────────────────────────────────────────
    if cli.list_preprocess {
        println!("Preprocessing modes:");
        for mode in PreprocessMode::ALL_MODES {
            println!("  {:<12} {}", mode.as_str(), mode.description());
        }
        return Ok(());
    }
    if cli.list_langs {
        let engine = TesseractEngine::new();
        let langs = tokio::task::spawn_blocking(move || engine.list_languages())
            .await
            .context("Language listing task failed")?
            .context("Could not list Tesseract languages")?;
        println!("Installed Tesseract languages:");
        for lang in langs {
            println!("  {lang}");
        }
        return Ok(());
    }

    // ── Inputs ───────────────────────────────────────────────────────────
    let pdfs = match &cli.pdf {
        Some(pdf) => vec![pdf.clone()],
        None => input::discover_pdfs(&cli.input_dir).with_context(|| {
            format!(
                "Nothing to do: pass a PDF or put PDFs in '{}'",
                cli.input_dir.display()
            )
        })?,
    };

    // ── Build config and run ─────────────────────────────────────────────
    let progress: Option<Arc<CliProgress>> = show_progress.then(CliProgress::new);
    let config = build_config(&cli, progress.clone().map(|p| p as ProgressCallback))?;
    let transcriber = Transcriber::from_config(config).context("Could not start the OCR engine")?;

    let summary = transcriber.transcribe_batch(&pdfs).await;
    if let Some(p) = &progress {
        p.bar.finish_and_clear();
    }

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
    } else if !cli.quiet {
        print_summary(&summary);
    }

    if summary.all_failed() {
        anyhow::bail!("all {} document(s) failed", summary.documents.len());
    }
    Ok(())
}

/// Map CLI args to `TranscriptionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<TranscriptionConfig> {
    let pages = match (cli.first, &cli.pages) {
        (Some(n), _) => PageSelection::First(n),
        (None, Some(sel)) => sel.clone(),
        (None, None) => PageSelection::All,
    };
    let model_class = if cli.cheapo {
        ModelClass::Cheap
    } else if cli.expensive {
        ModelClass::Expensive
    } else {
        ModelClass::Default
    };

    let mut builder = TranscriptionConfig::builder()
        .engine(cli.engine.into())
        .dpi(cli.dpi)
        .language(cli.lang.clone())
        .workers(cli.workers)
        .tier(cli.tier.clone())
        .pages(pages)
        .cleanup(cli.cleanup)
        .reflow(cli.reflow)
        .model_class(model_class)
        .preprocess(cli.preprocess)
        .binarize_threshold(cli.threshold)
        .auto_rotate(cli.auto_rotate)
        .rotate_confidence(cli.rotate_confidence)
        .psm(cli.psm)
        .oem(cli.oem)
        .max_attempts(cli.max_attempts)
        .retry_base_delay(Duration::from_millis(cli.retry_base_ms))
        .api_timeout_secs(cli.api_timeout);

    if cli.enhance {
        builder = builder.enhance();
    }
    if let Some(dir) = &cli.output {
        builder = builder.output_dir(dir);
    }
    if let Some(title) = &cli.title {
        builder = builder.title(title);
    }
    if let Some(provider) = &cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(password) = &cli.password {
        builder = builder.password(password);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_summary(summary: &BatchSummary) {
    for report in &summary.documents {
        match &report.status {
            DocumentStatus::Completed(doc) => {
                let mark = if doc.failed == 0 { green("✔") } else { yellow("⚠") };
                eprintln!(
                    "{}  {}/{} pages  {} workers  {}ms  →  {}",
                    mark,
                    doc.succeeded,
                    doc.requested,
                    doc.workers,
                    doc.duration_ms,
                    bold(&doc.merged_path.display().to_string()),
                );
                if !doc.failed_pages.is_empty() {
                    eprintln!("   failed pages: {}", red(&format!("{:?}", doc.failed_pages)));
                }
                if let Some(clean) = &doc.clean_path {
                    eprintln!("   cleaned: {}", clean.display());
                }
                eprintln!(
                    "   {}",
                    dim(&format!(
                        "{} chars, {} words, {} tokens in / {} tokens out",
                        doc.characters, doc.words, doc.input_tokens, doc.output_tokens
                    ))
                );
            }
            DocumentStatus::Failed {
                error,
                requested,
                succeeded,
                failed,
            } => {
                eprintln!("{}  {}: {}", red("✘"), report.path.display(), red(error));
                if *requested > 0 {
                    let counts = PageCounts {
                        requested: *requested,
                        succeeded: *succeeded,
                        failed: *failed,
                    };
                    eprintln!(
                        "   {}",
                        dim(&format!(
                            "{}/{} pages transcribed before the stop, {} failed, {} not reached",
                            succeeded,
                            requested,
                            failed,
                            counts.not_reached()
                        ))
                    );
                }
            }
        }
    }
    if summary.documents.len() > 1 {
        eprintln!(
            "{}",
            bold(&format!(
                "Batch: {} succeeded, {} failed in {}ms",
                summary.succeeded(),
                summary.failed(),
                summary.duration_ms
            ))
        );
    }
}
