//! CLI binary for edgequake-ocr.
//!
//! A thin shim over the library crate: maps flags to `RunnerConfig`,
//! registers the built-in backends and prints runs from the store.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_llm::LLMProvider;
use edgequake_ocr::backend::vision::provider_from_env;
use edgequake_ocr::{
    display_confidence, ArtifactSource, BackendRegistry, RecognitionBackend, Run,
    RunOrchestrator, RunProgressCallback, RunState, RunStore, RunnerConfig, SqliteRunStore,
    TesseractBackend, VisionBackend, VisionOptions,
};
use indicatif::{ProgressBar, ProgressStyle};
use once_cell::sync::OnceCell;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner while the artifact is prepared, then a bar over all variants.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl RunProgressCallback for CliProgressCallback {
    fn on_state(&self, state: RunState) {
        self.bar.set_message(state.to_string());
    }

    fn on_pages_resolved(&self, pages: usize, variants_per_page: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} variants  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length((pages * variants_per_page) as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Recognising");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            bold("◆"),
            bold(&format!("{pages} page(s) × {variants_per_page} variant(s)"))
        ));
    }

    fn on_variant_recognized(&self, done: usize, total: usize, label: &str, confidence: Option<f64>) {
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {:<28}  {}",
            green("✓"),
            done,
            total,
            label,
            dim(&display_confidence(confidence).unwrap_or_else(|| "n/a".to_string())),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, _run_id: i64, _summary_len: usize) {
        self.bar.finish_and_clear();
    }

    fn on_run_aborted(&self, last_state: RunState, error: &str) {
        self.bar.finish_and_clear();
        eprintln!("{} aborted after '{}': {}", red("✘"), last_state, error);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Recognise a scan with Tesseract (default backend)
  ocrrun run scan.png

  # A Word document, English only, JSON output
  ocrrun run letter.docx --lang eng --json

  # A remote PDF through a vision LLM
  ocrrun run https://example.com/invoice.pdf --backend vision

  # Inspect stored runs
  ocrrun list
  ocrrun show 42

BACKENDS:
  tesseract   tesseract CLI, all 5 variants, confidence 0-100
  vision      vision LLM via edgequake-llm, variants original/grayscale/contrast,
              no confidence (longest text wins)

ENVIRONMENT VARIABLES:
  OCR_DATA_DIR            Run storage root (default: storage)
  OCR_DATABASE_PATH       SQLite database (default: <data dir>/ocr.sqlite)
  OCR_PDF_DPI             PDF rasterisation DPI (default: 300)
  OCR_TESS_LANG           Tesseract default languages (default: vie+eng)
  OCR_VISION_LANG         Vision backend default language (default: vi)
  OCR_VISION_PROVIDER     LLM provider for the vision backend
  OCR_VISION_MODEL        LLM model for the vision backend
  OPENAI_API_KEY          OpenAI API key (vision backend)
  PDFIUM_LIB_PATH         Path to libpdfium or its directory
  OCR_LIBREOFFICE_BIN     LibreOffice executable for .doc/.docx
"#;

/// Recognise text in scans and documents with pluggable OCR backends.
#[derive(Parser, Debug)]
#[command(
    name = "ocrrun",
    version,
    about = "Recognise text in scans and documents with pluggable OCR backends",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Root directory for run storage.
    #[arg(long, global = true, env = "OCR_DATA_DIR", default_value = "storage")]
    data_dir: PathBuf,

    /// SQLite database path. Default: <data dir>/ocr.sqlite.
    #[arg(long, global = true, env = "OCR_DATABASE_PATH")]
    database: Option<PathBuf>,

    #[command(flatten)]
    backends: BackendArgs,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "OCR_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "OCR_QUIET")]
    quiet: bool,
}

#[derive(Args, Debug)]
struct BackendArgs {
    /// Default Tesseract language set.
    #[arg(long, global = true, env = "OCR_TESS_LANG", default_value = "vie+eng")]
    tess_lang: String,

    /// Tesseract executable.
    #[arg(long, global = true, env = "OCR_TESSERACT_BIN", default_value = "tesseract")]
    tesseract_bin: PathBuf,

    /// Default language for the vision backend.
    #[arg(long, global = true, env = "OCR_VISION_LANG", default_value = "vi")]
    vision_lang: String,

    /// LLM provider for the vision backend (auto-detected when unset).
    #[arg(long, global = true, env = "OCR_VISION_PROVIDER")]
    vision_provider: Option<String>,

    /// LLM model for the vision backend.
    #[arg(long, global = true, env = "OCR_VISION_MODEL")]
    vision_model: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an artifact through a backend and store the result tree.
    Run(RunArgs),
    /// List stored runs, newest first.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show one run with its pages, variants and results.
    Show {
        id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Delete a run and everything it owns.
    Delete { id: i64 },
    /// List registered backends.
    Backends,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Local file path or HTTP/HTTPS URL.
    input: String,

    /// Backend name (see `ocrrun backends`).
    #[arg(short, long, env = "OCR_BACKEND", default_value = "tesseract")]
    backend: String,

    /// Language/model hint; overrides the backend default.
    #[arg(short, long)]
    lang: Option<String>,

    /// Print the committed run as JSON.
    #[arg(long)]
    json: bool,

    /// Rasterisation DPI for PDF pages (72–600).
    #[arg(long, env = "OCR_PDF_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Pages whose variants are generated concurrently.
    #[arg(short, long, env = "OCR_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Per-variant recognition timeout in seconds (0 disables).
    #[arg(long, env = "OCR_RECOGNITION_TIMEOUT", default_value_t = 300)]
    recognition_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "OCR_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Path to libpdfium or the directory containing it.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// LibreOffice executable.
    #[arg(long, env = "OCR_LIBREOFFICE_BIN", default_value = "libreoffice")]
    libreoffice_bin: PathBuf,

    /// Disable progress bar.
    #[arg(long, env = "OCR_NO_PROGRESS")]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs during `run`.
    let show_progress = match &cli.command {
        Command::Run(args) => !cli.quiet && !args.no_progress && !args.json,
        _ => false,
    };
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

    let registry = build_registry(&cli.backends);
    if let Command::Backends = cli.command {
        for name in registry.names() {
            println!("{name}");
        }
        return Ok(());
    }

    let db_path = cli
        .database
        .clone()
        .unwrap_or_else(|| cli.data_dir.join("ocr.sqlite"));
    let store = Arc::new(
        SqliteRunStore::open(&db_path)
            .with_context(|| format!("Failed to open run store {}", db_path.display()))?,
    );

    match cli.command {
        Command::Run(args) => run(&cli.data_dir, cli.quiet, show_progress, registry, store, args).await,
        Command::List { json } => list(store.as_ref(), json).await,
        Command::Show { id, json } => show(store.as_ref(), id, json).await,
        Command::Delete { id } => {
            if !store.delete_run(id).await.context("Delete failed")? {
                bail!("Run {id} not found");
            }
            if !cli.quiet {
                eprintln!("{} deleted run {id}", green("✔"));
            }
            Ok(())
        }
        Command::Backends => Ok(()),
    }
}

/// Register the built-in backends.
///
/// The vision provider is created on first use and shared by every run, so
/// `tesseract`-only users never need an API key.
fn build_registry(args: &BackendArgs) -> BackendRegistry {
    let mut registry = BackendRegistry::new();

    let tess_bin = args.tesseract_bin.clone();
    let tess_lang = args.tess_lang.clone();
    registry.register("tesseract", move |hint: Option<&str>| {
        let backend = TesseractBackend::with_hint(tess_bin.clone(), tess_lang.clone(), hint);
        Ok(Box::new(backend) as Box<dyn RecognitionBackend>)
    });

    let provider: Arc<OnceCell<Arc<dyn LLMProvider>>> = Arc::new(OnceCell::new());
    let provider_name = args.vision_provider.clone();
    let model = args.vision_model.clone();
    let options = VisionOptions {
        default_language: Some(args.vision_lang.clone()),
        ..Default::default()
    };
    registry.register("vision", move |hint: Option<&str>| {
        let provider = provider
            .get_or_try_init(|| provider_from_env(provider_name.as_deref(), model.as_deref()))?;
        let backend = VisionBackend::new(Arc::clone(provider), options.clone(), hint);
        Ok(Box::new(backend) as Box<dyn RecognitionBackend>)
    });

    registry
}

async fn run(
    data_dir: &std::path::Path,
    quiet: bool,
    show_progress: bool,
    registry: BackendRegistry,
    store: Arc<SqliteRunStore>,
    args: RunArgs,
) -> Result<()> {
    let mut config = RunnerConfig::builder()
        .data_dir(data_dir)
        .dpi(args.dpi)
        .variant_concurrency(args.concurrency)
        .recognition_timeout_secs(args.recognition_timeout)
        .download_timeout_secs(args.download_timeout)
        .libreoffice_bin(args.libreoffice_bin.clone());
    if let Some(ref lib) = args.pdfium_lib {
        config = config.pdfium_lib_path(lib.clone());
    }
    let config = config.build().context("Invalid configuration")?;

    let mut builder = RunOrchestrator::builder(config)
        .registry(registry)
        .store(store as Arc<dyn RunStore>);
    if show_progress {
        builder = builder.progress_callback(CliProgressCallback::new() as Arc<dyn RunProgressCallback>);
    }
    let orchestrator = builder.build().context("Invalid configuration")?;

    let run = orchestrator
        .process(
            ArtifactSource::parse(&args.input),
            &args.backend,
            args.lang.as_deref(),
        )
        .await
        .context("Run failed")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&run).context("Failed to serialise run")?
        );
        return Ok(());
    }

    println!("{}", run.summary_text.as_deref().unwrap_or_default());
    if !quiet {
        eprintln!(
            "{}  run {}  {} page(s)  {} result(s)  confidence {}",
            green("✔"),
            bold(&run.id.to_string()),
            run.source_images().count(),
            run.text_results.len(),
            run.summary_confidence_display()
                .unwrap_or_else(|| "n/a".to_string()),
        );
    }
    Ok(())
}

async fn list(store: &dyn RunStore, json: bool) -> Result<()> {
    let runs = store.list().await.context("Failed to list runs")?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&runs).context("Failed to serialise runs")?
        );
        return Ok(());
    }
    if runs.is_empty() {
        eprintln!("{}", dim("no runs"));
        return Ok(());
    }
    println!(
        "{:>5}  {:<20}  {:<10}  {:<8}  {:>5}  {:>8}  file",
        "id", "created", "backend", "lang", "pages", "conf"
    );
    for run in &runs {
        println!(
            "{:>5}  {:<20}  {:<10}  {:<8}  {:>5}  {:>8}  {}",
            run.id,
            run.created_at.format("%Y-%m-%d %H:%M:%S"),
            run.backend,
            run.language.as_deref().unwrap_or("-"),
            run.source_images().count(),
            run.summary_confidence_display().unwrap_or_else(|| "-".into()),
            run.original_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
    }
    Ok(())
}

async fn show(store: &dyn RunStore, id: i64, json: bool) -> Result<()> {
    let Some(run) = store.get(id).await.context("Failed to load run")? else {
        bail!("Run {id} not found");
    };
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&run).context("Failed to serialise run")?
        );
        return Ok(());
    }
    print_run(&run);
    Ok(())
}

fn print_run(run: &Run) {
    println!("{}", bold(&format!("Run {}", run.id)));
    println!("  token:      {}", run.token);
    println!("  created:    {}", run.created_at.to_rfc3339());
    println!("  backend:    {}", run.backend);
    println!("  language:   {}", run.language.as_deref().unwrap_or("-"));
    println!("  original:   {}", run.original_path.display());
    if let Some(ref converted) = run.converted_path {
        println!("  document:   {}", converted.display());
    }
    println!(
        "  confidence: {}",
        run.summary_confidence_display().unwrap_or_else(|| "-".into())
    );

    for source in run.source_images() {
        println!();
        println!("{} {}", bold(&source.label), dim(&source.path.display().to_string()));
        for variant in run.variants_of(source.id) {
            for result in run.results_for(variant.id) {
                println!(
                    "  #{:<3} {:<28} {:>8}  {}",
                    variant.sequence,
                    variant.label,
                    result.confidence_display().unwrap_or_else(|| "-".into()),
                    dim(&preview(&result.text, 60)),
                );
            }
        }
    }

    let detached: Vec<_> = run.text_results.iter().filter(|r| r.image_id.is_none()).collect();
    if !detached.is_empty() {
        println!();
        println!("{}", bold("Results without image"));
        for result in detached {
            println!(
                "  {:<28} {:>8}  {}",
                result.variant_label,
                result.confidence_display().unwrap_or_else(|| "-".into()),
                dim(&preview(&result.text, 60)),
            );
        }
    }

    println!();
    println!("{}", bold("Summary"));
    println!("{}", run.summary_text.as_deref().unwrap_or(""));
}

/// First `max` characters of `text` on one line.
fn preview(text: &str, max: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > max {
        let cut: String = flat.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}\u{2026}")
    } else {
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_flattens_and_truncates() {
        assert_eq!(preview("a\n  b\tc", 10), "a b c");
        assert_eq!(preview("abcdefgh", 4), "abc\u{2026}");
        assert_eq!(preview("abc", 0), "\u{2026}");
    }

    #[test]
    fn run_args_parse_with_defaults() {
        let cli = Cli::try_parse_from(["ocrrun", "run", "scan.png", "-l", "eng"]).unwrap();
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.input, "scan.png");
                assert_eq!(args.backend, "tesseract");
                assert_eq!(args.lang.as_deref(), Some("eng"));
                assert_eq!(args.dpi, 300);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn dpi_out_of_range_is_rejected() {
        assert!(Cli::try_parse_from(["ocrrun", "run", "a.pdf", "--dpi", "1200"]).is_err());
    }

    #[test]
    fn show_takes_a_numeric_id() {
        let cli = Cli::try_parse_from(["ocrrun", "show", "12", "--json"]).unwrap();
        assert!(matches!(cli.command, Command::Show { id: 12, json: true }));
        assert!(Cli::try_parse_from(["ocrrun", "show", "twelve"]).is_err());
    }
}
