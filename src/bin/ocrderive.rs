//! CLI binary for ocr-derivatives.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, picks a repository backend and prints results.

use anyhow::{bail, Context, Result};
use clap::Parser;
use ocr_derivatives::pipeline::hocr::HOCR_NAMING_BASELINE;
use ocr_derivatives::{
    BatchOutput, Channel, DerivativeKind, DerivativeStatus, DeriveProgressCallback, Deriver,
    FedoraRepository, FsRepository, ObjectId, PageReport, PipelineConfig, ProgressCallback,
    Repository, Severity, Tesseract, TokioProcessRunner,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
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
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar for the batch plus a log line per
/// object. Objects complete out of order, so start times are keyed by index.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} objects  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Deriving");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&index))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl DeriveProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Deriving OCR for {total} objects…"))
        ));
    }

    fn on_page_start(&self, index: usize, _total: usize, object: &ObjectId) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(index, Instant::now());
        }
        self.bar.set_message(object.to_string());
    }

    fn on_page_complete(&self, index: usize, total: usize, report: &PageReport) {
        let elapsed = self.elapsed_secs(index);
        let summary = report
            .outcomes
            .iter()
            .map(|o| format!("{} {}", o.kind, status_word(&o.status)))
            .collect::<Vec<_>>()
            .join(", ");
        let tick = if report.success() {
            green("✓")
        } else {
            self.errors.fetch_add(1, Ordering::SeqCst);
            red("✗")
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3} {:<24} {}  {}",
            tick,
            index,
            total,
            report.object,
            summary,
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, index: usize, total: usize, object: &ObjectId, error: &str) {
        let elapsed = self.elapsed_secs(index);
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3} {:<24} {}  {}",
            red("✗"),
            index,
            total,
            object,
            red(&msg),
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total: usize, success_count: usize) {
        let failed = total.saturating_sub(success_count);
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!(
                "{} {} objects processed successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} objects processed  ({} failed)",
                if failed == total { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

fn status_word(status: &DerivativeStatus) -> String {
    match status {
        DerivativeStatus::Created => "created".to_string(),
        DerivativeStatus::Skipped { reason } => format!("skipped ({reason})"),
        DerivativeStatus::Failed { .. } => "failed".to_string(),
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Derive OCR and HOCR for two pages in a directory-backed repository
  ocrderive --repo /srv/objects book:1 book:2

  # Regenerate only HOCR, overwriting what is there
  ocrderive --repo /srv/objects --only hocr --force book:1

  # Against a Fedora 3 repository
  ocrderive --fedora-url http://localhost:8080/fedora \
            --fedora-user fedoraAdmin --fedora-password secret islandora:42

  # Structured output
  ocrderive --repo /srv/objects --json book:1 > report.json

  # Check the installed tools
  ocrderive --tool-version
  ocrderive --list-languages

RELATIONSHIPS (namespace http://islandora.ca/ontology/relsext#):
  hasLanguage   tesseract language for the page; "no_ocr" skips derivation
  generate_ocr  FALSE suppresses derivation; removed after a successful HOCR write

ENVIRONMENT VARIABLES:
  Every flag has an OCRDERIVE_* equivalent, e.g. OCRDERIVE_REPO,
  OCRDERIVE_TESSERACT, OCRDERIVE_CONCURRENCY. RUST_LOG overrides the log filter.
"#;

/// Derive OCR and HOCR datastreams for repository page objects.
#[derive(Parser, Debug)]
#[command(
    name = "ocrderive",
    version,
    about = "Derive OCR and HOCR datastreams for repository page objects",
    long_about = "Run tesseract over the master image of each page object and store the \
plain-text (OCR) and positional markup (HOCR) results back on the object. Images tesseract \
cannot read are converted with ImageMagick first.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Page object identifiers, e.g. islandora:42.
    #[arg(required_unless_present_any = ["list_languages", "tool_version"])]
    objects: Vec<String>,

    /// Directory-backed repository root.
    #[arg(long, env = "OCRDERIVE_REPO", conflicts_with = "fedora_url")]
    repo: Option<PathBuf>,

    /// Fedora 3 base URL, e.g. http://localhost:8080/fedora.
    #[arg(long, env = "OCRDERIVE_FEDORA_URL")]
    fedora_url: Option<String>,

    /// Fedora user name.
    #[arg(long, env = "OCRDERIVE_FEDORA_USER", requires = "fedora_url")]
    fedora_user: Option<String>,

    /// Fedora password.
    #[arg(long, env = "OCRDERIVE_FEDORA_PASSWORD", hide_env_values = true)]
    fedora_password: Option<String>,

    /// Fedora HTTP request timeout in seconds.
    #[arg(long, env = "OCRDERIVE_HTTP_TIMEOUT", default_value_t = 60)]
    http_timeout: u64,

    /// Regenerate derivatives that already exist.
    #[arg(short, long, env = "OCRDERIVE_FORCE")]
    force: bool,

    /// Which derivatives to produce.
    #[arg(long, env = "OCRDERIVE_ONLY", value_enum, default_value = "both")]
    only: OnlyArg,

    /// Language used when an object has no hasLanguage relation.
    #[arg(short, long, env = "OCRDERIVE_LANGUAGE", default_value = "eng")]
    language: String,

    /// tesseract executable.
    #[arg(long, env = "OCRDERIVE_TESSERACT", default_value = "tesseract")]
    tesseract: PathBuf,

    /// ImageMagick convert executable.
    #[arg(long, env = "OCRDERIVE_CONVERT", default_value = "convert")]
    convert: PathBuf,

    /// ImageMagick identify executable (default: next to convert).
    #[arg(long, env = "OCRDERIVE_IDENTIFY")]
    identify: Option<PathBuf>,

    /// Datastream holding the page image.
    #[arg(long, env = "OCRDERIVE_SOURCE_DSID", default_value = "OBJ")]
    source_dsid: String,

    /// Directory for per-run scratch directories (default: system temp dir).
    #[arg(long, env = "OCRDERIVE_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// Per-subprocess timeout in seconds; 0 disables it.
    #[arg(long, env = "OCRDERIVE_TIMEOUT", default_value_t = 300)]
    timeout: u64,

    /// Number of objects processed concurrently.
    #[arg(short, long, env = "OCRDERIVE_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Print a JSON BatchOutput on stdout.
    #[arg(long, env = "OCRDERIVE_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "OCRDERIVE_NO_PROGRESS")]
    no_progress: bool,

    /// Print the tesseract version and exit.
    #[arg(long)]
    tool_version: bool,

    /// Print the installed tesseract languages and exit.
    #[arg(long)]
    list_languages: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "OCRDERIVE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "OCRDERIVE_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum OnlyArg {
    Ocr,
    Hocr,
    Both,
}

impl OnlyArg {
    fn kinds(self) -> Vec<DerivativeKind> {
        match self {
            OnlyArg::Ocr => vec![DerivativeKind::Ocr],
            OnlyArg::Hocr => vec![DerivativeKind::Hocr],
            OnlyArg::Both => DerivativeKind::ALL.to_vec(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && cli.objects.len() > 1;
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

    // ── Tool introspection ───────────────────────────────────────────────
    if cli.tool_version || cli.list_languages {
        let timeout = (cli.timeout > 0).then(|| Duration::from_secs(cli.timeout));
        let tesseract = Tesseract::new(
            cli.tesseract.clone(),
            Arc::new(TokioProcessRunner),
            timeout,
            HOCR_NAMING_BASELINE,
        )?;
        if cli.tool_version {
            let version = tesseract.version().await.context("Failed to query tesseract")?;
            let naming = if version > tesseract.hocr_baseline() {
                "<base>.hocr (renamed to .html)"
            } else {
                "<base>.html"
            };
            println!("tesseract {version}");
            println!("HOCR output: {naming}");
        }
        if cli.list_languages {
            for lang in tesseract
                .list_languages()
                .await
                .context("Failed to list tesseract languages")?
            {
                println!("{lang}");
            }
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn DeriveProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;
    let repository = open_repository(&cli)?;
    let deriver = Deriver::new(config, repository).context("Failed to set up the pipeline")?;

    // ── Run derivation ───────────────────────────────────────────────────
    let objects: Vec<ObjectId> = cli.objects.iter().map(|s| ObjectId::from(s.as_str())).collect();
    let output = deriver.derive_batch(&objects, &cli.only.kinds()).await;

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else {
        print_messages(&output, cli.quiet);
    }

    if !cli.quiet && !show_progress && !cli.json {
        let s = &output.stats;
        eprintln!(
            "{}  {}/{} objects  {} created  {} skipped  {} failed  {}ms",
            if s.failed_pages == 0 { green("✔") } else { red("✘") },
            s.succeeded_pages,
            s.total_pages,
            s.derivatives_created,
            s.derivatives_skipped,
            s.derivatives_failed,
            s.total_duration_ms,
        );
    }

    if output.stats.failed_pages > 0 {
        bail!(
            "{} of {} objects did not complete successfully",
            output.stats.failed_pages,
            output.stats.total_pages
        );
    }
    Ok(())
}

/// Route report messages: `Log` → tracing, `User` → stderr.
fn print_messages(output: &BatchOutput, quiet: bool) {
    for page in &output.pages {
        for outcome in &page.outcomes {
            for m in &outcome.report.messages {
                match (m.channel, m.severity) {
                    (Channel::Log, Severity::Error) => tracing::error!("{}", m.text),
                    (Channel::Log, Severity::Warning) => tracing::warn!("{}", m.text),
                    (Channel::Log, _) => tracing::info!("{}", m.text),
                    (Channel::User, _) if !quiet => eprintln!("{} {}", dim("·"), m.text),
                    (Channel::User, _) => {}
                }
            }
        }
    }
    for (object, error) in &output.errors {
        eprintln!("{} {}: {}", red("✗"), object, error);
    }
}

fn open_repository(cli: &Cli) -> Result<Arc<dyn Repository>> {
    if let Some(ref root) = cli.repo {
        if !root.is_dir() {
            bail!("Repository directory {} does not exist", root.display());
        }
        return Ok(Arc::new(FsRepository::new(root.clone())));
    }
    if let Some(ref url) = cli.fedora_url {
        let mut repo = FedoraRepository::new(url, cli.http_timeout)
            .with_context(|| format!("Failed to set up Fedora client for {url}"))?;
        if let Some(ref user) = cli.fedora_user {
            repo = repo.with_credentials(user.clone(), cli.fedora_password.clone().unwrap_or_default());
        }
        return Ok(Arc::new(repo));
    }
    bail!("No repository given: pass --repo DIR or --fedora-url URL")
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .tesseract_path(&cli.tesseract)
        .convert_path(&cli.convert)
        .default_language(cli.language.clone())
        .source_dsid(cli.source_dsid.clone())
        .force(cli.force)
        .process_timeout_secs(cli.timeout)
        .concurrency(cli.concurrency);
    if let Some(ref identify) = cli.identify {
        builder = builder.identify_path(identify);
    }
    if let Some(ref dir) = cli.scratch_dir {
        builder = builder.scratch_root(dir);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}
