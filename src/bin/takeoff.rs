//! CLI binary for sitework-takeoff.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig` and writes the resulting document.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use sitework_takeoff::extract::write_atomic;
use sitework_takeoff::{
    consolidated_markdown, extract_document, load_images, markdown_report, parse_document,
    split_pages, to_json, DocumentExtraction, ExtractionConfig, ExtractionProgressCallback,
    MergePolicy, PassMode, ProgressCallback,
};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Progress bar over pages, with a log line per finished page. Pages finish
/// out of order when concurrency > 1.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<u32, Instant>>,
    passes: Mutex<HashMap<u32, usize>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Extracting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            passes: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, page_num: u32) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn pass_count(&self, page_num: u32) -> usize {
        self.passes
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page_num))
            .unwrap_or(0)
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self, total_pages: usize) {
        self.bar.set_length(total_pages as u64);
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting takeoff from {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: u32, _total_pages: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_pass_complete(&self, page_num: u32, pass: &str) {
        if let Ok(mut m) = self.passes.lock() {
            *m.entry(page_num).or_insert(0) += 1;
        }
        self.bar.set_message(format!("page {page_num}: {pass}"));
    }

    fn on_page_complete(&self, page_num: u32, total_pages: usize, records: usize) {
        let secs = self.elapsed_secs(page_num);
        let passes = self.pass_count(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<12}  {:<9}  {}",
            green("✓"),
            page_num,
            total_pages,
            dim(&format!("{records:>4} records")),
            dim(&format!("{passes} passes")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: u32, total_pages: usize, error: &str) {
        let secs = self.elapsed_secs(page_num);
        self.pass_count(page_num);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total_pages,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_extraction_complete(&self, total_pages: usize, success_count: usize) {
        let failed = total_pages.saturating_sub(success_count);
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!(
                "{} {} pages extracted successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages extracted  ({} failed)",
                if failed == total_pages { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r##"EXAMPLES:
  # Parse saved model output, one markdown file per page
  takeoff parse page-1.md page-2.md page-3.md -o takeoff.json

  # Parse a consolidated document split on "# Page N" headings
  takeoff parse extraction.md --report takeoff-report.md

  # Run the vision workflow on rendered sheets
  takeoff extract sheet-1.png sheet-2.png -o takeoff.json --report report.md

  # One prompt per page, keep the raw model markdown
  takeoff extract --pass-mode single-pass --markdown raw.md sheets/*.png

  # Prefer the record with the most fields when sheets disagree
  takeoff parse --merge-policy most-complete extraction.md

MERGE POLICIES:
  confidence-first  Page confidence, then stated over uncertain, then most
                    specific number (default)
  most-complete     Record with the most typed fields wins
  most-specific     Stated over uncertain, then most decimal places
  most-recent       Latest page wins

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  RUST_LOG                Log filter (overrides --verbose/--quiet)
"##;

/// Extract pipes, structures and earthwork from construction drawings.
#[derive(Parser, Debug)]
#[command(
    name = "takeoff",
    version,
    about = "Extract pipes, structures and earthwork from construction drawings",
    long_about = "Turn vision-model readings of civil sheets into a reconciled takeoff. \
`parse` reads markdown the model already wrote; `extract` sends rendered page PNGs to a Vision LLM (OpenAI, Anthropic, Gemini, Ollama or any \
OpenAI-compatible endpoint).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "TAKEOFF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "TAKEOFF_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse vision-model markdown into a takeoff document.
    Parse(ParseArgs),
    /// Run the vision workflow on page images.
    Extract(ExtractArgs),
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Write the document JSON to this file instead of stdout.
    #[arg(short, long, env = "TAKEOFF_OUTPUT")]
    output: Option<PathBuf>,

    /// Also write a markdown takeoff report to this file.
    #[arg(long, env = "TAKEOFF_REPORT")]
    report: Option<PathBuf>,

    /// How competing values for the same record are resolved.
    #[arg(long, env = "TAKEOFF_MERGE_POLICY", value_enum, default_value = "confidence-first")]
    merge_policy: MergePolicyArg,

    /// Extra phrase meaning "nothing here" (repeatable).
    #[arg(long = "negative-phrase", env = "TAKEOFF_NEGATIVE_PHRASES", value_delimiter = ',')]
    negative_phrases: Vec<String>,
}

#[derive(Args, Debug)]
struct ParseArgs {
    /// Markdown files: one per page in order, or a single file with
    /// `# Page N` headings.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    #[command(flatten)]
    out: OutputArgs,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Page images (PNG), numbered from 1 in the order given.
    #[arg(required = true)]
    images: Vec<PathBuf>,

    #[command(flatten)]
    out: OutputArgs,

    /// Write the model's consolidated `# Page N` markdown to this file.
    #[arg(long, env = "TAKEOFF_MARKDOWN")]
    markdown: Option<PathBuf>,

    /// Model calls per page: three-pass or single-pass.
    #[arg(long, env = "TAKEOFF_PASS_MODE", value_enum, default_value = "three-pass")]
    pass_mode: PassModeArg,

    /// Pages processed concurrently.
    #[arg(short, long, env = "TAKEOFF_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// LLM model ID (e.g. gpt-4o, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Text file of firm-specific annotation examples added to every prompt.
    #[arg(long, env = "TAKEOFF_FIRM_EXAMPLES")]
    firm_examples: Option<PathBuf>,

    /// Leave the built-in notation guide out of the prompts.
    #[arg(long, env = "TAKEOFF_NO_NOTATION")]
    no_notation: bool,

    /// Max LLM output tokens per call.
    #[arg(long, env = "TAKEOFF_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "TAKEOFF_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries per model call.
    #[arg(long, env = "TAKEOFF_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "TAKEOFF_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Disable progress bar.
    #[arg(long, env = "TAKEOFF_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum MergePolicyArg {
    ConfidenceFirst,
    MostComplete,
    MostSpecific,
    MostRecent,
}

impl From<MergePolicyArg> for MergePolicy {
    fn from(v: MergePolicyArg) -> Self {
        match v {
            MergePolicyArg::ConfidenceFirst => MergePolicy::ConfidenceFirst,
            MergePolicyArg::MostComplete => MergePolicy::MostComplete,
            MergePolicyArg::MostSpecific => MergePolicy::MostSpecific,
            MergePolicyArg::MostRecent => MergePolicy::MostRecent,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum PassModeArg {
    ThreePass,
    SinglePass,
}

impl From<PassModeArg> for PassMode {
    fn from(v: PassModeArg) -> Self {
        match v {
            PassModeArg::ThreePass => PassMode::ThreePass,
            PassModeArg::SinglePass => PassMode::SinglePass,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs during `extract`.
    let show_progress = match &cli.command {
        Command::Extract(args) => !cli.quiet && !args.no_progress,
        Command::Parse(_) => false,
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

    match &cli.command {
        Command::Parse(args) => run_parse(args, cli.quiet).await,
        Command::Extract(args) => run_extract(args, cli.quiet, show_progress).await,
    }
}

async fn run_parse(args: &ParseArgs, quiet: bool) -> Result<()> {
    let config = base_builder(&args.out)
        .build()
        .context("Invalid configuration")?;

    let mut pages: Vec<(u32, String)> = Vec::new();
    if let [single] = args.inputs.as_slice() {
        let text = read_text(single).await?;
        pages = split_pages(&text);
    } else {
        for (i, path) in args.inputs.iter().enumerate() {
            pages.push((i as u32 + 1, read_text(path).await?));
        }
    }

    let doc = parse_document(pages, &config);
    write_outputs(&doc, &args.out).await?;
    if !quiet {
        print_summary(&doc);
    }
    Ok(())
}

async fn run_extract(args: &ExtractArgs, quiet: bool, show_progress: bool) -> Result<()> {
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };
    let config = build_extract_config(args, progress).await?;

    let images = load_images(&args.images)
        .await
        .context("Failed to load page images")?;
    let output = extract_document(images, &config)
        .await
        .context("Extraction failed")?;

    write_outputs(&output.document, &args.out).await?;
    if let Some(ref path) = args.markdown {
        write_atomic(path, &consolidated_markdown(&output.pages))
            .await
            .with_context(|| format!("Failed to write markdown to {}", path.display()))?;
    }

    if !quiet {
        print_summary(&output.document);
        eprintln!(
            "   {} model calls  /  {} tokens in  /  {} tokens out  —  {}ms total",
            dim(&output.stats.model_calls.to_string()),
            dim(&output.stats.total_input_tokens.to_string()),
            dim(&output.stats.total_output_tokens.to_string()),
            output.stats.total_duration_ms,
        );
    }
    Ok(())
}

/// Builder with the flags both subcommands share.
fn base_builder(out: &OutputArgs) -> sitework_takeoff::ExtractionConfigBuilder {
    ExtractionConfig::builder()
        .merge_policy(out.merge_policy.into())
        .extra_negative_phrases(out.negative_phrases.iter().cloned())
}

/// Map `extract` args to `ExtractionConfig`.
async fn build_extract_config(
    args: &ExtractArgs,
    progress: Option<ProgressCallback>,
) -> Result<ExtractionConfig> {
    let mut builder = base_builder(&args.out)
        .pass_mode(args.pass_mode.into())
        .concurrency(args.concurrency)
        .max_tokens(args.max_tokens)
        .temperature(args.temperature)
        .max_retries(args.max_retries)
        .api_timeout_secs(args.api_timeout);

    if let Some(ref model) = args.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref path) = args.firm_examples {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read firm examples from {}", path.display()))?;
        builder = builder.firm_examples(text);
    }
    if args.no_notation {
        builder = builder.without_notation();
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

async fn read_text(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

/// JSON to `-o` or stdout, plus the optional report.
async fn write_outputs(doc: &DocumentExtraction, out: &OutputArgs) -> Result<()> {
    let json = to_json(doc).context("Failed to serialise document")?;
    match out.output {
        Some(ref path) => write_atomic(path, &json)
            .await
            .with_context(|| format!("Failed to write JSON to {}", path.display()))?,
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(json.as_bytes())
                .context("Failed to write to stdout")?;
            handle.write_all(b"\n").ok();
        }
    }
    if let Some(ref path) = out.report {
        write_atomic(path, &markdown_report(doc))
            .await
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
    }
    Ok(())
}

fn print_summary(doc: &DocumentExtraction) {
    let s = &doc.summary;
    let q = &s.quality;
    let mark = if q.triage_pages.is_empty() { green("✔") } else { cyan("⚠") };
    eprintln!(
        "{}  {} pages  {} pipes ({:.2} LF)  {} structures  {} earthwork  {:.0}% confidence",
        mark,
        q.page_count,
        s.total_pipes,
        s.total_linear_ft,
        s.total_structures,
        s.total_earthwork,
        q.weighted_confidence_pct,
    );
    if s.conflicts > 0 || s.unresolved_references > 0 {
        eprintln!(
            "   {} merge conflicts  /  {} unresolved references",
            dim(&s.conflicts.to_string()),
            dim(&s.unresolved_references.to_string()),
        );
    }
    if !q.triage_pages.is_empty() {
        let pages: Vec<String> = q.triage_pages.iter().map(u32::to_string).collect();
        eprintln!("   review pages: {}", bold(&pages.join(", ")));
    }
}
