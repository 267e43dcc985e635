//! CLI binary for edgequake-layout.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ParseConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_layout::batch::scan_directory;
use edgequake_layout::{
    detect_then_extract, parse_document, parse_documents, render_document, BBox, BatchResult,
    Category, Document, MarkdownOptions, PageSelection, PageSeparator, ParseConfig,
    ParseProgressCallback, PromptMode, ProgressCallback, RegionStrategy,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

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

/// Terminal progress bar with one log line per finished page.
/// Pages may finish out of order.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    filtered: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Loading pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            filtered: AtomicUsize::new(0),
        })
    }

    fn elapsed(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ParseProgressCallback for CliProgressCallback {
    fn on_parse_start(&self, total_pages: usize) {
        self.bar.set_length(total_pages as u64);
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
        self.bar.set_prefix("Parsing");
        self.bar.reset_eta();
    }

    fn on_page_start(&self, page_num: usize, _total_pages: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total_pages: usize, elements: usize) {
        let secs = self.elapsed(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<14}  {}",
            green("✓"),
            page_num,
            total_pages,
            dim(&format!("{elements:>4} elements")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_filtered(&self, page_num: usize, total_pages: usize, reason: &str) {
        let secs = self.elapsed(page_num);
        self.filtered.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total_pages,
            red(reason),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_parse_complete(&self, total_pages: usize, succeeded: usize) {
        self.bar.finish_and_clear();
        let filtered = self.filtered.load(Ordering::SeqCst);
        if filtered == 0 {
            eprintln!(
                "{} {} pages parsed",
                green("✔"),
                bold(&succeeded.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages parsed  ({} filtered)",
                yellow("⚠"),
                bold(&succeeded.to_string()),
                total_pages,
                red(&filtered.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Full layout as JSON (stdout)
  doclayout report.pdf

  # Markdown without page headers/footers
  doclayout --markdown --no-hf report.pdf -o report.md

  # Boxes only, first five pages
  doclayout --mode layout-only --pages 1-5 report.pdf

  # Plain-text transcription of a scanned image
  doclayout --mode ocr scan.png

  # Read one region (original-image coordinates)
  doclayout --mode grounding-ocr --bbox 100,200,900,480 scan.png

  # Detect tables and formulas on page 3, then re-read each one
  doclayout --pages 3 --extract table,formula paper.pdf

  # Batch: several files, or every PDF/PNG/JPEG under a directory
  doclayout a.pdf b.png -o batch.json
  doclayout --recursive ./scans -o batch.json

PROMPT MODES:
  layout-all      categories, boxes and text for every element (default)
  layout-only     categories and boxes, no text
  ocr             free text of the whole page
  grounding-ocr   text inside --bbox

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  RUST_LOG                Tracing filter (overrides --verbose / --quiet)
"#;

/// Parse document layout from PDFs and images using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "doclayout",
    version,
    about = "Parse document layout from PDFs and images using Vision LLMs",
    long_about = "Detect typed, positioned regions (titles, text, tables, formulas, …) on every \
page of a PDF or image and transcribe them with a Vision Language Model. Pages that cannot be \
parsed are reported as filtered with the raw model output; they never abort the document.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF/PNG/JPEG paths, HTTP/HTTPS URLs or directories.
    /// More than one input, or any directory, runs a batch.
    #[arg(required = true, num_args = 1..)]
    inputs: Vec<String>,

    /// With a directory input: descend into subdirectories.
    #[arg(short, long)]
    recursive: bool,

    /// Write output to this file instead of stdout.
    #[arg(short, long, env = "DOCLAYOUT_OUTPUT")]
    output: Option<PathBuf>,

    /// Prompt mode: layout-all, layout-only, ocr, grounding-ocr.
    #[arg(long, env = "DOCLAYOUT_MODE", default_value = "layout-all")]
    mode: PromptMode,

    /// Region for grounding-ocr mode: x1,y1,x2,y2 in original-image pixels.
    #[arg(long, value_parser = parse_bbox)]
    bbox: Option<BBox>,

    /// How region requests are sent: grounding (whole page) or crop.
    #[arg(long, env = "DOCLAYOUT_REGION_STRATEGY", value_enum, default_value = "grounding")]
    region_strategy: StrategyArg,

    /// Detect the layout, then re-read every element of these categories
    /// (comma-separated, e.g. table,formula).
    #[arg(long, value_delimiter = ',')]
    extract: Vec<String>,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Rendering DPI for PDF pages (72–600).
    #[arg(long, env = "DOCLAYOUT_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Smallest pixel area sent to the model (enables upscaling).
    #[arg(long, env = "DOCLAYOUT_MIN_PIXELS")]
    min_pixels: Option<u64>,

    /// Largest pixel area sent to the model.
    #[arg(long, env = "DOCLAYOUT_MAX_PIXELS")]
    max_pixels: Option<u64>,

    /// Number of concurrent model calls.
    #[arg(short, long, env = "DOCLAYOUT_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "DOCLAYOUT_PAGES", default_value = "all")]
    pages: String,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "DOCLAYOUT_PASSWORD")]
    password: Option<String>,

    /// Path to a text file replacing the built-in prompt.
    #[arg(long)]
    prompt_file: Option<PathBuf>,

    /// Drop the later of two elements whose IoU reaches this value (0–1).
    #[arg(long)]
    dedup_iou: Option<f64>,

    /// Retries per page on a transient backend failure.
    #[arg(long, env = "DOCLAYOUT_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Per-call model timeout in seconds.
    #[arg(long, env = "DOCLAYOUT_API_TIMEOUT", default_value_t = 120)]
    timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "DOCLAYOUT_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Max model output tokens per page.
    #[arg(long, env = "DOCLAYOUT_MAX_TOKENS", default_value_t = 16384)]
    max_tokens: usize,

    /// Emit Markdown instead of JSON.
    #[arg(long)]
    markdown: bool,

    /// With --markdown: leave out page headers and footers.
    #[arg(long, requires = "markdown")]
    no_hf: bool,

    /// With --markdown: page separator (none, hr, comment, or custom string).
    #[arg(long, default_value = "hr")]
    separator: String,

    /// Disable progress bar.
    #[arg(long, env = "DOCLAYOUT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCLAYOUT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCLAYOUT_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum StrategyArg {
    Grounding,
    Crop,
}

impl From<StrategyArg> for RegionStrategy {
    fn from(v: StrategyArg) -> Self {
        match v {
            StrategyArg::Grounding => RegionStrategy::Grounding,
            StrategyArg::Crop => RegionStrategy::Crop,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless --verbose is given.
    let show_progress = !cli.quiet && !cli.no_progress;
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

    let batch_inputs = expand_inputs(&cli.inputs, cli.recursive)?;
    let is_batch = batch_inputs.len() > 1 || cli.inputs.iter().any(|i| Path::new(i).is_dir());
    if is_batch && !cli.extract.is_empty() {
        anyhow::bail!("--extract works on a single input");
    }

    // One bar per document does not fit a batch; per-file lines replace it.
    let progress_cb: Option<ProgressCallback> = if show_progress && !is_batch {
        Some(CliProgressCallback::new() as Arc<dyn ParseProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;

    let rendered = if is_batch {
        let batch = parse_documents(&batch_inputs, &config).await;
        if !cli.quiet {
            report_batch(&batch);
        }
        if cli.markdown {
            render_batch_markdown(&batch, &markdown_options(&cli))
        } else {
            serde_json::to_string_pretty(&batch).context("Failed to serialise batch")?
        }
    } else if cli.extract.is_empty() {
        let input = &batch_inputs[0];
        let result = parse_document(input, &config)
            .await
            .context("Parse failed")?;

        if !cli.quiet && !show_progress {
            let stats = result.stats();
            eprintln!(
                "Parsed {}/{} pages, {} elements",
                stats.succeeded_pages, stats.total_pages, stats.total_elements
            );
            if stats.filtered_pages > 0 {
                eprintln!("  {} pages filtered", stats.filtered_pages);
            }
        }

        if cli.markdown {
            render_document(&result, &markdown_options(&cli))
        } else {
            serde_json::to_string_pretty(&result).context("Failed to serialise result")?
        }
    } else {
        run_extract(&cli, &batch_inputs[0], &config).await?
    };

    if let Some(ref path) = cli.output {
        tokio::fs::write(path, rendered.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        if !cli.quiet {
            eprintln!("{}  →  {}", green("✔"), bold(&path.display().to_string()));
        }
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(rendered.as_bytes())
            .context("Failed to write to stdout")?;
        if !rendered.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
    }

    Ok(())
}

/// Replace directory inputs by the supported files they contain.
fn expand_inputs(inputs: &[String], recursive: bool) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for input in inputs {
        let path = Path::new(input);
        if path.is_dir() {
            let files = scan_directory(path, recursive)
                .with_context(|| format!("Failed to scan {}", path.display()))?;
            if files.is_empty() {
                eprintln!("{} no supported files in {}", yellow("⚠"), path.display());
            }
            out.extend(files.iter().map(|p| p.to_string_lossy().into_owned()));
        } else {
            out.push(input.clone());
        }
    }
    Ok(out)
}

fn markdown_options(cli: &Cli) -> MarkdownOptions {
    MarkdownOptions {
        no_header_footer: cli.no_hf,
        separator: parse_separator(&cli.separator),
    }
}

/// One line per input, then the totals.
fn report_batch(batch: &BatchResult) {
    for item in &batch.items {
        match &item.result {
            Ok(doc) => eprintln!(
                "  {} {}  {}",
                green("✓"),
                item.input,
                dim(&format!(
                    "{} pages, {} filtered, {:.1}s",
                    doc.stats().total_pages,
                    doc.stats().filtered_pages,
                    item.duration_ms as f64 / 1000.0
                ))
            ),
            Err(e) => eprintln!("  {} {}  {}", red("✗"), item.input, red(&e.to_string())),
        }
    }
    let s = &batch.summary;
    let mark = if s.failed_files == 0 { green("✔") } else { yellow("⚠") };
    eprintln!(
        "{} {}/{} files parsed, {} pages  ({} failed)",
        mark,
        bold(&s.succeeded_files.to_string()),
        s.total_files,
        s.total_pages,
        s.failed_files
    );
}

/// Every succeeded document under a source comment; failures as comments.
fn render_batch_markdown(batch: &BatchResult, opts: &MarkdownOptions) -> String {
    batch
        .items
        .iter()
        .map(|item| match &item.result {
            Ok(doc) => format!("<!-- source: {} -->\n\n{}", item.input, render_document(doc, opts)),
            Err(e) => format!("<!-- source: {} failed: {} -->\n", item.input, e),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Detect-then-extract over every selected page; prints one JSON array.
async fn run_extract(cli: &Cli, input: &str, config: &ParseConfig) -> Result<String> {
    let targets = cli
        .extract
        .iter()
        .map(|s| s.parse::<Category>())
        .collect::<Result<Vec<_>, _>>()
        .context("Invalid --extract category")?;

    let doc = Document::open(input, config)
        .await
        .context("Failed to open document")?;

    let mut all = Vec::new();
    for page in doc.pages() {
        let regions = detect_then_extract(&doc, page.page_number(), &targets, config)
            .await
            .with_context(|| format!("Extraction failed on page {}", page.page_number()))?;
        all.extend(regions);
    }
    if !cli.quiet {
        eprintln!("Extracted {} region(s)", all.len());
    }
    serde_json::to_string_pretty(&all).context("Failed to serialise regions")
}

/// Map CLI args to `ParseConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ParseConfig> {
    let mut builder = ParseConfig::builder()
        .dpi(cli.dpi)
        .concurrency(cli.concurrency)
        .prompt_mode(cli.mode)
        .region_strategy(cli.region_strategy.into())
        .pages(parse_pages(&cli.pages)?)
        .max_tokens(cli.max_tokens)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.timeout)
        .download_timeout_secs(cli.download_timeout);

    if let Some(px) = cli.min_pixels {
        builder = builder.min_pixels(px);
    }
    if let Some(px) = cli.max_pixels {
        builder = builder.max_pixels(px);
    }
    if let Some(bbox) = cli.bbox {
        builder = builder.bbox(bbox);
    }
    if let Some(t) = cli.dedup_iou {
        builder = builder.dedup_iou_threshold(t);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(ref path) = cli.prompt_file {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {:?}", path))?;
        builder = builder.prompt_override(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--bbox x1,y1,x2,y2`.
fn parse_bbox(s: &str) -> Result<BBox, String> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid coordinate: {e}"))?;
    match values.as_slice() {
        &[x1, y1, x2, y2] if x1 < x2 && y1 < y2 => Ok(BBox::new(x1, y1, x2, y2)),
        &[_, _, _, _] => Err("expected x1 < x2 and y1 < y2".into()),
        _ => Err(format!("expected 4 values, got {}", values.len())),
    }
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;

        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!("Invalid page range '{}-{}': start must be <= end", start, end);
        }
        return Ok(PageSelection::Range(start, end));
    }

    // Set: "1,3,5,7"
    if s.contains(',') {
        let pages = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .with_context(|| format!("Invalid page number: '{}'", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;
        if let Some(&p) = pages.iter().find(|&&p| p < 1) {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", p);
        }
        return Ok(PageSelection::Set(pages));
    }

    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }
    Ok(PageSelection::Single(page))
}

/// Parse `--separator` string into `PageSeparator`.
fn parse_separator(s: &str) -> PageSeparator {
    match s.to_lowercase().as_str() {
        "none" => PageSeparator::None,
        "hr" | "---" => PageSeparator::HorizontalRule,
        "comment" => PageSeparator::Comment,
        _ => PageSeparator::Custom(s.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_inputs_expand_to_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"%PDF").unwrap();
        std::fs::write(dir.path().join("skip.txt"), b"x").unwrap();
        let inputs = vec![
            dir.path().to_string_lossy().into_owned(),
            "https://x.org/b.png".to_string(),
        ];
        let out = expand_inputs(&inputs, false).unwrap();
        assert_eq!(out.len(), 2);
        assert!(out[0].ends_with("a.pdf"));
        assert_eq!(out[1], "https://x.org/b.png");
    }

    #[test]
    fn bbox_flag() {
        assert_eq!(parse_bbox("1, 2,30,40").unwrap(), BBox::new(1.0, 2.0, 30.0, 40.0));
        assert!(parse_bbox("1,2,3").is_err());
        assert!(parse_bbox("5,5,1,1").is_err());
        assert!(parse_bbox("a,b,c,d").is_err());
    }

    #[test]
    fn pages_flag() {
        assert!(matches!(parse_pages("all").unwrap(), PageSelection::All));
        assert!(matches!(parse_pages("3").unwrap(), PageSelection::Single(3)));
        assert!(matches!(parse_pages("2-4").unwrap(), PageSelection::Range(2, 4)));
        assert!(matches!(parse_pages("1,3").unwrap(), PageSelection::Set(ref v) if v == &[1, 3]));
        assert!(parse_pages("0").is_err());
        assert!(parse_pages("4-2").is_err());
    }

    #[test]
    fn separator_flag() {
        assert!(matches!(parse_separator("HR"), PageSeparator::HorizontalRule));
        assert!(matches!(parse_separator("<hr/>"), PageSeparator::Custom(ref s) if s == "<hr/>"));
    }
}
