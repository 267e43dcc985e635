//! Configuration types for document layout parsing.
//!
//! All parsing behaviour is controlled through [`ParseConfig`], built via
//! its [`ParseConfigBuilder`]. One struct holding every knob is easy to
//! share across worker tasks and to log when comparing two runs.

use crate::error::LayoutError;
use crate::output::BBox;
use crate::pipeline::backend::InferenceBackend;
use crate::progress::ProgressCallback;
use crate::prompts::PromptMode;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Upper pixel bound of the reference model (≈ 3360 × 3360).
pub const MAX_PIXELS: u64 = 11_289_600;

/// Configuration for a document parse.
///
/// Built via [`ParseConfig::builder()`] or using [`ParseConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_layout::{ParseConfig, PromptMode};
///
/// let config = ParseConfig::builder()
///     .dpi(200)
///     .concurrency(4)
///     .prompt_mode(PromptMode::LayoutAll)
///     .max_pixels(4_000_000)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ParseConfig {
    /// Rasterisation DPI for PDF pages. Range: 72–600. Default: 200.
    ///
    /// Passed straight to the rasteriser; image inputs ignore it.
    pub dpi: u32,

    /// Minimum pixel area of the image sent to the backend. Default: None.
    ///
    /// Setting it is the only way an image gets upscaled.
    pub min_pixels: Option<u64>,

    /// Maximum pixel area of the image sent to the backend.
    /// Default: [`MAX_PIXELS`].
    pub max_pixels: Option<u64>,

    /// Number of pages in flight at once. Default: 4.
    ///
    /// Each in-flight page holds one backend request open. Lower it when the
    /// backend answers 429 / 503 under load.
    pub concurrency: usize,

    /// What to ask the backend for. Default: [`PromptMode::LayoutAll`].
    pub prompt_mode: PromptMode,

    /// Region in original-image coordinates. Required for
    /// [`PromptMode::GroundingOcr`], ignored otherwise.
    pub bbox: Option<BBox>,

    /// How region requests are sent. Default: [`RegionStrategy::Grounding`].
    pub region_strategy: RegionStrategy,

    /// Page selection. Default: all pages.
    pub pages: PageSelection,

    /// LLM model identifier. If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "ollama").
    /// If None along with `provider`, uses `ProviderFactory::from_env()`.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed inference backend. Takes precedence over every
    /// provider setting.
    pub backend: Option<Arc<dyn InferenceBackend>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens generated per page. Default: 16384.
    ///
    /// Dense pages serialised as JSON element lists are long; truncation
    /// here shows up as a malformed (cut-off) response.
    pub max_tokens: usize,

    /// Retries per page on a transient backend failure. Default: 2.
    ///
    /// Each page keeps its own counter; a flaky page cannot consume the
    /// retry allowance of its siblings.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Deadline for one backend call, in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Replace the built-in prompt text for the selected mode.
    pub prompt_override: Option<String>,

    /// Drop the later of two elements whose IoU reaches this value.
    /// Default: None (no de-duplication).
    pub dedup_iou_threshold: Option<f64>,

    /// Per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            dpi: 200,
            min_pixels: None,
            max_pixels: Some(MAX_PIXELS),
            concurrency: 4,
            prompt_mode: PromptMode::default(),
            bbox: None,
            region_strategy: RegionStrategy::default(),
            pages: PageSelection::default(),
            model: None,
            provider_name: None,
            provider: None,
            backend: None,
            temperature: 0.1,
            max_tokens: 16_384,
            max_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            download_timeout_secs: 120,
            password: None,
            prompt_override: None,
            dedup_iou_threshold: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ParseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParseConfig")
            .field("dpi", &self.dpi)
            .field("min_pixels", &self.min_pixels)
            .field("max_pixels", &self.max_pixels)
            .field("concurrency", &self.concurrency)
            .field("prompt_mode", &self.prompt_mode)
            .field("bbox", &self.bbox)
            .field("region_strategy", &self.region_strategy)
            .field("pages", &self.pages)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("backend", &self.backend.as_ref().map(|b| b.name().to_string()))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("dedup_iou_threshold", &self.dedup_iou_threshold)
            .finish()
    }
}

impl ParseConfig {
    /// Create a new builder for `ParseConfig`.
    pub fn builder() -> ParseConfigBuilder {
        ParseConfigBuilder {
            config: Self::default(),
        }
    }

    /// The pixel budget handed to the resolution planner.
    pub fn pixel_budget(&self) -> PixelBudget {
        PixelBudget {
            min_pixels: self.min_pixels,
            max_pixels: self.max_pixels,
        }
    }
}

/// Builder for [`ParseConfig`].
#[derive(Debug)]
pub struct ParseConfigBuilder {
    config: ParseConfig,
}

impl ParseConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn min_pixels(mut self, px: u64) -> Self {
        self.config.min_pixels = Some(px);
        self
    }

    pub fn max_pixels(mut self, px: u64) -> Self {
        self.config.max_pixels = Some(px);
        self
    }

    /// Remove both pixel bounds: images are sent at their original size.
    pub fn unbounded_pixels(mut self) -> Self {
        self.config.min_pixels = None;
        self.config.max_pixels = None;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn prompt_mode(mut self, mode: PromptMode) -> Self {
        self.config.prompt_mode = mode;
        self
    }

    pub fn bbox(mut self, bbox: BBox) -> Self {
        self.config.bbox = Some(bbox);
        self
    }

    pub fn region_strategy(mut self, strategy: RegionStrategy) -> Self {
        self.config.region_strategy = strategy;
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn prompt_override(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt_override = Some(prompt.into());
        self
    }

    pub fn dedup_iou_threshold(mut self, threshold: f64) -> Self {
        self.config.dedup_iou_threshold = Some(threshold.clamp(0.0, 1.0));
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ParseConfig, LayoutError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 600 {
            return Err(LayoutError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.concurrency == 0 {
            return Err(LayoutError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.min_pixels == Some(0) || c.max_pixels == Some(0) {
            return Err(LayoutError::InvalidConfig(
                "Pixel bounds must be > 0".into(),
            ));
        }
        if let (Some(min), Some(max)) = (c.min_pixels, c.max_pixels) {
            if min > max {
                return Err(LayoutError::InvalidConfig(format!(
                    "min_pixels ({min}) must be <= max_pixels ({max})"
                )));
            }
        }
        if c.prompt_mode == PromptMode::GroundingOcr && c.bbox.is_none() {
            return Err(LayoutError::InvalidConfig(
                "grounding-ocr mode requires a bbox".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Small config types ───────────────────────────────────────────────────

/// Pixel-area bounds for the image sent to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PixelBudget {
    pub min_pixels: Option<u64>,
    pub max_pixels: Option<u64>,
}

/// How a region request reaches the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RegionStrategy {
    /// Send the whole scaled page with the scaled bbox in the prompt. (default)
    #[default]
    Grounding,
    /// Crop the scaled page to the bbox and ask for plain text.
    Crop,
}

/// Specifies which pages of the document to parse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSelection {
    /// Parse all pages (default).
    #[default]
    All,
    /// Parse a single page (1-indexed).
    Single(usize),
    /// Parse a contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Parse specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

/// How to separate pages in rendered Markdown.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSeparator {
    /// Pages joined with "\n\n".
    None,
    /// Horizontal rule: "\n\n---\n\n" (default)
    #[default]
    HorizontalRule,
    /// HTML comment with page number: "<!-- page N -->"
    Comment,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// Render the separator string for the given page number (1-indexed).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::None => "\n\n".to_string(),
            PageSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            PageSeparator::Comment => format!("\n\n<!-- page {} -->\n\n", page_num),
            PageSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }
}
