//! # edgequake-layout
//!
//! Turn a document (one image or a multi-page PDF) into a structured layout:
//! typed, positioned, transcribed regions per page, read by a Vision
//! Language Model.
//!
//! The backend is a generative model, so its output is treated as untrusted
//! input: every response is decoded, repaired where possible, and validated
//! record by record. A page that cannot be parsed is kept as `Filtered` with
//! its raw text; it never aborts the rest of the document.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / PNG / JPEG
//!  │
//!  ├─ 1. Input     resolve local file or download from URL, sniff format
//!  ├─ 2. Render    rasterise pages via pdfium at the configured DPI
//!  ├─ 3. Resize    fit each page into [min_pixels, max_pixels]
//!  ├─ 4. Dispatch  bounded-concurrency VLM calls, per-page retry + deadline
//!  ├─ 5. Parse     strict JSON → repair → salvage, or Filtered
//!  ├─ 6. Layout    clip boxes, reading order, optional de-duplication
//!  └─ 7. Aggregate page numbers, per-category counts, page statuses
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_layout::{parse_document, ParseConfig, Category};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = ParseConfig::default();
//!     let doc = parse_document("report.pdf", &config).await?;
//!     for table in &doc.elements_by_category()[&Category::Table] {
//!         println!("page {:?}: {}", table.page_number, table.bbox);
//!     }
//!     eprintln!("{} filtered page(s)", doc.stats().filtered_pages);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `doclayout` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! ```toml
//! edgequake-layout = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod convert;
pub mod document;
pub mod error;
pub mod markdown;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{parse_directory, parse_documents, BatchItem, BatchResult, BatchSummary};
pub use config::{
    PageSelection, PageSeparator, ParseConfig, ParseConfigBuilder, PixelBudget, RegionStrategy,
};
pub use convert::{
    detect_then_extract, extract_region, parse_bytes, parse_document, parse_document_sync,
    parse_loaded,
};
pub use document::{Document, Page};
pub use error::{BackendError, FilterReason, LayoutError};
pub use markdown::{render_document, MarkdownOptions};
pub use output::{
    BBox, Category, Dimensions, DocumentResult, DocumentStats, Element, ExtractedRegion,
    PageOutcome, PageResult, PageStatus, RegionResult,
};
pub use pipeline::backend::{InferenceBackend, LlmBackend};
pub use pipeline::encode::EncodedImage;
pub use pipeline::resize::ScalePlan;
pub use progress::{NoopProgressCallback, ParseProgressCallback, ProgressCallback};
pub use prompts::PromptMode;
pub use stream::{parse_loaded_stream, parse_stream};
