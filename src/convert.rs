//! Eager (whole-document) parsing entry points.
//!
//! These functions wait for every page and return one [`DocumentResult`].
//! Use [`crate::stream::parse_stream`] to receive pages as they complete.

use crate::config::ParseConfig;
use crate::document::{Document, Page};
use crate::error::LayoutError;
use crate::output::{BBox, Category, DocumentResult, ExtractedRegion, PageOutcome, RegionResult};
use crate::pipeline::backend::{resolve_backend, InferenceBackend};
use crate::pipeline::dispatch::{self, PageJob};
use crate::pipeline::{aggregate, layout};
use crate::prompts::{self, PromptMode};
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Parse a PDF or image file (path or URL) into a layout result.
///
/// This is the primary entry point for the library.
///
/// # Returns
/// `Ok(DocumentResult)` whenever the pages could be loaded, even if some or
/// all of them ended up filtered (see [`DocumentResult::filtered_pages`]).
///
/// # Errors
/// Only batch-fatal conditions: the source cannot be opened, no backend is
/// configured, or a region-grounded request has an out-of-bounds bbox.
pub async fn parse_document(
    input: impl AsRef<str>,
    config: &ParseConfig,
) -> Result<DocumentResult, LayoutError> {
    let input = input.as_ref();
    info!("Starting parse: {}", input);

    let doc = Document::open(input, config).await?;
    parse_loaded(&doc, config).await
}

/// Parse an already-opened [`Document`].
pub async fn parse_loaded(doc: &Document, config: &ParseConfig) -> Result<DocumentResult, LayoutError> {
    let backend = resolve_backend(config)?;
    let jobs = build_jobs(doc, config)?;

    let start = Instant::now();
    let pages = dispatch::dispatch_all(jobs, backend, config).await;
    let result = aggregate::aggregate(doc.source(), pages, Some(start.elapsed()));

    info!(
        "Parse complete: {}/{} pages succeeded in {}ms",
        result.stats().succeeded_pages,
        result.stats().total_pages,
        result.stats().dispatch_duration_ms.unwrap_or_default()
    );
    Ok(result)
}

/// Synchronous wrapper around [`parse_document`].
///
/// Creates a temporary tokio runtime internally.
pub fn parse_document_sync(
    input: impl AsRef<str>,
    config: &ParseConfig,
) -> Result<DocumentResult, LayoutError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| LayoutError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(parse_document(input, config))
}

/// Parse PDF or image bytes held in memory.
///
/// The bytes are written to a managed temp file that is removed on return.
pub async fn parse_bytes(bytes: &[u8], config: &ParseConfig) -> Result<DocumentResult, LayoutError> {
    let mut tmp = tempfile::NamedTempFile::new()
        .map_err(|e| LayoutError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| LayoutError::Internal(format!("tempfile write: {e}")))?;
    let path = tmp.path().to_string_lossy().to_string();
    parse_document(&path, config).await
}

/// Read the text inside `bbox` (original-image coordinates) on one page.
///
/// # Errors
/// [`LayoutError::PageOutOfRange`] for an unknown page and
/// [`LayoutError::InvalidRegion`] when `bbox` is outside the page; both are
/// raised before anything is sent.
pub async fn extract_region(
    doc: &Document,
    page_number: usize,
    bbox: BBox,
    config: &ParseConfig,
) -> Result<RegionResult, LayoutError> {
    let page = page_by_number(doc, page_number)?;
    let backend = resolve_backend(config)?;
    let mut results = run_regions(page, &[bbox], backend, config).await?;
    results
        .pop()
        .ok_or_else(|| LayoutError::Internal("region dispatch returned no result".into()))
}

/// Detect the layout of one page, then re-read every element whose category
/// is in `targets` as its own region.
///
/// Returns an empty list when the layout pass itself ends up filtered.
pub async fn detect_then_extract(
    doc: &Document,
    page_number: usize,
    targets: &[Category],
    config: &ParseConfig,
) -> Result<Vec<ExtractedRegion>, LayoutError> {
    let page = page_by_number(doc, page_number)?;
    let backend = resolve_backend(config)?;

    let prompt = prompts::prompt_for(PromptMode::LayoutOnly);
    let job = PageJob::for_page(page, &prompt, PromptMode::LayoutOnly);
    let detected = dispatch::dispatch_all(vec![job], Arc::clone(&backend), config)
        .await
        .pop()
        .ok_or_else(|| LayoutError::Internal("layout dispatch returned no result".into()))?;

    let (elements, plan) = match (&detected.outcome, page.plan()) {
        (PageOutcome::Parsed { elements }, Some(plan)) => (elements, plan),
        (outcome, _) => {
            warn!(
                "Page {}: layout pass did not succeed ({:?}), nothing to extract",
                page_number,
                outcome.filter_reason()
            );
            return Ok(Vec::new());
        }
    };

    let wanted = layout::to_original_space(&layout::filter_categories(elements, targets), &plan);
    debug!(
        "Page {}: {} of {} element(s) selected for extraction",
        page_number,
        wanted.len(),
        elements.len()
    );

    let boxes: Vec<BBox> = wanted.iter().map(|el| el.bbox).collect();
    let regions = run_regions(page, &boxes, backend, config).await?;

    Ok(wanted
        .into_iter()
        .zip(regions)
        .map(|(el, region)| ExtractedRegion {
            category: el.category,
            bbox: el.bbox,
            region,
        })
        .collect())
}

// ── Internal helpers ─────────────────────────────────────────────────────

fn page_by_number(doc: &Document, page_number: usize) -> Result<&Page, LayoutError> {
    doc.page(page_number).ok_or(LayoutError::PageOutOfRange {
        page: page_number,
        total: doc.len(),
    })
}

/// Build one job per page for the configured mode.
///
/// Region-grounded mode validates the bbox against every page first, so an
/// out-of-bounds bbox fails the call before anything is dispatched.
pub(crate) fn build_jobs(doc: &Document, config: &ParseConfig) -> Result<Vec<PageJob>, LayoutError> {
    let mode = config.prompt_mode;

    if mode == PromptMode::GroundingOcr {
        let bbox = config.bbox.ok_or_else(|| {
            LayoutError::InvalidConfig("grounding-ocr mode requires a bbox".into())
        })?;
        return doc
            .pages()
            .iter()
            .map(|page| {
                if page.plan().is_none() {
                    return Ok(PageJob::for_page(page, "", mode));
                }
                let request = layout::prepare_region(
                    page,
                    bbox,
                    config.region_strategy,
                    config.prompt_override.as_deref(),
                )?;
                Ok(PageJob::for_region(page, &request))
            })
            .collect();
    }

    let prompt = config
        .prompt_override
        .clone()
        .unwrap_or_else(|| prompts::prompt_for(mode));
    Ok(doc
        .pages()
        .iter()
        .map(|page| PageJob::for_page(page, &prompt, mode))
        .collect())
}

/// Validate, dispatch and collect region requests for one page.
async fn run_regions(
    page: &Page,
    boxes: &[BBox],
    backend: Arc<dyn InferenceBackend>,
    config: &ParseConfig,
) -> Result<Vec<RegionResult>, LayoutError> {
    let requests = boxes
        .iter()
        .map(|b| {
            layout::prepare_region(
                page,
                *b,
                config.region_strategy,
                config.prompt_override.as_deref(),
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    let jobs = requests
        .iter()
        .map(|r| PageJob::for_region(page, r))
        .collect();
    let results = dispatch::dispatch_all(jobs, backend, config).await;

    Ok(requests
        .into_iter()
        .zip(results)
        .map(|(req, res)| RegionResult {
            page_index: res.page_index,
            bbox: req.bbox,
            scaled_bbox: req.scaled_bbox,
            outcome: res.outcome,
            retries: res.retries,
            duration_ms: res.duration_ms,
        })
        .collect())
}
