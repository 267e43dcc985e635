//! Streaming API: emit page results as they complete.
//!
//! [`crate::convert::parse_document`] returns only after every page is
//! done. [`parse_stream`] yields each [`PageResult`] as soon as its page
//! finishes, so callers can show partial results or write pages
//! incrementally. Pages arrive in completion order; use
//! [`PageResult::page_number`] to correlate them.
//!
//! Streamed results carry no `page_number` on their elements; that is
//! stamped by the aggregator, which only runs for whole documents.

use crate::config::ParseConfig;
use crate::convert::build_jobs;
use crate::document::Document;
use crate::error::LayoutError;
use crate::pipeline::backend::resolve_backend;
use crate::pipeline::dispatch::{self, PageResultStream};
use tracing::info;

/// Parse a PDF or image, streaming page results as they are ready.
///
/// Pages are loaded, scaled and encoded before this returns; the returned
/// stream owns everything it needs.
///
/// # Errors
/// The same batch-fatal conditions as [`crate::convert::parse_document`].
///
/// # Example
/// ```rust,no_run
/// use edgequake_layout::{parse_stream, ParseConfig};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ParseConfig::default();
/// let mut pages = parse_stream("report.pdf", &config).await?;
/// while let Some(page) = pages.next().await {
///     println!("page {}: {:?}, {} elements", page.page_number(), page.status(), page.elements().len());
/// }
/// # Ok(())
/// # }
/// ```
pub async fn parse_stream(
    input: impl AsRef<str>,
    config: &ParseConfig,
) -> Result<PageResultStream, LayoutError> {
    let input = input.as_ref();
    info!("Starting streaming parse: {}", input);

    let doc = Document::open(input, config).await?;
    parse_loaded_stream(&doc, config)
}

/// Stream page results for an already-opened [`Document`].
pub fn parse_loaded_stream(
    doc: &Document,
    config: &ParseConfig,
) -> Result<PageResultStream, LayoutError> {
    let backend = resolve_backend(config)?;
    let jobs = build_jobs(doc, config)?;
    Ok(dispatch::dispatch_stream(jobs, backend, config))
}
