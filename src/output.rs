//! Output types: elements, page results and the aggregated document result.
//!
//! Every type here is `Serialize` so external writers (JSON, Markdown, CSV,
//! HTML) can consume a [`DocumentResult`] without knowing anything about
//! how it was produced.

use crate::error::FilterReason;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ── Category ─────────────────────────────────────────────────────────────

/// The closed set of layout categories a backend may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    Title,
    Text,
    Table,
    Formula,
    #[serde(rename = "List-item")]
    ListItem,
    Caption,
    #[serde(rename = "Section-header")]
    SectionHeader,
    Picture,
    Footnote,
    #[serde(rename = "Page-header")]
    PageHeader,
    #[serde(rename = "Page-footer")]
    PageFooter,
}

impl Category {
    /// All categories, in declaration order.
    pub const ALL: [Category; 11] = [
        Category::Title,
        Category::Text,
        Category::Table,
        Category::Formula,
        Category::ListItem,
        Category::Caption,
        Category::SectionHeader,
        Category::Picture,
        Category::Footnote,
        Category::PageHeader,
        Category::PageFooter,
    ];

    /// Canonical label as it appears in backend output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Title => "Title",
            Category::Text => "Text",
            Category::Table => "Table",
            Category::Formula => "Formula",
            Category::ListItem => "List-item",
            Category::Caption => "Caption",
            Category::SectionHeader => "Section-header",
            Category::Picture => "Picture",
            Category::Footnote => "Footnote",
            Category::PageHeader => "Page-header",
            Category::PageFooter => "Page-footer",
        }
    }

    /// Page headers and footers repeat on every page.
    pub fn is_page_furniture(&self) -> bool {
        matches!(self, Category::PageHeader | Category::PageFooter)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a label is not one of the eleven known categories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCategory(pub String);

impl fmt::Display for UnknownCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown layout category '{}'", self.0)
    }
}

impl std::error::Error for UnknownCategory {}

impl FromStr for Category {
    type Err = UnknownCategory;

    /// Case-insensitive; `_` and spaces are accepted in place of `-`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .chars()
            .map(|c| match c {
                '_' | ' ' => '-',
                c => c.to_ascii_lowercase(),
            })
            .collect();
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().to_ascii_lowercase() == key)
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

// ── Geometry ─────────────────────────────────────────────────────────────

/// Pixel dimensions of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Axis-aligned box `[x1, y1, x2, y2]`, serialised as a 4-element array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f64 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// `0 ≤ x1 < x2 ≤ width` and `0 ≤ y1 < y2 ≤ height`.
    pub fn fits_within(&self, dims: Dimensions) -> bool {
        let (w, h) = (dims.width as f64, dims.height as f64);
        self.x1 >= 0.0
            && self.y1 >= 0.0
            && self.x1 < self.x2
            && self.y1 < self.y2
            && self.x2 <= w
            && self.y2 <= h
    }

    /// Intersection-over-union with another box, in `[0, 1]`.
    pub fn iou(&self, other: &BBox) -> f64 {
        let ix = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let iy = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = ix * iy;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

impl From<[f64; 4]> for BBox {
    fn from(v: [f64; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [f64; 4] {
    fn from(b: BBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

impl fmt::Display for BBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}, {}]", self.x1, self.y1, self.x2, self.y2)
    }
}

// ── Element ──────────────────────────────────────────────────────────────

/// One detected, categorised, positioned, transcribed region of a page.
///
/// `bbox` is in the coordinate space of the scaled image sent to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub category: Category,
    pub bbox: BBox,
    #[serde(default)]
    pub text: String,
    /// 1-based position after reading-order assignment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reading_order: Option<usize>,
    /// 1-based page number, set when pages are merged into a document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<usize>,
    /// Position in the backend's response; tie-breaker for reading order.
    #[serde(skip)]
    pub detection_index: usize,
}

impl Element {
    pub fn new(category: Category, bbox: BBox, text: impl Into<String>) -> Self {
        Self {
            category,
            bbox,
            text: text.into(),
            reading_order: None,
            page_number: None,
            detection_index: 0,
        }
    }
}

// ── Page results ─────────────────────────────────────────────────────────

/// Coarse status of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    Succeeded,
    Filtered,
}

/// What came back for a page.
///
/// Backend output is untrusted: anything that cannot be turned into
/// elements (or text, in text-only mode) is kept verbatim in `Filtered`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PageOutcome {
    /// Layout modes: elements in reading order.
    Parsed { elements: Vec<Element> },
    /// Text-only and region modes: free-form text.
    Transcribed { text: String },
    /// Dispatch or parsing failed; `raw_text` holds the response or diagnostic.
    Filtered {
        raw_text: String,
        reason: FilterReason,
    },
}

impl PageOutcome {
    pub fn status(&self) -> PageStatus {
        match self {
            PageOutcome::Filtered { .. } => PageStatus::Filtered,
            _ => PageStatus::Succeeded,
        }
    }

    pub fn elements(&self) -> &[Element] {
        match self {
            PageOutcome::Parsed { elements } => elements,
            _ => &[],
        }
    }

    pub fn filter_reason(&self) -> Option<FilterReason> {
        match self {
            PageOutcome::Filtered { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// Result for a single page. Exactly one exists per dispatched page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    /// 0-based index into the source document.
    pub page_index: usize,
    /// Size of the rasterised page.
    pub original: Dimensions,
    /// Size of the image actually sent to the backend.
    pub scaled: Dimensions,
    #[serde(flatten)]
    pub outcome: PageOutcome,
    /// Retries used (0 when the first attempt answered).
    pub retries: u32,
    /// Wall-clock time spent dispatching this page.
    pub duration_ms: u64,
}

impl PageResult {
    /// 1-based page number.
    pub fn page_number(&self) -> usize {
        self.page_index + 1
    }

    pub fn status(&self) -> PageStatus {
        self.outcome.status()
    }

    pub fn elements(&self) -> &[Element] {
        self.outcome.elements()
    }
}

// ── Region results ───────────────────────────────────────────────────────

/// Text read from a caller-supplied region of one page.
///
/// No category is known for a region, so there is no reading order either.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionResult {
    /// 0-based index of the page the region belongs to.
    pub page_index: usize,
    /// The region in original-image coordinates, as requested.
    pub bbox: BBox,
    /// The same region in the coordinate space sent to the backend.
    pub scaled_bbox: BBox,
    /// `Transcribed` on success, `Filtered` otherwise.
    #[serde(flatten)]
    pub outcome: PageOutcome,
    pub retries: u32,
    pub duration_ms: u64,
}

impl RegionResult {
    /// The transcribed text, if the request succeeded.
    pub fn text(&self) -> Option<&str> {
        match &self.outcome {
            PageOutcome::Transcribed { text } => Some(text),
            _ => None,
        }
    }
}

/// One element found by layout detection and then re-read as a region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRegion {
    pub category: Category,
    /// Original-image coordinates.
    pub bbox: BBox,
    pub region: RegionResult,
}

// ── Document result ──────────────────────────────────────────────────────

/// Aggregate statistics over every dispatched page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentStats {
    pub total_pages: usize,
    pub succeeded_pages: usize,
    pub filtered_pages: usize,
    pub total_elements: usize,
    pub category_counts: BTreeMap<Category, usize>,
    /// Wall-clock time of the whole dispatch phase, if tracked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatch_duration_ms: Option<u64>,
}

/// The merged result of a parse. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentResult {
    source: String,
    pages: Vec<PageResult>,
    stats: DocumentStats,
}

impl DocumentResult {
    pub(crate) fn new(source: String, pages: Vec<PageResult>, stats: DocumentStats) -> Self {
        Self {
            source,
            pages,
            stats,
        }
    }

    /// Path or URL the document was opened from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Page results in page order.
    pub fn pages(&self) -> &[PageResult] {
        &self.pages
    }

    pub fn stats(&self) -> &DocumentStats {
        &self.stats
    }

    /// Page result by 1-based page number.
    pub fn page(&self, page_number: usize) -> Option<&PageResult> {
        self.pages.iter().find(|p| p.page_number() == page_number)
    }

    /// Every element of every succeeded page, in page then reading order.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.pages.iter().flat_map(|p| p.elements().iter())
    }

    /// Elements grouped by category. Every category is present as a key.
    pub fn elements_by_category(&self) -> BTreeMap<Category, Vec<&Element>> {
        let mut groups: BTreeMap<Category, Vec<&Element>> =
            Category::ALL.iter().map(|c| (*c, Vec::new())).collect();
        for el in self.elements() {
            groups.entry(el.category).or_default().push(el);
        }
        groups
    }

    /// Filtered pages only.
    pub fn filtered_pages(&self) -> impl Iterator<Item = &PageResult> {
        self.pages
            .iter()
            .filter(|p| p.status() == PageStatus::Filtered)
    }
}
