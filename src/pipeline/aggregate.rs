//! Merge per-page results into one [`DocumentResult`].

use crate::output::{DocumentResult, DocumentStats, PageOutcome, PageResult, PageStatus};
use std::time::Duration;
use tracing::info;

/// Stamp page numbers onto elements and compute document statistics.
///
/// `pages` must already be in page order. Filtered pages are counted,
/// never dropped.
pub fn aggregate(
    source: impl Into<String>,
    mut pages: Vec<PageResult>,
    dispatch_duration: Option<Duration>,
) -> DocumentResult {
    let mut stats = DocumentStats {
        total_pages: pages.len(),
        dispatch_duration_ms: dispatch_duration.map(|d| d.as_millis() as u64),
        ..Default::default()
    };

    for page in &mut pages {
        let page_number = page.page_number();
        match page.status() {
            PageStatus::Succeeded => stats.succeeded_pages += 1,
            PageStatus::Filtered => stats.filtered_pages += 1,
        }
        if let PageOutcome::Parsed { elements } = &mut page.outcome {
            for el in elements.iter_mut() {
                el.page_number = Some(page_number);
                *stats.category_counts.entry(el.category).or_default() += 1;
            }
            stats.total_elements += elements.len();
        }
    }

    info!(
        "Aggregated {} page(s): {} succeeded, {} filtered, {} element(s)",
        stats.total_pages, stats.succeeded_pages, stats.filtered_pages, stats.total_elements
    );
    DocumentResult::new(source.into(), pages, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FilterReason;
    use crate::output::{BBox, Category, Dimensions, Element};

    fn page(index: usize, outcome: PageOutcome) -> PageResult {
        PageResult {
            page_index: index,
            original: Dimensions::new(100, 100),
            scaled: Dimensions::new(100, 100),
            outcome,
            retries: 0,
            duration_ms: 5,
        }
    }

    fn parsed(categories: &[Category]) -> PageOutcome {
        PageOutcome::Parsed {
            elements: categories
                .iter()
                .map(|c| Element::new(*c, BBox::new(0.0, 0.0, 1.0, 1.0), "x"))
                .collect(),
        }
    }

    #[test]
    fn counts_and_page_numbers() {
        let doc = aggregate(
            "doc.pdf",
            vec![
                page(0, parsed(&[Category::Title, Category::Text, Category::Text])),
                page(
                    1,
                    PageOutcome::Filtered {
                        raw_text: "timeout".into(),
                        reason: FilterReason::BackendTimeout,
                    },
                ),
                page(2, parsed(&[Category::Table])),
            ],
            Some(Duration::from_millis(1500)),
        );

        let s = doc.stats();
        assert_eq!(s.total_pages, 3);
        assert_eq!(s.succeeded_pages, 2);
        assert_eq!(s.filtered_pages, 1);
        assert_eq!(s.total_elements, 4);
        assert_eq!(s.category_counts[&Category::Text], 2);
        assert_eq!(s.category_counts.get(&Category::Picture), None);
        assert_eq!(s.dispatch_duration_ms, Some(1500));

        let numbers: Vec<_> = doc.elements().map(|e| e.page_number).collect();
        assert_eq!(numbers, vec![Some(1), Some(1), Some(1), Some(3)]);
        assert_eq!(doc.filtered_pages().count(), 1);
        assert_eq!(doc.elements_by_category()[&Category::Text].len(), 2);
    }

    #[test]
    fn all_filtered_still_aggregates() {
        let doc = aggregate(
            "x",
            vec![page(
                0,
                PageOutcome::Filtered {
                    raw_text: "junk".into(),
                    reason: FilterReason::MalformedResponse,
                },
            )],
            None,
        );
        assert_eq!(doc.stats().filtered_pages, 1);
        assert_eq!(doc.stats().total_elements, 0);
        assert_eq!(doc.pages().len(), 1);
    }

    #[test]
    fn transcribed_pages_count_as_succeeded() {
        let doc = aggregate(
            "x",
            vec![page(0, PageOutcome::Transcribed { text: "hi".into() })],
            None,
        );
        assert_eq!(doc.stats().succeeded_pages, 1);
        assert_eq!(doc.elements().count(), 0);
    }
}
