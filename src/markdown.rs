//! Markdown rendering of a [`DocumentResult`].
//!
//! Strings only; writing files is left to the caller.

use crate::config::PageSeparator;
use crate::output::{Category, DocumentResult, Element, PageOutcome, PageResult};
use crate::pipeline::postprocess::{clean_element_text, is_html_table};

/// Rendering switches.
#[derive(Debug, Clone, Default)]
pub struct MarkdownOptions {
    /// Leave out Page-header and Page-footer elements.
    pub no_header_footer: bool,
    /// Inserted between consecutive pages.
    pub separator: PageSeparator,
}

impl MarkdownOptions {
    /// The "no header/footer" variant with the default separator.
    pub fn without_header_footer() -> Self {
        Self {
            no_header_footer: true,
            ..Default::default()
        }
    }
}

/// Render every page, in page order, joined by the configured separator.
pub fn render_document(doc: &DocumentResult, opts: &MarkdownOptions) -> String {
    let mut out = String::new();
    for (i, page) in doc.pages().iter().enumerate() {
        if i > 0 {
            out.push_str(&opts.separator.render(page.page_number()));
        }
        out.push_str(render_page(page, opts).trim_end());
    }
    let trimmed = out.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}\n")
    }
}

/// Render one page. Filtered pages become an HTML comment.
pub fn render_page(page: &PageResult, opts: &MarkdownOptions) -> String {
    match &page.outcome {
        PageOutcome::Parsed { elements } => elements
            .iter()
            .filter(|el| !(opts.no_header_footer && el.category.is_page_furniture()))
            .filter_map(render_element)
            .collect::<Vec<_>>()
            .join("\n\n"),
        PageOutcome::Transcribed { text } => text.clone(),
        PageOutcome::Filtered { reason, .. } => {
            format!("<!-- page {} filtered: {} -->", page.page_number(), reason)
        }
    }
}

/// Render one element, or `None` for pictures and empty text.
pub fn render_element(el: &Element) -> Option<String> {
    if el.category == Category::Picture {
        return None;
    }
    let text = el.text.trim();
    if text.is_empty() {
        return None;
    }
    let rendered = match el.category {
        Category::Title => format!("# {}", single_line(text)),
        Category::SectionHeader => format!("## {}", single_line(text)),
        Category::Formula => format!("$$\n{}\n$$", clean_element_text(Category::Formula, text)),
        Category::Table => table_to_html(text),
        _ => text.to_string(),
    };
    Some(rendered)
}

/// Pass HTML tables through; keep pipe tables; wrap anything else.
pub fn table_to_html(text: &str) -> String {
    let text = text.trim();
    if is_html_table(text) || text.starts_with('|') {
        text.to_string()
    } else {
        format!("<table>\n<tbody>\n{text}\n</tbody>\n</table>")
    }
}

fn single_line(text: &str) -> String {
    text.trim_start_matches('#')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FilterReason;
    use crate::output::{BBox, Dimensions, DocumentStats};

    fn el(category: Category, text: &str) -> Element {
        Element::new(category, BBox::new(0.0, 0.0, 1.0, 1.0), text)
    }

    fn page(index: usize, outcome: PageOutcome) -> PageResult {
        PageResult {
            page_index: index,
            original: Dimensions::new(10, 10),
            scaled: Dimensions::new(10, 10),
            outcome,
            retries: 0,
            duration_ms: 0,
        }
    }

    #[test]
    fn element_rules() {
        assert_eq!(render_element(&el(Category::Title, "Report")).unwrap(), "# Report");
        assert_eq!(
            render_element(&el(Category::SectionHeader, "## 1.  Intro\n")).unwrap(),
            "## 1. Intro"
        );
        assert_eq!(
            render_element(&el(Category::Formula, "$$x^2$$")).unwrap(),
            "$$\nx^2\n$$"
        );
        assert!(render_element(&el(Category::Picture, "ignored")).is_none());
        assert!(render_element(&el(Category::Text, "  ")).is_none());
        assert_eq!(render_element(&el(Category::ListItem, "- a")).unwrap(), "- a");
    }

    #[test]
    fn tables() {
        assert_eq!(table_to_html("<table><tr/></table>"), "<table><tr/></table>");
        assert_eq!(table_to_html("| a |\n| --- |"), "| a |\n| --- |");
        assert_eq!(
            table_to_html("a b c"),
            "<table>\n<tbody>\na b c\n</tbody>\n</table>"
        );
    }

    #[test]
    fn document_rendering() {
        let doc = DocumentResult::new(
            "x".into(),
            vec![
                page(
                    0,
                    PageOutcome::Parsed {
                        elements: vec![
                            el(Category::PageHeader, "ACME Corp"),
                            el(Category::Title, "Report"),
                            el(Category::Text, "Body"),
                            el(Category::PageFooter, "1"),
                        ],
                    },
                ),
                page(
                    1,
                    PageOutcome::Filtered {
                        raw_text: "timeout".into(),
                        reason: FilterReason::BackendTimeout,
                    },
                ),
            ],
            DocumentStats::default(),
        );

        let full = render_document(&doc, &MarkdownOptions::default());
        assert_eq!(
            full,
            "ACME Corp\n\n# Report\n\nBody\n\n1\n\n---\n\n<!-- page 2 filtered: backend timeout -->\n"
        );

        let nohf = render_document(&doc, &MarkdownOptions::without_header_footer());
        assert!(nohf.starts_with("# Report\n\nBody\n\n---"));
        assert!(!nohf.contains("ACME"));
    }
}
