//! Prompt modes and the prompt text sent with each page image.
//!
//! Every prompt lives here so a change in backend behaviour means editing
//! exactly one place, and tests can inspect prompts without a backend.
//! Callers can replace the text via
//! [`crate::config::ParseConfig::prompt_override`]; the mode still decides
//! how the response is parsed.

use crate::output::BBox;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Selects what the backend is asked to produce, and how its answer is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptMode {
    /// Layout detection plus text for every element. (default)
    #[default]
    LayoutAll,
    /// Layout detection only; element text is left empty.
    LayoutOnly,
    /// Plain text of the whole page, no layout.
    Ocr,
    /// Text inside a caller-supplied bounding box.
    GroundingOcr,
}

impl PromptMode {
    /// Modes whose response is a list of element records.
    pub fn is_structured(&self) -> bool {
        matches!(self, PromptMode::LayoutAll | PromptMode::LayoutOnly)
    }

    /// Identifier accepted on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptMode::LayoutAll => "layout-all",
            PromptMode::LayoutOnly => "layout-only",
            PromptMode::Ocr => "ocr",
            PromptMode::GroundingOcr => "grounding-ocr",
        }
    }
}

impl fmt::Display for PromptMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PromptMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "layout-all" | "prompt-layout-all-en" | "all" => Ok(PromptMode::LayoutAll),
            "layout-only" | "prompt-layout-only-en" | "layout" => Ok(PromptMode::LayoutOnly),
            "ocr" | "prompt-ocr" | "text" => Ok(PromptMode::Ocr),
            "grounding-ocr" | "prompt-grounding-ocr" | "grounding" | "region" => {
                Ok(PromptMode::GroundingOcr)
            }
            other => Err(format!("unknown prompt mode '{other}'")),
        }
    }
}

const CATEGORY_LIST: &str = "['Caption', 'Footnote', 'Formula', 'List-item', 'Page-footer', \
'Page-header', 'Picture', 'Section-header', 'Table', 'Text', 'Title']";

/// Full layout + text extraction.
pub fn layout_all_prompt() -> String {
    format!(
        r#"Please output the layout information from the PDF image, including each layout element's bbox, its category, and the corresponding text content within the bbox.

1. Bbox format: [x1, y1, x2, y2]

2. Layout Categories: The possible categories are {CATEGORY_LIST}.

3. Text Extraction & Formatting Rules:
    - Picture: For the 'Picture' category, the text field should be omitted.
    - Formula: Format its text as LaTeX.
    - Table: Format its text as HTML.
    - All Others (Text, Title, etc.): Format their text as Markdown.

4. Constraints:
    - The output text must be the original text from the image, with no translation.
    - All layout elements must be sorted according to human reading order.

5. Final Output: The entire output must be a single JSON list of objects with the keys "bbox", "category" and "text"."#
    )
}

/// Layout detection without text.
pub fn layout_only_prompt() -> String {
    format!(
        "Please output the layout information from this PDF image, including each layout's bbox \
and its category. The bbox should be in the format [x1, y1, x2, y2]. The layout categories for \
the PDF document include {CATEGORY_LIST}. Do not output the corresponding text. The layout \
result should be a JSON list of objects with the keys \"bbox\" and \"category\"."
    )
}

/// Whole-page plain text.
pub const OCR_PROMPT: &str = "Extract the text content from this image.";

/// Prefix of the region prompt; the bbox is appended in scaled coordinates.
pub const GROUNDING_PROMPT_PREFIX: &str =
    "Extract text from the given bounding box on the image (format: [x1, y1, x2, y2]).\nBounding Box:\n";

/// Region prompt for a bbox already mapped into the scaled image space.
pub fn grounding_prompt(scaled_bbox: &BBox) -> String {
    format!(
        "{GROUNDING_PROMPT_PREFIX}[{}, {}, {}, {}]",
        scaled_bbox.x1.round() as i64,
        scaled_bbox.y1.round() as i64,
        scaled_bbox.x2.round() as i64,
        scaled_bbox.y2.round() as i64
    )
}

/// Prompt text for a whole-page mode.
///
/// `GroundingOcr` needs a bbox and is built with [`grounding_prompt`]; asking
/// for it here falls back to the whole-page text prompt.
pub fn prompt_for(mode: PromptMode) -> String {
    match mode {
        PromptMode::LayoutAll => layout_all_prompt(),
        PromptMode::LayoutOnly => layout_only_prompt(),
        PromptMode::Ocr | PromptMode::GroundingOcr => OCR_PROMPT.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_prompts_name_every_category() {
        for c in crate::output::Category::ALL {
            assert!(layout_all_prompt().contains(c.as_str()), "missing {c}");
            assert!(layout_only_prompt().contains(c.as_str()), "missing {c}");
        }
    }

    #[test]
    fn grounding_prompt_rounds_coordinates() {
        let p = grounding_prompt(&BBox::new(10.4, 20.6, 100.0, 200.5));
        assert!(p.starts_with(GROUNDING_PROMPT_PREFIX));
        assert!(p.ends_with("[10, 21, 100, 201]"), "got: {p}");
    }

    #[test]
    fn prompt_mode_parses_original_identifiers() {
        assert_eq!(
            "prompt_layout_all_en".parse::<PromptMode>().unwrap(),
            PromptMode::LayoutAll
        );
        assert_eq!(
            "prompt_layout_only_en".parse::<PromptMode>().unwrap(),
            PromptMode::LayoutOnly
        );
        assert_eq!("prompt_ocr".parse::<PromptMode>().unwrap(), PromptMode::Ocr);
        assert_eq!(
            "grounding-ocr".parse::<PromptMode>().unwrap(),
            PromptMode::GroundingOcr
        );
        assert!("nonsense".parse::<PromptMode>().is_err());
    }

    #[test]
    fn structured_modes() {
        assert!(PromptMode::LayoutAll.is_structured());
        assert!(PromptMode::LayoutOnly.is_structured());
        assert!(!PromptMode::Ocr.is_structured());
        assert!(!PromptMode::GroundingOcr.is_structured());
    }
}
