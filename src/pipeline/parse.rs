//! Response parsing: raw backend text → [`PageOutcome`].
//!
//! Backend output is untrusted. Decoding runs in three passes, each only
//! when the previous one produced nothing:
//!
//! 1. strict JSON decode of the whole response;
//! 2. repair: strip code fences or surrounding prose, drop trailing commas,
//!    then decode strictly again;
//! 3. salvage: pull every complete `{…}` record out of the text, which
//!    rescues responses cut off mid-list by a token limit.
//!
//! Records are validated one by one. A record without a known category or a
//! four-number bbox is dropped on its own; the rest of the page survives.
//! When nothing valid remains the page is `Filtered` and the raw text is
//! kept verbatim.

use crate::error::FilterReason;
use crate::output::{BBox, Category, Element, PageOutcome};
use crate::pipeline::postprocess::{clean_element_text, clean_text, strip_outer_fences};
use crate::prompts::PromptMode;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

/// Keys under which some models nest the element list.
const WRAPPER_KEYS: [&str; 4] = ["elements", "layout", "layout_dets", "results"];

static RE_FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n(.*?)```").unwrap());

static RE_TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",(\s*[\]}])").unwrap());

/// Which pass produced the record list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Strict,
    Repaired,
    Salvaged,
}

/// Parse one page response according to the prompt mode.
///
/// Structured modes yield `Parsed` or `Filtered`; text modes always yield
/// `Transcribed` with the cleaned text.
pub fn parse_response(raw: &str, mode: PromptMode) -> PageOutcome {
    if mode.is_structured() {
        parse_layout(raw)
    } else {
        PageOutcome::Transcribed {
            text: clean_text(raw),
        }
    }
}

/// Parse a layout response into elements in detection order.
///
/// Reading order is not assigned here.
pub fn parse_layout(raw: &str) -> PageOutcome {
    let (records, pass) = match decode_records(raw) {
        Some(records) => (records, Pass::Strict),
        None => match repair_candidates(raw).iter().find_map(|c| decode_records(c)) {
            Some(records) => (records, Pass::Repaired),
            None => (salvage_records(raw), Pass::Salvaged),
        },
    };

    let total = records.len();
    let elements: Vec<Element> = records
        .iter()
        .enumerate()
        .filter_map(|(i, record)| element_from_record(record, i))
        .collect();

    if elements.is_empty() && (total > 0 || pass == Pass::Salvaged) {
        warn!(
            "Malformed response: {} record(s), none valid ({} bytes kept)",
            total,
            raw.len()
        );
        return PageOutcome::Filtered {
            raw_text: raw.to_string(),
            reason: FilterReason::MalformedResponse,
        };
    }

    if elements.len() < total {
        debug!(
            "Dropped {} of {} record(s) missing a category or bbox",
            total - elements.len(),
            total
        );
    }
    if pass != Pass::Strict {
        debug!("Response decoded after {:?} pass", pass);
    }

    PageOutcome::Parsed { elements }
}

// ── Decoding passes ──────────────────────────────────────────────────────

fn decode_records(text: &str) -> Option<Vec<Value>> {
    let value: Value = serde_json::from_str(text.trim()).ok()?;
    records_of(value)
}

fn records_of(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(mut map) => {
            for key in WRAPPER_KEYS {
                if matches!(map.get(key), Some(Value::Array(_))) {
                    if let Some(Value::Array(items)) = map.remove(key) {
                        return Some(items);
                    }
                }
            }
            if map.contains_key("category") {
                Some(vec![Value::Object(map)])
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Cleaned-up variants of `raw` to retry strict decoding on.
fn repair_candidates(raw: &str) -> Vec<String> {
    let mut candidates = Vec::new();

    let unfenced = strip_outer_fences(raw);
    if unfenced.trim() != raw.trim() {
        candidates.push(unfenced);
    }
    if let Some(caps) = RE_FENCED_BLOCK.captures(raw) {
        candidates.push(caps[1].to_string());
    }
    for (open, close) in [('[', ']'), ('{', '}')] {
        if let (Some(s), Some(e)) = (raw.find(open), raw.rfind(close)) {
            if s < e {
                candidates.push(raw[s..=e].to_string());
            }
        }
    }

    let without_commas: Vec<String> = candidates
        .iter()
        .map(|c| RE_TRAILING_COMMA.replace_all(c, "$1").into_owned())
        .filter(|c| !candidates.contains(c))
        .collect();
    candidates.extend(without_commas);
    candidates
}

/// Every complete JSON object carrying a `category` key, in text order.
fn salvage_records(raw: &str) -> Vec<Value> {
    let mut out = Vec::new();
    let mut starts: Vec<usize> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in raw.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' if !starts.is_empty() => in_string = true,
            '{' => starts.push(i),
            '}' => {
                if let Some(s) = starts.pop() {
                    if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(&raw[s..=i]) {
                        if v.get("category").is_some() {
                            out.push(v);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    out
}

// ── Record validation ────────────────────────────────────────────────────

fn element_from_record(record: &Value, index: usize) -> Option<Element> {
    let obj = record.as_object()?;
    let category: Category = obj.get("category")?.as_str()?.parse().ok()?;

    let coords = obj.get("bbox")?.as_array()?;
    if coords.len() != 4 {
        return None;
    }
    let mut c = [0f64; 4];
    for (slot, v) in c.iter_mut().zip(coords) {
        *slot = v.as_f64()?;
    }

    let text = match obj.get("text") {
        Some(Value::String(s)) => clean_element_text(category, s),
        None | Some(Value::Null) => String::new(),
        Some(other) => other.to_string(),
    };

    let mut el = Element::new(category, BBox::from(c), text);
    el.detection_index = index;
    Some(el)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"[{"category":"Title","bbox":[10,10,200,40],"text":"Report"},{"category":"Text","bbox":[10,50,200,100],"text":"Body"}]"#;

    fn elements(outcome: &PageOutcome) -> &[Element] {
        match outcome {
            PageOutcome::Parsed { elements } => elements,
            other => panic!("expected Parsed, got {other:?}"),
        }
    }

    #[test]
    fn strict_decode() {
        let out = parse_layout(VALID);
        let els = elements(&out);
        assert_eq!(els.len(), 2);
        assert_eq!(els[0].category, Category::Title);
        assert_eq!(els[0].bbox, BBox::new(10.0, 10.0, 200.0, 40.0));
        assert_eq!(els[1].text, "Body");
        assert_eq!(els[1].detection_index, 1);
        assert!(els.iter().all(|e| e.reading_order.is_none()));
    }

    #[test]
    fn fenced_response_is_repaired() {
        let raw = format!("```json\n{VALID}\n```");
        assert_eq!(elements(&parse_layout(&raw)).len(), 2);
    }

    #[test]
    fn prose_wrapped_response_is_repaired() {
        let raw = format!("Here is the layout you asked for:\n{VALID}\nLet me know if you need more.");
        assert_eq!(elements(&parse_layout(&raw)).len(), 2);
    }

    #[test]
    fn trailing_comma_is_repaired() {
        let raw = r#"[{"category":"Text","bbox":[0,0,5,5],"text":"a"},]"#;
        assert_eq!(elements(&parse_layout(raw)).len(), 1);
    }

    #[test]
    fn truncated_list_keeps_complete_records() {
        let raw = r#"[{"category":"Title","bbox":[10,10,200,40],"text":"Report"},{"category":"Text","bbox":[10,50,2"#;
        let out = parse_layout(raw);
        let els = elements(&out);
        assert_eq!(els.len(), 1);
        assert_eq!(els[0].text, "Report");
    }

    #[test]
    fn invalid_records_dropped_individually() {
        let raw = r#"[
            {"category":"Title","bbox":[10,10,200,40],"text":"Report"},
            {"category":"Chart","bbox":[0,0,1,1],"text":"unknown category"},
            {"category":"Text","bbox":[0,0,1],"text":"short bbox"},
            {"bbox":[0,0,1,1],"text":"no category"},
            {"category":"Text","bbox":[10,50,200,100]}
        ]"#;
        let out = parse_layout(raw);
        let els = elements(&out);
        assert_eq!(els.len(), 2);
        assert_eq!(els[0].category, Category::Title);
        assert_eq!(els[1].text, "");
        assert_eq!(els[1].detection_index, 4);
    }

    #[test]
    fn wrapper_object_is_unwrapped() {
        let raw = format!(r#"{{"elements": {VALID}}}"#);
        assert_eq!(elements(&parse_layout(&raw)).len(), 2);
    }

    #[test]
    fn empty_list_is_success() {
        assert!(elements(&parse_layout("[]")).is_empty());
    }

    #[test]
    fn garbage_is_filtered_with_raw_text() {
        let raw = "I'm sorry, I cannot read this image.";
        match parse_layout(raw) {
            PageOutcome::Filtered { raw_text, reason } => {
                assert_eq!(raw_text, raw);
                assert_eq!(reason, FilterReason::MalformedResponse);
            }
            other => panic!("expected Filtered, got {other:?}"),
        }
    }

    #[test]
    fn all_invalid_records_is_filtered() {
        let raw = r#"[{"category":"Chart","bbox":[0,0,1,1]}]"#;
        assert_eq!(
            parse_layout(raw).filter_reason(),
            Some(FilterReason::MalformedResponse)
        );
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_salvage() {
        let raw = r#"[{"category":"Formula","bbox":[0,0,9,9],"text":"{x} }"}, {"category":"Text""#;
        let out = parse_layout(raw);
        let els = elements(&out);
        assert_eq!(els.len(), 1);
        assert_eq!(els[0].category, Category::Formula);
    }

    #[test]
    fn text_mode_transcribes() {
        let out = parse_response("```\nHello\n```", PromptMode::Ocr);
        assert_eq!(
            out,
            PageOutcome::Transcribed {
                text: "Hello".into()
            }
        );
    }
}
