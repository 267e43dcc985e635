//! Post-processing: deterministic cleanup of backend-produced text.
//!
//! Two entry points share the same small rules:
//!
//! - [`clean_text`] for whole-page and region transcriptions.
//! - [`clean_element_text`] for the `text` of a layout element, with a few
//!   category-specific fixes (formula delimiters, pipe tables).
//!
//! Rules never touch content, only wrapping and whitespace.

use crate::output::Category;
use once_cell::sync::Lazy;
use regex::Regex;

/// Clean a free-form transcription.
///
/// Rules (applied in order):
/// 1. Strip outer code fences
/// 2. Normalise line endings (CRLF → LF)
/// 3. Trim trailing whitespace per line
/// 4. Collapse 3+ consecutive blank lines down to 2
/// 5. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 6. Trim leading and trailing blank lines
pub fn clean_text(input: &str) -> String {
    let s = strip_outer_fences(input);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    s.trim_matches('\n').to_string()
}

/// Clean the text of one layout element.
pub fn clean_element_text(category: Category, text: &str) -> String {
    let s = normalise_line_endings(text);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = s.trim();
    match category {
        Category::Formula => strip_math_delimiters(s),
        Category::Table if !is_html_table(s) => fix_broken_tables(s),
        _ => s.to_string(),
    }
}

/// Whether a table body is already HTML.
pub fn is_html_table(text: &str) -> bool {
    text.trim_start().to_ascii_lowercase().starts_with("<table")
}

// ── Rule 1: Strip outer code fences ──────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```[A-Za-z]*[ \t]*\r?\n(.*?)\r?\n?```\s*$").unwrap()
});

pub(crate) fn strip_outer_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 4: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").to_string()
}

// ── Rule 5: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Formula: strip `$$…$$`, `$…$`, `\[…\]` wrappers ──────────────────────────

static RE_MATH_WRAPPER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^(?:\$\$(.*)\$\$|\$(.*)\$|\\\[(.*)\\\])$").unwrap()
});

fn strip_math_delimiters(input: &str) -> String {
    match RE_MATH_WRAPPER.captures(input) {
        Some(caps) => caps
            .iter()
            .skip(1)
            .flatten()
            .next()
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default(),
        None => input.to_string(),
    }
}

// ── Table: add a missing GFM separator row ───────────────────────────────────

/// Detects table rows (lines starting with `|`) and ensures a separator row
/// exists after the first row if missing.
fn fix_broken_tables(input: &str) -> String {
    let lines: Vec<&str> = input.lines().collect();
    let mut result = Vec::with_capacity(lines.len() + 2);
    let mut in_table = false;

    for (i, line) in lines.iter().enumerate() {
        result.push(line.to_string());
        if !is_table_row(line) {
            in_table = false;
            continue;
        }
        if in_table || is_separator_row(line) {
            in_table = true;
            continue;
        }
        in_table = true;
        let next = lines.get(i + 1).copied().unwrap_or("");
        if is_table_row(next) && !is_separator_row(next) {
            let col_count = line.trim().matches('|').count().saturating_sub(1).max(1);
            let sep: String = std::iter::once("|")
                .chain(std::iter::repeat_n(" --- |", col_count))
                .collect();
            result.push(sep);
        }
    }

    result.join("\n")
}

fn is_table_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|') && trimmed.ends_with('|') && trimmed.len() > 2
}

fn is_separator_row(line: &str) -> bool {
    let trimmed = line.trim();
    if !trimmed.starts_with('|') {
        return false;
    }
    trimmed
        .chars()
        .all(|c| c == '|' || c == '-' || c == ':' || c == ' ')
}
