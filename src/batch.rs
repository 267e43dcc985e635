//! Batch parsing: many inputs, one result per input.
//!
//! Inputs are parsed one after another; pages inside each document are
//! still dispatched concurrently. A fatal error on one input is recorded in
//! its [`BatchItem`] and the batch moves on to the next input.

use crate::config::ParseConfig;
use crate::convert::parse_document;
use crate::error::LayoutError;
use crate::output::DocumentResult;
use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// File extensions picked up by [`scan_directory`], lowercase.
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["pdf", "png", "jpg", "jpeg"];

/// Outcome for one input of a batch.
#[derive(Debug)]
pub struct BatchItem {
    /// Path or URL as given.
    pub input: String,
    pub result: Result<DocumentResult, LayoutError>,
    /// Wall-clock time spent on this input, loading included.
    pub duration_ms: u64,
}

impl BatchItem {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

impl Serialize for BatchItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut st = serializer.serialize_struct("BatchItem", 4)?;
        st.serialize_field("input", &self.input)?;
        st.serialize_field("duration_ms", &self.duration_ms)?;
        match &self.result {
            Ok(doc) => {
                st.serialize_field("status", "success")?;
                st.serialize_field("result", doc)?;
            }
            Err(e) => {
                st.serialize_field("status", "error")?;
                st.serialize_field("error", &e.to_string())?;
            }
        }
        st.end()
    }
}

/// Counts over a whole batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total_files: usize,
    pub succeeded_files: usize,
    pub failed_files: usize,
    /// Pages dispatched across the succeeded inputs.
    pub total_pages: usize,
    /// Pages filtered across the succeeded inputs.
    pub filtered_pages: usize,
    pub total_duration_ms: u64,
}

/// Every input's outcome, in input order, plus the summary.
#[derive(Debug, Serialize)]
pub struct BatchResult {
    pub summary: BatchSummary,
    pub items: Vec<BatchItem>,
}

impl BatchResult {
    fn from_items(items: Vec<BatchItem>) -> Self {
        let mut summary = BatchSummary {
            total_files: items.len(),
            ..Default::default()
        };
        for item in &items {
            summary.total_duration_ms += item.duration_ms;
            match &item.result {
                Ok(doc) => {
                    summary.succeeded_files += 1;
                    summary.total_pages += doc.stats().total_pages;
                    summary.filtered_pages += doc.stats().filtered_pages;
                }
                Err(_) => summary.failed_files += 1,
            }
        }
        Self { summary, items }
    }

    /// Inputs that failed, with their errors.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &LayoutError)> {
        self.items
            .iter()
            .filter_map(|item| item.result.as_ref().err().map(|e| (item.input.as_str(), e)))
    }
}

/// Parse every input in order; per-input errors are kept, never propagated.
pub async fn parse_documents<I, S>(inputs: I, config: &ParseConfig) -> BatchResult
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let inputs: Vec<String> = inputs.into_iter().map(|s| s.as_ref().to_string()).collect();
    let total = inputs.len();
    info!("Batch of {} input(s)", total);

    let mut items = Vec::with_capacity(total);
    for (i, input) in inputs.into_iter().enumerate() {
        info!("Batch {}/{}: {}", i + 1, total, input);
        let start = Instant::now();
        let result = parse_document(&input, config).await;
        if let Err(ref e) = result {
            warn!("Batch {}/{}: {} failed: {}", i + 1, total, input, e);
        }
        items.push(BatchItem {
            input,
            result,
            duration_ms: start.elapsed().as_millis() as u64,
        });
    }

    let batch = BatchResult::from_items(items);
    info!(
        "Batch complete: {}/{} input(s) succeeded, {} page(s)",
        batch.summary.succeeded_files, batch.summary.total_files, batch.summary.total_pages
    );
    batch
}

/// Scan `dir` and parse every supported file found.
///
/// # Errors
/// Only when the directory itself cannot be listed.
pub async fn parse_directory(
    dir: impl AsRef<Path>,
    recursive: bool,
    config: &ParseConfig,
) -> Result<BatchResult, LayoutError> {
    let dir = dir.as_ref().to_path_buf();
    let files = tokio::task::spawn_blocking(move || scan_directory(&dir, recursive))
        .await
        .map_err(|e| LayoutError::Internal(format!("Directory scan panicked: {}", e)))??;
    let inputs: Vec<String> = files
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    Ok(parse_documents(inputs, config).await)
}

/// Supported files under `dir`, sorted by path.
///
/// Files are matched by extension, case-insensitively; the format is still
/// sniffed from the content when each one is opened.
pub fn scan_directory(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>, LayoutError> {
    if !dir.is_dir() {
        return Err(LayoutError::FileNotFound {
            path: dir.to_path_buf(),
        });
    }
    let mut files = Vec::new();
    collect(dir, recursive, &mut files)?;
    files.sort();
    info!("Found {} supported file(s) in {}", files.len(), dir.display());
    Ok(files)
}

fn collect(dir: &Path, recursive: bool, out: &mut Vec<PathBuf>) -> Result<(), LayoutError> {
    let unreadable = |e: std::io::Error| LayoutError::DirectoryUnreadable {
        path: dir.to_path_buf(),
        detail: e.to_string(),
    };
    for entry in std::fs::read_dir(dir).map_err(unreadable)? {
        let path = entry.map_err(unreadable)?.path();
        if path.is_dir() {
            if recursive {
                collect(&path, recursive, out)?;
            }
        } else if is_supported(&path) {
            out.push(path);
        }
    }
    Ok(())
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn scan_filters_by_extension_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.PDF", "a.png", "notes.txt", "c.jpeg"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("d.jpg"), b"x").unwrap();

        let flat = scan_directory(dir.path(), false).unwrap();
        let names: Vec<_> = flat
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.png", "b.PDF", "c.jpeg"]);

        let deep = scan_directory(dir.path(), true).unwrap();
        assert_eq!(deep.len(), 4);
        assert!(deep.iter().any(|p| p.ends_with("sub/d.jpg")));
    }

    #[test]
    fn scan_of_missing_directory_fails() {
        let err = scan_directory(Path::new("/definitely/not/a/dir"), true).unwrap_err();
        assert!(matches!(err, LayoutError::FileNotFound { .. }));
    }

    #[test]
    fn error_item_serialises_with_message() {
        let item = BatchItem {
            input: "missing.pdf".into(),
            result: Err(LayoutError::FileNotFound {
                path: "missing.pdf".into(),
            }),
            duration_ms: 3,
        };
        let v = serde_json::to_value(&item).unwrap();
        assert_eq!(v["status"], "error");
        assert_eq!(v["input"], "missing.pdf");
        assert!(v["error"].as_str().unwrap().contains("not found"));
        assert!(v.get("result").is_none());
    }
}
