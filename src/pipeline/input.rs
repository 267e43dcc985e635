//! Input resolution: normalise a user-supplied path or URL to a local file.
//!
//! pdfium needs a file-system path, so URLs are downloaded into a `TempDir`
//! that lives exactly as long as the [`ResolvedInput`]. The format is
//! sniffed from the first bytes before anything is handed to a decoder.

use crate::error::LayoutError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// Source formats the pipeline can open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Pdf,
    Png,
    Jpeg,
}

impl SourceKind {
    /// Detect the format from the leading magic bytes.
    pub fn sniff(magic: &[u8]) -> Option<Self> {
        if magic.starts_with(b"%PDF") {
            Some(SourceKind::Pdf)
        } else if magic.starts_with(b"\x89PNG") {
            Some(SourceKind::Png)
        } else if magic.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(SourceKind::Jpeg)
        } else {
            None
        }
    }

    pub fn is_pdf(&self) -> bool {
        matches!(self, SourceKind::Pdf)
    }
}

/// The resolved input: a local path, its format, and the temp dir keeping a
/// downloaded copy alive.
pub struct ResolvedInput {
    path: PathBuf,
    kind: SourceKind,
    _temp_dir: Option<TempDir>,
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn is_downloaded(&self) -> bool {
        self._temp_dir.is_some()
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a local file of a supported format.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, LayoutError> {
    if input.trim().is_empty() {
        return Err(LayoutError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(input)
    }
}

fn sniff_or_reject(path: &Path, bytes: &[u8]) -> Result<SourceKind, LayoutError> {
    SourceKind::sniff(bytes).ok_or_else(|| {
        let mut magic = [0u8; 4];
        let n = bytes.len().min(4);
        magic[..n].copy_from_slice(&bytes[..n]);
        LayoutError::UnsupportedFormat {
            path: path.to_path_buf(),
            magic,
        }
    })
}

fn resolve_local(path_str: &str) -> Result<ResolvedInput, LayoutError> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(LayoutError::FileNotFound { path });
    }

    let mut magic = Vec::with_capacity(4);
    match std::fs::File::open(&path) {
        Ok(f) => {
            f.take(4)
                .read_to_end(&mut magic)
                .map_err(|e| LayoutError::Internal(format!("Failed to read '{}': {}", path.display(), e)))?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(LayoutError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(LayoutError::FileNotFound { path });
        }
    }

    let kind = sniff_or_reject(&path, &magic)?;
    debug!("Resolved local {:?}: {}", kind, path.display());
    Ok(ResolvedInput {
        path,
        kind,
        _temp_dir: None,
    })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, LayoutError> {
    info!("Downloading from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| LayoutError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let timeout_err = |e: reqwest::Error| {
        if e.is_timeout() {
            LayoutError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            LayoutError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(timeout_err)?;

    if !response.status().is_success() {
        return Err(LayoutError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response.bytes().await.map_err(timeout_err)?;

    let temp_dir = TempDir::new().map_err(|e| LayoutError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(extract_filename(url));
    let kind = sniff_or_reject(&file_path, &bytes)?;

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| LayoutError::Internal(format!("Failed to write temp file: {}", e)))?;

    info!("Downloaded {} bytes to: {}", bytes.len(), file_path.display());

    Ok(ResolvedInput {
        path: file_path,
        kind,
        _temp_dir: Some(temp_dir),
    })
}

/// Last URL path segment when it looks like a file name.
fn extract_filename(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded".to_string()
}
