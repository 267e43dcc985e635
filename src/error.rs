//! Error types for the edgequake-layout library.
//!
//! Three types reflect three distinct failure scopes:
//!
//! * [`LayoutError`]: **Fatal** to the call that returned it: the source
//!   cannot be opened, the configuration is invalid, or a region request was
//!   rejected before dispatch. Returned as `Err(LayoutError)`.
//!
//! * [`BackendError`]: a single inference call failed at the transport
//!   level. The dispatcher retries transient ones and never lets them escape
//!   past the page they belong to.
//!
//! * [`FilterReason`]: the reason code stored inside a filtered page
//!   outcome once retries are exhausted or the response cannot be parsed.
//!   One filtered page never aborts its siblings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-layout library.
#[derive(Debug, Error)]
pub enum LayoutError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file is neither a PDF nor a supported raster image.
    #[error("Unsupported input format for '{path}'\nFirst bytes: {magic:?}")]
    UnsupportedFormat { path: PathBuf, magic: [u8; 4] },

    /// A batch input directory could not be listed.
    #[error("Cannot read directory '{path}': {detail}")]
    DirectoryUnreadable { path: PathBuf, detail: String },

    /// The image file could not be decoded.
    #[error("Failed to decode image '{path}': {detail}")]
    ImageDecodeFailed { path: PathBuf, detail: String },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// Selected page numbers exceed the actual page count.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    // ── Geometry errors ───────────────────────────────────────────────────
    /// Image width or height is zero, or the page is too elongated.
    #[error("Invalid image dimensions {width}x{height}: sides must be > 0 with aspect ratio at most 200")]
    InvalidDimensions { width: u32, height: u32 },

    /// A region request's bbox does not fit inside the original image.
    #[error("Invalid region [{x1}, {y1}, {x2}, {y2}] for a {width}x{height} image")]
    InvalidRegion {
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
        width: u32,
        height: u32,
    },

    // ── Backend errors ────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Transport-level failure of one inference call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// Connection refused, reset, DNS failure, 5xx, 429 …
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The call did not complete within the per-page deadline.
    #[error("backend call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The backend refused the request (auth, bad request, unknown model,
    /// context too large). Retrying will not help.
    #[error("backend rejected the request ({status}): {detail}")]
    Rejected { status: u16, detail: String },
}

impl BackendError {
    /// Whether another attempt has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Unavailable(_) | BackendError::Timeout { .. })
    }

    /// The page-level reason code recorded once retries run out.
    pub fn filter_reason(&self) -> FilterReason {
        match self {
            BackendError::Unavailable(_) => FilterReason::BackendUnavailable,
            BackendError::Timeout { .. } => FilterReason::BackendTimeout,
            BackendError::Rejected { .. } => FilterReason::BackendRejected,
        }
    }
}

/// Why a page ended up filtered instead of parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterReason {
    /// Page image had a zero side or an extreme aspect ratio; nothing was sent.
    InvalidDimensions,
    /// The scaled image could not be PNG-encoded.
    EncodeFailed,
    /// Retries exhausted on connection errors.
    BackendUnavailable,
    /// Retries exhausted on timeouts.
    BackendTimeout,
    /// Backend refused the request outright.
    BackendRejected,
    /// Response text could not be decoded, even after repair.
    MalformedResponse,
}

impl fmt::Display for FilterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FilterReason::InvalidDimensions => "invalid dimensions",
            FilterReason::EncodeFailed => "image encoding failed",
            FilterReason::BackendUnavailable => "backend unavailable",
            FilterReason::BackendTimeout => "backend timeout",
            FilterReason::BackendRejected => "backend rejected request",
            FilterReason::MalformedResponse => "malformed response",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_region_display() {
        let e = LayoutError::InvalidRegion {
            x1: 10.0,
            y1: 10.0,
            x2: 900.0,
            y2: 40.0,
            width: 800,
            height: 600,
        };
        let msg = e.to_string();
        assert!(msg.contains("900"), "got: {msg}");
        assert!(msg.contains("800x600"), "got: {msg}");
    }

    #[test]
    fn invalid_dimensions_display() {
        let e = LayoutError::InvalidDimensions {
            width: 0,
            height: 20,
        };
        assert!(e.to_string().contains("0x20"));
    }

    #[test]
    fn transient_classification() {
        assert!(BackendError::Unavailable("reset".into()).is_transient());
        assert!(BackendError::Timeout { secs: 5 }.is_transient());
        assert!(!BackendError::Rejected {
            status: 401,
            detail: "bad key".into()
        }
        .is_transient());
    }

    #[test]
    fn backend_error_maps_to_reason() {
        assert_eq!(
            BackendError::Timeout { secs: 1 }.filter_reason(),
            FilterReason::BackendTimeout
        );
        assert_eq!(
            BackendError::Unavailable("x".into()).filter_reason(),
            FilterReason::BackendUnavailable
        );
    }

    #[test]
    fn filter_reason_serialises_snake_case() {
        let json = serde_json::to_string(&FilterReason::MalformedResponse).unwrap();
        assert_eq!(json, "\"malformed_response\"");
    }
}
