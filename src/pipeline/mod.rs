//! Pipeline stages for document layout parsing.
//!
//! Each submodule implements exactly one step and is testable on its own.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ resize ──▶ encode ──▶ dispatch ──▶ parse ──▶ layout ──▶ aggregate
//! (URL/path) (pdfium)  (budget)   (base64)   (backend)    (JSON)   (geometry)  (document)
//! ```
//!
//! 1. [`input`]  canonicalise the path or URL, sniff PDF / PNG / JPEG
//! 2. [`render`]  rasterise PDF pages at the configured DPI, or decode
//!    the image; runs in `spawn_blocking`
//! 3. [`resize`]  fit each page into the pixel budget and record the plan
//! 4. [`encode`]  PNG-encode and base64-wrap each scaled page once
//! 5. [`dispatch`]  bounded-concurrency backend calls with per-page retry;
//!    talks to the [`backend`] seam
//! 6. [`parse`]  decode, repair or salvage the raw response
//! 7. [`layout`]  clip, de-duplicate, order; region requests
//! 8. [`aggregate`]  page numbers and document statistics
//!
//! [`postprocess`] holds the text cleanup rules used by `parse`.

pub mod aggregate;
pub mod backend;
pub mod dispatch;
pub mod encode;
pub mod input;
pub mod layout;
pub mod parse;
pub mod postprocess;
pub mod render;
pub mod resize;
