//! Page sources: rasterise PDF pages via pdfium, or decode a single image.
//!
//! pdfium keeps thread-local state and is CPU-bound, so every call runs in
//! `tokio::task::spawn_blocking`. Image decoding goes the same way.

use crate::config::PageSelection;
use crate::error::LayoutError;
use crate::pipeline::input::{ResolvedInput, SourceKind};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Longest edge pdfium may produce, whatever the DPI and paper size.
const MAX_RENDER_EDGE: i32 = 16_000;

/// Load the selected pages of a resolved input as `(page_index, image)` pairs.
pub async fn load_pages(
    input: &ResolvedInput,
    dpi: u32,
    password: Option<&str>,
    selection: &PageSelection,
) -> Result<Vec<(usize, DynamicImage)>, LayoutError> {
    let path = input.path().to_path_buf();
    let selection = selection.clone();

    let task = match input.kind() {
        SourceKind::Pdf => {
            let password = password.map(str::to_string);
            tokio::task::spawn_blocking(move || {
                render_pdf_blocking(&path, dpi, password.as_deref(), &selection)
            })
        }
        SourceKind::Png | SourceKind::Jpeg => {
            tokio::task::spawn_blocking(move || decode_image_blocking(&path, &selection))
        }
    };

    task.await
        .map_err(|e| LayoutError::Internal(format!("Render task panicked: {}", e)))?
}

fn decode_image_blocking(
    path: &Path,
    selection: &PageSelection,
) -> Result<Vec<(usize, DynamicImage)>, LayoutError> {
    if selection.to_indices(1).is_empty() {
        return Err(LayoutError::PageOutOfRange {
            page: first_requested(selection),
            total: 1,
        });
    }

    let image = image::open(path).map_err(|e| LayoutError::ImageDecodeFailed {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    debug!(
        "Decoded image {} → {}x{} px",
        path.display(),
        image.width(),
        image.height()
    );
    Ok(vec![(0, image)])
}

fn render_pdf_blocking(
    pdf_path: &Path,
    dpi: u32,
    password: Option<&str>,
    selection: &PageSelection,
) -> Result<Vec<(usize, DynamicImage)>, LayoutError> {
    let pdfium = Pdfium::default();

    let document = pdfium
        .load_pdf_from_file(pdf_path, password)
        .map_err(|e| map_open_error(pdf_path, password.is_some(), format!("{:?}", e)))?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages", total_pages);

    let indices = selection.to_indices(total_pages);
    if indices.is_empty() {
        return Err(LayoutError::PageOutOfRange {
            page: first_requested(selection),
            total: total_pages,
        });
    }

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(dpi as f32 / 72.0)
        .set_maximum_width(MAX_RENDER_EDGE)
        .set_maximum_height(MAX_RENDER_EDGE);

    let mut results = Vec::with_capacity(indices.len());
    for idx in indices {
        let page = pages
            .get(idx as u16)
            .map_err(|e| LayoutError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            })?;

        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            LayoutError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            }
        })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} at {} DPI → {}x{} px",
            idx + 1,
            dpi,
            image.width(),
            image.height()
        );
        results.push((idx, image));
    }

    Ok(results)
}

fn map_open_error(path: &Path, had_password: bool, detail: String) -> LayoutError {
    let path: PathBuf = path.to_path_buf();
    if detail.to_ascii_lowercase().contains("password") {
        if had_password {
            LayoutError::WrongPassword { path }
        } else {
            LayoutError::PasswordRequired { path }
        }
    } else {
        LayoutError::CorruptPdf { path, detail }
    }
}

/// The page number to report when a selection matches nothing.
fn first_requested(selection: &PageSelection) -> usize {
    match selection {
        PageSelection::All => 1,
        PageSelection::Single(p) => *p,
        PageSelection::Range(start, _) => *start,
        PageSelection::Set(pages) => pages.iter().copied().min().unwrap_or(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_error_classification() {
        let p = Path::new("a.pdf");
        assert!(matches!(
            map_open_error(p, false, "PdfiumLibraryInternalError(PasswordError)".into()),
            LayoutError::PasswordRequired { .. }
        ));
        assert!(matches!(
            map_open_error(p, true, "PasswordError".into()),
            LayoutError::WrongPassword { .. }
        ));
        assert!(matches!(
            map_open_error(p, false, "FormatError".into()),
            LayoutError::CorruptPdf { .. }
        ));
    }

    #[test]
    fn image_selection_out_of_range() {
        let err = decode_image_blocking(Path::new("unused.png"), &PageSelection::Single(2))
            .unwrap_err();
        assert!(matches!(err, LayoutError::PageOutOfRange { page: 2, total: 1 }));
    }

    #[test]
    fn decodes_png_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.png");
        DynamicImage::new_rgb8(12, 7).save(&path).unwrap();
        let pages = decode_image_blocking(&path, &PageSelection::All).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!((pages[0].1.width(), pages[0].1.height()), (12, 7));
    }
}
