//! Documents and pages as handed to the dispatcher.
//!
//! A [`Page`] owns its scaled image and the [`ScalePlan`] that produced it,
//! so the mapping between original and scaled coordinates is never
//! recomputed ad hoc.

use crate::config::{ParseConfig, PixelBudget};
use crate::error::LayoutError;
use crate::output::Dimensions;
use crate::pipeline::resize::{self, ScalePlan};
use crate::pipeline::{input, render};
use image::DynamicImage;
use tracing::{info, warn};

/// One rasterised unit of a document.
#[derive(Debug, Clone)]
pub struct Page {
    index: usize,
    original: Dimensions,
    plan: Option<ScalePlan>,
    image: DynamicImage,
}

impl Page {
    /// Plan and apply the pixel budget to `image`.
    ///
    /// An image the planner rejects gets no plan; the dispatcher files it as
    /// filtered without calling the backend.
    pub fn new(index: usize, image: DynamicImage, budget: PixelBudget) -> Self {
        let original = Dimensions::new(image.width(), image.height());
        match resize::plan(original, budget) {
            Ok(plan) => {
                let image = resize::apply(&image, &plan);
                Self {
                    index,
                    original,
                    plan: Some(plan),
                    image,
                }
            }
            Err(e) => {
                warn!("Page {}: {}", index + 1, e);
                Self {
                    index,
                    original,
                    plan: None,
                    image,
                }
            }
        }
    }

    /// 0-based index in the source document.
    pub fn index(&self) -> usize {
        self.index
    }

    /// 1-based page number.
    pub fn page_number(&self) -> usize {
        self.index + 1
    }

    pub fn original(&self) -> Dimensions {
        self.original
    }

    /// Size of the image sent to the backend.
    pub fn scaled(&self) -> Dimensions {
        self.plan.map(|p| p.scaled).unwrap_or(self.original)
    }

    pub fn plan(&self) -> Option<ScalePlan> {
        self.plan
    }

    /// Linear scale factor, 1.0 when unplanned.
    pub fn scale_factor(&self) -> f64 {
        self.plan.map(|p| p.scale_factor()).unwrap_or(1.0)
    }

    /// The scaled image.
    pub fn image(&self) -> &DynamicImage {
        &self.image
    }
}

/// An ordered sequence of pages from one source.
#[derive(Debug, Clone)]
pub struct Document {
    source: String,
    pages: Vec<Page>,
}

impl Document {
    /// Resolve `input` (path or URL), load the selected pages and scale them.
    ///
    /// # Errors
    /// Any failure to obtain the pages is fatal; no partial document exists.
    pub async fn open(input: &str, config: &ParseConfig) -> Result<Self, LayoutError> {
        let resolved = input::resolve_input(input, config.download_timeout_secs).await?;
        let raw = render::load_pages(
            &resolved,
            config.dpi,
            config.password.as_deref(),
            &config.pages,
        )
        .await?;

        let budget = config.pixel_budget();
        let pages = tokio::task::spawn_blocking(move || {
            raw.into_iter()
                .map(|(idx, img)| Page::new(idx, img, budget))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| LayoutError::Internal(format!("Resize task panicked: {}", e)))?;

        info!("Opened {}: {} page(s) from {:?}", input, pages.len(), resolved.kind());
        Ok(Self {
            source: input.to_string(),
            pages,
        })
    }

    /// Build a document from in-memory images, pages numbered in order.
    pub fn from_images(
        source: impl Into<String>,
        images: impl IntoIterator<Item = DynamicImage>,
        budget: PixelBudget,
    ) -> Self {
        let pages = images
            .into_iter()
            .enumerate()
            .map(|(i, img)| Page::new(i, img, budget))
            .collect();
        Self {
            source: source.into(),
            pages,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Page by 1-based page number.
    pub fn page(&self, page_number: usize) -> Option<&Page> {
        self.pages.iter().find(|p| p.page_number() == page_number)
    }
}
