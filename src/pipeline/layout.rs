//! Geometric post-processing of a page's elements.
//!
//! Every operation is idempotent and can be called on its own. This is the
//! only stage that mutates elements after parsing.

use crate::config::RegionStrategy;
use crate::document::Page;
use crate::error::LayoutError;
use crate::output::{BBox, Category, Dimensions, Element, PageOutcome};
use crate::pipeline::resize::ScalePlan;
use crate::prompts;
use image::DynamicImage;
use std::borrow::Cow;
use std::cmp::Ordering;
use tracing::debug;

/// Clip every bbox to `[0, width] × [0, height]` and drop empty results.
///
/// Returns the number of dropped elements.
pub fn normalize(elements: &mut Vec<Element>, dims: Dimensions) -> usize {
    let (w, h) = (dims.width as f64, dims.height as f64);
    let before = elements.len();
    elements.retain_mut(|el| {
        let b = &mut el.bbox;
        b.x1 = b.x1.clamp(0.0, w);
        b.x2 = b.x2.clamp(0.0, w);
        b.y1 = b.y1.clamp(0.0, h);
        b.y2 = b.y2.clamp(0.0, h);
        b.x1 < b.x2 && b.y1 < b.y2
    });
    let dropped = before - elements.len();
    if dropped > 0 {
        debug!("Dropped {} element(s) with no area inside {}x{}", dropped, dims.width, dims.height);
    }
    dropped
}

fn reading_cmp(a: &Element, b: &Element) -> Ordering {
    a.bbox
        .y1
        .total_cmp(&b.bbox.y1)
        .then(a.bbox.x1.total_cmp(&b.bbox.x1))
        .then(a.detection_index.cmp(&b.detection_index))
}

/// Sort by `(y1, x1)`, ties by detection index, and number from 1.
///
/// Recomputed from scratch on every call.
pub fn assign_reading_order(elements: &mut [Element]) {
    elements.sort_by(reading_cmp);
    for (i, el) in elements.iter_mut().enumerate() {
        el.reading_order = Some(i + 1);
    }
}

/// Elements whose category is in `targets`, in their original relative order.
pub fn filter_categories(elements: &[Element], targets: &[Category]) -> Vec<Element> {
    elements
        .iter()
        .filter(|el| targets.contains(&el.category))
        .cloned()
        .collect()
}

/// Drop every element whose IoU with an earlier-detected, kept element
/// reaches `threshold`. Surviving elements keep their current order.
///
/// Returns the number of dropped elements.
pub fn dedup_overlapping(elements: &mut Vec<Element>, threshold: f64) -> usize {
    let mut by_detection: Vec<usize> = (0..elements.len()).collect();
    by_detection.sort_by_key(|&i| elements[i].detection_index);

    let mut keep = vec![false; elements.len()];
    let mut kept: Vec<BBox> = Vec::with_capacity(elements.len());
    for i in by_detection {
        let b = elements[i].bbox;
        if kept.iter().all(|k| k.iou(&b) < threshold) {
            kept.push(b);
            keep[i] = true;
        }
    }

    let before = elements.len();
    let mut flags = keep.into_iter();
    elements.retain(|_| flags.next().unwrap_or(false));
    before - elements.len()
}

/// Map elements from scaled space back to original-image space, clipped to
/// the original image.
pub fn to_original_space(elements: &[Element], plan: &ScalePlan) -> Vec<Element> {
    let (w, h) = (plan.original.width as f64, plan.original.height as f64);
    elements
        .iter()
        .map(|el| {
            let b = plan.to_original(&el.bbox);
            Element {
                bbox: BBox::new(
                    b.x1.clamp(0.0, w),
                    b.y1.clamp(0.0, h),
                    b.x2.clamp(0.0, w),
                    b.y2.clamp(0.0, h),
                ),
                ..el.clone()
            }
        })
        .collect()
}

/// Full refinement of a freshly parsed outcome against its page size:
/// clip, optional de-duplication, reading order. Other outcomes pass through.
pub fn refine(outcome: PageOutcome, dims: Dimensions, dedup_iou: Option<f64>) -> PageOutcome {
    match outcome {
        PageOutcome::Parsed { mut elements } => {
            normalize(&mut elements, dims);
            if let Some(threshold) = dedup_iou {
                let dropped = dedup_overlapping(&mut elements, threshold);
                if dropped > 0 {
                    debug!("De-duplicated {} overlapping element(s)", dropped);
                }
            }
            assign_reading_order(&mut elements);
            PageOutcome::Parsed { elements }
        }
        other => other,
    }
}

// ── Region requests ──────────────────────────────────────────────────────

/// Everything needed to send one region request for a page.
#[derive(Debug)]
pub struct RegionRequest<'a> {
    /// Original-image coordinates, as supplied.
    pub bbox: BBox,
    /// `bbox` mapped into the scaled image.
    pub scaled_bbox: BBox,
    /// The image to send: the whole scaled page, or a crop of it.
    pub image: Cow<'a, DynamicImage>,
    pub prompt: String,
}

/// Reject a region that does not lie inside the original image.
pub fn validate_region(bbox: &BBox, original: Dimensions) -> Result<(), LayoutError> {
    if bbox.fits_within(original) {
        Ok(())
    } else {
        Err(LayoutError::InvalidRegion {
            x1: bbox.x1,
            y1: bbox.y1,
            x2: bbox.x2,
            y2: bbox.y2,
            width: original.width,
            height: original.height,
        })
    }
}

/// Validate `bbox` (original coordinates) and build the request for `page`.
///
/// `Grounding` sends the whole scaled page with the scaled bbox in the
/// prompt; `Crop` sends only the scaled region with the plain-text prompt.
/// A `prompt_override` replaces the text in both cases.
pub fn prepare_region<'a>(
    page: &'a Page,
    bbox: BBox,
    strategy: RegionStrategy,
    prompt_override: Option<&str>,
) -> Result<RegionRequest<'a>, LayoutError> {
    let plan = page.plan().ok_or(LayoutError::InvalidDimensions {
        width: page.original().width,
        height: page.original().height,
    })?;
    validate_region(&bbox, plan.original)?;

    let scaled_bbox = plan.to_scaled(&bbox);
    let (image, prompt) = match strategy {
        RegionStrategy::Grounding => (
            Cow::Borrowed(page.image()),
            prompts::grounding_prompt(&scaled_bbox),
        ),
        RegionStrategy::Crop => (
            Cow::Owned(crop(page.image(), &scaled_bbox)),
            prompts::OCR_PROMPT.to_string(),
        ),
    };

    Ok(RegionRequest {
        bbox,
        scaled_bbox,
        image,
        prompt: prompt_override.map(str::to_string).unwrap_or(prompt),
    })
}

/// Crop to the pixel cells touched by `b`, at least one pixel each way.
fn crop(img: &DynamicImage, b: &BBox) -> DynamicImage {
    let x = (b.x1.floor().max(0.0) as u32).min(img.width().saturating_sub(1));
    let y = (b.y1.floor().max(0.0) as u32).min(img.height().saturating_sub(1));
    let x2 = (b.x2.ceil() as u32).clamp(x + 1, img.width());
    let y2 = (b.y2.ceil() as u32).clamp(y + 1, img.height());
    img.crop_imm(x, y, x2 - x, y2 - y)
}
