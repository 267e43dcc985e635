//! Resolution planning: fit a page image into the configured pixel budget.
//!
//! The planner is a pure function of the original size and the budget. Its
//! output, a [`ScalePlan`], travels with the page so that any coordinate
//! supplied in original-image space (region requests) can be mapped into
//! the space the backend actually saw, and results mapped back.
//!
//! Policy: the area is clamped into `[min_pixels, max_pixels]`, keeping the
//! aspect ratio. Without a `min_pixels` an image is never upscaled.
//! Downscaled sides are floored and upscaled sides are ceiled. When that
//! rounding still leaves the area outside the bounds (tight bounds, thin
//! pages) the sides are re-chosen as the in-budget integer pair closest in
//! aspect ratio.

use crate::config::PixelBudget;
use crate::error::LayoutError;
use crate::output::{BBox, Dimensions};
use image::{imageops::FilterType, DynamicImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Absorbs float noise such as `99.99999999` before floor/ceil.
const ROUNDING_EPSILON: f64 = 1e-9;

/// Longest-to-shortest side ratio accepted by the planner.
pub const MAX_ASPECT_RATIO: f64 = 200.0;

/// Original and scaled sizes of one page, plus the mappings between them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalePlan {
    pub original: Dimensions,
    pub scaled: Dimensions,
}

impl ScalePlan {
    /// A plan that keeps the image as-is.
    pub fn identity(dims: Dimensions) -> Self {
        Self {
            original: dims,
            scaled: dims,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.original == self.scaled
    }

    /// Horizontal factor `scaled / original`.
    pub fn scale_x(&self) -> f64 {
        self.scaled.width as f64 / self.original.width as f64
    }

    /// Vertical factor `scaled / original`.
    pub fn scale_y(&self) -> f64 {
        self.scaled.height as f64 / self.original.height as f64
    }

    /// Linear factor derived from the area ratio; 1.0 for identity plans.
    pub fn scale_factor(&self) -> f64 {
        (self.scaled.area() as f64 / self.original.area() as f64).sqrt()
    }

    /// Map a box from original-image space into scaled space.
    pub fn to_scaled(&self, b: &BBox) -> BBox {
        let (sx, sy) = (self.scale_x(), self.scale_y());
        BBox::new(b.x1 * sx, b.y1 * sy, b.x2 * sx, b.y2 * sy)
    }

    /// Map a box from scaled space back into original-image space.
    pub fn to_original(&self, b: &BBox) -> BBox {
        let (sx, sy) = (self.scale_x(), self.scale_y());
        BBox::new(b.x1 / sx, b.y1 / sy, b.x2 / sx, b.y2 / sy)
    }
}

/// Compute target dimensions for an image of `original` size.
///
/// # Errors
/// [`LayoutError::InvalidDimensions`] when either side is zero or the
/// aspect ratio exceeds [`MAX_ASPECT_RATIO`].
pub fn plan(original: Dimensions, budget: PixelBudget) -> Result<ScalePlan, LayoutError> {
    let (long, short) = (
        original.width.max(original.height),
        original.width.min(original.height),
    );
    if short == 0 || long as f64 / short as f64 > MAX_ASPECT_RATIO {
        return Err(LayoutError::InvalidDimensions {
            width: original.width,
            height: original.height,
        });
    }

    let area = original.area();
    let mut target = area;
    if let Some(max) = budget.max_pixels {
        target = target.min(max);
    }
    if let Some(min) = budget.min_pixels {
        target = target.max(min);
    }

    if target == area {
        return Ok(ScalePlan::identity(original));
    }

    let s = (target as f64 / area as f64).sqrt();
    let w = original.width as f64 * s;
    let h = original.height as f64 * s;
    let (w, h) = if target < area {
        ((w + ROUNDING_EPSILON).floor(), (h + ROUNDING_EPSILON).floor())
    } else {
        ((w - ROUNDING_EPSILON).ceil(), (h - ROUNDING_EPSILON).ceil())
    };

    let lo = budget.min_pixels.unwrap_or(1).max(1);
    let hi = budget.max_pixels.unwrap_or(u64::MAX).max(lo);
    let rounded = Dimensions::new((w as u32).max(1), (h as u32).max(1));
    let scaled = if (lo..=hi).contains(&rounded.area()) {
        rounded
    } else {
        debug!(
            "Rounded size {}x{} misses [{}, {}], refitting",
            rounded.width, rounded.height, lo, hi
        );
        fit_area(original, lo, hi, target)
    };

    debug!(
        "Planned {}x{} → {}x{} (factor {:.4})",
        original.width, original.height, scaled.width, scaled.height, s
    );
    Ok(ScalePlan { original, scaled })
}

/// Integer sides whose product lies in `[lo, hi]` and whose ratio is closest
/// to `original`'s; ties go to the area nearest `target`.
///
/// A pair with both sides `s ≤ l` and `s * l ≤ hi` has `s ≤ √hi`, so trying
/// every short side up to there is exhaustive. `1 × lo` always qualifies.
fn fit_area(original: Dimensions, lo: u64, hi: u64, target: u64) -> Dimensions {
    let (long, short) = (
        original.width.max(original.height) as f64,
        original.width.min(original.height) as f64,
    );
    let log_ratio = (long / short).ln();
    let s_max = hi
        .min(target.saturating_mul(4))
        .isqrt()
        .clamp(1, u32::MAX as u64);

    let mut best = (f64::INFINITY, u64::MAX, 1u64, lo.min(u32::MAX as u64));
    for s in 1..=s_max {
        let l_lo = lo.div_ceil(s).max(s);
        let l_hi = (hi / s).min(u32::MAX as u64);
        if l_lo > l_hi {
            continue;
        }
        let ideal = (s as f64 * log_ratio.exp()).round() as u64;
        let l = ideal.clamp(l_lo, l_hi);
        let err = ((l as f64 / s as f64).ln() - log_ratio).abs();
        let gap = (s * l).abs_diff(target);
        let closer = err + ROUNDING_EPSILON < best.0;
        let tied = (err - best.0).abs() <= ROUNDING_EPSILON && gap < best.1;
        if closer || tied {
            best = (err, gap, s, l);
        }
    }

    let (_, _, s, l) = best;
    if original.width >= original.height {
        Dimensions::new(l as u32, s as u32)
    } else {
        Dimensions::new(s as u32, l as u32)
    }
}

/// Resize `img` to the plan's scaled size. Identity plans return a clone.
pub fn apply(img: &DynamicImage, plan: &ScalePlan) -> DynamicImage {
    if plan.is_identity() {
        return img.clone();
    }
    img.resize_exact(plan.scaled.width, plan.scaled.height, FilterType::Lanczos3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn budget(min: Option<u64>, max: Option<u64>) -> PixelBudget {
        PixelBudget {
            min_pixels: min,
            max_pixels: max,
        }
    }

    #[test]
    fn no_bounds_is_identity() {
        let p = plan(Dimensions::new(1000, 800), budget(None, None)).unwrap();
        assert!(p.is_identity());
        assert_eq!(p.scale_factor(), 1.0);
    }

    #[test]
    fn within_budget_is_identity() {
        let p = plan(
            Dimensions::new(1000, 800),
            budget(Some(100_000), Some(2_000_000)),
        )
        .unwrap();
        assert!(p.is_identity());
    }

    #[test]
    fn downscales_to_max() {
        let p = plan(Dimensions::new(4000, 3000), budget(None, Some(1_200_000))).unwrap();
        assert_eq!(p.scaled, Dimensions::new(1264, 948));
        assert!(p.scaled.area() <= 1_200_000);
    }

    #[test]
    fn never_upscales_without_min() {
        let p = plan(Dimensions::new(100, 100), budget(None, Some(1_000_000))).unwrap();
        assert!(p.is_identity());
    }

    #[test]
    fn upscales_to_min() {
        let p = plan(Dimensions::new(100, 50), budget(Some(20_000), None)).unwrap();
        assert_eq!(p.scaled, Dimensions::new(200, 100));
    }

    #[test]
    fn zero_side_is_invalid() {
        let err = plan(Dimensions::new(0, 10), budget(None, None)).unwrap_err();
        assert!(matches!(err, LayoutError::InvalidDimensions { width: 0, .. }));
    }

    #[test]
    fn equal_bounds_hit_the_exact_area() {
        let p = plan(
            Dimensions::new(100, 30),
            budget(Some(10_000), Some(10_000)),
        )
        .unwrap();
        assert_eq!(p.scaled.area(), 10_000);
        assert_eq!(p.scaled, Dimensions::new(200, 50));
    }

    #[test]
    fn thin_page_stays_under_max() {
        let p = plan(Dimensions::new(2000, 10), budget(None, Some(100))).unwrap();
        assert!(p.scaled.area() <= 100, "got {:?}", p.scaled);
        assert_eq!(p.scaled, Dimensions::new(100, 1));
    }

    #[test]
    fn extreme_aspect_ratio_is_invalid() {
        let err = plan(Dimensions::new(100_000, 1), budget(None, Some(1_000))).unwrap_err();
        assert!(matches!(
            err,
            LayoutError::InvalidDimensions {
                width: 100_000,
                height: 1
            }
        ));
        assert!(plan(Dimensions::new(1, 201), budget(None, None)).is_err());
        assert!(plan(Dimensions::new(1, 200), budget(None, None)).is_ok());
    }

    #[test]
    fn bbox_round_trip() {
        let p = plan(Dimensions::new(2480, 3508), budget(None, Some(2_000_000))).unwrap();
        let original = BBox::new(100.0, 200.0, 1200.0, 900.0);
        let back = p.to_original(&p.to_scaled(&original));
        for (a, b) in [
            (original.x1, back.x1),
            (original.y1, back.y1),
            (original.x2, back.x2),
            (original.y2, back.y2),
        ] {
            assert!((a - b).abs() < 1e-6, "{a} vs {b}");
        }
    }

    #[test]
    fn apply_resizes_image() {
        let img = DynamicImage::new_rgb8(400, 200);
        let p = plan(Dimensions::new(400, 200), budget(None, Some(20_000))).unwrap();
        let out = apply(&img, &p);
        assert_eq!((out.width(), out.height()), (p.scaled.width, p.scaled.height));
    }

    proptest! {
        #[test]
        fn area_lands_in_budget(
            w in 50u32..5000,
            ratio in 0.1f64..10.0,
            min in 10_000u64..2_000_000,
            spread in 2u64..20,
        ) {
            let h = ((w as f64 * ratio).round() as u32).max(1);
            let max = min * spread;
            let p = plan(Dimensions::new(w, h), budget(Some(min), Some(max))).unwrap();
            let area = p.scaled.area();
            prop_assert!(area >= min && area <= max, "area {} not in [{}, {}]", area, min, max);

            // Cross-multiplied aspect check: each side is off by at most one pixel.
            let lhs = p.scaled.width as i64 * h as i64;
            let rhs = p.scaled.height as i64 * w as i64;
            prop_assert!((lhs - rhs).abs() <= (w + h) as i64);
        }

        #[test]
        fn area_lands_in_tight_budget(
            w in 1u32..5000,
            log_ratio in -5.3f64..5.3,
            min in 1u64..2_000_000,
            slack in 0u64..50,
        ) {
            let h = ((w as f64 * log_ratio.exp()).round() as u32).max(1);
            prop_assume!((w.max(h) as f64 / w.min(h) as f64) <= MAX_ASPECT_RATIO);
            let max = min + min * slack / 1000;
            let p = plan(Dimensions::new(w, h), budget(Some(min), Some(max))).unwrap();
            let area = p.scaled.area();
            prop_assert!(area >= min && area <= max, "{}x{} -> {:?} not in [{}, {}]", w, h, p.scaled, min, max);
        }

        #[test]
        fn downscale_never_exceeds_max(
            w in 1u32..20_000,
            log_ratio in -5.3f64..5.3,
            max in 1u64..100_000,
        ) {
            let h = ((w as f64 * log_ratio.exp()).round() as u32).max(1);
            prop_assume!((w.max(h) as f64 / w.min(h) as f64) <= MAX_ASPECT_RATIO);
            let p = plan(Dimensions::new(w, h), budget(None, Some(max))).unwrap();
            prop_assert!(p.scaled.area() <= max, "{}x{} -> {:?} over {}", w, h, p.scaled, max);
            prop_assert!(p.scaled.width >= 1 && p.scaled.height >= 1);
        }

        #[test]
        fn mapping_round_trips(
            w in 100u32..4000,
            h in 100u32..4000,
            max in 50_000u64..4_000_000,
            fx in 0.0f64..0.5,
            fy in 0.0f64..0.5,
        ) {
            let p = plan(Dimensions::new(w, h), budget(None, Some(max))).unwrap();
            let b = BBox::new(fx * w as f64, fy * h as f64, (fx + 0.4) * w as f64, (fy + 0.4) * h as f64);
            let back = p.to_original(&p.to_scaled(&b));
            prop_assert!((back.x1 - b.x1).abs() < 1e-6);
            prop_assert!((back.y2 - b.y2).abs() < 1e-6);
        }
    }
}
