//! Pure calculation functions for image dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

use super::backend::Dimensions;
use super::params::{Anchor, Offset};

/// Dimensions that fit inside the requested box while keeping the source
/// aspect ratio.
///
/// With both sides requested the more constraining side wins. With one side
/// requested the other follows the source aspect ratio. Never returns a
/// zero-sized dimension.
///
/// # Examples
/// ```
/// # use imgfly::imaging::{Dimensions, calculate_fit_dimensions};
/// let src = Dimensions { width: 800, height: 600 };
/// assert_eq!(calculate_fit_dimensions(src, Some(400), None), (400, 300));
/// assert_eq!(calculate_fit_dimensions(src, Some(400), Some(100)), (133, 100));
/// ```
pub fn calculate_fit_dimensions(
    source: Dimensions,
    width: Option<u32>,
    height: Option<u32>,
) -> (u32, u32) {
    let src_w = source.width.max(1) as f64;
    let src_h = source.height.max(1) as f64;

    // The side that determines the scale is matched exactly; the other one
    // follows the aspect ratio.
    let (out_w, out_h) = match (width, height) {
        (Some(w), Some(h)) => {
            let scale_x = w as f64 / src_w;
            let scale_y = h as f64 / src_h;
            if scale_x <= scale_y {
                (w, (src_h * scale_x).round() as u32)
            } else {
                ((src_w * scale_y).round() as u32, h)
            }
        }
        (Some(w), None) => (w, (src_h * w as f64 / src_w).round() as u32),
        (None, Some(h)) => ((src_w * h as f64 / src_h).round() as u32, h),
        (None, None) => (source.width, source.height),
    };
    (out_w.max(1), out_h.max(1))
}

/// Dimensions that completely cover the target area (resize before crop).
///
/// The source aspect ratio is kept; one side matches the target exactly and
/// the other overflows it.
///
/// # Examples
/// ```
/// # use imgfly::imaging::{Dimensions, calculate_cover_dimensions};
/// let src = Dimensions { width: 800, height: 600 };
/// assert_eq!(calculate_cover_dimensions(src, (300, 300)), (400, 300));
/// ```
pub fn calculate_cover_dimensions(source: Dimensions, target: (u32, u32)) -> (u32, u32) {
    let (tgt_w, tgt_h) = target;
    let src_aspect = source.width.max(1) as f64 / source.height.max(1) as f64;
    let tgt_aspect = tgt_w.max(1) as f64 / tgt_h.max(1) as f64;

    if src_aspect > tgt_aspect {
        // Source is wider: height will match, width will exceed
        let h = tgt_h;
        let w = ((h as f64 * src_aspect).round() as u32).max(tgt_w);
        (w.max(1), h.max(1))
    } else {
        // Source is taller: width will match, height will exceed
        let w = tgt_w;
        let h = ((w as f64 / src_aspect).round() as u32).max(tgt_h);
        (w.max(1), h.max(1))
    }
}

/// Top-left corner of a centred `crop` box inside `outer`.
pub fn calculate_center_crop_origin(outer: (u32, u32), crop: (u32, u32)) -> (u32, u32) {
    (
        outer.0.saturating_sub(crop.0) / 2,
        outer.1.saturating_sub(crop.1) / 2,
    )
}

/// Position of a watermark along one axis of length `base`.
///
/// The result may be negative or run past the far edge; compositing clips.
pub fn calculate_watermark_offset(base: u32, mark: u32, offset: Offset) -> i64 {
    let free = base as i64 - mark as i64;
    match offset {
        Offset::Anchor(Anchor::Center) => free / 2,
        Offset::Anchor(Anchor::End) => free,
        Offset::Pixels(px) if px < 0 => free + px,
        Offset::Pixels(px) => px,
    }
}
