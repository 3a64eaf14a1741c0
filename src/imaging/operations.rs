//! The transform pipeline.
//!
//! Combines the pure [`calculations`](super::calculations) with transformer
//! calls: resize (with an optional cover-and-crop), watermarks, encode. The
//! output is either a complete encoded artifact or an error; nothing here
//! touches the cache directory.

use super::backend::{ImageTransformer, TransformError};
use super::calculations::{
    calculate_center_crop_origin, calculate_cover_dimensions, calculate_fit_dimensions,
    calculate_watermark_offset,
};
use super::params::{Offset, Opacity, OutputFormat, Quality};
use super::Dimensions;
use crate::params::TransformSpec;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, TransformError>;

/// A watermark that requests can opt into by token.
#[derive(Debug, Clone, PartialEq)]
pub struct Watermark {
    pub image: PathBuf,
    pub offset_x: Offset,
    pub offset_y: Offset,
    pub opacity: Opacity,
}

/// Process-wide settings the pipeline needs besides the request itself.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Applied in key order for every matching request token.
    pub watermarks: BTreeMap<String, Watermark>,
    pub format: OutputFormat,
    pub default_quality: Quality,
}

/// Pixel geometry for one request, computed before any pixels move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizePlan {
    pub resize: (u32, u32),
    /// `(x, y, width, height)` cut from the resized image.
    pub crop: Option<(u32, u32, u32, u32)>,
}

/// Plan the resize for a source of `source` dimensions.
///
/// Cropping covers the requested box (the smaller side matches, the other
/// overflows) and then cuts the centre. Without crop the image is fitted
/// into the box, keeping its aspect ratio.
pub fn plan_resize(source: Dimensions, spec: &TransformSpec) -> ResizePlan {
    match (spec.crop, spec.width, spec.height) {
        (true, Some(w), Some(h)) => {
            let covered = calculate_cover_dimensions(source, (w, h));
            let (x, y) = calculate_center_crop_origin(covered, (w, h));
            ResizePlan {
                resize: covered,
                crop: Some((x, y, w, h)),
            }
        }
        _ => ResizePlan {
            resize: calculate_fit_dimensions(source, spec.width, spec.height),
            crop: None,
        },
    }
}

/// Effective encode quality: the request's, else the configured default.
pub fn effective_quality(spec: &TransformSpec, default_quality: Quality) -> Quality {
    spec.quality.map(Quality::new).unwrap_or(default_quality)
}

/// Produce the encoded artifact for `source` under `spec`.
pub fn build<T: ImageTransformer>(
    transformer: &T,
    source: T::Image,
    spec: &TransformSpec,
    config: &PipelineConfig,
) -> Result<Vec<u8>> {
    let plan = plan_resize(transformer.dimensions(&source), spec);

    let (w, h) = plan.resize;
    let mut image = transformer.resize(source, w, h)?;
    if let Some((x, y, cw, ch)) = plan.crop {
        image = transformer.crop(image, x, y, cw, ch)?;
    }

    for (token, watermark) in &config.watermarks {
        if !spec.extra_tokens.contains(token) {
            continue;
        }
        let mark = transformer.decode(&watermark.image)?;
        let base_dims = transformer.dimensions(&image);
        let mark_dims = transformer.dimensions(&mark);
        let x = calculate_watermark_offset(base_dims.width, mark_dims.width, watermark.offset_x);
        let y = calculate_watermark_offset(base_dims.height, mark_dims.height, watermark.offset_y);
        image = transformer.composite(image, &mark, x, y, watermark.opacity)?;
    }

    transformer.encode(
        &image,
        config.format,
        effective_quality(spec, config.default_quality),
    )
}
