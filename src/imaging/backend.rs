//! Image transformer trait and shared types.
//!
//! The [`ImageTransformer`] trait is the seam between the transform pipeline
//! and the pixel work: identify, decode, resize, crop, composite and encode.
//! Every operation is deliberately dumb (exact sizes, explicit positions) so
//! that all policy lives in [`calculations`](super::calculations) and
//! [`operations`](super::operations), where it can be tested with a mock.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), built on the `image`
//! crate.

use super::params::{Opacity, OutputFormat, Quality};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode {path}: {reason}")]
    Decode { path: String, reason: String },
    #[error("Failed to encode {format}: {reason}")]
    Encode { format: OutputFormat, reason: String },
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Pixel dimensions of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Pixel operations needed to materialize a cached artifact.
///
/// Images are passed by value through `resize`, `crop` and `composite` so a
/// backend can reuse buffers. `Sync` lets one transformer serve concurrent
/// requests and rayon workers.
pub trait ImageTransformer: Sync {
    type Image: Send;

    /// Read image dimensions without a full decode where possible.
    fn identify(&self, path: &Path) -> Result<Dimensions, TransformError>;

    /// Decode an image file. The format is sniffed from the content, not
    /// the extension.
    fn decode(&self, path: &Path) -> Result<Self::Image, TransformError>;

    fn dimensions(&self, image: &Self::Image) -> Dimensions;

    /// Resize to exactly `width` x `height`.
    fn resize(
        &self,
        image: Self::Image,
        width: u32,
        height: u32,
    ) -> Result<Self::Image, TransformError>;

    /// Cut a `width` x `height` region whose top-left corner is at `(x, y)`.
    fn crop(
        &self,
        image: Self::Image,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<Self::Image, TransformError>;

    /// Draw `overlay` onto `base` at `(x, y)`, clipped to `base`.
    fn composite(
        &self,
        base: Self::Image,
        overlay: &Self::Image,
        x: i64,
        y: i64,
        opacity: Opacity,
    ) -> Result<Self::Image, TransformError>;

    fn encode(
        &self,
        image: &Self::Image,
        format: OutputFormat,
        quality: Quality,
    ) -> Result<Vec<u8>, TransformError>;
}
