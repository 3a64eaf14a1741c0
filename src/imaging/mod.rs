//! Image processing in pure Rust, no system libraries.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `image::ImageReader::into_dimensions` |
//! | **Resize / crop** | Lanczos3 `resize_exact` + `crop_imm` |
//! | **Watermark** | `imageops::overlay` with scaled alpha |
//! | **Encode** | JPEG / PNG / lossless WebP / AVIF (rav1e) |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Quality, output format, watermark placement
//! - **Backend**: [`ImageTransformer`] trait + [`RustBackend`]
//! - **Operations**: The transform pipeline combining calculations + backend

pub mod backend;
mod calculations;
pub mod operations;
mod params;
pub mod rust_backend;

pub use backend::{Dimensions, ImageTransformer, TransformError};
pub use calculations::{calculate_cover_dimensions, calculate_fit_dimensions};
pub use operations::{PipelineConfig, Watermark, build, effective_quality, plan_resize};
pub use params::{Anchor, Offset, Opacity, OutputFormat, Quality};
pub use rust_backend::{RustBackend, sniff_mime_type, supported_input_extensions};
