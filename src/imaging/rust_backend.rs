//! Pure Rust image transformer built on the `image` crate.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Identify | `ImageReader::into_dimensions` (header only) |
//! | Decode (JPEG, PNG, TIFF, WebP, GIF) | `ImageReader` with content sniffing |
//! | Resize | `DynamicImage::resize_exact` with `Lanczos3` |
//! | Crop | `DynamicImage::crop_imm` |
//! | Watermark | `image::imageops::overlay` on RGBA8 with scaled alpha |
//! | Encode → JPEG | `JpegEncoder::new_with_quality` |
//! | Encode → PNG | `PngEncoder` |
//! | Encode → WebP | `WebPEncoder::new_lossless` |
//! | Encode → AVIF | `AvifEncoder` (rav1e, speed 6) |

use super::backend::{Dimensions, ImageTransformer, TransformError};
use super::params::{Opacity, OutputFormat, Quality};
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::path::Path;
use std::sync::LazyLock;

/// Extensions whose decoders are compiled in.
const PHOTO_CANDIDATES: &[(&str, ImageFormat)] = &[
    ("jpg", ImageFormat::Jpeg),
    ("jpeg", ImageFormat::Jpeg),
    ("png", ImageFormat::Png),
    ("tif", ImageFormat::Tiff),
    ("tiff", ImageFormat::Tiff),
    ("webp", ImageFormat::WebP),
    ("gif", ImageFormat::Gif),
];

static SUPPORTED_EXTENSIONS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    PHOTO_CANDIDATES
        .iter()
        .filter(|(_, fmt)| fmt.reading_enabled())
        .map(|(ext, _)| *ext)
        .collect()
});

/// Returns the set of image file extensions that have working decoders compiled in.
pub fn supported_input_extensions() -> &'static [&'static str] {
    &SUPPORTED_EXTENSIONS
}

/// Media type of an encoded image, sniffed from its leading bytes.
pub fn sniff_mime_type(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream")
}

/// Transformer backed by the `image` crate.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn open_reader(path: &Path) -> Result<ImageReader<std::io::BufReader<std::fs::File>>, TransformError> {
    // Remote downloads are stored without an extension, so always sniff.
    Ok(ImageReader::open(path)?.with_guessed_format()?)
}

fn decode_error(path: &Path, err: impl std::fmt::Display) -> TransformError {
    TransformError::Decode {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

fn encode_error(format: OutputFormat, err: impl std::fmt::Display) -> TransformError {
    TransformError::Encode {
        format,
        reason: err.to_string(),
    }
}

impl ImageTransformer for RustBackend {
    type Image = DynamicImage;

    fn identify(&self, path: &Path) -> Result<Dimensions, TransformError> {
        let (width, height) = open_reader(path)?
            .into_dimensions()
            .map_err(|e| decode_error(path, e))?;
        Ok(Dimensions { width, height })
    }

    fn decode(&self, path: &Path) -> Result<DynamicImage, TransformError> {
        open_reader(path)?.decode().map_err(|e| decode_error(path, e))
    }

    fn dimensions(&self, image: &DynamicImage) -> Dimensions {
        Dimensions {
            width: image.width(),
            height: image.height(),
        }
    }

    fn resize(
        &self,
        image: DynamicImage,
        width: u32,
        height: u32,
    ) -> Result<DynamicImage, TransformError> {
        if image.width() == width && image.height() == height {
            return Ok(image);
        }
        Ok(image.resize_exact(width, height, FilterType::Lanczos3))
    }

    fn crop(
        &self,
        image: DynamicImage,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<DynamicImage, TransformError> {
        if x.saturating_add(width) > image.width() || y.saturating_add(height) > image.height() {
            return Err(TransformError::ProcessingFailed(format!(
                "crop {}x{}+{}+{} exceeds image {}x{}",
                width,
                height,
                x,
                y,
                image.width(),
                image.height()
            )));
        }
        Ok(image.crop_imm(x, y, width, height))
    }

    fn composite(
        &self,
        base: DynamicImage,
        overlay: &DynamicImage,
        x: i64,
        y: i64,
        opacity: Opacity,
    ) -> Result<DynamicImage, TransformError> {
        let mut mark = overlay.to_rgba8();
        if opacity.percent() < 100 {
            for pixel in mark.pixels_mut() {
                pixel[3] = opacity.apply(pixel[3]);
            }
        }
        let mut canvas = base.into_rgba8();
        image::imageops::overlay(&mut canvas, &mark, x, y);
        Ok(DynamicImage::ImageRgba8(canvas))
    }

    fn encode(
        &self,
        image: &DynamicImage,
        format: OutputFormat,
        quality: Quality,
    ) -> Result<Vec<u8>, TransformError> {
        let mut buf = Vec::new();
        let result = match format {
            OutputFormat::Jpeg => {
                // JPEG has no alpha channel
                let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
                let encoder = JpegEncoder::new_with_quality(&mut buf, quality.value() as u8);
                rgb.write_with_encoder(encoder)
            }
            OutputFormat::Png => image.write_with_encoder(PngEncoder::new(&mut buf)),
            OutputFormat::WebP => {
                let rgba = DynamicImage::ImageRgba8(image.to_rgba8());
                rgba.write_with_encoder(WebPEncoder::new_lossless(&mut buf))
            }
            OutputFormat::Avif => {
                let encoder = AvifEncoder::new_with_speed_quality(&mut buf, 6, quality.value() as u8);
                image.write_with_encoder(encoder)
            }
        };
        result.map_err(|e| encode_error(format, e))?;
        Ok(buf)
    }
}
