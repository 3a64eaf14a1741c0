//! Parameter types for image operations.
//!
//! These types describe *what* to do, not *how* to do it. They sit between
//! the [`operations`](super::operations) pipeline, which decides which pixel
//! operations a request needs, and the [`backend`](super::backend), which
//! does the pixel work.
//!
//! ## Types
//!
//! - [`Quality`]: lossy encoding quality (1–100). Clamped on construction.
//! - [`OutputFormat`]: encoding of cached artifacts; also the artifact extension.
//! - [`Offset`] / [`Anchor`]: watermark placement along one axis.
//! - [`Opacity`]: watermark opacity (0–100).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(80)
    }
}

/// Encoding used for every materialized artifact.
///
/// JPEG and AVIF honour [`Quality`]; PNG and WebP are written lossless
/// and ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    #[default]
    #[serde(rename = "jpg", alias = "jpeg")]
    Jpeg,
    #[serde(rename = "png")]
    Png,
    #[serde(rename = "webp")]
    WebP,
    #[serde(rename = "avif")]
    Avif,
}

impl OutputFormat {
    /// File extension of artifacts in this format (without the dot).
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::WebP => "webp",
            OutputFormat::Avif => "avif",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Named watermark placements along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Anchor {
    Center,
    End,
}

/// Watermark offset along one axis.
///
/// In TOML this is either a pixel count or one of `"center"` / `"end"`.
/// Negative pixel counts are measured from the far edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Offset {
    Pixels(i64),
    Anchor(Anchor),
}

impl Default for Offset {
    fn default() -> Self {
        Offset::Anchor(Anchor::Center)
    }
}

/// Watermark opacity in percent (0 = invisible, 100 = opaque).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opacity(u8);

impl Opacity {
    pub fn new(percent: u32) -> Self {
        Self(percent.min(100) as u8)
    }

    pub fn percent(self) -> u8 {
        self.0
    }

    /// Scale an 8-bit alpha value by this opacity.
    pub fn apply(self, alpha: u8) -> u8 {
        ((alpha as u32 * self.0 as u32 + 50) / 100) as u8
    }
}

impl Default for Opacity {
    fn default() -> Self {
        Self(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_clamps_to_valid_range() {
        assert_eq!(Quality::new(0).value(), 1);
        assert_eq!(Quality::new(50).value(), 50);
        assert_eq!(Quality::new(150).value(), 100);
    }

    #[test]
    fn output_format_extensions() {
        assert_eq!(OutputFormat::default().extension(), "jpg");
        assert_eq!(OutputFormat::Avif.extension(), "avif");
    }

    #[test]
    fn output_format_accepts_jpeg_alias() {
        #[derive(Deserialize)]
        struct Wrapper {
            format: OutputFormat,
        }
        let w: Wrapper = toml::from_str(r#"format = "jpeg""#).unwrap();
        assert_eq!(w.format, OutputFormat::Jpeg);
        let w: Wrapper = toml::from_str(r#"format = "png""#).unwrap();
        assert_eq!(w.format, OutputFormat::Png);
    }

    #[test]
    fn offset_parses_pixels_and_anchors() {
        #[derive(Deserialize)]
        struct Wrapper {
            x: Offset,
            y: Offset,
        }
        let w: Wrapper = toml::from_str("x = -10\ny = \"end\"").unwrap();
        assert_eq!(w.x, Offset::Pixels(-10));
        assert_eq!(w.y, Offset::Anchor(Anchor::End));
    }

    #[test]
    fn opacity_scales_alpha() {
        assert_eq!(Opacity::new(100).apply(255), 255);
        assert_eq!(Opacity::new(50).apply(255), 128);
        assert_eq!(Opacity::new(0).apply(255), 0);
        assert_eq!(Opacity::new(250).percent(), 100);
    }
}
