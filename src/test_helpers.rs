//! Shared test utilities.
//!
//! Fixture images are generated on the fly rather than checked in, so every
//! test controls the exact dimensions and format it needs.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! let path = write_test_image(tmp.path(), "photos/a.jpg", 800, 600);
//! ```

use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};

// =========================================================================
// Fixture images
// =========================================================================

/// Write a `width` x `height` image to `dir/name`, encoded by extension.
///
/// The pixels are deterministic noise: lossy encoders cannot flatten it, so
/// output size actually depends on quality. Parent directories are created.
pub fn write_test_image(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    noise_image(width, height).save(&path).unwrap();
    path
}

/// Deterministic pseudo-random RGB pixels.
pub fn noise_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let mut v = x.wrapping_mul(0x9E37_79B9) ^ y.wrapping_mul(0x85EB_CA6B);
        v ^= v >> 15;
        v = v.wrapping_mul(0x2C1B_3C6D);
        v ^= v >> 12;
        let [r, g, b, _] = v.to_le_bytes();
        Rgb([r, g, b])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn writes_requested_size() {
        let tmp = TempDir::new().unwrap();
        let path = write_test_image(tmp.path(), "nested/a.png", 31, 17);
        let img = image::open(&path).unwrap();
        assert_eq!((img.width(), img.height()), (31, 17));
    }

    #[test]
    fn noise_is_deterministic() {
        assert_eq!(noise_image(8, 8), noise_image(8, 8));
    }
}
