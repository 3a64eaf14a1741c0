//! Operation token parsing.
//!
//! A request names its transform as a hyphen-delimited token list, e.g.
//! `w200-h150-c-q85-logo`. Each token's first character is its key:
//!
//! | Token | Meaning |
//! |---|---|
//! | `w<int>` | target width |
//! | `h<int>` | target height |
//! | `c` | crop to exactly `w` x `h` |
//! | `q<int>` | encode quality (1–100) |
//! | anything else | kept verbatim as an extra token (watermark selector) |
//!
//! A token is only recognized when its value has the right shape: `w`, `h`
//! and `q` need digits, `c` needs nothing. `wide` or `copyright` are
//! therefore extra tokens, not a width or a crop flag.
//!
//! [`parse_params`] produces a normalized [`TransformSpec`]: crop fills in
//! the missing side, upscaling is clamped to the source, and a spec with no
//! dimensions at all is rejected.

use crate::error::InvalidRequest;
use crate::imaging::{Dimensions, plan_resize};
use serde::Serialize;
use std::collections::BTreeSet;

/// The normalized set of requested operations.
///
/// Fields are declared in key order and serialize in that order, which is
/// what the cache identity hashes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransformSpec {
    pub crop: bool,
    /// Unrecognized tokens, sorted and deduplicated.
    pub extra_tokens: BTreeSet<String>,
    pub height: Option<u32>,
    pub quality: Option<u32>,
    pub width: Option<u32>,
}

impl TransformSpec {
    /// `(width, height)` when both sides are set.
    pub fn size(&self) -> Option<(u32, u32)> {
        self.width.zip(self.height)
    }
}

/// A single recognized token.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token<'a> {
    Width(u32),
    Height(u32),
    Quality(u32),
    Crop,
    Extra(&'a str),
}

fn parse_number(key: char, value: &str) -> Result<u32, InvalidRequest> {
    value.parse::<u32>().map_err(|_| InvalidRequest::OutOfRange {
        key,
        value: value.to_string(),
    })
}

fn parse_token(raw: &str) -> Result<Token<'_>, InvalidRequest> {
    let mut chars = raw.chars();
    let Some(key) = chars.next() else {
        return Ok(Token::Extra(raw));
    };
    let value = chars.as_str();
    let numeric = !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit());

    Ok(match key {
        'w' if numeric => Token::Width(parse_number(key, value)?),
        'h' if numeric => Token::Height(parse_number(key, value)?),
        'q' if numeric => Token::Quality(parse_number(key, value)?),
        'c' if value.is_empty() => Token::Crop,
        _ => Token::Extra(raw),
    })
}

/// Parse and normalize an operation token list.
///
/// `source` is the native size of the source image; when `scale_up` is
/// false each requested side is clamped to it. Zero values count as unset.
/// Later tokens override earlier ones with the same key.
pub fn parse_params(
    raw: &str,
    source: Dimensions,
    scale_up: bool,
) -> Result<TransformSpec, InvalidRequest> {
    let mut spec = TransformSpec::default();

    for piece in raw.split('-').filter(|p| !p.is_empty()) {
        match parse_token(piece)? {
            Token::Width(w) => spec.width = Some(w).filter(|&w| w > 0),
            Token::Height(h) => spec.height = Some(h).filter(|&h| h > 0),
            Token::Quality(q) => spec.quality = Some(q.min(100)).filter(|&q| q > 0),
            Token::Crop => spec.crop = true,
            Token::Extra(token) => {
                spec.extra_tokens.insert(token.to_string());
            }
        }
    }

    // Cropping needs both sides
    if spec.crop {
        if spec.width.is_none() {
            spec.width = spec.height;
        }
        if spec.height.is_none() {
            spec.height = spec.width;
        }
    }

    if !scale_up {
        spec.width = spec.width.map(|w| w.min(source.width));
        spec.height = spec.height.map(|h| h.min(source.height));
    }

    if spec.width.unwrap_or(0) == 0 && spec.height.unwrap_or(0) == 0 {
        return Err(InvalidRequest::MissingDimensions);
    }

    Ok(spec)
}

/// Refuse a spec whose resize would grow a side past `max_dimension`.
///
/// A side may always stay at or below the source's own size, so large
/// sources can still be scaled down. The check covers the intermediate
/// size of a cover-and-crop as well as the final box.
pub fn check_output_size(
    source: Dimensions,
    spec: &TransformSpec,
    max_dimension: u32,
) -> Result<(), InvalidRequest> {
    let (width, height) = plan_resize(source, spec).resize;
    if width > source.width.max(max_dimension) || height > source.height.max(max_dimension) {
        return Err(InvalidRequest::TooLarge {
            width,
            height,
            max: max_dimension,
        });
    }
    Ok(())
}
