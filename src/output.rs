//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Render
//!
//! ```text
//! 200 image/jpeg, 18234 bytes (MISS)
//!     Artifact: cache/photos/3f9a…-1700000000.jpg
//!     Written: out.jpg
//! ```
//!
//! ## Warm
//!
//! ```text
//! 001 photos/beach.jpg
//!     w200-h150-c: built
//!     w800: cached
//! Warmed 12 images (0 failed)
//! Cache: 3 cached, 21 built (24 total)
//! ```
//!
//! ## Check
//!
//! ```text
//! Config: imgfly.toml
//!     Sources: .
//!     Cache: cache (mirrored)
//!     Output: jpg, quality 80, expires after 604800s
//!     Presets: w200-h150-c, w800 (enforced)
//!     Watermarks: logo
//!     Listen: 127.0.0.1:8080
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::config::Config;
use crate::service::Served;
use crate::warm::{VariantStatus, WarmEvent, WarmResult};
use std::path::Path;

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

// ============================================================================
// render
// ============================================================================

/// Summary of one rendered request.
pub fn format_render_output(served: &Served, written: Option<&Path>) -> Vec<String> {
    let response = &served.response;
    let mut lines = vec![format!(
        "{} {}, {} bytes ({})",
        response.status.code(),
        response.header("Content-Type").unwrap_or("-"),
        response.body.len(),
        served.artifact.outcome.header_value()
    )];
    lines.push(format!(
        "{}Artifact: {}",
        indent(1),
        served.artifact.path.display()
    ));
    if let Some(path) = written {
        lines.push(format!("{}Written: {}", indent(1), path.display()));
    }
    lines
}

pub fn print_render_output(served: &Served, written: Option<&Path>) {
    for line in format_render_output(served, written) {
        println!("{}", line);
    }
}

// ============================================================================
// warm
// ============================================================================

/// Format a single warm progress event as display lines.
pub fn format_warm_event(event: &WarmEvent) -> Vec<String> {
    let mut lines = vec![format!(
        "{} {}",
        format_index(event.index),
        event.source_path
    )];
    for variant in &event.variants {
        let status = match &variant.status {
            VariantStatus::Cached => "cached".to_string(),
            VariantStatus::Built => "built".to_string(),
            VariantStatus::Passthrough => "same size, served as-is".to_string(),
            VariantStatus::Failed(reason) => format!("FAILED: {}", reason),
        };
        lines.push(format!("{}{}: {}", indent(1), variant.params, status));
    }
    lines
}

pub fn format_warm_summary(result: &WarmResult) -> Vec<String> {
    vec![
        format!(
            "Warmed {} images ({} failed)",
            result.images, result.failures
        ),
        format!("Cache: {}", result.cache_stats),
    ]
}

pub fn print_warm_summary(result: &WarmResult) {
    for line in format_warm_summary(result) {
        println!("{}", line);
    }
}

// ============================================================================
// check
// ============================================================================

/// Summary of a loaded configuration. `source` names where it came from.
pub fn format_check_output(config: &Config, source: &str) -> Vec<String> {
    let presets = if config.enforce_presets {
        format!("{} (enforced)", join_or_none(&config.presets))
    } else {
        join_or_none(&config.presets)
    };
    let watermarks: Vec<String> = config.watermarks.keys().cloned().collect();
    let layout = if config.mimic_source_dir {
        "mirrored"
    } else {
        "flat"
    };

    vec![
        format!("Config: {}", source),
        format!("{}Sources: {}", indent(1), config.source_root.display()),
        format!(
            "{}Cache: {} ({})",
            indent(1),
            config.cache_dir.display(),
            layout
        ),
        format!(
            "{}Output: {}, quality {}, expires after {}s",
            indent(1),
            config.output_format,
            config.quality,
            config.cache_expire
        ),
        format!("{}Presets: {}", indent(1), presets),
        format!("{}Watermarks: {}", indent(1), join_or_none(&watermarks)),
        format!("{}Listen: {}", indent(1), config.server.listen),
    ]
}

pub fn print_check_output(config: &Config, source: &str) {
    for line in format_check_output(config, source) {
        println!("{}", line);
    }
}
