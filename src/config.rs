//! Service configuration.
//!
//! Handles loading, validating and merging `imgfly.toml`. The user file is
//! sparse: it is merged over the stock defaults, so it only needs the keys
//! it wants to change. Unknown keys are rejected to catch typos early.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! cache_dir = "cache"         # Artifact and download cache
//! source_root = "."           # Local sources are resolved below this
//! mimic_source_dir = true     # Mirror source directories in the cache
//! scale_up = false            # Allow output larger than the source
//! max_dimension = 8192        # Upscaling never goes past this many pixels a side
//! quality = 80                # Default encode quality (0-100)
//! output_format = "jpg"       # jpg, png, webp or avif
//! cache_expire = 604800       # Expires / max-age, in seconds
//! enforce_presets = false     # Only serve the operations listed below
//! presets = []                # e.g. ["w200-h150-c", "w800"]
//!
//! [remote]
//! ttl = 86400                 # Refetch remote sources after this (0 = never)
//! max_bytes = 20971520        # Largest accepted remote download
//!
//! [server]
//! listen = "127.0.0.1:8080"
//!
//! [processing]
//! max_processes = 4           # Parallel warm workers (omit for auto = CPU cores)
//!
//! [watermarks.logo]           # Applied when a request carries the `logo` token
//! image = "watermarks/logo.png"
//! offset_x = -10              # Pixels, or "center" / "end"
//! offset_y = "end"
//! opacity = 60                # 0-100
//! ```
//!
//! The configuration is resolved once at startup and shared read-only.

use crate::imaging::{
    Dimensions, Offset, Opacity, OutputFormat, PipelineConfig, Quality, Watermark,
};
use crate::params::parse_params;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "imgfly.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Service configuration loaded from `imgfly.toml`.
///
/// All fields have sensible defaults. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Root of the artifact cache (and of remote downloads).
    pub cache_dir: PathBuf,
    /// Local sources are resolved relative to this directory.
    pub source_root: PathBuf,
    /// Mirror each source's directory under the cache root.
    pub mimic_source_dir: bool,
    /// Allow requested sizes beyond the source's native size.
    pub scale_up: bool,
    /// Largest side an upscale may produce. Downscaling is never limited.
    pub max_dimension: u32,
    /// Encode quality when a request carries no `q` token.
    pub quality: u32,
    pub output_format: OutputFormat,
    /// `Expires` / `Cache-Control` lifetime in seconds.
    pub cache_expire: u64,
    /// When set, only operation strings listed in `presets` are served.
    pub enforce_presets: bool,
    pub presets: Vec<String>,
    pub remote: RemoteConfig,
    pub server: ServerConfig,
    pub processing: ProcessingConfig,
    /// Watermarks keyed by the request token that selects them.
    pub watermarks: BTreeMap<String, WatermarkConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("cache"),
            source_root: PathBuf::from("."),
            mimic_source_dir: true,
            scale_up: false,
            max_dimension: 8192,
            quality: 80,
            output_format: OutputFormat::default(),
            cache_expire: 604_800,
            enforce_presets: false,
            presets: Vec::new(),
            remote: RemoteConfig::default(),
            server: ServerConfig::default(),
            processing: ProcessingConfig::default(),
            watermarks: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.quality > 100 {
            return Err(ConfigError::Validation("quality must be 0-100".into()));
        }
        if self.max_dimension == 0 {
            return Err(ConfigError::Validation(
                "max_dimension must be at least 1".into(),
            ));
        }
        if self.enforce_presets && self.presets.is_empty() {
            return Err(ConfigError::Validation(
                "enforce_presets requires at least one preset".into(),
            ));
        }
        // Presets are checked against an unbounded source: only their shape matters here
        let unbounded = Dimensions::new(u32::MAX, u32::MAX);
        for preset in &self.presets {
            parse_params(preset, unbounded, true).map_err(|e| {
                ConfigError::Validation(format!("preset `{}` is invalid: {}", preset, e))
            })?;
        }
        if self.server.listen.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "server.listen `{}` is not a socket address",
                self.server.listen
            )));
        }
        for (token, watermark) in &self.watermarks {
            if watermark.opacity > 100 {
                return Err(ConfigError::Validation(format!(
                    "watermarks.{}.opacity must be 0-100",
                    token
                )));
            }
            if watermark.image.as_os_str().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "watermarks.{}.image is required",
                    token
                )));
            }
        }
        Ok(())
    }

    /// Process-wide settings for the transform pipeline.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            watermarks: self
                .watermarks
                .iter()
                .map(|(token, wm)| (token.clone(), wm.to_watermark()))
                .collect(),
            format: self.output_format,
            default_quality: Quality::new(self.quality),
        }
    }
}

/// Remote source fetching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    /// Seconds a download is reused before it is fetched again. 0 keeps
    /// downloads forever.
    pub ttl: u64,
    /// Downloads larger than this are refused.
    pub max_bytes: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            ttl: 86_400,
            max_bytes: 20 * 1024 * 1024,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel warm workers.
    /// When absent or null, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_processes.map(|n| n.min(cores)).unwrap_or(cores)
}

/// One `[watermarks.<token>]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatermarkConfig {
    pub image: PathBuf,
    pub offset_x: Offset,
    pub offset_y: Offset,
    /// Percent, 0-100.
    pub opacity: u32,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            image: PathBuf::new(),
            offset_x: Offset::default(),
            offset_y: Offset::default(),
            opacity: 100,
        }
    }
}

impl WatermarkConfig {
    pub fn to_watermark(&self) -> Watermark {
        Watermark {
            image: self.image.clone(),
            offset_x: self.offset_x,
            offset_y: self.offset_y,
            opacity: Opacity::new(self.opacity),
        }
    }
}

/// Stock defaults as a TOML value, the base layer for merging.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(Config::default())?)
}

/// Deep-merge `overlay` onto `base`. Tables merge key by key; any other
/// value in `overlay` replaces the one in `base`.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file as a raw TOML value. A missing file is `None`.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay over `base`, deserialize and validate.
pub fn resolve_config(base: toml::Value, overlay: Option<toml::Value>) -> Result<Config, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: Config = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `path`.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result. A missing file yields the stock defaults.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `imgfly.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# imgfly Configuration
# ====================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# Where transformed images (and remote downloads) are cached.
cache_dir = "cache"

# Local source paths in requests are resolved below this directory.
# Absolute paths and `..` are always rejected.
source_root = "."

# Store artifacts under the source's own directory structure
# (cache/photos/2024/<hash>-<mtime>.jpg instead of cache/<hash>-<mtime>.jpg).
mimic_source_dir = true

# Allow requests to enlarge images beyond their native size.
scale_up = false

# Largest width or height an upscale may produce, in pixels. Requests that
# would grow an image past it are refused; shrinking is never limited.
max_dimension = 8192

# Encode quality when a request has no `q` token (0 = worst, 100 = best).
# Applies to jpg and avif; png and webp are written lossless.
quality = 80

# Encoding of every cached artifact: "jpg", "png", "webp" or "avif".
output_format = "jpg"

# Lifetime sent in Expires and Cache-Control, in seconds (7 days).
cache_expire = 604800

# Only serve operation strings listed in `presets`; anything else is a 404.
enforce_presets = false

# Operation strings, e.g. ["w200-h150-c", "w800-q90"].
# Also the default set built by `imgfly warm`.
presets = []

# ---------------------------------------------------------------------------
# Remote sources (http/https URIs)
# ---------------------------------------------------------------------------
[remote]
# Seconds a download is reused before it is fetched again (0 = forever).
ttl = 86400

# Largest accepted download in bytes.
max_bytes = 20971520

# ---------------------------------------------------------------------------
# HTTP server
# ---------------------------------------------------------------------------
[server]
listen = "127.0.0.1:8080"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel workers for `imgfly warm`. Omit for auto (= CPU cores).
# Values above the core count are clamped down.
# max_processes = 4

# ---------------------------------------------------------------------------
# Watermarks
# ---------------------------------------------------------------------------
# A request containing the token selects the watermark, e.g.
# /imagefly/w800-logo/photos/a.jpg. Matching watermarks are applied in
# token order. Offsets are pixels (negative = from the far edge) or
# "center" / "end".
#
# [watermarks.logo]
# image = "watermarks/logo.png"
# offset_x = -10
# offset_y = "end"
# opacity = 60
"##
}
