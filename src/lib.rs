//! # imgfly
//!
//! An on-demand image transformation cache. A request names a source image
//! and a compact operation list; the transformed image is built once and
//! served from disk for every later request with the same inputs.
//!
//! ```text
//! GET /imagefly/w200-h150-c-q85-logo/photos/2024/beach.jpg
//!               └── operations ───┘ └──── source ────────┘
//! ```
//!
//! # Request Flow
//!
//! ```text
//! params   "w200-h150-c"         →  TransformSpec     (normalized, clamped)
//! identity source + spec + mtime →  3f9a…-1700000000.jpg
//! cache    exists?               →  hit: serve it
//!                                   miss: decode → resize/crop → watermark → encode → write
//! respond  artifact              →  200 with caching headers, or 304
//! ```
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`params`] | Parses the hyphen-delimited operation list into a [`params::TransformSpec`] |
//! | [`identity`] | Derives the content-and-intent address of an artifact |
//! | [`cache`] | Artifact storage: paths, atomic writes, build locks, statistics |
//! | [`imaging`] | Transformer trait, `image`-crate backend and the transform pipeline |
//! | [`source`] | Local source resolution and remote fetching |
//! | [`respond`] | Caching headers and the `If-Modified-Since` short-circuit |
//! | [`service`] | The per-request orchestrator tying the above together |
//! | [`server`] | axum router |
//! | [`warm`] | Parallel pre-building of presets over the source tree |
//! | [`config`] | `imgfly.toml` loading, validation and the stock config |
//! | [`error`] | Request-level error taxonomy and HTTP status mapping |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Self-Invalidating Identities
//!
//! The source file's modification time is part of every artifact's name.
//! Replacing a source changes its mtime and therefore every identity derived
//! from it, so stale artifacts are simply never looked up again. There is
//! no purge step and no revalidation on hit; old files are left for
//! external housekeeping.
//!
//! ## Pure-Rust Imaging
//!
//! Decoding, resampling and encoding use the `image` crate only. The binary
//! has no system library dependencies.
//!
//! ## Blocking Core, Async Edge
//!
//! Everything below [`server`] is plain blocking code that takes an
//! immutable configuration at construction. The HTTP layer hands each
//! request to tokio's blocking pool; `warm` drives the same code from rayon.

pub mod cache;
pub mod config;
pub mod error;
pub mod identity;
pub mod imaging;
pub mod output;
pub mod params;
pub mod respond;
pub mod server;
pub mod service;
pub mod source;
pub mod warm;

#[cfg(test)]
pub(crate) mod test_helpers;
