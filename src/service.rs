//! Request orchestration.
//!
//! [`Imagefly`] wires the stages together for one request:
//!
//! ```text
//! preset check → resolve source → identify → parse → passthrough?
//!     → derive identity → exists? → (lock → exists? → build → write) → respond
//! ```
//!
//! Source dimensions are read once, from the image header, and feed both
//! the upscale clamp in [`parse_params`] and the same-size passthrough
//! check. Every failure ends the request with a [`RequestError`]; there is
//! no partial success.
//!
//! Everything here blocks. The HTTP layer runs it on the blocking pool and
//! the `warm` command runs it on rayon workers.

use crate::cache::{CacheStats, CacheStore};
use crate::config::Config;
use crate::error::{InvalidRequest, RequestError};
use crate::identity::derive_key;
use crate::imaging::{self, Dimensions, ImageTransformer, PipelineConfig, RustBackend};
use crate::params::{check_output_size, parse_params};
use crate::respond::{Response, respond};
use crate::source::{HttpFetcher, SourceLocation, SourceResolver};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// How an artifact was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Served from the cache.
    Hit,
    /// Built for this request.
    Built,
    /// Same-size request, the source itself is served.
    Passthrough,
}

impl CacheOutcome {
    /// Value of the `X-Cache` response header.
    pub fn header_value(self) -> &'static str {
        match self {
            CacheOutcome::Hit => "HIT",
            CacheOutcome::Built => "MISS",
            CacheOutcome::Passthrough => "PASS",
        }
    }
}

/// The file that answers a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub outcome: CacheOutcome,
}

/// One request as delivered by a router.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransformRequest<'a> {
    /// Hyphen-delimited operations, e.g. `w200-h150-c`.
    pub params: &'a str,
    /// Relative local path or http(s) URI.
    pub source: &'a str,
    /// Raw query string, forwarded to remote sources.
    pub query: Option<&'a str>,
    pub if_modified_since: Option<&'a str>,
}

#[derive(Debug)]
pub struct Served {
    pub response: Response,
    pub artifact: Artifact,
}

/// Request policy, fixed at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub scale_up: bool,
    /// Upscale limit, see [`check_output_size`].
    pub max_dimension: u32,
    pub cache_expire: u64,
    /// When set, only these operation strings are served.
    pub presets: Option<BTreeSet<String>>,
    pub pipeline: PipelineConfig,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            scale_up: config.scale_up,
            max_dimension: config.max_dimension,
            cache_expire: config.cache_expire,
            presets: config
                .enforce_presets
                .then(|| config.presets.iter().cloned().collect()),
            pipeline: config.pipeline_config(),
        }
    }
}

pub struct Imagefly<T: ImageTransformer> {
    transformer: T,
    store: CacheStore,
    sources: SourceResolver,
    settings: Settings,
}

impl Imagefly<RustBackend> {
    /// Production wiring: `image`-crate transformer, HTTP fetcher, cache
    /// under `config.cache_dir`.
    pub fn from_config(config: &Config) -> Self {
        let fetcher = HttpFetcher::new(
            config.cache_dir.clone(),
            Duration::from_secs(config.remote.ttl),
            config.remote.max_bytes,
        );
        Imagefly::new(
            RustBackend::new(),
            CacheStore::new(config.cache_dir.clone(), config.mimic_source_dir),
            SourceResolver::new(config.source_root.clone(), Box::new(fetcher)),
            Settings::from_config(config),
        )
    }
}

impl<T: ImageTransformer> Imagefly<T> {
    pub fn new(transformer: T, store: CacheStore, sources: SourceResolver, settings: Settings) -> Self {
        Self {
            transformer,
            store,
            sources,
            settings,
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    /// Serve one request end to end.
    pub fn handle(&self, request: &TransformRequest<'_>, now: DateTime<Utc>) -> Result<Served, RequestError> {
        let artifact = self.materialize(request.params, request.source, request.query)?;
        let response = respond(
            &artifact.path,
            self.settings.cache_expire,
            request.if_modified_since,
            now,
        )
        .map_err(|source| RequestError::Unreadable {
            path: artifact.path.clone(),
            source,
        })?;
        Ok(Served { response, artifact })
    }

    /// Make sure the artifact for a request exists and return it.
    ///
    /// No response body is read; `warm` uses this directly.
    pub fn materialize(
        &self,
        params: &str,
        source: &str,
        query: Option<&str>,
    ) -> Result<Artifact, RequestError> {
        let enforced = self.settings.presets.as_ref();
        if enforced.is_some_and(|presets| !presets.contains(params)) {
            return Err(InvalidRequest::PresetMismatch(params.to_string()).into());
        }
        // Reject malformed operations before touching the source
        parse_params(params, Dimensions::new(u32::MAX, u32::MAX), true)?;

        let location = SourceLocation::parse(source, query)?;
        let located = self.sources.resolve(&location)?;
        let dims = self.transformer.identify(&located.path)?;
        let spec = parse_params(params, dims, self.settings.scale_up)?;
        check_output_size(dims, &spec, self.settings.max_dimension)?;

        if !CacheStore::is_required(&spec, dims) {
            debug!(source = %located.path.display(), "Same size as source, passing through");
            self.store.record_passthrough();
            return Ok(Artifact {
                path: located.path,
                outcome: CacheOutcome::Passthrough,
            });
        }

        let key = derive_key(
            &located.key_path,
            &spec,
            located.modified,
            self.settings.pipeline.format.extension(),
        );
        let identity = self.store.identity(key, &located.mirror_dir);
        let path = self.store.resolve_path(&identity);

        if self.store.exists(&identity) {
            debug!(identity = %identity, "Cache hit");
            self.store.record_hit();
            return Ok(Artifact {
                path,
                outcome: CacheOutcome::Hit,
            });
        }

        self.store.exclusive(&identity, || -> Result<Artifact, RequestError> {
            // Another request may have built it while we waited
            if self.store.exists(&identity) {
                debug!(identity = %identity, "Built by a concurrent request");
                self.store.record_hit();
                return Ok(Artifact {
                    path: path.clone(),
                    outcome: CacheOutcome::Hit,
                });
            }

            let image = self.transformer.decode(&located.path)?;
            let bytes = imaging::build(&self.transformer, image, &spec, &self.settings.pipeline)?;
            let written = self.store.write(&identity, &bytes)?;
            self.store.record_build();
            info!(
                identity = %identity,
                source = %located.path.display(),
                params,
                size = bytes.len(),
                "Built artifact"
            );
            Ok(Artifact {
                path: written,
                outcome: CacheOutcome::Built,
            })
        })
    }
}
