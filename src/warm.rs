//! Cache pre-warming.
//!
//! Walks the source root and materializes every (image, preset) pair
//! through the same path as HTTP requests, so the first visitor gets a
//! cache hit. Images are processed in parallel on the global
//! [rayon](https://docs.rs/rayon) pool; per-image results stream to an
//! optional progress channel as they finish.
//!
//! The cache directory is skipped when it lives inside the source root,
//! as are hidden files and directories.

use crate::cache::CacheStats;
use crate::imaging::{ImageTransformer, supported_input_extensions};
use crate::service::{CacheOutcome, Imagefly};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use thiserror::Error;
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

#[derive(Error, Debug)]
pub enum WarmError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to walk source tree: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Nothing to warm: no presets configured or given")]
    NoPresets,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariantStatus {
    Cached,
    Built,
    Passthrough,
    Failed(String),
}

impl From<CacheOutcome> for VariantStatus {
    fn from(outcome: CacheOutcome) -> Self {
        match outcome {
            CacheOutcome::Hit => VariantStatus::Cached,
            CacheOutcome::Built => VariantStatus::Built,
            CacheOutcome::Passthrough => VariantStatus::Passthrough,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantInfo {
    pub params: String,
    pub status: VariantStatus,
}

/// Progress of one source image, sent as soon as all its presets are done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmEvent {
    /// 1-based position in the sorted source list.
    pub index: usize,
    pub source_path: String,
    pub variants: Vec<VariantInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarmResult {
    pub images: usize,
    pub failures: usize,
    pub cache_stats: CacheStats,
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .is_some_and(|e| supported_input_extensions().contains(&e.as_str()))
}

/// Supported images below `root`, as sorted `/`-separated relative paths.
///
/// `skip` (typically the cache directory) is not descended into.
pub fn find_sources(root: &Path, skip: Option<&Path>) -> Result<Vec<String>, WarmError> {
    let root = std::fs::canonicalize(root)?;
    let skip: Option<PathBuf> = skip.and_then(|p| std::fs::canonicalize(p).ok());

    let mut sources = Vec::new();
    let walker = WalkDir::new(&root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| !is_hidden(e) && Some(e.path()) != skip.as_deref());
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() || !has_supported_extension(entry.path()) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(&root) else {
            continue;
        };
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        sources.push(parts.join("/"));
    }
    sources.sort();
    Ok(sources)
}

/// Materialize every preset for every source image below `root`.
///
/// Individual failures are reported per variant and counted; they do not
/// stop the run.
pub fn warm<T: ImageTransformer>(
    service: &Imagefly<T>,
    root: &Path,
    presets: &[String],
    progress: Option<Sender<WarmEvent>>,
) -> Result<WarmResult, WarmError> {
    if presets.is_empty() {
        return Err(WarmError::NoPresets);
    }
    let sources = find_sources(root, Some(service.store().root()))?;

    let failures: usize = sources
        .par_iter()
        .enumerate()
        .map(|(i, source)| {
            let variants: Vec<VariantInfo> = presets
                .iter()
                .map(|params| {
                    let status = match service.materialize(params, source, None) {
                        Ok(artifact) => artifact.outcome.into(),
                        Err(e) => {
                            warn!(source = %source, params = %params, error = %e, "Warm failed");
                            VariantStatus::Failed(e.to_string())
                        }
                    };
                    VariantInfo {
                        params: params.clone(),
                        status,
                    }
                })
                .collect();
            let failed = variants
                .iter()
                .filter(|v| matches!(v.status, VariantStatus::Failed(_)))
                .count();
            if let Some(tx) = &progress {
                tx.send(WarmEvent {
                    index: i + 1,
                    source_path: source.clone(),
                    variants,
                })
                .ok();
            }
            failed
        })
        .sum();

    Ok(WarmResult {
        images: sources.len(),
        failures,
        cache_stats: service.stats(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use crate::config::Config;
    use crate::imaging::RustBackend;
    use crate::service::Settings;
    use crate::source::{FetchError, SourceFetcher, SourceResolver};
    use crate::test_helpers::write_test_image;
    use std::fs;
    use tempfile::TempDir;
    use url::Url;

    struct NoFetch;

    impl SourceFetcher for NoFetch {
        fn fetch(&self, url: &Url) -> Result<PathBuf, FetchError> {
            Err(FetchError::Transport {
                url: url.to_string(),
                reason: "offline".into(),
            })
        }
    }

    fn service(root: &Path) -> Imagefly<RustBackend> {
        Imagefly::new(
            RustBackend::new(),
            CacheStore::new(root.join("cache"), true),
            SourceResolver::new(root.to_path_buf(), Box::new(NoFetch)),
            Settings::from_config(&Config::default()),
        )
    }

    #[test]
    fn finds_supported_images_sorted() {
        let tmp = TempDir::new().unwrap();
        write_test_image(tmp.path(), "b/2.png", 4, 4);
        write_test_image(tmp.path(), "a.jpg", 4, 4);
        write_test_image(tmp.path(), ".hidden/x.png", 4, 4);
        write_test_image(tmp.path(), "cache/old.jpg", 4, 4);
        fs::write(tmp.path().join("notes.txt"), "x").unwrap();

        let sources = find_sources(tmp.path(), Some(&tmp.path().join("cache"))).unwrap();
        assert_eq!(sources, vec!["a.jpg".to_string(), "b/2.png".to_string()]);
    }

    #[test]
    fn uppercase_extensions_are_found() {
        let tmp = TempDir::new().unwrap();
        let path = write_test_image(tmp.path(), "a.png", 4, 4);
        fs::rename(&path, tmp.path().join("A.PNG")).unwrap();
        assert_eq!(find_sources(tmp.path(), None).unwrap(), vec!["A.PNG"]);
    }

    #[test]
    fn warm_builds_then_hits() {
        let tmp = TempDir::new().unwrap();
        write_test_image(tmp.path(), "photos/a.png", 40, 30);
        write_test_image(tmp.path(), "photos/b.png", 40, 30);
        let service = service(tmp.path());
        let presets = vec!["w20".to_string(), "w40-h30".to_string()];

        let (tx, rx) = std::sync::mpsc::channel();
        let result = warm(&service, tmp.path(), &presets, Some(tx)).unwrap();
        assert_eq!(result.images, 2);
        assert_eq!(result.failures, 0);
        assert_eq!(result.cache_stats.builds, 2);
        assert_eq!(result.cache_stats.passthroughs, 2);

        let mut events: Vec<WarmEvent> = rx.iter().collect();
        events.sort_by_key(|e| e.index);
        assert_eq!(events[0].source_path, "photos/a.png");
        assert_eq!(events[0].variants[0].status, VariantStatus::Built);
        assert_eq!(events[0].variants[1].status, VariantStatus::Passthrough);

        // Artifacts written into the cache are not picked up as sources
        let again = warm(&service, tmp.path(), &presets, None).unwrap();
        assert_eq!(again.images, 2);
        assert_eq!(again.cache_stats.hits, 2);
    }

    #[test]
    fn failures_are_counted_not_fatal() {
        let tmp = TempDir::new().unwrap();
        write_test_image(tmp.path(), "good.png", 10, 10);
        fs::write(tmp.path().join("broken.jpg"), b"not an image").unwrap();
        let service = service(tmp.path());

        let result = warm(&service, tmp.path(), &["w5".to_string()], None).unwrap();
        assert_eq!(result.images, 2);
        assert_eq!(result.failures, 1);
    }

    #[test]
    fn no_presets_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let service = service(tmp.path());
        assert!(matches!(
            warm(&service, tmp.path(), &[], None),
            Err(WarmError::NoPresets)
        ));
    }
}
