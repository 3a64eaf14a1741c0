//! Artifact storage on disk.
//!
//! Decoding, resizing and encoding a photo costs orders of magnitude more
//! than reading a file, so every transform result is kept and served again
//! for as long as its identity is asked for.
//!
//! # Design
//!
//! The store is **content-addressed**: an artifact's file name is its
//! [identity](crate::identity), which already encodes the source file, the
//! normalized operations, the source's modification time and the output
//! encoding. A lookup is therefore a single `stat`:
//!
//! - present → serve it, no revalidation needed;
//! - absent → build it and write it.
//!
//! Changing the source changes its mtime, which changes the identity. Old
//! artifacts are never overwritten or deleted here; they stop being
//! reachable and can be swept by external housekeeping.
//!
//! ## Layout
//!
//! ```text
//! {cache_dir}/{hash}-{mtime}.{ext}                      # flat
//! {cache_dir}/{source/sub/dir}/{hash}-{mtime}.{ext}     # mimic_source_dir = true
//! ```
//!
//! Mirroring the source tree is purely for humans browsing the cache;
//! identities are unique either way.
//!
//! ## Writes
//!
//! Artifacts are written to a hidden temporary file in the target directory
//! and renamed into place, so a concurrent `exists` never sees a partial
//! file. Concurrent builds of the same identity in this process are also
//! serialized through [`CacheStore::exclusive`], so the work is done once.
//!
//! ## Same-size requests
//!
//! A request whose size equals the source's native size has nothing to do;
//! [`CacheStore::is_required`] tells the orchestrator to serve the source
//! as-is and nothing is written.

use crate::imaging::Dimensions;
use crate::params::TransformSpec;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to create cache directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("Failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// Where an artifact lives, relative to the cache root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheIdentity {
    relative_dir: PathBuf,
    file_name: String,
}

impl CacheIdentity {
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn relative_path(&self) -> PathBuf {
        self.relative_dir.join(&self.file_name)
    }
}

impl fmt::Display for CacheIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.relative_path().display())
    }
}

/// Summary of cache activity since startup.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub builds: u64,
    pub passthroughs: u64,
}

impl CacheStats {
    pub fn total(&self) -> u64 {
        self.hits + self.builds + self.passthroughs
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hits > 0 || self.passthroughs > 0 {
            if self.passthroughs > 0 {
                write!(
                    f,
                    "{} cached, {} built, {} passed through ({} total)",
                    self.hits,
                    self.builds,
                    self.passthroughs,
                    self.total()
                )
            } else {
                write!(
                    f,
                    "{} cached, {} built ({} total)",
                    self.hits,
                    self.builds,
                    self.total()
                )
            }
        } else {
            write!(f, "{} built", self.builds)
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    builds: AtomicU64,
    passthroughs: AtomicU64,
}

/// Owner of the cache directory tree.
#[derive(Debug)]
pub struct CacheStore {
    root: PathBuf,
    mimic_source_dir: bool,
    /// Directories already created by this process.
    known_dirs: Mutex<HashSet<PathBuf>>,
    /// One lock per identity currently being built.
    build_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
    counters: Counters,
}

impl CacheStore {
    pub fn new(root: PathBuf, mimic_source_dir: bool) -> Self {
        Self {
            root,
            mimic_source_dir,
            known_dirs: Mutex::new(HashSet::new()),
            build_locks: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Create the cache root if it does not exist.
    pub fn init(&self) -> Result<(), StoreError> {
        self.ensure_dir(&self.root)?;
        info!(cache_dir = %self.root.display(), "Cache initialized");
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Place `key` in the cache, under `mirror_dir` when mirroring is on.
    ///
    /// Only normal path components of `mirror_dir` are kept, so the result
    /// always stays under the cache root.
    pub fn identity(&self, key: String, mirror_dir: &Path) -> CacheIdentity {
        let relative_dir = if self.mimic_source_dir {
            mirror_dir
                .components()
                .filter_map(|c| match c {
                    Component::Normal(part) => Some(part),
                    _ => None,
                })
                .collect()
        } else {
            PathBuf::new()
        };
        CacheIdentity {
            relative_dir,
            file_name: key,
        }
    }

    /// Absolute artifact path. No I/O.
    pub fn resolve_path(&self, identity: &CacheIdentity) -> PathBuf {
        self.root.join(identity.relative_path())
    }

    pub fn exists(&self, identity: &CacheIdentity) -> bool {
        self.resolve_path(identity).is_file()
    }

    /// Whether `spec` needs an artifact at all.
    ///
    /// `false` means the request asks for exactly the source's native size
    /// and the source should be served untouched.
    pub fn is_required(spec: &TransformSpec, source: Dimensions) -> bool {
        spec.size() != Some((source.width, source.height))
    }

    /// Create `dir` and its parents once per process. Existing directories
    /// are fine.
    ///
    /// The set of known directories is only a shortcut; [`CacheStore::write`]
    /// forgets an entry whose directory has since been removed.
    pub fn ensure_dir(&self, dir: &Path) -> Result<(), StoreError> {
        if self.known_dirs().contains(dir) {
            return Ok(());
        }
        std::fs::create_dir_all(dir).map_err(|source| StoreError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;
        self.known_dirs().insert(dir.to_path_buf());
        Ok(())
    }

    fn known_dirs(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.known_dirs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically write an artifact, creating mirrored directories first.
    ///
    /// Directories swept away by external housekeeping are recreated.
    pub fn write(&self, identity: &CacheIdentity, bytes: &[u8]) -> Result<PathBuf, StoreError> {
        let path = self.resolve_path(identity);
        let write_err = |source| StoreError::Write {
            path: path.clone(),
            source,
        };
        match path.parent() {
            Some(parent) => {
                self.ensure_dir(parent)?;
                if let Err(e) = write_atomic(&path, bytes) {
                    if e.kind() != io::ErrorKind::NotFound {
                        return Err(write_err(e));
                    }
                    debug!(dir = %parent.display(), "Cache directory vanished, recreating");
                    self.known_dirs().remove(parent);
                    self.ensure_dir(parent)?;
                    write_atomic(&path, bytes).map_err(write_err)?;
                }
            }
            None => write_atomic(&path, bytes).map_err(write_err)?,
        }
        debug!(identity = %identity, size = bytes.len(), "Cached artifact");
        Ok(path)
    }

    /// Run `f` while holding the build lock for `identity`.
    ///
    /// Different identities never block each other.
    pub fn exclusive<R>(&self, identity: &CacheIdentity, f: impl FnOnce() -> R) -> R {
        let key = identity.relative_path();
        let slot = {
            let mut locks = self
                .build_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.clone()).or_default())
        };

        let result = {
            let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        let mut locks = self
            .build_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Only the map and this call hold the slot: nobody is waiting.
        if Arc::strong_count(&slot) == 2 {
            locks.remove(&key);
        }
        result
    }

    pub fn record_hit(&self) {
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_build(&self) {
        self.counters.builds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_passthrough(&self) {
        self.counters.passthroughs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            builds: self.counters.builds.load(Ordering::Relaxed),
            passthroughs: self.counters.passthroughs.load(Ordering::Relaxed),
        }
    }
}

static TEMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Write `bytes` to a hidden sibling of `path`, then rename it into place.
///
/// The parent directory must exist. On failure the temporary file is
/// removed and `path` is untouched.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    let tmp = parent.join(format!(
        ".{}.{}.{}.tmp",
        path.file_name().and_then(|s| s.to_str()).unwrap_or("artifact"),
        std::process::id(),
        TEMP_SEQUENCE.fetch_add(1, Ordering::Relaxed)
    ));

    let written = (|| {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)
    })();

    if written.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::fs;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::TempDir;

    fn spec(width: Option<u32>, height: Option<u32>) -> TransformSpec {
        TransformSpec {
            crop: false,
            extra_tokens: BTreeSet::new(),
            height,
            quality: None,
            width,
        }
    }

    // =========================================================================
    // Paths
    // =========================================================================

    #[test]
    fn flat_layout_ignores_mirror_dir() {
        let store = CacheStore::new(PathBuf::from("/cache"), false);
        let id = store.identity("abc-1.jpg".into(), Path::new("photos/2024"));
        assert_eq!(store.resolve_path(&id), PathBuf::from("/cache/abc-1.jpg"));
    }

    #[test]
    fn mimic_layout_mirrors_source_dir() {
        let store = CacheStore::new(PathBuf::from("/cache"), true);
        let id = store.identity("abc-1.jpg".into(), Path::new("photos/2024"));
        assert_eq!(
            store.resolve_path(&id),
            PathBuf::from("/cache/photos/2024/abc-1.jpg")
        );
        assert_eq!(id.to_string(), "photos/2024/abc-1.jpg");
    }

    #[test]
    fn mirror_dir_cannot_escape_root() {
        let store = CacheStore::new(PathBuf::from("/cache"), true);
        let id = store.identity("k.jpg".into(), Path::new("/../../etc/./x"));
        assert_eq!(store.resolve_path(&id), PathBuf::from("/cache/etc/x/k.jpg"));
    }

    // =========================================================================
    // is_required
    // =========================================================================

    #[test]
    fn same_size_is_not_required() {
        let native = Dimensions::new(800, 600);
        assert!(!CacheStore::is_required(&spec(Some(800), Some(600)), native));
    }

    #[test]
    fn other_sizes_are_required() {
        let native = Dimensions::new(800, 600);
        assert!(CacheStore::is_required(&spec(Some(400), Some(300)), native));
        assert!(CacheStore::is_required(&spec(Some(800), None), native));
        assert!(CacheStore::is_required(&spec(Some(600), Some(800)), native));
    }

    // =========================================================================
    // Writes
    // =========================================================================

    #[test]
    fn write_then_exists() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path().join("cache"), true);
        let id = store.identity("k-1.jpg".into(), Path::new("a/b"));
        assert!(!store.exists(&id));

        let path = store.write(&id, b"artifact").unwrap();
        assert!(store.exists(&id));
        assert_eq!(fs::read(path).unwrap(), b"artifact");
    }

    #[test]
    fn write_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path().to_path_buf(), false);
        let id = store.identity("k-1.jpg".into(), Path::new(""));
        store.write(&id, b"one").unwrap();
        store.write(&id, b"two").unwrap();

        let names: Vec<String> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["k-1.jpg".to_string()]);
        assert_eq!(fs::read(tmp.path().join("k-1.jpg")).unwrap(), b"two");
    }

    #[test]
    fn failed_write_is_surfaced_and_invisible() {
        let tmp = TempDir::new().unwrap();
        // A file where the mirrored directory should go
        fs::write(tmp.path().join("blocked"), "").unwrap();
        let store = CacheStore::new(tmp.path().to_path_buf(), true);
        let id = store.identity("k-1.jpg".into(), Path::new("blocked"));

        let err = store.write(&id, b"data").unwrap_err();
        assert!(matches!(err, StoreError::CreateDir { .. }));
        assert!(!store.exists(&id));
    }

    #[test]
    fn ensure_dir_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path().to_path_buf(), true);
        let dir = tmp.path().join("x/y");
        store.ensure_dir(&dir).unwrap();
        store.ensure_dir(&dir).unwrap();
        // Created by someone else: still fine
        fs::create_dir_all(tmp.path().join("z")).unwrap();
        store.ensure_dir(&tmp.path().join("z")).unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn write_recreates_swept_directories() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("cache");
        let store = CacheStore::new(root.clone(), true);
        let first = store.identity("a-1.jpg".into(), Path::new("photos"));
        store.write(&first, b"one").unwrap();

        fs::remove_dir_all(&root).unwrap();

        let second = store.identity("b-1.jpg".into(), Path::new("photos"));
        let path = store.write(&second, b"two").unwrap();
        assert_eq!(fs::read(path).unwrap(), b"two");
        assert!(!store.exists(&first));
    }

    #[test]
    fn init_creates_root() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path().join("deep/cache"), false);
        store.init().unwrap();
        assert!(store.root().is_dir());
    }

    // =========================================================================
    // Build locks
    // =========================================================================

    #[test]
    fn exclusive_serializes_same_identity() {
        let store = Arc::new(CacheStore::new(PathBuf::from("/cache"), false));
        let id = store.identity("same.jpg".into(), Path::new(""));
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                let id = id.clone();
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                std::thread::spawn(move || {
                    store.exclusive(&id, || {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(10));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(store.build_locks.lock().unwrap().is_empty());
    }

    #[test]
    fn exclusive_returns_closure_result() {
        let store = CacheStore::new(PathBuf::from("/cache"), false);
        let id = store.identity("x.jpg".into(), Path::new(""));
        assert_eq!(store.exclusive(&id, || 7), 7);
    }

    // =========================================================================
    // CacheStats
    // =========================================================================

    #[test]
    fn stats_count_outcomes() {
        let store = CacheStore::new(PathBuf::from("/cache"), false);
        store.record_hit();
        store.record_hit();
        store.record_build();
        store.record_passthrough();
        assert_eq!(
            store.stats(),
            CacheStats {
                hits: 2,
                builds: 1,
                passthroughs: 1
            }
        );
    }

    #[test]
    fn cache_stats_display_with_hits() {
        let s = CacheStats {
            hits: 5,
            builds: 2,
            passthroughs: 0,
        };
        assert_eq!(format!("{}", s), "5 cached, 2 built (7 total)");
    }

    #[test]
    fn cache_stats_display_with_passthroughs() {
        let s = CacheStats {
            hits: 3,
            builds: 1,
            passthroughs: 2,
        };
        assert_eq!(
            format!("{}", s),
            "3 cached, 1 built, 2 passed through (6 total)"
        );
    }

    #[test]
    fn cache_stats_display_no_hits() {
        let s = CacheStats {
            builds: 3,
            ..CacheStats::default()
        };
        assert_eq!(format!("{}", s), "3 built");
    }
}
