//! Source image resolution.
//!
//! A request names its source as either a path relative to the configured
//! source root (`photos/2024/beach.jpg`) or an `http`/`https` URI. Both are
//! resolved to a local file plus the facts the cache identity needs: a
//! stable key path, a modification time and the directory to mirror.
//!
//! Remote sources go through a [`SourceFetcher`]. The production
//! [`HttpFetcher`] keeps each download at `{dir}/{host}/{sha256(url)}` and
//! reuses it while it is younger than the configured TTL. A refetch gives
//! the download a new mtime, which gives every artifact built from it a new
//! identity.

use crate::cache::write_atomic;
use crate::error::{InvalidRequest, RequestError};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("{url} responded with status {status}")]
    Status { url: String, status: u16 },
    #[error("Failed to fetch {url}: {reason}")]
    Transport { url: String, reason: String },
    #[error("Failed to store download of {url}: {source}")]
    Io { url: String, source: io::Error },
}

/// Where a request's source lives, before any I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    /// Relative to the source root. Never absolute, never contains `..`.
    Local(PathBuf),
    Remote(Url),
}

impl SourceLocation {
    /// Classify a raw source string taken from a request path.
    ///
    /// Routers collapse `//`, so `http:/host/x.jpg` is read as
    /// `http://host/x.jpg`. For remote sources a non-empty `query` is
    /// passed on to the remote server.
    pub fn parse(raw: &str, query: Option<&str>) -> Result<Self, InvalidRequest> {
        let raw = raw.trim_start_matches('/');
        if raw.is_empty() {
            return Err(InvalidRequest::MalformedUri(raw.to_string()));
        }

        if let Some(uri) = repair_scheme(raw) {
            let mut url = Url::parse(&uri).map_err(|_| InvalidRequest::MalformedUri(uri.clone()))?;
            if url.host_str().is_none_or(str::is_empty) {
                return Err(InvalidRequest::MalformedUri(uri));
            }
            if let Some(q) = query.filter(|q| !q.is_empty()) {
                url.set_query(Some(q));
            }
            return Ok(SourceLocation::Remote(url));
        }

        let path = Path::new(raw);
        let safe = path.components().all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(InvalidRequest::ForbiddenPath(raw.to_string()));
        }
        Ok(SourceLocation::Local(path.to_path_buf()))
    }
}

/// `http:/x` → `http://x`; `None` for anything that is not http(s).
fn repair_scheme(raw: &str) -> Option<String> {
    for scheme in ["http:", "https:"] {
        let Some(prefix) = raw.get(..scheme.len()) else {
            continue;
        };
        if !prefix.eq_ignore_ascii_case(scheme) {
            continue;
        }
        let rest = raw[scheme.len()..].trim_start_matches('/');
        return Some(format!("{}//{}", scheme.to_ascii_lowercase(), rest));
    }
    None
}

/// A source that exists on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedSource {
    /// File to decode or serve.
    pub path: PathBuf,
    /// Stable name used in the cache identity.
    pub key_path: String,
    /// Directory mirrored under the cache root in mimic mode.
    pub mirror_dir: PathBuf,
    /// Seconds since the epoch.
    pub modified: i64,
}

/// Turns remote URIs into stable local files.
pub trait SourceFetcher: Send + Sync {
    fn fetch(&self, url: &Url) -> Result<PathBuf, FetchError>;
}

/// Resolves [`SourceLocation`]s against a source root and a fetcher.
pub struct SourceResolver {
    root: PathBuf,
    fetcher: Box<dyn SourceFetcher>,
}

impl SourceResolver {
    pub fn new(root: PathBuf, fetcher: Box<dyn SourceFetcher>) -> Self {
        Self { root, fetcher }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, location: &SourceLocation) -> Result<LocatedSource, RequestError> {
        match location {
            SourceLocation::Local(relative) => self.resolve_local(relative),
            SourceLocation::Remote(url) => self.resolve_remote(url),
        }
    }

    fn resolve_local(&self, relative: &Path) -> Result<LocatedSource, RequestError> {
        let joined = self.root.join(relative);
        let path = match fs::canonicalize(&joined) {
            Ok(path) => path,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(RequestError::SourceNotFound(relative.to_path_buf()));
            }
            Err(source) => return Err(RequestError::Unreadable { path: joined, source }),
        };
        let metadata = fs::metadata(&path).map_err(|source| RequestError::Unreadable {
            path: path.clone(),
            source,
        })?;
        if !metadata.is_file() {
            return Err(RequestError::SourceNotFound(relative.to_path_buf()));
        }
        let modified = modified_epoch(&metadata).map_err(|source| RequestError::Unreadable {
            path: path.clone(),
            source,
        })?;

        Ok(LocatedSource {
            key_path: path.to_string_lossy().into_owned(),
            mirror_dir: relative.parent().map(Path::to_path_buf).unwrap_or_default(),
            path,
            modified,
        })
    }

    fn resolve_remote(&self, url: &Url) -> Result<LocatedSource, RequestError> {
        let path = self.fetcher.fetch(url)?;
        let metadata = fs::metadata(&path).map_err(|source| RequestError::Unreadable {
            path: path.clone(),
            source,
        })?;
        let modified = modified_epoch(&metadata).map_err(|source| RequestError::Unreadable {
            path: path.clone(),
            source,
        })?;

        Ok(LocatedSource {
            path,
            key_path: url.as_str().to_string(),
            mirror_dir: PathBuf::from(url.host_str().unwrap_or_default()),
            modified,
        })
    }
}

/// Modification time in whole seconds since the epoch.
pub fn modified_epoch(metadata: &fs::Metadata) -> io::Result<i64> {
    let since = metadata
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map_err(io::Error::other)?;
    i64::try_from(since.as_secs()).map_err(io::Error::other)
}

/// Whether a download modified at `modified` may still be used at `now`.
///
/// A TTL of zero keeps downloads forever.
pub fn is_fresh(modified: SystemTime, ttl: Duration, now: SystemTime) -> bool {
    if ttl.is_zero() {
        return true;
    }
    match now.duration_since(modified) {
        Ok(age) => age < ttl,
        // Modified in the future: clock skew, treat as fresh
        Err(_) => true,
    }
}

/// Blocking HTTP fetcher with an on-disk download cache.
pub struct HttpFetcher {
    agent: ureq::Agent,
    dir: PathBuf,
    ttl: Duration,
    max_bytes: u64,
}

impl HttpFetcher {
    pub fn new(dir: PathBuf, ttl: Duration, max_bytes: u64) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(30)))
            .http_status_as_error(false)
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            dir,
            ttl,
            max_bytes,
        }
    }

    /// Where the download of `url` is kept.
    pub fn download_path(&self, url: &Url) -> PathBuf {
        let digest = Sha256::digest(url.as_str().as_bytes());
        self.dir
            .join(url.host_str().unwrap_or("unknown-host"))
            .join(format!("{:x}", digest))
    }

    fn download(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let transport = |e: ureq::Error| FetchError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        };
        let mut response = self.agent.get(url.as_str()).call().map_err(transport)?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }
        response
            .body_mut()
            .with_config()
            .limit(self.max_bytes)
            .read_to_vec()
            .map_err(transport)
    }
}

impl SourceFetcher for HttpFetcher {
    fn fetch(&self, url: &Url) -> Result<PathBuf, FetchError> {
        let path = self.download_path(url);
        let fresh = fs::metadata(&path)
            .and_then(|m| m.modified())
            .is_ok_and(|modified| is_fresh(modified, self.ttl, SystemTime::now()));
        if fresh {
            debug!(url = %url, path = %path.display(), "Reusing download");
            return Ok(path);
        }

        let bytes = self.download(url)?;
        let io_err = |source| FetchError::Io {
            url: url.to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        write_atomic(&path, &bytes).map_err(io_err)?;
        info!(url = %url, size = bytes.len(), "Fetched remote source");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Fetcher that serves fixed files and records what was asked for.
    struct StaticFetcher {
        file: PathBuf,
        requested: Mutex<Vec<String>>,
    }

    impl SourceFetcher for StaticFetcher {
        fn fetch(&self, url: &Url) -> Result<PathBuf, FetchError> {
            self.requested.lock().unwrap().push(url.to_string());
            Ok(self.file.clone())
        }
    }

    struct FailingFetcher;

    impl SourceFetcher for FailingFetcher {
        fn fetch(&self, url: &Url) -> Result<PathBuf, FetchError> {
            Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
        }
    }

    fn local(raw: &str) -> SourceLocation {
        SourceLocation::parse(raw, None).unwrap()
    }

    // =========================================================================
    // SourceLocation::parse
    // =========================================================================

    #[test]
    fn relative_paths_are_local() {
        assert_eq!(
            local("photos/2024/a.jpg"),
            SourceLocation::Local(PathBuf::from("photos/2024/a.jpg"))
        );
    }

    #[test]
    fn leading_slash_is_stripped() {
        assert_eq!(local("/a.jpg"), SourceLocation::Local(PathBuf::from("a.jpg")));
    }

    #[test]
    fn parent_components_are_forbidden() {
        assert_eq!(
            SourceLocation::parse("photos/../../etc/passwd", None),
            Err(InvalidRequest::ForbiddenPath("photos/../../etc/passwd".into()))
        );
        assert!(SourceLocation::parse("./a.jpg", None).is_err());
    }

    #[test]
    fn empty_source_is_malformed() {
        assert!(matches!(
            SourceLocation::parse("", None),
            Err(InvalidRequest::MalformedUri(_))
        ));
    }

    #[test]
    fn collapsed_scheme_is_repaired() {
        let SourceLocation::Remote(url) = local("http:/example.com/img/a.jpg") else {
            panic!("expected remote");
        };
        assert_eq!(url.as_str(), "http://example.com/img/a.jpg");

        let SourceLocation::Remote(url) = local("HTTPS://example.com/a.jpg") else {
            panic!("expected remote");
        };
        assert_eq!(url.scheme(), "https");
    }

    #[test]
    fn query_is_forwarded_to_remote() {
        let location = SourceLocation::parse("https://example.com/a.jpg", Some("v=2&s=x")).unwrap();
        let SourceLocation::Remote(url) = location else {
            panic!("expected remote");
        };
        assert_eq!(url.as_str(), "https://example.com/a.jpg?v=2&s=x");
    }

    #[test]
    fn query_is_ignored_for_local() {
        assert_eq!(
            SourceLocation::parse("a.jpg", Some("v=2")).unwrap(),
            SourceLocation::Local(PathBuf::from("a.jpg"))
        );
    }

    #[test]
    fn remote_without_host_is_malformed() {
        assert!(matches!(
            SourceLocation::parse("http:/", None),
            Err(InvalidRequest::MalformedUri(_))
        ));
    }

    // =========================================================================
    // SourceResolver
    // =========================================================================

    #[test]
    fn resolves_local_file() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("photos")).unwrap();
        fs::write(tmp.path().join("photos/a.jpg"), b"x").unwrap();
        let resolver = SourceResolver::new(tmp.path().to_path_buf(), Box::new(FailingFetcher));

        let located = resolver.resolve(&local("photos/a.jpg")).unwrap();
        assert_eq!(located.mirror_dir, PathBuf::from("photos"));
        assert!(located.path.is_absolute());
        assert_eq!(located.key_path, located.path.to_string_lossy());
        assert!(located.modified > 0);
    }

    #[test]
    fn missing_local_file_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let resolver = SourceResolver::new(tmp.path().to_path_buf(), Box::new(FailingFetcher));
        let err = resolver.resolve(&local("nope.jpg")).unwrap_err();
        assert!(matches!(err, RequestError::SourceNotFound(p) if p == Path::new("nope.jpg")));
    }

    #[test]
    fn directory_is_not_a_source() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("dir")).unwrap();
        let resolver = SourceResolver::new(tmp.path().to_path_buf(), Box::new(FailingFetcher));
        assert!(matches!(
            resolver.resolve(&local("dir")),
            Err(RequestError::SourceNotFound(_))
        ));
    }

    #[test]
    fn remote_source_mirrors_host() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("download");
        fs::write(&file, b"x").unwrap();
        let fetcher = StaticFetcher {
            file: file.clone(),
            requested: Mutex::new(Vec::new()),
        };
        let resolver = SourceResolver::new(tmp.path().to_path_buf(), Box::new(fetcher));

        let location = SourceLocation::parse("https://cdn.example.com/a.jpg", Some("v=1")).unwrap();
        let located = resolver.resolve(&location).unwrap();
        assert_eq!(located.path, file);
        assert_eq!(located.key_path, "https://cdn.example.com/a.jpg?v=1");
        assert_eq!(located.mirror_dir, PathBuf::from("cdn.example.com"));
    }

    #[test]
    fn fetch_failure_propagates() {
        let tmp = TempDir::new().unwrap();
        let resolver = SourceResolver::new(tmp.path().to_path_buf(), Box::new(FailingFetcher));
        let location = SourceLocation::parse("https://example.com/a.jpg", None).unwrap();
        let err = resolver.resolve(&location).unwrap_err();
        assert_eq!(err.status(), 502);
    }

    // =========================================================================
    // HttpFetcher
    // =========================================================================

    #[test]
    fn freshness_respects_ttl() {
        let now = SystemTime::now();
        let hour = Duration::from_secs(3600);
        assert!(is_fresh(now - Duration::from_secs(10), hour, now));
        assert!(!is_fresh(now - 2 * hour, hour, now));
        assert!(is_fresh(now - 1000 * hour, Duration::ZERO, now));
        assert!(is_fresh(now + hour, hour, now));
    }

    #[test]
    fn download_path_is_hashed_under_host() {
        let fetcher = HttpFetcher::new(PathBuf::from("/cache"), Duration::ZERO, 1024);
        let url = Url::parse("https://example.com/a.jpg").unwrap();
        let path = fetcher.download_path(&url);
        assert!(path.starts_with("/cache/example.com"));
        assert_eq!(path.file_name().unwrap().len(), 64);
        assert_ne!(
            path,
            fetcher.download_path(&Url::parse("https://example.com/a.jpg?v=2").unwrap())
        );
    }

    #[test]
    fn fresh_download_is_reused_without_network() {
        let tmp = TempDir::new().unwrap();
        let fetcher = HttpFetcher::new(tmp.path().to_path_buf(), Duration::ZERO, 1024);
        // Unroutable host: reaching the network would fail the test
        let url = Url::parse("http://invalid.test/a.jpg").unwrap();
        let path = fetcher.download_path(&url);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"cached").unwrap();

        assert_eq!(fetcher.fetch(&url).unwrap(), path);
    }
}
