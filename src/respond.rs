//! Conditional HTTP responses for artifacts and passthrough sources.
//!
//! [`respond`] turns a file on disk into a [`Response`] value: caching
//! headers, a sniffed content type and length, and either the full body or
//! a bodiless `304 Not Modified`. A 304 describes the same representation
//! as the 200 would, so it carries the same headers. The revalidation check is a byte-for-byte comparison
//! of `If-Modified-Since` against the `Last-Modified` value we would send;
//! any other value, even a later date, gets the full body.
//!
//! The body is read completely before the response exists, so a response
//! never carries a partial body under a success status.

use crate::imaging::sniff_mime_type;
use chrono::{DateTime, TimeDelta, Utc};
use std::fs;
use std::io::{self, Read};
use std::path::Path;

/// Enough leading bytes for every image signature we recognize.
const SNIFF_LEN: u64 = 64;

/// RFC 7231 IMF-fixdate.
const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

pub fn http_date(time: DateTime<Utc>) -> String {
    time.format(HTTP_DATE).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    NotModified,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::NotModified => 304,
        }
    }
}

/// A complete response, ready for any transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Build the response for `path`.
///
/// `now` anchors the `Expires` header.
pub fn respond(
    path: &Path,
    cache_expire: u64,
    if_modified_since: Option<&str>,
    now: DateTime<Utc>,
) -> io::Result<Response> {
    let metadata = fs::metadata(path)?;
    let modified: DateTime<Utc> = metadata.modified()?.into();
    let last_modified = http_date(modified);

    // Lifetimes chrono cannot represent expire immediately
    let expires = i64::try_from(cache_expire)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(now);

    let mut headers = vec![
        ("Last-Modified", last_modified.clone()),
        ("Expires", http_date(expires)),
        ("Cache-Control", format!("max-age={}, public", cache_expire)),
    ];

    if if_modified_since == Some(last_modified.as_str()) {
        let mut head = Vec::new();
        fs::File::open(path)?.take(SNIFF_LEN).read_to_end(&mut head)?;
        headers.push(("Content-Type", sniff_mime_type(&head).to_string()));
        headers.push(("Content-Length", metadata.len().to_string()));
        return Ok(Response {
            status: Status::NotModified,
            headers,
            body: Vec::new(),
        });
    }

    let body = fs::read(path)?;
    headers.push(("Content-Type", sniff_mime_type(&body).to_string()));
    headers.push(("Content-Length", body.len().to_string()));
    Ok(Response {
        status: Status::Ok,
        headers,
        body,
    })
}
