//! In-memory document served with gzip and conditional-request support
//!
//! Holds both the identity and gzip encodings of one payload. Re-encoding
//! identical bytes is a no-op, so the modification time and ETags only move
//! when the content really changes.

use std::io::{self, Read, Write};

use axum::body::{Body, Bytes};
use axum::http::header::{
    CONTENT_ENCODING, CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, VARY,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, NaiveDateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::RwLock;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::Result;

const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

#[derive(Debug, Clone)]
struct Encoded {
    hash: [u8; 32],
    identity: Bytes,
    gzip: Bytes,
    modified: DateTime<Utc>,
}

impl Encoded {
    fn etag(&self, gzip: bool) -> String {
        let prefix = hex::encode(&self.hash[..8]);
        if gzip {
            format!("\"{}-gzip\"", prefix)
        } else {
            format!("\"{}\"", prefix)
        }
    }
}

/// A named document kept in identity and gzip form
#[derive(Debug)]
pub struct CompressedFile {
    name: String,
    state: RwLock<Option<Encoded>>,
}

impl CompressedFile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replace the contents; returns false when the bytes are unchanged
    pub fn update(&self, data: Vec<u8>) -> io::Result<bool> {
        let hash: [u8; 32] = Sha256::digest(&data).into();

        if self
            .state
            .read()
            .as_ref()
            .is_some_and(|current| current.hash == hash)
        {
            return Ok(false);
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&data)?;
        let gzip = encoder.finish()?;

        let mut state = self.state.write();

        // another writer may have stored the same bytes meanwhile
        if state.as_ref().is_some_and(|current| current.hash == hash) {
            return Ok(false);
        }

        *state = Some(Encoded {
            hash,
            identity: Bytes::from(data),
            gzip: Bytes::from(gzip),
            modified: Utc::now(),
        });

        tracing::debug!("Re-encoded {}", self.name);
        Ok(true)
    }

    pub fn read_from<R: Read>(&self, mut reader: R) -> io::Result<bool> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        self.update(data)
    }

    /// Serialize `value` as JSON into the document
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<bool> {
        let data = serde_json::to_vec(value)?;
        Ok(self.update(data)?)
    }

    /// Time the contents last changed
    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.state.read().as_ref().map(|e| e.modified)
    }

    /// Strong ETag of one encoding
    pub fn etag(&self, gzip: bool) -> Option<String> {
        self.state.read().as_ref().map(|e| e.etag(gzip))
    }

    /// Identity encoding of the current contents
    pub fn identity(&self) -> Option<Bytes> {
        self.state.read().as_ref().map(|e| e.identity.clone())
    }

    /// Answer a GET for this document
    pub fn respond(&self, request: &HeaderMap) -> Response {
        let Some(encoded) = self.state.read().clone() else {
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        };

        let gzip = accepts_gzip(request);
        let etag = encoded.etag(gzip);

        let mut headers = HeaderMap::new();
        set_header(&mut headers, ETAG, &etag);
        set_header(
            &mut headers,
            LAST_MODIFIED,
            &encoded.modified.format(HTTP_DATE).to_string(),
        );
        headers.insert(VARY, HeaderValue::from_static("accept-encoding"));

        if not_modified(request, &etag, encoded.modified) {
            return (StatusCode::NOT_MODIFIED, headers).into_response();
        }

        set_header(&mut headers, CONTENT_TYPE, content_type_for(&self.name));

        let body = if gzip {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            encoded.gzip
        } else {
            encoded.identity
        };

        (StatusCode::OK, headers, Body::from(body)).into_response()
    }
}

fn set_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

/// Content type guessed from a file name's extension
pub fn content_type_for(name: &str) -> &'static str {
    let extension = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "json" => "application/json",
        "js" => "text/javascript; charset=utf-8",
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "md" | "txt" | "out" => "text/plain; charset=utf-8",
        "yml" | "yaml" => "application/yaml",
        _ => "application/octet-stream",
    }
}

/// True when `Accept-Encoding` allows gzip
///
/// An explicit `gzip` entry wins over `*`; a q-value of zero refuses.
pub fn accepts_gzip(request: &HeaderMap) -> bool {
    let mut gzip = None;
    let mut any = None;

    for value in request.get_all(axum::http::header::ACCEPT_ENCODING) {
        let Ok(value) = value.to_str() else { continue };

        for item in value.split(',') {
            let mut parts = item.split(';');
            let coding = parts.next().unwrap_or("").trim().to_ascii_lowercase();

            let q = parts
                .filter_map(|p| p.trim().strip_prefix("q="))
                .find_map(|q| q.trim().parse::<f32>().ok())
                .unwrap_or(1.0);

            match coding.as_str() {
                "gzip" | "x-gzip" => gzip = Some(q),
                "*" => any = Some(q),
                _ => {}
            }
        }
    }

    gzip.or(any).is_some_and(|q| q > 0.0)
}

/// `If-None-Match` takes precedence; `If-Modified-Since` compares seconds
fn not_modified(request: &HeaderMap, etag: &str, modified: DateTime<Utc>) -> bool {
    if let Some(value) = request.get(IF_NONE_MATCH) {
        let Ok(value) = value.to_str() else {
            return false;
        };

        return value.split(',').map(str::trim).any(|candidate| {
            candidate == "*" || candidate.strip_prefix("W/").unwrap_or(candidate) == etag
        });
    }

    let Some(since) = request
        .get(IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| NaiveDateTime::parse_from_str(v.trim(), HTTP_DATE).ok())
    else {
        return false;
    };

    modified.timestamp() <= since.and_utc().timestamp()
}
