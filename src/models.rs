//! Core data models for the offline relay

use crate::error::{RelayError, Result};
use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use url::Url;

/// A parsed client byte range, `bytes=start-` or `bytes=start-end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RangeSpec {
    /// Starting byte position (inclusive)
    pub start: u64,
    /// Ending byte position (inclusive); `None` means "to the end"
    pub end: Option<u64>,
}

impl RangeSpec {
    /// Create a new RangeSpec
    pub fn new(start: u64, end: Option<u64>) -> Self {
        RangeSpec { start, end }
    }

    /// Parse a RangeSpec from an HTTP Range header value
    ///
    /// Accepts `bytes=N-M` and `bytes=N-`. When several ranges are listed only
    /// the first is used. Suffix ranges (`bytes=-N`) and other units are
    /// rejected with a parse error.
    pub fn from_header(header: &str) -> Result<Self> {
        let header = header.trim();

        let spec = header
            .get(..6)
            .filter(|unit| unit.eq_ignore_ascii_case("bytes="))
            .map(|_| &header[6..])
            .ok_or_else(|| {
                RelayError::ParseError(format!(
                    "Range header must start with 'bytes=', got: {}",
                    header
                ))
            })?;

        let first = spec.split(',').next().unwrap_or_default().trim();
        let (start, end) = first.split_once('-').ok_or_else(|| {
            RelayError::ParseError(format!(
                "Invalid range format, expected 'start-end', got: {}",
                first
            ))
        })?;

        let start = start
            .trim()
            .parse::<u64>()
            .map_err(|e| RelayError::ParseError(format!("Invalid start value: {}", e)))?;

        let end = match end.trim() {
            "" => None,
            value => Some(
                value
                    .parse::<u64>()
                    .map_err(|e| RelayError::ParseError(format!("Invalid end value: {}", e)))?,
            ),
        };

        Ok(RangeSpec { start, end })
    }

    /// Resolve against a body of `total` bytes
    ///
    /// # Returns
    /// * `Ok(ByteRange)` when `start <= end < total`
    /// * `Err(RelayError::RangeNotSatisfiable)` otherwise
    pub fn resolve(&self, total: u64) -> Result<ByteRange> {
        let end = self.end.unwrap_or_else(|| total.saturating_sub(1));

        if total == 0 || self.start >= total || end >= total || self.start > end {
            return Err(RelayError::RangeNotSatisfiable {
                range: self.to_header(),
                total,
            });
        }

        Ok(ByteRange {
            start: self.start,
            end,
        })
    }

    /// Convert this RangeSpec back to an HTTP Range header value
    pub fn to_header(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end),
            None => format!("bytes={}-", self.start),
        }
    }
}

/// A resolved, satisfiable byte range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    /// Starting byte position (inclusive)
    pub start: u64,
    /// Ending byte position (inclusive)
    pub end: u64,
}

impl ByteRange {
    /// Get the size of this byte range in bytes
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Render the `Content-Range` value for a body of `total` bytes
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

/// Connection-level headers that never belong in a stored response
const HOP_BY_HOP: [&str; 5] = [
    "connection",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
    "proxy-connection",
];

/// A stored response, owned by one namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Normalized identity key
    pub key: String,
    /// Full URL the entry was fetched from
    pub url: String,
    /// Response payload
    pub body: Bytes,
    pub content_type: Option<String>,
    pub status: u16,
    /// Response headers as (name, value) pairs
    pub headers: Vec<(String, String)>,
    /// Insertion time in milliseconds since the Unix epoch
    pub stored_at_ms: u64,
    /// Caller-supplied metadata as JSON text (control channel caching)
    #[serde(default)]
    pub metadata_json: Option<String>,
}

impl CacheEntry {
    /// Build an entry from response parts
    pub fn new(
        key: impl Into<String>,
        url: impl Into<String>,
        status: u16,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Self {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let headers = headers
            .iter()
            .filter(|(name, _)| !HOP_BY_HOP.contains(&name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        CacheEntry {
            key: key.into(),
            url: url.into(),
            body,
            content_type,
            status,
            headers,
            stored_at_ms: now_millis(),
            metadata_json: None,
        }
    }

    /// Attach caller metadata
    pub fn with_metadata(mut self, metadata: Option<&serde_json::Value>) -> Self {
        self.metadata_json = metadata.map(|m| m.to_string());
        self
    }

    /// Caller metadata, if any was attached and still parses
    pub fn metadata(&self) -> Option<serde_json::Value> {
        self.metadata_json
            .as_deref()
            .and_then(|m| serde_json::from_str(m).ok())
    }

    /// Payload length in bytes
    pub fn len(&self) -> u64 {
        self.body.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Rebuild the stored header set, skipping anything no longer valid
    pub fn header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                map.append(name, value);
            }
        }
        map
    }

    /// Replay the stored response as-is
    pub fn to_response(&self) -> InterceptResponse {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        InterceptResponse {
            status,
            headers: self.header_map(),
            body: self.body.clone(),
        }
    }
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// An intercepted request descriptor
#[derive(Debug, Clone)]
pub struct InterceptRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
}

impl InterceptRequest {
    /// Create a request with no headers
    pub fn new(method: Method, url: Url) -> Self {
        InterceptRequest {
            method,
            url,
            headers: HeaderMap::new(),
        }
    }

    /// Parse the URL and create a GET request
    pub fn get(url: &str) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| RelayError::InvalidRequest(format!("invalid url '{}': {}", url, e)))?;
        Ok(Self::new(Method::GET, url))
    }

    /// Add a header, ignoring values that are not valid header text
    pub fn with_header(mut self, name: HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    /// The raw Range header value, if present
    pub fn range_header(&self) -> Option<&str> {
        self.headers
            .get(header::RANGE)
            .and_then(|v| v.to_str().ok())
    }

    pub fn is_head(&self) -> bool {
        self.method == Method::HEAD
    }
}

/// A response descriptor handed back to the caller
#[derive(Debug, Clone)]
pub struct InterceptResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InterceptResponse {
    /// Empty response with the given status
    pub fn new(status: StatusCode) -> Self {
        InterceptResponse {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Set a header from a static value
    pub fn with_header(mut self, name: HeaderName, value: &'static str) -> Self {
        self.headers.insert(name, HeaderValue::from_static(value));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// JSON body with permissive CORS, as used by the offline payloads
    pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
        InterceptResponse::new(status)
            .with_header(header::CONTENT_TYPE, "application/json")
            .with_header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
            .with_body(value.to_string())
    }

    /// Drop the body, for HEAD requests
    pub fn without_body(mut self) -> Self {
        self.body = Bytes::new();
        self
    }

    /// Header value as text
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_from_header() {
        let range = RangeSpec::from_header("bytes=0-1023").unwrap();
        assert_eq!(range, RangeSpec::new(0, Some(1023)));

        let open = RangeSpec::from_header("bytes=500-").unwrap();
        assert_eq!(open, RangeSpec::new(500, None));

        let multi = RangeSpec::from_header("bytes=10-20, 30-40").unwrap();
        assert_eq!(multi, RangeSpec::new(10, Some(20)));
    }

    #[test]
    fn test_range_from_header_invalid() {
        assert!(RangeSpec::from_header("items=0-10").is_err());
        assert!(RangeSpec::from_header("bytes=-500").is_err());
        assert!(RangeSpec::from_header("bytes=abc-10").is_err());
        assert!(RangeSpec::from_header("bytes=10").is_err());
        assert!(RangeSpec::from_header("").is_err());
    }

    #[test]
    fn test_range_resolve() {
        let range = RangeSpec::new(0, Some(99)).resolve(1000).unwrap();
        assert_eq!(range.size(), 100);
        assert_eq!(range.content_range(1000), "bytes 0-99/1000");

        let open = RangeSpec::new(900, None).resolve(1000).unwrap();
        assert_eq!(open.end, 999);
    }

    #[test]
    fn test_range_resolve_unsatisfiable() {
        assert!(RangeSpec::new(1000, None).resolve(1000).is_err());
        assert!(RangeSpec::new(0, Some(1000)).resolve(1000).is_err());
        assert!(RangeSpec::new(50, Some(10)).resolve(1000).is_err());
        assert!(RangeSpec::new(0, None).resolve(0).is_err());
    }

    #[test]
    fn test_cache_entry_headers_round_trip() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("audio/mpeg"));
        headers.insert(header::ETAG, HeaderValue::from_static("\"abc\""));

        let entry = CacheEntry::new(
            "GET https://a/x.mp3",
            "https://a/x.mp3",
            200,
            &headers,
            Bytes::from_static(b"abc"),
        );
        assert_eq!(entry.content_type.as_deref(), Some("audio/mpeg"));
        assert_eq!(entry.len(), 3);

        let response = entry.to_response();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.header("etag"), Some("\"abc\""));
        assert_eq!(response.body, Bytes::from_static(b"abc"));
    }

    #[test]
    fn test_intercept_request_range_header() {
        let request = InterceptRequest::get("https://cdn.example.com/a.mp3")
            .unwrap()
            .with_header(header::RANGE, "bytes=0-99");
        assert_eq!(request.range_header(), Some("bytes=0-99"));
        assert!(InterceptRequest::get("not a url").is_err());
    }
}
