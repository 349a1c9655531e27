//! Byte-range slicing of cached entries
//!
//! The slicer turns a complete stored entry into either a `206 Partial
//! Content` response for the requested range or a `416 Range Not
//! Satisfiable` response carrying the total length. It never touches the
//! store.

use crate::models::{CacheEntry, InterceptResponse, RangeSpec};
use http::{header, HeaderValue, StatusCode};
use tracing::debug;

/// Content type assumed for stored media without one
const DEFAULT_MEDIA_TYPE: &str = "audio/mpeg";

/// Builds partial and full media responses from stored entries
pub struct RangeSlicer;

impl RangeSlicer {
    /// Slice `entry` by `range`
    ///
    /// # Returns
    /// * 206 with `Content-Range: bytes start-end/total` when the range resolves
    /// * 416 with `Content-Range: bytes */total` and an empty body otherwise
    pub fn slice(entry: &CacheEntry, range: &RangeSpec) -> InterceptResponse {
        let total = entry.len();

        let resolved = match range.resolve(total) {
            Ok(resolved) => resolved,
            Err(e) => {
                debug!("Unsatisfiable range for key={}: {}", entry.key, e);
                return Self::not_satisfiable(total);
            }
        };

        let body = entry
            .body
            .slice(resolved.start as usize..=resolved.end as usize);

        debug!(
            "Serving slice: key={}, range={}-{}, total={}",
            entry.key, resolved.start, resolved.end, total
        );

        let mut response = InterceptResponse::new(StatusCode::PARTIAL_CONTENT).with_body(body);
        Self::set_content_type(&mut response, entry);
        set_value(&mut response, header::CONTENT_LENGTH, &resolved.size().to_string());
        set_value(&mut response, header::CONTENT_RANGE, &resolved.content_range(total));
        Self::set_media_headers(&mut response);
        response
    }

    /// The 416 response for a body of `total` bytes
    pub fn not_satisfiable(total: u64) -> InterceptResponse {
        let mut response = InterceptResponse::new(StatusCode::RANGE_NOT_SATISFIABLE);
        set_value(&mut response, header::CONTENT_RANGE, &format!("bytes */{}", total));
        response
    }

    /// The complete entry as a 200, declaring range support and open CORS
    pub fn full(entry: &CacheEntry) -> InterceptResponse {
        let mut response = entry.to_response();
        response.status = StatusCode::OK;
        set_value(&mut response, header::CONTENT_LENGTH, &entry.len().to_string());
        response
            .headers
            .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        response
            .headers
            .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        response
    }

    fn set_content_type(response: &mut InterceptResponse, entry: &CacheEntry) {
        let content_type = entry.content_type.as_deref().unwrap_or(DEFAULT_MEDIA_TYPE);
        set_value(response, header::CONTENT_TYPE, content_type);
    }

    fn set_media_headers(response: &mut InterceptResponse) {
        let headers = &mut response.headers;
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, HEAD, OPTIONS"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Range"),
        );
    }
}

fn set_value(response: &mut InterceptResponse, name: header::HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        response.headers.insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::HeaderMap;

    fn entry(len: usize) -> CacheEntry {
        let body: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        CacheEntry::new(
            "GET https://h/a.mp3",
            "https://h/a.mp3",
            200,
            &HeaderMap::new(),
            Bytes::from(body),
        )
    }

    #[test]
    fn test_slice_bounded() {
        let entry = entry(1000);
        let response = RangeSlicer::slice(&entry, &RangeSpec::new(0, Some(99)));

        assert_eq!(response.status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.body.len(), 100);
        assert_eq!(response.header("content-range"), Some("bytes 0-99/1000"));
        assert_eq!(response.header("content-length"), Some("100"));
        assert_eq!(response.header("accept-ranges"), Some("bytes"));
        assert_eq!(response.header("content-type"), Some("audio/mpeg"));
        assert_eq!(&response.body[..], &entry.body[..100]);
    }

    #[test]
    fn test_slice_open_ended() {
        let entry = entry(1000);
        let response = RangeSlicer::slice(&entry, &RangeSpec::new(990, None));

        assert_eq!(response.status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.body.len(), 10);
        assert_eq!(response.header("content-range"), Some("bytes 990-999/1000"));
    }

    #[test]
    fn test_slice_unsatisfiable() {
        let entry = entry(1000);
        for range in [
            RangeSpec::new(1000, None),
            RangeSpec::new(0, Some(1000)),
            RangeSpec::new(500, Some(100)),
        ] {
            let response = RangeSlicer::slice(&entry, &range);
            assert_eq!(response.status, StatusCode::RANGE_NOT_SATISFIABLE);
            assert!(response.body.is_empty());
            assert_eq!(response.header("content-range"), Some("bytes */1000"));
        }
    }

    #[test]
    fn test_full_declares_range_support() {
        let entry = entry(64);
        let response = RangeSlicer::full(&entry);

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, entry.body);
        assert_eq!(response.header("accept-ranges"), Some("bytes"));
        assert_eq!(response.header("access-control-allow-origin"), Some("*"));
        assert_eq!(response.header("content-length"), Some("64"));
    }

    #[test]
    fn test_slice_keeps_stored_content_type() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("audio/mp4"));
        let body = Bytes::from(vec![0u8; 10]);
        let entry = CacheEntry::new("k", "https://h/a.m4a", 200, &headers, body);

        let response = RangeSlicer::slice(&entry, &RangeSpec::new(2, Some(3)));
        assert_eq!(response.header("content-type"), Some("audio/mp4"));
    }
}
