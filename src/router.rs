//! Request classification
//!
//! Every intercepted request is assigned exactly one [`ContentClass`], which
//! selects the fetch strategy that handles it.

use crate::config::{RouteRule, RoutingConfig};
use crate::models::InterceptRequest;
use http::Method;
use std::fmt;
use tracing::debug;

/// The kind of traffic a request belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentClass {
    Media,
    Image,
    ApiData,
    Static,
    /// Not intercepted; the caller forwards the request itself
    Bypass,
}

impl ContentClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentClass::Media => "media",
            ContentClass::Image => "image",
            ContentClass::ApiData => "api",
            ContentClass::Static => "static",
            ContentClass::Bypass => "bypass",
        }
    }
}

impl fmt::Display for ContentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies requests by method, scheme, host and path
pub struct RequestRouter {
    rules: RoutingConfig,
}

impl RequestRouter {
    pub fn new(rules: RoutingConfig) -> Self {
        RequestRouter { rules }
    }

    /// Classify a request
    ///
    /// # Logic
    /// 1. Methods other than GET/HEAD and non-http(s) schemes bypass
    /// 2. Hosts containing a bypass entry bypass
    /// 3. Media rule, then image rule, then API hosts
    /// 4. Everything else is static
    pub fn classify(&self, request: &InterceptRequest) -> ContentClass {
        let url = &request.url;

        if request.method != Method::GET && request.method != Method::HEAD {
            debug!("Bypass: method={} url={}", request.method, url);
            return ContentClass::Bypass;
        }

        if !matches!(url.scheme(), "http" | "https") {
            debug!("Bypass: scheme={} url={}", url.scheme(), url);
            return ContentClass::Bypass;
        }

        let host = url.host_str().unwrap_or("").to_ascii_lowercase();
        let path = url.path();

        let class = if host_matches(&host, &self.rules.bypass_hosts) {
            ContentClass::Bypass
        } else if rule_matches(&self.rules.media, &host, path) {
            ContentClass::Media
        } else if rule_matches(&self.rules.image, &host, path) {
            ContentClass::Image
        } else if host_matches(&host, &self.rules.api_hosts) {
            ContentClass::ApiData
        } else {
            ContentClass::Static
        };

        debug!("Classified url={} as {}", url, class);
        class
    }
}

fn host_matches(host: &str, patterns: &[String]) -> bool {
    patterns
        .iter()
        .any(|p| !p.is_empty() && host.contains(&p.to_ascii_lowercase()))
}

/// Host substring AND (path segment OR case-insensitive path suffix)
fn rule_matches(rule: &RouteRule, host: &str, path: &str) -> bool {
    if !host_matches(host, &rule.hosts) {
        return false;
    }

    let lower_path = path.to_ascii_lowercase();
    rule.path_segments.iter().any(|s| path.contains(s.as_str()))
        || rule
            .path_suffixes
            .iter()
            .any(|s| lower_path.ends_with(&s.to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn classify(method: Method, url: &str) -> ContentClass {
        let router = RequestRouter::new(RoutingConfig::default());
        router.classify(&InterceptRequest::new(method, Url::parse(url).unwrap()))
    }

    #[test]
    fn test_media_by_segment_and_suffix() {
        assert_eq!(
            classify(Method::GET, "https://x.supabase.co/storage/v1/object/public/audio/a"),
            ContentClass::Media
        );
        assert_eq!(
            classify(Method::GET, "https://x.supabase.co/files/track.MP3"),
            ContentClass::Media
        );
        assert_eq!(
            classify(Method::HEAD, "https://x.supabase.co/files/track.wav?t=1"),
            ContentClass::Media
        );
    }

    #[test]
    fn test_image_and_api() {
        assert_eq!(
            classify(Method::GET, "https://x.supabase.co/albumphoto/1"),
            ContentClass::Image
        );
        assert_eq!(
            classify(Method::GET, "https://x.supabase.co/files/cover.webp"),
            ContentClass::Image
        );
        assert_eq!(
            classify(Method::GET, "https://x.supabase.co/rest/v1/songs"),
            ContentClass::ApiData
        );
    }

    #[test]
    fn test_media_suffix_on_other_host_is_static() {
        assert_eq!(classify(Method::GET, "https://cdn.example.com/a.mp3"), ContentClass::Static);
        assert_eq!(classify(Method::GET, "https://example.com/"), ContentClass::Static);
    }

    #[test]
    fn test_bypass() {
        assert_eq!(classify(Method::POST, "https://x.supabase.co/audio/a"), ContentClass::Bypass);
        assert_eq!(classify(Method::GET, "ftp://example.com/a.mp3"), ContentClass::Bypass);
        assert_eq!(
            classify(Method::GET, "https://app.firebaseio.com/audio/a.mp3"),
            ContentClass::Bypass
        );
    }
}
