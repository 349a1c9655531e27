//! Request identity normalization
//!
//! An identity is the store key of a request: method plus URL, optionally
//! with the query string removed and optionally extended with the values of
//! content-negotiation headers. Requests that normalize to the same identity
//! resolve to the same stored entry.

use http::{HeaderMap, Method};
use url::Url;

/// How loosely a request is matched against stored entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchOptions {
    /// Drop the query string before matching
    pub ignore_search: bool,
    /// Ignore content-negotiation headers
    pub ignore_vary: bool,
}

impl MatchOptions {
    /// Exact matching (query and vary headers both count)
    pub fn exact() -> Self {
        Self::default()
    }

    /// Loosest primary matching, used for media
    pub fn loose() -> Self {
        MatchOptions {
            ignore_search: true,
            ignore_vary: true,
        }
    }
}

/// Normalized identity of a request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestIdentity {
    method: Method,
    url: Url,
    vary: Vec<(String, String)>,
}

impl RequestIdentity {
    /// Derive the identity of a request
    ///
    /// HEAD is folded into GET since only GET bodies are ever stored.
    /// Fragments never take part in matching.
    pub fn new(
        method: &Method,
        url: &Url,
        headers: &HeaderMap,
        options: MatchOptions,
        vary_headers: &[String],
    ) -> Self {
        let method = if method == Method::HEAD {
            Method::GET
        } else {
            method.clone()
        };

        let mut url = url.clone();
        url.set_fragment(None);
        if options.ignore_search {
            url.set_query(None);
        }

        let mut vary = Vec::new();
        if !options.ignore_vary {
            for name in vary_headers {
                let name = name.to_ascii_lowercase();
                if let Some(value) = headers.get(name.as_str()).and_then(|v| v.to_str().ok()) {
                    vary.push((name, value.trim().to_string()));
                }
            }
            vary.sort();
        }

        RequestIdentity { method, url, vary }
    }

    /// Identity of a plain GET for `url`, as used by the control channel
    pub fn for_url(url: &Url, options: MatchOptions) -> Self {
        Self::new(&Method::GET, url, &HeaderMap::new(), options, &[])
    }

    /// The store key
    pub fn key(&self) -> String {
        let mut key = format!("{} {}", self.method, self.url);
        for (name, value) in &self.vary {
            key.push_str(&format!(" {}={}", name, value));
        }
        key
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// Extract the URL path from a stored key
///
/// Keys look like `"GET https://host/path?query extra..."`; anything that
/// does not parse yields `None`.
pub fn path_of_key(key: &str) -> Option<String> {
    let url = key.split(' ').nth(1)?;
    Url::parse(url).ok().map(|u| u.path().to_string())
}
