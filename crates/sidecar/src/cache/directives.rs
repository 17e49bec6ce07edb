//! `X-Vault-Cache-Control` and `X-Vault-Token-Options` request directives.
//!
//! Each header may appear several times and each value is a comma-separated
//! list. Tokens are trimmed and matched case-insensitively; unknown tokens are
//! ignored.

use axum::http::{HeaderMap, Method};

pub const CACHE_CONTROL_HEADER: &str = "x-vault-cache-control";
pub const TOKEN_OPTIONS_HEADER: &str = "x-vault-token-options";

/// Serve from cache if present, otherwise forward and cache.
const CACHE: &str = "cache";
/// Forward and cache, ignoring any cached entry.
const RECACHE: &str = "recache";
/// Bypass the cache entirely.
const NOCACHE: &str = "nocache";
/// Revoke the sidecar's token and log in again before proxying.
const REVOKE: &str = "revoke";

/// Parsed cache-control directives of one request.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    pub cache: bool,
    pub recache: bool,
    pub nocache: bool,
}

impl CacheOptions {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut options = Self::default();
        for token in directive_tokens(headers, CACHE_CONTROL_HEADER) {
            if token.eq_ignore_ascii_case(CACHE) {
                options.cache = true;
            } else if token.eq_ignore_ascii_case(RECACHE) {
                options.recache = true;
            } else if token.eq_ignore_ascii_case(NOCACHE) {
                options.nocache = true;
            }
        }
        options
    }
}

/// May this request be answered from the cache?
pub fn shall_fetch_cache(method: &Method, options: CacheOptions, default_on: bool) -> bool {
    method == Method::GET && (default_on || options.cache) && !options.recache && !options.nocache
}

/// May this request's response be stored in the cache?
pub fn shall_refresh_cache(method: &Method, options: CacheOptions, default_on: bool) -> bool {
    method == Method::GET && (default_on || options.cache || options.recache) && !options.nocache
}

/// Does the request ask for the sidecar's token to be revoked?
pub fn wants_revoke(headers: &HeaderMap) -> bool {
    directive_tokens(headers, TOKEN_OPTIONS_HEADER).any(|t| t.eq_ignore_ascii_case(REVOKE))
}

fn directive_tokens<'a>(
    headers: &'a HeaderMap,
    name: &'static str,
) -> impl Iterator<Item = &'a str> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn with(values: &[&'static str]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for v in values {
            map.append(CACHE_CONTROL_HEADER, HeaderValue::from_static(v));
        }
        map
    }

    fn opts(cache: bool, recache: bool, nocache: bool) -> CacheOptions {
        CacheOptions {
            cache,
            recache,
            nocache,
        }
    }

    #[test]
    fn parses_directives() {
        assert_eq!(CacheOptions::from_headers(&HeaderMap::new()), CacheOptions::default());
        assert_eq!(CacheOptions::from_headers(&with(&["cache"])), opts(true, false, false));
        assert_eq!(
            CacheOptions::from_headers(&with(&["cache, recache"])),
            opts(true, true, false)
        );
        assert_eq!(
            CacheOptions::from_headers(&with(&["cache", " NoCache "])),
            opts(true, false, true)
        );
        assert_eq!(
            CacheOptions::from_headers(&with(&["max-age=5,,bogus"])),
            CacheOptions::default()
        );
    }

    #[test]
    fn fetch_decision_table() {
        let get = Method::GET;
        assert!(!shall_fetch_cache(&get, opts(false, false, false), false));
        assert!(shall_fetch_cache(&get, opts(true, false, false), false));
        assert!(shall_fetch_cache(&get, opts(false, false, false), true));
        assert!(!shall_fetch_cache(&get, opts(true, true, false), false));
        assert!(!shall_fetch_cache(&get, opts(true, false, true), false));
        assert!(!shall_fetch_cache(&get, opts(false, false, true), true));
        assert!(!shall_fetch_cache(&Method::POST, opts(true, false, false), true));
    }

    #[test]
    fn refresh_decision_table() {
        let get = Method::GET;
        assert!(!shall_refresh_cache(&get, opts(false, false, false), false));
        assert!(shall_refresh_cache(&get, opts(true, false, false), false));
        assert!(shall_refresh_cache(&get, opts(false, true, false), false));
        assert!(shall_refresh_cache(&get, opts(false, false, false), true));
        assert!(!shall_refresh_cache(&get, opts(true, true, true), true));
        assert!(!shall_refresh_cache(&Method::PUT, opts(false, true, false), true));
    }

    #[test]
    fn revoke_option() {
        let mut headers = HeaderMap::new();
        assert!(!wants_revoke(&headers));
        headers.insert(TOKEN_OPTIONS_HEADER, HeaderValue::from_static("foo, revoke"));
        assert!(wants_revoke(&headers));
        headers.insert(TOKEN_OPTIONS_HEADER, HeaderValue::from_static("revoked"));
        assert!(!wants_revoke(&headers));
    }
}
