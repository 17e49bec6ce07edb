//! Cache keys for proxied requests.
//!
//! # Canonical form
//!
//! ```text
//! <METHOD>\n<path?query>\n
//! <name>:<value>\n            one line per value, names sorted, values in order
//! \n<body length>\n<body bytes><token length>\n<token bytes>
//! ```
//!
//! The SHA-256 of that byte string, lowercase hex, is the fingerprint.

use axum::http::{HeaderMap, Method, Uri};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Headers that never change what Vault answers, or that carry the token
/// (which is hashed separately).
const IGNORED_HEADERS: [&str; 7] = [
    "x-vault-index",
    "x-vault-forward",
    "x-vault-inconsistent",
    "x-vault-cache-control",
    "x-vault-token",
    "traceparent",
    "tracestate",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FingerprintError {
    #[error("cannot fingerprint a request without a token")]
    InvalidInput,
}

/// Hash a request into its cache key.
///
/// # Errors
///
/// Returns [`FingerprintError::InvalidInput`] when `token` is empty.
pub fn compute_fingerprint(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: &[u8],
    token: &str,
) -> Result<String, FingerprintError> {
    if token.is_empty() {
        return Err(FingerprintError::InvalidInput);
    }

    let mut hasher = Sha256::new();
    hasher.update(method.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(uri.path_and_query().map_or("/", |pq| pq.as_str()).as_bytes());
    hasher.update(b"\n");

    let mut names: Vec<&str> = headers
        .keys()
        .map(|name| name.as_str())
        .filter(|name| !IGNORED_HEADERS.contains(name))
        .collect();
    names.sort_unstable();
    for name in names {
        for value in headers.get_all(name) {
            hasher.update(name.as_bytes());
            hasher.update(b":");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
    }

    hasher.update(format!("\n{}\n", body.len()).as_bytes());
    hasher.update(body);
    hasher.update(format!("{}\n", token.len()).as_bytes());
    hasher.update(token.as_bytes());

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(*k, HeaderValue::from_static(v));
        }
        map
    }

    fn fp(method: Method, u: &str, h: &HeaderMap, body: &[u8], token: &str) -> String {
        compute_fingerprint(&method, &uri(u), h, body, token).unwrap()
    }

    #[test]
    fn deterministic_and_hex() {
        let h = headers(&[("accept", "application/json")]);
        let a = fp(Method::GET, "/v1/secret/foo", &h, b"", "t");
        let b = fp(Method::GET, "/v1/secret/foo", &h, b"", "t");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn header_insertion_order_does_not_matter() {
        let a = headers(&[("a", "1"), ("b", "2")]);
        let b = headers(&[("b", "2"), ("a", "1")]);
        assert_eq!(
            fp(Method::GET, "/v1/x", &a, b"", "t"),
            fp(Method::GET, "/v1/x", &b, b"", "t")
        );
    }

    #[test]
    fn sensitive_to_every_input() {
        let h = headers(&[("accept", "application/json")]);
        let base = fp(Method::GET, "/v1/secret/foo?version=1", &h, b"body", "t");

        assert_ne!(base, fp(Method::POST, "/v1/secret/foo?version=1", &h, b"body", "t"));
        assert_ne!(base, fp(Method::GET, "/v1/secret/bar?version=1", &h, b"body", "t"));
        assert_ne!(base, fp(Method::GET, "/v1/secret/foo?version=2", &h, b"body", "t"));
        assert_ne!(base, fp(Method::GET, "/v1/secret/foo?version=1", &h, b"other", "t"));
        assert_ne!(base, fp(Method::GET, "/v1/secret/foo?version=1", &h, b"body", "t2"));

        let other = headers(&[("accept", "text/plain")]);
        assert_ne!(base, fp(Method::GET, "/v1/secret/foo?version=1", &other, b"body", "t"));
    }

    #[test]
    fn multi_value_order_matters() {
        let a = headers(&[("x", "1"), ("x", "2")]);
        let b = headers(&[("x", "2"), ("x", "1")]);
        assert_ne!(
            fp(Method::GET, "/v1/x", &a, b"", "t"),
            fp(Method::GET, "/v1/x", &b, b"", "t")
        );
    }

    #[test]
    fn body_and_token_boundary_is_unambiguous() {
        let h = HeaderMap::new();
        assert_ne!(
            fp(Method::GET, "/v1/x", &h, b"ab", "c"),
            fp(Method::GET, "/v1/x", &h, b"a", "bc")
        );
    }

    #[test]
    fn ignores_consistency_tracing_and_cache_control_headers() {
        let plain = headers(&[("accept", "application/json")]);
        let noisy = headers(&[
            ("accept", "application/json"),
            ("x-vault-index", "idx"),
            ("x-vault-forward", "active-node"),
            ("x-vault-inconsistent", "forward-active-node"),
            ("x-vault-cache-control", "recache"),
            ("x-vault-token", "caller-token"),
            ("traceparent", "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"),
            ("tracestate", "vendor=x"),
        ]);
        assert_eq!(
            fp(Method::GET, "/v1/x", &plain, b"", "t"),
            fp(Method::GET, "/v1/x", &noisy, b"", "t")
        );
    }

    #[test]
    fn empty_token_is_rejected() {
        let err = compute_fingerprint(&Method::GET, &uri("/v1/x"), &HeaderMap::new(), b"", "");
        assert_eq!(err, Err(FingerprintError::InvalidInput));
    }

    #[test]
    fn absolute_and_origin_form_hash_alike() {
        let h = HeaderMap::new();
        assert_eq!(
            fp(Method::GET, "http://127.0.0.1:8200/v1/x?a=1", &h, b"", "t"),
            fp(Method::GET, "/v1/x?a=1", &h, b"", "t")
        );
    }
}
