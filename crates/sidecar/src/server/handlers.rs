//! The reverse proxy handler.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode, Version},
    response::{IntoResponse, Response},
    Json,
};
use common::protocol::ErrorResponse;
use common::ProxyError;
use http_body_util::{BodyExt, LengthLimitError};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::middleware::MAX_BODY_BYTES;
use super::state::AppState;
use crate::cache::{
    compute_fingerprint, shall_fetch_cache, shall_refresh_cache, wants_revoke, CacheOptions,
    CachedResponse,
};
use crate::vault::TOKEN_HEADER;

/// Connection-scoped headers that must not be forwarded in either direction.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Fallback handler: forward any request to Vault with the sidecar's token,
/// serving and populating the response cache where the request allows it.
pub async fn proxy(State(state): State<AppState>, req: Request) -> Response {
    let span = info_span!(
        "proxy",
        request_id = %Uuid::new_v4(),
        method = %req.method(),
        path = %req.uri().path(),
    );
    let deadline = state.request_timeout;
    let result = match tokio::time::timeout(deadline, forward(&state, req))
        .instrument(span.clone())
        .await
    {
        Ok(result) => result,
        Err(_) => Err(ProxyError::Timeout(deadline)),
    };
    match result {
        Ok(resp) => resp,
        Err(e) => {
            span.in_scope(|| warn!(error = %e, "proxy request failed"));
            error_response(&e)
        }
    }
}

async fn forward(state: &AppState, req: Request) -> Result<Response, ProxyError> {
    let (mut parts, body) = req.into_parts();

    if wants_revoke(&parts.headers) {
        info!("revoking Vault token at caller's request");
        state.tokens.revoke().await;
    }

    let token = state
        .tokens
        .token()
        .await
        .map_err(|e| ProxyError::TokenUnavailable(e.to_string()))?;

    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(body_error)?;

    // Let the upstream client negotiate its own encoding and host.
    parts.headers.remove(header::ACCEPT_ENCODING);
    parts.headers.remove(header::HOST);
    strip_hop_by_hop(&mut parts.headers);
    let token_value =
        HeaderValue::from_str(&token).map_err(|e| ProxyError::BadRequest(e.to_string()))?;
    parts.headers.insert(TOKEN_HEADER, token_value);

    let cache = state.cache.as_deref();
    let options = CacheOptions::from_headers(&parts.headers);
    let (do_get, do_set) = match cache {
        Some(c) => (
            shall_fetch_cache(&parts.method, options, c.default_on()),
            shall_refresh_cache(&parts.method, options, c.default_on()),
        ),
        None => (false, false),
    };

    // Held until this function returns, after any cache write, so identical
    // concurrent requests wait for the first one's response.
    let mut _stripe = None;
    let mut cache_key = None;
    if let Some(cache) = cache.filter(|_| do_get || do_set) {
        let key = compute_fingerprint(&parts.method, &parts.uri, &parts.headers, &body, &token)
            .map_err(|e| ProxyError::Internal(e.to_string()))?;
        _stripe = Some(cache.lock_for(&key).lock().await);
        cache_key = Some((cache, key));
    }

    if do_get {
        if let Some(hit) = cache_key.as_ref().and_then(|(cache, key)| cache.get(key)) {
            debug!("cache hit");
            return Ok(cached_response(hit));
        }
    }

    parts.uri = state
        .vault
        .upstream_uri(parts.uri.path_and_query())
        .map_err(|e| ProxyError::BadRequest(e.to_string()))?;
    parts
        .headers
        .insert(header::USER_AGENT, state.vault.proxy_user_agent().clone());
    parts.version = Version::HTTP_11;
    let upstream = Request::from_parts(parts, Body::from(body));

    let resp = state
        .vault
        .send(upstream)
        .await
        .map_err(|e| ProxyError::Upstream(e.to_string()))?;
    let (mut resp_parts, resp_body) = resp.into_parts();
    let resp_body = resp_body
        .collect()
        .await
        .map_err(|e| ProxyError::Internal(format!("failed to read response body: {e}")))?
        .to_bytes();
    strip_hop_by_hop(&mut resp_parts.headers);

    if do_set && resp_parts.status.as_u16() < 300 {
        if let Some((cache, key)) = &cache_key {
            cache.set(
                key,
                CachedResponse {
                    status: resp_parts.status,
                    headers: resp_parts.headers.clone(),
                    body: resp_body.clone(),
                },
            );
            debug!("refreshed cache");
        }
    }

    info!(status = %resp_parts.status, "proxied request");
    Ok(Response::from_parts(resp_parts, Body::from(resp_body)))
}

fn cached_response(hit: CachedResponse) -> Response {
    let mut resp = Response::new(Body::from(hit.body));
    *resp.status_mut() = hit.status;
    *resp.headers_mut() = hit.headers;
    resp
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named by `Connection` are connection-scoped too.
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in &named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn body_error(err: axum::Error) -> ProxyError {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(&err);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return ProxyError::PayloadTooLarge(MAX_BODY_BYTES);
        }
        source = e.source();
    }
    ProxyError::BadRequest(format!("failed to read request body: {err}"))
}

fn error_response(err: &ProxyError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorResponse::new(err.to_string()))).into_response()
}
