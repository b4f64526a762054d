use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponseBuilder};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::error::CaptureError;

pub const EVENT_STREAM: &str = "text/event-stream";

/// Connection-scoped headers that must not cross the proxy.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// True when the response declares a server-sent-event body, whatever its
/// media-type parameters.
pub fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|media| media.trim().eq_ignore_ascii_case(EVENT_STREAM))
}

/// Convert a u16 status code to an actix StatusCode.
pub fn to_actix_status(status: u16) -> Result<StatusCode, CaptureError> {
    StatusCode::from_u16(status).map_err(|_| CaptureError::UpstreamStatus(status))
}

pub fn to_reqwest_method(method: &actix_web::http::Method) -> Result<reqwest::Method, CaptureError> {
    reqwest::Method::from_bytes(method.as_str().as_bytes())
        .map_err(|e| CaptureError::InvalidMethod(e.to_string()))
}

fn copy_request_headers(req: &HttpRequest, skip: impl Fn(&str) -> bool) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (key, value) in req.headers() {
        if skip(key.as_str()) {
            continue;
        }
        if let Ok(name) = HeaderName::from_bytes(key.as_ref()) {
            if let Ok(val) = HeaderValue::from_bytes(value.as_bytes()) {
                map.append(name, val);
            }
        }
    }
    map
}

/// Headers for the buffered reverse-proxy path: everything except `Host`,
/// `Content-Length` and hop-by-hop headers, plus the caller's address
/// appended to `X-Forwarded-For`.
pub fn reverse_proxy_headers(req: &HttpRequest) -> HeaderMap {
    let mut map = copy_request_headers(req, |name| {
        name.eq_ignore_ascii_case("host")
            || name.eq_ignore_ascii_case("content-length")
            || is_hop_by_hop(name)
    });

    if let Some(peer) = req.peer_addr() {
        let prior: Vec<&str> = req
            .headers()
            .get_all("x-forwarded-for")
            .filter_map(|v| v.to_str().ok())
            .collect();
        let forwarded = if prior.is_empty() {
            peer.ip().to_string()
        } else {
            format!("{}, {}", prior.join(", "), peer.ip())
        };
        if let Ok(val) = HeaderValue::from_str(&forwarded) {
            map.insert(HeaderName::from_static("x-forwarded-for"), val);
        }
    }
    map
}

/// Headers for the streaming path: the inbound headers verbatim, minus the
/// ones the HTTP client derives from the outgoing request itself.
pub fn passthrough_headers(req: &HttpRequest) -> HeaderMap {
    copy_request_headers(req, |name| {
        name.eq_ignore_ascii_case("host")
            || name.eq_ignore_ascii_case("content-length")
            || name.eq_ignore_ascii_case("transfer-encoding")
    })
}

/// Copy upstream response headers into an actix HttpResponseBuilder,
/// leaving framing headers to the server.
pub fn forward_response_headers(builder: &mut HttpResponseBuilder, upstream_headers: &HeaderMap) {
    for (key, value) in upstream_headers {
        let k = key.as_str();
        if k.eq_ignore_ascii_case("content-length") || is_hop_by_hop(k) {
            continue;
        }
        if let Ok(name) = actix_web::http::header::HeaderName::from_bytes(key.as_ref()) {
            if let Ok(val) = actix_web::http::header::HeaderValue::from_bytes(value.as_bytes()) {
                builder.append_header((name, val));
            }
        }
    }
}

fn parse_base_url(base_url: &str) -> Result<Url, CaptureError> {
    Url::parse(base_url).map_err(|source| CaptureError::InvalidUpstreamUrl {
        url: base_url.to_string(),
        source,
    })
}

/// Upstream path for a buffered request: an empty inbound path becomes
/// `default_path`, anything else is kept and placed under `api_root` unless
/// it already starts with it.
pub fn normalize_path(inbound_path: &str, default_path: &str, api_root: &str) -> String {
    let path = inbound_path.strip_prefix('/').unwrap_or(inbound_path);
    if path.is_empty() {
        return default_path.to_string();
    }
    let root = api_root.trim_matches('/');
    if root.is_empty() || path == root || path.starts_with(&format!("{}/", root)) {
        format!("/{}", path)
    } else {
        format!("/{}/{}", root, path)
    }
}

/// Buffered mode target: scheme and authority from the route's base URL,
/// normalized inbound path, no query string.
pub fn buffered_target_url(
    base_url: &str,
    inbound_path: &str,
    default_path: &str,
    api_root: &str,
) -> Result<String, CaptureError> {
    let mut url = parse_base_url(base_url)?;
    url.set_path(&normalize_path(inbound_path, default_path, api_root));
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.to_string())
}

/// Streaming mode target: the completion path appended to the route's base URL.
pub fn streaming_target_url(base_url: &str, completion_path: &str) -> Result<String, CaptureError> {
    parse_base_url(base_url)?;
    Ok(format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        completion_path.trim_start_matches('/')
    ))
}
