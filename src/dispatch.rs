//! Request dispatch: pick the range specifier out of an inbound request and
//! hand it to the [`Ranged`] responder.
//!
//! Only `GET` is served. The specifier is the first non-empty value of, in
//! order:
//!
//! 1. the `Range` header,
//! 2. the `X-Dolt-Range` header,
//! 3. the `Range` query parameter, then the `range` query parameter.
//!
//! Header names are case-insensitive on the wire so each header is a single
//! lookup. Query parameter names are not normalized, so both spellings are
//! checked literally.

use std::fmt;

use axum::extract::{Query, State};
use axum::http::header::{RANGE, STRICT_TRANSPORT_SECURITY};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;

use crate::{ContentStore, Ranged};

/// Alternate header carrying the same specifier as `Range`.
pub const X_DOLT_RANGE: HeaderName = HeaderName::from_static("x-dolt-range");

const HSTS: &str = "max-age=63072000; includeSubDomains";

/// The channel a range specifier travelled through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Standard `Range` header.
    Header,
    /// `X-Dolt-Range` header.
    AltHeader,
    /// `Range` or `range` query parameter.
    Query,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Header, Channel::AltHeader, Channel::Query];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Header => "header: 'range'",
            Channel::AltHeader => "header: 'x-dolt-range'",
            Channel::Query => "query param: 'range'",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query parameters that may carry a specifier. Other parameters are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeParams {
    /// First value of `Range`.
    pub upper: Option<String>,
    /// First value of `range`.
    pub lower: Option<String>,
}

impl RangeParams {
    /// Pick the first `Range` and the first `range` out of decoded query
    /// pairs. Repeated keys are not an error.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut params = RangeParams::default();
        for (key, value) in pairs {
            let slot = match key.as_str() {
                "Range" => &mut params.upper,
                "range" => &mut params.lower,
                _ => continue,
            };
            slot.get_or_insert(value);
        }
        params
    }
}

/// Per-listener settings shared by every request on it.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchState {
    /// Add `Strict-Transport-Security` to every response.
    pub secure: bool,
    /// Log response bodies as base64.
    pub verbose: bool,
}

/// Find the first non-empty specifier, in channel priority order.
pub fn extract_specifier(headers: &HeaderMap, params: &RangeParams) -> Option<(Channel, String)> {
    let header = |name: &HeaderName| {
        headers.get(name)
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
            .filter(|value| !value.is_empty())
    };

    if let Some(spec) = header(&RANGE) {
        return Some((Channel::Header, spec));
    }
    if let Some(spec) = header(&X_DOLT_RANGE) {
        return Some((Channel::AltHeader, spec));
    }

    [&params.upper, &params.lower]
        .into_iter()
        .flatten()
        .find(|value| !value.is_empty())
        .map(|spec| (Channel::Query, spec.clone()))
}

/// Serve the canonical document, honouring whichever range channel is present.
///
/// A fresh [`ContentStore`] backs every request.
pub async fn serve_contents(
    State(state): State<DispatchState>,
    method: Method,
    headers: HeaderMap,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Response {
    let params = RangeParams::from_pairs(pairs);
    let mut response = respond(method, &headers, &params, ContentStore::canonical(), state.verbose);
    if state.secure {
        response.headers_mut().insert(STRICT_TRANSPORT_SECURITY, HeaderValue::from_static(HSTS));
    }
    response
}

fn respond(
    method: Method,
    headers: &HeaderMap,
    params: &RangeParams,
    store: ContentStore,
    verbose: bool,
) -> Response {
    if method != Method::GET {
        tracing::info!(%method, "received unsupported request method");
        return (StatusCode::BAD_REQUEST, "only GET requests supported.").into_response();
    }

    tracing::info!("received request");
    let specifier = match extract_specifier(headers, params) {
        Some((channel, spec)) => {
            tracing::info!(%channel, %spec, "range specifier");
            Some(spec)
        }
        None => None,
    };

    Ranged::new(specifier, store).verbose(verbose).into_response()
}

/// Router serving every path through [`serve_contents`].
pub fn router(state: DispatchState) -> Router {
    Router::new()
        .fallback(serve_contents)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use futures::StreamExt;
    use tower::ServiceExt;

    use super::*;
    use crate::CANONICAL_CONTENT;

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let mut body = Vec::new();
        let mut stream = response.into_body().into_data_stream();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk.unwrap());
        }
        (status, headers, body)
    }

    fn get(uri: &str) -> axum::http::request::Builder {
        Request::builder().method(Method::GET).uri(uri)
    }

    fn params(upper: Option<&str>, lower: Option<&str>) -> RangeParams {
        RangeParams {
            upper: upper.map(str::to_string),
            lower: lower.map(str::to_string),
        }
    }

    #[test]
    fn test_extract_priority() {
        let mut headers = HeaderMap::new();
        let q = params(Some("bytes=3-4"), Some("bytes=5-6"));
        assert_eq!(Some((Channel::Query, "bytes=3-4".to_string())), extract_specifier(&headers, &q));

        headers.insert(X_DOLT_RANGE, HeaderValue::from_static("bytes=1-2"));
        assert_eq!(Some((Channel::AltHeader, "bytes=1-2".to_string())), extract_specifier(&headers, &q));

        headers.insert(RANGE, HeaderValue::from_static("bytes=0-0"));
        assert_eq!(Some((Channel::Header, "bytes=0-0".to_string())), extract_specifier(&headers, &q));
    }

    #[test]
    fn test_extract_skips_empty_values() {
        let mut headers = HeaderMap::new();
        headers.insert(RANGE, HeaderValue::from_static(""));
        let q = params(Some(""), Some("bytes=5-6"));
        assert_eq!(Some((Channel::Query, "bytes=5-6".to_string())), extract_specifier(&headers, &q));
        assert_eq!(None, extract_specifier(&HeaderMap::new(), &RangeParams::default()));
    }

    #[test]
    fn test_params_take_first_value() {
        let pairs = [
            ("other", "1"),
            ("range", "bytes=0-9"),
            ("Range", "bytes=1-2"),
            ("range", "bytes=5-6"),
            ("Range", "bytes=3-4"),
            ("RANGE", "bytes=7-8"),
        ];
        let parsed = RangeParams::from_pairs(pairs.map(|(k, v)| (k.to_string(), v.to_string())));
        assert_eq!(params(Some("bytes=1-2"), Some("bytes=0-9")), parsed);
    }

    #[test]
    fn test_header_lookup_ignores_case() {
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("x-dolt-range"), HeaderValue::from_static("bytes=-80"));
        let found = extract_specifier(&headers, &RangeParams::default());
        assert_eq!(Some((Channel::AltHeader, "bytes=-80".to_string())), found);
    }

    #[tokio::test]
    async fn test_channels_are_equivalent() {
        let app = router(DispatchState::default());
        let requests = [
            get("/").header("Range", "bytes=2500-2599").body(Body::empty()).unwrap(),
            get("/").header("X-Dolt-Range", "bytes=2500-2599").body(Body::empty()).unwrap(),
            get("/?range=bytes%3D2500%2D2599").body(Body::empty()).unwrap(),
            get("/?Range=bytes%3D2500%2D2599").body(Body::empty()).unwrap(),
        ];

        let mut bodies = Vec::new();
        for request in requests {
            let (status, headers, body) = send(app.clone(), request).await;
            assert_eq!(StatusCode::PARTIAL_CONTENT, status);
            assert_eq!("bytes 2500-2599/4000", headers["content-range"]);
            assert_eq!(100, body.len());
            bodies.push(body);
        }
        assert!(bodies.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(&CANONICAL_CONTENT.as_bytes()[2500..2600], &bodies[0][..]);
    }

    #[tokio::test]
    async fn test_repeated_query_key_uses_first() {
        let app = router(DispatchState { secure: true, verbose: false });
        let request = get("/?range=bytes%3D0%2D9&range=bytes%3D5%2D6").body(Body::empty()).unwrap();
        let (status, headers, body) = send(app.clone(), request).await;
        assert_eq!(StatusCode::PARTIAL_CONTENT, status);
        assert_eq!("bytes 0-9/4000", headers["content-range"]);
        assert_eq!(HSTS, headers["strict-transport-security"]);
        assert_eq!(&CANONICAL_CONTENT.as_bytes()[..10], &body[..]);

        let request = get("/?range=bytes%3D0%2D9&Range=bytes%3D5%2D6&Range=bytes%3D0%2D0")
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = send(app, request).await;
        assert_eq!(StatusCode::PARTIAL_CONTENT, status);
        assert_eq!("bytes 5-6/4000", headers["content-range"]);
    }

    #[tokio::test]
    async fn test_query_name_is_case_sensitive() {
        let app = router(DispatchState::default());
        let request = get("/?RANGE=bytes%3D0%2D9").body(Body::empty()).unwrap();
        let (status, headers, body) = send(app, request).await;
        assert_eq!(StatusCode::OK, status);
        assert!(headers.get("content-range").is_none());
        assert_eq!(4000, body.len());
    }

    #[tokio::test]
    async fn test_no_range_signal() {
        let app = router(DispatchState::default());
        let (status, headers, body) = send(app, get("/any/path").body(Body::empty()).unwrap()).await;
        assert_eq!(StatusCode::OK, status);
        assert_eq!("bytes", headers["accept-ranges"]);
        assert_eq!("4000", headers["content-length"]);
        assert!(headers.get("content-range").is_none());
        assert!(headers.get("strict-transport-security").is_none());
        assert_eq!(CANONICAL_CONTENT.as_bytes(), &body[..]);
    }

    #[tokio::test]
    async fn test_non_get_rejected() {
        for method in [Method::POST, Method::PUT, Method::DELETE, Method::HEAD] {
            let app = router(DispatchState::default());
            let request = Request::builder()
                .method(method.clone())
                .uri("/?range=bytes%3D0%2D1&range=bytes%3D2%2D3")
                .header("Range", "bytes=0-1000")
                .body(Body::empty())
                .unwrap();
            let (status, headers, body) = send(app, request).await;
            assert_eq!(StatusCode::BAD_REQUEST, status, "{method}");
            assert!(headers.get("content-range").is_none());
            if method != Method::HEAD {
                assert_eq!(b"only GET requests supported.".to_vec(), body);
            }
        }
    }

    #[tokio::test]
    async fn test_malformed_specifier() {
        let app = router(DispatchState::default());
        let request = get("/").header("Range", "bytes=abc-123").body(Body::empty()).unwrap();
        let (status, _, body) = send(app, request).await;
        assert_eq!(StatusCode::BAD_REQUEST, status);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_secure_listener_sets_hsts() {
        let app = router(DispatchState { secure: true, verbose: true });
        let request = get("/").header("Range", "bytes=-80").body(Body::empty()).unwrap();
        let (status, headers, body) = send(app, request).await;
        assert_eq!(StatusCode::PARTIAL_CONTENT, status);
        assert_eq!(HSTS, headers["strict-transport-security"]);
        assert_eq!(80, body.len());
    }
}
