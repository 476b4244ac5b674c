//! # range-probe
//!
//! Diagnoses whether HTTP byte-range signals survive a round trip through
//! intermediaries (proxies, middleware) that may strip or rewrite headers.
//!
//! The server half turns a `bytes=` range specifier into a correctly shaped
//! partial-content response over a fixed in-memory document. The specifier can
//! arrive through three independent channels: the `Range` header, the
//! `X-Dolt-Range` header, or a `Range`/`range` query parameter. See
//! [`dispatch`] for the priority order.
//!
//! The client half ([`transport`], [`probe`]) sends the same logical range
//! request through every channel over HTTP/1.1, h2c or TLS and reports every
//! status or length mismatch it observes.
//!
//! ```
//! use axum::response::IntoResponse;
//! use axum::http::StatusCode;
//!
//! use range_probe::{ContentStore, Ranged};
//!
//! let response = Ranged::new(Some("bytes=-80".to_string()), ContentStore::canonical())
//!     .into_response();
//! assert_eq!(StatusCode::PARTIAL_CONTENT, response.status());
//! assert_eq!("bytes 3920-3999/4000", response.headers()["content-range"]);
//! ```

mod store;
mod stream;

pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod probe;
pub mod server;
pub mod tls;
pub mod transport;

use axum::http::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

pub use error::{RangeError, StoreError};
pub use store::{ContentStore, CANONICAL_CONTENT, CANONICAL_LEN};
pub use stream::{chunked, RangedStream, StoreChunks};

const BYTES_PREFIX: &str = "bytes=";

/// A parsed specifier: `length` bytes starting at `offset`.
///
/// Neither field is clamped. A suffix longer than the content yields a
/// negative offset and `end < start` yields a negative length; both are
/// rejected later by [`ContentStore::read_range`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: i64,
    pub length: i64,
}

impl ByteRange {
    pub fn new(offset: i64, length: i64) -> Self {
        ByteRange { offset, length }
    }

    /// Exclusive end offset.
    pub fn end_exclusive(&self) -> i64 {
        self.offset.saturating_add(self.length)
    }

    /// Inclusive last offset, as written in `Content-Range`.
    pub fn last(&self) -> i64 {
        self.end_exclusive().saturating_sub(1)
    }
}

/// Parse a range specifier against content of `content_size` bytes.
///
/// Grammar: `"bytes=" (DIGITS "-" DIGITS) | (DIGITS "-") | ("-" DIGITS)`.
/// An empty specifier means no range was requested and yields `Ok(None)`.
pub fn parse_range_specifier(spec: &str, content_size: i64) -> Result<Option<ByteRange>, RangeError> {
    if spec.is_empty() {
        return Ok(None);
    }

    let Some(body) = spec.strip_prefix(BYTES_PREFIX) else {
        return Err(RangeError::InvalidFormat(spec.to_string()));
    };

    let tokens: Vec<&str> = body.split('-').collect();
    let &[first, second] = tokens.as_slice() else {
        return Err(RangeError::InvalidFormat(spec.to_string()));
    };

    // digits only, `u64::from_str` would also take a leading `+`
    let number = |token: &str| -> Result<i64, RangeError> {
        let token = token.trim();
        Some(token)
            .filter(|t| !t.is_empty() && t.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|t| t.parse::<u64>().ok())
            .and_then(|n| i64::try_from(n).ok())
            .ok_or_else(|| RangeError::InvalidNumber(spec.to_string()))
    };
    let overflow = || RangeError::InvalidNumber(spec.to_string());

    // bytes=-N, the trailing N bytes
    if first.is_empty() {
        let length = number(second)?;
        let offset = content_size.checked_sub(length).ok_or_else(overflow)?;
        return Ok(Some(ByteRange::new(offset, length)));
    }

    // bytes=N-, offset to end of content
    if second.is_empty() {
        let offset = number(first)?;
        let length = content_size.checked_sub(offset).ok_or_else(overflow)?;
        return Ok(Some(ByteRange::new(offset, length)));
    }

    let start = number(first)?;
    let end = number(second)?;
    let length = end.checked_sub(start)
        .and_then(|n| n.checked_add(1))
        .ok_or_else(overflow)?;
    Ok(Some(ByteRange::new(start, length)))
}

/// The main responder type. Implements [`IntoResponse`].
///
/// Holds the raw specifier, if any channel carried one, and the store to cut
/// the response from.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranged {
    specifier: Option<String>,
    store: ContentStore,
    verbose: bool,
}

impl Ranged {
    /// Construct a ranged response over `store`. `None` and `Some("")` both
    /// request the full content.
    pub fn new(specifier: Option<String>, store: ContentStore) -> Self {
        Ranged { specifier, store, verbose: false }
    }

    /// Log the base64 encoding of the body that is about to be sent.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Responds to the request, returning headers and body as
    /// [`RangedResponse`]. Returns a [`RangeRejection`] when the specifier is
    /// malformed or selects bytes outside the store.
    pub fn try_respond(self) -> Result<RangedResponse, RangeRejection> {
        let total = self.store.len();
        let spec = self.specifier.as_deref().unwrap_or("");

        let range = match parse_range_specifier(spec, total) {
            Ok(range) => range,
            Err(e) => {
                tracing::info!("bad request: {e}");
                return Err(RangeRejection::Malformed(e));
            }
        };

        let Some(range) = range else {
            let body = self.store.read_all();
            if self.verbose {
                tracing::info!(encoded = %STANDARD.encode(&body), "encoded content");
            }
            tracing::info!(content_length = total, status = 200, "for all content");
            return Ok(RangedResponse::Full {
                content_length: total as u64,
                stream: RangedStream::from_bytes(body),
            });
        };

        let slice = match self.store.read_range(range.offset, range.end_exclusive()) {
            Ok(slice) => slice,
            Err(e) => {
                tracing::info!("bad request: {e}");
                return Err(RangeRejection::OutOfRange(e));
            }
        };

        let content_range = format!("bytes {}-{}/{}", range.offset, range.last(), total);
        let content_length = slice.len() as u64;
        tracing::info!(%content_range, content_length, status = 206, "responding");
        if self.verbose {
            tracing::info!(encoded = %STANDARD.encode(&slice), "encoded range");
        }

        let content_range = HeaderValue::from_str(&content_range)
            .map_err(|_| RangeRejection::Malformed(RangeError::InvalidFormat(spec.to_string())))?;
        Ok(RangedResponse::Partial {
            content_range,
            content_length,
            stream: RangedStream::from_bytes(slice),
        })
    }
}

impl IntoResponse for Ranged {
    fn into_response(self) -> Response {
        self.try_respond().into_response()
    }
}

/// Error type for specifiers that cannot be served. Implements
/// [`IntoResponse`] as `400 Bad Request` with no body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeRejection {
    #[error(transparent)]
    Malformed(#[from] RangeError),

    #[error(transparent)]
    OutOfRange(#[from] StoreError),
}

impl IntoResponse for RangeRejection {
    fn into_response(self) -> Response {
        let headers = [(ACCEPT_RANGES, HeaderValue::from_static("bytes"))];
        (StatusCode::BAD_REQUEST, headers).into_response()
    }
}

/// Data type containing computed headers and body for a range response.
/// Implements [`IntoResponse`].
#[derive(Debug)]
pub enum RangedResponse {
    /// Full content response, no range requested.
    Full {
        content_length: u64,
        stream: RangedStream<StoreChunks>,
    },
    /// A single contiguous slice.
    Partial {
        content_range: HeaderValue,
        content_length: u64,
        stream: RangedStream<StoreChunks>,
    },
}

impl RangedResponse {
    pub fn status(&self) -> StatusCode {
        match self {
            RangedResponse::Full { .. } => StatusCode::OK,
            RangedResponse::Partial { .. } => StatusCode::PARTIAL_CONTENT,
        }
    }
}

impl IntoResponse for RangedResponse {
    fn into_response(self) -> Response {
        let accept_ranges = (ACCEPT_RANGES, HeaderValue::from_static("bytes"));

        match self {
            RangedResponse::Full { content_length, stream } => {
                let headers = [
                    accept_ranges,
                    (CONTENT_LENGTH, HeaderValue::from(content_length)),
                ];
                (StatusCode::OK, headers, stream).into_response()
            }
            RangedResponse::Partial { content_range, content_length, stream } => {
                let headers = [
                    accept_ranges,
                    (CONTENT_RANGE, content_range),
                    (CONTENT_LENGTH, HeaderValue::from(content_length)),
                ];
                (StatusCode::PARTIAL_CONTENT, headers, stream).into_response()
            }
        }
    }
}

#[test]
fn test_parse_range_specifier() {
    let tests = [
        ("", 4000, Ok(None)),
        ("bytes=0-1000", 4000, Ok(Some(ByteRange::new(0, 1001)))),
        ("bytes=2500-2599", 4000, Ok(Some(ByteRange::new(2500, 100)))),
        ("bytes=-80", 4000, Ok(Some(ByteRange::new(3920, 80)))),
        ("bytes=100-", 4000, Ok(Some(ByteRange::new(100, 3900)))),
        ("bytes=0-0", 4000, Ok(Some(ByteRange::new(0, 1)))),
        ("bytes= 10 - 19", 4000, Ok(Some(ByteRange::new(10, 10)))),
        // not clamped, rejected by the store
        ("bytes=-5000", 4000, Ok(Some(ByteRange::new(-1000, 5000)))),
        ("bytes=10-5", 4000, Ok(Some(ByteRange::new(10, -4)))),
        ("bytes=5000-", 4000, Ok(Some(ByteRange::new(5000, -1000)))),
        ("none", 4000, Err(RangeError::InvalidFormat("none".to_string()))),
        ("bleets=100-324", 4000, Err(RangeError::InvalidFormat("bleets=100-324".to_string()))),
        ("bytes=100", 4000, Err(RangeError::InvalidFormat("bytes=100".to_string()))),
        ("bytes=0-4,-1", 4000, Err(RangeError::InvalidFormat("bytes=0-4,-1".to_string()))),
        ("bytes=1-2-3", 4000, Err(RangeError::InvalidFormat("bytes=1-2-3".to_string()))),
        ("bytes=abc-123", 4000, Err(RangeError::InvalidNumber("bytes=abc-123".to_string()))),
        ("bytes=0-xyz", 4000, Err(RangeError::InvalidNumber("bytes=0-xyz".to_string()))),
        ("bytes=-", 4000, Err(RangeError::InvalidNumber("bytes=-".to_string()))),
        ("bytes=+5-10", 4000, Err(RangeError::InvalidNumber("bytes=+5-10".to_string()))),
        ("bytes=-+80", 4000, Err(RangeError::InvalidNumber("bytes=-+80".to_string()))),
        ("bytes=5-+10", 4000, Err(RangeError::InvalidNumber("bytes=5-+10".to_string()))),
        ("bytes=0-99999999999999999999", 4000, Err(RangeError::InvalidNumber("bytes=0-99999999999999999999".to_string()))),
    ];

    for (i, (spec, size, expected)) in tests.iter().enumerate() {
        let result = parse_range_specifier(spec, *size);
        assert_eq!(result, *expected, "Failed to parse range specifier #{i}: {spec}");
    }
}
