//! The probe harness.
//!
//! Sends a fixed battery of range requests through every channel and checks
//! the status and body length of each response against expectation. A
//! mismatch is reported and the battery carries on; a transport failure ends
//! the battery.

use std::fmt;

use axum::http::header::RANGE;
use axum::http::HeaderName;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::StatusCode;

use crate::config::ProbeMode;
use crate::dispatch::{Channel, X_DOLT_RANGE};
use crate::error::ProbeError;
use crate::store::CANONICAL_LEN;
use crate::transport::Transport;

/// The canonical ranges and the number of bytes each selects.
pub const SAMPLE_RANGES: [(&str, usize); 3] = [
    ("bytes=0-1000", 1001),
    ("bytes=2500-2599", 100),
    ("bytes=-80", 80),
];

/// [`SAMPLE_RANGES`] as url-encoded query params.
pub const SAMPLE_PARAMS: [(&str, usize); 3] = [
    ("range=bytes%3D0%2D1000", 1001),
    ("range=bytes%3D2500%2D2599", 100),
    ("range=bytes%3D%2D80", 80),
];

/// How a probe carries its range signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Header { name: HeaderName, value: String },
    Params(String),
    Absent,
}

impl Signal {
    pub fn channel(&self) -> Option<Channel> {
        match self {
            Signal::Header { name, .. } if name == X_DOLT_RANGE => Some(Channel::AltHeader),
            Signal::Header { .. } => Some(Channel::Header),
            Signal::Params(_) => Some(Channel::Query),
            Signal::Absent => None,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Header { name, value } => write!(f, "header: '{name}: {value}'"),
            Signal::Params(params) => write!(f, "params: {params}"),
            Signal::Absent => f.write_str("no range"),
        }
    }
}

/// Parse a `"Name: value"` override. Only `Range` and `X-Dolt-Range` are
/// accepted, in any case.
pub fn parse_header_override(raw: &str) -> Result<Signal, ProbeError> {
    let parts: Vec<&str> = raw.split(':').collect();
    let &[name, value] = parts.as_slice() else {
        return Err(ProbeError::MalformedHeader(raw.to_string()));
    };
    let (name, value) = (name.trim(), value.trim());

    let name = if name.eq_ignore_ascii_case(RANGE.as_str()) {
        RANGE
    } else if name.eq_ignore_ascii_case(X_DOLT_RANGE.as_str()) {
        X_DOLT_RANGE
    } else {
        return Err(ProbeError::UnsupportedHeader(name.to_string()));
    };
    Ok(Signal::Header { name, value: value.to_string() })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expectation {
    pub status: StatusCode,
    pub len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub signal: Signal,
    pub expected: Expectation,
}

impl Probe {
    fn partial(signal: Signal, len: usize) -> Self {
        Probe { signal, expected: Expectation { status: StatusCode::PARTIAL_CONTENT, len } }
    }

    fn full() -> Self {
        Probe {
            signal: Signal::Absent,
            expected: Expectation { status: StatusCode::OK, len: CANONICAL_LEN as usize },
        }
    }
}

/// The fixed battery: every sample range via `Range`, then via
/// `X-Dolt-Range`, then via query params, then one full-content request.
pub fn battery() -> Vec<Probe> {
    let headers = [RANGE, X_DOLT_RANGE].into_iter().flat_map(|name| {
        SAMPLE_RANGES.iter().map(move |&(value, len)| {
            Probe::partial(Signal::Header { name: name.clone(), value: value.to_string() }, len)
        })
    });
    let params = SAMPLE_PARAMS
        .iter()
        .map(|&(params, len)| Probe::partial(Signal::Params(params.to_string()), len));

    headers.chain(params).chain([Probe::full()]).collect()
}

/// Status and drained body length of one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub status: StatusCode,
    pub len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mismatch {
    Status { expected: StatusCode, actual: StatusCode },
    Length { expected: usize, actual: usize },
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::Status { expected, actual } => {
                write!(f, "did not receive expected status: expected: {} actual: {}", expected.as_u16(), actual.as_u16())
            }
            Mismatch::Length { expected, actual } => {
                write!(f, "requested bytes did not match bytes served: requested: {expected} served: {actual}")
            }
        }
    }
}

/// Compare an observation against expectation.
pub fn compare(expected: &Expectation, observed: &Observation) -> Vec<Mismatch> {
    let mut mismatches = Vec::new();
    if expected.status != observed.status {
        mismatches.push(Mismatch::Status { expected: expected.status, actual: observed.status });
    }
    if expected.len != observed.len {
        mismatches.push(Mismatch::Length { expected: expected.len, actual: observed.len });
    }
    mismatches
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub url: String,
    pub probe: Probe,
    pub observed: Observation,
    pub mismatches: Vec<Mismatch>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    pub outcomes: Vec<ProbeOutcome>,
}

impl ProbeReport {
    pub fn is_clean(&self) -> bool {
        self.outcomes.iter().all(|o| o.mismatches.is_empty())
    }

    pub fn mismatch_count(&self) -> usize {
        self.outcomes.iter().map(|o| o.mismatches.len()).sum()
    }
}

/// Drives probes over one [`Transport`], strictly one at a time.
#[derive(Debug, Clone)]
pub struct ProbeHarness {
    transport: Transport,
    verbose: bool,
}

impl ProbeHarness {
    pub fn new(transport: Transport, verbose: bool) -> Self {
        ProbeHarness { transport, verbose }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    fn url_for(&self, signal: &Signal) -> String {
        match signal {
            Signal::Params(params) => format!("{}/?{}", self.transport.base_url, params),
            _ => format!("{}/", self.transport.base_url),
        }
    }

    /// Send one request and drain its body.
    pub async fn send(&self, signal: &Signal) -> Result<Observation, ProbeError> {
        let url = self.url_for(signal);
        let request_error = |source| ProbeError::Request { url: url.clone(), source };

        let mut builder = self.transport.client.get(&url);
        if let Signal::Header { name, value } = signal {
            builder = builder.header(name.clone(), value.as_str());
        }
        let request = builder.build().map_err(request_error)?;

        tracing::info!(%url, "request");
        for (name, value) in request.headers() {
            tracing::info!("with header: '{}: {}'", name, String::from_utf8_lossy(value.as_bytes()));
        }
        for (key, value) in request.url().query_pairs() {
            tracing::info!("with url query param: '{key}={value}'");
        }

        let response = self.transport.client.execute(request).await.map_err(request_error)?;
        let status = response.status();
        tracing::info!(%status, version = ?response.version(), "response");
        for (name, value) in response.headers() {
            tracing::info!("with header: '{}: {}'", name, String::from_utf8_lossy(value.as_bytes()));
        }

        let body = response.bytes().await.map_err(request_error)?;
        if self.verbose {
            tracing::info!("body (base64): {}", STANDARD.encode(&body));
        }

        Ok(Observation { status, len: body.len() })
    }

    /// Send an explicit `"Name: value"` header.
    pub async fn send_with_header(&self, raw: &str) -> Result<Observation, ProbeError> {
        self.send(&parse_header_override(raw)?).await
    }

    /// Send explicit url-encoded query params.
    pub async fn send_with_params(&self, params: &str) -> Result<Observation, ProbeError> {
        self.send(&Signal::Params(params.to_string())).await
    }

    /// Request the whole content with no range signal.
    pub async fn send_raw(&self) -> Result<Observation, ProbeError> {
        self.send(&Signal::Absent).await
    }

    /// Run one probe and compare the result.
    pub async fn check(&self, probe: Probe) -> Result<ProbeOutcome, ProbeError> {
        let observed = self.send(&probe.signal).await?;
        let mismatches = compare(&probe.expected, &observed);
        let url = self.url_for(&probe.signal);
        for mismatch in &mismatches {
            tracing::warn!(%url, signal = %probe.signal, "{mismatch}");
        }
        Ok(ProbeOutcome { url, probe, observed, mismatches })
    }

    /// Run every probe of [`battery`] in order.
    ///
    /// Mismatches are collected, not fatal. The first transport error aborts
    /// the remaining probes.
    pub async fn run_battery(&self) -> Result<ProbeReport, ProbeError> {
        let mut report = ProbeReport::default();
        for probe in battery() {
            report.outcomes.push(self.check(probe).await?);
        }

        if report.is_clean() {
            tracing::info!(probes = report.outcomes.len(), transport = %self.transport.config, "all probes matched");
        } else {
            tracing::warn!(mismatches = report.mismatch_count(), transport = %self.transport.config, "probe battery found mismatches");
        }
        Ok(report)
    }

    /// Run whatever `mode` asks for. Single-probe modes have no expectation
    /// and report the bare observation.
    pub async fn run(&self, mode: &ProbeMode) -> Result<ProbeReport, ProbeError> {
        let signal = match mode {
            ProbeMode::Battery => return self.run_battery().await,
            ProbeMode::Header(raw) => parse_header_override(raw)?,
            ProbeMode::Params(params) => Signal::Params(params.clone()),
            ProbeMode::All => Signal::Absent,
        };

        let observed = self.send(&signal).await?;
        let probe = Probe { signal, expected: Expectation { status: observed.status, len: observed.len } };
        let url = self.url_for(&probe.signal);
        Ok(ProbeReport {
            outcomes: vec![ProbeOutcome { url, probe, observed, mismatches: Vec::new() }],
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_battery_shape() {
        let probes = battery();
        assert_eq!(10, probes.len());

        let channels: Vec<_> = probes.iter().map(|p| p.signal.channel()).collect();
        assert_eq!(&[Some(Channel::Header); 3], &channels[0..3]);
        assert_eq!(&[Some(Channel::AltHeader); 3], &channels[3..6]);
        assert_eq!(&[Some(Channel::Query); 3], &channels[6..9]);
        assert_eq!(None, channels[9]);

        let lens: Vec<_> = probes.iter().map(|p| p.expected.len).collect();
        assert_eq!(vec![1001, 100, 80, 1001, 100, 80, 1001, 100, 80, 4000], lens);
        assert!(probes[..9].iter().all(|p| p.expected.status == StatusCode::PARTIAL_CONTENT));
        assert_eq!(StatusCode::OK, probes[9].expected.status);
    }

    #[test]
    fn test_parse_header_override() {
        assert_eq!(
            Signal::Header { name: RANGE, value: "bytes=0-100".to_string() },
            parse_header_override("Range: bytes=0-100").unwrap(),
        );
        assert_eq!(
            Some(Channel::AltHeader),
            parse_header_override("x-dolt-range: bytes=-80").unwrap().channel(),
        );
        assert_matches!(parse_header_override("Range bytes=0-100"), Err(ProbeError::MalformedHeader(_)));
        assert_matches!(parse_header_override("Range: a: b"), Err(ProbeError::MalformedHeader(_)));
        assert_matches!(parse_header_override("Accept: */*"), Err(ProbeError::UnsupportedHeader(_)));
    }

    #[test]
    fn test_compare() {
        let expected = Expectation { status: StatusCode::PARTIAL_CONTENT, len: 80 };
        let ok = Observation { status: StatusCode::PARTIAL_CONTENT, len: 80 };
        assert!(compare(&expected, &ok).is_empty());

        // a proxy that dropped the range header serves everything
        let stripped = Observation { status: StatusCode::OK, len: 4000 };
        assert_eq!(
            vec![
                Mismatch::Status { expected: StatusCode::PARTIAL_CONTENT, actual: StatusCode::OK },
                Mismatch::Length { expected: 80, actual: 4000 },
            ],
            compare(&expected, &stripped),
        );
    }

    #[test]
    fn test_mismatch_messages() {
        let status = Mismatch::Status { expected: StatusCode::PARTIAL_CONTENT, actual: StatusCode::OK };
        assert_eq!("did not receive expected status: expected: 206 actual: 200", status.to_string());
        let length = Mismatch::Length { expected: 100, actual: 4000 };
        assert_eq!("requested bytes did not match bytes served: requested: 100 served: 4000", length.to_string());
    }
}
