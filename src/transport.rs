//! HTTP clients for every transport the probe can exercise.
//!
//! | scheme  | protocol | verification                    |
//! |---------|----------|---------------------------------|
//! | `http`  | h1 / h2c | none                            |
//! | `https` | h1 / h2  | skip-verify                     |
//! | `https` | h1 / h2  | verified against the cert itself |
//!
//! Cleartext HTTP/2 has no upgrade negotiation here, the client speaks h2
//! with prior knowledge over a plain TCP connection.

use std::fmt;
use std::path::PathBuf;

use reqwest::{Certificate, Client, Identity};

use crate::error::TransportError;
use crate::tls::read_pem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http1,
    Http2,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Plain http, no TLS at all.
    None,
    /// TLS without verifying the server certificate.
    SkipVerify,
    /// TLS presenting `cert_file`/`key_file` as the client identity and
    /// trusting `cert_file` as the root.
    Verified { cert_file: PathBuf, key_file: PathBuf },
}

/// One point of the transport matrix plus the server it targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub verification: Verification,
}

impl TransportConfig {
    pub fn new(host: impl Into<String>, port: u16, protocol: Protocol, verification: Verification) -> Self {
        TransportConfig { host: host.into(), port, protocol, verification }
    }

    /// `https` whenever any TLS verification mode is selected.
    pub fn scheme(&self) -> Scheme {
        match self.verification {
            Verification::None => Scheme::Http,
            Verification::SkipVerify | Verification::Verified { .. } => Scheme::Https,
        }
    }

    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme().as_str(), self.host, self.port)
    }

    /// Build the configured client.
    ///
    /// Fails when the cert or key cannot be read or parsed.
    pub fn build(&self) -> Result<Transport, TransportError> {
        let mut builder = Client::builder().use_rustls_tls();

        builder = match self.protocol {
            Protocol::Http1 => builder.http1_only(),
            Protocol::Http2 => builder.http2_prior_knowledge(),
        };

        builder = match &self.verification {
            Verification::None => builder,
            Verification::SkipVerify => builder.danger_accept_invalid_certs(true),
            Verification::Verified { cert_file, key_file } => {
                let cert_pem = read_pem(cert_file)?;
                let key_pem = read_pem(key_file)?;
                let root = Certificate::from_pem(&cert_pem)?;

                let mut identity_pem = cert_pem;
                identity_pem.push(b'\n');
                identity_pem.extend_from_slice(&key_pem);
                let identity = Identity::from_pem(&identity_pem)?;

                builder.add_root_certificate(root).identity(identity)
            }
        };

        let client = builder.build()?;
        tracing::debug!(transport = %self, "built client");
        Ok(Transport { base_url: self.base_url(), client, config: self.clone() })
    }
}

impl fmt::Display for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let protocol = match (self.protocol, self.scheme()) {
            (Protocol::Http1, _) => "h1",
            (Protocol::Http2, Scheme::Http) => "h2c",
            (Protocol::Http2, Scheme::Https) => "h2",
        };
        let verification = match self.verification {
            Verification::None => "plain",
            Verification::SkipVerify => "skip-verify",
            Verification::Verified { .. } => "verified",
        };
        write!(f, "{} {} {}", self.base_url(), protocol, verification)
    }
}

/// A ready client and the base url it should be pointed at.
#[derive(Debug, Clone)]
pub struct Transport {
    pub base_url: String,
    pub client: Client,
    pub config: TransportConfig,
}
