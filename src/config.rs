use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::transport::{Protocol, TransportConfig, Verification};

pub const DEFAULT_PORT: u16 = 1709;
pub const DEFAULT_SECURE_PORT: u16 = 443;

/// Grace period shared by both listeners for in-flight requests on shutdown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    pub secure_port: u16,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    pub verbose: bool,
    pub grace_period: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            secure_port: DEFAULT_SECURE_PORT,
            cert_file: PathBuf::new(),
            key_file: PathBuf::new(),
            verbose: false,
            grace_period: SHUTDOWN_GRACE,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Missing("port"));
        }
        if self.secure_port == 0 {
            return Err(ConfigError::Missing("secure-port"));
        }
        if self.cert_file.as_os_str().is_empty() {
            return Err(ConfigError::Missing("tls-cert-file"));
        }
        if self.key_file.as_os_str().is_empty() {
            return Err(ConfigError::Missing("tls-key-file"));
        }
        Ok(())
    }

    pub fn plain_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn secure_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.secure_port)
    }
}

/// What the client sends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ProbeMode {
    /// A single request with an explicit header, `"Range: bytes=0-100"`.
    Header(String),
    /// A single request with explicit url-encoded query params,
    /// `"range=bytes%3D0%2D100"`.
    Params(String),
    /// A single request without any range signal.
    All,
    /// The full probe battery.
    #[default]
    Battery,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub http2: bool,
    pub tls_skip_verify: bool,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub mode: ProbeMode,
    pub verbose: bool,
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Missing("host"));
        }
        if self.port == 0 {
            return Err(ConfigError::Missing("port"));
        }
        if self.cert_file.is_some() != self.key_file.is_some() {
            return Err(ConfigError::UnpairedTlsFiles);
        }
        Ok(())
    }

    /// Transport selection: a cert/key pair wins, then skip-verify, then
    /// plain http.
    pub fn transport(&self) -> TransportConfig {
        let protocol = if self.http2 { Protocol::Http2 } else { Protocol::Http1 };
        let verification = match (&self.cert_file, &self.key_file) {
            (Some(cert_file), Some(key_file)) => Verification::Verified {
                cert_file: cert_file.clone(),
                key_file: key_file.clone(),
            },
            _ if self.tls_skip_verify => Verification::SkipVerify,
            _ => Verification::None,
        };
        TransportConfig::new(self.host.clone(), self.port, protocol, verification)
    }
}
