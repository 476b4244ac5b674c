use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

/// A range specifier that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    /// Missing `bytes=` prefix, or not exactly two `-` delimited tokens.
    #[error("invalid range string: {0:?}")]
    InvalidFormat(String),

    /// A token that is not an unsigned decimal, or arithmetic that overflowed.
    #[error("invalid range number: {0:?}")]
    InvalidNumber(String),
}

/// A read outside the bounds of a [`ContentStore`](crate::ContentStore).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("invalid range: {start}..{end} outside 0..{len}")]
    OutOfRange { start: i64, end: i64, len: i64 },
}

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no PEM certificate found in {0}")]
    NoCertificate(PathBuf),

    #[error("no PEM private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("TLS configuration error: {0}")]
    Rustls(#[from] rustls::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("listener task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("must supply --{0}")]
    Missing(&'static str),

    #[error("--tls-cert-file and --tls-key-file must be supplied together")]
    UnpairedTlsFiles,

    #[error("only one of --header, --params and --all may be supplied")]
    ConflictingModes,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to parse header {0:?}, expected 'Name: value'")]
    MalformedHeader(String),

    #[error("unsupported header {0:?}, only 'Range' and 'X-Dolt-Range' supported")]
    UnsupportedHeader(String),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}
