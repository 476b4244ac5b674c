//! The two listeners: plain (HTTP/1.1 and h2c) and TLS (HTTP/1.1 and h2).
//!
//! Each accepted connection is served by `hyper-util`'s auto builder, which
//! picks HTTP/1.1 or HTTP/2 from the connection preface. On shutdown both
//! listeners stop accepting and in-flight connections get a bounded grace
//! period to finish.

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::Router;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tower::Service;

use crate::config::ServerConfig;
use crate::dispatch::{self, DispatchState};
use crate::error::ServerError;
use crate::tls;

/// One bound listener and the way its connections are wrapped.
pub struct Listener {
    name: &'static str,
    tcp: TcpListener,
    tls: Option<TlsAcceptor>,
    state: DispatchState,
}

impl Listener {
    /// Bind a plain listener serving HTTP/1.1 and cleartext HTTP/2.
    pub async fn plain(addr: SocketAddr, verbose: bool) -> Result<Self, ServerError> {
        let tcp = bind(addr).await?;
        let state = DispatchState { secure: false, verbose };
        Ok(Listener { name: "http", tcp, tls: None, state })
    }

    /// Bind a TLS listener. Responses carry `Strict-Transport-Security`.
    pub async fn secure(addr: SocketAddr, config: Arc<rustls::ServerConfig>, verbose: bool) -> Result<Self, ServerError> {
        let tcp = bind(addr).await?;
        let state = DispatchState { secure: true, verbose };
        Ok(Listener { name: "https", tcp, tls: Some(TlsAcceptor::from(config)), state })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    /// Accept until `shutdown` flips, then wait up to `grace` for open
    /// connections to finish.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>, grace: Duration) {
        let Listener { name, tcp, tls, state } = self;
        let app = dispatch::router(state);
        let builder = ConnBuilder::new(TokioExecutor::new());
        let graceful = GracefulShutdown::new();

        if let Ok(addr) = tcp.local_addr() {
            tracing::info!("serving {name} on {addr}");
        }

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                res = tcp.accept() => {
                    let (stream, peer) = match res {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            tracing::error!("error accepting {name} connection: {err}");
                            continue;
                        }
                    };
                    let conn = Connection {
                        name,
                        peer,
                        app: app.clone(),
                        builder: builder.clone(),
                        tls: tls.clone(),
                    };
                    let watcher = graceful.watcher();
                    tokio::spawn(conn.run(stream, watcher));
                }
            }
        }

        drop(tcp);
        tracing::info!("{name} server is shutting down");
        tokio::select! {
            _ = graceful.shutdown() => tracing::info!("{name} server connections closed"),
            _ = tokio::time::sleep(grace) => {
                tracing::warn!("failed to shutdown {name} server: timed out after {grace:?}");
            }
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("name", &self.name)
            .field("addr", &self.tcp.local_addr().ok())
            .field("state", &self.state)
            .finish()
    }
}

struct Connection {
    name: &'static str,
    peer: SocketAddr,
    app: Router,
    builder: ConnBuilder<TokioExecutor>,
    tls: Option<TlsAcceptor>,
}

impl Connection {
    async fn run(self, stream: TcpStream, watcher: hyper_util::server::graceful::Watcher) {
        let (name, peer) = (self.name, self.peer);
        let result = match self.tls.clone() {
            Some(acceptor) => match acceptor.accept(stream).await {
                Ok(stream) => self.serve(stream, watcher).await,
                Err(err) => {
                    tracing::debug!(%peer, "{name} handshake failed: {err}");
                    return;
                }
            },
            None => self.serve(stream, watcher).await,
        };

        if let Err(err) = result {
            tracing::debug!(%peer, "{name} connection error: {err}");
        }
    }

    async fn serve<I>(
        self,
        io: I,
        watcher: hyper_util::server::graceful::Watcher,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let app = self.app;
        let service = hyper::service::service_fn(move |request: Request<Incoming>| {
            app.clone().call(request)
        });
        let conn = self.builder.serve_connection(TokioIo::new(io), service).into_owned();
        watcher.watch(conn).await
    }
}

async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr).await.map_err(|source| ServerError::Bind { addr, source })
}

/// Both listeners of a running server.
#[derive(Debug)]
pub struct Server {
    plain: Listener,
    secure: Listener,
    grace: Duration,
}

impl Server {
    /// Load TLS material, then bind both listeners.
    ///
    /// Unreadable or mismatched certificate material fails here, before
    /// anything is served.
    pub async fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        let tls_config = tls::server_config(&config.cert_file, &config.key_file)?;
        let plain = Listener::plain(config.plain_addr(), config.verbose).await?;
        let secure = Listener::secure(config.secure_addr(), tls_config, config.verbose).await?;
        Ok(Server { plain, secure, grace: config.grace_period })
    }

    pub fn plain_addr(&self) -> io::Result<SocketAddr> {
        self.plain.local_addr()
    }

    pub fn secure_addr(&self) -> io::Result<SocketAddr> {
        self.secure.local_addr()
    }

    /// Serve both listeners until `signal` resolves, then shut both down and
    /// wait for them.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let (tx, rx) = watch::channel(false);
        let plain = tokio::spawn(self.plain.serve(rx.clone(), self.grace));
        let secure = tokio::spawn(self.secure.serve(rx, self.grace));

        signal.await;
        tracing::info!("shutdown requested");
        let _ = tx.send(true);

        let (plain, secure) = tokio::join!(plain, secure);
        plain?;
        secure?;
        Ok(())
    }
}

/// Bind from `config` and serve until SIGINT or SIGTERM.
pub async fn run(config: ServerConfig) -> Result<(), ServerError> {
    Server::bind(&config).await?.serve_with_shutdown(shutdown_signal()).await
}

/// Resolves on SIGINT, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for interrupt: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
