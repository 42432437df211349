//! Listener binding and the serving loop.
//!
//! Startup blocks until a port is bound or the attempt budget runs out.
//! After a shutdown signal the listener stops accepting and in-flight
//! requests get a bounded grace period. Connections still open after that
//! are aborted.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use hyper_util::service::TowerToHyperService;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::port::{self, PortError};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Port(#[from] PortError),

    #[error("Failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    #[error("Server error: {0}")]
    Io(#[from] io::Error),
}

/// Where and how to bind the listener.
#[derive(Debug, Clone)]
pub struct BindOptions {
    pub host: String,
    pub port: u16,
    /// Move to the next free port when `port` is taken
    pub auto_switch: bool,
    /// Size of the search window, including `port` itself
    pub attempts: u16,
}

/// Bind the listener, walking forward from the requested port when
/// auto-switch is on.
///
/// A probe can succeed and the real bind still lose the port to another
/// process; the search then resumes after that port with whatever is left
/// of the budget.
pub async fn bind_listener(options: &BindOptions) -> Result<TcpListener, ServerError> {
    if !options.auto_switch {
        return bind_addr(&options.host, options.port).await;
    }

    let exhausted = |end: u16| PortError::NoPortAvailable {
        start: options.port,
        end,
        attempts: options.attempts,
    };

    let mut start = options.port;
    let mut remaining = options.attempts;

    loop {
        let candidate = match port::find_available_port(start, remaining) {
            Ok(candidate) => candidate,
            Err(PortError::NoPortAvailable { end, .. }) => return Err(exhausted(end).into()),
        };

        match bind_addr(&options.host, candidate).await {
            Ok(listener) => {
                if candidate != options.port {
                    warn!("Port {} is in use, using {} instead", options.port, candidate);
                }
                return Ok(listener);
            }
            Err(err) => {
                debug!("Lost port {} after probing: {}", candidate, err);
                let used = candidate - start + 1;
                remaining = remaining.saturating_sub(used);
                if remaining == 0 || candidate == u16::MAX {
                    return Err(exhausted(candidate).into());
                }
                start = candidate + 1;
            }
        }
    }
}

async fn bind_addr(host: &str, port: u16) -> Result<TcpListener, ServerError> {
    TcpListener::bind((host, port))
        .await
        .map_err(|source| ServerError::Bind {
            addr: format!("{}:{}", host, port),
            source,
        })
}

/// A bound listener ready to serve.
pub struct Server {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    grace: Duration,
}

impl Server {
    pub fn new(listener: TcpListener, tls: Option<TlsAcceptor>, grace: Duration) -> Self {
        Self {
            listener,
            tls,
            grace,
        }
    }

    /// The address actually bound, which may differ from the one requested.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve `app` until `shutdown` resolves, then drain.
    ///
    /// Every connection task is owned by the accept loop, so aborting the
    /// loop after the grace period also aborts the connections it spawned.
    pub async fn run<F>(self, app: Router, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);

        let mut task = tokio::spawn(serve_connections(self.listener, self.tls, app, stop_rx));

        tokio::select! {
            result = &mut task => return flatten(result),
            _ = shutdown => {}
        }

        info!("Shutdown signal received, draining connections");
        let _ = stop_tx.send(true);

        match tokio::time::timeout(self.grace, &mut task).await {
            Ok(result) => flatten(result),
            Err(_) => {
                warn!(
                    "Grace period of {:?} elapsed, aborting in-flight requests",
                    self.grace
                );
                task.abort();
                let _ = task.await;
                Ok(())
            }
        }
    }
}

fn flatten(result: Result<io::Result<()>, JoinError>) -> Result<(), ServerError> {
    match result {
        Ok(inner) => inner.map_err(ServerError::Io),
        Err(err) => Err(ServerError::Io(io::Error::other(err))),
    }
}

/// Accept loop shared by plain and TLS listeners.
async fn serve_connections(
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    app: Router,
    mut stop: watch::Receiver<bool>,
) -> io::Result<()> {
    let mut connections = JoinSet::new();

    loop {
        let conn_stop = stop.clone();
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!("Failed to accept connection: {}", err);
                        continue;
                    }
                };
                connections.spawn(accept_connection(
                    stream,
                    peer,
                    tls.clone(),
                    app.clone(),
                    conn_stop,
                ));
            }
            // Reap finished connections so the set does not grow unbounded.
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = stop.wait_for(|stopped| *stopped) => break,
        }
    }

    drop(listener);
    while connections.join_next().await.is_some() {}
    Ok(())
}

async fn accept_connection(
    stream: TcpStream,
    peer: SocketAddr,
    tls: Option<TlsAcceptor>,
    app: Router,
    stop: watch::Receiver<bool>,
) {
    match tls {
        None => serve_connection(TokioIo::new(stream), peer, app, stop).await,
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls) => serve_connection(TokioIo::new(tls), peer, app, stop).await,
            Err(err) => debug!("TLS handshake with {} failed: {}", peer, err),
        },
    }
}

async fn serve_connection<I>(
    io: TokioIo<I>,
    peer: SocketAddr,
    app: Router,
    mut stop: watch::Receiver<bool>,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let builder = Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection(io, TowerToHyperService::new(app));
    tokio::pin!(conn);

    let mut draining = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(err) = result {
                    debug!("Connection from {} closed with error: {}", peer, err);
                }
                break;
            }
            _ = stop.wait_for(|stopped| *stopped), if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}

/// Resolve on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("Failed to install signal handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
