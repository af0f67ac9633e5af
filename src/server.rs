//! HTTP server, TLS, and graceful shutdown.
//!
//! The server is the collaborator that sits in front of a chain: it accepts
//! connections, turns each hyper request into a [`Request`] plus a fresh
//! [`ResponseWriter`], calls the [`Compiled`] chain once, and writes back
//! whatever the handlers left in the writer.
//!
//! # Graceful shutdown and Kubernetes
//!
//! When Kubernetes terminates a pod it sends **SIGTERM** and waits
//! `terminationGracePeriodSeconds` (default 30 s) before sending SIGKILL.
//!
//! The server reacts by:
//! 1. Immediately stopping `listener.accept()`, so no new connections are made.
//! 2. Telling every open connection to shut down gracefully: requests already
//!    in flight finish, idle keep-alive connections close at once, HTTP/2
//!    peers get a GOAWAY, and pending TLS handshakes are dropped.
//! 3. Waiting up to [`SHUTDOWN_GRACE`] for connection tasks to finish, then
//!    aborting whatever is left.
//! 4. Returning from [`Server::serve`], which lets `main` exit cleanly.
//!
//! # Handler panics
//!
//! The chain does not catch panics, and what a panic takes down depends on
//! the protocol:
//!
//! - **HTTP/1.1**: requests run inside the connection task. A panic unwinds
//!   that task; the accept loop reaps it, logs it at `error`, and the client
//!   sees the connection close.
//! - **HTTP/2**: hyper runs every stream in its own task, which the accept
//!   loop never sees. A panic ends only that stream (the client gets a
//!   stream reset); it is not reaped or logged by the server beyond the
//!   runtime's panic hook, and the connection and its other streams stay up.
//!
//! In both cases other connections are unaffected.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinError;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::chain::{Chain, Compiled};
use crate::config;
use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::ResponseWriter;
use crate::tls;

/// How long a client gets to finish the TLS handshake.
pub const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long shutdown waits for open connections before aborting them.
///
/// Kept under Kubernetes' default 30 s termination grace period.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(25);

enum Bind {
    Addr(String),
    Listener(TcpListener),
}

/// The HTTP server.
pub struct Server {
    bind: Bind,
    tls: Option<(PathBuf, PathBuf)>,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called. The address is validated at that point.
    ///
    /// ```rust,no_run
    /// use weave::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: impl Into<String>) -> Self {
        Self { bind: Bind::Addr(addr.into()), tls: None }
    }

    /// Serves on a listener the caller already bound, e.g. to port `0`.
    pub fn from_listener(listener: TcpListener) -> Self {
        Self { bind: Bind::Listener(listener), tls: None }
    }

    /// Terminates TLS with the PEM certificate chain at `cert` and the PEM
    /// private key at `key`. Both are loaded when serving starts.
    pub fn tls(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.tls = Some((cert.into(), key.into()));
        self
    }

    /// Starts accepting connections and dispatching them through `app`.
    ///
    /// Returns only after a graceful shutdown (SIGTERM or Ctrl-C, followed by
    /// in-flight requests completing or [`SHUTDOWN_GRACE`] running out). Bad
    /// TLS material or an unusable address is reported here, before any
    /// connection is accepted.
    pub async fn serve(self, app: Compiled) -> Result<()> {
        self.serve_with_shutdown(app, shutdown_signal()).await
    }

    /// Like [`serve`](Server::serve), but stops when `signal` resolves.
    pub async fn serve_with_shutdown<S>(self, app: Compiled, signal: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        let acceptor = match &self.tls {
            Some((cert, key)) => Some(tls::acceptor(cert, key)?),
            None => None,
        };

        let listener = match self.bind {
            Bind::Addr(addr) => {
                let parsed: SocketAddr = addr
                    .parse()
                    .map_err(|_| Error::InvalidAddress { addr: addr.clone() })?;
                TcpListener::bind(parsed).await?
            }
            Bind::Listener(listener) => listener,
        };
        let local_addr = listener.local_addr()?;

        info!(addr = %local_addr, tls = acceptor.is_some(), handlers = app.len(), "weave listening");

        // JoinSet tracks every spawned connection task so we can wait for
        // them all to finish during graceful shutdown.
        let mut tasks = tokio::task::JoinSet::new();

        // Flipped once on shutdown; every connection task holds a receiver.
        let (stop_tx, stop_rx) = watch::channel(false);

        tokio::pin!(signal);

        loop {
            tokio::select! {
                // Shutdown is checked first so a signal stops accepting at
                // once, even with connections queued.
                biased;

                () = &mut signal => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let app = app.clone();
                    let acceptor = acceptor.clone();
                    let mut stop = stop_rx.clone();

                    tasks.spawn(async move {
                        match acceptor {
                            Some(acceptor) => {
                                if let Some(stream) = handshake(&acceptor, stream, remote_addr, &mut stop).await {
                                    serve_connection(stream, app, remote_addr, stop).await;
                                }
                            }
                            None => serve_connection(stream, app, remote_addr, stop).await,
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on long-running servers.
                Some(res) = tasks.join_next(), if !tasks.is_empty() => reap(res),
            }
        }

        let _ = stop_tx.send(true);

        let drain = async {
            while let Some(res) = tasks.join_next().await {
                reap(res);
            }
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!(remaining = tasks.len(), "shutdown grace period elapsed, aborting connections");
            tasks.shutdown().await;
        }

        info!("weave stopped");
        Ok(())
    }
}

// ── Chain entry points ────────────────────────────────────────────────────────

impl Chain {
    /// Compiles the chain and serves it until SIGTERM / Ctrl-C.
    ///
    /// The address is `addr` when given, otherwise `0.0.0.0:$PORT`, otherwise
    /// [`config::DEFAULT_ADDR`]; see [`config::detect_addr`].
    ///
    /// The chain is compiled once here; handlers appended afterwards are not
    /// served. Call this last, after registration is done.
    pub async fn run(&self, addr: Option<&str>) -> Result<()> {
        Server::bind(config::detect_addr(addr)).serve(self.compile()).await
    }

    /// Like [`run`](Chain::run), terminating TLS with the PEM files at `cert`
    /// and `key`. Bad TLS material fails this call before anything is served.
    pub async fn run_tls(&self, addr: &str, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Result<()> {
        Server::bind(addr).tls(cert, key).serve(self.compile()).await
    }

    /// [`run`](Chain::run) with a caller-supplied shutdown trigger.
    pub async fn run_with_shutdown<S>(&self, addr: Option<&str>, signal: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        Server::bind(config::detect_addr(addr)).serve_with_shutdown(self.compile(), signal).await
    }

    /// [`run_tls`](Chain::run_tls) with a caller-supplied shutdown trigger.
    pub async fn run_tls_with_shutdown<S>(
        &self,
        addr: &str,
        cert: impl Into<PathBuf>,
        key: impl Into<PathBuf>,
        signal: S,
    ) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        Server::bind(addr).tls(cert, key).serve_with_shutdown(self.compile(), signal).await
    }
}

// ── Connections ───────────────────────────────────────────────────────────────

async fn handshake<S>(
    acceptor: &TlsAcceptor,
    stream: S,
    remote_addr: SocketAddr,
    stop: &mut watch::Receiver<bool>,
) -> Option<tokio_rustls::server::TlsStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tokio::select! {
        res = tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(stream)) => match res {
            Ok(Ok(stream)) => Some(stream),
            Ok(Err(e)) => {
                warn!(peer = %remote_addr, "tls handshake failed: {e}");
                None
            }
            Err(_) => {
                warn!(peer = %remote_addr, "tls handshake timed out");
                None
            }
        },
        _ = stop.changed() => {
            debug!(peer = %remote_addr, "shutting down, tls handshake dropped");
            None
        }
    }
}

async fn serve_connection<S>(stream: S, app: Compiled, remote_addr: SocketAddr, mut stop: watch::Receiver<bool>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    // TokioIo adapts tokio's AsyncRead/AsyncWrite to the hyper IO traits.
    let io = TokioIo::new(stream);

    // Called once per request on the connection, not once per connection.
    let svc = service_fn(move |req| {
        let app = app.clone();
        async move { dispatch(app, req, remote_addr).await }
    });

    // `auto::Builder` handles both HTTP/1.1 and HTTP/2.
    let builder = ConnBuilder::new(TokioExecutor::new());
    let conn = builder.serve_connection(io, svc);
    tokio::pin!(conn);

    // On shutdown, let the in-flight request finish and close instead of
    // waiting for a keep-alive peer to hang up.
    let mut stopping = false;
    let res = loop {
        tokio::select! {
            res = conn.as_mut() => break res,
            _ = stop.changed(), if !stopping => {
                stopping = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    };

    if let Err(e) = res {
        error!(peer = %remote_addr, "connection error: {e}");
    }
}

fn reap(res: std::result::Result<(), JoinError>) {
    if let Err(e) = res {
        if e.is_panic() {
            error!("handler panicked, connection dropped: {e}");
        } else {
            error!("connection task failed: {e}");
        }
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Runs one request through the chain.
///
/// The error type is [`Infallible`]: an unreadable body becomes a 400 and a
/// panicking handler never returns at all.
async fn dispatch(
    app: Compiled,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
) -> std::result::Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();

    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(peer = %remote_addr, "failed to read request body: {e}");
            let mut rw = ResponseWriter::new();
            rw.write_header(StatusCode::BAD_REQUEST);
            return Ok(rw.into_response());
        }
    };

    let mut req = Request::from_parts(parts, body, remote_addr);
    let mut rw = ResponseWriter::new();

    app.call(&mut req, &mut rw).await;

    debug!(
        method = %req.method(),
        path = req.path(),
        status = rw.status().as_u16(),
        bytes = rw.size(),
        "request served"
    );

    Ok(rw.into_response())
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** and **SIGINT** (Ctrl-C).
/// On Windows only Ctrl-C is available. A signal that cannot be installed is
/// logged and then never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
