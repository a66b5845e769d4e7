//! HTTP server and graceful shutdown.
//!
//! # Request lifecycle
//!
//! 1. The body is buffered and a [`Reply`] is created for the request, wired
//!    to a one-shot channel.
//! 2. The middleware chain runs on its own task. Response handlers installed
//!    on the way in unwind when the endpoint emits.
//! 3. Whatever reaches the end of the unwind is written to the connection.
//!
//! Nothing here times out a stalled chain. A middleware that never continues
//! leaves the client waiting until it gives up.
//!
//! # Graceful shutdown
//!
//! On **SIGTERM** or Ctrl-C the server stops accepting connections, lets
//! every in-flight connection task run to completion and then returns from
//! [`Server::serve`].

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::task::JoinError;
use tracing::{error, info, warn};

use crate::error::Error;
use crate::middleware::Next;
use crate::reply::{OneShot, Reply};
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;

enum Bind {
    Addr(SocketAddr),
    Listener(TcpListener),
}

/// The HTTP server.
pub struct Server {
    bind: Bind,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not a valid `host:port` string. Use
    /// [`try_bind`](Server::try_bind) to handle that case.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use hoagie::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: &str) -> Self {
        Self::try_bind(addr).expect("invalid socket address")
    }

    /// Like [`bind`](Server::bind), but reports a malformed address as [`Error::Addr`].
    pub fn try_bind(addr: &str) -> Result<Self, Error> {
        Ok(Self { bind: Bind::Addr(addr.parse()?) })
    }

    /// Serves on an already-bound listener, e.g. one bound to port 0.
    pub fn from_listener(listener: TcpListener) -> Self {
        Self { bind: Bind::Listener(listener) }
    }

    /// Starts accepting connections and dispatching them through `router`.
    ///
    /// Returns only after a full graceful shutdown (SIGTERM or Ctrl-C,
    /// followed by all in-flight requests completing).
    pub async fn serve(self, router: Router) -> Result<(), Error> {
        self.serve_with_shutdown(router, shutdown_signal()).await
    }

    /// Like [`serve`](Server::serve), but stops accepting when `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, router: Router, signal: F) -> Result<(), Error>
    where
        F: Future<Output = ()>,
    {
        let listener = match self.bind {
            Bind::Addr(addr) => TcpListener::bind(addr).await?,
            Bind::Listener(listener) => listener,
        };
        let addr = listener.local_addr()?;

        // Shared across connection tasks without copying the routing table.
        let router = Arc::new(router);

        info!(%addr, "hoagie listening");

        let mut tasks = tokio::task::JoinSet::new();

        tokio::pin!(signal);

        loop {
            tokio::select! {
                // Check shutdown first so a SIGTERM immediately stops
                // accepting new connections, even if more are queued.
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

                    let router = Arc::clone(&router);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on the connection.
                        let svc = service_fn(move |req| {
                            let router = Arc::clone(&router);
                            async move { dispatch(router, req).await }
                        });

                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("hoagie stopped");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Runs one request through the middleware chain and waits for what it emits.
///
/// Failures are turned into responses here, so hyper never sees an error.
async fn dispatch(
    router: Arc<Router>,
    req: hyper::Request<Incoming>,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(path = parts.uri.path(), "failed to read request body: {e}");
            return Ok(Response::status(StatusCode::BAD_REQUEST).into_inner());
        }
    };

    let (endpoint, params) = router.lookup(&parts.method, parts.uri.path());
    let request = Request::new(parts.method, parts.uri, parts.headers, body, params);

    let (transmit, mut sent) = OneShot::channel();
    let reply = Reply::new(request.clone(), transmit);
    let next = Next::new(router.layers(), endpoint, request, reply);

    // The chain runs detached: a handler may keep working after the
    // response went out, or resume a continuation from another task.
    let mut chain = tokio::spawn(next.run());

    let response = tokio::select! {
        biased;

        res = &mut sent => match res {
            Ok(response) => Some(response),
            // A panic unwinds through the reply and drops the sender, so the
            // chain decides whether this is a 500 or an abandoned reply.
            Err(_) => server_error(chain.await),
        },
        joined = &mut chain => match server_error(joined) {
            Some(response) => Some(response),
            None => sent.await.ok(),
        },
    };

    match response {
        Some(response) => Ok(response.into_inner()),
        None => {
            // Every handle to the reply is gone and nothing was emitted.
            // The connection is left pending, same as a chain that stalls.
            warn!("reply dropped without a response, leaving request pending");
            std::future::pending().await
        }
    }
}

/// The 500 response for a chain that panicked, if it did.
fn server_error(joined: Result<(), JoinError>) -> Option<Response> {
    match joined {
        Err(e) if e.is_panic() => {
            error!("middleware chain panicked");
            Some(Response::status(StatusCode::INTERNAL_SERVER_ERROR))
        }
        _ => None,
    }
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** and **SIGINT** (Ctrl-C).
/// On Windows only Ctrl-C is available.
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
