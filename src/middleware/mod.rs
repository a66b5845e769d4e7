//! Middleware layer.
//!
//! Middleware runs in registration order on the way in. Each one receives the
//! request, the shared [`Reply`] and a [`Next`] continuation, and must call
//! [`Next::run`] for the chain to advance. After the last middleware the route
//! endpoint runs and its response is emitted through the reply.
//!
//! Plain request-side middleware is written with [`from_fn`]. For a paired
//! hook on the way out, use [`Bidirectional`]: its response handlers run in
//! reverse registration order, like a call stack unwinding.
//!
//! ```rust,no_run
//! use hoagie::middleware::{self, Bidirectional};
//! use hoagie::{Method, Request, Router};
//!
//! async fn hello(_req: Request) -> &'static str { "Hello World!" }
//!
//! let app = Router::new()
//!     .middleware(middleware::from_fn(|req, _reply, next| async move {
//!         tracing::info!(path = req.path(), "request");
//!         next.run().await
//!     }))
//!     .middleware(
//!         Bidirectional::new("timing")
//!             .on_request(|_req, _reply, next| async move { next.run().await })
//!             .on_response(|_req, res, next| async move { next.proceed(res).await }),
//!     )
//!     .on(Method::GET, "/", hello);
//! ```

mod bidirectional;

use std::future::Future;
use std::sync::Arc;

pub use bidirectional::Bidirectional;
pub use crate::handler::BoxFuture;
pub use crate::reply::{Marker, Reply, Transmit, UnitId, Unwind};

use crate::handler::BoxedHandler;
use crate::request::Request;
use crate::response::Response;

// ── Request side ──────────────────────────────────────────────────────────────

/// A unit in the middleware chain.
///
/// Implementations must call `next.run()` to hand the request on; returning
/// without doing so ends the chain there.
pub trait Middleware: Send + Sync + 'static {
    fn call(&self, req: Request, reply: Reply, next: Next) -> BoxFuture<()>;
}

/// A type-erased middleware shared across concurrent requests.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// Builds a [`Middleware`] from an async closure or function.
pub fn from_fn<F, Fut>(f: F) -> FromFn<F>
where
    F: Fn(Request, Reply, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    FromFn(f)
}

/// Middleware returned by [`from_fn`].
pub struct FromFn<F>(F);

impl<F, Fut> Middleware for FromFn<F>
where
    F: Fn(Request, Reply, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn call(&self, req: Request, reply: Reply, next: Next) -> BoxFuture<()> {
        Box::pin((self.0)(req, reply, next))
    }
}

/// Continuation for the request phase.
///
/// Owns everything needed to resume the chain, so a middleware may also move
/// it into a spawned task and resume later.
#[must_use = "the chain does not advance unless `run` is awaited"]
pub struct Next {
    chain: Arc<[BoxedMiddleware]>,
    index: usize,
    endpoint: BoxedHandler,
    request: Request,
    reply: Reply,
}

impl Next {
    pub(crate) fn new(
        chain: Arc<[BoxedMiddleware]>,
        endpoint: BoxedHandler,
        request: Request,
        reply: Reply,
    ) -> Self {
        Self { chain, index: 0, endpoint, request, reply }
    }

    /// Runs the rest of the chain: the next middleware, or the endpoint
    /// followed by [`Reply::emit`] once the chain is exhausted.
    pub fn run(self) -> BoxFuture<()> {
        match self.chain.get(self.index).cloned() {
            Some(middleware) => {
                let req = self.request.clone();
                let reply = self.reply.clone();
                let next = Next { index: self.index + 1, ..self };
                middleware.call(req, reply, next)
            }
            None => Box::pin(async move {
                let response = self.endpoint.call(self.request).await;
                self.reply.emit(response).await;
            }),
        }
    }
}

// ── Response side ─────────────────────────────────────────────────────────────

/// A hook that sees the response before it is sent.
///
/// Implementations must call `next.proceed(res)` for the response to move on.
pub trait ResponseHandler: Send + Sync + 'static {
    fn call(&self, req: Request, res: Response, next: Unwind) -> BoxFuture<()>;
}

pub(crate) type BoxedResponseHandler = Arc<dyn ResponseHandler>;

/// [`ResponseHandler`] backed by an async closure or function.
pub(crate) struct FnResponseHandler<F>(pub(crate) F);

impl<F, Fut> ResponseHandler for FnResponseHandler<F>
where
    F: Fn(Request, Response, Unwind) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn call(&self, req: Request, res: Response, next: Unwind) -> BoxFuture<()> {
        Box::pin((self.0)(req, res, next))
    }
}
