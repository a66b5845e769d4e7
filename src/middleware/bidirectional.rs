//! Middleware with a paired hook on the way out.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, trace};

use super::{
    BoxFuture, BoxedMiddleware, BoxedResponseHandler, FnResponseHandler, Middleware, Next,
    ResponseHandler, from_fn,
};
use crate::reply::{Reply, UnitId, Unwind};
use crate::request::Request;
use crate::response::Response;

/// What a unit does on the way in.
enum OnRequest {
    Handler(BoxedMiddleware),
    /// Advance the chain straight away.
    PassThrough,
}

/// A middleware unit with a request handler and an optional response handler.
///
/// When registered in order `a, b`, request handlers run as `a, b` and
/// response handlers as `b, a`: each unit installs its response handler on the
/// [`Reply`] as it passes, and emitting unwinds them newest first before the
/// response is sent.
///
/// ```rust
/// use hoagie::middleware::Bidirectional;
///
/// let unit = Bidirectional::new("audit")
///     .on_request(|req, _reply, next| async move {
///         tracing::debug!(path = req.path(), "audit in");
///         next.run().await
///     })
///     .on_response(|_req, res, next| async move {
///         tracing::debug!(status = %res.status_code(), "audit out");
///         next.proceed(res).await
///     });
/// assert_eq!(unit.name(), "audit");
/// ```
///
/// Both handlers are optional. Without a request handler the unit just
/// continues the chain; without a response handler it never touches the reply.
/// A response handler that never calls `next.proceed` holds the response back
/// forever: there is no timeout.
pub struct Bidirectional {
    id: UnitId,
    name: String,
    on_request: OnRequest,
    on_response: Option<BoxedResponseHandler>,
}

impl Bidirectional {
    /// A unit that does nothing but continue the chain until handlers are set.
    ///
    /// `name` only labels the unit in logs. Identity comes from a fresh
    /// [`UnitId`], so reusing a name is harmless.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: UnitId::next(),
            name: name.into(),
            on_request: OnRequest::PassThrough,
            on_response: None,
        }
    }

    /// Sets the request-phase handler. It must call `next.run()` to continue.
    pub fn on_request<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Request, Reply, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_request_handler(from_fn(f))
    }

    /// Sets the response-phase handler. It must call `next.proceed(res)` for
    /// the response to be sent.
    pub fn on_response<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Request, Response, Unwind) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_response_handler(FnResponseHandler(f))
    }

    /// Like [`on_request`](Self::on_request), for any [`Middleware`] value.
    pub fn on_request_handler(mut self, handler: impl Middleware) -> Self {
        self.on_request = OnRequest::Handler(Arc::new(handler));
        self
    }

    /// Like [`on_response`](Self::on_response), for any [`ResponseHandler`] value.
    pub fn on_response_handler(mut self, handler: impl ResponseHandler) -> Self {
        self.on_response = Some(Arc::new(handler));
        self
    }

    pub fn id(&self) -> UnitId { self.id }
    pub fn name(&self) -> &str { &self.name }
}

impl Middleware for Bidirectional {
    fn call(&self, req: Request, reply: Reply, next: Next) -> BoxFuture<()> {
        if let Some(on_response) = &self.on_response {
            if reply.intercept(self.id, Arc::clone(on_response)) {
                debug!(unit = %self.name, id = %self.id, "response handler installed");
            } else {
                trace!(unit = %self.name, id = %self.id, "response handler already installed");
            }
        }

        match &self.on_request {
            OnRequest::Handler(handler) => handler.call(req, reply, next),
            OnRequest::PassThrough => next.run(),
        }
    }
}

impl fmt::Debug for Bidirectional {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bidirectional")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("on_request", &matches!(self.on_request, OnRequest::Handler(_)))
            .field("on_response", &self.on_response.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Handler;
    use crate::reply::Marker;
    use crate::reply::testing::Record;

    use http::StatusCode;
    use parking_lot::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    /// A unit that logs `<name>.setup` on the way in and `<name>.teardown` on the way out.
    fn traced(name: &'static str, log: &Log) -> Bidirectional {
        let req_log = Arc::clone(log);
        let res_log = Arc::clone(log);
        Bidirectional::new(name)
            .on_request(move |_req, _reply, next| {
                let log = Arc::clone(&req_log);
                async move {
                    log.lock().push(format!("{name}.setup"));
                    next.run().await
                }
            })
            .on_response(move |_req, res, next| {
                let log = Arc::clone(&res_log);
                async move {
                    log.lock().push(format!("{name}.teardown"));
                    next.proceed(res).await
                }
            })
    }

    async fn hello(_req: Request) -> &'static str {
        "Hello World!"
    }

    fn reply() -> (Request, Reply, Record) {
        let sent = Record::default();
        let req = Request::get("/");
        let reply = Reply::new(req.clone(), sent.clone());
        (req, reply, sent)
    }

    async fn run_chain(units: Vec<Bidirectional>) -> (Reply, Record) {
        let chain: Vec<BoxedMiddleware> = units
            .into_iter()
            .map(|u| Arc::new(u) as BoxedMiddleware)
            .collect();
        let (req, reply, sent) = reply();
        Next::new(chain.into(), hello.into_boxed_handler(), req, reply.clone()).run().await;
        (reply, sent)
    }

    #[tokio::test]
    async fn two_units_unwind_in_reverse() {
        let log = Log::default();
        let (reply, sent) = run_chain(vec![traced("a", &log), traced("b", &log)]).await;

        assert_eq!(*log.lock(), ["a.setup", "b.setup", "b.teardown", "a.teardown"]);
        assert!(reply.is_sent());
        let sent = sent.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].status_code(), StatusCode::OK);
        assert_eq!(sent[0].body(), b"Hello World!");
    }

    #[tokio::test]
    async fn many_units_unwind_in_reverse() {
        let log = Log::default();
        let names = ["u1", "u2", "u3", "u4", "u5"];
        let units = names.into_iter().map(|n| traced(n, &log)).collect();
        run_chain(units).await;

        let mut expected: Vec<String> = names.iter().map(|n| format!("{n}.setup")).collect();
        expected.extend(names.iter().rev().map(|n| format!("{n}.teardown")));
        assert_eq!(*log.lock(), expected);
    }

    #[tokio::test]
    async fn single_unit_runs_setup_then_teardown() {
        let log = Log::default();
        run_chain(vec![traced("solo", &log)]).await;
        assert_eq!(*log.lock(), ["solo.setup", "solo.teardown"]);
    }

    #[tokio::test]
    async fn processing_twice_installs_once() {
        let log = Log::default();
        let unit = traced("a", &log);
        let (req, reply, sent) = reply();

        // Two passes through the same unit against one reply; the endpoint
        // emits on each pass.
        for _ in 0..2 {
            let next = Next::new(Vec::new().into(), hello.into_boxed_handler(), req.clone(), reply.clone());
            unit.call(req.clone(), reply.clone(), next).await;
        }

        assert_eq!(reply.interceptors(), 1);
        assert_eq!(*log.lock(), ["a.setup", "a.teardown", "a.setup"]);
        assert_eq!(sent.sent().len(), 2);
    }

    #[tokio::test]
    async fn response_handler_fires_once_across_emits() {
        let log = Log::default();
        let unit = traced("a", &log);
        let (req, reply, sent) = reply();

        // Stop the chain right after the unit so only the test emits.
        let halt: BoxedMiddleware = Arc::new(from_fn(|_req, _reply, _next: Next| async {}));
        let next = Next::new(vec![halt].into(), hello.into_boxed_handler(), req.clone(), reply.clone());
        unit.call(req, reply.clone(), next).await;
        assert!(!reply.is_sent());

        let first = Response::builder().status(StatusCode::CREATED).header("x-n", "1").text("first");
        let second = Response::builder().status(StatusCode::ACCEPTED).header("x-n", "2").text("second");
        reply.emit(first.clone()).await;
        reply.emit(second.clone()).await;
        reply.emit(second.clone()).await;

        assert_eq!(*log.lock(), ["a.setup", "a.teardown"]);
        let marker = reply.marker(unit.id());
        assert!(marker.wrapped);
        assert!(marker.response_handled);
        assert_eq!(sent.sent(), [first, second.clone(), second]);
    }

    #[tokio::test]
    async fn missing_request_handler_passes_through() {
        let unit = Bidirectional::new("quiet");
        let (reply, sent) = run_chain(vec![unit]).await;

        assert!(reply.is_sent());
        assert_eq!(reply.interceptors(), 0);
        assert_eq!(sent.sent()[0].body(), b"Hello World!");
    }

    #[tokio::test]
    async fn missing_response_handler_leaves_reply_alone() {
        let log = Log::default();
        let req_log = Arc::clone(&log);
        let unit = Bidirectional::new("inbound").on_request(move |_req, _reply, next| {
            let log = Arc::clone(&req_log);
            async move {
                log.lock().push("inbound".to_owned());
                next.run().await
            }
        });
        let id = unit.id();
        let (reply, sent) = run_chain(vec![unit]).await;

        assert_eq!(*log.lock(), ["inbound"]);
        assert_eq!(reply.interceptors(), 0);
        assert_eq!(reply.marker(id), Marker::default());
        assert_eq!(sent.sent().len(), 1);
    }

    #[tokio::test]
    async fn response_handler_can_decorate() {
        let unit = Bidirectional::new("stamp").on_response(|_req, mut res, next| async move {
            res.headers_mut().insert("x-stamp", http::HeaderValue::from_static("yes"));
            next.proceed(res).await
        });
        let (_, sent) = run_chain(vec![unit]).await;

        assert_eq!(sent.sent()[0].headers()["x-stamp"], "yes");
    }

    #[tokio::test]
    async fn unfinished_response_handler_holds_the_response() {
        let log = Log::default();
        let stall = Bidirectional::new("stall").on_response(|_req, _res, _next| async {});
        let (reply, sent) = run_chain(vec![traced("outer", &log), stall]).await;

        assert_eq!(*log.lock(), ["outer.setup"]);
        assert!(!reply.is_sent());
        assert!(sent.sent().is_empty());
    }

    #[tokio::test]
    async fn continuation_may_resume_later() {
        let log = Log::default();
        let deferred = Bidirectional::new("deferred").on_response(|_req, res, next| async move {
            tokio::spawn(async move { next.proceed(res).await }).await.ok();
        });
        let (reply, sent) = run_chain(vec![traced("a", &log), deferred]).await;

        assert_eq!(*log.lock(), ["a.setup", "a.teardown"]);
        assert!(reply.is_sent());
        assert_eq!(sent.sent().len(), 1);
    }

    struct Stamp(&'static str);

    impl ResponseHandler for Stamp {
        fn call(&self, _req: Request, mut res: Response, next: Unwind) -> BoxFuture<()> {
            res.headers_mut().insert("x-stamp", http::HeaderValue::from_static(self.0));
            next.proceed(res)
        }
    }

    #[tokio::test]
    async fn accepts_handler_values() {
        let unit = Bidirectional::new("typed")
            .on_request_handler(from_fn(|_req, _reply, next: Next| next.run()))
            .on_response_handler(Stamp("typed"));
        let (reply, sent) = run_chain(vec![unit]).await;

        assert_eq!(reply.interceptors(), 1);
        assert_eq!(sent.sent()[0].headers()["x-stamp"], "typed");
    }

    #[test]
    fn same_name_distinct_identity() {
        let a = Bidirectional::new("dup");
        let b = Bidirectional::new("dup");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.name(), b.name());
    }
}
