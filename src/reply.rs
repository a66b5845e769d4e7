//! The per-request response object shared by the middleware chain.
//!
//! A [`Reply`] is what the host framework hands every middleware alongside
//! the request. Its terminal operation is [`Reply::emit`]: it hands a
//! [`Response`] to the transport. Instead of letting middleware swap that
//! operation out, the reply keeps an ordered list of pre-emit interceptors.
//! Emitting walks that list from the most recently installed interceptor
//! back to the first, and only then transmits:
//!
//! ```text
//! install order:   a ─▶ b ─▶ c
//! emit(res):       c.on_response ─▶ b.on_response ─▶ a.on_response ─▶ transmit
//! ```
//!
//! Each interceptor belongs to one middleware unit, identified by a
//! [`UnitId`]. The reply keeps a small [`Marker`] per unit so that a unit is
//! installed at most once and its response handler fires at most once, no
//! matter how often `emit` is called.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{trace, warn};

use crate::handler::BoxFuture;
use crate::middleware::BoxedResponseHandler;
use crate::request::Request;
use crate::response::Response;

// ── UnitId ────────────────────────────────────────────────────────────────────

/// Process-unique identity of a middleware unit.
///
/// Assigned once when the unit is built. Two units never share an id, even if
/// they were given the same name.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct UnitId(u64);

impl UnitId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ── Marker ────────────────────────────────────────────────────────────────────

/// Per-unit, per-request bookkeeping.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Marker {
    /// The unit's interceptor has been installed on this reply.
    pub wrapped: bool,
    /// The unit's response handler has fired for this reply.
    pub response_handled: bool,
}

// ── Transmit ──────────────────────────────────────────────────────────────────

/// The actual "send it" step behind [`Reply::emit`], after every interceptor
/// has let the response through.
///
/// The server implements it over a one-shot channel. Anything else that hosts
/// a chain (tests included) can supply its own.
pub trait Transmit: Send + 'static {
    fn transmit(&mut self, response: Response);
}

/// Transmits the first response over a one-shot channel and drops the rest.
pub(crate) struct OneShot(Option<oneshot::Sender<Response>>);

impl OneShot {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<Response>) {
        let (tx, rx) = oneshot::channel();
        (Self(Some(tx)), rx)
    }
}

impl Transmit for OneShot {
    fn transmit(&mut self, response: Response) {
        match self.0.take() {
            // The receiver is gone only when the connection already went away.
            Some(tx) => drop(tx.send(response)),
            None => warn!(status = %response.status_code(), "response already sent, discarding"),
        }
    }
}

// ── Reply ─────────────────────────────────────────────────────────────────────

struct Interceptor {
    unit: UnitId,
    handler: BoxedResponseHandler,
}

struct State {
    request: Request,
    interceptors: Vec<Interceptor>,
    markers: Vec<(UnitId, Marker)>,
    /// Taken out while transmitting, so the sink may use the reply.
    transmit: Option<Box<dyn Transmit>>,
    sent: bool,
}

impl State {
    fn marker(&mut self, unit: UnitId) -> &mut Marker {
        let idx = match self.markers.iter().position(|(id, _)| *id == unit) {
            Some(idx) => idx,
            None => {
                self.markers.push((unit, Marker::default()));
                self.markers.len() - 1
            }
        };
        &mut self.markers[idx].1
    }
}

/// Handle to the response side of one request/response cycle.
///
/// Cloning is cheap; all clones share the same state. The state lives until
/// the last clone (including any pending [`Unwind`] continuation) is dropped.
#[derive(Clone)]
pub struct Reply {
    state: Arc<Mutex<State>>,
}

impl Reply {
    /// Creates the response object for `request`, transmitting through `transmit`.
    pub fn new(request: Request, transmit: impl Transmit) -> Self {
        let state = State {
            request,
            interceptors: Vec::new(),
            markers: Vec::new(),
            transmit: Some(Box::new(transmit)),
            sent: false,
        };
        Self { state: Arc::new(Mutex::new(state)) }
    }

    /// The request this reply answers.
    pub fn request(&self) -> Request {
        self.state.lock().request.clone()
    }

    /// Whether a response has reached the transport yet.
    pub fn is_sent(&self) -> bool {
        self.state.lock().sent
    }

    /// Current bookkeeping for `unit`. Units never seen report the default.
    pub fn marker(&self, unit: UnitId) -> Marker {
        let state = self.state.lock();
        state.markers.iter()
            .find(|(id, _)| *id == unit)
            .map(|(_, m)| *m)
            .unwrap_or_default()
    }

    /// Number of installed pre-emit interceptors.
    pub fn interceptors(&self) -> usize {
        self.state.lock().interceptors.len()
    }

    /// Installs `handler` as the innermost pre-emit interceptor for `unit`.
    ///
    /// Returns `false` and leaves the chain untouched if `unit` is already
    /// installed on this reply.
    pub(crate) fn intercept(&self, unit: UnitId, handler: BoxedResponseHandler) -> bool {
        let mut state = self.state.lock();
        let marker = state.marker(unit);
        if marker.wrapped {
            return false;
        }
        marker.wrapped = true;
        state.interceptors.push(Interceptor { unit, handler });
        true
    }

    /// Emits `response`.
    ///
    /// Runs every installed response handler that has not fired yet, newest
    /// first, then transmits. Handlers that already fired are skipped, so a
    /// repeated `emit` goes straight to the transport with `response` as given.
    /// If a handler never calls its continuation the response is never sent.
    pub fn emit(&self, response: Response) -> BoxFuture<()> {
        let depth = self.interceptors();
        Unwind { reply: self.clone(), depth }.proceed(response)
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Reply")
            .field("interceptors", &state.interceptors.len())
            .field("markers", &state.markers)
            .field("sent", &state.sent)
            .finish()
    }
}

// ── Unwind ────────────────────────────────────────────────────────────────────

/// Continuation handed to a response handler.
///
/// Calling [`proceed`](Unwind::proceed) passes the response on to the next
/// outer interceptor, or to the transport once none are left. Dropping it
/// without proceeding stops the unwind: nothing is sent.
#[must_use = "the response is not sent unless the continuation proceeds"]
pub struct Unwind {
    reply: Reply,
    /// Interceptors at indices `..depth` are still ahead of this point.
    depth: usize,
}

impl Unwind {
    /// Passes `response` outward: runs the next outer response handler that
    /// has not fired yet, skipping those that have, or transmits it when none
    /// are left.
    pub fn proceed(self, response: Response) -> BoxFuture<()> {
        Box::pin(async move {
            let Unwind { reply, mut depth } = self;

            let next = {
                let mut state = reply.state.lock();
                let mut next = None;
                while depth > 0 {
                    depth -= 1;
                    let unit = state.interceptors[depth].unit;
                    let marker = state.marker(unit);
                    if marker.response_handled {
                        trace!(%unit, "response handler already ran, forwarding");
                        continue;
                    }
                    marker.response_handled = true;
                    let handler = Arc::clone(&state.interceptors[depth].handler);
                    next = Some((unit, handler, state.request.clone()));
                    break;
                }
                next
            };

            match next {
                Some((unit, handler, request)) => {
                    trace!(%unit, "running response handler");
                    let unwind = Unwind { reply: reply.clone(), depth };
                    handler.call(request, response, unwind).await;
                }
                None => {
                    let sink = {
                        let mut state = reply.state.lock();
                        state.sent = true;
                        state.transmit.take()
                    };
                    match sink {
                        Some(mut sink) => {
                            sink.transmit(response);
                            reply.state.lock().transmit = Some(sink);
                        }
                        None => warn!(
                            status = %response.status_code(),
                            "emit re-entered from the transport, discarding",
                        ),
                    }
                }
            }
        })
    }
}


#[cfg(test)]
mod tests {
    use std::sync::OnceLock;
    use std::time::Duration;

    use super::*;
    use super::testing::Record;

    /// A transport that looks back at its own reply while sending.
    struct Inspecting {
        reply: Arc<OnceLock<Reply>>,
        seen: Arc<Mutex<Vec<bool>>>,
    }

    impl Transmit for Inspecting {
        fn transmit(&mut self, _response: Response) {
            if let Some(reply) = self.reply.get() {
                self.seen.lock().push(reply.is_sent());
                let _ = format!("{reply:?}");
            }
        }
    }

    fn inspecting() -> (Reply, Arc<Mutex<Vec<bool>>>) {
        let slot = Arc::new(OnceLock::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Inspecting { reply: Arc::clone(&slot), seen: Arc::clone(&seen) };
        let reply = Reply::new(Request::get("/"), sink);
        slot.set(reply.clone()).expect("slot is empty");
        (reply, seen)
    }

    #[tokio::test]
    async fn transport_may_inspect_its_reply() {
        let (reply, seen) = inspecting();

        tokio::time::timeout(Duration::from_secs(1), reply.emit(Response::text("x")))
            .await
            .expect("emit finished");

        assert_eq!(*seen.lock(), [true]);
        assert!(reply.is_sent());
    }

    #[tokio::test]
    async fn emit_without_interceptors_transmits_as_given() {
        let sent = Record::default();
        let reply = Reply::new(Request::get("/"), sent.clone());
        let res = Response::builder().header("x-n", "1").text("body");

        reply.emit(res.clone()).await;

        assert_eq!(sent.sent(), [res]);
        assert_eq!(reply.interceptors(), 0);
    }
}
