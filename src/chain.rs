//! Chain construction and dispatch.
//!
//! A [`Chain`] is an ordered list of handlers. Dispatching a request calls
//! handler 0 with a [`Next`] bound to handlers `1..`; each handler decides
//! whether and when to call it. The last handler's `Next` is a no-op, so an
//! empty chain does nothing at all.
//!
//! ```text
//! [h0, h1, h2]     c(3) = no-op
//!                  c(2) = |req, rw| h2.handle(req, rw, c(3))
//!                  c(1) = |req, rw| h1.handle(req, rw, c(2))
//!   entry point →  c(0) = |req, rw| h0.handle(req, rw, c(1))
//! ```
//!
//! # Registration while serving
//!
//! The sequence is copy-on-write: it lives in an `Arc<[BoxedHandler]>` behind
//! a lock. [`append`](Chain::append) builds a new slice and swaps it in;
//! [`compile`](Chain::compile) clones the current `Arc`. A request keeps the
//! snapshot it started with, and the next request sees the new handler.

use std::future;
use std::sync::{Arc, PoisonError, RwLock};

use crate::handler::{BoxFuture, BoxedHandler, Handler, endpoint, handler_fn};
use crate::request::Request;
use crate::response::ResponseWriter;

// ── Next ──────────────────────────────────────────────────────────────────────

/// The rest of the chain, as seen from one handler.
///
/// `Next` is `Copy`: calling it is not enforced to happen once. Calling it
/// zero times stops the chain; calling it twice runs the remaining handlers
/// twice.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    rest: &'a [BoxedHandler],
}

impl<'a> Next<'a> {
    /// A continuation over `rest`, run in order.
    pub fn new(rest: &'a [BoxedHandler]) -> Self {
        Self { rest }
    }

    /// A continuation with nothing left to run. Use it to call a handler on
    /// its own, outside any chain.
    pub fn terminal() -> Next<'static> {
        Next { rest: &[] }
    }

    /// Number of handlers still ahead.
    pub fn remaining(&self) -> usize {
        self.rest.len()
    }

    /// Runs the remaining handlers. Resolves once all of them have returned.
    pub fn run<'b>(self, req: &'b mut Request, rw: &'b mut ResponseWriter) -> BoxFuture<'b, ()>
    where
        'a: 'b,
    {
        match self.rest.split_first() {
            Some((head, tail)) => head.handle(req, rw, Next { rest: tail }),
            None => Box::pin(future::ready(())),
        }
    }
}

// ── Compiled ──────────────────────────────────────────────────────────────────

/// A frozen, callable chain: the single entry point handed to the server.
///
/// Cloning is one atomic increment. Handlers appended to the originating
/// [`Chain`] after [`compile`](Chain::compile) do not show up here.
#[derive(Clone)]
pub struct Compiled {
    handlers: Arc<[BoxedHandler]>,
}

impl Compiled {
    /// Dispatches one request through the frozen sequence.
    pub async fn call(&self, req: &mut Request, rw: &mut ResponseWriter) {
        Next::new(&self.handlers).run(req, rw).await;
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

// ── Chain ─────────────────────────────────────────────────────────────────────

/// An ordered, append-only sequence of handlers.
///
/// Execution order is registration order. Duplicates are allowed. All
/// registration methods take `&self`, so a chain shared through an `Arc` can
/// keep growing while it serves requests.
///
/// ```rust
/// use weave::{Chain, Request, ResponseWriter, StatusCode};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let chain = Chain::new();
/// chain.append_fn(|req, rw, next| Box::pin(async move {
///     rw.headers_mut().insert("x-outer", "in".parse().unwrap());
///     next.run(req, rw).await;
///     rw.write_str(" after");
/// }));
/// chain.append_fn(|_req, rw, _next| Box::pin(async move {
///     // The first body write commits the status, so set it before writing.
///     rw.write_header(StatusCode::IM_A_TEAPOT);
///     rw.write_str("inner");
/// }));
///
/// let mut rw = ResponseWriter::new();
/// chain.serve_request(&mut Request::default(), &mut rw).await;
/// assert_eq!(rw.body(), b"inner after");
/// assert_eq!(rw.status(), StatusCode::IM_A_TEAPOT);
/// assert_eq!(rw.headers()["x-outer"], "in");
/// # }
/// ```
pub struct Chain {
    handlers: RwLock<Arc<[BoxedHandler]>>,
}

impl Chain {
    pub fn new() -> Self {
        Self { handlers: RwLock::new(Arc::from(Vec::new())) }
    }

    /// A chain pre-populated with `handlers`, in order.
    pub fn from_handlers(handlers: impl IntoIterator<Item = BoxedHandler>) -> Self {
        handlers.into_iter().collect()
    }

    /// Adds `handler` to the end of the chain.
    pub fn append(&self, handler: impl Handler) -> &Self {
        self.append_boxed(Arc::new(handler))
    }

    /// Adds an already type-erased handler to the end of the chain.
    pub fn append_boxed(&self, handler: BoxedHandler) -> &Self {
        let mut guard = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let mut next: Vec<BoxedHandler> = guard.iter().cloned().collect();
        next.push(handler);
        *guard = next.into();
        self
    }

    /// Adds a closure to the end of the chain. See [`handler_fn`].
    pub fn append_fn<F>(&self, f: F) -> &Self
    where
        F: for<'a> Fn(&'a mut Request, &'a mut ResponseWriter, Next<'a>) -> BoxFuture<'a, ()>
            + Send
            + Sync
            + 'static,
    {
        self.append(handler_fn(f))
    }

    /// Adds a function that runs and then always continues the chain.
    /// See [`endpoint`].
    pub fn append_endpoint<F>(&self, f: F) -> &Self
    where
        F: for<'a> Fn(&'a mut Request, &'a mut ResponseWriter) -> BoxFuture<'a, ()>
            + Send
            + Sync
            + 'static,
    {
        self.append(endpoint(f))
    }

    /// A copy of the registered sequence. Changing the returned `Vec` does
    /// not change the chain.
    pub fn handlers(&self) -> Vec<BoxedHandler> {
        self.snapshot().to_vec()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// A new, independent chain holding this chain's handlers followed by
    /// `extra`. `self` is left untouched.
    pub fn with(&self, extra: impl IntoIterator<Item = BoxedHandler>) -> Chain {
        self.snapshot().iter().cloned().chain(extra).collect()
    }

    /// Freezes the current sequence into a single entry point.
    pub fn compile(&self) -> Compiled {
        Compiled { handlers: self.snapshot() }
    }

    /// Dispatches one request through the sequence as registered right now.
    pub async fn serve_request(&self, req: &mut Request, rw: &mut ResponseWriter) {
        self.compile().call(req, rw).await;
    }

    fn snapshot(&self) -> Arc<[BoxedHandler]> {
        // The slice behind the lock is immutable, so a writer that panicked
        // cannot have left it half-updated.
        let guard = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*guard)
    }
}

impl Default for Chain {
    fn default() -> Self { Self::new() }
}

impl FromIterator<BoxedHandler> for Chain {
    fn from_iter<I: IntoIterator<Item = BoxedHandler>>(iter: I) -> Self {
        let handlers: Vec<BoxedHandler> = iter.into_iter().collect();
        Self { handlers: RwLock::new(handlers.into()) }
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain").field("handlers", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use http::StatusCode;

    use super::*;

    type Log = Arc<Mutex<Vec<String>>>;

    fn mark(log: &Log, entry: String) {
        log.lock().unwrap().push(entry);
    }

    fn push(result: &Mutex<String>, s: &str) {
        result.lock().unwrap().push_str(s);
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    /// Records `pre_i`, calls next, records `post_i`.
    fn marker(log: &Log, i: usize) -> BoxedHandler {
        let log = Arc::clone(log);
        Arc::new(handler_fn(move |req, rw, next| {
            let log = Arc::clone(&log);
            Box::pin(async move {
                mark(&log, format!("pre_{i}"));
                next.run(req, rw).await;
                mark(&log, format!("post_{i}"));
            })
        }))
    }

    /// Records `pre_i` and stops.
    fn stopper(log: &Log, i: usize) -> BoxedHandler {
        let log = Arc::clone(log);
        Arc::new(handler_fn(move |_req, _rw, _next| {
            let log = Arc::clone(&log);
            Box::pin(async move { mark(&log, format!("pre_{i}")) })
        }))
    }

    async fn dispatch(chain: &Chain) -> ResponseWriter {
        let mut req = Request::default();
        let mut rw = ResponseWriter::new();
        chain.serve_request(&mut req, &mut rw).await;
        rw
    }

    #[tokio::test]
    async fn runs_pre_in_order_and_post_in_reverse() {
        let log = Log::default();
        let chain: Chain = (0..4).map(|i| marker(&log, i)).collect();

        dispatch(&chain).await;

        assert_eq!(
            entries(&log),
            ["pre_0", "pre_1", "pre_2", "pre_3", "post_3", "post_2", "post_1", "post_0"],
        );
    }

    #[tokio::test]
    async fn handler_that_skips_next_stops_the_chain() {
        let log = Log::default();
        let chain = Chain::from_handlers([
            marker(&log, 0),
            marker(&log, 1),
            stopper(&log, 2),
            marker(&log, 3),
            marker(&log, 4),
        ]);

        dispatch(&chain).await;

        assert_eq!(entries(&log), ["pre_0", "pre_1", "pre_2", "post_1", "post_0"]);
    }

    #[tokio::test]
    async fn empty_chain_is_a_noop() {
        let chain = Chain::new();
        assert!(chain.is_empty());

        let rw = dispatch(&chain).await;

        assert_eq!(rw.status(), StatusCode::OK);
        assert!(!rw.written());
        assert!(rw.headers().is_empty());
    }

    #[tokio::test]
    async fn inner_status_is_ignored_once_an_outer_handler_wrote() {
        fn teapot(rw: &mut ResponseWriter) {
            rw.write_header(StatusCode::IM_A_TEAPOT);
            rw.write_str("inner");
        }

        let late = Chain::new();
        late.append_fn(|req, rw, next| Box::pin(async move {
            rw.write_str("before ");
            next.run(req, rw).await;
        }));
        late.append_fn(|_req, rw, _next| Box::pin(async move { teapot(rw) }));

        let rw = dispatch(&late).await;
        assert_eq!(rw.body(), b"before inner");
        assert_eq!(rw.status(), StatusCode::OK);

        let early = Chain::new();
        early.append_fn(|req, rw, next| Box::pin(async move {
            next.run(req, rw).await;
            rw.write_str(" after");
        }));
        early.append_fn(|_req, rw, _next| Box::pin(async move { teapot(rw) }));

        let rw = dispatch(&early).await;
        assert_eq!(rw.body(), b"inner after");
        assert_eq!(rw.status(), StatusCode::IM_A_TEAPOT);
    }

    #[tokio::test]
    async fn writes_accumulate_through_nested_calls() {
        let result = Arc::new(Mutex::new(String::new()));

        let chain = Chain::new();
        let r = Arc::clone(&result);
        chain.append_fn(move |req, rw, next| {
            let r = Arc::clone(&r);
            Box::pin(async move {
                push(&r, "foo");
                next.run(req, rw).await;
                push(&r, "ban");
            })
        });
        let r = Arc::clone(&result);
        chain.append_fn(move |req, rw, next| {
            let r = Arc::clone(&r);
            Box::pin(async move {
                push(&r, "bar");
                next.run(req, rw).await;
                push(&r, "baz");
            })
        });
        let r = Arc::clone(&result);
        chain.append_fn(move |_req, rw, _next| {
            let r = Arc::clone(&r);
            Box::pin(async move {
                push(&r, "bat");
                rw.write_header(StatusCode::BAD_REQUEST);
            })
        });

        let rw = dispatch(&chain).await;

        assert_eq!(*result.lock().unwrap(), "foobarbatbazban");
        assert_eq!(rw.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn handlers_returns_a_detached_copy() {
        let chain = Chain::new();
        assert_eq!(chain.handlers().len(), 0);

        chain.append_fn(|_req, rw, _next| Box::pin(async move {
            rw.write_header(StatusCode::OK);
            rw.write_str("first");
        }));

        let mut copy = chain.handlers();
        assert_eq!(copy.len(), 1);

        // The handler behaves the same when called on its own.
        let mut req = Request::default();
        let mut rw = ResponseWriter::new();
        copy[0].handle(&mut req, &mut rw, Next::terminal()).await;
        assert_eq!(rw.body(), b"first");

        copy.clear();
        copy.push(Arc::new(handler_fn(|_req, rw, _next| Box::pin(async move {
            rw.write_str("intruder");
        }))));

        assert_eq!(chain.len(), 1);
        assert_eq!(dispatch(&chain).await.body(), b"first");
    }

    #[tokio::test]
    async fn next_may_run_more_than_once() {
        let chain = Chain::new();
        chain.append_fn(|req, rw, next| Box::pin(async move {
            next.run(req, rw).await;
            next.run(req, rw).await;
        }));
        chain.append_fn(|_req, rw, _next| Box::pin(async move { rw.write_str("x") }));

        assert_eq!(dispatch(&chain).await.body(), b"xx");
    }

    #[tokio::test]
    async fn duplicates_run_once_per_registration() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let counter: BoxedHandler = Arc::new(handler_fn(move |req, rw, next| {
            h.fetch_add(1, Ordering::SeqCst);
            next.run(req, rw)
        }));

        let chain = Chain::from_handlers([counter.clone(), counter.clone(), counter]);
        dispatch(&chain).await;

        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn compiled_entry_point_is_a_snapshot() {
        let chain = Chain::new();
        chain.append_fn(|req, rw, next| Box::pin(async move {
            rw.write_str("a");
            next.run(req, rw).await;
        }));
        let frozen = chain.compile();

        chain.append_fn(|_req, rw, _next| Box::pin(async move { rw.write_str("b") }));

        let mut rw = ResponseWriter::new();
        frozen.call(&mut Request::default(), &mut rw).await;
        assert_eq!(rw.body(), b"a");
        assert_eq!(frozen.len(), 1);

        assert_eq!(dispatch(&chain).await.body(), b"ab");
    }

    #[tokio::test]
    async fn with_builds_an_independent_chain() {
        let log = Log::default();
        let base = Chain::from_handlers([marker(&log, 0)]);
        let extended = base.with([marker(&log, 1)]);

        assert_eq!(base.len(), 1);
        assert_eq!(extended.len(), 2);

        dispatch(&extended).await;
        assert_eq!(entries(&log), ["pre_0", "pre_1", "post_1", "post_0"]);
    }

    #[tokio::test]
    async fn remaining_counts_down_the_chain() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let chain = Chain::new();
        for _ in 0..3 {
            let seen = Arc::clone(&seen);
            chain.append_fn(move |req, rw, next| {
                seen.lock().unwrap().push(next.remaining());
                next.run(req, rw)
            });
        }

        dispatch(&chain).await;
        assert_eq!(*seen.lock().unwrap(), [2, 1, 0]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn appends_race_safely_with_dispatch() {
        let chain = Arc::new(Chain::new());
        let mut tasks = tokio::task::JoinSet::new();

        for _ in 0..8 {
            let chain = Arc::clone(&chain);
            tasks.spawn(async move {
                for _ in 0..50 {
                    chain.append_fn(|req, rw, next| Box::pin(async move {
                        rw.write_str(".");
                        next.run(req, rw).await;
                    }));
                    tokio::task::yield_now().await;
                }
            });
        }
        for _ in 0..8 {
            let chain = Arc::clone(&chain);
            tasks.spawn(async move {
                for _ in 0..50 {
                    let before = chain.len();
                    let rw = dispatch(&chain).await;
                    assert!(rw.size() >= before);
                    tokio::task::yield_now().await;
                }
            });
        }
        while let Some(res) = tasks.join_next().await {
            res.unwrap();
        }

        assert_eq!(chain.len(), 400);
        assert_eq!(dispatch(&chain).await.size(), 400);
    }
}
