//! The handler capability and its function adapters.
//!
//! # How handlers are stored
//!
//! A chain holds handlers of *different* types in one sequence, so every
//! handler is kept behind a trait object (`Arc<dyn Handler>`). The trait's
//! single method returns a boxed future, which keeps it object safe.
//!
//! There are two ways to produce a handler:
//!
//! ```text
//! struct Auth { .. }   impl Handler for Auth { .. }      ← a named type
//!
//! handler_fn(|req, rw, next| Box::pin(async move {      ← a plain closure,
//!     next.run(req, rw).await;                             wrapped in the
//! }))                                                      HandlerFn adapter
//! ```
//!
//! Closures must go through [`handler_fn`] (or [`Chain::append_fn`]) rather
//! than implementing `Handler` directly: the adapter's `Fn` bound is what lets
//! the compiler infer the higher-ranked closure signature.
//!
//! [`Chain::append_fn`]: crate::Chain::append_fn

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::chain::Next;
use crate::request::Request;
use crate::response::ResponseWriter;

/// A heap-allocated, type-erased future borrowing from the request it serves.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A type-erased handler shared by every request the chain serves.
pub type BoxedHandler = Arc<dyn Handler>;

/// One unit of request processing in a chain.
///
/// `handle` receives the request, the response sink, and `next`, the rest of
/// the chain. Code before `next.run(req, rw).await` runs on the way in; code
/// after it runs once every later handler has returned. Returning without
/// calling `next` ends the chain for this request.
///
/// ```rust
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use weave::{BoxFuture, Handler, Next, Request, ResponseWriter};
///
/// #[derive(Default)]
/// struct Counter(AtomicUsize);
///
/// impl Handler for Counter {
///     fn handle<'a>(
///         &'a self,
///         req: &'a mut Request,
///         rw: &'a mut ResponseWriter,
///         next: Next<'a>,
///     ) -> BoxFuture<'a, ()> {
///         self.0.fetch_add(1, Ordering::Relaxed);
///         next.run(req, rw)
///     }
/// }
/// ```
pub trait Handler: Send + Sync + 'static {
    fn handle<'a>(
        &'a self,
        req: &'a mut Request,
        rw: &'a mut ResponseWriter,
        next: Next<'a>,
    ) -> BoxFuture<'a, ()>;
}

/// Sharing a handler keeps it a handler. Lets the owner of a stateful handler
/// register one `Arc` and keep another to inspect the state.
impl<H> Handler for Arc<H>
where
    H: Handler + ?Sized,
{
    fn handle<'a>(
        &'a self,
        req: &'a mut Request,
        rw: &'a mut ResponseWriter,
        next: Next<'a>,
    ) -> BoxFuture<'a, ()> {
        (**self).handle(req, rw, next)
    }
}

// ── HandlerFn ─────────────────────────────────────────────────────────────────

/// Adapter that lets a plain function or closure act as a [`Handler`].
#[derive(Clone, Copy)]
pub struct HandlerFn<F>(F);

/// Wraps `f` in a [`HandlerFn`].
///
/// ```rust
/// use weave::{handler_fn, StatusCode};
///
/// let deny = handler_fn(|_req, rw, _next| Box::pin(async move {
///     rw.write_header(StatusCode::FORBIDDEN);
/// }));
/// # let _ = deny;
/// ```
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut ResponseWriter, Next<'a>) -> BoxFuture<'a, ()>
        + Send
        + Sync
        + 'static,
{
    HandlerFn(f)
}

impl<F> Handler for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut ResponseWriter, Next<'a>) -> BoxFuture<'a, ()>
        + Send
        + Sync
        + 'static,
{
    fn handle<'a>(
        &'a self,
        req: &'a mut Request,
        rw: &'a mut ResponseWriter,
        next: Next<'a>,
    ) -> BoxFuture<'a, ()> {
        (self.0)(req, rw, next)
    }
}

// ── Endpoint ──────────────────────────────────────────────────────────────────

/// Adapter for functions that know nothing about chaining.
///
/// The wrapped function runs first; the rest of the chain always runs after
/// it. This is how an ordinary request handler is placed in the middle (or at
/// the end) of a chain.
#[derive(Clone, Copy)]
pub struct Endpoint<F>(F);

/// Wraps `f` in an [`Endpoint`].
pub fn endpoint<F>(f: F) -> Endpoint<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut ResponseWriter) -> BoxFuture<'a, ()>
        + Send
        + Sync
        + 'static,
{
    Endpoint(f)
}

impl<F> Handler for Endpoint<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut ResponseWriter) -> BoxFuture<'a, ()>
        + Send
        + Sync
        + 'static,
{
    fn handle<'a>(
        &'a self,
        req: &'a mut Request,
        rw: &'a mut ResponseWriter,
        next: Next<'a>,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            (self.0)(&mut *req, &mut *rw).await;
            next.run(req, rw).await;
        })
    }
}
