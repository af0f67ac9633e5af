//! # weave
//!
//! Middleware chains for hyper services. Nothing more. Nothing less.
//!
//! ## The contract
//!
//! A [`Chain`] is an ordered list of [`Handler`]s. Each handler gets the
//! request, the response writer, and [`Next`], the rest of the chain:
//!
//! - code before `next.run(req, rw).await` runs on the way in, in
//!   registration order;
//! - code after it runs on the way out, in reverse order;
//! - not calling `next` stops the chain right there.
//!
//! An empty chain does nothing and the client gets an empty `200 OK`.
//!
//! What weave intentionally leaves to you (or to the handlers you plug in):
//!
//! - **Routing** and URL parsing
//! - **Concrete middleware**: logging, auth, compression, panic recovery
//!
//! What weave does own:
//!
//! - Chain composition and dispatch, safe to extend while serving
//! - Async I/O on tokio + hyper, HTTP/1.1 and HTTP/2
//! - Optional TLS via rustls, validated at startup
//! - Graceful shutdown on SIGTERM / Ctrl-C, draining in-flight requests
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use weave::{Chain, StatusCode};
//!
//! #[tokio::main]
//! async fn main() {
//!     let chain = Chain::new();
//!
//!     chain.append_fn(|req, rw, next| Box::pin(async move {
//!         if req.header("authorization").is_none() {
//!             rw.write_header(StatusCode::UNAUTHORIZED);
//!             return;
//!         }
//!         next.run(req, rw).await;
//!     }));
//!
//!     chain.append_endpoint(|_req, rw| Box::pin(async move {
//!         rw.write_str("hello");
//!     }));
//!
//!     chain.run(Some("0.0.0.0:3000")).await.unwrap();
//! }
//! ```

mod chain;
mod error;
mod handler;
mod request;
mod response;
mod server;
mod tls;

pub mod config;

pub use chain::{Chain, Compiled, Next};
pub use error::{Error, Result};
pub use handler::{BoxFuture, BoxedHandler, Endpoint, Handler, HandlerFn, endpoint, handler_fn};
pub use request::Request;
pub use response::{ContentType, ResponseWriter};
pub use server::{SHUTDOWN_GRACE, Server, TLS_HANDSHAKE_TIMEOUT};

pub use http;
pub use http::StatusCode;
