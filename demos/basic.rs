//! Minimal weave example: a stateful handler, a short-circuiting guard, and
//! an endpoint at the end of the chain.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:8080/
//!   curl -i -H 'authorization: Bearer demo' http://localhost:8080/hello
//!
//! `PORT=3000 cargo run --example basic` moves the listener.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::info;
use tracing_subscriber::EnvFilter;
use weave::{BoxFuture, Chain, ContentType, Handler, Next, Request, ResponseWriter, StatusCode};

/// Numbers every request and logs how long the rest of the chain took.
#[derive(Default)]
struct RequestCounter {
    served: AtomicU64,
}

impl Handler for RequestCounter {
    fn handle<'a>(
        &'a self,
        req: &'a mut Request,
        rw: &'a mut ResponseWriter,
        next: Next<'a>,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let id = self.served.fetch_add(1, Ordering::Relaxed) + 1;
            let start = Instant::now();

            if let Ok(value) = id.to_string().parse() {
                rw.headers_mut().insert("x-request-id", value);
            }
            next.run(req, rw).await;

            info!(id, path = req.path(), status = rw.status().as_u16(), elapsed = ?start.elapsed(), "done");
        })
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let counter = Arc::new(RequestCounter::default());

    let chain = Chain::new();
    chain
        .append(Arc::clone(&counter))
        .append_fn(|req, rw, next| Box::pin(async move {
            // Anything without a bearer token stops here.
            if !req.header("authorization").is_some_and(|v| v.starts_with("Bearer ")) {
                rw.write_header(StatusCode::UNAUTHORIZED);
                rw.write_str("missing bearer token\n");
                return;
            }
            next.run(req, rw).await;
        }))
        .append_endpoint(|req, rw| Box::pin(async move {
            rw.content_type(ContentType::Json);
            rw.write(format!(r#"{{"path":"{}"}}"#, req.path()).as_bytes());
        }));

    // No address: `PORT` from the environment, else 0.0.0.0:8080.
    if let Err(e) = chain.run(None).await {
        eprintln!("server error: {e}");
        std::process::exit(1);
    }

    info!(served = counter.served.load(Ordering::Relaxed), "bye");
}
