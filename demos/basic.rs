//! Minimal hoagie example — two bidirectional middleware units around a
//! couple of endpoints.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/
//!   curl -i http://localhost:3000/users/42
//!   curl -i http://localhost:3000/missing
//!
//! The log shows `timing` and `request-id` on the way in and `request-id`,
//! then `timing` on the way out, for every request, 404s included.

use std::time::Instant;

use hoagie::middleware::Bidirectional;
use hoagie::{Method, Request, Response, Router, Server};
use http::HeaderValue;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let app = Router::new()
        .middleware(timing())
        .middleware(request_id())
        .on(Method::GET, "/",           hello)
        .on(Method::GET, "/users/{id}", get_user);

    Server::bind("0.0.0.0:3000")
        .serve(app)
        .await
        .expect("server error");
}

// Logs each request on the way in, and how long the rest of the unwind took on the way out.
fn timing() -> Bidirectional {
    Bidirectional::new("timing")
        .on_request(|req, _reply, next| async move {
            info!(method = %req.method(), path = req.path(), "timing: in");
            next.run().await
        })
        .on_response(|req, res, next| async move {
            let started = Instant::now();
            info!(path = req.path(), status = %res.status_code(), "timing: out");
            next.proceed(res).await;
            info!(elapsed = ?started.elapsed(), "timing: sent");
        })
}

// Echoes the caller's x-request-id, or stamps a default one.
fn request_id() -> Bidirectional {
    Bidirectional::new("request-id")
        .on_response(|req, mut res, next| async move {
            let id = req.header("x-request-id").unwrap_or("none").to_owned();
            info!(%id, "request-id: out");
            if let Ok(value) = HeaderValue::from_str(&id) {
                res.headers_mut().insert("x-request-id", value);
            }
            next.proceed(res).await
        })
}

async fn hello(_req: Request) -> &'static str {
    "Hello World!"
}

// GET /users/{id}
async fn get_user(req: Request) -> Response {
    let id = req.param("id").unwrap_or("unknown");
    Response::json(format!(r#"{{"id":"{id}","name":"alice"}}"#).into_bytes())
}
