//! # hoagie
//!
//! A minimal HTTP framework whose middleware wraps both ways.
//!
//! Middleware usually only runs on the way in. To act on the way out you end
//! up intercepting the response yourself. hoagie gives every middleware unit
//! a paired response hook instead, and guarantees the hooks run in reverse
//! registration order, the way a call stack unwinds:
//!
//! ```text
//! register:  a, b
//! request:   a.on_request  ─▶ b.on_request  ─▶ endpoint
//! response:  b.on_response ─▶ a.on_response ─▶ sent
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use hoagie::middleware::Bidirectional;
//! use hoagie::{Method, Request, Router, Server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = Router::new()
//!         .middleware(
//!             Bidirectional::new("a")
//!                 .on_request(|_req, _reply, next| async move { next.run().await })
//!                 .on_response(|_req, res, next| async move { next.proceed(res).await }),
//!         )
//!         .on(Method::GET, "/", hello);
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await.unwrap();
//! }
//!
//! async fn hello(_req: Request) -> &'static str {
//!     "Hello World!"
//! }
//! ```

mod error;
mod handler;
mod reply;
mod request;
mod response;
mod router;
mod server;

pub mod middleware;

pub use error::Error;
pub use handler::Handler;
pub use http::{Method, StatusCode};
pub use reply::Reply;
pub use request::Request;
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use server::Server;
