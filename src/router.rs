//! Radix-tree request router and middleware registration.
//!
//! One tree per HTTP method. O(path-length) lookup. Middleware is registered
//! on the router too and wraps every request, matched or not.

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use matchit::Router as MatchitRouter;

use crate::handler::{self, BoxedHandler, Handler};
use crate::middleware::{BoxedMiddleware, Middleware};

/// The application router.
///
/// Build it once at startup; pass it to [`Server::serve`](crate::Server::serve).
/// Every builder method returns `self` so registrations chain naturally.
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
    layers: Arc<[BoxedMiddleware]>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new(), layers: Arc::from(Vec::new()) }
    }

    /// Register an endpoint for a method + path pair. Returns `self` for chaining.
    ///
    /// Path parameters use `{name}` syntax — `req.param("name")` retrieves them:
    ///
    /// ```rust,no_run
    /// # use hoagie::{Method, Request, Response, Router};
    /// # async fn get_user(_: Request) -> Response { Response::text("") }
    /// # async fn create_user(_: Request) -> Response { Response::text("") }
    /// Router::new()
    ///     .on(Method::GET,  "/users/{id}", get_user)
    ///     .on(Method::POST, "/users",      create_user);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route or conflicts with one already registered.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler.into_boxed_handler())
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    /// Append `middleware` to the chain. Middleware runs in the order it is added.
    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        let mut layers = self.layers.to_vec();
        layers.push(Arc::new(middleware));
        self.layers = layers.into();
        self
    }

    pub(crate) fn layers(&self) -> Arc<[BoxedMiddleware]> {
        Arc::clone(&self.layers)
    }

    /// Resolves the endpoint for a request. Unmatched requests get the
    /// built-in 404 endpoint.
    pub(crate) fn lookup(
        &self,
        method: &Method,
        path: &str,
    ) -> (BoxedHandler, HashMap<String, String>) {
        let matched = self.routes.get(method).and_then(|tree| tree.at(path).ok());
        match matched {
            Some(matched) => {
                let params = matched.params.iter()
                    .map(|(k, v)| (k.to_owned(), v.to_owned()))
                    .collect();
                (Arc::clone(matched.value), params)
            }
            None => (handler::not_found.into_boxed_handler(), HashMap::new()),
        }
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Request;

    async fn user(req: Request) -> String {
        format!("user {}", req.param("id").unwrap_or("?"))
    }

    #[tokio::test]
    async fn lookup_extracts_params() {
        let router = Router::new().on(Method::GET, "/users/{id}", user);
        let (endpoint, params) = router.lookup(&Method::GET, "/users/42");
        assert_eq!(params.get("id").map(String::as_str), Some("42"));

        let res = endpoint.call(Request::get("/users/42")).await;
        assert_eq!(res.status_code(), http::StatusCode::OK);
    }

    #[tokio::test]
    async fn unmatched_method_or_path_is_404() {
        let router = Router::new().on(Method::GET, "/users/{id}", user);

        for (method, path) in [(Method::POST, "/users/42"), (Method::GET, "/nope")] {
            let (endpoint, params) = router.lookup(&method, path);
            assert!(params.is_empty());
            let res = endpoint.call(Request::get(path)).await;
            assert_eq!(res.status_code(), http::StatusCode::NOT_FOUND);
        }
    }

    #[test]
    fn middleware_keeps_registration_order() {
        use crate::middleware::Bidirectional;

        let a = Bidirectional::new("a");
        let b = Bidirectional::new("b");
        let router = Router::new().middleware(a).middleware(b);
        assert_eq!(router.layers().len(), 2);
    }

    #[test]
    #[should_panic(expected = "invalid route")]
    fn conflicting_route_panics() {
        let _ = Router::new()
            .on(Method::GET, "/users/{id}", user)
            .on(Method::GET, "/users/{name}", user);
    }
}
