//! Incoming HTTP request type.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Method, Uri};

/// An incoming HTTP request with its body fully buffered.
///
/// Every middleware in the chain sees the same request, so it is read-only
/// and cloning it only bumps a reference count.
#[derive(Clone, Debug)]
pub struct Request {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    params: HashMap<String, String>,
}

impl Request {
    pub(crate) fn new(
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
        params: HashMap<String, String>,
    ) -> Self {
        Self { inner: Arc::new(Inner { method, uri, headers, body, params }) }
    }

    pub fn method(&self) -> &Method { &self.inner.method }
    pub fn uri(&self) -> &Uri { &self.inner.uri }
    pub fn path(&self) -> &str { self.inner.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.inner.headers }
    pub fn body(&self) -> &[u8] { &self.inner.body }

    /// Header lookup. Names are case-insensitive; non-UTF-8 values read as `None`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.inner.params.get(key).map(String::as_str)
    }
}

#[cfg(test)]
impl Request {
    pub(crate) fn get(path: &str) -> Self {
        let uri = path.parse().expect("valid test uri");
        Self::new(Method::GET, uri, HeaderMap::new(), Bytes::new(), HashMap::new())
    }
}
