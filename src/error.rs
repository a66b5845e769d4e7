//! Unified error type.

/// The error type returned by hoagie's fallible operations.
///
/// Application-level errors (404, 422, etc.) are expressed as HTTP
/// [`Response`](crate::Response) values, not as `Error`s. Middleware never
/// produces one either. This type surfaces infrastructure failures: parsing
/// the bind address, binding to a port or accepting a connection.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid socket address: {0}")]
    Addr(#[from] std::net::AddrParseError),
}
