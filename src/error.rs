//! Closed error taxonomy shared across all components.
//!
//! Every fallible operation returns a status; nothing panics across a
//! component boundary. Module-local error types (e.g. the latency
//! tracker's) convert into this taxonomy at the boundary.

use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Unclassified failures.
    #[error("{0}")]
    Generic(String),
    /// Argument parsing failures.
    #[error("cli: {0}")]
    Cli(String),
    /// Bind, listen, accept or send failures, peer loss, double close.
    #[error("server: {0}")]
    Server(String),
    /// Connect or receive failures, bad buffer sizes, double close.
    #[error("client: {0}")]
    Client(String),
    /// File I/O failures.
    #[error("i/o: {0}")]
    Io(#[source] io::Error),
}

impl Error {
    pub fn generic(msg: impl Into<String>) -> Self {
        Error::Generic(msg.into())
    }

    pub fn server(msg: impl Into<String>) -> Self {
        Error::Server(msg.into())
    }

    pub fn client(msg: impl Into<String>) -> Self {
        Error::Client(msg.into())
    }
}
