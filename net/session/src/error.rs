//! Session-layer error types.

use thiserror::Error;

/// Errors surfaced by clients, servers, and sessions.
#[derive(Error, Debug)]
pub enum NetError {
    /// Binding or listening on the requested address failed
    #[error("bind failed: {0}")]
    Bind(#[source] std::io::Error),

    /// Connecting to the remote peer failed
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),

    /// The server is already listening
    #[error("already listening")]
    AlreadyListening,

    /// A connect attempt is already in flight
    #[error("connect already in progress")]
    AlreadyConnecting,

    /// The client already holds a live session
    #[error("already connected")]
    AlreadyConnected,

    /// No live session to send on
    #[error("not connected")]
    NotConnected,

    /// No registered session under the given id
    #[error("no session with id {0}")]
    SessionNotFound(String),

    /// Building the reactor runtime failed
    #[error("runtime setup failed: {0}")]
    Runtime(#[source] std::io::Error),
}

/// Worker pool errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PoolError {
    /// The pool has been shut down and accepts no further tasks
    #[error("worker pool stopped")]
    Stopped,
}
