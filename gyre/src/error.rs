//! Error types for the gyre runtime.

use std::io;
use thiserror::Error;

/// Errors produced by event loops, channels, and pipelines.
#[derive(Debug, Error)]
pub enum Error {
    /// The operation is not supported by this channel (e.g. `connect`,
    /// `disconnect` or `flush` on a server channel).
    #[error("operation not supported by this channel")]
    UnsupportedOperation,

    /// A task was submitted to an event loop that has been shut down.
    #[error("event loop has been shut down")]
    RejectedExecution,

    /// The operation's completion token was cancelled before it could run.
    #[error("operation cancelled")]
    Cancelled,

    /// `register` was called on a channel that is already bound to an
    /// event loop.
    #[error("channel is already registered to an event loop")]
    AlreadyRegistered,

    /// A channel operation was issued before `register`.
    #[error("channel is not registered to an event loop")]
    NotRegistered,

    /// The channel has been closed.
    #[error("channel is closed")]
    ChannelClosed,

    /// No handler with the given name exists in the pipeline.
    #[error("no such handler \"{0}\" in pipeline")]
    HandlerNotFound(String),

    /// An I/O error reported by a transport.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
