// src/core/errors.rs

//! Defines the primary error type for the entire application.

use thiserror::Error;

/// The main error enum, representing all failures surfaced by the server.
///
/// Variants that can reach a client render their full RESP error payload
/// (leading code word included) through `Display`, so replying is always
/// `RespFrame::Error(err.to_string())`.
#[derive(Error, Debug)]
pub enum StrataError {
    #[error("ERR IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parser-internal: the buffer does not yet hold a complete frame.
    #[error("ERR incomplete frame")]
    IncompleteData,

    #[error("ERR Protocol error: {0}")]
    Protocol(String),

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArgumentCount(String),

    /// Admission failed: duplicate fd or client cap reached.
    #[error("ERR {0}")]
    AcceptRejected(String),

    /// An admin operation referenced an fd or id that is no longer present.
    #[error("ERR connection doesn't exist")]
    ConnectionGone,

    /// Socket, bind, listen, or sockopt failure at startup. Fatal.
    #[error("ERR failed to listen: {0}")]
    ListenFailed(String),

    #[error("NOAUTH Authentication required")]
    AuthRequired,

    #[error("ERR invalid password")]
    InvalidPassword,

    #[error("ERR {0}")]
    InvalidState(String),

    #[error("ERR storage error: {0}")]
    Storage(#[from] sled::Error),
}
