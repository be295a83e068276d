use thiserror::Error;

use crate::json::PathArray;

pub type OsmosisResult<T> = Result<T, OsmosisError>;

/// The three kinds of failure spelled out in the protocol design: an action
/// that could not be applied, a protocol-level hiccup during sync, and a
/// replica invariant violation (which is fatal).
#[derive(Error, Debug)]
pub enum OsmosisError {
    #[error("action failed at {}: {message}", crate::path::display_path(.path))]
    Action {
        path: PathArray,
        message: String,
    },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("invariant violation, replica is corrupt: {0}")]
    Invariant(String),
}

impl OsmosisError {
    pub fn action(path: PathArray, message: impl Into<String>) -> Self {
        OsmosisError::Action {
            path,
            message: message.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        OsmosisError::Invariant(message.into())
    }
}

/// A single failed action, as returned in bulk from `dispatch`/`mergeOps`.
/// Never fatal on its own.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ActionFailure {
    pub path: PathArray,
    pub message: String,
}

impl std::fmt::Display for ActionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", crate::path::display_path(&self.path), self.message)
    }
}

/// Errors raised while evaluating a compiled path expression.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("expected a number, found {0}")]
    NotANumber(String),
    #[error("cannot subscript a non-container value")]
    NotAContainer,
    #[error("no such element")]
    MissingElement,
    #[error("invalid path syntax: {0}")]
    Syntax(String),
}

/// Errors surfaced by a sync session: timeouts, wrong-session frames, RPC
/// failures. Always non-fatal to the replica; the session is torn down and
/// the next connection attempt may retry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("peer is busy with a session update, retry with backoff")]
    BusyWithSessionUpdate,
    #[error("rpc call failed: {0}")]
    Rpc(String),
    #[error("received a frame for session {received} but current session is {expected}")]
    WrongSession { expected: String, received: String },
    #[error("no active session")]
    NoSession,
}

impl ProtocolError {
    /// The wire error code for `BUSY_WITH_SESSION_UPDATE`, per the protocol spec.
    pub const BUSY_WITH_SESSION_UPDATE_CODE: u32 = 101;

    pub fn code(&self) -> Option<u32> {
        match self {
            ProtocolError::BusyWithSessionUpdate => Some(Self::BUSY_WITH_SESSION_UPDATE_CODE),
            _ => None,
        }
    }
}
