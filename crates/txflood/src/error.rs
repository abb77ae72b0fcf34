//! Structured errors returned by the RPC client seam.

use alloy_transport::{RpcError, TransportError};
use derive_more::{Display, Error};

/// JSON-RPC "method not found".
const METHOD_NOT_FOUND: i64 = -32601;

/// Substrings that mark an otherwise unstructured error as a connection problem.
const TRANSIENT_MARKERS: &[&str] = &["timeout", "timed out", "connection", "reset", "EOF"];

/// How a failed RPC call should be treated by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ErrorKind {
    /// Connection-level failure (reset, timeout, stream closed). Worth retrying.
    #[display("transient")]
    Transient,
    /// The node answered and refused the request (validation, nonce conflict, ...).
    #[display("rejected")]
    Rejected,
    /// The endpoint does not expose the requested capability.
    #[display("unsupported")]
    Unsupported,
}

/// Error returned by every [`ChainClient`](crate::ChainClient) call.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
#[display("{message}")]
pub struct ClientError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ClientError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Rejected, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, message)
    }

    pub const fn is_transient(&self) -> bool {
        matches!(self.kind, ErrorKind::Transient)
    }

    pub const fn is_unsupported(&self) -> bool {
        matches!(self.kind, ErrorKind::Unsupported)
    }

    /// Classifies an alloy transport error.
    ///
    /// Transport failures are transient, error responses from the node are
    /// rejections (or `Unsupported` for unknown methods). Anything else falls
    /// back to [`classify_message`].
    pub fn from_rpc(err: TransportError) -> Self {
        let message = err.to_string();
        match err {
            RpcError::Transport(_) => Self::transient(message),
            RpcError::ErrorResp(payload) if payload.code == METHOD_NOT_FOUND => {
                Self::unsupported(message)
            }
            RpcError::ErrorResp(_) => Self::rejected(message),
            _ => Self::new(classify_message(&message), message),
        }
    }
}

/// Fallback classification for errors that only carry text.
pub fn classify_message(message: &str) -> ErrorKind {
    if TRANSIENT_MARKERS.iter().any(|marker| message.contains(marker)) {
        ErrorKind::Transient
    } else {
        ErrorKind::Rejected
    }
}
