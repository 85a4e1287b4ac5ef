// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Errors surfaced by the messaging core.
///
/// Nothing in the core panics or propagates these across a callback
/// boundary: they are recorded in store state, handed to the error hook, or
/// returned from the call that caused them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// Socket-level failure or abnormal close. Reconnect is automatic.
    #[error("transport error: {0}")]
    Transport(String),
    /// Malformed frame or a protocol ERROR frame from the broker.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// No message arrived on a one-shot subscription in time.
    #[error("timeout waiting for message on {destination}")]
    Timeout { destination: String },
    /// A one-shot subscription was torn down before anything arrived.
    #[error("subscription to {destination} was cancelled")]
    Cancelled { destination: String },
    /// Publish or subscribe before the client is active.
    #[error("client is not connected")]
    NotConnected,
    /// Outbound conversation action before `init` completed.
    #[error("conversation is not initialized")]
    NoConversation,
    /// Outbound payload could not be encoded.
    #[error("failed to encode payload: {0}")]
    Encode(String),
}

impl ChatError {
    /// Stable machine-readable code, used in logs and by UI consumers.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Transport(_) => ErrorCode::Transport,
            Self::Protocol(_) | Self::Encode(_) => ErrorCode::Protocol,
            Self::Timeout { .. } | Self::Cancelled { .. } => ErrorCode::Correlation,
            Self::NotConnected | Self::NoConversation => ErrorCode::Misuse,
        }
    }

    /// Whether the connection layer recovers from this on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self.code(), ErrorCode::Transport | ErrorCode::Protocol)
    }
}

/// Error taxonomy shared by the store, the pipeline and log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Transport,
    Protocol,
    Correlation,
    Misuse,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "TRANSPORT",
            Self::Protocol => "PROTOCOL",
            Self::Correlation => "CORRELATION",
            Self::Misuse => "MISUSE",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
