// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Error codes attached to faults that end a session queue abnormally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The transport failed mid-stream (connection reset, remote disposal).
    Transport,
    /// The runtime rejected or failed a follow-up call (e.g. exec inspect).
    Runtime,
    /// A write was attempted against a session without an open input side.
    NotInteractive,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "TRANSPORT",
            Self::Runtime => "RUNTIME",
            Self::NotInteractive => "NOT_INTERACTIVE",
        }
    }

    /// Build a [`StreamFault`] carrying this code.
    pub fn fault(&self, message: impl Into<String>) -> StreamFault {
        StreamFault { code: *self, message: message.into() }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal error marker delivered as the last item of an output queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFault {
    pub code: ErrorCode,
    pub message: String,
}

impl fmt::Display for StreamFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for StreamFault {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
