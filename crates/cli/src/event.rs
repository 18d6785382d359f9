// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::error::StreamFault;

/// Logical stream a chunk of transport bytes belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selector {
    Stdout,
    Stderr,
    /// Single combined stream of a TTY-mode session.
    Merged,
}

impl Selector {
    pub fn is_stderr(&self) -> bool {
        matches!(self, Self::Stderr)
    }
}

/// One reassembled line (or, in TTY mode, one raw text chunk).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub is_stderr: bool,
    pub text: String,
}

impl OutputLine {
    pub fn new(selector: Selector, text: impl Into<String>) -> Self {
        Self { is_stderr: selector.is_stderr(), text: text.into() }
    }

    pub fn stdout(text: impl Into<String>) -> Self {
        Self { is_stderr: false, text: text.into() }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self { is_stderr: true, text: text.into() }
    }
}

/// Item delivered on a session output queue.
///
/// A `Fault` is always the final item; a queue that closes without one
/// ended cleanly (end of stream or cancellation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    Line(OutputLine),
    Fault(StreamFault),
}

/// Running/not-running transition of a [`CommandRunner`](crate::runner::CommandRunner).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStateEvent {
    pub running: bool,
    /// Monotonic per-runner transition counter.
    pub seq: u64,
}
