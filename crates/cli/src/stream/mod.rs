// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Streaming sessions: log-only and bidirectional exec.
//!
//! Both share [`OutputPump`], which reads transport chunks, reassembles
//! lines (or forwards raw TTY text) and hands them to a bounded queue.

pub mod exec;
pub mod logs;

use std::io;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::event::{OutputEvent, OutputLine, Selector};
use crate::reassemble::LineReassembler;
use crate::runtime::FrameRead;

pub use exec::{frame_input, ExecInput, ExecIo, ExecRequest, ExecSession, InputSink};
pub use logs::{LogStream, LogStreamer};

/// Exit code reported when a session ended without a runtime-provided one
/// (cancellation, transport fault, failed inspect).
pub const EXIT_SENTINEL: i64 = -1;

/// Tuning knobs shared by log and exec sessions.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Transport read size in bytes.
    pub chunk_size: usize,
    /// Capacity of each session's output queue.
    pub queue_capacity: usize,
    /// Upper bound on waiting for the input pump during exec teardown.
    pub input_drain_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self { chunk_size: 8192, queue_capacity: 256, input_drain_timeout: Duration::from_secs(2) }
    }
}

/// Eventually resolves to the exit code of an exec session.
///
/// Cloneable; every clone resolves to the same value. Resolves to
/// [`EXIT_SENTINEL`] if the session is dropped without publishing one, so
/// awaiting it never hangs past the session's teardown.
#[derive(Debug, Clone)]
pub struct ExitCode {
    rx: watch::Receiver<Option<i64>>,
}

/// Publishing half of [`ExitCode`], owned by the session's output driver.
#[derive(Debug)]
pub struct ExitPublisher {
    tx: watch::Sender<Option<i64>>,
}

impl ExitCode {
    pub fn channel() -> (ExitPublisher, ExitCode) {
        let (tx, rx) = watch::channel(None);
        (ExitPublisher { tx }, ExitCode { rx })
    }

    /// Wait for the exit code.
    pub async fn wait(mut self) -> i64 {
        match self.rx.wait_for(Option::is_some).await {
            Ok(code) => code.unwrap_or(EXIT_SENTINEL),
            Err(_) => EXIT_SENTINEL,
        }
    }

    /// The exit code if it has already been published.
    pub fn peek(&self) -> Option<i64> {
        *self.rx.borrow()
    }
}

impl ExitPublisher {
    pub fn resolve(self, code: i64) {
        let _ = self.tx.send(Some(code));
    }
}

/// Hand an event to the consumer queue.
///
/// Waits for queue capacity unless `cancel` fires first, in which case the
/// event is only delivered if it fits without waiting. Returns `false` when
/// the event was not delivered.
pub(crate) async fn deliver(
    tx: &mpsc::Sender<OutputEvent>,
    event: OutputEvent,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        permit = tx.reserve() => match permit {
            Ok(permit) => {
                permit.send(event);
                true
            }
            Err(_) => false,
        },
        _ = cancel.cancelled() => tx.try_send(event).is_ok(),
    }
}

/// Why an output pump stopped reading.
#[derive(Debug)]
pub(crate) enum PumpEnd {
    /// Zero-length read.
    Eof,
    Cancelled,
    /// The consumer dropped the output queue.
    ConsumerGone,
    Fault(io::Error),
}

/// Reads a transport until end of stream, cancellation or fault, pushing
/// reassembled lines into the session queue.
pub(crate) struct OutputPump {
    reassembler: LineReassembler,
    tty: bool,
    buf: Vec<u8>,
}

impl OutputPump {
    pub fn new(tty: bool, chunk_size: usize) -> Self {
        Self { reassembler: LineReassembler::new(), tty, buf: vec![0u8; chunk_size.max(1)] }
    }

    pub async fn run(
        &mut self,
        reader: &mut dyn FrameRead,
        tx: &mpsc::Sender<OutputEvent>,
        cancel: &CancellationToken,
    ) -> PumpEnd {
        loop {
            // Dropping the parked read is what unblocks a follow-mode stream.
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return PumpEnd::Cancelled,
                read = reader.read_frame(&mut self.buf) => read,
            };
            let (selector, n) = match read {
                Ok((_, 0)) => return PumpEnd::Eof,
                Ok(frame) => frame,
                Err(e) => return PumpEnd::Fault(e),
            };

            let lines = self.decode(selector, n);
            for line in lines {
                if !deliver(tx, OutputEvent::Line(line), cancel).await {
                    return if cancel.is_cancelled() { PumpEnd::Cancelled } else { PumpEnd::ConsumerGone };
                }
            }
        }
    }

    fn decode(&mut self, selector: Selector, n: usize) -> Vec<OutputLine> {
        let chunk = &self.buf[..n];
        if self.tty {
            self.reassembler
                .forward_raw(chunk)
                .map(|text| OutputLine::new(selector, text))
                .into_iter()
                .collect()
        } else {
            self.reassembler
                .feed(selector, chunk)
                .into_iter()
                .map(|text| OutputLine::new(selector, text))
                .collect()
        }
    }

    /// Emit whatever the carry buffers still hold.
    pub async fn flush(&mut self, tx: &mpsc::Sender<OutputEvent>, cancel: &CancellationToken) {
        for (selector, text) in self.reassembler.flush_all() {
            if !deliver(tx, OutputEvent::Line(OutputLine::new(selector, text)), cancel).await {
                break;
            }
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
