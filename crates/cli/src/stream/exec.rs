// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bidirectional exec sessions.
//!
//! An exec session runs two tasks: the output driver (transport reads into
//! the session queue, then teardown) and the input pump (sink writes into
//! the transport). Teardown always runs in the same order:
//!
//! 1. stop the input pump and wait, bounded, for it to half-close the
//!    transport's write side (aborted if it overruns)
//! 2. dispose the transport
//! 3. complete the output queue (with a trailing fault, if any)
//! 4. publish the exit code
//!
//! so a resolved [`ExitCode`] means the session is fully torn down.

use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{deliver, ExitCode, ExitPublisher, OutputPump, PumpEnd, StreamSettings, EXIT_SENTINEL};
use crate::error::{ErrorCode, StreamFault};
use crate::event::OutputEvent;
use crate::runtime::{ExecInspect, ExecTransport, FrameRead, FrameWrite, RuntimeClient};

/// Buffered input items before `InputSink` writes start waiting.
const INPUT_CAPACITY: usize = 64;

/// What to run and how to attach to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub container_id: String,
    pub argv: Vec<String>,
    pub tty: bool,
    pub attach_stdin: bool,
}

/// One item of exec input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecInput {
    /// Text framed with [`frame_input`] before it is written.
    Line(String),
    /// Bytes written verbatim (control characters, pastes).
    Raw(Bytes),
}

/// Normalize a line of input so it always ends with a line break.
///
/// A terminal's line discipline ends lines on carriage return, so TTY
/// sessions get every break as `\r`; pipe sessions keep `\n`.
pub fn frame_input(text: &str, tty: bool) -> String {
    let mut framed = text.replace("\r\n", "\n");
    if !framed.ends_with('\n') {
        framed.push('\n');
    }
    if tty {
        framed = framed.replace('\n', "\r");
    }
    framed
}

/// Producer half of a session's input queue.
#[derive(Debug, Clone)]
pub struct InputSink {
    tx: mpsc::Sender<ExecInput>,
}

impl InputSink {
    /// Queue a line of input. Returns `false` once the session's input side
    /// is gone.
    pub async fn write_line(&self, text: impl Into<String>) -> bool {
        self.tx.send(ExecInput::Line(text.into())).await.is_ok()
    }

    /// Queue raw bytes. Returns `false` once the session's input side is gone.
    pub async fn write_raw(&self, data: impl Into<Bytes>) -> bool {
        self.tx.send(ExecInput::Raw(data.into())).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer-facing handles of a started exec session.
#[derive(Debug)]
pub struct ExecIo {
    pub id: Uuid,
    /// Runtime-assigned exec instance id.
    pub exec_id: String,
    pub events: mpsc::Receiver<OutputEvent>,
    /// `None` when the session was started without stdin attached.
    pub input: Option<InputSink>,
    pub exit: ExitCode,
    /// Session-local cancellation; cancelling it tears the session down.
    pub stop: CancellationToken,
}

/// Entry point for exec sessions.
pub struct ExecSession;

impl ExecSession {
    /// Create and attach an exec instance, then start its pumps.
    ///
    /// The session stops on its own at end of stream or on a transport
    /// fault, and whenever `cancel` or the returned `stop` token fires.
    pub async fn start(
        client: Arc<dyn RuntimeClient>,
        request: ExecRequest,
        cancel: &CancellationToken,
        settings: &StreamSettings,
    ) -> anyhow::Result<ExecIo> {
        let exec_id = client
            .create_exec(&request.container_id, &request.argv, request.tty)
            .await
            .with_context(|| format!("create exec in {}", request.container_id))?;
        let ExecTransport { reader, writer } = client
            .attach_exec(&exec_id, request.tty)
            .await
            .with_context(|| format!("attach exec {exec_id}"))?;

        let id = Uuid::new_v4();
        let stop = cancel.child_token();
        let input_stop = stop.child_token();
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let (publisher, exit) = ExitCode::channel();

        let (input, input_task) = if request.attach_stdin {
            let (in_tx, in_rx) = mpsc::channel(INPUT_CAPACITY);
            let task = tokio::spawn(pump_input(id, request.tty, writer, in_rx, input_stop.clone()));
            (Some(InputSink { tx: in_tx }), task)
        } else {
            (None, tokio::spawn(close_input(id, writer)))
        };

        info!(
            session = %id,
            exec = %exec_id,
            container = %request.container_id,
            tty = request.tty,
            stdin = request.attach_stdin,
            "exec session started"
        );

        let driver = OutputDriver {
            id,
            client,
            exec_id: exec_id.clone(),
            reader,
            tx,
            stop: stop.clone(),
            input_stop,
            input_task,
            exit: publisher,
            pump: OutputPump::new(request.tty, settings.chunk_size),
            settings: settings.clone(),
        };
        tokio::spawn(driver.run());

        Ok(ExecIo { id, exec_id, events: rx, input, exit, stop })
    }
}

struct OutputDriver {
    id: Uuid,
    client: Arc<dyn RuntimeClient>,
    exec_id: String,
    reader: Box<dyn FrameRead>,
    tx: mpsc::Sender<OutputEvent>,
    stop: CancellationToken,
    input_stop: CancellationToken,
    input_task: JoinHandle<()>,
    exit: ExitPublisher,
    pump: OutputPump,
    settings: StreamSettings,
}

impl OutputDriver {
    async fn run(mut self) {
        let end = self.pump.run(self.reader.as_mut(), &self.tx, &self.stop).await;
        self.pump.flush(&self.tx, &self.stop).await;

        let (code, fault) = match end {
            PumpEnd::Eof => query_exit(Arc::clone(&self.client), self.exec_id.clone(), self.id).await,
            PumpEnd::Cancelled => {
                debug!(session = %self.id, "exec session cancelled");
                (EXIT_SENTINEL, None)
            }
            PumpEnd::ConsumerGone => {
                debug!(session = %self.id, "exec consumer went away");
                self.stop.cancel();
                (EXIT_SENTINEL, None)
            }
            PumpEnd::Fault(e) => {
                warn!(session = %self.id, "exec transport fault: {e}");
                (EXIT_SENTINEL, Some(ErrorCode::Transport.fault(e.to_string())))
            }
        };
        self.teardown(code, fault).await;
    }

    async fn teardown(mut self, code: i64, fault: Option<StreamFault>) {
        self.input_stop.cancel();
        let drain = self.settings.input_drain_timeout;
        if tokio::time::timeout(drain, &mut self.input_task).await.is_err() {
            warn!(session = %self.id, "input pump did not finish within {drain:?}, aborting");
            self.input_task.abort();
        }
        self.reader.dispose().await;

        if let Some(fault) = fault {
            deliver(&self.tx, OutputEvent::Fault(fault), &self.stop).await;
        }
        drop(self.tx);

        debug!(session = %self.id, code, "exec session finished");
        self.exit.resolve(code);
    }
}

async fn query_exit(client: Arc<dyn RuntimeClient>, exec_id: String, id: Uuid) -> (i64, Option<StreamFault>) {
    match client.inspect_exec(&exec_id).await {
        Ok(ExecInspect { exit_code: Some(code), .. }) => (code, None),
        Ok(ExecInspect { exit_code: None, running }) => {
            debug!(session = %id, running, "exec ended without an exit code");
            (EXIT_SENTINEL, None)
        }
        Err(e) => {
            warn!(session = %id, "exec inspect failed: {e:#}");
            (EXIT_SENTINEL, Some(ErrorCode::Runtime.fault(format!("{e:#}"))))
        }
    }
}

/// Forward queued input to the transport until the sink is dropped, a write
/// fails, or `stop` fires; then half-close the write side.
async fn pump_input(
    id: Uuid,
    tty: bool,
    mut writer: Box<dyn FrameWrite>,
    mut rx: mpsc::Receiver<ExecInput>,
    stop: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            item = rx.recv() => item,
        };
        let data = match item {
            Some(ExecInput::Line(text)) => Bytes::from(frame_input(&text, tty)),
            Some(ExecInput::Raw(data)) => data,
            None => break,
        };
        let written = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            r = writer.write_all(&data) => r,
        };
        if let Err(e) = written {
            debug!(session = %id, "exec input write failed: {e}");
            break;
        }
    }
    // Refuse further sink writes before the half-close.
    rx.close();
    close_input(id, writer).await;
}

async fn close_input(id: Uuid, mut writer: Box<dyn FrameWrite>) {
    if let Err(e) = writer.close_write().await {
        debug!(session = %id, "exec input half-close failed: {e}");
    }
}

#[cfg(test)]
#[path = "exec_tests.rs"]
mod tests;
