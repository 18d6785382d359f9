// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal presentation for the `berth` subcommands.
//!
//! Every function here is generic over its readers and writers so the
//! binary can hand in stdio and tests can hand in byte buffers.

use std::borrow::Cow;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::ansi::AnsiSanitizer;
use crate::error::ErrorCode;
use crate::event::{OutputEvent, OutputLine};
use crate::runner::{CommandRunner, RunOptions};
use crate::runtime::{LogRequest, RuntimeClient};
use crate::stream::{ExecRequest, ExecSession, InputSink, LogStreamer, StreamSettings};

/// Line that restarts the shell in `berth shell`.
pub const RESTART_COMMAND: &str = ":restart";

/// Writes session output to a stdout/stderr pair.
pub struct Console<O, E> {
    out: O,
    err: E,
    /// Whether the last byte written to `out` ended a line.
    at_line_start: bool,
}

impl<O, E> Console<O, E>
where
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    pub fn new(out: O, err: E) -> Self {
        Self { out, err, at_line_start: true }
    }

    pub fn into_inner(self) -> (O, E) {
        (self.out, self.err)
    }

    /// Print a reassembled log line, cleaned unless `raw`. Blank lines are
    /// dropped after cleaning.
    pub async fn log_line(&mut self, line: &OutputLine, raw: bool) -> anyhow::Result<()> {
        let text = if raw { Cow::Borrowed(line.text.as_str()) } else { AnsiSanitizer::clean(&line.text) };
        if !raw && AnsiSanitizer::is_blank(&text) {
            return Ok(());
        }
        if line.is_stderr {
            write_line(&mut self.err, &text).await
        } else {
            write_line(&mut self.out, &text).await
        }
    }

    /// Print exec output: TTY chunks verbatim, separate-stream lines with a
    /// newline appended.
    pub async fn exec_output(&mut self, line: &OutputLine, tty: bool) -> anyhow::Result<()> {
        if line.is_stderr {
            return write_line(&mut self.err, &line.text).await;
        }
        self.out.write_all(line.text.as_bytes()).await?;
        if tty {
            self.at_line_start = line.text.ends_with('\n');
        } else {
            self.out.write_all(b"\n").await?;
            self.at_line_start = true;
        }
        self.out.flush().await?;
        Ok(())
    }

    pub async fn marker(&mut self, tag: &str, message: impl std::fmt::Display) -> anyhow::Result<()> {
        self.err.write_all(format!("[{tag}] {message}\n").as_bytes()).await?;
        self.err.flush().await?;
        Ok(())
    }

    pub async fn exit(&mut self, code: i64) -> anyhow::Result<()> {
        if !self.at_line_start {
            self.out.write_all(b"\n").await?;
            self.at_line_start = true;
        }
        self.out.write_all(format!("[exit] {code}\n").as_bytes()).await?;
        self.out.flush().await?;
        Ok(())
    }
}

async fn write_line<W: AsyncWrite + Unpin>(w: &mut W, text: &str) -> anyhow::Result<()> {
    w.write_all(text.as_bytes()).await?;
    w.write_all(b"\n").await?;
    w.flush().await?;
    Ok(())
}

/// `berth logs`: print a log stream until it ends or `cancel` fires.
///
/// Returns the process exit status: 1 if the stream ended with a fault.
pub async fn stream_logs<O, E>(
    client: Arc<dyn RuntimeClient>,
    request: LogRequest,
    raw: bool,
    settings: StreamSettings,
    cancel: &CancellationToken,
    console: &mut Console<O, E>,
) -> anyhow::Result<i32>
where
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let mut streamer = LogStreamer::new(client, settings);
    let mut stream = streamer.start(request, cancel).await?;
    let mut status = 0;
    while let Some(event) = stream.events.recv().await {
        match event {
            OutputEvent::Line(line) => console.log_line(&line, raw).await?,
            OutputEvent::Fault(fault) => {
                console.marker("log-error", &fault).await?;
                status = 1;
            }
        }
    }
    streamer.stop().await;
    Ok(status)
}

/// `berth exec`: run one command, forwarding `input` lines when stdin is
/// attached, and print its exit code.
pub async fn run_exec<O, E, R>(
    client: Arc<dyn RuntimeClient>,
    request: ExecRequest,
    settings: StreamSettings,
    cancel: &CancellationToken,
    input: Option<R>,
    console: &mut Console<O, E>,
) -> anyhow::Result<i64>
where
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let tty = request.tty;
    let mut io = ExecSession::start(client, request, cancel, &settings).await?;
    let forwarder = match (io.input.take(), input) {
        (Some(sink), Some(reader)) => Some(tokio::spawn(forward_lines(reader, sink))),
        _ => None,
    };

    while let Some(event) = io.events.recv().await {
        match event {
            OutputEvent::Line(line) => console.exec_output(&line, tty).await?,
            OutputEvent::Fault(fault) => console.marker("exec-error", &fault).await?,
        }
    }
    if let Some(forwarder) = forwarder {
        forwarder.abort();
    }

    let code = io.exit.wait().await;
    console.exit(code).await?;
    Ok(code)
}

async fn forward_lines<R>(reader: R, sink: InputSink)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if !sink.write_line(line).await {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!("stdin read failed: {e}");
                break;
            }
        }
    }
    // Dropping the sink half-closes the exec's stdin.
}

/// `berth shell`: interactive shell session driven by `input` lines.
///
/// A line equal to [`RESTART_COMMAND`] re-runs the shell; each message on
/// `interrupts` sends Ctrl-C; end of input is passed on to the shell and
/// the session runs until the shell exits.
pub async fn run_shell<O, E, R>(
    runner: &CommandRunner,
    container: &str,
    shell: &str,
    input: R,
    mut interrupts: mpsc::Receiver<()>,
    console: &mut Console<O, E>,
) -> anyhow::Result<i64>
where
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
    R: AsyncBufRead + Unpin,
{
    let argv = vec![shell.to_owned()];
    let mut run = runner.run(container, argv.clone(), RunOptions::interactive()).await?;
    let mut lines = input.lines();
    let mut input_open = true;

    loop {
        tokio::select! {
            event = run.events.recv() => match event {
                Some(OutputEvent::Line(line)) => console.exec_output(&line, true).await?,
                Some(OutputEvent::Fault(fault)) => console.marker("exec-error", &fault).await?,
                None => break,
            },
            line = lines.next_line(), if input_open => match line? {
                Some(line) if line.trim() == RESTART_COMMAND => {
                    run = runner.run(container, argv.clone(), RunOptions::interactive()).await?;
                }
                Some(line) => {
                    if !runner.try_write_to_interactive(&line).await {
                        let fault = ErrorCode::NotInteractive.fault("shell is not accepting input");
                        console.marker("exec-error", &fault).await?;
                    }
                }
                None => {
                    // Let the shell see end of input and exit on its own.
                    input_open = false;
                    runner.finish_input();
                }
            },
            Some(()) = interrupts.recv() => {
                if !runner.send_interrupt().await {
                    debug!("interrupt dropped: no interactive session");
                }
            }
        }
    }

    let code = run.exit.wait().await;
    console.exit(code).await?;
    Ok(code)
}

#[cfg(test)]
#[path = "console_tests.rs"]
mod tests;
