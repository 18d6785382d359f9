// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! [`RuntimeClient`] backed by the `docker` command-line client.
//!
//! Log streams and exec sessions are child processes of this process; the
//! docker CLI already demultiplexes the engine's stream framing onto its own
//! stdout/stderr. TTY-mode exec runs the CLI on a pseudo-terminal because
//! `docker exec -t` refuses to start without one.

use std::collections::HashMap;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    pty, ContainerInfo, ExecInspect, ExecTransport, FrameRead, FrameWrite, LogRequest,
    RuntimeClient,
};
use crate::event::Selector;

const PIPE_CHUNK: usize = 8192;
const PTY_COLS: u16 = 200;
const PTY_ROWS: u16 = 50;

struct ExecEntry {
    container_id: String,
    argv: Vec<String>,
    exit: Option<watch::Receiver<Option<i64>>>,
}

/// Exec instances keyed by id. An entry lives from `create_exec` until its
/// transport is disposed (or its attach fails).
type ExecTable = Arc<Mutex<HashMap<String, ExecEntry>>>;

/// Runtime client that shells out to `docker`.
pub struct DockerCli {
    bin: PathBuf,
    execs: ExecTable,
    exit_wait: Duration,
}

impl DockerCli {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into(), execs: Arc::new(Mutex::new(HashMap::new())), exit_wait: Duration::from_secs(5) }
    }

    /// How long `inspect_exec` waits for a finished exec's process to be reaped.
    pub fn with_exit_wait(mut self, wait: Duration) -> Self {
        self.exit_wait = wait;
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.kill_on_drop(true);
        cmd
    }

    fn exec_args(entry: &ExecEntry, tty: bool) -> Vec<String> {
        let mut args = vec!["exec".to_owned(), "-i".to_owned()];
        if tty {
            args.push("-t".to_owned());
        }
        args.push(entry.container_id.clone());
        args.extend(entry.argv.iter().cloned());
        args
    }

    fn attach_pipes(&self, args: &[String], kill: CancellationToken) -> anyhow::Result<(Child, ExecTransport)> {
        let mut child = self
            .command()
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.bin.display()))?;
        let stdin = child.stdin.take().context("exec stdin not captured")?;
        let reader = PipeReader::from_child(&mut child, false, kill)?;
        let writer = PipeWriter { stdin: Some(stdin) };
        Ok((child, ExecTransport { reader: Box::new(reader), writer: Box::new(writer) }))
    }

    fn attach_pty(&self, args: &[String], kill: CancellationToken) -> anyhow::Result<(Child, ExecTransport)> {
        let pair = pty::open(PTY_COLS, PTY_ROWS)?;
        let mut cmd = self.command();
        cmd.args(args)
            .stdin(Stdio::from(pair.slave.try_clone()?))
            .stdout(Stdio::from(pair.slave.try_clone()?))
            .stderr(Stdio::from(pair.slave));
        let child = cmd.spawn().with_context(|| format!("failed to spawn {}", self.bin.display()))?;
        // The command holds the slave copies; the master only sees EOF
        // once every one of them is closed.
        drop(cmd);
        let (reader, writer) = pty::split_master(pair.master, kill)?;
        Ok((child, ExecTransport { reader: Box::new(reader), writer: Box::new(writer) }))
    }
}

impl RuntimeClient for DockerCli {
    fn inspect<'a>(&'a self, container_id: &'a str) -> BoxFuture<'a, anyhow::Result<ContainerInfo>> {
        Box::pin(async move {
            let output = self
                .command()
                .args(["inspect", "--type", "container", container_id])
                .stdin(Stdio::null())
                .output()
                .await
                .with_context(|| format!("failed to run {}", self.bin.display()))?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                anyhow::bail!("docker inspect {container_id} failed: {}", stderr.trim());
            }
            parse_inspect(&output.stdout)
        })
    }

    fn open_log_stream<'a>(
        &'a self,
        request: &'a LogRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, anyhow::Result<Box<dyn FrameRead>>> {
        Box::pin(async move {
            let mut args = vec!["logs".to_owned(), "--tail".to_owned(), request.tail.clone()];
            if request.follow {
                args.push("--follow".to_owned());
            }
            args.push(request.container_id.clone());

            let mut child = self
                .command()
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .with_context(|| format!("failed to spawn {}", self.bin.display()))?;
            let kill = cancel.child_token();
            let reader = PipeReader::from_child(&mut child, request.tty, kill.clone())?;
            tokio::spawn(reap(child, kill, None));
            let reader: Box<dyn FrameRead> = Box::new(reader);
            Ok(reader)
        })
    }

    fn create_exec<'a>(
        &'a self,
        container_id: &'a str,
        argv: &'a [String],
        _tty: bool,
    ) -> BoxFuture<'a, anyhow::Result<String>> {
        Box::pin(async move {
            if argv.is_empty() {
                anyhow::bail!("exec requires a command");
            }
            let id = uuid::Uuid::new_v4().to_string();
            self.execs.lock().insert(
                id.clone(),
                ExecEntry { container_id: container_id.to_owned(), argv: argv.to_vec(), exit: None },
            );
            Ok(id)
        })
    }

    fn attach_exec<'a>(&'a self, exec_id: &'a str, tty: bool) -> BoxFuture<'a, anyhow::Result<ExecTransport>> {
        Box::pin(async move {
            let args = {
                let execs = self.execs.lock();
                let entry = execs.get(exec_id).with_context(|| format!("unknown exec {exec_id}"))?;
                if entry.exit.is_some() {
                    anyhow::bail!("exec {exec_id} is already attached");
                }
                Self::exec_args(entry, tty)
            };

            let kill = CancellationToken::new();
            let attached =
                if tty { self.attach_pty(&args, kill.clone()) } else { self.attach_pipes(&args, kill.clone()) };
            let (child, ExecTransport { reader, writer }) = match attached {
                Ok(attached) => attached,
                Err(e) => {
                    self.execs.lock().remove(exec_id);
                    return Err(e);
                }
            };
            debug!(exec = exec_id, tty, "docker exec attached");

            let (exit_tx, exit_rx) = watch::channel(None);
            if let Some(entry) = self.execs.lock().get_mut(exec_id) {
                entry.exit = Some(exit_rx);
            }
            tokio::spawn(reap(child, kill, Some(exit_tx)));
            let reader = ExecReader { inner: reader, execs: Arc::clone(&self.execs), exec_id: exec_id.to_owned() };
            Ok(ExecTransport { reader: Box::new(reader), writer })
        })
    }

    fn inspect_exec<'a>(&'a self, exec_id: &'a str) -> BoxFuture<'a, anyhow::Result<ExecInspect>> {
        Box::pin(async move {
            let exit = {
                let execs = self.execs.lock();
                let entry = execs.get(exec_id).with_context(|| format!("unknown exec {exec_id}"))?;
                entry.exit.clone()
            };
            let Some(mut exit) = exit else {
                return Ok(ExecInspect { exit_code: None, running: false });
            };
            let inspect = match tokio::time::timeout(self.exit_wait, exit.wait_for(Option::is_some)).await {
                Ok(Ok(code)) => ExecInspect { exit_code: *code, running: false },
                Ok(Err(_)) => ExecInspect { exit_code: None, running: false },
                Err(_) => ExecInspect { exit_code: None, running: true },
            };
            Ok(inspect)
        })
    }
}

/// Wait for `child`, killing it once `kill` fires, and publish its exit code.
async fn reap(mut child: Child, kill: CancellationToken, exit_tx: Option<watch::Sender<Option<i64>>>) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill.cancelled() => {
            let _ = child.start_kill();
            child.wait().await
        }
    };
    let code = match status {
        Ok(status) => match (status.code(), status.signal()) {
            (Some(code), _) => i64::from(code),
            (None, Some(sig)) => 128 + i64::from(sig),
            (None, None) => -1,
        },
        Err(e) => {
            debug!("wait on docker child failed: {e}");
            -1
        }
    };
    if let Some(tx) = exit_tx {
        let _ = tx.send(Some(code));
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    id: String,
    #[serde(default)]
    config: InspectConfig,
    #[serde(default)]
    state: InspectState,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    #[serde(default)]
    tty: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    #[serde(default)]
    running: bool,
}

/// Parse `docker inspect` output (a JSON array with one element).
pub fn parse_inspect(stdout: &[u8]) -> anyhow::Result<ContainerInfo> {
    let entries: Vec<InspectEntry> = serde_json::from_slice(stdout).context("invalid docker inspect output")?;
    let entry = entries.into_iter().next().context("docker inspect returned no containers")?;
    Ok(ContainerInfo { id: entry.id, tty: entry.config.tty, running: entry.state.running })
}

type PipeFrame = io::Result<(Selector, Bytes)>;

/// Read side over a child's stdout and stderr pipes.
pub struct PipeReader {
    rx: mpsc::Receiver<PipeFrame>,
    pending: Option<(Selector, Bytes)>,
    kill: CancellationToken,
    pumps: Vec<JoinHandle<()>>,
}

impl PipeReader {
    fn from_child(child: &mut Child, tty: bool, kill: CancellationToken) -> anyhow::Result<Self> {
        let stdout = child.stdout.take().context("child stdout not captured")?;
        let stderr = child.stderr.take().context("child stderr not captured")?;
        let (out_sel, err_sel) =
            if tty { (Selector::Merged, Selector::Merged) } else { (Selector::Stdout, Selector::Stderr) };
        let (tx, rx) = mpsc::channel(16);
        let pumps = vec![pump_pipe(stdout, out_sel, tx.clone()), pump_pipe(stderr, err_sel, tx)];
        Ok(Self { rx, pending: None, kill, pumps })
    }
}

fn pump_pipe<R>(mut src: R, selector: Selector, tx: mpsc::Sender<PipeFrame>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; PIPE_CHUNK];
        loop {
            match src.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(Ok((selector, Bytes::copy_from_slice(&buf[..n])))).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    break;
                }
            }
        }
    })
}

impl FrameRead for PipeReader {
    fn read_frame<'a>(&'a mut self, buf: &'a mut [u8]) -> BoxFuture<'a, io::Result<(Selector, usize)>> {
        Box::pin(async move {
            let (selector, mut data) = match self.pending.take() {
                Some(frame) => frame,
                None => match self.rx.recv().await {
                    Some(frame) => frame?,
                    // Both pipes reached EOF.
                    None => return Ok((Selector::Stdout, 0)),
                },
            };
            let n = data.len().min(buf.len());
            buf[..n].copy_from_slice(&data.split_to(n));
            if !data.is_empty() {
                self.pending = Some((selector, data));
            }
            Ok((selector, n))
        })
    }

    fn dispose(&mut self) -> BoxFuture<'_, ()> {
        self.kill.cancel();
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
        self.rx.close();
        Box::pin(async {})
    }
}

/// Exec read side that drops the exec's table entry once disposed.
struct ExecReader {
    inner: Box<dyn FrameRead>,
    execs: ExecTable,
    exec_id: String,
}

impl FrameRead for ExecReader {
    fn read_frame<'a>(&'a mut self, buf: &'a mut [u8]) -> BoxFuture<'a, io::Result<(Selector, usize)>> {
        self.inner.read_frame(buf)
    }

    fn dispose(&mut self) -> BoxFuture<'_, ()> {
        self.execs.lock().remove(&self.exec_id);
        self.inner.dispose()
    }
}

/// Write side over a child's stdin pipe.
pub struct PipeWriter {
    stdin: Option<ChildStdin>,
}

impl FrameWrite for PipeWriter {
    fn write_all<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            let stdin = self.stdin.as_mut().ok_or_else(|| io::Error::from(io::ErrorKind::BrokenPipe))?;
            stdin.write_all(data).await?;
            stdin.flush().await
        })
    }

    fn close_write(&mut self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            if let Some(mut stdin) = self.stdin.take() {
                stdin.shutdown().await?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
#[path = "docker_tests.rs"]
mod tests;
