// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: a scripted runtime, transports, and
//! assertion helpers.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::event::{OutputEvent, Selector};
use crate::runtime::{
    ContainerInfo, ExecInspect, ExecTransport, FrameRead, FrameWrite, LogRequest, RuntimeClient,
};

/// One scripted transport action.
#[derive(Debug, Clone)]
pub enum Step {
    Frame(Selector, Bytes),
    Sleep(Duration),
    /// Fail the read with this message.
    Fault(String),
    /// Park until the reader is dropped.
    Hang,
}

impl Step {
    pub fn stdout(text: &str) -> Self {
        Self::Frame(Selector::Stdout, Bytes::copy_from_slice(text.as_bytes()))
    }

    pub fn stderr(text: &str) -> Self {
        Self::Frame(Selector::Stderr, Bytes::copy_from_slice(text.as_bytes()))
    }

    pub fn merged(text: &str) -> Self {
        Self::Frame(Selector::Merged, Bytes::copy_from_slice(text.as_bytes()))
    }

    pub fn bytes(selector: Selector, data: &[u8]) -> Self {
        Self::Frame(selector, Bytes::copy_from_slice(data))
    }
}

/// Transport accounting shared by every reader a [`MockRuntime`] hands out.
#[derive(Debug, Default)]
pub struct TransportStats {
    disposed: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
}

impl TransportStats {
    fn open(&self) {
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);
    }

    fn close(&self) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest number of transports open at the same time.
    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    pub fn disposed(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }
}

/// Reader that plays back a list of [`Step`]s, then optionally echoes
/// whatever its paired writer receives, then reports end of stream.
pub struct ScriptedReader {
    steps: VecDeque<Step>,
    echo: Option<mpsc::Receiver<Bytes>>,
    pending: Option<(Selector, Bytes)>,
    stats: Arc<TransportStats>,
    disposed: bool,
    /// Paired writer's half-close flag, sampled into the slot on dispose.
    half_close_seen: Option<(Arc<AtomicBool>, Arc<Mutex<Option<bool>>>)>,
}

impl ScriptedReader {
    pub fn new(steps: Vec<Step>) -> Self {
        Self::with_stats(steps, Arc::new(TransportStats::default()))
    }

    fn with_stats(steps: Vec<Step>, stats: Arc<TransportStats>) -> Self {
        stats.open();
        Self { steps: steps.into(), echo: None, pending: None, stats, disposed: false, half_close_seen: None }
    }

    fn copy_out(&mut self, selector: Selector, mut data: Bytes, buf: &mut [u8]) -> (Selector, usize) {
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data.split_to(n));
        if !data.is_empty() {
            self.pending = Some((selector, data));
        }
        (selector, n)
    }
}

impl FrameRead for ScriptedReader {
    fn read_frame<'a>(&'a mut self, buf: &'a mut [u8]) -> BoxFuture<'a, io::Result<(Selector, usize)>> {
        Box::pin(async move {
            loop {
                if let Some((selector, data)) = self.pending.take() {
                    return Ok(self.copy_out(selector, data, buf));
                }
                match self.steps.pop_front() {
                    Some(Step::Frame(selector, data)) => return Ok(self.copy_out(selector, data, buf)),
                    Some(Step::Sleep(d)) => tokio::time::sleep(d).await,
                    Some(Step::Fault(msg)) => return Err(io::Error::other(msg)),
                    Some(Step::Hang) => std::future::pending::<()>().await,
                    None => {
                        let next = match self.echo.as_mut() {
                            Some(rx) => rx.recv().await,
                            None => None,
                        };
                        return match next {
                            Some(data) => Ok(self.copy_out(Selector::Stdout, data, buf)),
                            None => Ok((Selector::Stdout, 0)),
                        };
                    }
                }
            }
        })
    }

    fn dispose(&mut self) -> BoxFuture<'_, ()> {
        if !self.disposed {
            self.disposed = true;
            self.stats.close();
            if let Some((closed, seen)) = self.half_close_seen.take() {
                *seen.lock() = Some(closed.load(Ordering::SeqCst));
            }
        }
        Box::pin(async {})
    }
}

/// Writer that records every write; in echo mode it also feeds the paired
/// reader, and half-closing ends that reader's stream.
pub struct RecordingWriter {
    writes: Arc<Mutex<Vec<Bytes>>>,
    closed: Arc<AtomicBool>,
    echo: Option<mpsc::Sender<Bytes>>,
    fail: bool,
}

impl FrameWrite for RecordingWriter {
    fn write_all<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            if self.fail || self.closed.load(Ordering::SeqCst) {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe));
            }
            let data = Bytes::copy_from_slice(data);
            self.writes.lock().push(data.clone());
            if let Some(ref tx) = self.echo {
                let _ = tx.send(data).await;
            }
            Ok(())
        })
    }

    fn close_write(&mut self) -> BoxFuture<'_, io::Result<()>> {
        self.closed.store(true, Ordering::SeqCst);
        self.echo = None;
        Box::pin(async { Ok(()) })
    }
}

/// Behavior of one scripted exec instance.
#[derive(Debug, Clone)]
pub struct ExecScript {
    steps: Vec<Step>,
    exit_code: Option<i64>,
    echo: bool,
    fail_writes: bool,
    inspect_error: Option<String>,
}

impl Default for ExecScript {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ExecScript {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps, exit_code: Some(0), echo: false, fail_writes: false, inspect_error: None }
    }

    /// An exec that produces no output and never ends on its own.
    pub fn hanging() -> Self {
        Self::new(vec![Step::Hang])
    }

    pub fn exit_code(mut self, code: Option<i64>) -> Self {
        self.exit_code = code;
        self
    }

    /// Echo input back as stdout; the stream ends when input is half-closed.
    pub fn echo(mut self) -> Self {
        self.echo = true;
        self
    }

    pub fn fail_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn inspect_error(mut self, msg: impl Into<String>) -> Self {
        self.inspect_error = Some(msg.into());
        self
    }
}

/// What the runtime saw for one exec instance.
#[derive(Debug, Clone)]
pub struct ExecRecord {
    pub exec_id: String,
    pub container_id: String,
    pub argv: Vec<String>,
    pub tty: bool,
    writes: Arc<Mutex<Vec<Bytes>>>,
    closed: Arc<AtomicBool>,
    closed_at_dispose: Arc<Mutex<Option<bool>>>,
}

impl ExecRecord {
    /// Concatenation of every write the exec's stdin received.
    pub fn input(&self) -> Vec<u8> {
        self.writes.lock().iter().flat_map(|b| b.iter().copied()).collect()
    }

    pub fn input_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Whether stdin was already half-closed when the transport was
    /// disposed; `None` until it is disposed.
    pub fn input_closed_at_dispose(&self) -> Option<bool> {
        *self.closed_at_dispose.lock()
    }
}

struct ExecSlot {
    script: ExecScript,
    record: ExecRecord,
}

/// In-memory [`RuntimeClient`] driven by queued scripts.
///
/// Log streams and exec instances consume scripts in FIFO order; once the
/// queue is empty a log stream ends immediately and an exec exits with 0.
#[derive(Default)]
pub struct MockRuntime {
    logs: Mutex<VecDeque<Vec<Step>>>,
    scripts: Mutex<VecDeque<ExecScript>>,
    slots: Mutex<HashMap<String, ExecSlot>>,
    order: Mutex<Vec<String>>,
    log_requests: Mutex<Vec<LogRequest>>,
    fail_create: Mutex<Option<String>>,
    pub stats: Arc<TransportStats>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_logs(self, steps: Vec<Step>) -> Self {
        self.logs.lock().push_back(steps);
        self
    }

    pub fn with_exec(self, script: ExecScript) -> Self {
        self.scripts.lock().push_back(script);
        self
    }

    /// Make the next `create_exec` fail with `msg`.
    pub fn fail_next_create(&self, msg: impl Into<String>) {
        *self.fail_create.lock() = Some(msg.into());
    }

    /// Exec instances in creation order.
    pub fn execs(&self) -> Vec<ExecRecord> {
        let order = self.order.lock().clone();
        let slots = self.slots.lock();
        order.iter().filter_map(|id| slots.get(id).map(|s| s.record.clone())).collect()
    }

    pub fn log_requests(&self) -> Vec<LogRequest> {
        self.log_requests.lock().clone()
    }
}

impl RuntimeClient for MockRuntime {
    fn inspect<'a>(&'a self, container_id: &'a str) -> BoxFuture<'a, anyhow::Result<ContainerInfo>> {
        Box::pin(async move { Ok(ContainerInfo { id: container_id.to_owned(), tty: false, running: true }) })
    }

    fn open_log_stream<'a>(
        &'a self,
        request: &'a LogRequest,
        _cancel: CancellationToken,
    ) -> BoxFuture<'a, anyhow::Result<Box<dyn FrameRead>>> {
        Box::pin(async move {
            self.log_requests.lock().push(request.clone());
            let steps = self.logs.lock().pop_front().unwrap_or_default();
            let reader: Box<dyn FrameRead> = Box::new(ScriptedReader::with_stats(steps, Arc::clone(&self.stats)));
            Ok(reader)
        })
    }

    fn create_exec<'a>(
        &'a self,
        container_id: &'a str,
        argv: &'a [String],
        tty: bool,
    ) -> BoxFuture<'a, anyhow::Result<String>> {
        Box::pin(async move {
            if let Some(msg) = self.fail_create.lock().take() {
                anyhow::bail!(msg);
            }
            let script = self.scripts.lock().pop_front().unwrap_or_default();
            let mut order = self.order.lock();
            let exec_id = format!("exec-{}", order.len() + 1);
            let record = ExecRecord {
                exec_id: exec_id.clone(),
                container_id: container_id.to_owned(),
                argv: argv.to_vec(),
                tty,
                writes: Arc::new(Mutex::new(Vec::new())),
                closed: Arc::new(AtomicBool::new(false)),
                closed_at_dispose: Arc::new(Mutex::new(None)),
            };
            order.push(exec_id.clone());
            self.slots.lock().insert(exec_id.clone(), ExecSlot { script, record });
            Ok(exec_id)
        })
    }

    fn attach_exec<'a>(&'a self, exec_id: &'a str, _tty: bool) -> BoxFuture<'a, anyhow::Result<ExecTransport>> {
        Box::pin(async move {
            let (script, record) = {
                let slots = self.slots.lock();
                let slot = slots.get(exec_id).ok_or_else(|| anyhow::anyhow!("unknown exec {exec_id}"))?;
                (slot.script.clone(), slot.record.clone())
            };
            let mut reader = ScriptedReader::with_stats(script.steps, Arc::clone(&self.stats));
            reader.half_close_seen = Some((Arc::clone(&record.closed), Arc::clone(&record.closed_at_dispose)));
            let mut writer = RecordingWriter {
                writes: record.writes,
                closed: record.closed,
                echo: None,
                fail: script.fail_writes,
            };
            if script.echo {
                let (tx, rx) = mpsc::channel(64);
                reader.echo = Some(rx);
                writer.echo = Some(tx);
            }
            Ok(ExecTransport { reader: Box::new(reader), writer: Box::new(writer) })
        })
    }

    fn inspect_exec<'a>(&'a self, exec_id: &'a str) -> BoxFuture<'a, anyhow::Result<ExecInspect>> {
        Box::pin(async move {
            let slots = self.slots.lock();
            let slot = slots.get(exec_id).ok_or_else(|| anyhow::anyhow!("unknown exec {exec_id}"))?;
            if let Some(ref msg) = slot.script.inspect_error {
                anyhow::bail!("{msg}");
            }
            Ok(ExecInspect { exit_code: slot.script.exit_code, running: false })
        })
    }
}

/// Drain a session queue until it completes, with an overall deadline.
pub async fn collect_events(
    rx: &mut mpsc::Receiver<OutputEvent>,
    deadline: Duration,
) -> anyhow::Result<Vec<OutputEvent>> {
    let mut events = Vec::new();
    tokio::time::timeout(deadline, async {
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("queue did not complete within {deadline:?}"))?;
    Ok(events)
}

/// Text of every `Line` event, in order.
pub fn line_texts(events: &[OutputEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            OutputEvent::Line(line) => Some(line.text.clone()),
            OutputEvent::Fault(_) => None,
        })
        .collect()
}

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = match result {
            Ok(_) => panic!(concat!("expected Err for: ", stringify!($expr))),
            Err(err) => err,
        };
        let msg = format!("{err:#}");
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
