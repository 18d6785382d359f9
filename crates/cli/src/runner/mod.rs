// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Interactive command runner: at most one exec session at a time, with
//! running-state notifications and environment injection for shells.

pub mod shell;

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::event::{OutputEvent, RunStateEvent};
use crate::runtime::{EnvironmentProvider, RuntimeClient};
use crate::stream::{ExecIo, ExecRequest, ExecSession, ExitCode, InputSink, StreamSettings};

pub use shell::{is_shell_invocation, ShellSessionState};

/// ETX: what a terminal sends for Ctrl-C.
const INTERRUPT: u8 = 0x03;

/// How a command is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub tty: bool,
    pub attach_stdin: bool,
}

impl RunOptions {
    /// TTY with stdin attached.
    pub fn interactive() -> Self {
        Self { tty: true, attach_stdin: true }
    }

    /// Separate stdout/stderr, no stdin.
    pub fn detached() -> Self {
        Self { tty: false, attach_stdin: false }
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::interactive()
    }
}

/// Runner lifecycle. `Starting` covers the window between the implicit
/// stop of the previous session and the new session reporting in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerPhase {
    Idle,
    Starting,
    Running,
}

/// Consumer handles of a command started by [`CommandRunner::run`].
#[derive(Debug)]
pub struct CommandRun {
    pub id: Uuid,
    /// The argv actually executed, after any environment injection.
    pub argv: Vec<String>,
    pub env_injected: bool,
    pub events: mpsc::Receiver<OutputEvent>,
    pub exit: ExitCode,
}

struct ActiveCommand {
    id: Uuid,
    exit: ExitCode,
    input: Option<InputSink>,
    stop: CancellationToken,
    watcher: Option<JoinHandle<()>>,
}

struct RunnerState {
    phase: RunnerPhase,
    shell: ShellSessionState,
    active: Option<ActiveCommand>,
    seq: u64,
}

struct Inner {
    client: Arc<dyn RuntimeClient>,
    env: Arc<dyn EnvironmentProvider>,
    settings: StreamSettings,
    cancel: CancellationToken,
    state: Mutex<RunnerState>,
    /// Serializes `run` and `stop`.
    gate: tokio::sync::Mutex<()>,
    state_tx: broadcast::Sender<RunStateEvent>,
}

impl Inner {
    /// Record a running/not-running transition and notify subscribers.
    fn emit(&self, state: &mut RunnerState, running: bool) {
        state.seq += 1;
        let _ = self.state_tx.send(RunStateEvent { running, seq: state.seq });
    }
}

/// Runs commands in containers one at a time.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct CommandRunner {
    inner: Arc<Inner>,
}

impl CommandRunner {
    pub fn new(
        client: Arc<dyn RuntimeClient>,
        env: Arc<dyn EnvironmentProvider>,
        settings: StreamSettings,
    ) -> Self {
        Self::with_cancel(client, env, settings, CancellationToken::new())
    }

    /// Like [`new`](Self::new), with every session linked to `cancel`.
    pub fn with_cancel(
        client: Arc<dyn RuntimeClient>,
        env: Arc<dyn EnvironmentProvider>,
        settings: StreamSettings,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, _) = broadcast::channel(64);
        let state = RunnerState {
            phase: RunnerPhase::Idle,
            shell: ShellSessionState::default(),
            active: None,
            seq: 0,
        };
        Self {
            inner: Arc::new(Inner {
                client,
                env,
                settings,
                cancel,
                state: Mutex::new(state),
                gate: tokio::sync::Mutex::new(()),
                state_tx,
            }),
        }
    }

    /// Run `argv` in `container_id`, replacing any running command.
    ///
    /// The previous session is stopped and fully torn down before the new
    /// one is created. Interactive shells get the environment injected
    /// unless one that already received it is running in the same container.
    pub async fn run(
        &self,
        container_id: &str,
        argv: Vec<String>,
        options: RunOptions,
    ) -> anyhow::Result<CommandRun> {
        let _gate = self.inner.gate.lock().await;

        let is_shell = is_shell_invocation(&argv);
        // Decided before the implicit stop, which resets the shell state. A
        // session whose exit code is out counts as ended even if its exit
        // watcher has not caught up yet.
        let prior = {
            let state = self.inner.state.lock();
            let mut shell = state.shell.clone();
            if state.active.as_ref().is_some_and(|a| a.exit.peek().is_some()) {
                shell.reset();
            }
            shell
        };
        let inject = is_shell && prior.needs_injection(container_id);

        self.stop_active().await;
        self.inner.state.lock().phase = RunnerPhase::Starting;

        let argv = if inject {
            let vars = self.inner.env.load_variables().await;
            shell::inject_env(&argv, &vars)
        } else {
            argv
        };

        let request = ExecRequest {
            container_id: container_id.to_owned(),
            argv: argv.clone(),
            tty: options.tty,
            attach_stdin: options.attach_stdin,
        };
        let started = ExecSession::start(
            Arc::clone(&self.inner.client),
            request,
            &self.inner.cancel,
            &self.inner.settings,
        )
        .await;
        let ExecIo { id, events, input, exit, stop, .. } = match started {
            Ok(io) => io,
            Err(e) => {
                self.inner.state.lock().phase = RunnerPhase::Idle;
                return Err(e);
            }
        };

        {
            let mut state = self.inner.state.lock();
            state.shell = prior.entered(container_id, is_shell, inject);
            state.active = Some(ActiveCommand { id, exit: exit.clone(), input, stop, watcher: None });
            state.phase = RunnerPhase::Running;
            self.inner.emit(&mut state, true);
        }
        info!(session = %id, container = container_id, shell = is_shell, env = inject, "command started");

        let watcher = tokio::spawn(watch_exit(Arc::clone(&self.inner), id, exit.clone()));
        if let Some(active) = self.inner.state.lock().active.as_mut().filter(|a| a.id == id) {
            active.watcher = Some(watcher);
        }

        Ok(CommandRun { id, argv, env_injected: inject, events, exit })
    }

    /// Stop the running command, if any, and wait for its teardown.
    pub async fn stop(&self) {
        let _gate = self.inner.gate.lock().await;
        self.stop_active().await;
    }

    async fn stop_active(&self) {
        let (stop, watcher) = {
            let mut state = self.inner.state.lock();
            match state.active.as_mut() {
                Some(active) => (Some(active.stop.clone()), active.watcher.take()),
                None => (None, None),
            }
        };
        if let Some(stop) = stop {
            stop.cancel();
        }
        if let Some(watcher) = watcher {
            if let Err(e) = watcher.await {
                debug!("exit watcher failed: {e}");
            }
        }
    }

    pub fn phase(&self) -> RunnerPhase {
        self.inner.state.lock().phase
    }

    pub fn is_running(&self) -> bool {
        self.phase() == RunnerPhase::Running
    }

    /// Whether a running command accepts input.
    pub fn is_interactive(&self) -> bool {
        self.input_sink().is_some()
    }

    /// Snapshot of the shell injection bookkeeping.
    pub fn shell_state(&self) -> ShellSessionState {
        self.inner.state.lock().shell.clone()
    }

    /// Send a line to the running command. Returns `false` when nothing is
    /// running, the command has no input attached, or its input side closed.
    pub async fn try_write_to_interactive(&self, text: &str) -> bool {
        match self.input_sink() {
            Some(sink) => sink.write_line(text).await,
            None => false,
        }
    }

    /// Send Ctrl-C to the running command.
    pub async fn send_interrupt(&self) -> bool {
        match self.input_sink() {
            Some(sink) => sink.write_raw(Bytes::from_static(&[INTERRUPT])).await,
            None => false,
        }
    }

    /// Close the running command's input side so it sees end of input.
    /// Returns `false` when there was no open input to close.
    pub fn finish_input(&self) -> bool {
        let mut state = self.inner.state.lock();
        state.active.as_mut().and_then(|a| a.input.take()).is_some()
    }

    /// Subscribe to running/not-running transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<RunStateEvent> {
        self.inner.state_tx.subscribe()
    }

    fn input_sink(&self) -> Option<InputSink> {
        let state = self.inner.state.lock();
        if state.phase != RunnerPhase::Running {
            return None;
        }
        state.active.as_ref().and_then(|a| a.input.clone()).filter(|sink| !sink.is_closed())
    }
}

/// Wait for a session to finish and move the runner back to idle, unless
/// another session has replaced it in the meantime.
async fn watch_exit(inner: Arc<Inner>, id: Uuid, exit: ExitCode) {
    let code = exit.wait().await;
    let mut state = inner.state.lock();
    if state.active.as_ref().is_some_and(|a| a.id == id) {
        state.active = None;
        state.phase = RunnerPhase::Idle;
        state.shell.reset();
        inner.emit(&mut state, false);
        debug!(session = %id, code, "command finished");
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
