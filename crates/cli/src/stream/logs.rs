// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read-only container log sessions.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{deliver, OutputPump, PumpEnd, StreamSettings};
use crate::error::ErrorCode;
use crate::event::OutputEvent;
use crate::runtime::{FrameRead, LogRequest, RuntimeClient};

/// Consumer half of a log session.
///
/// The queue completes when the stream ends, is cancelled, or faults; a
/// fault is delivered as the final [`OutputEvent::Fault`].
#[derive(Debug)]
pub struct LogStream {
    pub id: Uuid,
    pub events: mpsc::Receiver<OutputEvent>,
}

struct ActiveLog {
    id: Uuid,
    stop: CancellationToken,
    pump: JoinHandle<()>,
}

/// Owns at most one log session at a time.
pub struct LogStreamer {
    client: Arc<dyn RuntimeClient>,
    settings: StreamSettings,
    active: Option<ActiveLog>,
}

impl LogStreamer {
    pub fn new(client: Arc<dyn RuntimeClient>, settings: StreamSettings) -> Self {
        Self { client, settings, active: None }
    }

    /// Open a log stream for `request`.
    ///
    /// Any session this streamer already owns is cancelled and its queue
    /// completed before the new transport is opened. The session is also
    /// cancelled when `cancel` fires.
    pub async fn start(
        &mut self,
        request: LogRequest,
        cancel: &CancellationToken,
    ) -> anyhow::Result<LogStream> {
        self.stop().await;

        let stop = cancel.child_token();
        let reader = self
            .client
            .open_log_stream(&request, stop.clone())
            .await
            .with_context(|| format!("open log stream for {}", request.container_id))?;

        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.settings.queue_capacity.max(1));
        info!(
            session = %id,
            container = %request.container_id,
            follow = request.follow,
            tail = %request.tail,
            "log stream started"
        );
        let pump = tokio::spawn(drive(id, reader, tx, stop.clone(), request.tty, self.settings.chunk_size));
        self.active = Some(ActiveLog { id, stop, pump });
        Ok(LogStream { id, events: rx })
    }

    /// Cancel the current session, if any, and wait for its teardown.
    pub async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.stop.cancel();
        if let Err(e) = active.pump.await {
            warn!(session = %active.id, "log pump task failed: {e}");
        }
    }

    /// Whether a session is still delivering output.
    pub fn is_active(&self) -> bool {
        self.active.as_ref().is_some_and(|a| !a.pump.is_finished())
    }
}

async fn drive(
    id: Uuid,
    mut reader: Box<dyn FrameRead>,
    tx: mpsc::Sender<OutputEvent>,
    stop: CancellationToken,
    tty: bool,
    chunk_size: usize,
) {
    let mut pump = OutputPump::new(tty, chunk_size);
    let end = pump.run(reader.as_mut(), &tx, &stop).await;

    pump.flush(&tx, &stop).await;
    match end {
        PumpEnd::Eof => debug!(session = %id, "log stream reached end"),
        PumpEnd::Cancelled => debug!(session = %id, "log stream cancelled"),
        PumpEnd::ConsumerGone => debug!(session = %id, "log consumer went away"),
        PumpEnd::Fault(e) => {
            warn!(session = %id, "log stream fault: {e}");
            deliver(&tx, OutputEvent::Fault(ErrorCode::Transport.fault(e.to_string())), &stop).await;
        }
    }
    drop(tx);
    reader.dispose().await;
}

#[cfg(test)]
#[path = "logs_tests.rs"]
mod tests;
