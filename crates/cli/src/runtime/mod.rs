// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Container runtime collaborator contracts.
//!
//! The streaming core only talks to the runtime through these traits; the
//! [`docker`] module provides a CLI-backed implementation.

pub mod docker;
pub mod env;
pub mod pty;

use std::io;

use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::event::Selector;

pub use env::{EnvFileEnvironment, EnvironmentProvider, StaticEnvironment};

/// Subset of container inspection the streaming core cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    /// Whether the container was created with a TTY (merged output).
    pub tty: bool,
    pub running: bool,
}

/// Exec instance status reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecInspect {
    pub exit_code: Option<i64>,
    pub running: bool,
}

/// Parameters for opening a container log stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRequest {
    pub container_id: String,
    pub follow: bool,
    /// Number of trailing lines, or `"all"`.
    pub tail: String,
    pub tty: bool,
}

impl LogRequest {
    pub fn new(container_id: impl Into<String>) -> Self {
        Self { container_id: container_id.into(), follow: false, tail: "all".to_owned(), tty: false }
    }

    pub fn follow(mut self, follow: bool) -> Self {
        self.follow = follow;
        self
    }

    pub fn tail(mut self, tail: impl Into<String>) -> Self {
        self.tail = tail.into();
        self
    }

    pub fn tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }
}

/// Read side of a runtime transport.
///
/// Object-safe for use as `Box<dyn FrameRead>`.
pub trait FrameRead: Send + 'static {
    /// Read the next chunk into `buf`, returning the selector it belongs to
    /// and its length. A length of zero signals end of stream.
    fn read_frame<'a>(&'a mut self, buf: &'a mut [u8]) -> BoxFuture<'a, io::Result<(Selector, usize)>>;

    /// Release the transport. Must be safe to call after end of stream.
    fn dispose(&mut self) -> BoxFuture<'_, ()>;
}

/// Write side of a bidirectional runtime transport.
pub trait FrameWrite: Send + 'static {
    fn write_all<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, io::Result<()>>;

    /// Half-close: signal end of input to the remote process.
    fn close_write(&mut self) -> BoxFuture<'_, io::Result<()>>;
}

/// Attached exec transport, split into its two halves.
pub struct ExecTransport {
    pub reader: Box<dyn FrameRead>,
    pub writer: Box<dyn FrameWrite>,
}

/// Container runtime operations consumed by the streaming core.
pub trait RuntimeClient: Send + Sync + 'static {
    fn inspect<'a>(&'a self, container_id: &'a str) -> BoxFuture<'a, anyhow::Result<ContainerInfo>>;

    fn open_log_stream<'a>(
        &'a self,
        request: &'a LogRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, anyhow::Result<Box<dyn FrameRead>>>;

    fn create_exec<'a>(
        &'a self,
        container_id: &'a str,
        argv: &'a [String],
        tty: bool,
    ) -> BoxFuture<'a, anyhow::Result<String>>;

    fn attach_exec<'a>(
        &'a self,
        exec_id: &'a str,
        tty: bool,
    ) -> BoxFuture<'a, anyhow::Result<ExecTransport>>;

    fn inspect_exec<'a>(&'a self, exec_id: &'a str) -> BoxFuture<'a, anyhow::Result<ExecInspect>>;
}
