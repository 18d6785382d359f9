// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pseudo-terminal plumbing for TTY-mode exec through the docker CLI.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::OwnedFd;
use std::sync::Arc;

use anyhow::Context;
use futures_util::future::BoxFuture;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::libc;
use nix::pty::{openpty, Winsize};
use tokio::io::unix::AsyncFd;
use tokio_util::sync::CancellationToken;

use super::{FrameRead, FrameWrite};
use crate::event::Selector;

/// End-of-transmission: the line discipline's EOF character.
const EOT: u8 = 0x04;

/// Master and slave ends of a freshly opened pseudo-terminal.
pub struct PtyPair {
    pub master: OwnedFd,
    pub slave: OwnedFd,
}

/// Open a PTY pair sized `cols` x `rows`.
pub fn open(cols: u16, rows: u16) -> anyhow::Result<PtyPair> {
    let winsize = Winsize { ws_col: cols, ws_row: rows, ws_xpixel: 0, ws_ypixel: 0 };
    let pty = openpty(Some(&winsize), None).context("openpty failed")?;
    Ok(PtyPair { master: pty.master, slave: pty.slave })
}

/// Set the given file descriptor to non-blocking mode.
pub fn set_nonblocking(fd: &OwnedFd) -> io::Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(io_err)?;
    let flags = OFlag::from_bits_truncate(flags);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK)).map_err(io_err)?;
    Ok(())
}

/// Wrap a PTY master for async use, returning the two transport halves.
///
/// `kill` is cancelled when the reader is disposed so the process on the
/// slave side can be torn down by its owner.
pub fn split_master(
    master: OwnedFd,
    kill: CancellationToken,
) -> anyhow::Result<(PtyReader, PtyWriter)> {
    set_nonblocking(&master).context("set O_NONBLOCK on pty master")?;
    let afd = Arc::new(AsyncFd::new(File::from(master)).context("AsyncFd::new failed")?);
    Ok((PtyReader { master: Arc::clone(&afd), kill }, PtyWriter { master: afd }))
}

/// Read a chunk of data from the async PTY fd.
pub async fn read_chunk(afd: &AsyncFd<File>, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        let mut guard = afd.readable().await?;
        match guard.try_io(|inner| (&*inner.get_ref()).read(buf)) {
            Ok(result) => return result,
            Err(_would_block) => continue,
        }
    }
}

/// Write all data to the async PTY fd.
pub async fn write_all(afd: &AsyncFd<File>, data: &[u8]) -> io::Result<()> {
    let mut offset = 0;
    while offset < data.len() {
        let mut guard = afd.writable().await?;
        match guard.try_io(|inner| (&*inner.get_ref()).write(&data[offset..])) {
            Ok(Ok(n)) => offset += n,
            Ok(Err(e)) => return Err(e),
            Err(_would_block) => continue,
        }
    }
    Ok(())
}

/// Read half: every chunk is tagged [`Selector::Merged`].
pub struct PtyReader {
    master: Arc<AsyncFd<File>>,
    kill: CancellationToken,
}

impl FrameRead for PtyReader {
    fn read_frame<'a>(&'a mut self, buf: &'a mut [u8]) -> BoxFuture<'a, io::Result<(Selector, usize)>> {
        Box::pin(async move {
            match read_chunk(&self.master, buf).await {
                Ok(n) => Ok((Selector::Merged, n)),
                // The slave side closed: the process exited.
                Err(e) if e.raw_os_error() == Some(libc::EIO) => Ok((Selector::Merged, 0)),
                Err(e) => Err(e),
            }
        })
    }

    fn dispose(&mut self) -> BoxFuture<'_, ()> {
        self.kill.cancel();
        Box::pin(async {})
    }
}

/// Write half. Half-close sends the terminal EOF character.
pub struct PtyWriter {
    master: Arc<AsyncFd<File>>,
}

impl FrameWrite for PtyWriter {
    fn write_all<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(write_all(&self.master, data))
    }

    fn close_write(&mut self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            match write_all(&self.master, &[EOT]).await {
                Err(e) if e.raw_os_error() == Some(libc::EIO) => Ok(()),
                other => other,
            }
        })
    }
}

fn io_err(e: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

#[cfg(test)]
#[path = "pty_tests.rs"]
mod tests;
