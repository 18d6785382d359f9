// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fs::File;
use std::io::Write;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{open, split_master};
use crate::event::Selector;
use crate::runtime::FrameRead;

#[tokio::test]
async fn master_reads_slave_output_as_merged() -> anyhow::Result<()> {
    let pair = open(80, 24)?;
    let (mut reader, _writer) = split_master(pair.master, CancellationToken::new())?;

    let mut slave = File::from(pair.slave);
    slave.write_all(b"hello pty\n")?;

    let mut buf = [0u8; 256];
    let (selector, n) =
        tokio::time::timeout(Duration::from_secs(2), reader.read_frame(&mut buf)).await??;
    assert_eq!(selector, Selector::Merged);
    let text = String::from_utf8_lossy(&buf[..n]);
    assert!(text.contains("hello pty"), "got {text:?}");
    Ok(())
}

#[tokio::test]
async fn closed_slave_reads_as_end_of_stream() -> anyhow::Result<()> {
    let pair = open(80, 24)?;
    let (mut reader, _writer) = split_master(pair.master, CancellationToken::new())?;
    drop(pair.slave);

    let mut buf = [0u8; 64];
    let (_, n) = tokio::time::timeout(Duration::from_secs(2), reader.read_frame(&mut buf)).await??;
    assert_eq!(n, 0);
    Ok(())
}

#[tokio::test]
async fn dispose_cancels_kill_token() -> anyhow::Result<()> {
    let pair = open(80, 24)?;
    let kill = CancellationToken::new();
    let (mut reader, _writer) = split_master(pair.master, kill.clone())?;
    reader.dispose().await;
    assert!(kill.is_cancelled());
    Ok(())
}
