// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `berth` binary as a subprocess against a fake `docker`
//! script and captures what it prints.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Fake `docker` covering the subcommands `berth` drives.
///
/// `exec` echoes its argv (`ran: ...`) unless the command is one of the
/// scripted ones; `logs` prints colored, blank and stderr lines.
pub const FAKE_DOCKER: &str = r#"#!/bin/sh
cmd="$1"; shift
case "$cmd" in
  inspect)
    for last; do :; done
    echo "[{\"Id\":\"$last\",\"Config\":{\"Tty\":false},\"State\":{\"Running\":true}}]"
    ;;
  logs)
    printf '\033[32mgreen\033[0m\n'
    printf '\033[2K\n'
    printf 'plain\n'
    echo "to-stderr" >&2
    ;;
  exec)
    [ "$1" = "-i" ] && shift
    [ "$1" = "-t" ] && shift
    shift
    case "$1" in
      cat) exec cat ;;
      fail) exit "$2" ;;
      *) echo "ran: $*" ;;
    esac
    ;;
  *)
    echo "unsupported: $cmd" >&2
    exit 64
    ;;
esac
"#;

/// Resolve the path to the compiled `berth` binary.
pub fn berth_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("berth")
}

/// Captured result of one `berth` invocation.
#[derive(Debug)]
pub struct Outcome {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Temp dir with the fake `docker` script and optional env file.
pub struct Sandbox {
    dir: tempfile::TempDir,
    docker: PathBuf,
}

impl Sandbox {
    pub fn new() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let docker = dir.path().join("docker");
        std::fs::write(&docker, FAKE_DOCKER)?;
        std::fs::set_permissions(&docker, std::fs::Permissions::from_mode(0o755))?;
        Ok(Self { dir, docker })
    }

    /// Write a dotenv file into the sandbox and return its path.
    pub fn env_file(&self, contents: &str) -> anyhow::Result<PathBuf> {
        let path = self.dir.path().join("berth.env");
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    /// Run `berth <args>` with `stdin` piped in, waiting up to `timeout`.
    pub async fn run(&self, args: &[&str], stdin: &str, timeout: Duration) -> anyhow::Result<Outcome> {
        let binary = berth_binary();
        anyhow::ensure!(binary.exists(), "berth binary not found at {}", binary.display());

        let mut child = Command::new(&binary)
            .args(args)
            .env("BERTH_DOCKER", &self.docker)
            .env("BERTH_LOG_LEVEL", "warn")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut input) = child.stdin.take() {
            input.write_all(stdin.as_bytes()).await?;
            input.shutdown().await?;
        }

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| anyhow::anyhow!("berth {args:?} did not exit within {timeout:?}"))??;
        Ok(Outcome {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
