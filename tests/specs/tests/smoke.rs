// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `berth` binary against a
//! fake `docker` script.

use std::time::Duration;

use berth_specs::Sandbox;

const TIMEOUT: Duration = Duration::from_secs(10);

// -- logs ---------------------------------------------------------------------

#[tokio::test]
async fn logs_strip_escapes_and_blank_lines() -> anyhow::Result<()> {
    let sandbox = Sandbox::new()?;
    let out = sandbox.run(&["logs", "web"], "", TIMEOUT).await?;

    assert_eq!(out.status, Some(0), "{out:?}");
    assert_eq!(out.stdout, "green\nplain\n");
    assert!(out.stderr.contains("to-stderr"), "{out:?}");
    Ok(())
}

#[tokio::test]
async fn raw_logs_keep_escapes() -> anyhow::Result<()> {
    let sandbox = Sandbox::new()?;
    let out = sandbox.run(&["logs", "--raw", "web"], "", TIMEOUT).await?;

    assert_eq!(out.status, Some(0), "{out:?}");
    assert!(out.stdout.contains("\x1b[32mgreen"), "{out:?}");
    Ok(())
}

// -- exec ---------------------------------------------------------------------

#[tokio::test]
async fn exec_prints_output_and_exit_marker() -> anyhow::Result<()> {
    let sandbox = Sandbox::new()?;
    let out = sandbox.run(&["exec", "web", "--", "uname", "-a"], "", TIMEOUT).await?;

    assert_eq!(out.status, Some(0), "{out:?}");
    assert_eq!(out.stdout, "ran: uname -a\n[exit] 0\n");
    Ok(())
}

#[tokio::test]
async fn exec_propagates_exit_code() -> anyhow::Result<()> {
    let sandbox = Sandbox::new()?;
    let out = sandbox.run(&["exec", "web", "--", "fail", "4"], "", TIMEOUT).await?;

    assert_eq!(out.status, Some(4), "{out:?}");
    assert!(out.stdout.ends_with("[exit] 4\n"), "{out:?}");
    Ok(())
}

#[tokio::test]
async fn exec_forwards_stdin() -> anyhow::Result<()> {
    let sandbox = Sandbox::new()?;
    let out = sandbox.run(&["exec", "-i", "web", "--", "cat"], "hello\n", TIMEOUT).await?;

    assert_eq!(out.status, Some(0), "{out:?}");
    assert_eq!(out.stdout, "hello\n[exit] 0\n");
    Ok(())
}

#[tokio::test]
async fn invalid_flags_exit_with_usage_status() -> anyhow::Result<()> {
    let sandbox = Sandbox::new()?;
    let out = sandbox.run(&["--chunk-size", "0", "logs", "web"], "", TIMEOUT).await?;

    assert_eq!(out.status, Some(2), "{out:?}");
    assert!(out.stderr.contains("--chunk-size"), "{out:?}");
    Ok(())
}

// -- shell --------------------------------------------------------------------

#[tokio::test]
async fn shell_injects_env_file() -> anyhow::Result<()> {
    let sandbox = Sandbox::new()?;
    let env = sandbox.env_file("GREETING=\"it's me\"\n")?;
    let env = env.to_string_lossy();
    let out = sandbox.run(&["--env-file", &env, "shell", "web"], "", TIMEOUT).await?;

    assert_eq!(out.status, Some(0), "{out:?}");
    assert!(
        out.stdout.contains(r#"ran: /bin/sh -lc export GREETING='it'"'"'s me'; exec '/bin/sh' '-i'"#),
        "{out:?}"
    );
    assert!(out.stdout.ends_with("[exit] 0\n"), "{out:?}");
    Ok(())
}
