// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::*;
use crate::event::OutputLine;
use crate::test_support::{collect_events, line_texts, ExecScript, MockRuntime, Step};

const DEADLINE: Duration = Duration::from_secs(2);

fn request(argv: &[&str], attach_stdin: bool) -> ExecRequest {
    ExecRequest {
        container_id: "web".to_owned(),
        argv: argv.iter().map(|s| (*s).to_owned()).collect(),
        tty: false,
        attach_stdin,
    }
}

async fn start(mock: &Arc<MockRuntime>, req: ExecRequest, cancel: &CancellationToken) -> anyhow::Result<ExecIo> {
    let client: Arc<dyn RuntimeClient> = Arc::clone(mock) as Arc<dyn RuntimeClient>;
    ExecSession::start(client, req, cancel, &StreamSettings::default()).await
}

#[yare::parameterized(
    tty_plain       = { "ls", true, "ls\r" },
    tty_trailing_lf = { "ls\n", true, "ls\r" },
    tty_crlf        = { "a\r\nb", true, "a\rb\r" },
    tty_multi_line  = { "a\nb\n", true, "a\rb\r" },
    tty_empty       = { "", true, "\r" },
    pipe_plain      = { "ls", false, "ls\n" },
    pipe_crlf       = { "a\r\nb", false, "a\nb\n" },
    pipe_trailing   = { "ls\n", false, "ls\n" },
)]
fn input_framing(text: &str, tty: bool, expected: &str) {
    assert_eq!(frame_input(text, tty), expected);
}

#[tokio::test]
async fn output_and_exit_code_are_reported() -> anyhow::Result<()> {
    let mock = Arc::new(
        MockRuntime::new().with_exec(
            ExecScript::new(vec![Step::stdout("hello\nwor"), Step::stderr("warn\n"), Step::stdout("ld\n")])
                .exit_code(Some(7)),
        ),
    );
    let mut io = start(&mock, request(&["echo", "hi"], false), &CancellationToken::new()).await?;
    assert!(io.input.is_none());

    let events = collect_events(&mut io.events, DEADLINE).await?;
    assert_eq!(
        events,
        vec![
            OutputEvent::Line(OutputLine::stdout("hello")),
            OutputEvent::Line(OutputLine::stderr("warn")),
            OutputEvent::Line(OutputLine::stdout("world")),
        ]
    );
    assert_eq!(tokio::time::timeout(DEADLINE, io.exit.wait()).await?, 7);

    let execs = mock.execs();
    assert_eq!(execs.len(), 1);
    assert_eq!(execs[0].argv, vec!["echo", "hi"]);
    assert!(execs[0].input_closed(), "stdin is half-closed when not attached");
    Ok(())
}

#[tokio::test]
async fn pipe_input_lines_reach_a_line_reader() -> anyhow::Result<()> {
    let mock = Arc::new(MockRuntime::new().with_exec(ExecScript::new(Vec::new()).echo()));
    let mut io = start(&mock, request(&["cat"], true), &CancellationToken::new()).await?;
    let sink = io.input.take().ok_or_else(|| anyhow::anyhow!("expected input sink"))?;

    assert!(sink.write_line("a").await);
    assert!(sink.write_line("b\r\n").await);
    assert!(sink.write_raw(Bytes::from_static(b"c\n")).await);
    // Dropping the sink half-closes stdin; the echo stream then ends.
    drop(sink);

    let events = collect_events(&mut io.events, DEADLINE).await?;
    assert_eq!(line_texts(&events), vec!["a", "b", "c"]);
    assert_eq!(tokio::time::timeout(DEADLINE, io.exit.wait()).await?, 0);

    let record = &mock.execs()[0];
    assert_eq!(record.input(), b"a\nb\nc\n");
    assert!(record.input_closed());
    Ok(())
}

#[tokio::test]
async fn tty_input_ends_lines_with_carriage_return() -> anyhow::Result<()> {
    let mock = Arc::new(MockRuntime::new().with_exec(ExecScript::hanging()));
    let mut req = request(&["sh"], true);
    req.tty = true;
    let io = start(&mock, req, &CancellationToken::new()).await?;
    let sink = io.input.clone().ok_or_else(|| anyhow::anyhow!("expected input sink"))?;

    assert!(sink.write_line("a").await);
    assert!(sink.write_line("b").await);
    tokio::time::timeout(DEADLINE, async {
        while mock.execs()[0].input().len() < 4 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;
    assert_eq!(mock.execs()[0].input(), b"a\rb\r");

    io.stop.cancel();
    assert_eq!(tokio::time::timeout(DEADLINE, io.exit.wait()).await?, EXIT_SENTINEL);
    Ok(())
}

#[tokio::test]
async fn cancellation_resolves_sentinel_after_teardown() -> anyhow::Result<()> {
    let mock = Arc::new(MockRuntime::new().with_exec(ExecScript::hanging()));
    let cancel = CancellationToken::new();
    let mut io = start(&mock, request(&["sleep", "inf"], true), &cancel).await?;
    assert_eq!(io.exit.peek(), None);

    cancel.cancel();
    let code = tokio::time::timeout(DEADLINE, io.exit.clone().wait()).await?;
    assert_eq!(code, EXIT_SENTINEL);

    // Teardown finished before the exit code was published.
    assert_eq!(mock.stats.live(), 0);
    assert!(mock.execs()[0].input_closed());
    let events = collect_events(&mut io.events, DEADLINE).await?;
    assert!(events.is_empty());
    let sink = io.input.ok_or_else(|| anyhow::anyhow!("expected input sink"))?;
    assert!(!sink.write_line("late").await);
    Ok(())
}

/// Run a session to completion and report whether stdin was half-closed
/// by the time its transport was disposed.
async fn closed_at_dispose(script: ExecScript, cancel_first: bool) -> anyhow::Result<Option<bool>> {
    let mock = Arc::new(MockRuntime::new().with_exec(script));
    let cancel = CancellationToken::new();
    let io = start(&mock, request(&["sh"], true), &cancel).await?;
    if cancel_first {
        cancel.cancel();
    }
    tokio::time::timeout(DEADLINE, io.exit.wait()).await?;
    Ok(mock.execs()[0].input_closed_at_dispose())
}

#[tokio::test]
async fn cancelled_session_half_closes_before_dispose() -> anyhow::Result<()> {
    assert_eq!(closed_at_dispose(ExecScript::hanging(), true).await?, Some(true));
    Ok(())
}

#[tokio::test]
async fn finished_session_half_closes_before_dispose() -> anyhow::Result<()> {
    let script = ExecScript::new(vec![Step::stdout("done\n")]);
    assert_eq!(closed_at_dispose(script, false).await?, Some(true));
    Ok(())
}

#[tokio::test]
async fn session_stop_token_tears_down() -> anyhow::Result<()> {
    let mock = Arc::new(MockRuntime::new().with_exec(ExecScript::hanging()));
    let cancel = CancellationToken::new();
    let io = start(&mock, request(&["sh"], true), &cancel).await?;

    io.stop.cancel();
    assert_eq!(tokio::time::timeout(DEADLINE, io.exit.wait()).await?, EXIT_SENTINEL);
    assert!(!cancel.is_cancelled(), "session stop must not cancel the caller");
    Ok(())
}

#[tokio::test]
async fn transport_fault_ends_queue_with_fault() -> anyhow::Result<()> {
    let mock = Arc::new(
        MockRuntime::new()
            .with_exec(ExecScript::new(vec![Step::stdout("x\n"), Step::Fault("broken pipe".to_owned())])),
    );
    let mut io = start(&mock, request(&["ls"], false), &CancellationToken::new()).await?;

    let events = collect_events(&mut io.events, DEADLINE).await?;
    assert_eq!(line_texts(&events), vec!["x"]);
    match events.last() {
        Some(OutputEvent::Fault(fault)) => assert_eq!(fault.code, ErrorCode::Transport),
        other => anyhow::bail!("expected fault, got {other:?}"),
    }
    assert_eq!(tokio::time::timeout(DEADLINE, io.exit.wait()).await?, EXIT_SENTINEL);
    Ok(())
}

#[tokio::test]
async fn failed_exit_query_is_reported_as_runtime_fault() -> anyhow::Result<()> {
    let mock = Arc::new(MockRuntime::new().with_exec(ExecScript::new(Vec::new()).inspect_error("engine gone")));
    let mut io = start(&mock, request(&["true"], false), &CancellationToken::new()).await?;

    let events = collect_events(&mut io.events, DEADLINE).await?;
    match events.as_slice() {
        [OutputEvent::Fault(fault)] => {
            assert_eq!(fault.code, ErrorCode::Runtime);
            assert!(fault.message.contains("engine gone"));
        }
        other => anyhow::bail!("unexpected events: {other:?}"),
    }
    assert_eq!(io.exit.wait().await, EXIT_SENTINEL);
    Ok(())
}

#[tokio::test]
async fn missing_exit_code_resolves_sentinel() -> anyhow::Result<()> {
    let mock = Arc::new(MockRuntime::new().with_exec(ExecScript::new(Vec::new()).exit_code(None)));
    let io = start(&mock, request(&["true"], false), &CancellationToken::new()).await?;
    assert_eq!(tokio::time::timeout(DEADLINE, io.exit.wait()).await?, EXIT_SENTINEL);
    Ok(())
}

#[tokio::test]
async fn write_failure_closes_input_side_only() -> anyhow::Result<()> {
    let mock = Arc::new(
        MockRuntime::new().with_exec(ExecScript::new(vec![Step::Sleep(Duration::from_millis(100)), Step::stdout("done\n")]).fail_writes()),
    );
    let mut io = start(&mock, request(&["cat"], true), &CancellationToken::new()).await?;
    let sink = io.input.clone().ok_or_else(|| anyhow::anyhow!("expected input sink"))?;

    // The first write is accepted into the queue; the pump then fails and
    // stops accepting more.
    assert!(sink.write_line("a").await);
    tokio::time::timeout(DEADLINE, async {
        while !sink.is_closed() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;
    assert!(!sink.write_line("b").await);

    let events = collect_events(&mut io.events, DEADLINE).await?;
    assert_eq!(line_texts(&events), vec!["done"]);
    assert_eq!(io.exit.wait().await, 0);
    Ok(())
}

#[tokio::test]
async fn create_failure_is_returned() {
    let mock = Arc::new(MockRuntime::new());
    mock.fail_next_create("no such container");
    crate::assert_err_contains!(
        start(&mock, request(&["ls"], false), &CancellationToken::new()).await,
        "no such container"
    );
}
