// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::*;
use crate::error::ErrorCode;
use crate::event::OutputLine;
use crate::test_support::{collect_events, line_texts, MockRuntime, Step};

const DEADLINE: Duration = Duration::from_secs(2);

fn streamer(mock: &Arc<MockRuntime>) -> LogStreamer {
    let client: Arc<dyn RuntimeClient> = Arc::clone(mock) as Arc<dyn RuntimeClient>;
    LogStreamer::new(client, StreamSettings::default())
}

#[tokio::test]
async fn split_chunks_arrive_as_whole_lines() -> anyhow::Result<()> {
    let mock = Arc::new(MockRuntime::new().with_logs(vec![Step::stdout("line1\nli"), Step::stdout("ne2\n")]));
    let mut logs = streamer(&mock);

    let mut stream = logs.start(LogRequest::new("web"), &CancellationToken::new()).await?;
    let events = collect_events(&mut stream.events, DEADLINE).await?;

    assert_eq!(line_texts(&events), vec!["line1", "line2"]);
    assert_eq!(mock.stats.disposed(), 1);
    Ok(())
}

#[tokio::test]
async fn stderr_lines_are_flagged() -> anyhow::Result<()> {
    let mock = Arc::new(
        MockRuntime::new().with_logs(vec![Step::stdout("out\n"), Step::stderr("err\n"), Step::stdout("tail")]),
    );
    let mut logs = streamer(&mock);

    let mut stream = logs.start(LogRequest::new("web"), &CancellationToken::new()).await?;
    let events = collect_events(&mut stream.events, DEADLINE).await?;

    assert_eq!(
        events,
        vec![
            OutputEvent::Line(OutputLine::stdout("out")),
            OutputEvent::Line(OutputLine::stderr("err")),
            OutputEvent::Line(OutputLine::stdout("tail")),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn request_is_passed_through() -> anyhow::Result<()> {
    let mock = Arc::new(MockRuntime::new());
    let mut logs = streamer(&mock);

    let request = LogRequest::new("db").follow(true).tail("100");
    let mut stream = logs.start(request.clone(), &CancellationToken::new()).await?;
    collect_events(&mut stream.events, DEADLINE).await?;

    assert_eq!(mock.log_requests(), vec![request]);
    Ok(())
}

#[tokio::test]
async fn transport_fault_is_final_item() -> anyhow::Result<()> {
    let mock = Arc::new(
        MockRuntime::new().with_logs(vec![Step::stdout("before\npart"), Step::Fault("connection reset".to_owned())]),
    );
    let mut logs = streamer(&mock);

    let mut stream = logs.start(LogRequest::new("web"), &CancellationToken::new()).await?;
    let events = collect_events(&mut stream.events, DEADLINE).await?;

    assert_eq!(line_texts(&events), vec!["before", "part"]);
    match events.last() {
        Some(OutputEvent::Fault(fault)) => {
            assert_eq!(fault.code, ErrorCode::Transport);
            assert!(fault.message.contains("connection reset"));
        }
        other => anyhow::bail!("expected trailing fault, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn external_cancel_completes_follow_stream() -> anyhow::Result<()> {
    let mock = Arc::new(MockRuntime::new().with_logs(vec![Step::stdout("ready\n"), Step::Hang]));
    let mut logs = streamer(&mock);
    let cancel = CancellationToken::new();

    let mut stream = logs.start(LogRequest::new("web").follow(true), &cancel).await?;
    let first = tokio::time::timeout(DEADLINE, stream.events.recv()).await?;
    assert_eq!(first, Some(OutputEvent::Line(OutputLine::stdout("ready"))));

    cancel.cancel();
    let rest = collect_events(&mut stream.events, DEADLINE).await?;
    assert!(rest.is_empty(), "no fault after cancellation: {rest:?}");
    logs.stop().await;
    assert_eq!(mock.stats.disposed(), 1);
    Ok(())
}

#[tokio::test]
async fn starting_again_tears_down_previous_session() -> anyhow::Result<()> {
    let mock = Arc::new(
        MockRuntime::new()
            .with_logs(vec![Step::stdout("old\n"), Step::Hang])
            .with_logs(vec![Step::stdout("new\n")]),
    );
    let mut logs = streamer(&mock);
    let cancel = CancellationToken::new();

    let mut first = logs.start(LogRequest::new("a").follow(true), &cancel).await?;
    let mut second = logs.start(LogRequest::new("b"), &cancel).await?;

    // The first queue was already completed when `start` returned.
    let old = collect_events(&mut first.events, Duration::from_millis(100)).await?;
    assert!(line_texts(&old).len() <= 1);
    let new = collect_events(&mut second.events, DEADLINE).await?;
    assert_eq!(line_texts(&new), vec!["new"]);
    assert_eq!(mock.stats.max_live(), 1);
    assert_ne!(first.id, second.id);
    Ok(())
}

#[tokio::test]
async fn stop_is_idempotent() -> anyhow::Result<()> {
    let mock = Arc::new(MockRuntime::new().with_logs(vec![Step::Hang]));
    let mut logs = streamer(&mock);
    assert!(!logs.is_active());

    let _stream = logs.start(LogRequest::new("web").follow(true), &CancellationToken::new()).await?;
    assert!(logs.is_active());
    logs.stop().await;
    logs.stop().await;
    assert!(!logs.is_active());
    assert_eq!(mock.stats.live(), 0);
    Ok(())
}
