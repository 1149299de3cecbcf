//! Tests for the per-stream supervisor against fake transcoder processes.

use std::time::Duration;

use relay_supervisor::supervisor::StreamState;

use crate::support::{fake_transcoder, settings, stream, LONG_RUNNING};

const SETTLE: Duration = Duration::from_secs(5);

#[tokio::test]
async fn clean_exit_settles_stopped_with_metrics() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_transcoder(
        &dir,
        "echo fps=25.0\necho bitrate=1500.0kbits/s\necho drop_frames=2\necho progress=end\nexit 0",
    );
    let stream = stream(settings(&binary));

    assert_eq!(stream.start(), StreamState::Running);
    assert_eq!(stream.wait_for_terminal(SETTLE).await, Some(StreamState::Stopped));

    let metrics = stream.metrics();
    assert_eq!(metrics.fps, Some(25.0));
    assert_eq!(metrics.bitrate_kbps, Some(1500.0));
    assert_eq!(metrics.dropped_frames, 2);
    assert!(metrics.last_update.is_some());
    assert!(metrics.cpu_percent.is_none());
    assert!(stream.last_error().is_none());
    assert!(stream.pid().is_none());
}

#[tokio::test]
async fn failure_keyword_becomes_last_error() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_transcoder(
        &dir,
        "echo 'Input #0, flv, from rtmp://src/app/key' >&2\necho 'Connection refused' >&2\necho 'Exiting normally' >&2\nexit 1",
    );
    let stream = stream(settings(&binary));

    stream.start();
    assert_eq!(stream.wait_for_terminal(SETTLE).await, Some(StreamState::Failed));
    assert_eq!(stream.last_error().as_deref(), Some("Connection refused"));
    assert_eq!(stream.logs().len(), 3);
}

#[tokio::test]
async fn nonzero_exit_without_keyword_reports_last_line() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_transcoder(&dir, "echo 'stream ended' >&2\nexit 3");
    let stream = stream(settings(&binary));

    stream.start();
    assert_eq!(stream.wait_for_terminal(SETTLE).await, Some(StreamState::Failed));
    assert_eq!(
        stream.last_error().as_deref(),
        Some("stream ended (transcoder exited with code 3)")
    );
}

#[tokio::test]
async fn missing_binary_fails_to_start() {
    let stream = stream(settings(std::path::Path::new(
        "/nonexistent/relay-supervisor/ffmpeg",
    )));

    assert_eq!(stream.start(), StreamState::FailedToStart);
    assert_eq!(stream.status(), StreamState::FailedToStart);
    assert!(stream.pid().is_none());
    assert!(stream.last_error().unwrap().starts_with("failed to start transcoder"));
    assert_eq!(stream.logs().len(), 1);
    assert_eq!(stream.episode(), 1);
}

#[tokio::test]
async fn duplicate_start_keeps_running_process() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_transcoder(&dir, LONG_RUNNING);
    let stream = stream(settings(&binary));

    assert_eq!(stream.start(), StreamState::Running);
    let pid = stream.pid();
    assert!(pid.is_some());

    assert_eq!(stream.start(), StreamState::Running);
    assert_eq!(stream.pid(), pid);
    assert_eq!(stream.episode(), 1);

    assert!(stream.stop());
    assert_eq!(stream.wait_for_terminal(SETTLE).await, Some(StreamState::Stopped));
    assert!(stream.last_error().is_none());
}

#[tokio::test]
async fn stop_is_observable_while_pending() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_transcoder(&dir, LONG_RUNNING);
    let stream = stream(settings(&binary));
    let mut states = stream.subscribe();

    stream.start();
    assert_eq!(*states.borrow_and_update(), StreamState::Running);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(stream.stop());
    assert_eq!(stream.status(), StreamState::Stopping);
    assert!(!stream.stop());

    let settled = tokio::time::timeout(SETTLE, states.wait_for(|s| s.is_terminal()))
        .await
        .unwrap()
        .map(|s| *s)
        .unwrap();
    assert_eq!(settled, StreamState::Stopped);
}

#[tokio::test]
async fn ignored_interrupt_escalates_to_kill() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_transcoder(&dir, "trap '' INT\nwhile true; do sleep 0.1; done");
    let mut settings = settings(&binary);
    settings.stop_grace = Duration::from_millis(200);
    let stream = stream(settings);

    stream.start();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(stream.stop());

    assert_eq!(stream.wait_for_terminal(SETTLE).await, Some(StreamState::Stopped));
    assert!(stream
        .logs()
        .iter()
        .any(|line| line.contains("killed after stop grace period")));
    assert!(stream.pid().is_none());
}

#[tokio::test]
async fn kill_skips_grace_period() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_transcoder(&dir, "trap '' INT\nwhile true; do sleep 0.1; done");
    let mut settings = settings(&binary);
    settings.stop_grace = Duration::from_secs(60);
    let stream = stream(settings);

    stream.start();
    stream.kill();
    assert_eq!(stream.wait_for_terminal(SETTLE).await, Some(StreamState::Stopped));
}

#[tokio::test]
async fn restart_resets_episode_state() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("started-once");
    let script = format!(
        "if [ -f '{m}' ]; then exit 0; fi\ntouch '{m}'\necho 'Error opening input' >&2\nexit 1",
        m = marker.display()
    );
    let binary = fake_transcoder(&dir, &script);
    let stream = stream(settings(&binary));

    stream.start();
    assert_eq!(stream.wait_for_terminal(SETTLE).await, Some(StreamState::Failed));
    assert!(stream.last_error().is_some());
    assert!(!stream.logs().is_empty());

    assert_eq!(stream.start(), StreamState::Running);
    assert_eq!(stream.episode(), 2);
    assert_eq!(stream.wait_for_terminal(SETTLE).await, Some(StreamState::Stopped));
    assert!(stream.last_error().is_none());
    assert!(stream.logs().is_empty());
}

#[tokio::test]
async fn resource_samples_fill_history() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_transcoder(&dir, LONG_RUNNING);
    let stream = stream(settings(&binary));

    stream.start();
    let sampled = crate::support::eventually(SETTLE, || stream.metrics_history().len() >= 2).await;
    assert!(sampled, "no resource samples recorded");

    let history = stream.metrics_history();
    assert!(history.iter().all(|s| s.memory_mb.is_some()));
    assert!(stream.metrics().cpu_percent.is_some());

    stream.stop();
    assert_eq!(stream.wait_for_terminal(SETTLE).await, Some(StreamState::Stopped));
    assert!(stream.metrics().cpu_percent.is_none());
    assert!(stream.metrics().memory_mb.is_none());
}

#[tokio::test]
async fn snapshot_reflects_stream() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_transcoder(&dir, LONG_RUNNING);
    let stream = stream(settings(&binary));

    stream.start();
    let snapshot = stream.snapshot();
    assert_eq!(snapshot.state, StreamState::Running);
    assert_eq!(snapshot.source_uri, "rtmp://src/app/key");
    assert_eq!(snapshot.destination_uri, "rtsp://127.0.0.1:8554/live");
    assert_eq!(snapshot.pid, stream.pid());

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["state"], "running");

    stream.stop();
    assert_eq!(stream.wait_for_terminal(SETTLE).await, Some(StreamState::Stopped));
}

/// Exits non-zero while a background child keeps the output pipes open.
const EXIT_WITH_OPEN_PIPES: &str = "(sleep 3) &\necho 'segfault-ish' >&2\nsleep 0.2\nexit 1";

fn draining_settings(binary: &std::path::Path) -> relay_supervisor::supervisor::StreamSettings {
    let mut settings = settings(binary);
    settings.reader_drain = Duration::from_secs(5);
    settings
}

#[tokio::test]
async fn exit_is_reported_while_output_drains() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_transcoder(&dir, EXIT_WITH_OPEN_PIPES);
    let stream = stream(draining_settings(&binary));

    stream.start();
    let settled = crate::support::eventually(Duration::from_secs(2), || {
        stream.status() != StreamState::Running
    })
    .await;
    assert!(settled, "exited transcoder still reported as running");

    assert_eq!(stream.status(), StreamState::Failed);
    assert!(stream.pid().is_none());
    assert!(!stream.stop());
    assert_eq!(stream.status(), StreamState::Failed);
    assert_eq!(
        stream.last_error().as_deref(),
        Some("segfault-ish (transcoder exited with code 1)")
    );
}

#[tokio::test]
async fn stop_after_unobserved_exit_keeps_failure() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_transcoder(&dir, EXIT_WITH_OPEN_PIPES);
    let stream = stream(draining_settings(&binary));

    stream.start();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(!stream.stop());
    assert_eq!(
        stream.wait_for_terminal(Duration::from_secs(10)).await,
        Some(StreamState::Failed)
    );
    assert!(stream.last_error().is_some_and(|e| e.contains("exited with code 1")));
}

/// Assert that `stop()` leaves a settled stream exactly as it was.
fn assert_stop_is_noop(stream: &relay_supervisor::supervisor::StreamSupervisor) {
    let before = stream.snapshot();
    assert!(before.state.is_terminal());

    assert!(!stream.stop());

    let after = stream.snapshot();
    assert_eq!(after.state, before.state);
    assert_eq!(after.pid, before.pid);
    assert!(after.pid.is_none());
    assert_eq!(after.episode, before.episode);
    assert_eq!(after.last_error, before.last_error);
}

#[tokio::test]
async fn stop_on_stopped_stream_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_transcoder(&dir, "exit 0");
    let stream = stream(settings(&binary));

    stream.start();
    assert_eq!(stream.wait_for_terminal(SETTLE).await, Some(StreamState::Stopped));
    assert_stop_is_noop(&stream);
}

#[tokio::test]
async fn stop_on_failed_stream_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_transcoder(&dir, "echo 'Error opening input' >&2\nexit 1");
    let stream = stream(settings(&binary));

    stream.start();
    assert_eq!(stream.wait_for_terminal(SETTLE).await, Some(StreamState::Failed));
    assert_stop_is_noop(&stream);
    assert_eq!(stream.last_error().as_deref(), Some("Error opening input"));
}

#[tokio::test]
async fn stop_on_failed_to_start_stream_is_noop() {
    let stream = stream(settings(std::path::Path::new(
        "/nonexistent/relay-supervisor/ffmpeg",
    )));

    assert_eq!(stream.start(), StreamState::FailedToStart);
    assert_stop_is_noop(&stream);
}
