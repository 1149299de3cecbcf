//! Integration tests for the stream registry.

use std::sync::Arc;
use std::time::Duration;

use relay_supervisor::supervisor::{
    RegistryError, StreamId, StreamRegistry, StreamRequest, StreamState,
};

use crate::support::{destination, eventually, fake_transcoder, settings, LONG_RUNNING};

const SETTLE: Duration = Duration::from_secs(5);

fn request() -> StreamRequest {
    StreamRequest::new("rtmp://src/app/key", destination())
}

#[tokio::test]
async fn create_launches_relay_to_destination() {
    let dir = tempfile::tempdir().unwrap();
    let args_file = dir.path().join("args");
    let script = format!("echo \"$@\" > '{}'\n{LONG_RUNNING}", args_file.display());
    let binary = fake_transcoder(&dir, &script);
    let registry = StreamRegistry::new(settings(&binary));

    let stream = registry.create(request()).unwrap();
    assert_eq!(stream.status(), StreamState::Running);
    assert_eq!(stream.destination_uri(), "rtsp://127.0.0.1:8554/live");
    assert_eq!(registry.len(), 1);

    let written = eventually(SETTLE, || {
        std::fs::read_to_string(&args_file).is_ok_and(|args| args.ends_with('\n'))
    })
    .await;
    assert!(written);
    let args = std::fs::read_to_string(&args_file).unwrap();
    assert!(args.contains("-i rtmp://src/app/key"));
    assert!(args.contains("-c:v copy -c:a copy"));
    assert!(args.trim_end().ends_with("rtsp://127.0.0.1:8554/live"));

    let statuses = registry.list_statuses();
    assert_eq!(statuses.get(stream.id()), Some(&StreamState::Running));

    registry.shutdown(SETTLE).await;
    assert_eq!(stream.status(), StreamState::Stopped);
}

#[tokio::test]
async fn create_with_id_returns_active_stream() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_transcoder(&dir, LONG_RUNNING);
    let registry = StreamRegistry::new(settings(&binary));
    let id = StreamId::from("cam-1");

    let first = registry.create_with_id(id.clone(), request()).unwrap();
    let second = registry.create_with_id(id.clone(), request()).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.episode(), 1);
    assert_eq!(registry.len(), 1);

    registry.shutdown(SETTLE).await;
}

#[tokio::test]
async fn create_with_id_replaces_terminal_stream() {
    let registry = StreamRegistry::new(settings(std::path::Path::new(
        "/nonexistent/relay-supervisor/ffmpeg",
    )));
    let id = StreamId::from("cam-1");

    let first = registry.create_with_id(id.clone(), request()).unwrap();
    assert_eq!(first.status(), StreamState::FailedToStart);

    let second = registry.create_with_id(id.clone(), request()).unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(registry.len(), 1);
    assert!(registry
        .get_last_error(&id)
        .unwrap()
        .is_some_and(|e| e.contains("not found")));
}

#[tokio::test]
async fn invalid_request_registers_nothing() {
    let registry = StreamRegistry::default();

    let err = registry
        .create(StreamRequest::new("not a uri", destination()))
        .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidSource { .. }));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn remove_requires_force_for_live_stream() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_transcoder(&dir, LONG_RUNNING);
    let registry = StreamRegistry::new(settings(&binary));

    let stream = registry.create(request()).unwrap();
    let id = stream.id().clone();

    let err = registry.remove(&id, false).await.unwrap_err();
    assert!(matches!(
        err,
        RegistryError::NotTerminal {
            state: StreamState::Running,
            ..
        }
    ));
    assert_eq!(registry.len(), 1);

    let removed = registry.remove(&id, true).await.unwrap();
    assert!(removed.status().is_terminal());
    assert!(registry.is_empty());
    assert!(matches!(
        registry.get_status(&id),
        Err(RegistryError::NotFound(_))
    ));
}

#[tokio::test]
async fn stopped_stream_can_be_restarted_and_removed() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_transcoder(&dir, LONG_RUNNING);
    let registry = StreamRegistry::new(settings(&binary));

    let stream = registry.create(request()).unwrap();
    let id = stream.id().clone();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(registry.stop(&id).unwrap());
    assert_eq!(stream.wait_for_terminal(SETTLE).await, Some(StreamState::Stopped));

    assert_eq!(registry.start(&id).unwrap(), StreamState::Running);
    assert_eq!(stream.episode(), 2);
    tokio::time::sleep(Duration::from_millis(200)).await;
    registry.stop(&id).unwrap();
    assert_eq!(stream.wait_for_terminal(SETTLE).await, Some(StreamState::Stopped));

    registry.remove(&id, false).await.unwrap();
    assert!(registry.is_empty());
}

#[tokio::test]
async fn shutdown_stops_every_stream() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_transcoder(&dir, LONG_RUNNING);
    let registry = StreamRegistry::new(settings(&binary));

    let a = registry.create_with_id(StreamId::from("a"), request()).unwrap();
    let b = registry.create_with_id(StreamId::from("b"), request()).unwrap();
    assert_eq!(
        registry.list_statuses().keys().collect::<Vec<_>>(),
        vec![&StreamId::from("a"), &StreamId::from("b")]
    );

    registry.shutdown(SETTLE).await;
    assert!(a.status().is_terminal());
    assert!(b.status().is_terminal());
}
