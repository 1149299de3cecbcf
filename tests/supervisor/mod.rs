//! Supervisor module tests.

#[cfg(unix)]
mod registry_test;
#[cfg(unix)]
mod stream_test;

/// Verify the public supervisor types are exported from the library.
#[test]
fn test_supervisor_types_exported() {
    use relay_supervisor::supervisor::{
        DiagnosticMatcher, MetricsSnapshot, RegistryError, RingBuffer, StreamId, StreamRegistry,
        StreamSettings, StreamState,
    };

    let _ = StreamRegistry::new(StreamSettings::default());
    let _ = DiagnosticMatcher::default();
    let _: RingBuffer<MetricsSnapshot> = RingBuffer::new(1);
    let _: fn() -> RegistryError = || RegistryError::NotFound(StreamId::from("x"));
    assert_eq!(StreamState::default(), StreamState::Idle);
}
