//! Fake transcoder scripts for exercising real processes.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use relay_supervisor::supervisor::{StreamId, StreamSettings, StreamSupervisor};
use relay_supervisor::transcoder::Destination;
use tempfile::TempDir;

/// Runs until interrupted, then exits cleanly.
pub const LONG_RUNNING: &str = "trap 'exit 0' INT TERM\nwhile true; do sleep 0.1; done";

/// Write an executable `/bin/sh` script standing in for ffmpeg.
pub fn fake_transcoder(dir: &TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("ffmpeg");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

/// Settings with short timeouts pointing at `binary`.
pub fn settings(binary: &Path) -> StreamSettings {
    StreamSettings {
        binary: binary.to_path_buf(),
        sample_interval: Duration::from_millis(50),
        stop_grace: Duration::from_secs(2),
        reader_drain: Duration::from_millis(500),
        ..Default::default()
    }
}

pub fn destination() -> Destination {
    Destination::new("rtsp", "127.0.0.1", 8554, "live")
}

pub fn stream(settings: StreamSettings) -> StreamSupervisor {
    StreamSupervisor::new(
        StreamId::from("test"),
        "rtmp://src/app/key",
        destination(),
        Arc::new(settings),
    )
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
