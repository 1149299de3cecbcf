//! Periodic CPU and memory sampling of a transcoder process.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessStatus, System};
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;

use crate::supervisor::StreamEvent;

/// Default interval between resource samples.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// One resource reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// `None` until a previous reading of the same process exists to diff against.
    pub cpu_percent: Option<f32>,
    pub memory_mb: f64,
}

/// Error type for resource probes.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// The process no longer exists (or is a zombie awaiting reaping).
    #[error("Process {0} no longer exists")]
    ProcessGone(u32),
    /// Any other failure, including missing permissions.
    #[error("Failed to sample process {pid}: {reason}")]
    Failed { pid: u32, reason: String },
}

/// Source of per-process resource readings.
pub trait ProcessProbe: Send {
    /// Sample CPU and resident memory for `pid`.
    ///
    /// # Errors
    ///
    /// Returns `ProbeError::ProcessGone` once the process has exited.
    fn sample(&mut self, pid: u32) -> Result<ResourceUsage, ProbeError>;
}

/// Probe backed by `sysinfo`.
///
/// CPU usage is computed between consecutive refreshes, so the first
/// sample of a process reports it as unknown.
pub struct SysinfoProbe {
    system: System,
    primed: Option<u32>,
}

impl SysinfoProbe {
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: System::new(),
            primed: None,
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProbe for SysinfoProbe {
    fn sample(&mut self, pid: u32) -> Result<ResourceUsage, ProbeError> {
        let sys_pid = Pid::from_u32(pid);
        if !self.system.refresh_process(sys_pid) {
            self.primed = None;
            return Err(ProbeError::ProcessGone(pid));
        }

        let process = self.system.process(sys_pid).ok_or(ProbeError::Failed {
            pid,
            reason: "process refreshed but not readable".to_string(),
        })?;

        if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
            return Err(ProbeError::ProcessGone(pid));
        }

        #[allow(clippy::cast_precision_loss)]
        let memory_mb = process.memory() as f64 / BYTES_PER_MB;

        let cpu_percent = (self.primed == Some(pid)).then(|| process.cpu_usage());
        self.primed = Some(pid);

        Ok(ResourceUsage {
            cpu_percent,
            memory_mb,
        })
    }
}

/// Samples one process on a fixed interval until it exits or is cancelled.
pub struct ResourceSampler<P: ProcessProbe = SysinfoProbe> {
    pid: u32,
    interval: Duration,
    probe: P,
}

impl ResourceSampler<SysinfoProbe> {
    #[must_use]
    pub fn new(pid: u32, interval: Duration) -> Self {
        Self::with_probe(pid, interval, SysinfoProbe::new())
    }
}

impl<P: ProcessProbe> ResourceSampler<P> {
    #[must_use]
    pub fn with_probe(pid: u32, interval: Duration, probe: P) -> Self {
        Self {
            pid,
            interval,
            probe,
        }
    }

    /// Run the sampling loop.
    ///
    /// Each successful sample is sent as `StreamEvent::Resources`. When the
    /// process is gone the loop ends with `ResourcesLost`; any other probe
    /// failure ends it with `SamplingFailed`. Nothing escapes the task.
    pub async fn run(mut self, tx: Sender<StreamEvent>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.interval) => {}
            }

            let event = match self.probe.sample(self.pid) {
                Ok(usage) => StreamEvent::Resources(usage),
                Err(ProbeError::ProcessGone(_)) => {
                    tracing::debug!(pid = self.pid, "Process gone, sampler exiting");
                    let _ = tx.send(StreamEvent::ResourcesLost).await;
                    break;
                }
                Err(e) => {
                    tracing::warn!(pid = self.pid, error = %e, "Resource sampling stopped");
                    let _ = tx.send(StreamEvent::SamplingFailed(e.to_string())).await;
                    break;
                }
            };

            if tx.send(event).await.is_err() {
                break;
            }
        }
    }
}
