//! Transcoder process spawning and control.
//!
//! This module provides a builder for the ffmpeg relay invocation and a
//! handle type owning the spawned child. Everything above this layer talks
//! about streams; everything below it is argv and pipes.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use serde::{Deserialize, Serialize};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

/// Binary used when no override is configured.
pub const DEFAULT_BINARY: &str = "ffmpeg";

/// Error type for process spawning operations.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    /// The binary was not found.
    #[error("Transcoder binary not found: {0}")]
    NotFound(PathBuf),
    /// Permission denied when spawning.
    #[error("Permission denied executing {0}")]
    PermissionDenied(PathBuf),
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpawnError {
    /// Create a `SpawnError` from an I/O error, classifying common cases.
    fn from_io(err: std::io::Error, binary: &Path) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(binary.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(binary.to_path_buf()),
            _ => Self::Io(err),
        }
    }
}

/// Where the relay pushes its output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Destination {
    #[must_use]
    pub fn new(
        scheme: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            port,
            path: path.into(),
        }
    }

    /// Render as `scheme://host:port/path`.
    #[must_use]
    pub fn uri(&self) -> String {
        format!(
            "{}://{}:{}/{}",
            self.scheme,
            self.host,
            self.port,
            self.path.trim_start_matches('/')
        )
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.uri())
    }
}

/// Builder for the transcoder argument vector.
#[derive(Debug, Clone)]
pub struct TranscoderCommand {
    source: String,
    destination: String,
    log_level: String,
    output_format: String,
    rtsp_transport: Option<String>,
    reconnect_delay_max: Option<u32>,
}

impl TranscoderCommand {
    /// Create a new builder relaying `source` to `destination` with stream copy.
    #[must_use]
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            log_level: "warning".to_string(),
            output_format: "rtsp".to_string(),
            rtsp_transport: Some("tcp".to_string()),
            reconnect_delay_max: None,
        }
    }

    /// Set the diagnostic verbosity passed to `-loglevel`.
    #[must_use]
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Set the output container format passed to `-f`.
    #[must_use]
    pub fn output_format(mut self, format: impl Into<String>) -> Self {
        self.output_format = format.into();
        self
    }

    /// Set or clear the RTSP transport hint.
    #[must_use]
    pub fn rtsp_transport(mut self, transport: Option<String>) -> Self {
        self.rtsp_transport = transport;
        self
    }

    /// Enable input reconnection with the given maximum delay in seconds.
    #[must_use]
    pub fn reconnect(mut self, delay_max_secs: Option<u32>) -> Self {
        self.reconnect_delay_max = delay_max_secs;
        self
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Build the command-line arguments.
    #[must_use]
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-nostats".to_string(),
            "-loglevel".to_string(),
            self.log_level.clone(),
        ];

        if let Some(delay) = self.reconnect_delay_max {
            args.extend([
                "-reconnect".to_string(),
                "1".to_string(),
                "-reconnect_streamed".to_string(),
                "1".to_string(),
                "-reconnect_delay_max".to_string(),
                delay.to_string(),
            ]);
        }

        args.extend([
            "-i".to_string(),
            self.source.clone(),
            "-c:v".to_string(),
            "copy".to_string(),
            "-c:a".to_string(),
            "copy".to_string(),
            "-progress".to_string(),
            "pipe:1".to_string(),
            "-f".to_string(),
            self.output_format.clone(),
        ]);

        if let Some(transport) = &self.rtsp_transport {
            args.push("-rtsp_transport".to_string());
            args.push(transport.clone());
        }

        args.push(self.destination.clone());
        args
    }

    /// Render the full invocation as a shell-safe string for logging.
    #[must_use]
    pub fn display_line(&self, binary: &Path) -> String {
        let binary = binary.to_string_lossy();
        std::iter::once(shell_escape::escape(binary))
            .chain(
                self.build_args()
                    .into_iter()
                    .map(|arg| shell_escape::escape(arg.into())),
            )
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A running transcoder process.
#[derive(Debug)]
pub struct TranscoderProcess {
    child: Child,
}

impl TranscoderProcess {
    /// Spawn `binary` with the arguments from `command`.
    ///
    /// Stdout carries the progress stream, stderr the diagnostics. The child
    /// is killed if this handle is dropped while it is still running.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process fails to spawn.
    pub fn spawn(binary: &Path, command: &TranscoderCommand) -> Result<Self, SpawnError> {
        let child = Command::new(binary)
            .args(command.build_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SpawnError::from_io(e, binary))?;

        Ok(Self { child })
    }

    /// Take ownership of the stdout handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take ownership of the stderr handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Get the process ID, if still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Send a kill signal without waiting for the exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the kill signal cannot be sent.
    pub fn start_kill(&mut self) -> std::io::Result<()> {
        self.child.start_kill()
    }
}

/// Ask the process with `pid` to shut down cleanly.
///
/// On Unix this delivers SIGINT, which ffmpeg treats like pressing `q`:
/// it flushes the muxer and exits with status 0. Other platforms have no
/// graceful equivalent and report `Unsupported`.
///
/// # Errors
///
/// Returns an error if the signal cannot be delivered.
pub fn interrupt(pid: u32) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let pid = i32::try_from(pid)
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid overflow"))?;
        kill(Pid::from_raw(pid), Signal::SIGINT).map_err(std::io::Error::from)
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "graceful interrupt is only available on unix",
        ))
    }
}
