//! Per-stream supervision: one transcoder process, its readers and sampler.
//!
//! Each `start()` begins a new *episode*. The episode's readers and sampler
//! send `StreamEvent`s to a monitor task that owns the child process; the
//! monitor is the only background writer of the stream's state and performs
//! the single post-exit reconciliation. Everything is tagged with the episode
//! number so stragglers from an old episode never leak into a new one.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::supervisor::{
    DiagnosticMatcher, MetricsSnapshot, ResourceSampler, RingBuffer, StreamEvent, StreamId,
    StreamState, DEFAULT_HISTORY_CAPACITY, DEFAULT_LOG_CAPACITY, DEFAULT_SAMPLE_INTERVAL,
};
use crate::transcoder::{
    interrupt, read_channel, Destination, OutputChannel, SpawnError, TranscoderCommand,
    TranscoderProcess, DEFAULT_BINARY,
};

/// Capacity of the per-episode event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default time a stopped transcoder gets before it is killed.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);

/// Default time readers keep draining after cancellation or process exit.
pub const DEFAULT_READER_DRAIN: Duration = Duration::from_secs(2);

/// Everything an episode needs to know besides the stream's identity.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub binary: PathBuf,
    pub log_level: String,
    pub output_format: String,
    pub rtsp_transport: Option<String>,
    /// Maximum reconnect delay in seconds; `None` disables reconnection.
    pub reconnect_delay_max: Option<u32>,
    pub history_capacity: usize,
    pub log_capacity: usize,
    pub sample_interval: Duration,
    pub stop_grace: Duration,
    pub reader_drain: Duration,
    pub matcher: DiagnosticMatcher,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_BINARY),
            log_level: "warning".to_string(),
            output_format: "rtsp".to_string(),
            rtsp_transport: Some("tcp".to_string()),
            reconnect_delay_max: None,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            log_capacity: DEFAULT_LOG_CAPACITY,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            stop_grace: DEFAULT_STOP_GRACE,
            reader_drain: DEFAULT_READER_DRAIN,
            matcher: DiagnosticMatcher::default(),
        }
    }
}

/// Serializable view of a stream at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSnapshot {
    pub id: StreamId,
    pub source_uri: String,
    pub destination_uri: String,
    pub state: StreamState,
    pub episode: u64,
    pub pid: Option<u32>,
    pub last_error: Option<String>,
    pub metrics: MetricsSnapshot,
}

/// How an episode's process ended, captured the moment it was reaped.
struct ExitRecord {
    status: Result<ExitStatus, String>,
    was_stopping: bool,
}

struct StreamInner {
    state: StreamState,
    episode: u64,
    pid: Option<u32>,
    exit: Option<ExitRecord>,
    last_error: Option<String>,
    metrics: MetricsSnapshot,
    history: RingBuffer<MetricsSnapshot>,
    logs: RingBuffer<String>,
}

impl StreamInner {
    fn record_error(&mut self, message: String) {
        if self.last_error.is_none() {
            self.last_error = Some(message);
        }
    }

    fn apply(&mut self, event: StreamEvent, matcher: &DiagnosticMatcher) {
        match event {
            StreamEvent::Progress(update) => {
                self.metrics.apply(update);
                self.metrics.touch();
            }
            StreamEvent::Diagnostic(line) => {
                if matcher.is_failure(&line) {
                    self.record_error(line.clone());
                }
                self.logs.push(line);
            }
            StreamEvent::ReadFailed { channel, error } => {
                let message = format!("failed to read {channel} output: {error}");
                self.record_error(message.clone());
                self.logs.push(message);
            }
            StreamEvent::Resources(usage) => {
                // Late samples must not resurrect a reaped process.
                if self.pid.is_none() {
                    return;
                }
                self.metrics.cpu_percent = usage.cpu_percent;
                self.metrics.memory_mb = Some(usage.memory_mb);
                self.metrics.touch();
                self.history.push(self.metrics.clone());
            }
            StreamEvent::ResourcesLost => self.metrics.clear_resources(),
            StreamEvent::SamplingFailed(reason) => {
                self.metrics.clear_resources();
                self.logs.push(format!("resource sampling stopped: {reason}"));
            }
        }
    }
}

/// State shared between a `StreamSupervisor` and its episode tasks.
struct Shared {
    id: StreamId,
    inner: Mutex<StreamInner>,
    state_tx: watch::Sender<StreamState>,
    matcher: DiagnosticMatcher,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, StreamInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, inner: &mut StreamInner, next: StreamState) -> bool {
        if !inner.state.can_transition_to(next) {
            tracing::warn!(
                stream_id = %self.id,
                from = %inner.state,
                to = %next,
                "Ignoring illegal state transition"
            );
            return false;
        }
        tracing::debug!(stream_id = %self.id, from = %inner.state, to = %next, "State transition");
        inner.state = next;
        self.state_tx.send_replace(next);
        true
    }

    fn apply(&self, episode: u64, event: StreamEvent) {
        let mut inner = self.lock();
        if inner.episode == episode {
            inner.apply(event, &self.matcher);
        }
    }

    fn note(&self, episode: u64, line: String) {
        let mut inner = self.lock();
        if inner.episode == episode {
            inner.logs.push(line);
        }
    }

    /// Guard on the stream state with any captured exit already settled.
    fn lock_settled(&self) -> MutexGuard<'_, StreamInner> {
        let mut inner = self.lock();
        self.settle(&mut inner);
        inner
    }

    /// Record that the episode's process was reaped. The terminal state is
    /// decided from the state at this instant, not when output has drained.
    fn exited(&self, episode: u64, exit: &std::io::Result<ExitStatus>) {
        let mut inner = self.lock();
        if inner.episode != episode || !inner.state.is_active() || inner.exit.is_some() {
            return;
        }

        match exit {
            Ok(status) => tracing::info!(
                stream_id = %self.id,
                episode,
                status = %status,
                state = %inner.state,
                "Transcoder exited"
            ),
            Err(e) => tracing::error!(stream_id = %self.id, episode, error = %e, "Lost track of transcoder"),
        }

        inner.pid = None;
        inner.metrics.clear_resources();
        inner.exit = Some(ExitRecord {
            status: exit.as_ref().copied().map_err(ToString::to_string),
            was_stopping: inner.state == StreamState::Stopping,
        });
    }

    /// Move an exited episode to its terminal state. Idempotent.
    fn settle(&self, inner: &mut StreamInner) {
        let Some(exit) = inner.exit.take() else {
            return;
        };
        if !inner.state.is_active() {
            return;
        }

        let next = match (&exit.status, exit.was_stopping) {
            (_, true) => StreamState::Stopped,
            (Ok(status), false) if status.success() => StreamState::Stopped,
            (Ok(status), false) => {
                let summary = describe_exit(*status);
                let last_line = inner.logs.iter().rev().find(|l| !l.trim().is_empty());
                let message = match last_line {
                    Some(line) => format!("{line} ({summary})"),
                    None => summary,
                };
                inner.record_error(message);
                StreamState::Failed
            }
            (Err(e), false) => {
                inner.record_error(format!("failed to wait for transcoder: {e}"));
                StreamState::Failed
            }
        };
        self.transition(inner, next);
    }

    /// Settle the episode once its output has drained.
    fn finish(&self, episode: u64) {
        let mut inner = self.lock();
        if inner.episode == episode {
            self.settle(&mut inner);
        }
    }

    /// Settle an episode whose monitor ended without reconciling.
    fn abandon(&self, episode: u64) {
        let mut inner = self.lock();
        if inner.episode != episode {
            return;
        }
        self.settle(&mut inner);
        if !inner.state.is_active() {
            return;
        }
        inner.pid = None;
        inner.metrics.clear_resources();
        let next = if inner.state == StreamState::Stopping {
            StreamState::Stopped
        } else {
            inner.record_error("supervision of the transcoder ended unexpectedly".to_string());
            StreamState::Failed
        };
        self.transition(&mut inner, next);
    }
}

fn describe_exit(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("transcoder exited with code {code}"),
        None => format!("transcoder terminated ({status})"),
    }
}

/// Handles for the background tasks of the current episode.
struct EpisodeHandle {
    episode: u64,
    stop: CancellationToken,
    kill: CancellationToken,
    monitor: JoinHandle<()>,
}

/// Supervises one relay from `source_uri` to `destination`.
pub struct StreamSupervisor {
    source_uri: String,
    destination: Destination,
    settings: Arc<StreamSettings>,
    shared: Arc<Shared>,
    control: Mutex<Option<EpisodeHandle>>,
}

impl StreamSupervisor {
    /// Create an idle supervisor. Nothing is spawned until `start()`.
    #[must_use]
    pub fn new(
        id: StreamId,
        source_uri: impl Into<String>,
        destination: Destination,
        settings: Arc<StreamSettings>,
    ) -> Self {
        let (state_tx, _) = watch::channel(StreamState::Idle);
        let inner = StreamInner {
            state: StreamState::Idle,
            episode: 0,
            pid: None,
            exit: None,
            last_error: None,
            metrics: MetricsSnapshot::default(),
            history: RingBuffer::new(settings.history_capacity),
            logs: RingBuffer::new(settings.log_capacity),
        };
        let shared = Shared {
            id,
            inner: Mutex::new(inner),
            state_tx,
            matcher: settings.matcher.clone(),
        };

        Self {
            source_uri: source_uri.into(),
            destination,
            settings,
            shared: Arc::new(shared),
            control: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn id(&self) -> &StreamId {
        &self.shared.id
    }

    #[must_use]
    pub fn source_uri(&self) -> &str {
        &self.source_uri
    }

    #[must_use]
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    #[must_use]
    pub fn destination_uri(&self) -> String {
        self.destination.uri()
    }

    /// The invocation this stream launches.
    #[must_use]
    pub fn command(&self) -> TranscoderCommand {
        TranscoderCommand::new(self.source_uri.clone(), self.destination.uri())
            .log_level(self.settings.log_level.clone())
            .output_format(self.settings.output_format.clone())
            .rtsp_transport(self.settings.rtsp_transport.clone())
            .reconnect(self.settings.reconnect_delay_max)
    }

    fn control(&self) -> MutexGuard<'_, Option<EpisodeHandle>> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin a new episode and return the resulting state.
    ///
    /// A no-op (with a warning) while a process is still live. Otherwise
    /// error, metrics, history and logs are reset, the transcoder is
    /// spawned, and its readers and sampler are started. Returns as soon as
    /// the spawn is confirmed. Must be called within a Tokio runtime.
    pub fn start(&self) -> StreamState {
        let mut control = self.control();

        let episode = {
            let mut inner = self.shared.lock_settled();
            if !inner.state.can_start() {
                tracing::warn!(
                    stream_id = %self.shared.id,
                    state = %inner.state,
                    "Stream already active, ignoring start"
                );
                return inner.state;
            }
            inner.episode += 1;
            inner.pid = None;
            inner.exit = None;
            inner.last_error = None;
            inner.metrics = MetricsSnapshot::default();
            inner.history.clear();
            inner.logs.clear();
            self.shared.transition(&mut inner, StreamState::Starting);
            inner.episode
        };

        if let Some(previous) = control.take() {
            previous.stop.cancel();
        }

        let command = self.command();
        tracing::info!(
            stream_id = %self.shared.id,
            episode,
            source = %self.source_uri,
            destination = %self.destination,
            command = %command.display_line(&self.settings.binary),
            "Starting transcoder"
        );

        let mut process = match TranscoderProcess::spawn(&self.settings.binary, &command) {
            Ok(process) => process,
            Err(e) => {
                self.fail_to_start(episode, &e);
                return StreamState::FailedToStart;
            }
        };

        let pid = process.id();
        let stdout = process.take_stdout();
        let stderr = process.take_stderr();
        {
            let mut inner = self.shared.lock();
            inner.pid = pid;
            self.shared.transition(&mut inner, StreamState::Running);
        }
        tracing::info!(stream_id = %self.shared.id, episode, pid = ?pid, "Transcoder running");

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let stop = CancellationToken::new();
        let kill = CancellationToken::new();
        let drain = self.settings.reader_drain;

        if let Some(stdout) = stdout {
            tokio::spawn(read_channel(
                stdout,
                OutputChannel::Progress,
                tx.clone(),
                stop.clone(),
                drain,
            ));
        }
        if let Some(stderr) = stderr {
            tokio::spawn(read_channel(
                stderr,
                OutputChannel::Diagnostic,
                tx.clone(),
                stop.clone(),
                drain,
            ));
        }
        if let Some(pid) = pid {
            let sampler = ResourceSampler::new(pid, self.settings.sample_interval);
            tokio::spawn(sampler.run(tx.clone(), stop.clone()));
        }
        drop(tx);

        let monitor = Monitor {
            shared: Arc::clone(&self.shared),
            episode,
            process,
            events: rx,
            stop: stop.clone(),
            kill: kill.clone(),
            grace: self.settings.stop_grace,
            drain,
        };
        *control = Some(EpisodeHandle {
            episode,
            stop,
            kill,
            monitor: tokio::spawn(monitor.run()),
        });

        StreamState::Running
    }

    fn fail_to_start(&self, episode: u64, err: &SpawnError) {
        tracing::error!(stream_id = %self.shared.id, episode, error = %err, "Failed to start transcoder");
        let mut inner = self.shared.lock();
        let message = format!("failed to start transcoder: {err}");
        inner.logs.push(message.clone());
        inner.last_error = Some(message);
        self.shared.transition(&mut inner, StreamState::FailedToStart);
    }

    /// Request graceful termination without waiting for it.
    ///
    /// Returns `true` if a running process was asked to stop. In any other
    /// state this is a no-op apart from re-signalling the episode's tasks
    /// to wind down.
    pub fn stop(&self) -> bool {
        let control = self.control();

        let pid = {
            let mut inner = self.shared.lock_settled();
            if inner.state != StreamState::Running {
                tracing::warn!(
                    stream_id = %self.shared.id,
                    state = %inner.state,
                    "Stream not running, nothing to stop"
                );
                drop(inner);
                if let Some(handle) = control.as_ref() {
                    handle.stop.cancel();
                }
                return false;
            }
            self.shared.transition(&mut inner, StreamState::Stopping);
            inner.pid
        };

        tracing::info!(stream_id = %self.shared.id, pid = ?pid, "Stopping transcoder");
        if let Some(pid) = pid {
            if let Err(e) = interrupt(pid) {
                tracing::warn!(
                    stream_id = %self.shared.id,
                    pid,
                    error = %e,
                    "Graceful interrupt failed, transcoder will be killed after the grace period"
                );
            }
        }
        if let Some(handle) = control.as_ref() {
            handle.stop.cancel();
        }
        true
    }

    /// Kill the process immediately, skipping the grace period.
    pub fn kill(&self) {
        let control = self.control();
        {
            let mut inner = self.shared.lock_settled();
            if inner.state == StreamState::Running {
                self.shared.transition(&mut inner, StreamState::Stopping);
            }
        }
        if let Some(handle) = control.as_ref() {
            tracing::info!(stream_id = %self.shared.id, "Killing transcoder");
            handle.stop.cancel();
            handle.kill.cancel();
        }
    }

    /// Current state.
    ///
    /// A process that has already been reaped is reported in its terminal
    /// state even while its output is still draining. If the episode's
    /// monitor has ended without settling the state, it is reconciled here.
    #[must_use]
    pub fn status(&self) -> StreamState {
        {
            let control = self.control();
            if let Some(handle) = control.as_ref() {
                if handle.monitor.is_finished() {
                    self.shared.abandon(handle.episode);
                }
            }
        }
        self.shared.lock_settled().state
    }

    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.lock().metrics.clone()
    }

    /// Metric snapshots, oldest first.
    #[must_use]
    pub fn metrics_history(&self) -> Vec<MetricsSnapshot> {
        self.shared.lock().history.to_vec()
    }

    /// Diagnostic lines, oldest first.
    #[must_use]
    pub fn logs(&self) -> Vec<String> {
        self.shared.lock().logs.to_vec()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.shared.lock().last_error.clone()
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.shared.lock().pid
    }

    /// Number of episodes started so far.
    #[must_use]
    pub fn episode(&self) -> u64 {
        self.shared.lock().episode
    }

    #[must_use]
    pub fn snapshot(&self) -> StreamSnapshot {
        let state = self.status();
        let inner = self.shared.lock();
        StreamSnapshot {
            id: self.shared.id.clone(),
            source_uri: self.source_uri.clone(),
            destination_uri: self.destination.uri(),
            state,
            episode: inner.episode,
            pid: inner.pid,
            last_error: inner.last_error.clone(),
            metrics: inner.metrics.clone(),
        }
    }

    /// Watch state transitions as they happen.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StreamState> {
        self.shared.state_tx.subscribe()
    }

    /// Wait until the stream reaches a terminal state.
    ///
    /// Returns `None` if `timeout` elapses first.
    pub async fn wait_for_terminal(&self, timeout: Duration) -> Option<StreamState> {
        let mut rx = self.subscribe();
        let waited = tokio::time::timeout(timeout, rx.wait_for(|state| state.is_terminal())).await;
        match waited {
            Ok(Ok(state)) => Some(*state),
            _ => {
                let state = self.status();
                state.is_terminal().then_some(state)
            }
        }
    }
}

impl Drop for StreamSupervisor {
    fn drop(&mut self) {
        let control = self.control.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = control.as_ref() {
            handle.stop.cancel();
            handle.kill.cancel();
        }
    }
}

impl std::fmt::Debug for StreamSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSupervisor")
            .field("id", &self.shared.id)
            .field("source_uri", &self.source_uri)
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}

/// Owner of an episode's child process.
struct Monitor {
    shared: Arc<Shared>,
    episode: u64,
    process: TranscoderProcess,
    events: mpsc::Receiver<StreamEvent>,
    stop: CancellationToken,
    kill: CancellationToken,
    grace: Duration,
    drain: Duration,
}

impl Monitor {
    async fn run(self) {
        let Self {
            shared,
            episode,
            mut process,
            mut events,
            stop,
            kill,
            grace,
            drain,
        } = self;

        let escalate = async {
            tokio::select! {
                () = kill.cancelled() => {}
                () = async {
                    stop.cancelled().await;
                    tokio::time::sleep(grace).await;
                } => {}
            }
        };
        tokio::pin!(escalate);

        let mut events_open = true;
        let mut killed = false;

        let exit = loop {
            tokio::select! {
                status = process.wait() => break status,
                event = events.recv(), if events_open => match event {
                    Some(event) => shared.apply(episode, event),
                    None => events_open = false,
                },
                () = &mut escalate, if !killed => {
                    killed = true;
                    tracing::warn!(stream_id = %shared.id, episode, "Transcoder did not exit in time, killing");
                    shared.note(episode, "transcoder killed after stop grace period".to_string());
                    if let Err(e) = process.start_kill() {
                        tracing::error!(stream_id = %shared.id, episode, error = %e, "Failed to kill transcoder");
                    }
                }
            }
        };

        while let Ok(event) = events.try_recv() {
            shared.apply(episode, event);
        }
        shared.exited(episode, &exit);
        stop.cancel();

        if events_open {
            let drained = tokio::time::timeout(drain, async {
                while let Some(event) = events.recv().await {
                    shared.apply(episode, event);
                }
            })
            .await;
            if drained.is_err() {
                tracing::debug!(stream_id = %shared.id, episode, "Output still open after drain window");
            }
        }

        shared.finish(episode);
    }
}
