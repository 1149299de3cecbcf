//! Stream lifecycle state machine.

use serde::{Deserialize, Serialize};

/// Current state of a supervised stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    /// No process started yet in this episode.
    #[default]
    Idle,
    /// Launch requested, process not yet confirmed.
    Starting,
    /// Process spawned and being supervised.
    Running,
    /// Graceful termination requested, process may still be alive.
    Stopping,
    /// Process exited cleanly or was stopped on request.
    Stopped,
    /// The process could not be spawned at all.
    FailedToStart,
    /// The process exited with an error while not being stopped.
    Failed,
}

impl StreamState {
    /// Terminal states only change through a new `start()`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed | Self::FailedToStart)
    }

    /// States in which a process handle may be live.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }

    /// Whether a new episode may begin from this state.
    #[must_use]
    pub fn can_start(self) -> bool {
        self == Self::Idle || self.is_terminal()
    }

    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use StreamState::{FailedToStart, Failed, Idle, Running, Starting, Stopped, Stopping};

        match (self, next) {
            (from, Starting) => from.can_start(),
            (Starting, Running | FailedToStart | Stopping) => true,
            (Running, Stopping | Stopped | Failed) => true,
            (Stopping, Stopped) => true,
            (from, Idle) => from.is_terminal(),
            _ => false,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::FailedToStart => "failed_to_start",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
