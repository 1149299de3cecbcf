//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::supervisor::{
    DiagnosticMatcher, StreamSettings, DEFAULT_ERROR_KEYWORDS, DEFAULT_HISTORY_CAPACITY,
    DEFAULT_LOG_CAPACITY,
};
use crate::transcoder::Destination;

use super::ConfigError;

/// Input reconnection. Off unless explicitly enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    /// Upper bound for the transcoder's reconnect backoff, in seconds.
    pub delay_max_secs: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            delay_max_secs: 5,
        }
    }
}

/// How the transcoder binary is invoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscoderConfig {
    /// Explicit binary path; `ffmpeg` from `PATH` when unset.
    pub binary: Option<PathBuf>,
    pub log_level: String,
    pub output_format: String,
    /// RTSP transport hint; an empty string omits it.
    pub rtsp_transport: String,
    pub reconnect: ReconnectConfig,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            binary: None,
            log_level: "warning".to_string(),
            output_format: "rtsp".to_string(),
            rtsp_transport: "tcp".to_string(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Defaults for destinations the caller only partly specifies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DestinationConfig {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl DestinationConfig {
    /// Build a destination for `path`, overriding host and port if given.
    #[must_use]
    pub fn resolve(&self, host: Option<&str>, port: Option<u16>, path: &str) -> Destination {
        Destination::new(
            self.scheme.clone(),
            host.unwrap_or(&self.host),
            port.unwrap_or(self.port),
            path,
        )
    }
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            scheme: "rtsp".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8554,
        }
    }
}

/// Buffer sizes, intervals and failure keywords.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub history_capacity: usize,
    pub log_capacity: usize,
    pub sample_interval_ms: u64,
    pub stop_grace_ms: u64,
    pub reader_drain_ms: u64,
    pub error_keywords: Vec<String>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            log_capacity: DEFAULT_LOG_CAPACITY,
            sample_interval_ms: 1000,
            stop_grace_ms: 10_000,
            reader_drain_ms: 2000,
            error_keywords: DEFAULT_ERROR_KEYWORDS
                .iter()
                .map(|k| (*k).to_string())
                .collect(),
        }
    }
}

/// HTTP control surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardSection {
    pub host: String,
    pub port: u16,
    pub cors_permissive: bool,
}

impl Default for DashboardSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            cors_permissive: true,
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub transcoder: TranscoderConfig,
    pub destination: DestinationConfig,
    pub limits: LimitsConfig,
    pub dashboard: DashboardSection,
}

impl SupervisorConfig {
    /// Settings applied to every stream created from this configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidKeywords` if the failure keywords cannot
    /// be compiled.
    pub fn stream_settings(&self) -> Result<StreamSettings, ConfigError> {
        let matcher = DiagnosticMatcher::new(&self.limits.error_keywords)?;
        let transport = self.transcoder.rtsp_transport.trim();
        let defaults = StreamSettings::default();

        Ok(StreamSettings {
            binary: self.transcoder.binary.clone().unwrap_or(defaults.binary),
            log_level: self.transcoder.log_level.clone(),
            output_format: self.transcoder.output_format.clone(),
            rtsp_transport: (!transport.is_empty()).then(|| transport.to_string()),
            reconnect_delay_max: self
                .transcoder
                .reconnect
                .enabled
                .then_some(self.transcoder.reconnect.delay_max_secs),
            history_capacity: self.limits.history_capacity,
            log_capacity: self.limits.log_capacity,
            sample_interval: Duration::from_millis(self.limits.sample_interval_ms.max(1)),
            stop_grace: Duration::from_millis(self.limits.stop_grace_ms),
            reader_drain: Duration::from_millis(self.limits.reader_drain_ms),
            matcher,
        })
    }
}
