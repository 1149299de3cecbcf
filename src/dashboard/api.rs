//! API request and response types for the control endpoints.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::supervisor::{MetricsSnapshot, StreamId, StreamState};

/// Body of POST /api/streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStreamRequest {
    /// Source URI, e.g. `rtmp://server/app/key`.
    pub source_uri: String,
    /// Relay host; the configured default when omitted.
    #[serde(default)]
    pub host: Option<String>,
    /// Relay port; the configured default when omitted.
    #[serde(default)]
    pub port: Option<u16>,
    /// Path on the relay server.
    pub path: String,
    /// Caller-chosen id; generated when omitted.
    #[serde(default)]
    pub id: Option<String>,
}

/// Response for POST /api/streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStreamResponse {
    pub id: StreamId,
    pub state: StreamState,
    pub destination_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Response for GET /api/streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamListResponse {
    pub streams: BTreeMap<StreamId, StreamState>,
}

/// Response for GET /api/streams/:id/history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub id: StreamId,
    pub samples: Vec<MetricsSnapshot>,
}

/// Response for GET /api/streams/:id/logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsResponse {
    pub id: StreamId,
    pub lines: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Query parameters for DELETE /api/streams/:id.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoveQuery {
    #[serde(default)]
    pub force: bool,
}

/// Response for command endpoints (start, stop, remove).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Whether the command was successful.
    pub success: bool,
    /// Message describing the result.
    pub message: String,
    /// Optional error details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResponse {
    /// Create a success response.
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: None,
        }
    }

    /// Create an error response.
    #[must_use]
    pub fn error(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error: Some(error.into()),
        }
    }
}
