//! Registry of supervised streams.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::supervisor::{MetricsSnapshot, StreamSettings, StreamState, StreamSupervisor};
use crate::transcoder::Destination;

/// Opaque identifier of a supervised stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StreamId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for StreamId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parameters for a new relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRequest {
    pub source_uri: String,
    pub destination: Destination,
}

impl StreamRequest {
    #[must_use]
    pub fn new(source_uri: impl Into<String>, destination: Destination) -> Self {
        Self {
            source_uri: source_uri.into(),
            destination,
        }
    }

    fn validate(&self) -> Result<(), RegistryError> {
        let source = url::Url::parse(&self.source_uri).map_err(|e| RegistryError::InvalidSource {
            uri: self.source_uri.clone(),
            reason: e.to_string(),
        })?;
        if !source.has_host() {
            return Err(RegistryError::InvalidSource {
                uri: self.source_uri.clone(),
                reason: "missing host".to_string(),
            });
        }

        let dest = &self.destination;
        let reason = if dest.scheme.is_empty() {
            Some("empty scheme")
        } else if dest.host.trim().is_empty() {
            Some("empty host")
        } else if dest.port == 0 {
            Some("port must be non-zero")
        } else if dest.path.trim_matches('/').is_empty() {
            Some("empty path")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(RegistryError::InvalidDestination {
                uri: dest.uri(),
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// Error type for registry operations.
#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    /// No stream with this id.
    #[error("Stream not found: {0}")]
    NotFound(StreamId),

    /// The stream still has a live process.
    #[error("Stream {id} is {state}; stop it first or force removal")]
    NotTerminal { id: StreamId, state: StreamState },

    /// The source URI is unusable.
    #[error("Invalid source URI {uri}: {reason}")]
    InvalidSource { uri: String, reason: String },

    /// The destination is unusable.
    #[error("Invalid destination {uri}: {reason}")]
    InvalidDestination { uri: String, reason: String },
}

/// Time `remove(force)` waits for a killed process to be reaped.
const FORCED_REMOVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Mapping from stream id to its supervisor.
///
/// Streams are independent of each other; the registry lock only guards the
/// mapping itself and is never held while a stream is being started or
/// stopped.
pub struct StreamRegistry {
    settings: Arc<StreamSettings>,
    streams: RwLock<HashMap<StreamId, Arc<StreamSupervisor>>>,
}

impl StreamRegistry {
    #[must_use]
    pub fn new(settings: StreamSettings) -> Self {
        Self {
            settings: Arc::new(settings),
            streams: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<StreamId, Arc<StreamSupervisor>>> {
        self.streams.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<StreamId, Arc<StreamSupervisor>>> {
        self.streams.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register and start a stream under a freshly generated id.
    ///
    /// # Errors
    ///
    /// Returns an error if the source or destination is invalid. A launch
    /// failure is not an error here: the stream is registered in
    /// `failed_to_start` with its last error set.
    pub fn create(&self, request: StreamRequest) -> Result<Arc<StreamSupervisor>, RegistryError> {
        self.create_with_id(StreamId::generate(), request)
    }

    /// Register and start a stream under `id`.
    ///
    /// If `id` is taken by a stream that is not terminal, that stream is
    /// returned unchanged. An idle entry counts as taken: it is a stream
    /// another caller registered and is about to start. A terminal stream
    /// under `id` is replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if the source or destination is invalid.
    pub fn create_with_id(
        &self,
        id: StreamId,
        request: StreamRequest,
    ) -> Result<Arc<StreamSupervisor>, RegistryError> {
        request.validate()?;

        let stream = {
            let mut streams = self.write();
            if let Some(existing) = streams.get(&id) {
                let state = existing.status();
                if !state.is_terminal() {
                    tracing::warn!(stream_id = %id, %state, "Stream already registered, returning existing");
                    return Ok(Arc::clone(existing));
                }
            }

            let stream = Arc::new(StreamSupervisor::new(
                id.clone(),
                request.source_uri,
                request.destination,
                Arc::clone(&self.settings),
            ));
            streams.insert(id, Arc::clone(&stream));
            stream
        };

        stream.start();
        Ok(stream)
    }

    /// Look up a stream.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` for unknown ids.
    pub fn get(&self, id: &StreamId) -> Result<Arc<StreamSupervisor>, RegistryError> {
        self.read().get(id).cloned().ok_or_else(|| {
            tracing::warn!(stream_id = %id, "Unknown stream");
            RegistryError::NotFound(id.clone())
        })
    }

    /// Begin a new episode on an existing stream.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` for unknown ids.
    pub fn start(&self, id: &StreamId) -> Result<StreamState, RegistryError> {
        Ok(self.get(id)?.start())
    }

    /// Ask a stream to stop gracefully.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` for unknown ids.
    pub fn stop(&self, id: &StreamId) -> Result<bool, RegistryError> {
        Ok(self.get(id)?.stop())
    }

    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` for unknown ids.
    pub fn get_status(&self, id: &StreamId) -> Result<StreamState, RegistryError> {
        Ok(self.get(id)?.status())
    }

    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` for unknown ids.
    pub fn get_metrics(&self, id: &StreamId) -> Result<MetricsSnapshot, RegistryError> {
        Ok(self.get(id)?.metrics())
    }

    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` for unknown ids.
    pub fn get_metrics_history(&self, id: &StreamId) -> Result<Vec<MetricsSnapshot>, RegistryError> {
        Ok(self.get(id)?.metrics_history())
    }

    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` for unknown ids.
    pub fn get_logs(&self, id: &StreamId) -> Result<Vec<String>, RegistryError> {
        Ok(self.get(id)?.logs())
    }

    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` for unknown ids.
    pub fn get_last_error(&self, id: &StreamId) -> Result<Option<String>, RegistryError> {
        Ok(self.get(id)?.last_error())
    }

    /// State of every registered stream, ordered by id.
    #[must_use]
    pub fn list_statuses(&self) -> BTreeMap<StreamId, StreamState> {
        self.snapshot_streams()
            .into_iter()
            .map(|stream| (stream.id().clone(), stream.status()))
            .collect()
    }

    /// All registered streams, ordered by id.
    #[must_use]
    pub fn streams(&self) -> Vec<Arc<StreamSupervisor>> {
        let mut streams = self.snapshot_streams();
        streams.sort_by(|a, b| a.id().cmp(b.id()));
        streams
    }

    fn snapshot_streams(&self) -> Vec<Arc<StreamSupervisor>> {
        self.read().values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Remove a stream from the registry.
    ///
    /// Without `force` only idle or terminal streams can be removed. With
    /// `force` a live process is killed and reaped first.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown ids and `NotTerminal` for live streams
    /// when `force` is false.
    pub async fn remove(
        &self,
        id: &StreamId,
        force: bool,
    ) -> Result<Arc<StreamSupervisor>, RegistryError> {
        let stream = self.get(id)?;
        let state = stream.status();

        if state.is_active() {
            if !force {
                tracing::warn!(stream_id = %id, %state, "Refusing to remove active stream");
                return Err(RegistryError::NotTerminal {
                    id: id.clone(),
                    state,
                });
            }
            stream.kill();
            if stream.wait_for_terminal(FORCED_REMOVE_TIMEOUT).await.is_none() {
                tracing::warn!(stream_id = %id, "Killed stream did not settle before removal");
            }
        }

        self.write().remove(id);
        tracing::info!(stream_id = %id, "Stream removed");
        Ok(stream)
    }

    /// Stop every stream and wait up to `timeout` for them to exit; whatever
    /// is still alive afterwards is killed.
    pub async fn shutdown(&self, timeout: Duration) {
        let streams = self.snapshot_streams();
        tracing::info!(count = streams.len(), "Stopping all streams");

        for stream in &streams {
            stream.stop();
        }

        for stream in &streams {
            if !stream.status().is_active() {
                continue;
            }
            if stream.wait_for_terminal(timeout).await.is_none() {
                tracing::warn!(stream_id = %stream.id(), "Stream did not stop in time, killing");
                stream.kill();
                let _ = stream.wait_for_terminal(FORCED_REMOVE_TIMEOUT).await;
            }
        }
        tracing::info!("All streams stopped");
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new(StreamSettings::default())
    }
}
