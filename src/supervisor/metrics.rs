//! Metric snapshots and fixed-capacity ring buffers.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::transcoder::ProgressUpdate;

/// Default number of snapshots kept in a stream's metrics history.
pub const DEFAULT_HISTORY_CAPACITY: usize = 60;

/// Default number of diagnostic lines kept per stream.
pub const DEFAULT_LOG_CAPACITY: usize = 100;

/// Point-in-time view of a stream's throughput and resource usage.
///
/// `None` means "unknown": not yet reported, or reported as unusable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub bitrate_kbps: Option<f64>,
    pub fps: Option<f64>,
    pub cpu_percent: Option<f32>,
    pub memory_mb: Option<f64>,
    pub dropped_frames: u64,
    pub last_update: Option<DateTime<Utc>>,
}

impl MetricsSnapshot {
    /// Apply a progress update, touching only the field it names.
    pub fn apply(&mut self, update: ProgressUpdate) {
        match update {
            ProgressUpdate::Bitrate(kbps) => self.bitrate_kbps = kbps,
            ProgressUpdate::Fps(fps) => self.fps = fps,
            ProgressUpdate::DroppedFrames(count) => self.dropped_frames = count,
        }
    }

    /// Forget resource readings, e.g. after the process went away.
    pub fn clear_resources(&mut self) {
        self.cpu_percent = None;
        self.memory_mb = None;
    }

    pub fn touch(&mut self) {
        self.last_update = Some(Utc::now());
    }
}

/// FIFO buffer that evicts its oldest entry once `capacity` is reached.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `item`, returning the evicted entry if the buffer was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.capacity == 0 {
            return Some(item);
        }
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Iterate oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Copy the contents out, oldest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}
