//! Events flowing from an episode's background tasks to its monitor.

use crate::supervisor::ResourceUsage;
use crate::transcoder::{OutputChannel, ProgressUpdate};

/// Something a reader or the sampler observed.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Parsed line from the progress channel.
    Progress(ProgressUpdate),
    /// Raw line from the diagnostic channel.
    Diagnostic(String),
    /// A reader hit an I/O error other than end-of-stream.
    ReadFailed {
        channel: OutputChannel,
        error: String,
    },
    /// Fresh CPU and memory reading.
    Resources(ResourceUsage),
    /// The process disappeared between samples.
    ResourcesLost,
    /// Sampling failed for another reason and has stopped.
    SamplingFailed(String),
}
