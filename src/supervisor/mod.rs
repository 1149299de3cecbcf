//! Supervisor module: per-stream state machine, metrics, sampling and registry.

mod diagnostics;
mod event;
mod metrics;
mod registry;
mod sampler;
mod state;
mod stream;

pub use diagnostics::*;
pub use event::*;
pub use metrics::*;
pub use registry::*;
pub use sampler::*;
pub use state::*;
pub use stream::*;
