//! HTTP control surface for the stream registry.

mod api;
mod error;
mod handlers;
mod server;

pub use api::*;
pub use error::{ApiError, DashboardError};
pub use handlers::*;
pub use server::{DashboardConfig, DashboardServer, DEFAULT_PORT};
