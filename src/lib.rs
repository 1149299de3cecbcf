//! Relay Supervisor - ffmpeg stream relays with live health and resource metrics.

pub mod config;
pub mod dashboard;
pub mod display;
pub mod supervisor;
pub mod transcoder;
