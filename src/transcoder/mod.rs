//! Transcoder module: process spawning, output drainage and progress parsing.

mod process;
mod progress;
mod reader;

pub use process::*;
pub use progress::*;
pub use reader::*;
