//! Parser for the `-progress` key=value stream.
//!
//! ffmpeg writes one `key=value` pair per line and closes every batch with
//! `progress=continue` (or `progress=end` on the final batch). Only the keys
//! the supervisor reports on are recognised; everything else is dropped.

use serde::{Deserialize, Serialize};

/// A single metric update extracted from a progress line.
///
/// `None` payloads mean the transcoder reported the field but the value was
/// unusable (`N/A`, garbage), which is distinct from "never reported".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum ProgressUpdate {
    /// Output bitrate normalised to kbit/s.
    Bitrate(Option<f64>),
    /// Frames per second.
    Fps(Option<f64>),
    /// Absolute number of dropped frames since the process started.
    DroppedFrames(u64),
}

/// Parse one progress line.
///
/// Returns `None` for unrecognised keys and for malformed lines (missing
/// `=` or more than one `=`). Never panics.
#[must_use]
pub fn parse_progress_line(line: &str) -> Option<ProgressUpdate> {
    let line = line.trim();
    let mut parts = line.split('=');
    let key = parts.next()?.trim();
    let value = parts.next()?.trim();
    if parts.next().is_some() {
        return None;
    }

    match key {
        "bitrate" => Some(ProgressUpdate::Bitrate(parse_bitrate_kbps(value))),
        "fps" => Some(ProgressUpdate::Fps(parse_float(value))),
        "drop_frames" => value.parse().ok().map(ProgressUpdate::DroppedFrames),
        _ => None,
    }
}

fn parse_float(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse values like `1234.5kbits/s`, `2.1mbits/s`, `800bits/s` or a bare
/// number (taken as kbit/s).
fn parse_bitrate_kbps(value: &str) -> Option<f64> {
    let lower = value.to_ascii_lowercase();
    let (number, scale) = if let Some(n) = lower.strip_suffix("kbits/s") {
        (n, 1.0)
    } else if let Some(n) = lower.strip_suffix("mbits/s") {
        (n, 1000.0)
    } else if let Some(n) = lower.strip_suffix("gbits/s") {
        (n, 1_000_000.0)
    } else if let Some(n) = lower.strip_suffix("bits/s") {
        (n, 0.001)
    } else {
        (lower.as_str(), 1.0)
    };

    parse_float(number.trim()).map(|v| v * scale)
}
