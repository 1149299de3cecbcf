//! Tests for the progress stream parser against realistic output.

use relay_supervisor::transcoder::{parse_progress_line, ProgressUpdate};

const PROGRESS_BLOCK: &str = "\
frame=1502
fps=29.97
stream_0_0_q=-1.0
bitrate=2048.3kbits/s
total_size=12845056
out_time_us=50100000
out_time=00:00:50.100000
dup_frames=0
drop_frames=4
speed=1.00x
progress=continue
";

#[test]
fn progress_block_yields_tracked_fields_only() {
    let updates: Vec<ProgressUpdate> = PROGRESS_BLOCK
        .lines()
        .filter_map(parse_progress_line)
        .collect();

    assert_eq!(
        updates,
        vec![
            ProgressUpdate::Fps(Some(29.97)),
            ProgressUpdate::Bitrate(Some(2048.3)),
            ProgressUpdate::DroppedFrames(4),
        ]
    );
}

#[test]
fn startup_block_reports_unknown_values() {
    let updates: Vec<ProgressUpdate> = ["fps=0.00", "bitrate=N/A", "drop_frames=0"]
        .into_iter()
        .filter_map(parse_progress_line)
        .collect();

    assert_eq!(
        updates,
        vec![
            ProgressUpdate::Fps(Some(0.0)),
            ProgressUpdate::Bitrate(None),
            ProgressUpdate::DroppedFrames(0),
        ]
    );
}

#[test]
fn malformed_lines_are_ignored() {
    for line in ["", "fps", "fps=1=2", "=30", "garbage line", "drop_frames=-1"] {
        assert_eq!(parse_progress_line(line), None, "{line:?}");
    }
}

#[test]
fn crlf_terminated_lines_parse() {
    assert_eq!(
        parse_progress_line("fps=25.0\r"),
        Some(ProgressUpdate::Fps(Some(25.0)))
    );
}
