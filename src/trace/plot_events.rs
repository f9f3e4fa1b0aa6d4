//! Plot-event stream parsing.
//!
//! The per-flow sequence graphs are emitted as line-oriented records, each
//! beginning with a marker token. `uarrow` markers and white `diamond`
//! markers carry sequence-number samples; a `yellow` token announces that
//! the following `line` records describe advertised receiver-window
//! segments. Any other token ends the window run.

use std::io::BufRead;

use crate::model::TraceTime;

/// Sequence markers and advertised-window segments of one plot file,
/// with the batch-relative time offset already applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlotEvents {
    /// (time, sequence value) per data marker
    pub seq_markers: Vec<(TraceTime, u64)>,
    /// (time, window value) endpoints of advertised-window segments
    pub adv_window: Vec<(TraceTime, u64)>,
}

/// Parse a plot-event stream, shifting every timestamp by `time_offset`.
pub fn parse_plot_events<R: BufRead>(
    reader: R,
    time_offset: TraceTime,
) -> std::io::Result<PlotEvents> {
    let mut events = PlotEvents::default();
    let mut in_window_run = false;

    for line in reader.lines() {
        let line = line?;
        let fields: Vec<&str> = line.split(' ').collect();
        match fields[0] {
            "uarrow" | "diamond" => {
                in_window_run = false;
                // Diamonds mark sequence data only when tagged white
                if fields[0] == "diamond" && !(fields.len() == 4 && fields[3].contains("white")) {
                    continue;
                }
                if let (Some(time), Some(seq)) = (parse_time(&fields, 1), parse_seq(&fields, 2)) {
                    events.seq_markers.push((time + time_offset, seq));
                }
            }
            "yellow" => in_window_run = true,
            "line" if in_window_run => {
                if let (Some(t1), Some(s1), Some(t2), Some(s2)) = (
                    parse_time(&fields, 1),
                    parse_seq(&fields, 2),
                    parse_time(&fields, 3),
                    parse_seq(&fields, 4),
                ) {
                    events.adv_window.push((t1 + time_offset, s1));
                    events.adv_window.push((t2 + time_offset, s2));
                }
            }
            _ => in_window_run = false,
        }
    }

    Ok(events)
}

fn parse_time(fields: &[&str], index: usize) -> Option<TraceTime> {
    fields.get(index)?.parse().ok()
}

fn parse_seq(fields: &[&str], index: usize) -> Option<u64> {
    fields.get(index)?.parse().ok()
}
