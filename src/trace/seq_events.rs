//! Sequence/ack sample stream parsing.
//!
//! The multipath report tool emits one comma-separated event per line:
//! `timestamp,value,subflow,kind,map_end,reinjection` where `kind 0` is a
//! cumulative-ack sample (`value` is the acked sequence) and `kind 1` is a
//! data-segment boundary ("MAP") sample (`value` is the segment start,
//! `map_end` its end). Subflow and reinjection indices are 1-based in the
//! file; a non-positive reinjection index means the segment is original
//! data, otherwise it names the subflow the segment was first sent on.

use std::io::BufRead;

use crate::model::{SubflowId, TraceTime};

const KIND_ACK: u32 = 0;
const KIND_MAP: u32 = 1;

/// One parsed sample from the sequence/ack stream
#[derive(Debug, Clone, PartialEq)]
pub enum SeqEvent {
    /// Cumulative acknowledgment seen on a subflow
    Ack {
        timestamp: TraceTime,
        ack: u64,
        subflow: SubflowId,
    },
    /// Data-segment boundary seen on a subflow
    Map {
        timestamp: TraceTime,
        seq_start: u64,
        seq_end: u64,
        subflow: SubflowId,
        /// Subflow this segment was first transmitted on, when reinjected
        reinjected_from: Option<SubflowId>,
    },
}

impl SeqEvent {
    pub fn timestamp(&self) -> TraceTime {
        match self {
            SeqEvent::Ack { timestamp, .. } | SeqEvent::Map { timestamp, .. } => *timestamp,
        }
    }

    pub fn subflow(&self) -> SubflowId {
        match self {
            SeqEvent::Ack { subflow, .. } | SeqEvent::Map { subflow, .. } => *subflow,
        }
    }
}

/// Decode a 1-based index field into a zero-based id; non-positive values
/// decode to None.
fn one_based(field: &str) -> Option<Option<SubflowId>> {
    let value: i64 = field.parse().ok()?;
    if value > 0 {
        Some(Some((value - 1) as SubflowId))
    } else {
        Some(None)
    }
}

fn parse_line(line: &str) -> Option<SeqEvent> {
    let fields: Vec<&str> = line.trim().split(',').collect();
    if fields.len() != 6 {
        return None;
    }

    let timestamp: TraceTime = fields[0].parse().ok()?;
    let value: u64 = fields[1].parse().ok()?;
    let subflow = one_based(fields[2])??;
    let kind: u32 = fields[3].parse().ok()?;

    match kind {
        KIND_ACK => Some(SeqEvent::Ack {
            timestamp,
            ack: value,
            subflow,
        }),
        KIND_MAP => Some(SeqEvent::Map {
            timestamp,
            seq_start: value,
            seq_end: fields[4].parse().ok()?,
            subflow,
            reinjected_from: one_based(fields[5])?,
        }),
        _ => None,
    }
}

/// Parse a sequence/ack sample stream; malformed lines are skipped.
pub fn parse_seq_events<R: BufRead>(reader: R) -> std::io::Result<Vec<SeqEvent>> {
    let mut events = Vec::new();
    let mut skipped = 0usize;

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(&line) {
            Some(event) => events.push(event),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        log::debug!("Skipped {} malformed sequence sample lines", skipped);
    }
    Ok(events)
}
