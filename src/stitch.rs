//! Sequence-offset stitching.
//!
//! Each subflow numbers its own sequence space and may carry data
//! reinjected from a sibling subflow. Stitching merges the timestamped
//! samples of all subflows into one offset-corrected timeline per access
//! interface: the cumulative offset only advances by the sequence delta
//! since the last sample of the same original transmission chain, so a
//! reinjected segment never counts twice.
//!
//! The chain of a sample is its reinjection source when tagged, otherwise
//! the originating subflow itself; plain TCP samples chain on their
//! connection alone. Baselines are shared across interfaces: a cellular
//! reinjection of wifi data advances against the wifi baseline.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};

use crate::model::{Interface, SeqSample, SubflowId, TraceTime};

/// One stitched `(timestamp, cumulative offset)` timeline
pub type OffsetSeries = Vec<(TraceTime, i64)>;

/// Identity of an original transmission chain
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ChainKey {
    connection: String,
    subflow: Option<SubflowId>,
}

impl ChainKey {
    fn of(sample: &SeqSample) -> Self {
        ChainKey {
            connection: sample.connection.clone(),
            subflow: sample.reinjected_from.or(sample.subflow),
        }
    }
}

/// Merge sequence samples into one offset-corrected timeline per
/// interface.
///
/// Samples are walked in global timestamp order; the sort is stable, so
/// equal timestamps keep their input-arrival order. A sample whose chain
/// is new records its sequence value as the baseline and emits the
/// interface's current total unchanged; a sample on a known chain emits
/// and advances by `value - baseline`. The emitted series is
/// non-decreasing as long as every chain's baseline was observed.
pub fn stitch_samples(samples: &[SeqSample]) -> BTreeMap<Interface, OffsetSeries> {
    let mut ordered: Vec<&SeqSample> = samples.iter().collect();
    ordered.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

    let mut baselines: HashMap<ChainKey, u64> = HashMap::new();
    let mut totals: BTreeMap<Interface, i64> = BTreeMap::new();
    let mut series: BTreeMap<Interface, OffsetSeries> = BTreeMap::new();

    for sample in ordered {
        let chain = ChainKey::of(sample);
        let total = totals.entry(sample.interface).or_insert(0);

        match baselines.entry(chain) {
            Entry::Vacant(slot) => {
                slot.insert(sample.seq_end);
            }
            Entry::Occupied(mut slot) => {
                let baseline = slot.get_mut();
                *total += sample.seq_end as i64 - *baseline as i64;
                *baseline = sample.seq_end;
            }
        }

        series
            .entry(sample.interface)
            .or_default()
            .push((sample.timestamp, *total));
    }

    series
}
