//! Plot-ready numeric series.
//!
//! Rendering is an external collaborator: this module only shapes finished
//! numeric series (stitched sequence timelines, advertised-window runs,
//! congestion estimates, CDFs) and writes them as JSON for the plotting
//! side to consume.

use std::fs;
use std::path::Path;

use color_eyre::eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::TraceTime;

/// One named line of a plot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub label: String,
    pub points: Vec<(f64, f64)>,
}

impl Series {
    pub fn new(label: impl Into<String>, points: Vec<(f64, f64)>) -> Self {
        Self {
            label: label.into(),
            points,
        }
    }

    pub fn from_offsets(label: impl Into<String>, points: &[(TraceTime, i64)]) -> Self {
        Self::new(
            label,
            points.iter().map(|(t, v)| (*t, *v as f64)).collect(),
        )
    }
}

/// A complete plot-ready dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlotData {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub series: Vec<Series>,
}

/// Write a plot dataset as pretty JSON.
pub fn write_plot_json(data: &PlotData, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(data).context("Failed to serialize plot data")?;
    fs::write(path, json)
        .with_context(|| format!("Failed to write plot data to {}", path.display()))?;
    log::debug!("Plot data written to {}", path.display());
    Ok(())
}

/// Read a plot dataset back (used by the summary tool).
pub fn read_plot_json(path: &Path) -> Result<PlotData> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read plot data from {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse plot data in {}", path.display()))
}

/// Estimate the congestion window from a sequence timeline and the
/// advertised receiver-window runs of the same flow.
///
/// Both inputs are merged by timestamp (stable on ties: sequence samples
/// first); each advertised-window delta opens the estimate, each sequence
/// delta consumes it.
pub fn congestion_window_series(
    seq_markers: &[(TraceTime, u64)],
    adv_window: &[(TraceTime, u64)],
) -> Vec<(TraceTime, i64)> {
    #[derive(Clone, Copy, PartialEq)]
    enum Kind {
        Seq,
        AdvWindow,
    }

    let mut merged: Vec<(TraceTime, u64, Kind)> = seq_markers
        .iter()
        .map(|(t, v)| (*t, *v, Kind::Seq))
        .chain(adv_window.iter().map(|(t, v)| (*t, *v, Kind::AdvWindow)))
        .collect();
    merged.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut estimate = 0i64;
    let mut last_seq = 0i64;
    let mut last_window = 0i64;
    let mut series = Vec::with_capacity(merged.len());

    for (time, value, kind) in merged {
        let value = value as i64;
        match kind {
            Kind::Seq => {
                estimate -= value - last_seq;
                last_seq = value;
            }
            Kind::AdvWindow => {
                estimate += value - last_window;
                last_window = value;
            }
        }
        series.push((time, estimate));
    }

    series
}

/// Sorted-sample CDF: x values ascending, y climbing from 0 towards 1,
/// with a final point pinned at 1.0.
pub fn cdf_series(values: &[f64]) -> Vec<(f64, f64)> {
    if values.is_empty() {
        return Vec::new();
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let count = sorted.len() as f64;
    let mut points: Vec<(f64, f64)> = sorted
        .iter()
        .enumerate()
        .map(|(i, v)| (*v, i as f64 / count))
        .collect();
    points.push((*sorted.last().expect("non-empty"), 1.0));
    points
}
