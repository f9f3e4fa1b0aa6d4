//! Batch orchestration.
//!
//! One capture file is fully staged, corrected, analyzed, correlated and
//! stitched before its results merge into the batch summary. Captures are
//! independent of each other, so the batch fans out across the rayon
//! pool; every worker owns a private scratch directory for its tool
//! artifacts and corrector intermediates.

use std::collections::HashMap;
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use color_eyre::eyre::{bail, eyre, Result, WrapErr};
use rayon::prelude::*;

use crate::config::Config;
use crate::correct;
use crate::correlate;
use crate::model::{
    add_interface_bytes, Direction, Flow, IpVersion, MptcpConnections, SeqSample,
};
use crate::naming::resolve_label;
use crate::plot::{self, PlotData, Series};
use crate::stitch;
use crate::store::{self, CaptureStats};
use crate::tools;
use crate::trace::{self, SeqEvent};

/// Listing file the multipath report tool leaves in the scratch directory
const MULTIPATH_LISTING: &str = "connections.csv";

/// Suffix of the per-connection sequence/ack sample streams
const SEQ_STREAM_SUFFIX: &str = "_seq.csv";

/// Suffix of the per-flow sequence graph artifacts
const SEQ_GRAPH_SUFFIX: &str = "_tsg.xpl";

/// Output directory layout of one batch run
#[derive(Debug, Clone)]
pub struct BatchDirs {
    /// Staged (and corrected) captures
    pub traces: PathBuf,
    /// Plot-ready series
    pub graphs: PathBuf,
    /// Persisted connection stats
    pub stats: PathBuf,
}

impl BatchDirs {
    /// Create the batch directory layout under `root`.
    pub fn bootstrap(root: &Path) -> Result<Self> {
        let dirs = Self {
            traces: root.join("traces"),
            graphs: root.join("graphs"),
            stats: root.join("stats"),
        };
        for dir in [&dirs.traces, &dirs.graphs, &dirs.stats] {
            ensure_directory(dir)?;
        }
        Ok(dirs)
    }
}

/// Create a directory if needed. A plain file squatting on the path is an
/// error: silently analyzing into it would lose results.
pub fn ensure_directory(dir: &Path) -> Result<()> {
    if dir.exists() {
        if !dir.is_dir() {
            bail!("{} exists and is not a directory", dir.display());
        }
        return Ok(());
    }
    fs::create_dir_all(dir)
        .wrap_err_with(|| format!("Failed to create directory '{}'", dir.display()))
}

/// Stage an input file into the traces directory: `.pcap` files are
/// moved, `.gz` files are decompressed through the external tool.
pub fn stage_input(config: &Config, input: &Path, traces: &Path) -> Result<PathBuf> {
    let name = input
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| eyre!("{}: not a usable file name", input.display()))?;

    if let Some(stem) = name.strip_suffix(".gz") {
        let staged = traces.join(stem);
        log::info!("Uncompressing {} to {}", input.display(), staged.display());
        tools::decompress(&config.tools, input, &staged)?;
        Ok(staged)
    } else if name.ends_with(".pcap") {
        let staged = traces.join(name);
        log::info!("Moving {} to {}", input.display(), staged.display());
        move_file(input, &staged)
            .wrap_err_with(|| format!("Failed to move {}", input.display()))?;
        Ok(staged)
    } else {
        bail!("{}: not in a valid format (.pcap or .gz)", input.display())
    }
}

/// Rename, falling back to copy+remove across filesystems
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to)?;
    fs::remove_file(from)
}

/// A flow is worth a graph if it is not pure IPv4 loopback chatter and
/// actually carried packets in the resolved direction.
fn interesting_flow(flow: &Flow, reversed: bool) -> bool {
    if flow.is_loopback_only() && flow.ip_version == IpVersion::V4 {
        return false;
    }
    let packets = if reversed {
        flow.packets.dst2src
    } else {
        flow.packets.src2dst
    };
    packets > 0
}

/// Results of processing one capture
#[derive(Debug, Clone)]
pub struct CaptureSummary {
    pub capture: String,
    pub repaired_pairs: usize,
    pub tcp_connections: usize,
    pub mptcp_connections: usize,
    pub series_written: usize,
}

/// Process one capture end to end: correct, analyze, correlate, stitch,
/// persist.
pub fn process_capture(
    config: &Config,
    capture: &Path,
    dirs: &BatchDirs,
) -> Result<CaptureSummary> {
    let stem = capture
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| eyre!("{}: not a usable file name", capture.display()))?
        .to_string();

    // Capture-level repair runs first so every later stage sees the
    // corrected capture. A failed correction is logged and the capture is
    // analyzed as captured.
    let repaired_pairs = match correct::correct_capture(config, capture) {
        Ok(count) => count,
        Err(err) => {
            log::warn!("{}: skipping correction: {err:#}", capture.display());
            0
        }
    };

    // Private scratch space for tool-generated artifacts
    let workdir = tempfile::Builder::new()
        .prefix("analyze-")
        .tempdir_in(&dirs.traces)
        .wrap_err("Failed to create analysis scratch directory")?;

    // TCP-level report with per-flow sequence graphs
    let report_path = workdir.path().join(format!("{stem}.out"));
    tools::connection_report_with_graphs(
        &config.tools,
        capture,
        workdir.path(),
        &stem,
        &report_path,
    )?;
    let mut tcp_conns = trace::parse_connection_report(
        BufReader::new(fs::File::open(&report_path)?),
        &config.interfaces,
    )?;
    if tcp_conns.is_empty() {
        log::warn!("{}: connection report is empty", capture.display());
    }

    // Multipath listing; empty for plain TCP captures
    let mut mptcp_conns = run_multipath_report(config, capture, workdir.path())?;

    let relative_start = trace::relative_start_time(&tcp_conns).unwrap_or(0.0);

    // Walk the per-flow sequence graph artifacts: resolve each label,
    // correlate into the multipath records, collect aggregate samples.
    let mut aggregate: HashMap<Direction, Vec<SeqSample>> = HashMap::new();
    let mut series_written = 0usize;

    for artifact in sorted_artifacts(workdir.path(), &format!("{stem}_"), SEQ_GRAPH_SUFFIX)? {
        let name = artifact
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let resolved = match resolve_label(&name) {
            Ok(resolved) => resolved,
            Err(err) => {
                log::warn!("{name}: {err}, skipping artifact");
                continue;
            }
        };
        let Some(flow) = tcp_conns.get(&resolved.canonical).map(|c| c.flow.clone()) else {
            log::warn!("{name}: no report record for {}", resolved.canonical);
            continue;
        };

        let correlated = correlate::copy_tcp_details(&flow, &mut mptcp_conns);
        let direction = if resolved.reversed {
            Direction::Dst2Src
        } else {
            Direction::Src2Dst
        };

        if !interesting_flow(&flow, resolved.reversed) {
            continue;
        }

        let time_offset = flow.start - relative_start;
        let events = trace::parse_plot_events(
            BufReader::new(fs::File::open(&artifact)?),
            time_offset,
        )?;

        for (timestamp, seq) in &events.seq_markers {
            aggregate.entry(direction).or_default().push(SeqSample {
                timestamp: *timestamp,
                seq_end: *seq,
                connection: resolved.canonical.clone(),
                subflow: None,
                reinjected_from: None,
                interface: flow.interface,
            });
        }

        // Per-interface byte totals live on whichever record owns the flow
        let bytes = *flow.unique_bytes.get(direction);
        if let Some((conn_id, subflow_id)) = &correlated {
            if let Some(mconn) = mptcp_conns.get_mut(conn_id) {
                if let Some(subflow) = mconn.subflows.get_mut(subflow_id) {
                    *subflow.unique_bytes.get_mut(direction) = bytes;
                }
                add_interface_bytes(
                    &mut mconn.bytes_by_interface,
                    direction,
                    flow.interface,
                    bytes,
                );
            }
        } else if let Some(tconn) = tcp_conns.get_mut(&resolved.canonical) {
            add_interface_bytes(
                &mut tconn.bytes_by_interface,
                direction,
                flow.interface,
                bytes,
            );
        }

        // Congestion-window estimate for flows that carried enough data
        if bytes >= config.plot.min_bytes && !events.adv_window.is_empty() {
            let estimate =
                plot::congestion_window_series(&events.seq_markers, &events.adv_window);
            let data = PlotData {
                title: "Congestion window".to_string(),
                x_label: "Time [s]".to_string(),
                y_label: "Congestion window [Bytes]".to_string(),
                series: vec![Series::from_offsets(
                    format!("{} {}", resolved.canonical, direction),
                    &estimate,
                )],
            };
            let path = dirs.graphs.join(format!(
                "{stem}_{}_{direction}_congestion.json",
                resolved.canonical
            ));
            plot::write_plot_json(&data, &path)?;
            series_written += 1;
        }
    }

    // Aggregated per-direction sequence timelines across all TCP flows
    for direction in Direction::BOTH {
        let Some(samples) = aggregate.get(&direction) else {
            continue;
        };
        let stitched = stitch::stitch_samples(samples);
        if stitched.is_empty() {
            continue;
        }
        let data = PlotData {
            title: "Agglomeration of all connections".to_string(),
            x_label: "Time [s]".to_string(),
            y_label: "Sequence number".to_string(),
            series: stitched
                .iter()
                .map(|(interface, series)| {
                    Series::from_offsets(interface.to_string(), series)
                })
                .collect(),
        };
        let path = dirs.graphs.join(format!("{stem}_{direction}_seq.json"));
        plot::write_plot_json(&data, &path)?;
        series_written += 1;
    }

    // Multipath sequence streams, stitched into one timeline per interface
    let samples = collect_multipath_samples(workdir.path(), "", &mptcp_conns)?;
    if !samples.is_empty() {
        let stitched = stitch::stitch_samples(&samples);
        let data = PlotData {
            title: "Stitched multipath sequence offsets".to_string(),
            x_label: "Time [s]".to_string(),
            y_label: "Data sequence offset [Bytes]".to_string(),
            series: stitched
                .iter()
                .map(|(interface, series)| {
                    Series::from_offsets(interface.to_string(), series)
                })
                .collect(),
        };
        let path = dirs.graphs.join(format!("{stem}_mptcp_d2s_seq.json"));
        plot::write_plot_json(&data, &path)?;
        series_written += 1;
    }

    // Persist the connection objects for the summary tools
    let summary = CaptureSummary {
        capture: stem.clone(),
        repaired_pairs,
        tcp_connections: tcp_conns.len(),
        mptcp_connections: mptcp_conns.len(),
        series_written,
    };
    let mut stats = CaptureStats::new(&stem);
    stats.tcp = tcp_conns;
    stats.mptcp = mptcp_conns;
    let stats_path = dirs
        .stats
        .join(format!("{stem}.{}", store::STATS_EXTENSION));
    store::save_stats(&stats, &stats_path)
        .wrap_err_with(|| format!("Failed to persist stats for {stem}"))?;

    Ok(summary)
}

/// Run the multipath report tool and parse its connection listing. A
/// failing tool or a missing listing means no multipath traffic: the
/// capture still gets its TCP-level analysis.
fn run_multipath_report(
    config: &Config,
    capture: &Path,
    workdir: &Path,
) -> Result<MptcpConnections> {
    if let Err(err) = tools::multipath_report(&config.tools, capture, workdir) {
        log::warn!("{}: multipath report failed: {err}", capture.display());
        return Ok(MptcpConnections::new());
    }
    let listing = workdir.join(MULTIPATH_LISTING);
    if !listing.exists() {
        log::debug!("{}: no multipath listing", capture.display());
        return Ok(MptcpConnections::new());
    }
    let reader = BufReader::new(fs::File::open(&listing)?);
    Ok(trace::parse_multipath_report(reader, &config.interfaces)?)
}

/// Sequence samples of every download-direction multipath stream under
/// `dir` whose name starts with `prefix`. Upload streams are left out:
/// the stitched timeline tracks data arriving at the capture point.
pub fn collect_multipath_samples(
    dir: &Path,
    prefix: &str,
    mptcp_conns: &MptcpConnections,
) -> Result<Vec<SeqSample>> {
    let mut samples = Vec::new();

    for stream in sorted_artifacts(dir, prefix, SEQ_STREAM_SUFFIX)? {
        let name = stream
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let resolved = match resolve_label(&name) {
            Ok(resolved) => resolved,
            Err(err) => {
                log::warn!("{name}: {err}, skipping stream");
                continue;
            }
        };
        if !resolved.reversed {
            continue;
        }
        let Some(conn) = mptcp_conns.get(&resolved.canonical) else {
            log::debug!("{name}: no multipath record for {}", resolved.canonical);
            continue;
        };

        let events = trace::parse_seq_events(BufReader::new(fs::File::open(&stream)?))?;
        for event in events {
            if let SeqEvent::Map {
                timestamp,
                seq_end,
                subflow,
                reinjected_from,
                ..
            } = event
            {
                let Some(flow) = conn.subflows.get(&subflow) else {
                    log::debug!("{name}: sample names unknown subflow {subflow}");
                    continue;
                };
                samples.push(SeqSample {
                    timestamp,
                    seq_end,
                    connection: resolved.canonical.clone(),
                    subflow: Some(subflow),
                    reinjected_from,
                    interface: flow.interface,
                });
            }
        }
    }

    Ok(samples)
}

/// Files under `dir` whose name starts with `prefix` and ends with
/// `suffix`, in sorted order.
fn sorted_artifacts(dir: &Path, prefix: &str, suffix: &str) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(prefix) && n.ends_with(suffix))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    Ok(paths)
}

/// Batch results, merged only after each file fully completed
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub processed: Vec<CaptureSummary>,
    pub failed: usize,
}

impl BatchSummary {
    pub fn total_tcp_connections(&self) -> usize {
        self.processed.iter().map(|s| s.tcp_connections).sum()
    }

    pub fn total_mptcp_connections(&self) -> usize {
        self.processed.iter().map(|s| s.mptcp_connections).sum()
    }

    pub fn total_repaired_pairs(&self) -> usize {
        self.processed.iter().map(|s| s.repaired_pairs).sum()
    }
}

/// Process a batch of staged captures in parallel. Per-file failures are
/// logged and skipped; the batch only fails outright on an empty input
/// set.
pub fn run_batch(
    config: &Config,
    captures: &[PathBuf],
    dirs: &BatchDirs,
) -> Result<BatchSummary> {
    if captures.is_empty() {
        bail!("no capture files to process");
    }
    log::info!("Processing {} capture(s)...", captures.len());

    let mut processed: Vec<CaptureSummary> = captures
        .par_iter()
        .filter_map(|capture| match process_capture(config, capture, dirs) {
            Ok(summary) => {
                log::info!(
                    "{}: {} tcp, {} mptcp connection(s), {} series",
                    summary.capture,
                    summary.tcp_connections,
                    summary.mptcp_connections,
                    summary.series_written
                );
                Some(summary)
            }
            Err(err) => {
                log::warn!("Failed to process {}: {err:#}", capture.display());
                None
            }
        })
        .collect();

    let failed = captures.len() - processed.len();
    processed.sort_by(|a, b| a.capture.cmp(&b.capture));
    Ok(BatchSummary { processed, failed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FlowKey, Interface};
    use tempfile::TempDir;

    fn flow(saddr: &str, daddr: &str, packets_s2d: u64, packets_d2s: u64) -> Flow {
        let key = FlowKey::new(saddr.parse().unwrap(), daddr.parse().unwrap(), 1000, 80);
        let mut flow = Flow::new(key, Interface::Wifi);
        flow.packets.src2dst = packets_s2d;
        flow.packets.dst2src = packets_d2s;
        flow
    }

    #[test]
    fn test_loopback_chatter_is_not_interesting() {
        let flow = flow("127.0.0.1", "127.0.0.1", 10, 10);
        assert!(!interesting_flow(&flow, false));
        assert!(!interesting_flow(&flow, true));
    }

    #[test]
    fn test_direction_packets_gate_interest() {
        let flow = flow("192.168.1.4", "203.0.113.5", 5, 0);
        assert!(interesting_flow(&flow, false));
        assert!(!interesting_flow(&flow, true));
    }

    #[test]
    fn test_bootstrap_creates_layout() {
        let root = TempDir::new().unwrap();
        let dirs = BatchDirs::bootstrap(root.path()).unwrap();
        assert!(dirs.traces.is_dir());
        assert!(dirs.graphs.is_dir());
        assert!(dirs.stats.is_dir());
        // Idempotent
        BatchDirs::bootstrap(root.path()).unwrap();
    }

    #[test]
    fn test_file_squatting_directory_path_is_fatal() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("traces");
        fs::write(&path, b"oops").unwrap();
        assert!(BatchDirs::bootstrap(root.path()).is_err());
    }

    #[test]
    fn test_stage_rejects_unknown_format() {
        let root = TempDir::new().unwrap();
        let input = root.path().join("trace.txt");
        fs::write(&input, b"x").unwrap();
        let err = stage_input(&Config::default(), &input, root.path()).unwrap_err();
        assert!(err.to_string().contains("not in a valid format"));
    }

    #[test]
    fn test_stage_moves_pcap() {
        let root = TempDir::new().unwrap();
        let traces = root.path().join("traces");
        fs::create_dir(&traces).unwrap();
        let input = root.path().join("run1.pcap");
        fs::write(&input, b"capture-bytes").unwrap();

        let staged = stage_input(&Config::default(), &input, &traces).unwrap();
        assert_eq!(staged, traces.join("run1.pcap"));
        assert!(staged.exists());
        assert!(!input.exists());
        assert_eq!(fs::read(&staged).unwrap(), b"capture-bytes");
    }

    #[test]
    fn test_empty_batch_is_an_error() {
        let root = TempDir::new().unwrap();
        let dirs = BatchDirs::bootstrap(root.path()).unwrap();
        assert!(run_batch(&Config::default(), &[], &dirs).is_err());
    }

    #[test]
    fn test_sorted_artifacts_filters_and_orders() {
        let root = TempDir::new().unwrap();
        for name in ["t_c2d_tsg.xpl", "t_a2b_tsg.xpl", "t_a2b_tput.xpl", "other.txt"] {
            fs::write(root.path().join(name), b"").unwrap();
        }
        let found = sorted_artifacts(root.path(), "t_", "_tsg.xpl").unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["t_a2b_tsg.xpl", "t_c2d_tsg.xpl"]);
    }
}
