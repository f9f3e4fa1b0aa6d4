//! Cross-run sequence summary CLI.
//!
//! Loads the connection stats persisted by the batch driver, re-stitches
//! the sequence streams of every stored connection into per-interface
//! summary timelines, and computes handover statistics (how much of a
//! multipath connection's data left the initial subflow) as CDF-ready
//! series.

use std::fs;
use std::io::BufReader;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Context, Result};
use serde::Serialize;

use mptcpscope::model::{Direction, SeqSample};
use mptcpscope::naming::resolve_label;
use mptcpscope::orchestrator::{self, ensure_directory};
use mptcpscope::plot::{self, cdf_series, PlotData, Series};
use mptcpscope::stitch;
use mptcpscope::store::{self, CaptureStats};
use mptcpscope::trace;

#[derive(Parser)]
#[command(name = "seq-summary")]
#[command(about = "Summarize stitched sequence offsets across capture runs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding the persisted stats files
    #[arg(short = 's', long, default_value = "stats")]
    stats: PathBuf,

    /// Directory where the summary series will be stored
    #[arg(short = 'S', long, default_value = "sums")]
    sums: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Re-stitch download-direction sequence offsets per capture
    Sequence {
        /// Directory where the per-connection sequence streams and
        /// per-flow graph artifacts are located
        #[arg(short, long)]
        csv: PathBuf,
    },

    /// Handover statistics over multi-subflow connections
    Handover,

    /// Show summary statistics of the stored captures
    Summary,
}

/// Run metadata written next to the summary series
#[derive(Serialize)]
struct SummaryMetadata {
    generated_at: String,
    stats_dir: String,
    captures: usize,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&cli.log_level),
    )
    .init();

    log::info!("Loading stats from {}...", cli.stats.display());
    let all_stats = store::load_stats_dir(&cli.stats)
        .with_context(|| format!("Failed to scan stats dir {}", cli.stats.display()))?;
    log::info!("Loaded {} capture(s)", all_stats.len());

    ensure_directory(&cli.sums)?;
    write_metadata(&cli, &all_stats)?;

    match cli.command {
        Commands::Sequence { csv } => {
            for stats in &all_stats {
                if let Err(err) = summarize_capture(stats, &csv, &cli.sums) {
                    log::warn!("Skipping {}: {err:#}", stats.capture);
                }
            }
        }
        Commands::Handover => {
            let report = handover_report(&all_stats);
            report.write_series(&cli.sums)?;
            report.print();
        }
        Commands::Summary => {
            println!("\n=== STORED CAPTURE SUMMARY ===\n");
            println!("Stats directory: {}", cli.stats.display());
            println!("Captures: {}", all_stats.len());
            println!(
                "  multipath: {}",
                all_stats.iter().filter(|s| s.is_multipath()).count()
            );
            let tcp_total: usize = all_stats.iter().map(|s| s.tcp.len()).sum();
            let mptcp_total: usize = all_stats.iter().map(|s| s.mptcp.len()).sum();
            println!("TCP connections: {tcp_total}");
            println!("MPTCP connections: {mptcp_total}");
            println!();
        }
    }

    Ok(())
}

fn write_metadata(cli: &Cli, all_stats: &[CaptureStats]) -> Result<()> {
    let metadata = SummaryMetadata {
        generated_at: chrono::Utc::now().to_rfc3339(),
        stats_dir: cli.stats.display().to_string(),
        captures: all_stats.len(),
    };
    let json = serde_json::to_string_pretty(&metadata)?;
    fs::write(cli.sums.join("summary_metadata.json"), json)
        .context("Failed to write summary metadata")?;
    Ok(())
}

/// Build the download-direction stitched timeline of one stored capture
/// from its sequence streams (multipath) or graph artifacts (plain TCP).
fn summarize_capture(stats: &CaptureStats, csv_dir: &PathBuf, sums: &PathBuf) -> Result<()> {
    let prefix = format!("{}_", stats.capture);

    let samples = if stats.is_multipath() {
        orchestrator::collect_multipath_samples(csv_dir, &prefix, &stats.mptcp)?
    } else {
        collect_tcp_samples(stats, csv_dir, &prefix)?
    };
    if samples.is_empty() {
        log::debug!("{}: no download samples", stats.capture);
        return Ok(());
    }

    let stitched = stitch::stitch_samples(&samples);
    let data = PlotData {
        title: format!("Stitched sequence offsets: {}", stats.capture),
        x_label: "Time [s]".to_string(),
        y_label: "Sequence offset [Bytes]".to_string(),
        series: stitched
            .iter()
            .map(|(interface, series)| Series::from_offsets(interface.to_string(), series))
            .collect(),
    };
    plot::write_plot_json(&data, &sums.join(format!("{}_d2s_summary.json", stats.capture)))
}

/// Download-direction sequence markers of a plain TCP capture, chained
/// per connection.
fn collect_tcp_samples(
    stats: &CaptureStats,
    csv_dir: &PathBuf,
    prefix: &str,
) -> Result<Vec<SeqSample>> {
    let mut samples = Vec::new();
    let mut entries: Vec<PathBuf> = fs::read_dir(csv_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(prefix) && n.ends_with("_tsg.xpl"))
                .unwrap_or(false)
        })
        .collect();
    entries.sort();

    for path in entries {
        let name = path
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
        if !resolved.reversed {
            continue;
        }
        let Some(conn) = stats.tcp.get(&resolved.canonical) else {
            continue;
        };

        let events =
            trace::parse_plot_events(BufReader::new(fs::File::open(&path)?), 0.0)?;
        for (timestamp, seq) in events.seq_markers {
            samples.push(SeqSample {
                timestamp,
                seq_end: seq,
                connection: resolved.canonical.clone(),
                subflow: None,
                reinjected_from: None,
                interface: conn.flow.interface,
            });
        }
    }

    Ok(samples)
}

/// Handover statistics across every stored multi-subflow connection
#[derive(Debug, Default)]
struct HandoverReport {
    /// Connections with at least two data-carrying subflows
    multiflow_connections: usize,
    /// Connections where a non-initial subflow took over after the
    /// initial one
    handover_connections: usize,
    /// Per direction: fraction of unique bytes carried off the initial
    /// subflow
    fractions: Vec<(Direction, Vec<f64>)>,
    /// Per direction: connections whose data never left the initial
    /// subflow
    zero_fraction: Vec<(Direction, usize)>,
    /// Multiflow connections that advertised no additional address
    no_advertised_addrs: usize,
    /// Multiflow connections that never removed an address
    no_removed_addrs: usize,
}

impl HandoverReport {
    fn write_series(&self, sums: &PathBuf) -> Result<()> {
        for (direction, values) in &self.fractions {
            let data = PlotData {
                title: "Bytes off the initial subflow".to_string(),
                x_label: "Fraction of total unique bytes".to_string(),
                y_label: "CDF".to_string(),
                series: vec![Series::new("Additional SFs", cdf_series(values))],
            };
            plot::write_plot_json(
                &data,
                &sums.join(format!("handover_cdf_{direction}.json")),
            )?;
        }
        Ok(())
    }

    fn print(&self) {
        println!("\n=== HANDOVER SUMMARY ===\n");
        println!("Multiflow connections: {}", self.multiflow_connections);
        println!("With handover:         {}", self.handover_connections);
        for (direction, count) in &self.zero_fraction {
            println!("Zero off-initial fraction ({direction}): {count}");
        }
        println!("No advertised addresses: {}", self.no_advertised_addrs);
        println!("No removed addresses:    {}", self.no_removed_addrs);
        println!();
    }
}

fn handover_report(all_stats: &[CaptureStats]) -> HandoverReport {
    let mut report = HandoverReport::default();
    let mut fractions: Vec<(Direction, Vec<f64>)> = Direction::BOTH
        .iter()
        .map(|d| (*d, Vec::new()))
        .collect();
    let mut zero_fraction: Vec<(Direction, usize)> =
        Direction::BOTH.iter().map(|d| (*d, 0)).collect();

    for stats in all_stats {
        let mut labels: Vec<&String> = stats.mptcp.keys().collect();
        labels.sort();

        for label in labels {
            let conn = &stats.mptcp[label];
            if conn.active_subflows() < 2 {
                continue;
            }
            let Some(initial) = conn.initial_subflow() else {
                continue;
            };
            report.multiflow_connections += 1;

            // Handover: a later subflow carried data after the initial
            // one was already up
            let initial_start = conn.subflows[&initial].start;
            let handover = conn.subflows.iter().any(|(id, flow)| {
                *id != initial
                    && flow.start > initial_start
                    && (flow.unique_bytes.src2dst > 0 || flow.unique_bytes.dst2src > 0)
            });
            if handover {
                report.handover_connections += 1;
            }

            if conn.advertised_addrs.is_empty() {
                report.no_advertised_addrs += 1;
            }
            if conn.removed_addrs.is_empty() {
                report.no_removed_addrs += 1;
            }

            for (slot, (direction, values)) in fractions.iter_mut().enumerate() {
                let total: u64 = conn
                    .subflows
                    .values()
                    .map(|f| *f.unique_bytes.get(*direction))
                    .sum();
                if total == 0 {
                    continue;
                }
                let off_initial: u64 = conn
                    .subflows
                    .iter()
                    .filter(|(id, _)| **id != initial)
                    .map(|(_, f)| *f.unique_bytes.get(*direction))
                    .sum();
                let fraction = off_initial as f64 / total as f64;
                values.push(fraction);
                if fraction == 0.0 {
                    zero_fraction[slot].1 += 1;
                }
            }
        }
    }

    report.fractions = fractions;
    report.zero_fraction = zero_fraction;
    report
}
