use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::{Context, Result};
use env_logger::Env;
use log::{info, warn};

use mptcpscope::config::Config;
use mptcpscope::orchestrator::{self, BatchDirs};

/// Trace correlation and sequence-offset stitching for (Multipath) TCP
/// packet captures
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Capture files to analyze (.pcap, or .gz holding a capture)
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Root directory for traces, graphs and stats output
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Path to the analyzer configuration YAML file
    #[arg(short, long, default_value = "mptcpscope.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Number of parallel workers (0 = auto-detect)
    #[arg(short = 'j', long, default_value = "0")]
    threads: usize,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    env_logger::Builder::from_env(Env::default().default_filter_or(&args.log_level)).init();

    if args.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.threads)
            .build_global()
            .context("Failed to configure thread pool")?;
    }

    let config = Config::load(&args.config)?;
    let dirs = BatchDirs::bootstrap(&args.output)?;

    // Stage every input into the traces directory; a bad input is skipped,
    // not fatal to the batch
    let mut captures = Vec::new();
    for input in &args.inputs {
        match orchestrator::stage_input(&config, input, &dirs.traces) {
            Ok(staged) => captures.push(staged),
            Err(err) => warn!("Skipping {}: {err:#}", input.display()),
        }
    }

    let summary = orchestrator::run_batch(&config, &captures, &dirs)?;

    println!("\n=== CAPTURE BATCH SUMMARY ===\n");
    println!("Captures processed: {}", summary.processed.len());
    println!("Captures failed:    {}", summary.failed);
    println!("Relay pairs repaired: {}", summary.total_repaired_pairs());
    println!("TCP connections:    {}", summary.total_tcp_connections());
    println!("MPTCP connections:  {}", summary.total_mptcp_connections());
    println!();
    for capture in &summary.processed {
        println!(
            "  {}: {} tcp / {} mptcp, {} series",
            capture.capture,
            capture.tcp_connections,
            capture.mptcp_connections,
            capture.series_written
        );
    }

    info!("Batch complete; results under {}", args.output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let args = Args::parse_from(["mptcpscope", "trace.pcap"]);
        assert_eq!(args.inputs, vec![PathBuf::from("trace.pcap")]);
        assert_eq!(args.output, PathBuf::from("."));
        assert_eq!(args.threads, 0);
    }

    #[test]
    fn test_cli_multiple_inputs() {
        let args = Args::parse_from([
            "mptcpscope",
            "a.pcap",
            "b.pcap.gz",
            "--output",
            "results",
            "-j",
            "4",
        ]);
        assert_eq!(args.inputs.len(), 2);
        assert_eq!(args.output, PathBuf::from("results"));
        assert_eq!(args.threads, 4);
    }

    #[test]
    fn test_cli_requires_inputs() {
        assert!(Args::try_parse_from(["mptcpscope"]).is_err());
    }
}
