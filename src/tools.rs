//! External trace and capture tool invocation.
//!
//! Every operation here is a blocking call into a collaborator tool
//! (connection reports, capture split/rewrite/merge, decompression). The
//! engine only consumes the exit status and the output path; report
//! contents are parsed by the `trace` module. Calls have no timeout: a
//! hang in a tool blocks the batch for that file, failures surface as
//! non-zero exit codes.

use std::fs::File;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use crate::config::ToolsConfig;

/// Errors raised by external tool invocations
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{tool} exited with {status} for {input:?}")]
    Failed {
        tool: String,
        status: ExitStatus,
        input: PathBuf,
    },

    #[error("failed to launch {tool}: {source}")]
    Launch {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One header remap: wherever the `from` endpoint appears, write `to`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointMap {
    pub from: (IpAddr, u16),
    pub to: (IpAddr, u16),
}

fn run(mut command: Command, tool: &str, input: &Path) -> Result<(), ToolError> {
    log::debug!("Running {:?}", command);
    let status = command
        .stdout(Stdio::null())
        .status()
        .map_err(|source| ToolError::Launch {
            tool: tool.to_string(),
            source,
        })?;
    if !status.success() {
        return Err(ToolError::Failed {
            tool: tool.to_string(),
            status,
            input: input.to_path_buf(),
        });
    }
    Ok(())
}

fn run_to_file(
    mut command: Command,
    tool: &str,
    input: &Path,
    stdout_path: &Path,
) -> Result<(), ToolError> {
    log::debug!("Running {:?} > {}", command, stdout_path.display());
    let stdout = File::create(stdout_path)?;
    let status = command
        .stdout(Stdio::from(stdout))
        .status()
        .map_err(|source| ToolError::Launch {
            tool: tool.to_string(),
            source,
        })?;
    if !status.success() {
        return Err(ToolError::Failed {
            tool: tool.to_string(),
            status,
            input: input.to_path_buf(),
        });
    }
    Ok(())
}

/// Run the connection-report tool in probe mode (CSV listing only) and
/// write the report to `report_path`.
pub fn connection_report(
    tools: &ToolsConfig,
    capture: &Path,
    report_path: &Path,
) -> Result<(), ToolError> {
    let mut command = Command::new(&tools.connection_report);
    command.args(["-n", "-l", "--csv"]).arg(capture);
    run_to_file(command, &tools.connection_report, capture, report_path)
}

/// Run the connection-report tool with per-flow sequence graph generation.
///
/// The plot artifacts (one per flow and direction, the label embedded in
/// the filename) land in `workdir`; the CSV listing goes to `report_path`.
pub fn connection_report_with_graphs(
    tools: &ToolsConfig,
    capture: &Path,
    workdir: &Path,
    prefix: &str,
    report_path: &Path,
) -> Result<(), ToolError> {
    let mut command = Command::new(&tools.connection_report);
    command
        .arg(format!("--output_dir={}", workdir.display()))
        .arg(format!("--output_prefix={prefix}_"))
        .args(["-C", "-S", "-T", "-zxy", "-n", "-y", "-l", "--csv"])
        .args([
            "--noshowzwndprobes",
            "--noshowoutorder",
            "--noshowrexmit",
            "--noshowsacks",
            "--noshowzerowindow",
            "--noshowurg",
            "--noshowdupack3",
            "--noshowzerolensegs",
        ])
        .arg(capture);
    run_to_file(command, &tools.connection_report, capture, report_path)
}

/// Run the multipath report tool against a capture. The per-connection
/// sequence CSV files and the connection listing land in `workdir`.
pub fn multipath_report(
    tools: &ToolsConfig,
    capture: &Path,
    workdir: &Path,
) -> Result<(), ToolError> {
    let mut command = Command::new(&tools.multipath_report);
    command
        .arg("-f")
        .arg(capture)
        .args(["-s", "-w", "2"])
        .current_dir(workdir);
    run(command, &tools.multipath_report, capture)
}

/// Carve the packets matching `filter` out of `input` into `output`.
pub fn filter_capture(
    tools: &ToolsConfig,
    input: &Path,
    filter: &str,
    output: &Path,
) -> Result<(), ToolError> {
    let mut command = Command::new(&tools.packet_filter);
    command
        .arg("-r")
        .arg(input)
        .arg("-Y")
        .arg(filter)
        .arg("-w")
        .arg(output);
    run(command, &tools.packet_filter, input)
}

/// The display filter matching every packet of a TCP port, both directions
pub fn port_filter(port: u16) -> String {
    format!("(tcp.srcport=={port})or(tcp.dstport=={port})")
}

/// The complement of [`port_filter`]
pub fn negated_port_filter(port: u16) -> String {
    format!("!({})", port_filter(port))
}

/// Remap endpoints in the headers of `input` into `output`. Pure header
/// rewrite, payload untouched.
pub fn rewrite_endpoints(
    tools: &ToolsConfig,
    input: &Path,
    output: &Path,
    maps: &[EndpointMap],
) -> Result<(), ToolError> {
    let mut command = Command::new(&tools.header_rewrite);
    for map in maps {
        command.arg(format!("--portmap={}:{}", map.from.1, map.to.1));
        command.arg(format!("--pnat={}:{}", map.from.0, map.to.0));
    }
    command.arg(format!("--infile={}", input.display()));
    command.arg(format!("--outfile={}", output.display()));
    run(command, &tools.header_rewrite, input)
}

/// Concatenate capture `parts` into `output`.
pub fn merge_captures(
    tools: &ToolsConfig,
    parts: &[PathBuf],
    output: &Path,
) -> Result<(), ToolError> {
    let mut command = Command::new(&tools.capture_merge);
    command.arg("-w").arg(output);
    for part in parts {
        command.arg(part);
    }
    let input = parts.first().cloned().unwrap_or_default();
    run(command, &tools.capture_merge, &input)
}

/// Decompress a gzipped trace to `output`.
pub fn decompress(tools: &ToolsConfig, input: &Path, output: &Path) -> Result<(), ToolError> {
    let mut command = Command::new(&tools.decompress);
    command.arg("-c").arg(input);
    run_to_file(command, &tools.decompress, input, output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolsConfig;
    use tempfile::TempDir;

    #[test]
    fn test_port_filters() {
        assert_eq!(port_filter(1080), "(tcp.srcport==1080)or(tcp.dstport==1080)");
        assert_eq!(
            negated_port_filter(1080),
            "!((tcp.srcport==1080)or(tcp.dstport==1080))"
        );
    }

    #[test]
    fn test_missing_tool_reports_launch_error() {
        let tools = ToolsConfig {
            packet_filter: "definitely-not-a-real-tool".to_string(),
            ..ToolsConfig::default()
        };
        let dir = TempDir::new().unwrap();
        let err = filter_capture(
            &tools,
            &dir.path().join("in.pcap"),
            "(tcp.srcport==1)or(tcp.dstport==1)",
            &dir.path().join("out.pcap"),
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::Launch { .. }));
    }

    #[test]
    fn test_failing_tool_reports_status() {
        // `false` is a portable always-failing command
        let tools = ToolsConfig {
            capture_merge: "false".to_string(),
            ..ToolsConfig::default()
        };
        let dir = TempDir::new().unwrap();
        let err = merge_captures(
            &tools,
            &[dir.path().join("a.pcap")],
            &dir.path().join("out.pcap"),
        )
        .unwrap_err();
        match err {
            ToolError::Failed { tool, .. } => assert_eq!(tool, "false"),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn test_stdout_capture_creates_report_file() {
        // `true` succeeds and writes nothing: the report file must still
        // exist (empty) so downstream parsing sees an empty report, not a
        // missing file.
        let tools = ToolsConfig {
            connection_report: "true".to_string(),
            ..ToolsConfig::default()
        };
        let dir = TempDir::new().unwrap();
        let report = dir.path().join("capture.out");
        connection_report(&tools, &dir.path().join("capture.pcap"), &report).unwrap();
        assert!(report.exists());
        assert_eq!(std::fs::read(&report).unwrap().len(), 0);
    }
}
