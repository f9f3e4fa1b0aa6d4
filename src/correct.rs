//! Loopback split/stitch capture correction.
//!
//! A connection routed through a local relay appears in a capture as two
//! independent unidirectional connections: the outbound half addressed to
//! the relay (`client -> relay`) and the inbound half carrying the remote
//! peer's real address back to the client endpoint. Correction carves the
//! relay-facing packets out of the capture, remaps the relay endpoint to
//! the mirror flow's real source, and merges everything back into one
//! bidirectional, externally-addressed capture.
//!
//! Correction must run before multipath analysis: the multipath report
//! tool cannot reassemble conversations that are still split in half.

use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use color_eyre::eyre::{eyre, Result, WrapErr};

use crate::config::Config;
use crate::model::TcpConnections;
use crate::tools::{self, EndpointMap};
use crate::trace::parse_connection_report;

/// One detected relay pair, by connection label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayPair {
    /// The relay-facing flow (`client -> relay`)
    pub relay_flow: String,
    /// The mirror flow carrying the remote peer's real address
    pub mirror: String,
}

/// Detect the relay pairs among probed connections.
///
/// A flow whose destination equals the relay endpoint pairs with the flow
/// whose destination is the client's own source endpoint: the two halves
/// of one relayed conversation. Labels are scanned in sorted order so the
/// pairing is deterministic; each mirror is consumed at most once.
pub fn find_relay_pairs(
    connections: &TcpConnections,
    relay: (IpAddr, u16),
) -> Vec<RelayPair> {
    let mut labels: Vec<String> = connections.keys().cloned().collect();
    labels.sort();

    let mut pairs = Vec::new();
    let mut claimed: Vec<String> = Vec::new();

    for label in &labels {
        let conn = &connections[label];
        if conn.flow.key.dst_endpoint() != relay {
            continue;
        }
        let client = conn.flow.key.src_endpoint();
        let mirror = labels.iter().find(|other| {
            *other != label
                && !claimed.contains(*other)
                && connections[*other].flow.key.dst_endpoint() == client
        });
        if let Some(mirror) = mirror {
            claimed.push(mirror.clone());
            pairs.push(RelayPair {
                relay_flow: label.clone(),
                mirror: mirror.clone(),
            });
        }
    }

    pairs
}

/// The endpoint remap repairing one relay pair: wherever the relay
/// appears as a destination, write the mirror flow's real source.
pub fn repair_map(connections: &TcpConnections, pair: &RelayPair) -> EndpointMap {
    let relay_flow = &connections[&pair.relay_flow];
    let mirror = &connections[&pair.mirror];
    EndpointMap {
        from: relay_flow.flow.key.dst_endpoint(),
        to: mirror.flow.key.src_endpoint(),
    }
}

/// Probe a capture for relay pairs and rewrite it in place so every
/// detected pair reads as one externally-addressed connection.
///
/// Returns the number of repaired pairs. Any stage failure aborts
/// correction for this capture only; the scratch directory with the
/// partial split/rewrite products is kept for operator inspection
/// instead of being cleaned up.
pub fn correct_capture(config: &Config, capture: &Path) -> Result<usize> {
    let parent = capture
        .parent()
        .ok_or_else(|| eyre!("capture {} has no parent directory", capture.display()))?;
    let workdir = tempfile::Builder::new()
        .prefix("correct-")
        .tempdir_in(parent)
        .wrap_err("Failed to create correction scratch directory")?;

    match correct_in_workdir(config, capture, workdir.path()) {
        Ok(repaired) => Ok(repaired),
        Err(err) => {
            // Half-merged captures are unsafe to reprocess automatically;
            // keep the intermediates where the operator can look at them.
            let kept = workdir.into_path();
            log::warn!(
                "Correction of {} failed, intermediates kept in {}",
                capture.display(),
                kept.display()
            );
            Err(err)
        }
    }
}

fn correct_in_workdir(config: &Config, capture: &Path, workdir: &Path) -> Result<usize> {
    // Probe: report over the whole capture
    let probe_path = workdir.join("probe.out");
    tools::connection_report(&config.tools, capture, &probe_path)
        .wrap_err_with(|| format!("Probe of {} failed", capture.display()))?;
    let probe = fs::File::open(&probe_path)?;
    let connections =
        parse_connection_report(std::io::BufReader::new(probe), &config.interfaces)?;

    // Detect
    let pairs = find_relay_pairs(&connections, config.relay.endpoint());
    if pairs.is_empty() {
        log::debug!("No relay pairs in {}", capture.display());
        return Ok(0);
    }
    log::info!(
        "{}: correcting {} relay pair(s)",
        capture.display(),
        pairs.len()
    );

    // The remaining-capture file starts as a copy of the whole capture and
    // shrinks as each pair's packets are carved out.
    let remaining = workdir.join("remaining.pcap");
    fs::copy(capture, &remaining)
        .wrap_err_with(|| format!("Failed to stage {}", capture.display()))?;

    let mut segments: Vec<PathBuf> = Vec::new();
    for (index, pair) in pairs.iter().enumerate() {
        let client_port = connections[&pair.relay_flow].flow.key.sport;
        let filter = tools::port_filter(client_port);

        // Split: carve this pair's packets into a side file, complement
        // replaces the remaining capture in place
        let carved = workdir.join(format!("segment-{index}-raw.pcap"));
        tools::filter_capture(&config.tools, &remaining, &filter, &carved)?;
        let reduced = workdir.join("remaining-next.pcap");
        tools::filter_capture(
            &config.tools,
            &remaining,
            &tools::negated_port_filter(client_port),
            &reduced,
        )?;
        fs::rename(&reduced, &remaining)?;

        // Rewrite: relay endpoint becomes the mirror's real source
        let rewritten = workdir.join(format!("segment-{index}.pcap"));
        tools::rewrite_endpoints(
            &config.tools,
            &carved,
            &rewritten,
            &[repair_map(&connections, pair)],
        )?;
        fs::remove_file(&carved)?;
        segments.push(rewritten);

        log::debug!(
            "{}: corrected {}/{}",
            capture.display(),
            index + 1,
            pairs.len()
        );
    }

    // Merge all rewritten segments with the final remainder, then replace
    // the capture; the scratch directory cleans itself up on drop
    let merged = workdir.join("merged.pcap");
    let mut parts = segments;
    parts.push(remaining);
    tools::merge_captures(&config.tools, &parts, &merged)?;
    fs::copy(&merged, capture)
        .wrap_err_with(|| format!("Failed to replace {}", capture.display()))?;

    Ok(pairs.len())
}
