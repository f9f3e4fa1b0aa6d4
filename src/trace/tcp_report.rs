//! Connection-report CSV parsing.
//!
//! The connection-report tool emits one comma-separated line per TCP
//! connection with fixed column positions. Comment lines (leading `#`),
//! the header line and anything whose first field is not a number are
//! skipped. Whitespace is stripped from the whole line first, matching
//! the tool's ragged column padding.

use std::io::BufRead;

use crate::config::InterfaceRules;
use crate::model::{Flow, FlowKey, TcpConnection, TcpConnections, TraceTime};
use crate::naming::connection_label;

// Fixed column positions of the long CSV report form.
const COL_ID: usize = 0;
const COL_SADDR: usize = 1;
const COL_DADDR: usize = 2;
const COL_SPORT: usize = 3;
const COL_DPORT: usize = 4;
const COL_FIRST_PACKET: usize = 5;
const COL_LAST_PACKET: usize = 6;
const COL_PACKETS_S2D: usize = 7;
const COL_PACKETS_D2S: usize = 8;
const COL_UNIQUE_BYTES_S2D: usize = 21;
const COL_UNIQUE_BYTES_D2S: usize = 22;
const COL_RETRANS_PACKETS_S2D: usize = 27;
const COL_RETRANS_PACKETS_D2S: usize = 28;
const COL_RETRANS_BYTES_S2D: usize = 29;
const COL_RETRANS_BYTES_D2S: usize = 30;
const COL_OOO_PACKETS_S2D: usize = 35;
const COL_OOO_PACKETS_D2S: usize = 36;

/// Minimum number of columns a data line must carry
const MIN_COLUMNS: usize = COL_OOO_PACKETS_D2S + 1;

/// Parse one report line into a labeled connection. Returns None for
/// comment, header and malformed lines.
fn parse_line(line: &str, rules: &InterfaceRules) -> Option<TcpConnection> {
    let line: String = line.chars().filter(|c| !c.is_whitespace()).collect();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() < MIN_COLUMNS {
        return None;
    }

    // Report ids are 1-based
    let id: usize = fields[COL_ID].parse().ok()?;
    let label = connection_label(id.checked_sub(1)?);

    let key = FlowKey::new(
        fields[COL_SADDR].parse().ok()?,
        fields[COL_DADDR].parse().ok()?,
        fields[COL_SPORT].parse().ok()?,
        fields[COL_DPORT].parse().ok()?,
    );

    let first: f64 = fields[COL_FIRST_PACKET].parse().ok()?;
    let last: f64 = fields[COL_LAST_PACKET].parse().ok()?;

    let mut flow = Flow::new(key, rules.classify(&key.saddr));
    flow.start = first;
    flow.duration = last - first;
    flow.packets.src2dst = fields[COL_PACKETS_S2D].parse().ok()?;
    flow.packets.dst2src = fields[COL_PACKETS_D2S].parse().ok()?;
    flow.unique_bytes.src2dst = fields[COL_UNIQUE_BYTES_S2D].parse().ok()?;
    flow.unique_bytes.dst2src = fields[COL_UNIQUE_BYTES_D2S].parse().ok()?;
    flow.retrans_packets.src2dst = fields[COL_RETRANS_PACKETS_S2D].parse().ok()?;
    flow.retrans_packets.dst2src = fields[COL_RETRANS_PACKETS_D2S].parse().ok()?;
    flow.retrans_bytes.src2dst = fields[COL_RETRANS_BYTES_S2D].parse().ok()?;
    flow.retrans_bytes.dst2src = fields[COL_RETRANS_BYTES_D2S].parse().ok()?;
    flow.ooo_packets.src2dst = fields[COL_OOO_PACKETS_S2D].parse().ok()?;
    flow.ooo_packets.dst2src = fields[COL_OOO_PACKETS_D2S].parse().ok()?;

    Some(TcpConnection::new(label, flow))
}

/// Parse a whole connection report into labeled connections.
///
/// Lines that do not parse are skipped; the count is logged so a truncated
/// report is visible in the batch log.
pub fn parse_connection_report<R: BufRead>(
    reader: R,
    rules: &InterfaceRules,
) -> std::io::Result<TcpConnections> {
    let mut connections = TcpConnections::new();
    let mut skipped = 0usize;

    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match parse_line(trimmed, rules) {
            Some(conn) => {
                connections.insert(conn.label.clone(), conn);
            }
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        log::debug!("Skipped {} non-record lines in connection report", skipped);
    }
    Ok(connections)
}

/// Smallest start time across all connections: the zero of the relative
/// time scale for this capture.
pub fn relative_start_time(connections: &TcpConnections) -> Option<TraceTime> {
    connections
        .values()
        .map(|c| c.flow.start)
        .min_by(|a, b| a.total_cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Interface, IpVersion};
    use std::io::Cursor;

    /// A report line with realistic column spread: 37 columns, with the
    /// documented positions filled and the rest zeroed.
    fn report_line(
        id: usize,
        saddr: &str,
        daddr: &str,
        sport: u16,
        dport: u16,
        first: f64,
        last: f64,
    ) -> String {
        let mut cols = vec!["0".to_string(); 40];
        cols[COL_ID] = id.to_string();
        cols[COL_SADDR] = saddr.to_string();
        cols[COL_DADDR] = daddr.to_string();
        cols[COL_SPORT] = sport.to_string();
        cols[COL_DPORT] = dport.to_string();
        cols[COL_FIRST_PACKET] = first.to_string();
        cols[COL_LAST_PACKET] = last.to_string();
        cols[COL_PACKETS_S2D] = "12".to_string();
        cols[COL_PACKETS_D2S] = "9".to_string();
        cols[COL_UNIQUE_BYTES_S2D] = "4000".to_string();
        cols[COL_UNIQUE_BYTES_D2S] = "900".to_string();
        cols[COL_RETRANS_PACKETS_S2D] = "2".to_string();
        cols[COL_RETRANS_BYTES_S2D] = "300".to_string();
        cols[COL_OOO_PACKETS_D2S] = "1".to_string();
        cols.join(",")
    }

    #[test]
    fn test_parse_single_connection() {
        let input = format!(
            "#comment line\nconn_id,saddr,daddr\n{}\n",
            report_line(1, "10.0.0.1", "203.0.113.5", 4242, 443, 100.5, 103.0)
        );
        let conns =
            parse_connection_report(Cursor::new(input), &InterfaceRules::default()).unwrap();

        assert_eq!(conns.len(), 1);
        let conn = &conns["a2b"];
        assert_eq!(conn.flow.key.sport, 4242);
        assert_eq!(conn.flow.key.dport, 443);
        assert_eq!(conn.flow.interface, Interface::Cellular);
        assert_eq!(conn.flow.ip_version, IpVersion::V4);
        assert!((conn.flow.start - 100.5).abs() < 1e-9);
        assert!((conn.flow.duration - 2.5).abs() < 1e-9);
        assert_eq!(conn.flow.packets.src2dst, 12);
        assert_eq!(conn.flow.unique_bytes.dst2src, 900);
        assert_eq!(conn.flow.retrans_packets.src2dst, 2);
        assert_eq!(conn.flow.retrans_bytes.src2dst, 300);
        assert_eq!(conn.flow.ooo_packets.dst2src, 1);
    }

    #[test]
    fn test_labels_follow_report_ids() {
        let input = format!(
            "{}\n{}\n",
            report_line(1, "10.0.0.1", "203.0.113.5", 1000, 80, 0.0, 1.0),
            report_line(2, "192.168.1.4", "203.0.113.5", 1001, 80, 0.5, 2.0),
        );
        let conns =
            parse_connection_report(Cursor::new(input), &InterfaceRules::default()).unwrap();

        assert!(conns.contains_key("a2b"));
        assert!(conns.contains_key("c2d"));
        assert_eq!(conns["c2d"].flow.interface, Interface::Wifi);
    }

    #[test]
    fn test_malformed_records_are_skipped() {
        let input = format!(
            "garbage,line\nnot-a-number,1,2,3\n{}\n",
            report_line(1, "10.0.0.1", "203.0.113.5", 1000, 80, 0.0, 1.0)
        );
        let conns =
            parse_connection_report(Cursor::new(input), &InterfaceRules::default()).unwrap();
        assert_eq!(conns.len(), 1);
    }

    #[test]
    fn test_relative_start_is_minimum() {
        let input = format!(
            "{}\n{}\n",
            report_line(1, "10.0.0.1", "203.0.113.5", 1000, 80, 42.0, 43.0),
            report_line(2, "10.0.0.1", "203.0.113.5", 1001, 80, 17.5, 99.0),
        );
        let conns =
            parse_connection_report(Cursor::new(input), &InterfaceRules::default()).unwrap();
        assert_eq!(relative_start_time(&conns), Some(17.5));
    }

    #[test]
    fn test_empty_report() {
        let conns = parse_connection_report(
            Cursor::new("# nothing here\n"),
            &InterfaceRules::default(),
        )
        .unwrap();
        assert!(conns.is_empty());
        assert_eq!(relative_start_time(&conns), None);
    }
}
