//! Multipath connection-listing parsing.
//!
//! The multipath report tool lists one subflow per comma-separated line
//! (`conn,subflow,saddr,daddr,sport,dport,first,last`, ids 1-based) plus
//! address-advertisement (`addaddr`) and address-removal (`rmaddr`) event
//! lines. Byte counts, retransmissions and timing details are not in this
//! listing: the multipath tool cannot observe them, they are copied in
//! later from the TCP-level report by the correlator.

use std::io::BufRead;

use crate::config::InterfaceRules;
use crate::model::{AddressEvent, Flow, FlowKey, MptcpConnection, MptcpConnections, SubflowId};
use crate::naming::connection_label;

const ADD_ADDR_MARKER: &str = "addaddr";
const RM_ADDR_MARKER: &str = "rmaddr";

enum Record {
    Subflow {
        connection: String,
        id: SubflowId,
        flow: Flow,
    },
    AddAddr {
        connection: String,
        event: AddressEvent,
    },
    RmAddr {
        connection: String,
        event: AddressEvent,
    },
}

fn connection_from_field(field: &str) -> Option<String> {
    let id: usize = field.parse().ok()?;
    Some(connection_label(id.checked_sub(1)?))
}

fn parse_subflow(fields: &[&str], rules: &InterfaceRules) -> Option<Record> {
    if fields.len() < 8 {
        return None;
    }
    let connection = connection_from_field(fields[0])?;
    let id: usize = fields[1].parse().ok()?;
    let id = id.checked_sub(1)?;

    let key = FlowKey::new(
        fields[2].parse().ok()?,
        fields[3].parse().ok()?,
        fields[4].parse().ok()?,
        fields[5].parse().ok()?,
    );
    let first: f64 = fields[6].parse().ok()?;
    let last: f64 = fields[7].parse().ok()?;

    let mut flow = Flow::new(key, rules.classify(&key.saddr));
    flow.start = first;
    flow.duration = last - first;
    Some(Record::Subflow {
        connection,
        id,
        flow,
    })
}

fn parse_addr_event(fields: &[&str]) -> Option<(String, AddressEvent)> {
    if fields.len() < 4 {
        return None;
    }
    let connection = connection_from_field(fields[1])?;
    let event = AddressEvent {
        timestamp: fields[2].parse().ok()?,
        addr: fields[3].parse().ok()?,
    };
    Some((connection, event))
}

fn parse_line(line: &str, rules: &InterfaceRules) -> Option<Record> {
    let line: String = line.chars().filter(|c| !c.is_whitespace()).collect();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let fields: Vec<&str> = line.split(',').collect();
    match fields[0] {
        ADD_ADDR_MARKER => {
            let (connection, event) = parse_addr_event(&fields)?;
            Some(Record::AddAddr { connection, event })
        }
        RM_ADDR_MARKER => {
            let (connection, event) = parse_addr_event(&fields)?;
            Some(Record::RmAddr { connection, event })
        }
        _ => parse_subflow(&fields, rules),
    }
}

/// Parse a multipath connection listing; malformed lines are skipped.
pub fn parse_multipath_report<R: BufRead>(
    reader: R,
    rules: &InterfaceRules,
) -> std::io::Result<MptcpConnections> {
    let mut connections = MptcpConnections::new();
    let mut skipped = 0usize;

    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match parse_line(trimmed, rules) {
            Some(Record::Subflow {
                connection,
                id,
                flow,
            }) => {
                connections
                    .entry(connection.clone())
                    .or_insert_with(|| MptcpConnection::new(connection))
                    .insert_subflow(id, flow);
            }
            Some(Record::AddAddr { connection, event }) => {
                connections
                    .entry(connection.clone())
                    .or_insert_with(|| MptcpConnection::new(connection))
                    .advertised_addrs
                    .push(event);
            }
            Some(Record::RmAddr { connection, event }) => {
                connections
                    .entry(connection.clone())
                    .or_insert_with(|| MptcpConnection::new(connection))
                    .removed_addrs
                    .push(event);
            }
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        log::debug!("Skipped {} non-record lines in multipath listing", skipped);
    }
    Ok(connections)
}
