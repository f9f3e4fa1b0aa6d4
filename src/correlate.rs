//! TCP / multipath flow correlation.
//!
//! A subflow of a multipath connection is also visible to the TCP-level
//! report tool as an ordinary TCP connection. The two records share their
//! 4-tuple; the TCP-level record carries timing, retransmission and
//! reordering details the multipath tool cannot observe. Correlation
//! copies those details onto the matched subflow in place. A miss is a
//! normal outcome: plenty of flows exist at only one layer.

use crate::model::{Flow, FlowKey, MptcpConnections, SubflowId};

/// Locate the multipath subflow sharing a 4-tuple.
///
/// Exact equality match over every subflow of every connection, first
/// match wins. 4-tuples are unique within one processing run, so at most
/// one subflow can match.
pub fn find_subflow(
    key: &FlowKey,
    connections: &MptcpConnections,
) -> Option<(String, SubflowId)> {
    for (label, conn) in connections {
        for (subflow_id, flow) in &conn.subflows {
            if flow.key == *key {
                return Some((label.clone(), *subflow_id));
            }
        }
    }
    None
}

/// Copy the TCP-level-only attributes of `tcp_flow` into its matched
/// subflow.
///
/// Returns the matched `(connection label, subflow id)`, or None when the
/// flow exists only at the TCP layer. On a miss nothing is modified.
pub fn copy_tcp_details(
    tcp_flow: &Flow,
    connections: &mut MptcpConnections,
) -> Option<(String, SubflowId)> {
    let (label, subflow_id) = find_subflow(&tcp_flow.key, connections)?;

    let subflow = connections
        .get_mut(&label)
        .and_then(|conn| conn.subflows.get_mut(&subflow_id))
        .expect("matched subflow exists");

    subflow.start = tcp_flow.start;
    subflow.duration = tcp_flow.duration;
    subflow.retrans_packets = tcp_flow.retrans_packets;
    subflow.retrans_bytes = tcp_flow.retrans_bytes;
    subflow.ooo_packets = tcp_flow.ooo_packets;

    Some((label, subflow_id))
}
