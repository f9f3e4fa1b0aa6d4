//! Core data model for (M)PTCP trace analysis.
//!
//! Connections and flows are built from the text reports of the external
//! trace tools and mutated in place by the correlator and the capture
//! corrector. A connection exclusively owns its flows.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Timestamp in seconds, relative to the start of the capture batch
pub type TraceTime = f64;

/// Zero-based subflow index within a multipath connection
pub type SubflowId = usize;

/// Access interface carrying a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Interface {
    /// Cellular data interface (rmnet-style)
    Cellular,
    /// WiFi interface
    Wifi,
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interface::Cellular => write!(f, "cellular"),
            Interface::Wifi => write!(f, "wifi"),
        }
    }
}

/// IP version of a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        }
    }
}

/// Transfer direction relative to the flow's recorded source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Source to destination
    Src2Dst,
    /// Destination to source
    Dst2Src,
}

impl Direction {
    pub const BOTH: [Direction; 2] = [Direction::Src2Dst, Direction::Dst2Src];
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Src2Dst => write!(f, "s2d"),
            Direction::Dst2Src => write!(f, "d2s"),
        }
    }
}

/// A value tracked separately for each transfer direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DirStats<T> {
    pub src2dst: T,
    pub dst2src: T,
}

impl<T> DirStats<T> {
    pub fn get(&self, direction: Direction) -> &T {
        match direction {
            Direction::Src2Dst => &self.src2dst,
            Direction::Dst2Src => &self.dst2src,
        }
    }

    pub fn get_mut(&mut self, direction: Direction) -> &mut T {
        match direction {
            Direction::Src2Dst => &mut self.src2dst,
            Direction::Dst2Src => &mut self.dst2src,
        }
    }
}

/// The 4-tuple identifying one unidirectional-observed stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowKey {
    pub saddr: IpAddr,
    pub daddr: IpAddr,
    pub sport: u16,
    pub dport: u16,
}

impl FlowKey {
    pub fn new(saddr: IpAddr, daddr: IpAddr, sport: u16, dport: u16) -> Self {
        Self { saddr, daddr, sport, dport }
    }

    /// The same stream seen from the opposite direction
    pub fn reversed(&self) -> FlowKey {
        FlowKey {
            saddr: self.daddr,
            daddr: self.saddr,
            sport: self.dport,
            dport: self.sport,
        }
    }

    /// Source endpoint as (address, port)
    pub fn src_endpoint(&self) -> (IpAddr, u16) {
        (self.saddr, self.sport)
    }

    /// Destination endpoint as (address, port)
    pub fn dst_endpoint(&self) -> (IpAddr, u16) {
        (self.daddr, self.dport)
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.saddr, self.sport, self.daddr, self.dport
        )
    }
}

/// One unidirectional-observed TCP stream segment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub key: FlowKey,
    pub ip_version: IpVersion,
    pub interface: Interface,
    /// Start time relative to the batch, in seconds
    pub start: TraceTime,
    /// last packet - first packet, in seconds
    pub duration: f64,
    pub packets: DirStats<u64>,
    /// Unique data bytes (retransmissions counted once)
    pub unique_bytes: DirStats<u64>,
    pub retrans_packets: DirStats<u64>,
    pub retrans_bytes: DirStats<u64>,
    pub ooo_packets: DirStats<u64>,
}

impl Flow {
    /// Create a flow with all counters zeroed
    pub fn new(key: FlowKey, interface: Interface) -> Self {
        Self {
            key,
            ip_version: IpVersion::of(&key.saddr),
            interface,
            start: 0.0,
            duration: 0.0,
            packets: DirStats::default(),
            unique_bytes: DirStats::default(),
            retrans_packets: DirStats::default(),
            retrans_bytes: DirStats::default(),
            ooo_packets: DirStats::default(),
        }
    }

    /// True if both endpoints are IPv4 loopback
    pub fn is_loopback_only(&self) -> bool {
        self.key.saddr.is_loopback() && self.key.daddr.is_loopback()
    }
}

/// Address advertisement or removal seen on a multipath connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressEvent {
    pub timestamp: TraceTime,
    pub addr: IpAddr,
}

/// Unique byte totals per interface, per direction
pub type InterfaceBytes = DirStats<BTreeMap<Interface, u64>>;

/// Add `bytes` to the per-interface total of one direction
pub fn add_interface_bytes(
    totals: &mut InterfaceBytes,
    direction: Direction,
    interface: Interface,
    bytes: u64,
) {
    *totals.get_mut(direction).entry(interface).or_insert(0) += bytes;
}

/// A plain TCP connection: exactly one flow plus connection-level totals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConnection {
    /// Canonical label assigned by insertion order (see `naming`)
    pub label: String,
    pub flow: Flow,
    pub bytes_by_interface: InterfaceBytes,
}

impl TcpConnection {
    pub fn new(label: String, flow: Flow) -> Self {
        Self {
            label,
            flow,
            bytes_by_interface: DirStats::default(),
        }
    }
}

/// A multipath connection: subflows keyed by stable zero-based index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MptcpConnection {
    pub label: String,
    pub subflows: BTreeMap<SubflowId, Flow>,
    pub bytes_by_interface: InterfaceBytes,
    pub advertised_addrs: Vec<AddressEvent>,
    pub removed_addrs: Vec<AddressEvent>,
}

impl MptcpConnection {
    pub fn new(label: String) -> Self {
        Self {
            label,
            ..Default::default()
        }
    }

    /// Register a subflow under a stable index. A re-processed capture
    /// supersedes the previous flow for that index; the 4-tuple must stay
    /// unique across the connection's other subflows.
    pub fn insert_subflow(&mut self, id: SubflowId, flow: Flow) {
        debug_assert!(
            !self
                .subflows
                .iter()
                .any(|(other, f)| *other != id && f.key == flow.key),
            "duplicate 4-tuple within connection {}",
            self.label
        );
        self.subflows.insert(id, flow);
    }

    /// Subflow that started first (the initial subflow of the session)
    pub fn initial_subflow(&self) -> Option<SubflowId> {
        self.subflows
            .iter()
            .min_by(|(_, a), (_, b)| a.start.total_cmp(&b.start))
            .map(|(id, _)| *id)
    }

    /// Number of subflows that carried data in either direction
    pub fn active_subflows(&self) -> usize {
        self.subflows
            .values()
            .filter(|f| f.unique_bytes.src2dst > 0 || f.unique_bytes.dst2src > 0)
            .count()
    }
}

/// Plain TCP connections of one capture, keyed by canonical label
pub type TcpConnections = HashMap<String, TcpConnection>;

/// Multipath connections of one capture, keyed by canonical label
pub type MptcpConnections = HashMap<String, MptcpConnection>;

/// One timestamped sequence-number sample, fed to the stitcher.
///
/// Transient: produced while a report is parsed and consumed immediately,
/// never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct SeqSample {
    pub timestamp: TraceTime,
    /// End of the sequence range this sample accounts for
    pub seq_end: u64,
    /// Label of the owning connection
    pub connection: String,
    /// Originating subflow; None for plain TCP samples
    pub subflow: Option<SubflowId>,
    /// Sibling subflow this sample restates data from, when reinjected
    pub reinjected_from: Option<SubflowId>,
    pub interface: Interface,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(sport: u16, dport: u16) -> FlowKey {
        FlowKey::new(
            "10.0.0.1".parse().unwrap(),
            "203.0.113.5".parse().unwrap(),
            sport,
            dport,
        )
    }

    #[test]
    fn test_flow_key_reversed_roundtrip() {
        let k = key(4242, 443);
        assert_eq!(k.reversed().reversed(), k);
        assert_eq!(k.reversed().src_endpoint(), k.dst_endpoint());
    }

    #[test]
    fn test_ip_version_detection() {
        assert_eq!(
            IpVersion::of(&"192.168.1.1".parse().unwrap()),
            IpVersion::V4
        );
        assert_eq!(IpVersion::of(&"2001:db8::1".parse().unwrap()), IpVersion::V6);
    }

    #[test]
    fn test_interface_byte_totals() {
        let mut totals = InterfaceBytes::default();
        add_interface_bytes(&mut totals, Direction::Src2Dst, Interface::Wifi, 100);
        add_interface_bytes(&mut totals, Direction::Src2Dst, Interface::Wifi, 50);
        add_interface_bytes(&mut totals, Direction::Dst2Src, Interface::Cellular, 7);

        assert_eq!(totals.src2dst.get(&Interface::Wifi), Some(&150));
        assert_eq!(totals.dst2src.get(&Interface::Cellular), Some(&7));
        assert_eq!(totals.src2dst.get(&Interface::Cellular), None);
    }

    #[test]
    fn test_initial_subflow_is_earliest() {
        let mut conn = MptcpConnection::new("a2b".to_string());
        let mut wifi = Flow::new(key(1000, 443), Interface::Wifi);
        wifi.start = 2.5;
        let mut cell = Flow::new(key(1001, 443), Interface::Cellular);
        cell.start = 0.5;
        conn.insert_subflow(0, wifi);
        conn.insert_subflow(1, cell);

        assert_eq!(conn.initial_subflow(), Some(1));
    }

    #[test]
    fn test_active_subflow_count() {
        let mut conn = MptcpConnection::new("a2b".to_string());
        let mut used = Flow::new(key(1000, 443), Interface::Wifi);
        used.unique_bytes.src2dst = 10;
        let idle = Flow::new(key(1001, 443), Interface::Cellular);
        conn.insert_subflow(0, used);
        conn.insert_subflow(1, idle);

        assert_eq!(conn.active_subflows(), 1);
    }
}
