//! Parsers for the text reports emitted by the external trace tools.
//!
//! Record-level problems are contained to the record: malformed lines are
//! skipped and counted, never fatal to the report.

pub mod mptcp_report;
pub mod plot_events;
pub mod seq_events;
pub mod tcp_report;

pub use mptcp_report::parse_multipath_report;
pub use plot_events::{parse_plot_events, PlotEvents};
pub use seq_events::{parse_seq_events, SeqEvent};
pub use tcp_report::{parse_connection_report, relative_start_time};
