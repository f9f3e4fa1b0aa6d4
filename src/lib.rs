//! # mptcpscope - Trace correlation for (Multipath) TCP captures
//!
//! This library reconstructs per-connection, per-subflow statistics and
//! time-ordered sequence-number timelines from the text reports of
//! external trace tools, for network-performance research.
//!
//! ## Overview
//!
//! A capture batch flows through five stages:
//!
//! 1. **Staging** - inputs are moved (or decompressed) into the traces
//!    directory.
//! 2. **Correction** - connections captured as two unidirectional halves
//!    through a local relay are split, rewritten and merged back into one
//!    externally-addressed conversation (`correct`).
//! 3. **Analysis** - the TCP-level and multipath report tools run against
//!    the capture; their CSV reports become typed connection models
//!    (`trace`, `model`).
//! 4. **Correlation** - TCP-level flow records are matched to multipath
//!    subflows by 4-tuple and tool-only attributes are copied across
//!    (`correlate`).
//! 5. **Stitching** - per-subflow sequence samples, including reinjected
//!    segments, merge into one offset-corrected timeline per access
//!    interface, ready for the plotting side (`stitch`, `plot`).
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - `config`: YAML analyzer configuration (relay endpoint, interface
//!   rules, tool names)
//! - `model`: typed Flow/Connection data model
//! - `naming`: flow-index labels and artifact filename resolution
//! - `trace`: report, sequence-stream and plot-event parsers
//! - `tools`: blocking external tool invocations
//! - `correct`: loopback split/stitch capture correction
//! - `correlate`: TCP / multipath flow correlation
//! - `stitch`: sequence-offset stitching
//! - `plot`: plot-ready series shaping and JSON output
//! - `store`: persisted connection stats (compressed bincode)
//! - `orchestrator`: per-capture pipeline and parallel batch driver
//!
//! ## Error Handling
//!
//! Application-level functions return `color_eyre::Result` with context;
//! parsers and tool wrappers carry typed errors. Record-level problems
//! are contained to the record, file-level problems to the file: nothing
//! in a batch can corrupt another capture's in-progress state.

pub mod config;
pub mod correct;
pub mod correlate;
pub mod model;
pub mod naming;
pub mod orchestrator;
pub mod plot;
pub mod stitch;
pub mod store;
pub mod tools;
pub mod trace;
