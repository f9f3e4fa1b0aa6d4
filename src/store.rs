//! Persisted connection statistics.
//!
//! Processed captures are saved as zstd-compressed bincode so summary
//! tools can aggregate across runs without re-invoking the trace tools.
//! The payload carries a format version; loading a stats file written by
//! an incompatible build fails instead of misreading counters.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::{MptcpConnections, TcpConnections};

/// Bump when the persisted layout changes
const STORE_VERSION: u32 = 1;

/// Extension of persisted stats files
pub const STATS_EXTENSION: &str = "stats";

/// Errors raised while saving or loading stats files
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("stats serialization failed: {0}")]
    Codec(#[from] bincode::Error),

    #[error("stats file {path:?} has version {found}, expected {expected}")]
    Version {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
}

/// Everything persisted for one processed capture
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureStats {
    /// File stem of the source capture
    pub capture: String,
    pub tcp: TcpConnections,
    pub mptcp: MptcpConnections,
}

impl CaptureStats {
    pub fn new(capture: impl Into<String>) -> Self {
        Self {
            capture: capture.into(),
            ..Default::default()
        }
    }

    /// True when the capture carried multipath traffic
    pub fn is_multipath(&self) -> bool {
        !self.mptcp.is_empty()
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    stats: CaptureStats,
}

/// Save capture stats, compressed, to `path`.
pub fn save_stats(stats: &CaptureStats, path: &Path) -> Result<(), StoreError> {
    let file = BufWriter::new(File::create(path)?);
    let mut encoder = zstd::Encoder::new(file, 0)?;
    bincode::serialize_into(
        &mut encoder,
        &Envelope {
            version: STORE_VERSION,
            stats: stats.clone(),
        },
    )?;
    encoder.finish()?.flush()?;
    log::debug!("Stats written to {}", path.display());
    Ok(())
}

/// Load capture stats back from `path`.
pub fn load_stats(path: &Path) -> Result<CaptureStats, StoreError> {
    let file = BufReader::new(File::open(path)?);
    let decoder = zstd::Decoder::new(file)?;
    let envelope: Envelope = bincode::deserialize_from(decoder)?;
    if envelope.version != STORE_VERSION {
        return Err(StoreError::Version {
            path: path.to_path_buf(),
            found: envelope.version,
            expected: STORE_VERSION,
        });
    }
    Ok(envelope.stats)
}

/// Load every stats file found directly under `dir`, skipping files that
/// fail to load (logged, never fatal to the scan).
pub fn load_stats_dir(dir: &Path) -> std::io::Result<Vec<CaptureStats>> {
    let mut all = Vec::new();
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension().and_then(|e| e.to_str()) == Some(STATS_EXTENSION)
        })
        .collect();
    entries.sort();

    for path in entries {
        match load_stats(&path) {
            Ok(stats) => all.push(stats),
            Err(err) => log::warn!("Skipping stats file {}: {}", path.display(), err),
        }
    }
    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Flow, FlowKey, Interface, MptcpConnection, TcpConnection};
    use tempfile::TempDir;

    fn sample_stats() -> CaptureStats {
        let key = FlowKey::new(
            "192.168.1.4".parse().unwrap(),
            "203.0.113.5".parse().unwrap(),
            41000,
            443,
        );
        let mut stats = CaptureStats::new("trace0");
        stats.tcp.insert(
            "a2b".to_string(),
            TcpConnection::new("a2b".to_string(), Flow::new(key, Interface::Wifi)),
        );
        let mut mconn = MptcpConnection::new("a2b".to_string());
        let mut flow = Flow::new(key, Interface::Wifi);
        flow.unique_bytes.src2dst = 12345;
        mconn.insert_subflow(0, flow);
        stats.mptcp.insert("a2b".to_string(), mconn);
        stats
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trace0.stats");
        let stats = sample_stats();
        save_stats(&stats, &path).unwrap();

        let back = load_stats(&path).unwrap();
        assert_eq!(back.capture, "trace0");
        assert!(back.is_multipath());
        assert_eq!(
            back.mptcp["a2b"].subflows[&0].unique_bytes.src2dst,
            12345
        );
        assert_eq!(back.tcp["a2b"].flow.key, stats.tcp["a2b"].flow.key);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.stats");
        std::fs::write(&path, b"not a stats file").unwrap();
        assert!(load_stats(&path).is_err());
    }

    #[test]
    fn test_directory_scan_skips_broken_files() {
        let dir = TempDir::new().unwrap();
        save_stats(&sample_stats(), &dir.path().join("good.stats")).unwrap();
        std::fs::write(dir.path().join("bad.stats"), b"junk").unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), b"ignored").unwrap();

        let all = load_stats_dir(dir.path()).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].capture, "trace0");
    }
}
