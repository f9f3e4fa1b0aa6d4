#[cfg(test)]
mod pipeline_regression_tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    use tempfile::TempDir;

    use mptcpscope::config::Config;
    use mptcpscope::correct::correct_capture;
    use mptcpscope::model::{Interface, SeqSample};
    use mptcpscope::naming::{connection_label, resolve_label};
    use mptcpscope::stitch::stitch_samples;
    use mptcpscope::store::{load_stats, save_stats, CaptureStats};

    /// Write an executable shell script standing in for an external tool.
    fn write_script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.to_str().unwrap().to_string()
    }

    /// A connection-report line with the documented fixed columns filled.
    fn report_line(id: usize, saddr: &str, sport: u16, daddr: &str, dport: u16) -> String {
        let mut cols = vec!["0".to_string(); 40];
        cols[0] = id.to_string();
        cols[1] = saddr.to_string();
        cols[2] = daddr.to_string();
        cols[3] = sport.to_string();
        cols[4] = dport.to_string();
        cols[5] = "100.0".to_string();
        cols[6] = "110.0".to_string();
        cols[7] = "12".to_string();
        cols[8] = "9".to_string();
        cols.join(",")
    }

    /// Stub tool set whose report tool prints the given report and whose
    /// split/rewrite/merge tools copy bytes around.
    fn stub_config(bin_dir: &Path, report: &str) -> Config {
        let report_path = bin_dir.join("probe-report.csv");
        fs::write(&report_path, report).unwrap();

        let mut config = Config::default();
        config.tools.connection_report = write_script(
            bin_dir,
            "fake-tcptrace",
            &format!("cat '{}'", report_path.display()),
        );
        // tshark stand-in: -r <in> -Y <filter> -w <out>
        config.tools.packet_filter =
            write_script(bin_dir, "fake-tshark", "cp \"$2\" \"$6\"");
        // tcprewrite stand-in: copies --infile to --outfile
        config.tools.header_rewrite = write_script(
            bin_dir,
            "fake-tcprewrite",
            r#"for a in "$@"; do
  case "$a" in
    --infile=*) in="${a#--infile=}" ;;
    --outfile=*) out="${a#--outfile=}" ;;
  esac
done
cp "$in" "$out""#,
        );
        // mergecap stand-in: -w <out> <parts...>
        config.tools.capture_merge = write_script(
            bin_dir,
            "fake-mergecap",
            r#"out="$2"
shift 2
cat "$@" > "$out""#,
        );
        config
    }

    fn kept_scratch_dirs(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_dir()
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.starts_with("correct-"))
                        .unwrap_or(false)
            })
            .collect()
    }

    /// The split-relay scenario: a flow into the local relay plus its
    /// mirror carrying the server's real address. Correction must repair
    /// exactly one pair and clean up its scratch space.
    #[test]
    fn test_relay_pair_corrected_end_to_end() {
        let root = TempDir::new().unwrap();
        let report = format!(
            "#header\n{}\n{}\n",
            report_line(1, "127.0.0.1", 9090, "127.0.0.1", 1080),
            report_line(2, "203.0.113.5", 443, "127.0.0.1", 9090),
        );
        let config = stub_config(root.path(), &report);

        let capture = root.path().join("run1.pcap");
        fs::write(&capture, b"capture-bytes").unwrap();

        let repaired = correct_capture(&config, &capture).unwrap();
        assert_eq!(repaired, 1);

        // The capture was replaced in place and is still readable
        assert!(capture.exists());
        assert!(!fs::read(&capture).unwrap().is_empty());

        // Success cleans up the scratch directory
        assert!(kept_scratch_dirs(root.path()).is_empty());
    }

    /// Without a mirror there is nothing to repair; the capture must be
    /// left byte-identical.
    #[test]
    fn test_no_relay_pair_leaves_capture_untouched() {
        let root = TempDir::new().unwrap();
        let report = format!(
            "{}\n",
            report_line(1, "192.168.1.4", 41000, "198.51.100.9", 80)
        );
        let config = stub_config(root.path(), &report);

        let capture = root.path().join("run2.pcap");
        fs::write(&capture, b"untouched").unwrap();

        let repaired = correct_capture(&config, &capture).unwrap();
        assert_eq!(repaired, 0);
        assert_eq!(fs::read(&capture).unwrap(), b"untouched");
    }

    /// A failing rewrite stage aborts correction for this capture and
    /// keeps the partial intermediates for inspection.
    #[test]
    fn test_failed_rewrite_keeps_intermediates() {
        let root = TempDir::new().unwrap();
        let report = format!(
            "{}\n{}\n",
            report_line(1, "127.0.0.1", 9090, "127.0.0.1", 1080),
            report_line(2, "203.0.113.5", 443, "127.0.0.1", 9090),
        );
        let mut config = stub_config(root.path(), &report);
        config.tools.header_rewrite =
            write_script(root.path(), "broken-tcprewrite", "exit 1");

        let capture = root.path().join("run3.pcap");
        fs::write(&capture, b"capture-bytes").unwrap();

        assert!(correct_capture(&config, &capture).is_err());
        // The original capture was never replaced
        assert_eq!(fs::read(&capture).unwrap(), b"capture-bytes");
        // The scratch directory survives for the operator
        let kept = kept_scratch_dirs(root.path());
        assert_eq!(kept.len(), 1);
        assert!(kept[0].join("remaining.pcap").exists());
    }

    /// Labels embedded in artifact names survive a full
    /// generate-embed-resolve round trip, reversed or not.
    #[test]
    fn test_label_roundtrip_through_filenames() {
        for index in 0..100 {
            let label = connection_label(index);
            let resolved = resolve_label(&format!("trace_{label}_tsg.xpl")).unwrap();
            assert_eq!(resolved.canonical, label);
            assert!(!resolved.reversed);

            // Reverse the endpoint halves the way a report tool names the
            // opposite direction
            let (left, right) = label.split_once('2').unwrap();
            let reversed_name = format!("trace_{right}2{left}_tsg.xpl");
            let resolved = resolve_label(&reversed_name).unwrap();
            assert_eq!(resolved.canonical, label);
            assert!(resolved.reversed);
        }
    }

    /// Stats survive persistence and the stitcher reproduces the same
    /// per-interface timeline from reloaded data.
    #[test]
    fn test_stats_roundtrip_preserves_stitch_input() {
        let samples = vec![
            SeqSample {
                timestamp: 0.0,
                seq_end: 1000,
                connection: "a2b".to_string(),
                subflow: Some(0),
                reinjected_from: None,
                interface: Interface::Wifi,
            },
            SeqSample {
                timestamp: 1.0,
                seq_end: 2000,
                connection: "a2b".to_string(),
                subflow: Some(0),
                reinjected_from: None,
                interface: Interface::Wifi,
            },
            SeqSample {
                timestamp: 2.0,
                seq_end: 2000,
                connection: "a2b".to_string(),
                subflow: Some(1),
                reinjected_from: Some(0),
                interface: Interface::Cellular,
            },
        ];
        let stitched = stitch_samples(&samples);
        assert_eq!(stitched[&Interface::Wifi], vec![(0.0, 0), (1.0, 1000)]);
        // The reinjected cellular sample restates wifi data: zero delta
        assert_eq!(stitched[&Interface::Cellular], vec![(2.0, 0)]);

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trace0.stats");
        let stats = CaptureStats::new("trace0");
        save_stats(&stats, &path).unwrap();
        let back = load_stats(&path).unwrap();
        assert_eq!(back.capture, "trace0");
        assert!(!back.is_multipath());
    }
}
