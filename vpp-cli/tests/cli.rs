use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_temp_dir(label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let dir =
        std::env::temp_dir().join(format!("vpp_cli_{label}_{}_{}", std::process::id(), nanos));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

/// `frames` tightly packed 8×8 NV12 frames plus `tail` stray bytes.
fn write_nv12(path: &Path, frames: usize, tail: usize) {
    let frame_bytes = 8 * 8 * 3 / 2;
    let bytes: Vec<u8> = (0..frames * frame_bytes + tail)
        .map(|i| (i % 200) as u8 + 16)
        .collect();
    fs::write(path, bytes).expect("write nv12 input");
}

fn parse_stdout_json(stdout: &[u8]) -> serde_json::Value {
    let text = String::from_utf8_lossy(stdout);
    let line = text
        .lines()
        .rev()
        .find(|l| l.trim_start().starts_with('{'))
        .unwrap_or_else(|| panic!("no JSON object on stdout: {text}"));
    serde_json::from_str(line).expect("stdout JSON parses")
}

#[test]
fn help_lists_subcommands() {
    let output = Command::new(env!("CARGO_BIN_EXE_vpp"))
        .arg("help")
        .output()
        .expect("run vpp help");

    assert!(
        output.status.success(),
        "vpp help failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("convert"), "missing convert in help output");
    assert!(stdout.contains("probe"), "missing probe in help output");
}

#[test]
fn convert_help_lists_dump_flags() {
    let output = Command::new(env!("CARGO_BIN_EXE_vpp"))
        .args(["convert", "--help"])
        .output()
        .expect("run vpp convert --help");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in ["--dump", "--dump-dir", "--consumers", "--target-width", "--json"] {
        assert!(stdout.contains(flag), "missing {flag} in convert help");
    }
}

#[test]
fn probe_emulated_reports_host_device() {
    let output = Command::new(env!("CARGO_BIN_EXE_vpp"))
        .args(["probe", "--backend", "emulated", "--json"])
        .output()
        .expect("run vpp probe");
    assert!(
        output.status.success(),
        "probe failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let value = parse_stdout_json(&output.stdout);
    assert_eq!(value["schema_version"], 1);
    assert_eq!(value["command"], "probe");
    assert_eq!(value["backend"], "emulated");
    assert_eq!(value["device"]["name"], "host-emulated");
    assert_eq!(value["device"]["max_threads_per_block"], 1024);
}

#[test]
fn convert_y800_with_dumps_splits_frames_across_consumers() {
    let dir = unique_temp_dir("convert_y800");
    let input = dir.join("in.nv12");
    let dumps = dir.join("dumps");
    write_nv12(&input, 3, 10);

    let output = Command::new(env!("CARGO_BIN_EXE_vpp"))
        .args(["convert", "--backend", "emulated", "--input"])
        .arg(&input)
        .args([
            "--width",
            "8",
            "--height",
            "8",
            "--format",
            "y800",
            "--target-width",
            "4",
            "--target-height",
            "4",
            "--consumers",
            "2",
            "--max-consumers",
            "2",
            "--dump",
            "--json",
            "--dump-dir",
        ])
        .arg(&dumps)
        .output()
        .expect("run vpp convert");
    assert!(
        output.status.success(),
        "convert failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let value = parse_stdout_json(&output.stdout);
    assert_eq!(value["ok"], true);
    assert_eq!(value["format"], "y800");
    assert_eq!(value["frames_read"], 3);
    assert_eq!(value["frames_converted"], 3);
    assert_eq!(value["frames_dumped"], 3);
    assert_eq!(value["bytes_dumped"], 48);
    // Each Y800 frame is staged through host memory, then read back for its dump.
    assert_eq!(value["host_round_trips"], 6);
    assert_eq!(value["output_width"], 4);
    assert_eq!(value["output_height"], 4);
    assert_eq!(value["dumps"].as_array().map(Vec::len), Some(2));

    let mut sizes: Vec<u64> = (0..2)
        .map(|slot| {
            fs::metadata(dumps.join(format!("Processed_{slot}.yuv")))
                .expect("dump file exists")
                .len()
        })
        .collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![16, 32]);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn convert_rgb24_keeps_input_size() {
    let dir = unique_temp_dir("convert_rgb");
    let input = dir.join("in.nv12");
    write_nv12(&input, 1, 0);

    let output = Command::new(env!("CARGO_BIN_EXE_vpp"))
        .args(["convert", "--backend", "emulated", "--input"])
        .arg(&input)
        .args([
            "--width",
            "8",
            "--height",
            "8",
            "--format",
            "rgb24",
            "--target-width",
            "2",
            "--target-height",
            "2",
            "--json",
        ])
        .output()
        .expect("run vpp convert");
    assert!(
        output.status.success(),
        "convert failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let value = parse_stdout_json(&output.stdout);
    assert_eq!(value["output_width"], 8);
    assert_eq!(value["output_height"], 8);
    assert_eq!(value["frames_dumped"], 0);
    assert_eq!(value["host_round_trips"], 0);
    assert_eq!(value["dumps"].as_array().map(Vec::len), Some(0));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn unknown_format_fails_with_json_error() {
    let dir = unique_temp_dir("bad_format");
    let input = dir.join("in.nv12");
    write_nv12(&input, 1, 0);

    let output = Command::new(env!("CARGO_BIN_EXE_vpp"))
        .args(["convert", "--backend", "emulated", "--input"])
        .arg(&input)
        .args(["--width", "8", "--height", "8", "--format", "nv21", "--json"])
        .output()
        .expect("run vpp convert");
    assert!(!output.status.success(), "unknown format must fail");

    let value = parse_stdout_json(&output.stdout);
    assert_eq!(value["ok"], false);
    assert_eq!(value["command"], "convert");
    assert_eq!(value["code"], 200);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn too_many_consumers_exhausts_the_pool() {
    let dir = unique_temp_dir("exhausted");
    let input = dir.join("in.nv12");
    write_nv12(&input, 4, 0);

    let output = Command::new(env!("CARGO_BIN_EXE_vpp"))
        .args(["convert", "--backend", "emulated", "--input"])
        .arg(&input)
        .args([
            "--width",
            "8",
            "--height",
            "8",
            "--format",
            "bgr24",
            "--consumers",
            "2",
            "--max-consumers",
            "1",
            "--json",
        ])
        .output()
        .expect("run vpp convert");
    assert!(!output.status.success(), "pool overflow must fail");

    let value = parse_stdout_json(&output.stdout);
    assert_eq!(value["ok"], false);
    assert_eq!(value["code"], 300);

    let _ = fs::remove_dir_all(&dir);
}
