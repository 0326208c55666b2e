use assert_cmd::prelude::*;
use image::{Rgba, RgbaImage};
use predicates::str::contains;
use std::io::Write;
use std::path::Path;
use std::process::Command;
use tempfile::{NamedTempFile, TempDir};

fn build_frames(count: usize) -> TempDir {
    let dir = tempfile::tempdir().expect("temp frames");
    for index in 0..count {
        RgbaImage::from_pixel(8, 6, Rgba([(index * 30) as u8, 40, 90, 255]))
            .save(dir.path().join(format!("frame_{index:03}.png")))
            .expect("write frame");
    }
    dir
}

fn headless(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("scroll-sequence").expect("binary exists");
    cmd.arg(dir)
        .args(["--pattern", "{name}.png"])
        .arg("--summary-only");
    cmd
}

#[test]
fn cli_scrubs_the_sequence_and_prints_a_summary() {
    let frames = build_frames(6);
    let mut cmd = headless(frames.path());
    cmd.args(["--frames", "6", "--sweep", "4"]);
    cmd.assert()
        .success()
        .stdout(contains("Loaded 6 frame(s) (8x6)"))
        .stdout(contains("(Wide)"))
        .stdout(contains("Scrubbing over 4 step(s)"))
        .stdout(contains("progress 0.500 frame 2 overlay 0.400"))
        .stdout(contains("progress 1.000 frame 5 overlay 0.100"));
}

#[test]
fn cli_autoplays_on_narrow_viewports() {
    let frames = build_frames(6);
    let mut cmd = headless(frames.path());
    cmd.args(["--frames", "6", "--sweep", "2", "--width", "800", "--height", "600"]);
    cmd.assert()
        .success()
        .stdout(contains("(Compact)"))
        .stdout(contains("Autoplay over 0.250s"))
        .stdout(contains("progress 1.000 frame 5"));
}

#[test]
fn cli_reads_a_manifest() {
    let frames = build_frames(3);
    let mut manifest = NamedTempFile::new().expect("temp manifest");
    manifest
        .write_all(b"<sequence><frames>3</frames><pattern>{name}.png</pattern></sequence>")
        .expect("write manifest");

    let mut cmd = Command::cargo_bin("scroll-sequence").expect("binary exists");
    cmd.arg(frames.path())
        .arg("--manifest")
        .arg(manifest.path())
        .arg("--summary-only");
    cmd.assert().success().stdout(contains("Loaded 3 frame(s)"));
}

#[test]
fn cli_reports_the_frame_that_failed_to_load() {
    let frames = build_frames(4);
    std::fs::remove_file(frames.path().join("frame_001.png"))
        .expect("remove frame");
    let mut cmd = headless(frames.path());
    cmd.args(["--frames", "4"]);
    cmd.assert()
        .failure()
        .code(1)
        .stderr(contains("failed to fetch frame 1"));
}

#[test]
fn cli_writes_a_snapshot() {
    let frames = build_frames(4);
    let out = frames.path().join("out.png");
    let mut cmd = headless(frames.path());
    cmd.args(["--frames", "4"]).arg("--snapshot").arg(&out);
    cmd.assert().success().stdout(contains("Snapshot written to"));

    let snapshot = image::open(&out).expect("snapshot is a png").to_rgba8();
    assert_eq!(snapshot.dimensions(), (1280, 720));
}

#[test]
fn cli_rejects_unknown_arguments() {
    let frames = build_frames(1);
    let mut cmd = Command::cargo_bin("scroll-sequence").expect("binary exists");
    cmd.arg(frames.path()).arg("--bogus");
    cmd.assert()
        .failure()
        .stderr(contains("Unknown argument: --bogus"))
        .stderr(contains("Usage: scroll-sequence"));
}

#[test]
fn cli_rejects_sweeps_that_do_not_fit() {
    let frames = build_frames(3);
    let mut cmd = headless(frames.path());
    cmd.args(["--frames", "3", "--width", "800", "--sweep", "4294967296"]);
    cmd.assert()
        .failure()
        .code(1)
        .stderr(contains("invalid value \"4294967296\" for --sweep"));
}

#[test]
fn cli_autoplay_sweep_ends_on_the_last_frame() {
    let frames = build_frames(6);
    let mut cmd = headless(frames.path());
    cmd.args(["--frames", "6", "--sweep", "3", "--width", "800", "--height", "600"]);
    cmd.assert()
        .success()
        .stdout(contains("t 0.250s progress 1.000 frame 5"));
}
