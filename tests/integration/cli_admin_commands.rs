#![allow(missing_docs)]

use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use roadstore::storage::{
    archive::{ArchiveOptions, ArchiveSource},
    schema::vertex,
};
use serde_json::Value;
use tempfile::TempDir;

const NODES_CSV: &str = "\
id,lat,lon,tags,changeset,revision,timestamp,user_id,user
1,47.3769,8.5417,highway=traffic_signals,100,1,1700000000,7,alice
2,47.3770,8.5420,,101,2,1700000050,7,alice
3,46.9480,7.4474,name=Bern|place=city,102,1,1700000100,9,bob
4,-33.9249,18.4241,,,,,,
";

struct Fixture {
    dir: TempDir,
    archive: PathBuf,
}

impl Fixture {
    fn config(&self) -> PathBuf {
        self.dir.path().join("absent-config.toml")
    }
}

fn roadstore(config: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("roadstore");
    cmd.env_remove("RUST_LOG").arg("--config").arg(config);
    cmd
}

fn imported() -> Fixture {
    let dir = TempDir::new().expect("tempdir");
    let nodes = dir.path().join("nodes.csv");
    fs::write(&nodes, NODES_CSV).expect("write csv");
    let archive = dir.path().join("out").join("nodes.rga");
    let fixture = Fixture { dir, archive };

    let output = roadstore(&fixture.config())
        .args(["--format", "json", "import", "--supplier", "fixture", "--name", "sample"])
        .arg("--nodes")
        .arg(&nodes)
        .arg("--staging")
        .arg(fixture.dir.path().join("staging"))
        .arg("--output")
        .arg(&fixture.archive)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["nodes_imported"], 4);
    assert_eq!(json["cells"], 3);
    assert!(!fixture.dir.path().join("staging").exists(), "staging removed");
    fixture
}

#[test]
fn info_reports_counts_and_descriptor() {
    let fixture = imported();
    let output = roadstore(&fixture.config())
        .args(["--format", "json", "info"])
        .arg(&fixture.archive)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["metadata"]["counts"]["vertices"]["value"], 4);
    assert_eq!(json["metadata"]["counts"]["edges"]["value"], 0);
    assert_eq!(json["metadata"]["descriptor"]["supplier"], "fixture");
    assert_eq!(json["metadata"]["descriptor"]["name"], "sample");
    assert!(json["file_bytes"].as_u64().unwrap_or(0) > 64);
}

#[test]
fn info_text_mentions_the_archive() {
    let fixture = imported();
    let output = roadstore(&fixture.config())
        .arg("info")
        .arg(&fixture.archive)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    assert!(text.contains("Counts: vertices=4 edges=0"), "{text}");
    assert!(text.contains("supplier=fixture"), "{text}");
}

#[test]
fn streams_lists_vertex_columns() {
    let fixture = imported();
    let output = roadstore(&fixture.config())
        .args(["--format", "json", "streams"])
        .arg(&fixture.archive)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    let streams = json.as_array().expect("stream array");
    let location = streams
        .iter()
        .find(|s| s["name"] == vertex::LOCATION)
        .expect("location stream listed");
    assert_eq!(location["element_count"], 4);
    assert!(streams.iter().any(|s| s["name"] == vertex::TAGS));
}

#[test]
fn verify_full_succeeds_on_fresh_archive() {
    let fixture = imported();
    let output = roadstore(&fixture.config())
        .args(["--format", "json", "verify", "--level", "full"])
        .arg(&fixture.archive)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["success"], true);
    assert_eq!(json["counts"]["vertices"], 4);
}

#[test]
fn verify_full_flags_damaged_payload() {
    let fixture = imported();
    let offset = ArchiveSource::open(&fixture.archive, &ArchiveOptions::default())
        .expect("archive opens")
        .entry(vertex::LOCATION)
        .expect("location stream")
        .offset;
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&fixture.archive)
        .expect("open archive");
    file.seek(SeekFrom::Start(offset + 1)).expect("seek");
    file.write_all(&[0xA5]).expect("write");
    drop(file);

    let output = roadstore(&fixture.config())
        .args(["--format", "json", "verify", "--level", "full"])
        .arg(&fixture.archive)
        .assert()
        .code(2)
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["success"], false);
    let findings = json["findings"].as_array().expect("findings");
    assert!(findings
        .iter()
        .any(|f| f["message"].as_str().unwrap_or("").contains(vertex::LOCATION)));
}

#[test]
fn missing_archive_is_an_error() {
    let dir = TempDir::new().expect("tempdir");
    let output = roadstore(&dir.path().join("absent-config.toml"))
        .arg("info")
        .arg(dir.path().join("nope.rga"))
        .assert()
        .code(1)
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8(output).expect("utf8");
    assert!(stderr.contains("nope.rga"), "{stderr}");
}

#[test]
fn import_reports_the_offending_row() {
    let dir = TempDir::new().expect("tempdir");
    let nodes = dir.path().join("bad.csv");
    fs::write(&nodes, "id,lat,lon\n1,10.0,10.0\n2,north,10.0\n").expect("write csv");
    let output = roadstore(&dir.path().join("absent-config.toml"))
        .arg("import")
        .arg("--nodes")
        .arg(&nodes)
        .arg("--staging")
        .arg(dir.path().join("staging"))
        .arg("--output")
        .arg(dir.path().join("bad.rga"))
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8(output).expect("utf8");
    assert!(stderr.contains(":3: invalid lat 'north'"), "{stderr}");
    assert!(!dir.path().join("bad.rga").exists());
}
