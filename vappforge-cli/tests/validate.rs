use assert_cmd::Command;
use predicates::prelude::*;

fn vappforge() -> Command {
    Command::new(env!("CARGO_BIN_EXE_vappforge"))
}

fn write_config(dir: &std::path::Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("build.json");
    std::fs::write(&path, body).unwrap();
    path
}

const VALID: &str = r#"{
  "host": "vcd.example.com",
  "org": "lab",
  "token": "tok",
  "vm_name": "base-linux",
  "vdc": "lab-vdc",
  "create_vapp": true,
  "iso_url": "https://example.com/installer.iso"
}"#;

#[test]
fn validate_accepts_a_good_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), VALID);

    vappforge()
        .args(["validate", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid"))
        .stdout(predicate::str::contains("flow: early-bind"));
}

#[test]
fn validate_rejects_missing_credentials() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"{
  "host": "vcd.example.com",
  "org": "lab",
  "vm_name": "base-linux",
  "vdc": "lab-vdc",
  "iso_url": "https://example.com/installer.iso"
}"#,
    );

    vappforge()
        .args(["validate", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("'username' is required"));
}

#[test]
fn validate_rejects_vtpm_on_bios_firmware() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"{
  "host": "vcd.example.com",
  "org": "lab",
  "token": "tok",
  "vm_name": "base-linux",
  "vdc": "lab-vdc",
  "iso_url": "https://example.com/installer.iso",
  "firmware": "bios",
  "vTPM": true
}"#,
    );

    vappforge()
        .args(["validate", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("vTPM"));
}

#[test]
fn build_without_rehearse_explains_the_driver_seam() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), VALID);

    vappforge()
        .args(["build", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("--rehearse"));
}
