//! Basic CLI tests for the irbridge command-line interface.

use assert_cmd::Command;
use predicates::prelude::*;

const SEED: &str = r#"{
  "controllers": [
    {"id": "C1", "external_id": "esp-01", "owner_id": "u1", "name": "Living room"}
  ],
  "appliances": [
    {"id": "A1", "controller_id": "C1", "owner_id": "u1", "name": "TV", "device_type": "tv"}
  ],
  "ir_codes": [
    {"id": "IR1", "action": "PowerOn", "protocol": "nec", "data": "0x20DF10EF"}
  ]
}"#;

fn irbridge(db: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("irbridge").unwrap();
    cmd.arg("--db").arg(db);
    cmd
}

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("irbridge").unwrap();
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("send"))
        .stdout(predicate::str::contains("history"))
        .stdout(predicate::str::contains("seed"))
        .stdout(predicate::str::contains("purge"));
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("irbridge").unwrap();
    cmd.arg("--version");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("irbridge"));
}

#[test]
fn test_seed_then_query() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("data").join("irbridge.redb");
    let seed = dir.path().join("seed.json");
    std::fs::write(&seed, SEED).unwrap();

    irbridge(&db)
        .arg("seed")
        .arg(&seed)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"controllers\": 1"))
        .stdout(predicate::str::contains("\"ir_codes\": 1"));

    irbridge(&db)
        .args(["history", "C1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));

    irbridge(&db)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"queued\": 0"));

    irbridge(&db)
        .arg("purge")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"commands\": 0"));
}

#[test]
fn test_seed_rejects_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    irbridge(&dir.path().join("irbridge.redb"))
        .args(["seed", "does-not-exist.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does-not-exist.json"));
}

fn seeded_db(dir: &std::path::Path) -> std::path::PathBuf {
    let db = dir.join("irbridge.redb");
    let seed = dir.join("seed.json");
    std::fs::write(&seed, SEED).unwrap();
    irbridge(&db).arg("seed").arg(&seed).assert().success();
    db
}

fn free_addr() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().to_string()
}

fn send_args(control: &str) -> Vec<String> {
    [
        "send", "--user", "u1", "--controller", "C1", "--appliance", "A1", "--ir-code", "IR1",
        "--action", "PowerOn", "--broker", "127.0.0.1", "--port", "1", "--control", control,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[test]
fn test_send_without_broker_records_failed() {
    let dir = tempfile::tempdir().unwrap();
    let db = seeded_db(dir.path());

    irbridge(&db)
        .args(send_args(&free_addr()))
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\": \"failed\""))
        .stdout(predicate::str::contains("MQTT client not connected"));

    irbridge(&db)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"failed\": 1"))
        .stdout(predicate::str::contains("\"sent\": 0"));
}

#[test]
fn test_send_goes_through_running_gateway() {
    let dir = tempfile::tempdir().unwrap();
    let db = seeded_db(dir.path());
    let control = free_addr();

    let mut gateway = std::process::Command::new(assert_cmd::cargo::cargo_bin("irbridge"))
        .arg("--db")
        .arg(&db)
        .args(["serve", "--broker", "127.0.0.1", "--port", "1", "--control", &control])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .unwrap();

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(20);
    while std::net::TcpStream::connect(&control).is_err() {
        assert!(std::time::Instant::now() < deadline, "gateway never listened");
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    // The gateway holds the database; send must not need it.
    let sent = irbridge(&db).args(send_args(&control)).assert();
    let rejected = irbridge(&db)
        .args(send_args(&control).into_iter().map(|a| if a == "C1" { "C9".into() } else { a }))
        .assert();

    gateway.kill().unwrap();
    gateway.wait().unwrap();

    sent.success()
        .stdout(predicate::str::contains("\"controller_id\": \"C1\""))
        .stdout(predicate::str::contains("\"status\": \"failed\""));
    rejected
        .failure()
        .stderr(predicate::str::contains("Controller not found: C9"));

    irbridge(&db)
        .args(["history", "C1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"action\": \"PowerOn\""));
}
