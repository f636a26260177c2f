use std::process::Command;

use chainport_migration::schema;
use chainport_storage::{EngineType, OpenMode, Store, SyncMode};
use ethereum_types::H256;
use tempfile::TempDir;

const NAMESPACE: [u8; 32] = [0x42; 32];
const CHAIN_LEN: u64 = 20;

fn namespace_hex() -> String {
    hex::encode(NAMESPACE)
}

fn block_hash(height: u64) -> H256 {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&height.to_be_bytes());
    H256::from(bytes)
}

fn build_source(dir: &TempDir) {
    let store = Store::open(dir.path(), EngineType::RocksDb, OpenMode::ReadWrite)
        .expect("source store should open");
    let mut batch = store.batch();
    for height in 0..CHAIN_LEN {
        let mut key = NAMESPACE.to_vec();
        key.extend_from_slice(&schema::header_key(height, block_hash(height)));
        batch.put(key, vec![0xaa; 100]);
    }
    store
        .commit(batch, SyncMode::Sync)
        .expect("seed commit should succeed");
}

#[test]
fn migrate_then_verify_round_trips_through_the_binary() {
    let bin = env!("CARGO_BIN_EXE_chainport");
    let source_dir = TempDir::new().unwrap();
    let destination_dir = TempDir::new().unwrap();
    let destination = destination_dir.path().join("db");
    build_source(&source_dir);

    let output = Command::new(bin)
        .args([
            "migrate",
            "--store.src",
            source_dir.path().to_string_lossy().as_ref(),
            "--store.dst",
            destination.to_string_lossy().as_ref(),
            "--namespace",
            &namespace_hex(),
            "--json",
        ])
        .output()
        .expect("failed to execute chainport binary");
    assert!(
        output.status.success(),
        "migrate failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    let report: serde_json::Value =
        serde_json::from_str(stdout.trim()).expect("stdout should be valid JSON");
    assert_eq!(report["status"], "completed");
    assert_eq!(report["transcode"]["written"], CHAIN_LEN);
    assert_eq!(report["rebuild"]["canonical_written"], CHAIN_LEN);
    assert_eq!(report["synthesize"]["tip"], CHAIN_LEN - 1);
    assert_eq!(report["synthesize"]["revision"], 1);

    let output = Command::new(bin)
        .args([
            "verify",
            "--store.dst",
            destination.to_string_lossy().as_ref(),
            "--json",
        ])
        .output()
        .expect("failed to execute chainport binary");
    assert!(
        output.status.success(),
        "verify failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    let report: serde_json::Value =
        serde_json::from_str(stdout.trim()).expect("stdout should be valid JSON");
    assert_eq!(report["tip"], CHAIN_LEN - 1);
    assert_eq!(report["failure_count"], 0);
}

#[test]
fn dry_run_creates_no_destination_store() {
    let bin = env!("CARGO_BIN_EXE_chainport");
    let source_dir = TempDir::new().unwrap();
    let destination_dir = TempDir::new().unwrap();
    let destination = destination_dir.path().join("never-created");
    build_source(&source_dir);

    let output = Command::new(bin)
        .args([
            "transcode",
            "--store.src",
            source_dir.path().to_string_lossy().as_ref(),
            "--store.dst",
            destination.to_string_lossy().as_ref(),
            "--namespace",
            &namespace_hex(),
            "--dry-run",
            "--json",
        ])
        .output()
        .expect("failed to execute chainport binary");
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    let report: serde_json::Value =
        serde_json::from_str(stdout.trim()).expect("stdout should be valid JSON");
    assert_eq!(report["scanned"], CHAIN_LEN);
    assert!(!destination.exists(), "dry run must not create the store");
}

#[test]
fn emits_json_failure_payload_for_missing_source() {
    let bin = env!("CARGO_BIN_EXE_chainport");
    let missing = std::env::temp_dir().join("chainport-cli-missing-source");
    let destination_dir = TempDir::new().unwrap();

    let output = Command::new(bin)
        .args([
            "transcode",
            "--store.src",
            missing.to_string_lossy().as_ref(),
            "--store.dst",
            destination_dir.path().join("db").to_string_lossy().as_ref(),
            "--json",
        ])
        .output()
        .expect("failed to execute chainport binary");
    assert!(
        !output.status.success(),
        "command should fail for a missing source store"
    );

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    let payload: serde_json::Value =
        serde_json::from_str(stdout.trim()).expect("stdout should be valid JSON");
    assert_eq!(payload["schema_version"], 1);
    assert_eq!(payload["status"], "failed");
    assert!(payload.get("error").is_some());
}

#[test]
fn help_lists_core_flags() {
    let bin = env!("CARGO_BIN_EXE_chainport");
    let output = Command::new(bin)
        .args(["migrate", "--help"])
        .output()
        .expect("failed to execute chainport binary");
    assert!(output.status.success(), "--help should succeed");

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    assert!(stdout.contains("--store.src"));
    assert!(stdout.contains("--store.dst"));
    assert!(stdout.contains("--namespace"));
    assert!(stdout.contains("--batch-size"));
    assert!(stdout.contains("--tolerance"));
    assert!(stdout.contains("--json"));
}
