#![cfg(feature = "storage-rocksdb")]

use assert_cmd::cargo_bin;
use std::io::Write;
use std::process::Command;
use tempfile::tempdir;

#[test]
fn test_rocksdb_persistence_recovery() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    // First run opens and confirms a cash payment.
    let mut first = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        first,
        r#"{{"op":"create","gateway":"manual","amount":"100.00","currency":"PHP","customer_email":"a@example.com"}}"#
    )
    .unwrap();
    writeln!(first, r##"{{"op":"capture","payment_id":"#1","action":"confirm","actor":"clerk"}}"##).unwrap();

    let output1 = Command::new(cargo_bin!("paybroker"))
        .arg(first.path())
        .arg("--db-path")
        .arg(&db_path)
        .output()
        .expect("Failed to execute command");
    assert!(output1.status.success());
    let stdout1 = String::from_utf8_lossy(&output1.stdout);
    assert!(stdout1.contains("completed,100.00,PHP,0.00"));

    // Second run adds another payment against the same database.
    let mut second = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        second,
        r#"{{"op":"create","gateway":"manual","amount":"50.00","currency":"PHP","customer_email":"b@example.com"}}"#
    )
    .unwrap();

    let output2 = Command::new(cargo_bin!("paybroker"))
        .arg(second.path())
        .arg("--db-path")
        .arg(&db_path)
        .output()
        .expect("Failed to execute command");
    assert!(output2.status.success());
    let stdout2 = String::from_utf8_lossy(&output2.stdout);

    // The recovered payment keeps its status and ids continue after it.
    assert!(stdout2.contains("1,manual_"));
    assert!(stdout2.contains("completed,100.00,PHP,0.00"));
    assert!(stdout2.contains("2,manual_"));
    assert!(stdout2.contains("pending,50.00,PHP,0.00"));
}
