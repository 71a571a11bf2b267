//! Recipient CSV loading.

use std::io::Write;
use std::path::PathBuf;

use herald::recipients::{load_recipients, LoadError};

fn write_file(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
    let path = dir.path().join("numbers.csv");
    let mut file = std::fs::File::create(&path).expect("create");
    file.write_all(contents.as_bytes()).expect("write");
    path
}

#[test]
fn one_entry_per_distinct_trimmed_identifier() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_file(
        &dir,
        "0811,Alice\n  0812 ,Bob\n0811 ,Alicia\n,Nobody\n0813,Carol\n",
    );

    let recipients = load_recipients(&path).expect("should load");
    assert_eq!(recipients.len(), 3);
    assert_eq!(recipients.get("0811"), Some("Alicia"));
    assert_eq!(recipients.get("0812"), Some("Bob"));

    let order: Vec<&str> = recipients.iter().map(|r| r.number.as_str()).collect();
    assert_eq!(order, vec!["0811", "0812", "0813"]);
}

#[test]
fn missing_name_column_is_empty_name() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_file(&dir, "0811\n0812,Bob\n");

    let recipients = load_recipients(&path).expect("should load");
    assert_eq!(recipients.get("0811"), Some(""));
}

#[test]
fn header_row_is_skipped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_file(&dir, "Number,Name\n0811,Alice\n");

    let recipients = load_recipients(&path).expect("should load");
    assert_eq!(recipients.len(), 1);
    assert_eq!(recipients.get("Number"), None);
}

#[test]
fn header_after_blank_rows_is_skipped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_file(&dir, ",x\n  ,\nNumber,Name\n0811,Alice\nabc,Later\n");

    let recipients = load_recipients(&path).expect("should load");
    assert_eq!(recipients.get("Number"), None);
    // Only the first non-blank row can be a header.
    assert_eq!(recipients.get("abc"), Some("Later"));
    assert_eq!(recipients.len(), 2);
}

#[test]
fn full_jids_are_kept_verbatim() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_file(&dir, "628111@s.whatsapp.net,Dan\n");

    let recipients = load_recipients(&path).expect("should load");
    assert_eq!(recipients.get("628111@s.whatsapp.net"), Some("Dan"));
}

#[test]
fn empty_file_is_load_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_file(&dir, "");
    assert!(matches!(load_recipients(&path), Err(LoadError::Empty(_))));
}

#[test]
fn header_only_file_is_load_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_file(&dir, "Number,Name\n");
    assert!(matches!(load_recipients(&path), Err(LoadError::Empty(_))));
}

#[test]
fn blank_identifiers_only_is_load_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_file(&dir, " ,Alice\n,Bob\n");
    assert!(matches!(load_recipients(&path), Err(LoadError::Empty(_))));
}

#[test]
fn missing_file_is_open_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nope.csv");
    assert!(matches!(load_recipients(&path), Err(LoadError::Open { .. })));
}

#[test]
fn invalid_utf8_is_parse_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("numbers.csv");
    std::fs::write(&path, b"0811,Alice\n0812,\xff\xfe\n").expect("write");
    assert!(matches!(load_recipients(&path), Err(LoadError::Parse { .. })));
}
