#![allow(dead_code)]

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use tempfile::TempDir;

pub const FIXTURE_SQL: &str = include_str!("../fixtures/platformbox.sql");

pub fn tempdir() -> TempDir {
    match std::env::var_os("IEDDATA_TEST_TMPDIR") {
        Some(dir) => TempDir::with_prefix_in("ieddata-test-", dir).unwrap(),
        None => TempDir::with_prefix("ieddata-test-").unwrap(),
    }
}

/// Writes the fixture database into `dir` and returns its path.
pub fn write_fixture(dir: &Path) -> PathBuf {
    let path = dir.join("platformbox.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(FIXTURE_SQL).unwrap();
    conn.close().unwrap();
    path
}
