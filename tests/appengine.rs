//! Opening databases through the mount namespace of this very process.

mod common;

use std::sync::Arc;
use std::thread;

use rusqlite::Connection;
use similar_asserts::assert_eq;

use ieddata::{AppEngineDb, Error, ErrorKind};

fn own_pid() -> u32 {
    std::process::id()
}

#[test]
fn test_apps() {
    let dir = common::tempdir();
    let path = common::write_fixture(dir.path());
    let db = AppEngineDb::open_at(own_pid(), &path).unwrap();
    assert_eq!(db.source().resolved_path(), path.canonicalize().unwrap());

    let mut apps = db.apps().unwrap();
    apps.sort_by(|a, b| a.title.cmp(&b.title));
    let listing: Vec<String> = apps
        .iter()
        .map(|app| format!("{:?} {} {}", app.title, app.version, app.id))
        .collect();
    assert_eq!(
        listing,
        vec![
            r#""AppA" 1.9.18 195ff5e2e15a149ca5eb7c59d3857cc5"#,
            r#""AppB" 0.6.66666666666 7bd06d3bbf816d0658d5a871b0a498ff"#,
            r#""AppC" 1.1.0 1842f53281412f9c657c7765494ff80e"#,
            r#""AppD" 0.19.1 2a267358a0403fddb039924fbc4f3169"#,
        ]
    );
    assert_eq!(
        apps.iter()
            .filter(|app| app.is_debugging_enabled == 1)
            .count(),
        1
    );
    assert_eq!(apps[2].is_visible, 2);
    db.close().unwrap();
}

#[test]
fn test_device_info() {
    let dir = common::tempdir();
    let path = common::write_fixture(dir.path());
    let db = AppEngineDb::open_at(own_pid(), &path).unwrap();

    let mut entries: Vec<_> = db.device_info().unwrap().into_iter().collect();
    entries.sort();
    assert_eq!(
        entries,
        vec![
            ("deviceName".to_string(), "iedx12345".to_string()),
            ("ownerEmail".to_string(), "foo.bar@example.com".to_string()),
        ]
    );
    db.close().unwrap();
}

#[test]
fn test_write_ahead_log_is_copied() {
    let dir = common::tempdir();
    let path = common::write_fixture(dir.path());

    // Keep the writer open with checkpointing disabled, so that the new row
    // only lives in the write-ahead log.
    let writer = Connection::open(&path).unwrap();
    let mode: String = writer
        .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
        .unwrap();
    assert_eq!(mode, "wal");
    writer
        .execute_batch(
            "PRAGMA wal_autocheckpoint=0;
             INSERT INTO device VALUES ('ownerName', 'The Doctor');",
        )
        .unwrap();
    assert!(dir.path().join("platformbox.db-wal").exists());

    let db = AppEngineDb::open_at(own_pid(), &path).unwrap();
    let info = db.device_info().unwrap();
    assert_eq!(info["ownerName"], "The Doctor");

    // Later changes are not picked up by the copy.
    writer
        .execute("DELETE FROM device WHERE deviceKey = 'deviceName'", [])
        .unwrap();
    assert_eq!(db.device_info().unwrap().len(), 3);

    db.close().unwrap();
    writer.close().unwrap();
}

#[test]
fn test_symlinked_database() {
    let dir = common::tempdir();
    let path = common::write_fixture(dir.path());
    let link = dir.path().join("link.db");
    std::os::unix::fs::symlink(&path, &link).unwrap();

    let db = AppEngineDb::open_at(own_pid(), &link).unwrap();
    assert_eq!(db.source().resolved_path(), path.canonicalize().unwrap());
    assert_eq!(db.apps().unwrap().len(), 4);
}

#[test]
fn test_not_a_database() {
    let dir = common::tempdir();
    let path = dir.path().join("not.a.db");
    std::fs::write(&path, "hello, world\n").unwrap();

    let err = AppEngineDb::open_at(own_pid(), &path).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
    assert!(err.to_string().contains("unable to open database"), "{err}");
}

#[test]
fn test_wrong_database() {
    let dir = common::tempdir();
    let path = dir.path().join("other.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE application (appId TEXT, title TEXT);
         CREATE TABLE applicationversions (appId TEXT, appVersion TEXT);
         INSERT INTO application VALUES (NULL, 'orphan');
         INSERT INTO applicationversions VALUES (NULL, '1.0');",
    )
    .unwrap();
    conn.close().unwrap();

    // NULL never joins, so an app with an empty identifier needs ''.
    let db = AppEngineDb::open_at(own_pid(), &path).unwrap();
    assert!(db.apps().unwrap().is_empty());
    db.close().unwrap();

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "UPDATE application SET appId = '';
         UPDATE applicationversions SET appId = '';",
    )
    .unwrap();
    conn.close().unwrap();

    let db = AppEngineDb::open_at(own_pid(), &path).unwrap();
    let err = db.apps().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DataIntegrity);
}

#[test]
fn test_missing_paths() {
    let dir = common::tempdir();

    let err = AppEngineDb::open_at(own_pid(), dir.path().join("missing.db")).unwrap_err();
    assert!(matches!(err, Error::FileNotFound { .. }), "{err:?}");

    let err = AppEngineDb::open_at(own_pid(), dir.path().join("missing/platformbox.db"))
        .unwrap_err();
    assert!(matches!(err, Error::DirectoryNotFound { .. }), "{err:?}");
}

#[test]
fn test_queries_race_close() {
    let dir = common::tempdir();
    let path = common::write_fixture(dir.path());
    let db = Arc::new(AppEngineDb::open_at(own_pid(), &path).unwrap());
    let copy = db.copy_path().unwrap();

    let workers: Vec<_> = (0..4)
        .map(|i| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                for _ in 0..50 {
                    let result = if i % 2 == 0 {
                        db.apps().map(|apps| apps.len())
                    } else {
                        db.device_info().map(|info| info.len())
                    };
                    match result {
                        Ok(len) => assert!(len == 4 || len == 2),
                        Err(Error::Closed) => break,
                        Err(err) => panic!("{err}"),
                    }
                }
            })
        })
        .collect();
    let closers: Vec<_> = (0..2)
        .map(|_| {
            let db = Arc::clone(&db);
            thread::spawn(move || db.close())
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    for closer in closers {
        closer.join().unwrap().unwrap();
    }
    assert!(db.is_closed());
    assert!(!copy.exists());
    assert!(!copy.parent().unwrap().exists());
}
