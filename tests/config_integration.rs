//! Integration tests for configuration parsing and opening databases from it.

use lite3::{DatabaseConfig, DatabasePath, JournalMode, OpenFlags, SynchronousMode};
use lite3::prelude::*;

/// Test in-memory URL forms
#[test]
fn test_config_memory_urls() {
    for url in [":memory:", "sqlite::memory:", "file::memory:"] {
        let config = DatabaseConfig::from_url(url).expect("Failed to parse config");
        assert!(config.path.is_memory(), "{}", url);
    }
}

/// Test file URL with every option
#[test]
fn test_config_full_url() {
    let config = DatabaseConfig::from_url(
        "sqlite://data/app.db?mode=ro&foreign_keys=true&busy_timeout=250&cache_size=-4000&synchronous=full&journal_mode=wal",
    )
    .expect("Failed to parse config");

    assert_eq!(config.path, DatabasePath::File("data/app.db".into()));
    assert!(config.flags.contains(OpenFlags::SQLITE_OPEN_READ_ONLY));
    assert!(!config.flags.contains(OpenFlags::SQLITE_OPEN_CREATE));
    assert!(config.foreign_keys);
    assert_eq!(config.busy_timeout_ms, Some(250));
    assert_eq!(config.cache_size, Some(-4000));
    assert_eq!(config.synchronous, Some(SynchronousMode::Full));
    assert_eq!(config.journal_mode, Some(JournalMode::Wal));
}

/// Test rejected URLs
#[test]
fn test_config_invalid_urls() {
    for url in ["", "sqlite://", "x.db?mode=rwx", "x.db?busy_timeout=soon", "x.db?journal_mode=paper"] {
        let err = DatabaseConfig::from_url(url).unwrap_err();
        assert_eq!(err.kind(), lite3::ErrorKind::Config, "{}", url);
    }
}

/// Test that init pragmas are applied when opening
#[test]
fn test_open_with_config_applies_pragmas() {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig::file(dir.path().join("app.db"))
        .foreign_keys(true)
        .journal_mode(JournalMode::Wal)
        .busy_timeout(100);

    let db = Database::open_with_config(&config).unwrap();
    let fk = db.prepare("PRAGMA foreign_keys").unwrap();
    assert_eq!(fk.one_value::<i64>().unwrap(), 1);
    let journal = db.prepare("PRAGMA journal_mode").unwrap();
    assert_eq!(journal.one_value::<String>().unwrap(), "wal");
}

/// Test that a read-only database rejects writes
#[test]
fn test_open_read_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ro.db");
    {
        let db = Database::open_with_config(&DatabaseConfig::file(&path)).unwrap();
        db.execute("CREATE TABLE t (x)").unwrap();
    }

    let db = Database::open_with_config(&DatabaseConfig::file(&path).read_only()).unwrap();
    let err = db.execute("INSERT INTO t VALUES (1)").unwrap_err();
    assert_eq!(err.code(), Some(8)); // SQLITE_READONLY
}
