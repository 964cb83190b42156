//! Connection configuration.

use std::path::{Path, PathBuf};

pub use rusqlite::OpenFlags;

use crate::error::{SqliteError, SqliteResult};

/// SQLite database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database path (or ":memory:" for in-memory).
    pub path: DatabasePath,
    /// Flags passed to `sqlite3_open_v2`.
    pub flags: OpenFlags,
    /// Enable foreign keys.
    pub foreign_keys: bool,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: Option<u32>,
    /// Cache size (in pages, negative for KB).
    pub cache_size: Option<i32>,
    /// Synchronous mode; left at the engine default when unset.
    pub synchronous: Option<SynchronousMode>,
    /// Journal mode; left at the engine default when unset.
    pub journal_mode: Option<JournalMode>,
}

/// Database path configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DatabasePath {
    /// In-memory database.
    #[default]
    Memory,
    /// File-based database.
    File(PathBuf),
}

impl DatabasePath {
    /// Get the path string for SQLite.
    pub fn to_path_string(&self) -> SqliteResult<String> {
        match self {
            Self::Memory => Ok(":memory:".to_string()),
            Self::File(path) => path.to_str().map(str::to_string).ok_or_else(|| {
                SqliteError::config(format!("database path is not valid UTF-8: {:?}", path))
            }),
        }
    }

    /// Check if this is an in-memory database.
    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Memory)
    }
}

macro_rules! pragma_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $what:literal {
            $($(#[$vmeta:meta])* $variant:ident => $pragma:literal $(| $alias:literal)*,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
        }

        impl $name {
            /// Value as written in the PRAGMA statement.
            pub fn as_pragma(&self) -> &'static str {
                match self {
                    $(Self::$variant => $pragma,)+
                }
            }

            fn parse(value: &str) -> SqliteResult<Self> {
                let upper = value.to_ascii_uppercase();
                $(
                    if upper == $pragma $(|| upper == $alias)* {
                        return Ok(Self::$variant);
                    }
                )+
                Err(SqliteError::config(format!("unknown {} '{}'", $what, value)))
            }
        }
    };
}

pragma_enum! {
    /// `PRAGMA synchronous` setting.
    SynchronousMode, "synchronous mode" {
        /// No syncs; a crash can corrupt the database.
        Off => "OFF" | "0",
        /// Sync at critical moments only.
        Normal => "NORMAL" | "1",
        /// Sync after every transaction.
        Full => "FULL" | "2",
        /// FULL plus a directory sync on journal unlink.
        Extra => "EXTRA" | "3",
    }
}

pragma_enum! {
    /// `PRAGMA journal_mode` setting.
    JournalMode, "journal mode" {
        /// Rollback journal deleted at commit.
        Delete => "DELETE",
        /// Rollback journal truncated at commit.
        Truncate => "TRUNCATE",
        /// Rollback journal header zeroed at commit.
        Persist => "PERSIST",
        /// Rollback journal held in RAM.
        Memory => "MEMORY",
        /// Write-ahead log.
        Wal => "WAL",
        /// No journal; ROLLBACK is undefined.
        Off => "OFF",
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: DatabasePath::Memory,
            flags: OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
            foreign_keys: false,
            busy_timeout_ms: None,
            cache_size: None,
            synchronous: None,
            journal_mode: None,
        }
    }
}

impl DatabaseConfig {
    /// Create a new configuration for an in-memory database.
    pub fn memory() -> Self {
        Self {
            path: DatabasePath::Memory,
            ..Default::default()
        }
    }

    /// Create a new configuration for a file-based database.
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            path: DatabasePath::File(path.as_ref().to_path_buf()),
            ..Default::default()
        }
    }

    /// Parse a SQLite URL into configuration.
    ///
    /// Supported formats:
    /// - `sqlite::memory:` or `:memory:` - In-memory database
    /// - `sqlite://path/to/db.sqlite` - File-based database
    /// - `sqlite:path/to/db.sqlite` - Alternative format
    /// - `file:path/to/db.sqlite` - URI-style format
    /// - anything else is taken as a file path
    ///
    /// Query options: `mode` (`memory`, `ro`, `rw`, `rwc`), `foreign_keys`,
    /// `busy_timeout`, `cache_size`, `synchronous`, `journal_mode`.
    pub fn from_url(url: impl AsRef<str>) -> SqliteResult<Self> {
        let url_str = url.as_ref();
        let (location, query) = match url_str.split_once('?') {
            Some((location, query)) => (location, Some(query)),
            None => (url_str, None),
        };

        let path = if let Some(path_part) = location.strip_prefix("sqlite://") {
            if path_part.is_empty() {
                return Err(SqliteError::config("database path is required"));
            }
            Some(path_part)
        } else if let Some(path_part) = location
            .strip_prefix("sqlite:")
            .or_else(|| location.strip_prefix("file:"))
        {
            if path_part == ":memory:" { None } else { Some(path_part) }
        } else if location == ":memory:" {
            None
        } else if location.is_empty() {
            return Err(SqliteError::config("database path is required"));
        } else {
            Some(location)
        };

        let mut config = match path {
            Some(path) => Self::file(path),
            None => Self::memory(),
        };

        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            match key {
                "mode" => {
                    let base = match value {
                        "memory" => {
                            config.path = DatabasePath::Memory;
                            continue;
                        }
                        "ro" => OpenFlags::SQLITE_OPEN_READ_ONLY,
                        "rw" => OpenFlags::SQLITE_OPEN_READ_WRITE,
                        "rwc" => OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
                        _ => {
                            return Err(SqliteError::config(format!(
                                "unknown open mode '{}'",
                                value
                            )));
                        }
                    };
                    config.flags.remove(
                        OpenFlags::SQLITE_OPEN_READ_ONLY
                            | OpenFlags::SQLITE_OPEN_READ_WRITE
                            | OpenFlags::SQLITE_OPEN_CREATE,
                    );
                    config.flags.insert(base);
                }
                "foreign_keys" => {
                    config.foreign_keys = value == "true" || value == "1";
                }
                "busy_timeout" => {
                    config.busy_timeout_ms = Some(value.parse().map_err(|_| {
                        SqliteError::config(format!("invalid busy_timeout '{}'", value))
                    })?);
                }
                "cache_size" => {
                    config.cache_size = Some(value.parse().map_err(|_| {
                        SqliteError::config(format!("invalid cache_size '{}'", value))
                    })?);
                }
                "synchronous" => {
                    config.synchronous = Some(SynchronousMode::parse(value)?);
                }
                "journal_mode" => {
                    config.journal_mode = Some(JournalMode::parse(value)?);
                }
                _ => {}
            }
        }

        Ok(config)
    }

    /// Generate the initialization SQL for this configuration.
    pub fn init_sql(&self) -> String {
        let mut sql = String::new();

        if self.foreign_keys {
            sql.push_str("PRAGMA foreign_keys = ON;\n");
        }

        if let Some(mode) = self.journal_mode {
            sql.push_str(&format!("PRAGMA journal_mode = {};\n", mode.as_pragma()));
        }

        if let Some(mode) = self.synchronous {
            sql.push_str(&format!("PRAGMA synchronous = {};\n", mode.as_pragma()));
        }

        if let Some(cache) = self.cache_size {
            sql.push_str(&format!("PRAGMA cache_size = {};\n", cache));
        }

        sql
    }

    /// Set the database path.
    pub fn path(mut self, path: DatabasePath) -> Self {
        self.path = path;
        self
    }

    /// Set the open flags.
    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Open the database read-only.
    pub fn read_only(mut self) -> Self {
        self.flags.remove(OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE);
        self.flags.insert(OpenFlags::SQLITE_OPEN_READ_ONLY);
        self
    }

    /// Enable or disable foreign keys.
    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }

    /// Set the busy timeout in milliseconds.
    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = Some(ms);
        self
    }

    /// Set the cache size.
    pub fn cache_size(mut self, size: i32) -> Self {
        self.cache_size = Some(size);
        self
    }

    /// Set the synchronous mode.
    pub fn synchronous(mut self, mode: SynchronousMode) -> Self {
        self.synchronous = Some(mode);
        self
    }

    /// Set the journal mode.
    pub fn journal_mode(mut self, mode: JournalMode) -> Self {
        self.journal_mode = Some(mode);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_memory() {
        let config = DatabaseConfig::memory();
        assert!(config.path.is_memory());
        assert_eq!(config.path.to_path_string().unwrap(), ":memory:");
    }

    #[test]
    fn test_config_file() {
        let config = DatabaseConfig::file("test.db");
        assert!(!config.path.is_memory());
        assert_eq!(config.path.to_path_string().unwrap(), "test.db");
    }

    #[test]
    fn test_config_from_url_memory() {
        assert!(DatabaseConfig::from_url("sqlite::memory:").unwrap().path.is_memory());
        assert!(DatabaseConfig::from_url(":memory:").unwrap().path.is_memory());
        assert!(
            DatabaseConfig::from_url("sqlite://x.db?mode=memory")
                .unwrap()
                .path
                .is_memory()
        );
    }

    #[test]
    fn test_config_from_url_file() {
        let config = DatabaseConfig::from_url("sqlite://./test.db").unwrap();
        assert_eq!(config.path, DatabasePath::File(PathBuf::from("./test.db")));

        let config = DatabaseConfig::from_url("file:data/app.db").unwrap();
        assert_eq!(config.path, DatabasePath::File(PathBuf::from("data/app.db")));

        let config = DatabaseConfig::from_url("plain.db").unwrap();
        assert_eq!(config.path, DatabasePath::File(PathBuf::from("plain.db")));
    }

    #[test]
    fn test_config_from_url_with_options() {
        let config = DatabaseConfig::from_url(
            "sqlite://./test.db?foreign_keys=true&busy_timeout=10000&synchronous=full&journal_mode=wal",
        )
        .unwrap();

        assert!(config.foreign_keys);
        assert_eq!(config.busy_timeout_ms, Some(10000));
        assert_eq!(config.synchronous, Some(SynchronousMode::Full));
        assert_eq!(config.journal_mode, Some(JournalMode::Wal));
    }

    #[test]
    fn test_config_from_url_read_only_mode() {
        let config = DatabaseConfig::from_url("sqlite://./test.db?mode=ro").unwrap();
        assert!(config.flags.contains(OpenFlags::SQLITE_OPEN_READ_ONLY));
        assert!(!config.flags.contains(OpenFlags::SQLITE_OPEN_READ_WRITE));
    }

    #[test]
    fn test_config_from_url_errors() {
        assert!(DatabaseConfig::from_url("sqlite://").is_err());
        assert!(DatabaseConfig::from_url("").is_err());
        assert!(DatabaseConfig::from_url("x.db?busy_timeout=soon").is_err());
        assert!(DatabaseConfig::from_url("x.db?journal_mode=sideways").is_err());
        assert!(DatabaseConfig::from_url("x.db?mode=rwx").is_err());
    }

    #[test]
    fn test_init_sql() {
        let config = DatabaseConfig::memory()
            .foreign_keys(true)
            .journal_mode(JournalMode::Memory)
            .synchronous(SynchronousMode::Normal)
            .cache_size(-2000);
        let sql = config.init_sql();

        assert!(sql.contains("foreign_keys = ON"));
        assert!(sql.contains("journal_mode = MEMORY"));
        assert!(sql.contains("synchronous = NORMAL"));
        assert!(sql.contains("cache_size = -2000"));
    }

    #[test]
    fn test_init_sql_empty_by_default() {
        assert!(DatabaseConfig::default().init_sql().is_empty());
    }

    #[test]
    fn test_builder_pattern() {
        let config = DatabaseConfig::memory()
            .foreign_keys(false)
            .busy_timeout(3000)
            .synchronous(SynchronousMode::Full)
            .read_only();

        assert!(!config.foreign_keys);
        assert_eq!(config.busy_timeout_ms, Some(3000));
        assert_eq!(config.synchronous, Some(SynchronousMode::Full));
        assert!(config.flags.contains(OpenFlags::SQLITE_OPEN_READ_ONLY));
    }

    #[test]
    fn test_pragma_values() {
        assert_eq!(SynchronousMode::Off.as_pragma(), "OFF");
        assert_eq!(SynchronousMode::Extra.as_pragma(), "EXTRA");
        assert_eq!(JournalMode::Delete.as_pragma(), "DELETE");
        assert_eq!(JournalMode::Wal.as_pragma(), "WAL");
    }
}
