//! Error types for SQLite operations.
//!
//! Every failure surfaced by this crate is a [`SqliteError`]: one struct
//! carrying the [`ErrorKind`] it originated from, a message, the native
//! result code when the engine produced one, and the offending SQL when it is
//! known.
//!
//! ```rust
//! use lite3_core::{ErrorKind, SqliteError};
//!
//! let err = SqliteError::bind("statement has no parameters").with_code(25);
//! assert_eq!(err.kind(), ErrorKind::Bind);
//! assert_eq!(err.code(), Some(25));
//! assert!(err.to_string().contains("no parameters"));
//! ```

use std::ffi::CStr;
use std::fmt;
use std::os::raw::c_int;

use rusqlite::ffi;
use thiserror::Error;

/// Result type for SQLite operations.
pub type SqliteResult<T> = Result<T, SqliteError>;

/// Where an error originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Opening or closing the native connection failed.
    Connection,
    /// A fire-and-forget batch (`sqlite3_exec`) failed.
    Execution,
    /// SQL failed to compile.
    Prepare,
    /// A parameter could not be bound.
    Bind,
    /// `sqlite3_step` returned neither a row nor completion.
    Step,
    /// A value could not be converted to the requested host type.
    Decode,
    /// A column looked up by name does not exist in the row.
    ColumnNotFound,
    /// A row was requested from an exhausted result sequence.
    EmptyResult,
    /// Registering or running a user-defined function failed.
    Function,
    /// Invalid configuration.
    Config,
}

impl ErrorKind {
    /// Short description used in error messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Execution => "execution",
            Self::Prepare => "prepare",
            Self::Bind => "bind",
            Self::Step => "step",
            Self::Decode => "decode",
            Self::ColumnNotFound => "column not found",
            Self::EmptyResult => "empty result",
            Self::Function => "function",
            Self::Config => "configuration",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Error type for SQLite operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub struct SqliteError {
    kind: ErrorKind,
    message: String,
    code: Option<i32>,
    sql: Option<String>,
}

impl fmt::Display for SqliteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)?;
        if let Some(code) = self.code {
            write!(f, " (code {})", code)?;
        }
        Ok(())
    }
}

impl SqliteError {
    /// Create a new error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            sql: None,
        }
    }

    /// Attach the native result code.
    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach the SQL that caused the error.
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    /// The error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The error message, without the kind prefix.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The native result code, if the engine reported one.
    pub fn code(&self) -> Option<i32> {
        self.code
    }

    /// The offending SQL, if known.
    pub fn sql(&self) -> Option<&str> {
        self.sql.as_deref()
    }

    // ============== Constructor Functions ==============

    /// Create a connection (open/close) error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, msg)
    }

    /// Create an execution error for the given SQL batch.
    pub fn execution(msg: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::new(ErrorKind::Execution, msg).with_sql(sql)
    }

    /// Create a prepare error for the given SQL.
    pub fn prepare(msg: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::new(ErrorKind::Prepare, msg).with_sql(sql)
    }

    /// Create a bind error.
    pub fn bind(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Bind, msg)
    }

    /// Create a step error.
    pub fn step(msg: impl Into<String>, code: i32) -> Self {
        Self::new(ErrorKind::Step, msg).with_code(code)
    }

    /// Create a decode error.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Decode, msg)
    }

    /// Create a column-not-found error.
    pub fn column_not_found(name: impl AsRef<str>) -> Self {
        Self::new(
            ErrorKind::ColumnNotFound,
            format!("no column named '{}' in row", name.as_ref()),
        )
    }

    /// Create an empty-result error.
    pub fn empty_result() -> Self {
        Self::new(ErrorKind::EmptyResult, "no row available")
    }

    /// Create a user-defined function error.
    pub fn function(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Function, msg)
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, msg)
    }

    // ============== Predicates ==============

    /// Check if this is a connection error.
    pub fn is_connection(&self) -> bool {
        self.kind == ErrorKind::Connection
    }

    /// Check if this is a bind error.
    pub fn is_bind(&self) -> bool {
        self.kind == ErrorKind::Bind
    }

    /// Check if this is a step error.
    pub fn is_step(&self) -> bool {
        self.kind == ErrorKind::Step
    }

    /// Check if this is an empty-result error.
    pub fn is_empty_result(&self) -> bool {
        self.kind == ErrorKind::EmptyResult
    }

    /// Check if the engine reported a constraint violation.
    pub fn is_constraint(&self) -> bool {
        self.code
            .is_some_and(|code| code & 0xff == ffi::SQLITE_CONSTRAINT)
    }

    /// Check if the engine reported the database as busy or locked.
    pub fn is_busy(&self) -> bool {
        self.code.is_some_and(|code| {
            let primary = code & 0xff;
            primary == ffi::SQLITE_BUSY || primary == ffi::SQLITE_LOCKED
        })
    }
}

/// English description of a native result code.
pub(crate) fn code_description(code: c_int) -> String {
    // SAFETY: sqlite3_errstr returns a pointer to a static string.
    unsafe {
        let ptr = ffi::sqlite3_errstr(code);
        if ptr.is_null() {
            format!("unknown error code {}", code)
        } else {
            CStr::from_ptr(ptr).to_string_lossy().into_owned()
        }
    }
}
