//! SQLite connection wrapper.

use std::any::Any;
use std::ffi::{CStr, CString};
use std::fmt;
use std::os::raw::{c_char, c_int, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::rc::Rc;

use rusqlite::ffi;
use tracing::{debug, trace, warn};

use crate::config::{DatabaseConfig, OpenFlags};
use crate::error::{SqliteError, SqliteResult};
use crate::handle::RawConnection;
use crate::statement::Statement;
use crate::types::ToSql;

/// A connection to an SQLite database.
///
/// Cloning is cheap and shares the native handle. The handle is closed when
/// the last clone (and the last statement prepared on it) is dropped, or
/// earlier through [`Database::close`].
///
/// A connection is bound to the thread that opened it.
#[derive(Clone)]
pub struct Database {
    raw: Rc<RawConnection>,
}

impl Database {
    /// Open the database at `path` with `sqlite3_open_v2`.
    ///
    /// `path` may be a file name, `":memory:"` or, with
    /// [`OpenFlags::SQLITE_OPEN_URI`], a `file:` URI.
    pub fn open(path: &str, flags: OpenFlags) -> SqliteResult<Self> {
        let raw = RawConnection::open(path, flags.bits())?;
        Ok(Self { raw: Rc::new(raw) })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> SqliteResult<Self> {
        Self::open(
            ":memory:",
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
    }

    /// Open a database and apply the settings of `config`.
    pub fn open_with_config(config: &DatabaseConfig) -> SqliteResult<Self> {
        let path = config.path.to_path_string()?;
        let db = Self::open(&path, config.flags)?;
        if let Some(ms) = config.busy_timeout_ms {
            db.set_busy_timeout(ms)?;
        }
        let init = config.init_sql();
        if !init.is_empty() {
            db.execute(&init)?;
        }
        Ok(db)
    }

    pub(crate) fn from_raw(raw: Rc<RawConnection>) -> Self {
        Self { raw }
    }

    pub(crate) fn as_ptr(&self) -> *mut ffi::sqlite3 {
        self.raw.as_ptr()
    }

    /// The path the connection was opened with.
    pub fn path(&self) -> &str {
        self.raw.path()
    }

    /// Check if the connection is still open.
    pub fn is_open(&self) -> bool {
        self.raw.is_open()
    }

    /// Close the connection now.
    ///
    /// Every clone is invalidated; using any of them, or any statement
    /// prepared on the connection, afterwards panics. Fails with a
    /// busy error while statements are still alive.
    pub fn close(&self) -> SqliteResult<()> {
        self.raw.close()
    }

    /// Run one or more `;`-separated statements, discarding any rows.
    pub fn execute(&self, sql: &str) -> SqliteResult<()> {
        debug!(sql = %sql, "Executing SQL");
        self.exec(sql, None)
    }

    /// Run one or more statements, calling `callback` with the column names
    /// and text values of every result row.
    ///
    /// Returning `false` from the callback stops execution early; that is
    /// not an error.
    pub fn run<F>(&self, sql: &str, mut callback: F) -> SqliteResult<()>
    where
        F: FnMut(&[String], &[Option<String>]) -> bool,
    {
        debug!(sql = %sql, "Running SQL with row callback");
        self.exec(sql, Some(&mut callback))
    }

    fn exec(
        &self,
        sql: &str,
        callback: Option<&mut dyn FnMut(&[String], &[Option<String>]) -> bool>,
    ) -> SqliteResult<()> {
        let db = self.as_ptr();
        let c_sql = CString::new(sql)
            .map_err(|_| SqliteError::execution("SQL contains a NUL byte", sql))?;

        let mut state = callback.map(|callback| ExecState {
            callback,
            stopped: false,
            panic: None,
        });
        let (trampoline, arg) = match state.as_mut() {
            Some(state) => (
                Some(exec_row as ExecCallback),
                state as *mut ExecState<'_> as *mut c_void,
            ),
            None => (None, ptr::null_mut()),
        };

        let mut errmsg: *mut c_char = ptr::null_mut();
        // SAFETY: c_sql is NUL-terminated; arg is either null or points at
        // `state`, which outlives the call.
        let rc = unsafe { ffi::sqlite3_exec(db, c_sql.as_ptr(), trampoline, arg, &mut errmsg) };
        // SAFETY: errmsg is null or was allocated by the engine for us.
        let message = unsafe { take_exec_error(errmsg) };

        if let Some(state) = state {
            if let Some(payload) = state.panic {
                panic::resume_unwind(payload);
            }
            if rc == ffi::SQLITE_ABORT && state.stopped {
                trace!(sql = %sql, "Row callback stopped execution");
                return Ok(());
            }
        }

        if rc != ffi::SQLITE_OK {
            let message = message.unwrap_or_else(|| self.raw.error_message());
            return Err(SqliteError::execution(message, sql).with_code(rc));
        }
        Ok(())
    }

    /// Compile the first statement in `sql`.
    pub fn prepare(&self, sql: &str) -> SqliteResult<Statement> {
        debug!(sql = %sql, "Preparing statement");
        Statement::prepare(&self.raw, sql)
    }

    /// Prepare `sql` and bind `params` positionally.
    ///
    /// ```rust
    /// use lite3_core::Database;
    ///
    /// let db = Database::open_in_memory()?;
    /// let stmt = db.query("SELECT ? || ?", &[&"lite", &3])?;
    /// assert_eq!(stmt.one_value::<String>()?, "lite3");
    /// # Ok::<_, lite3_core::SqliteError>(())
    /// ```
    pub fn query(&self, sql: &str, params: &[&dyn ToSql]) -> SqliteResult<Statement> {
        let stmt = self.prepare(sql)?;
        stmt.bind_all(params)?;
        Ok(stmt)
    }

    /// Rows modified by the most recent INSERT, UPDATE or DELETE.
    pub fn changes(&self) -> i64 {
        // SAFETY: as_ptr returns a live handle.
        i64::from(unsafe { ffi::sqlite3_changes(self.as_ptr()) })
    }

    /// Rows modified since the connection was opened.
    pub fn total_changes(&self) -> i64 {
        // SAFETY: as_ptr returns a live handle.
        i64::from(unsafe { ffi::sqlite3_total_changes(self.as_ptr()) })
    }

    /// Rowid of the most recent successful INSERT.
    pub fn last_insert_rowid(&self) -> i64 {
        // SAFETY: as_ptr returns a live handle.
        unsafe { ffi::sqlite3_last_insert_rowid(self.as_ptr()) }
    }

    /// Check if the connection is outside an explicit transaction.
    pub fn is_autocommit(&self) -> bool {
        // SAFETY: as_ptr returns a live handle.
        unsafe { ffi::sqlite3_get_autocommit(self.as_ptr()) != 0 }
    }

    /// Most recent extended error code.
    pub fn error_code(&self) -> i32 {
        self.raw.error_code()
    }

    /// Most recent error message.
    pub fn error_message(&self) -> String {
        self.raw.error_message()
    }

    /// Sleep up to `ms` milliseconds when a table is locked.
    pub fn set_busy_timeout(&self, ms: u32) -> SqliteResult<()> {
        let ms = c_int::try_from(ms)
            .map_err(|_| SqliteError::config(format!("busy timeout {}ms is too large", ms)))?;
        // SAFETY: as_ptr returns a live handle.
        let rc = unsafe { ffi::sqlite3_busy_timeout(self.as_ptr(), ms) };
        if rc != ffi::SQLITE_OK {
            return Err(SqliteError::connection(self.raw.error_message()).with_code(rc));
        }
        Ok(())
    }

    /// Start a transaction.
    pub fn begin(&self) -> SqliteResult<()> {
        self.execute("BEGIN")
    }

    /// Commit the current transaction.
    pub fn commit(&self) -> SqliteResult<()> {
        self.execute("COMMIT")
    }

    /// Roll back the current transaction.
    pub fn rollback(&self) -> SqliteResult<()> {
        self.execute("ROLLBACK")
    }

    /// Run `f` inside a transaction, committing on success and rolling
    /// back on error.
    pub fn transaction<T, F>(&self, f: F) -> SqliteResult<T>
    where
        F: FnOnce(&Database) -> SqliteResult<T>,
    {
        self.begin()?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self.rollback() {
                    warn!(error = %rollback, "Rollback after failed transaction failed");
                }
                Err(err)
            }
        }
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path())
            .field("open", &self.is_open())
            .finish()
    }
}

type ExecCallback =
    unsafe extern "C" fn(*mut c_void, c_int, *mut *mut c_char, *mut *mut c_char) -> c_int;

struct ExecState<'a> {
    callback: &'a mut dyn FnMut(&[String], &[Option<String>]) -> bool,
    stopped: bool,
    panic: Option<Box<dyn Any + Send>>,
}

unsafe extern "C" fn exec_row(
    arg: *mut c_void,
    ncols: c_int,
    values: *mut *mut c_char,
    names: *mut *mut c_char,
) -> c_int {
    // SAFETY: arg is the ExecState handed to sqlite3_exec by `exec`.
    let state = unsafe { &mut *(arg as *mut ExecState<'_>) };
    let ncols = usize::try_from(ncols).unwrap_or(0);
    let mut column_names = Vec::with_capacity(ncols);
    let mut column_values = Vec::with_capacity(ncols);
    for i in 0..ncols {
        // SAFETY: both arrays hold ncols entries; values may be null.
        unsafe {
            column_names.push(c_string(*names.add(i)).unwrap_or_default());
            column_values.push(c_string(*values.add(i)));
        }
    }

    match panic::catch_unwind(AssertUnwindSafe(|| {
        (state.callback)(&column_names, &column_values)
    })) {
        Ok(true) => 0,
        Ok(false) => {
            state.stopped = true;
            1
        }
        Err(payload) => {
            state.panic = Some(payload);
            1
        }
    }
}

/// # Safety
///
/// `ptr` must be null or point at a NUL-terminated string.
unsafe fn c_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        // SAFETY: guaranteed by the caller.
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }
}

/// # Safety
///
/// `errmsg` must be null or an engine allocation not yet freed.
unsafe fn take_exec_error(errmsg: *mut c_char) -> Option<String> {
    // SAFETY: guaranteed by the caller.
    unsafe {
        let message = c_string(errmsg);
        if !errmsg.is_null() {
            ffi::sqlite3_free(errmsg.cast());
        }
        message
    }
}

/// Version of the linked SQLite library, e.g. `"3.46.0"`.
pub fn sqlite_version() -> &'static str {
    // SAFETY: the engine returns a static NUL-terminated string.
    unsafe { CStr::from_ptr(ffi::sqlite3_libversion()) }
        .to_str()
        .unwrap_or("")
}

/// Version of the linked SQLite library as `X * 1_000_000 + Y * 1_000 + Z`.
pub fn sqlite_version_number() -> i32 {
    // SAFETY: no preconditions.
    unsafe { ffi::sqlite3_libversion_number() }
}

/// Check if the linked SQLite library was built thread-safe.
pub fn is_threadsafe() -> bool {
    // SAFETY: no preconditions.
    unsafe { ffi::sqlite3_threadsafe() != 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::StatementState;
    use crate::value::Value;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.is_open());
        assert_eq!(db.path(), ":memory:");
        assert!(db.is_autocommit());
    }

    #[test]
    fn test_execute_multiple_statements() {
        let db = Database::open_in_memory().unwrap();
        db.execute("CREATE TABLE t (x); INSERT INTO t VALUES (1); INSERT INTO t VALUES (2);")
            .unwrap();
        assert_eq!(db.total_changes(), 2);
        assert_eq!(db.changes(), 1);
        assert_eq!(db.last_insert_rowid(), 2);
    }

    #[test]
    fn test_execute_error() {
        let db = Database::open_in_memory().unwrap();
        let err = db.execute("SELEC 1").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Execution);
        assert!(err.message().contains("syntax error"));
        assert_eq!(err.sql(), Some("SELEC 1"));
        assert_eq!(err.code(), Some(ffi::SQLITE_ERROR));
    }

    #[test]
    fn test_prepare_error() {
        let db = Database::open_in_memory().unwrap();
        let err = db.prepare("SELECT * FROM missing").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Prepare);
        assert!(err.message().contains("no such table"));
    }

    #[test]
    fn test_run_callback() {
        let db = Database::open_in_memory().unwrap();
        db.execute("CREATE TABLE t (x, y); INSERT INTO t VALUES (1, 'a'), (2, NULL);")
            .unwrap();

        let mut seen = Vec::new();
        db.run("SELECT x, y FROM t ORDER BY x", |names, values| {
            assert_eq!(names, ["x", "y"]);
            seen.push(values.to_vec());
            true
        })
        .unwrap();
        assert_eq!(
            seen,
            vec![
                vec![Some("1".to_string()), Some("a".to_string())],
                vec![Some("2".to_string()), None],
            ]
        );
    }

    #[test]
    fn test_run_callback_stops_early() {
        let db = Database::open_in_memory().unwrap();
        db.execute("CREATE TABLE t (x); INSERT INTO t VALUES (1), (2), (3);")
            .unwrap();

        let mut calls = 0;
        db.run("SELECT x FROM t", |_, _| {
            calls += 1;
            false
        })
        .unwrap();
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_query_binds_params() {
        let db = Database::open_in_memory().unwrap();
        let stmt = db.query("SELECT ? + ?", &[&40, &2i64]).unwrap();
        assert_eq!(stmt.one_value::<i64>().unwrap(), 42);
    }

    #[test]
    fn test_transaction_commits_and_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        db.execute("CREATE TABLE t (x)").unwrap();

        db.transaction(|db| {
            assert!(!db.is_autocommit());
            db.execute("INSERT INTO t VALUES (1)")
        })
        .unwrap();

        let err = db
            .transaction(|db| {
                db.execute("INSERT INTO t VALUES (2)")?;
                db.execute("INSERT INTO nowhere VALUES (3)")
            })
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Execution);
        assert!(db.is_autocommit());

        let rows = db.prepare("SELECT x FROM t").unwrap().fetch_all().unwrap();
        assert_eq!(rows, vec![vec![Value::Integer(1)]]);
    }

    #[test]
    fn test_statement_keeps_connection_alive() {
        let stmt = {
            let db = Database::open_in_memory().unwrap();
            db.prepare("SELECT 1").unwrap()
        };
        assert!(stmt.database().is_open());
        assert_eq!(stmt.one_value::<i64>().unwrap(), 1);
        assert_eq!(stmt.state(), StatementState::Row);
    }

    #[test]
    fn test_close_invalidates_clones() {
        let db = Database::open_in_memory().unwrap();
        let other = db.clone();
        db.close().unwrap();
        assert!(!other.is_open());
    }

    #[test]
    fn test_close_busy_with_live_statement() {
        let db = Database::open_in_memory().unwrap();
        let stmt = db.prepare("SELECT 1").unwrap();
        let err = db.close().unwrap_err();
        assert!(err.is_busy());
        stmt.finalize().unwrap();
        db.close().unwrap();
    }

    #[test]
    fn test_open_read_only_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.db");
        let err = Database::open(path.to_str().unwrap(), OpenFlags::SQLITE_OPEN_READ_ONLY)
            .unwrap_err();
        assert!(err.is_connection());
    }

    #[test]
    fn test_busy_timeout() {
        let db = Database::open_in_memory().unwrap();
        db.set_busy_timeout(250).unwrap();
    }

    #[test]
    fn test_version() {
        assert!(sqlite_version().starts_with('3'));
        assert!(sqlite_version_number() >= 3_000_000);
    }
}
