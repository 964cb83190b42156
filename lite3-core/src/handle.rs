//! Shared ownership of native handles.
//!
//! A [`RawConnection`] owns one `sqlite3*` and a [`RawStatement`] owns one
//! `sqlite3_stmt*` plus a strong reference to its connection. Both are held
//! behind `Rc` by the public types, so cloning a `Database` or a `Statement`
//! shares the handle. The native teardown call runs exactly once: either on
//! an explicit [`RawConnection::close`] / [`RawStatement::finalize`], which
//! nulls the pointer for every holder, or when the last holder is dropped.
//!
//! Handles are not thread-safe. `Rc` keeps them on the thread that opened
//! them.

use std::cell::Cell;
use std::ffi::{CStr, CString};
use std::os::raw::c_int;
use std::ptr;
use std::rc::Rc;

use rusqlite::ffi;
use tracing::{debug, trace, warn};

use crate::error::{SqliteError, SqliteResult, code_description};

/// Execution state of a prepared statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementState {
    /// Never stepped since preparation or the last reset.
    Fresh,
    /// The cursor is positioned on a row.
    Row,
    /// The statement ran to completion.
    Done,
}

/// An owned `sqlite3*`.
pub(crate) struct RawConnection {
    db: Cell<*mut ffi::sqlite3>,
    path: String,
}

impl RawConnection {
    /// Open a connection with `sqlite3_open_v2`.
    pub(crate) fn open(path: &str, flags: c_int) -> SqliteResult<Self> {
        let c_path = CString::new(path).map_err(|_| {
            SqliteError::connection(format!("database path contains a NUL byte: {:?}", path))
        })?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        // SAFETY: c_path is NUL-terminated and db is a valid out-pointer.
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };

        if rc != ffi::SQLITE_OK {
            let message = if db.is_null() {
                code_description(rc)
            } else {
                // SAFETY: a failed open may still hand back a handle that
                // carries the error message; it must be closed either way.
                unsafe {
                    let message = errmsg(db);
                    ffi::sqlite3_close(db);
                    message
                }
            };
            return Err(SqliteError::connection(format!(
                "cannot open database '{}': {}",
                path, message
            ))
            .with_code(rc));
        }
        if db.is_null() {
            return Err(SqliteError::connection(format!(
                "cannot open database '{}': engine returned a null handle",
                path
            )));
        }

        debug!(path = %path, flags = flags, "Opened SQLite connection");
        Ok(Self {
            db: Cell::new(db),
            path: path.to_string(),
        })
    }

    /// The live handle.
    ///
    /// # Panics
    ///
    /// Panics if the connection was closed. Using a closed connection, or a
    /// statement prepared on it, is a programming error.
    pub(crate) fn as_ptr(&self) -> *mut ffi::sqlite3 {
        let db = self.db.get();
        assert!(
            !db.is_null(),
            "database connection '{}' used after close",
            self.path
        );
        db
    }

    pub(crate) fn is_open(&self) -> bool {
        !self.db.get().is_null()
    }

    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    /// Most recent error message reported on this connection.
    pub(crate) fn error_message(&self) -> String {
        // SAFETY: as_ptr returns a live handle.
        unsafe { errmsg(self.as_ptr()) }
    }

    /// Most recent extended error code reported on this connection.
    pub(crate) fn error_code(&self) -> c_int {
        // SAFETY: as_ptr returns a live handle.
        unsafe { ffi::sqlite3_extended_errcode(self.as_ptr()) }
    }

    /// Close the connection now, invalidating every holder.
    ///
    /// Fails while statements prepared on the connection are still alive.
    pub(crate) fn close(&self) -> SqliteResult<()> {
        let db = self.as_ptr();
        // SAFETY: db is live; on failure it stays live and owned by self.
        let rc = unsafe { ffi::sqlite3_close(db) };
        if rc != ffi::SQLITE_OK {
            // SAFETY: the close failed, so the handle is still valid.
            let message = unsafe { errmsg(db) };
            return Err(SqliteError::connection(format!(
                "cannot close database '{}': {}",
                self.path, message
            ))
            .with_code(rc));
        }
        self.db.set(ptr::null_mut());
        debug!(path = %self.path, "Closed SQLite connection");
        Ok(())
    }
}

impl Drop for RawConnection {
    fn drop(&mut self) {
        let db = self.db.replace(ptr::null_mut());
        if db.is_null() {
            return;
        }
        // SAFETY: every statement holds an Rc to this connection, so none
        // are left to keep the handle busy.
        let rc = unsafe { ffi::sqlite3_close(db) };
        if rc == ffi::SQLITE_OK {
            trace!(path = %self.path, "Released SQLite connection");
        } else {
            warn!(path = %self.path, code = rc, "Failed to close SQLite connection on drop");
        }
    }
}

/// An owned `sqlite3_stmt*`.
pub(crate) struct RawStatement {
    stmt: Cell<*mut ffi::sqlite3_stmt>,
    conn: Rc<RawConnection>,
    sql: String,
    state: Cell<StatementState>,
    generation: Cell<u64>,
}

impl RawStatement {
    /// Compile the first statement in `sql`. Any tail is ignored.
    pub(crate) fn prepare(conn: Rc<RawConnection>, sql: &str) -> SqliteResult<Self> {
        let db = conn.as_ptr();
        let len = c_int::try_from(sql.len())
            .map_err(|_| SqliteError::prepare("SQL text is too long", sql))?;

        let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();
        // SAFETY: the pointer/length pair describes `sql`; the tail pointer
        // is not needed.
        let rc = unsafe {
            ffi::sqlite3_prepare_v2(db, sql.as_ptr().cast(), len, &mut stmt, ptr::null_mut())
        };
        if rc != ffi::SQLITE_OK {
            return Err(SqliteError::prepare(conn.error_message(), sql)
                .with_code(conn.error_code()));
        }

        // Whitespace or comment-only SQL compiles to no statement at all.
        let state = if stmt.is_null() {
            StatementState::Done
        } else {
            StatementState::Fresh
        };
        trace!(sql = %sql, empty = stmt.is_null(), "Prepared statement");

        Ok(Self {
            stmt: Cell::new(stmt),
            conn,
            sql: sql.to_string(),
            state: Cell::new(state),
            generation: Cell::new(0),
        })
    }

    /// The live statement handle, or null for an empty statement.
    ///
    /// # Panics
    ///
    /// Panics if the owning connection was closed.
    pub(crate) fn as_ptr(&self) -> *mut ffi::sqlite3_stmt {
        assert!(
            self.conn.is_open(),
            "statement '{}' used after its database connection was closed",
            self.sql
        );
        self.stmt.get()
    }

    pub(crate) fn connection(&self) -> &Rc<RawConnection> {
        &self.conn
    }

    pub(crate) fn sql(&self) -> &str {
        &self.sql
    }

    pub(crate) fn state(&self) -> StatementState {
        self.state.get()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.get()
    }

    fn bump_generation(&self) {
        self.generation.set(self.generation.get().wrapping_add(1));
    }

    /// Advance the cursor once.
    ///
    /// An empty statement, or one that already ran to completion, is not
    /// stepped again: the engine would silently restart it.
    pub(crate) fn step(&self) -> SqliteResult<StatementState> {
        let stmt = self.as_ptr();
        if stmt.is_null() || self.state.get() == StatementState::Done {
            self.state.set(StatementState::Done);
            return Ok(StatementState::Done);
        }

        // SAFETY: stmt is a live handle owned by self.
        let rc = unsafe { ffi::sqlite3_step(stmt) };
        self.bump_generation();
        match rc {
            ffi::SQLITE_ROW => {
                self.state.set(StatementState::Row);
                Ok(StatementState::Row)
            }
            ffi::SQLITE_DONE => {
                self.state.set(StatementState::Done);
                Ok(StatementState::Done)
            }
            _ => {
                // The connection message is only reliable after a reset.
                // SAFETY: stmt is live.
                unsafe { ffi::sqlite3_reset(stmt) };
                self.state.set(StatementState::Fresh);
                let message = self.conn.error_message();
                trace!(sql = %self.sql, code = rc, "Step failed");
                Err(SqliteError::step(message, rc).with_sql(self.sql.clone()))
            }
        }
    }

    /// Rewind to the fresh state, keeping bindings.
    pub(crate) fn reset(&self) -> SqliteResult<()> {
        let stmt = self.as_ptr();
        self.bump_generation();
        if stmt.is_null() {
            return Ok(());
        }
        // SAFETY: stmt is live.
        let rc = unsafe { ffi::sqlite3_reset(stmt) };
        self.state.set(StatementState::Fresh);
        if rc != ffi::SQLITE_OK {
            return Err(SqliteError::step(self.conn.error_message(), rc)
                .with_sql(self.sql.clone()));
        }
        Ok(())
    }

    /// Finalize now, invalidating every holder.
    pub(crate) fn finalize(&self) -> SqliteResult<()> {
        let stmt = self.as_ptr();
        self.stmt.set(ptr::null_mut());
        self.state.set(StatementState::Done);
        self.bump_generation();
        if stmt.is_null() {
            return Ok(());
        }
        // SAFETY: stmt was live and is no longer reachable through self.
        let rc = unsafe { ffi::sqlite3_finalize(stmt) };
        if rc != ffi::SQLITE_OK {
            return Err(SqliteError::step(self.conn.error_message(), rc)
                .with_sql(self.sql.clone()));
        }
        Ok(())
    }
}

impl Drop for RawStatement {
    fn drop(&mut self) {
        let stmt = self.stmt.replace(ptr::null_mut());
        if stmt.is_null() || !self.conn.is_open() {
            return;
        }
        // SAFETY: stmt is live and owned solely by self.
        unsafe { ffi::sqlite3_finalize(stmt) };
        trace!(sql = %self.sql, "Finalized statement");
    }
}

/// Copy the connection's current error message.
///
/// # Safety
///
/// `db` must be a live connection handle.
pub(crate) unsafe fn errmsg(db: *mut ffi::sqlite3) -> String {
    // SAFETY: guaranteed by the caller; the returned string is owned by the
    // engine and copied before any further call.
    unsafe {
        let ptr = ffi::sqlite3_errmsg(db);
        if ptr.is_null() {
            String::new()
        } else {
            CStr::from_ptr(ptr).to_string_lossy().into_owned()
        }
    }
}
