//! Prepared statements and their lazy result sequence.

use std::cell::Cell;
use std::ffi::{CStr, CString};
use std::fmt;
use std::os::raw::c_int;
use std::rc::Rc;
use std::slice;

use rusqlite::ffi;
use tracing::trace;

use crate::connection::Database;
use crate::error::{SqliteError, SqliteResult, code_description};
use crate::handle::{RawConnection, RawStatement, StatementState};
use crate::row::Row;
use crate::types::{BindValue, ToSql};
use crate::value::{FromValue, Value};

/// A parameter position (1-based `usize`) or a parameter name such as
/// `:id`, `@id` or `$id`.
pub trait ParameterIndex {
    /// Resolve to the native 1-based parameter index.
    fn parameter_index(&self, stmt: &Statement) -> SqliteResult<c_int>;
}

impl ParameterIndex for usize {
    fn parameter_index(&self, _stmt: &Statement) -> SqliteResult<c_int> {
        c_int::try_from(*self)
            .map_err(|_| SqliteError::bind(format!("parameter index {} is out of range", self)))
    }
}

impl ParameterIndex for &str {
    fn parameter_index(&self, stmt: &Statement) -> SqliteResult<c_int> {
        stmt.parameter_index(self)
            .and_then(|i| c_int::try_from(i).ok())
            .ok_or_else(|| {
                SqliteError::bind(format!("no parameter named '{}'", self))
                    .with_sql(stmt.sql())
            })
    }
}

/// A prepared statement.
///
/// Cloning shares the native handle and the cursor: all clones observe the
/// same execution state. The handle is finalized when the last clone is
/// dropped, or earlier through [`Statement::finalize`].
///
/// Bindings are legal while the statement is [`StatementState::Fresh`],
/// which is the case right after preparation and after [`Statement::reset`].
#[derive(Clone)]
pub struct Statement {
    raw: Rc<RawStatement>,
}

impl Statement {
    pub(crate) fn prepare(conn: &Rc<RawConnection>, sql: &str) -> SqliteResult<Self> {
        let raw = RawStatement::prepare(Rc::clone(conn), sql)?;
        Ok(Self { raw: Rc::new(raw) })
    }

    pub(crate) fn as_ptr(&self) -> *mut ffi::sqlite3_stmt {
        self.raw.as_ptr()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.raw.generation()
    }

    /// The SQL this statement was prepared from.
    pub fn sql(&self) -> &str {
        self.raw.sql()
    }

    /// Current execution state.
    pub fn state(&self) -> StatementState {
        self.raw.state()
    }

    /// The connection this statement belongs to.
    pub fn database(&self) -> Database {
        Database::from_raw(Rc::clone(self.raw.connection()))
    }

    /// Number of parameters; zero for an empty statement.
    pub fn parameter_count(&self) -> usize {
        let stmt = self.as_ptr();
        if stmt.is_null() {
            return 0;
        }
        // SAFETY: stmt is live.
        let count = unsafe { ffi::sqlite3_bind_parameter_count(stmt) };
        usize::try_from(count).unwrap_or(0)
    }

    /// Name of the parameter at the 1-based `index`, including its prefix.
    /// Positional `?` parameters have no name.
    pub fn parameter_name(&self, index: usize) -> Option<String> {
        let stmt = self.as_ptr();
        let index = c_int::try_from(index).ok()?;
        if stmt.is_null() {
            return None;
        }
        // SAFETY: stmt is live; the returned string is copied immediately.
        unsafe { owned_str(ffi::sqlite3_bind_parameter_name(stmt, index)) }
    }

    /// 1-based index of the parameter called `name` (prefix included).
    pub fn parameter_index(&self, name: &str) -> Option<usize> {
        let stmt = self.as_ptr();
        if stmt.is_null() {
            return None;
        }
        let c_name = CString::new(name).ok()?;
        // SAFETY: stmt is live and c_name is NUL-terminated.
        let index = unsafe { ffi::sqlite3_bind_parameter_index(stmt, c_name.as_ptr()) };
        usize::try_from(index).ok().filter(|&i| i > 0)
    }

    /// Number of columns in the result set.
    pub fn column_count(&self) -> usize {
        let stmt = self.as_ptr();
        if stmt.is_null() {
            return 0;
        }
        // SAFETY: stmt is live.
        let count = unsafe { ffi::sqlite3_column_count(stmt) };
        usize::try_from(count).unwrap_or(0)
    }

    /// Name of the column at the 0-based `index`.
    pub fn column_name(&self, index: usize) -> Option<String> {
        let stmt = self.as_ptr();
        if stmt.is_null() || index >= self.column_count() {
            return None;
        }
        // SAFETY: stmt is live and index is in range.
        unsafe { owned_str(ffi::sqlite3_column_name(stmt, index as c_int)) }
    }

    /// Names of every result column.
    pub fn column_names(&self) -> Vec<String> {
        (0..self.column_count())
            .map(|i| self.column_name(i).unwrap_or_default())
            .collect()
    }

    /// Declared type of the column at `index`, when it maps directly to a
    /// table column.
    pub fn column_declared_type(&self, index: usize) -> Option<String> {
        let stmt = self.as_ptr();
        if stmt.is_null() || index >= self.column_count() {
            return None;
        }
        // SAFETY: stmt is live and index is in range.
        unsafe { owned_str(ffi::sqlite3_column_decltype(stmt, index as c_int)) }
    }

    /// Bind `value` to the parameter at `index`.
    ///
    /// ```rust
    /// use lite3_core::Database;
    ///
    /// let db = Database::open_in_memory()?;
    /// let stmt = db.prepare("SELECT :a + ?2")?;
    /// stmt.bind(":a", &40)?;
    /// stmt.bind(2, &2)?;
    /// assert_eq!(stmt.one_value::<i64>()?, 42);
    /// # Ok::<_, lite3_core::SqliteError>(())
    /// ```
    pub fn bind<T: ToSql + ?Sized>(
        &self,
        index: impl ParameterIndex,
        value: &T,
    ) -> SqliteResult<()> {
        let stmt = self.as_ptr();
        if self.parameter_count() == 0 {
            return Err(SqliteError::bind("statement has no parameters").with_sql(self.sql()));
        }
        let index = index.parameter_index(self)?;
        let value = value.to_sql()?;
        trace!(index = index, value = ?value, "Binding parameter");

        // SAFETY: stmt is live (parameter_count is non-zero); text and blob
        // are copied by the engine (SQLITE_TRANSIENT).
        let rc = unsafe {
            match value {
                BindValue::Null => ffi::sqlite3_bind_null(stmt, index),
                BindValue::Int(i) => ffi::sqlite3_bind_int(stmt, index, i),
                BindValue::Int64(i) => ffi::sqlite3_bind_int64(stmt, index, i),
                BindValue::Double(f) => ffi::sqlite3_bind_double(stmt, index, f),
                BindValue::Text(s) => ffi::sqlite3_bind_text(
                    stmt,
                    index,
                    s.as_ptr().cast(),
                    bind_len(s.len())?,
                    ffi::SQLITE_TRANSIENT(),
                ),
                BindValue::Blob(b) if b.is_empty() => ffi::sqlite3_bind_null(stmt, index),
                BindValue::Blob(b) => ffi::sqlite3_bind_blob(
                    stmt,
                    index,
                    b.as_ptr().cast(),
                    bind_len(b.len())?,
                    ffi::SQLITE_TRANSIENT(),
                ),
            }
        };

        if rc != ffi::SQLITE_OK {
            return Err(SqliteError::bind(format!(
                "cannot bind parameter {}: {}",
                index,
                code_description(rc)
            ))
            .with_code(rc)
            .with_sql(self.sql()));
        }
        Ok(())
    }

    /// Bind `values` positionally, starting at parameter 1.
    pub fn bind_all(&self, values: &[&dyn ToSql]) -> SqliteResult<()> {
        for (i, value) in values.iter().enumerate() {
            self.bind(i + 1, *value)?;
        }
        Ok(())
    }

    /// Set every parameter back to NULL. The execution state is unchanged.
    pub fn clear_bindings(&self) -> SqliteResult<()> {
        let stmt = self.as_ptr();
        if stmt.is_null() {
            return Ok(());
        }
        // SAFETY: stmt is live.
        let rc = unsafe { ffi::sqlite3_clear_bindings(stmt) };
        if rc != ffi::SQLITE_OK {
            return Err(SqliteError::bind(code_description(rc)).with_code(rc));
        }
        Ok(())
    }

    /// Rewind to [`StatementState::Fresh`], keeping the current bindings.
    pub fn reset(&self) -> SqliteResult<()> {
        self.raw.reset()
    }

    /// Advance the cursor once and return the result sequence positioned on
    /// the new row.
    ///
    /// A statement that already ran to completion is not stepped again; call
    /// [`Statement::reset`] to run it anew.
    pub fn execute(&self) -> SqliteResult<Rows<'_>> {
        self.raw.step()?;
        Ok(Rows::new(self))
    }

    pub(crate) fn step(&self) -> SqliteResult<StatementState> {
        self.raw.step()
    }

    /// The lazy, single-pass sequence of result rows.
    ///
    /// No step happens until the sequence is first inspected.
    pub fn rows(&self) -> Rows<'_> {
        Rows::new(self)
    }

    /// Decode column 0 of the current row, stepping to the first row if the
    /// statement has not run yet.
    pub fn one_value<T: FromValue>(&self) -> SqliteResult<T> {
        self.rows().front()?.get(0)
    }

    /// Buffer every remaining row, then reset the statement.
    ///
    /// Each call returns a fresh buffer. Do not interleave with manual
    /// iteration of the same statement.
    pub fn fetch_all(&self) -> SqliteResult<Vec<Vec<Value>>> {
        let mut rows = Vec::new();
        for row in self.rows() {
            rows.push(row?.values());
        }
        self.reset()?;
        Ok(rows)
    }

    /// Bind `values`, run the statement to completion and reset it.
    pub fn inject(&self, values: &[&dyn ToSql]) -> SqliteResult<()> {
        if self.state() != StatementState::Fresh {
            self.reset()?;
        }
        self.bind_all(values)?;
        while self.raw.step()? == StatementState::Row {}
        self.reset()
    }

    /// Finalize the native statement now.
    ///
    /// Every clone is invalidated; using any of them afterwards panics.
    pub fn finalize(&self) -> SqliteResult<()> {
        self.raw.finalize()
    }

    /// Decode the value of the column at the absolute `index` of the current
    /// row.
    pub(crate) fn column_value(&self, index: usize) -> Value {
        let stmt = self.as_ptr();
        let i = index as c_int;
        // SAFETY: callers check that the statement is on a row and that
        // index is below column_count. Text/blob pointers are read before
        // the byte count, as the engine requires, and copied at once.
        unsafe {
            match ffi::sqlite3_column_type(stmt, i) {
                ffi::SQLITE_INTEGER => Value::Integer(ffi::sqlite3_column_int64(stmt, i)),
                ffi::SQLITE_FLOAT => Value::Float(ffi::sqlite3_column_double(stmt, i)),
                ffi::SQLITE_TEXT => {
                    let ptr = ffi::sqlite3_column_text(stmt, i);
                    let len = ffi::sqlite3_column_bytes(stmt, i);
                    Value::Text(String::from_utf8_lossy(raw_bytes(ptr.cast(), len)).into_owned())
                }
                ffi::SQLITE_BLOB => {
                    let ptr = ffi::sqlite3_column_blob(stmt, i);
                    let len = ffi::sqlite3_column_bytes(stmt, i);
                    Value::Blob(raw_bytes(ptr.cast(), len).to_vec())
                }
                _ => Value::Null,
            }
        }
    }
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("sql", &self.sql())
            .field("state", &self.state())
            .finish()
    }
}

/// The lazy, stateful result sequence of a [`Statement`].
///
/// Offers both range-style access (`is_empty` / `front` / `pop_front`) and
/// [`Iterator`]. It walks the statement's single native cursor, so it cannot
/// be restarted without resetting the statement; each [`Row`] it yields is
/// only valid until the next step.
pub struct Rows<'stmt> {
    stmt: &'stmt Statement,
    yielded: bool,
    failed: Cell<bool>,
}

impl<'stmt> Rows<'stmt> {
    fn new(stmt: &'stmt Statement) -> Self {
        Self {
            stmt,
            yielded: false,
            failed: Cell::new(false),
        }
    }

    fn ensure_started(&self) -> SqliteResult<()> {
        if self.stmt.state() == StatementState::Fresh {
            self.advance()?;
        }
        Ok(())
    }

    fn advance(&self) -> SqliteResult<()> {
        self.stmt.step().map(drop).inspect_err(|_| self.failed.set(true))
    }

    /// Check if the sequence is exhausted, stepping to the first row if
    /// needed.
    pub fn is_empty(&self) -> SqliteResult<bool> {
        if self.failed.get() {
            return Ok(true);
        }
        self.ensure_started()?;
        Ok(self.stmt.state() == StatementState::Done)
    }

    /// The current row, stepping to the first row if needed.
    pub fn front(&self) -> SqliteResult<Row<'stmt>> {
        if self.is_empty()? {
            return Err(SqliteError::empty_result().with_sql(self.stmt.sql()));
        }
        Ok(Row::new(self.stmt))
    }

    /// Step past the current row.
    pub fn pop_front(&mut self) -> SqliteResult<()> {
        if self.is_empty()? {
            return Err(SqliteError::empty_result().with_sql(self.stmt.sql()));
        }
        self.advance()?;
        self.yielded = false;
        Ok(())
    }
}

impl fmt::Debug for Rows<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rows")
            .field("sql", &self.stmt.sql())
            .field("state", &self.stmt.state())
            .finish()
    }
}

impl<'stmt> Iterator for Rows<'stmt> {
    type Item = SqliteResult<Row<'stmt>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed.get() {
            return None;
        }
        let stepped = if self.yielded && self.stmt.state() == StatementState::Row {
            self.advance()
        } else {
            self.ensure_started()
        };
        if let Err(err) = stepped {
            return Some(Err(err));
        }
        if self.stmt.state() != StatementState::Row {
            return None;
        }
        self.yielded = true;
        Some(Ok(Row::new(self.stmt)))
    }
}

fn bind_len(len: usize) -> SqliteResult<c_int> {
    c_int::try_from(len).map_err(|_| {
        SqliteError::bind(format!(
            "value of {} bytes exceeds the maximum parameter length",
            len
        ))
        .with_code(ffi::SQLITE_TOOBIG)
    })
}

/// View `len` bytes at `ptr`, treating a null pointer as empty.
///
/// # Safety
///
/// A non-null `ptr` must be valid for `len` bytes for the returned lifetime.
pub(crate) unsafe fn raw_bytes<'a>(ptr: *const u8, len: c_int) -> &'a [u8] {
    match usize::try_from(len) {
        Ok(len) if !ptr.is_null() && len > 0 => {
            // SAFETY: guaranteed by the caller.
            unsafe { slice::from_raw_parts(ptr, len) }
        }
        _ => &[],
    }
}

/// Copy an engine-owned C string.
///
/// # Safety
///
/// `ptr` must be null or point at a NUL-terminated string.
unsafe fn owned_str(ptr: *const std::os::raw::c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        // SAFETY: guaranteed by the caller.
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Null;

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.execute("CREATE TABLE t (i INTEGER, f REAL, s TEXT, b BLOB)")
            .unwrap();
        db
    }

    #[test]
    fn test_empty_statement() {
        let db = db();
        let stmt = db.prepare("   /* nothing */  ").unwrap();
        assert_eq!(stmt.parameter_count(), 0);
        assert_eq!(stmt.state(), StatementState::Done);
        assert!(stmt.rows().is_empty().unwrap());
        assert!(stmt.execute().unwrap().is_empty().unwrap());
    }

    #[test]
    fn test_bind_without_parameters_fails() {
        let db = db();
        let stmt = db.prepare("SELECT 1").unwrap();
        let err = stmt.bind(1, &1).unwrap_err();
        assert!(err.is_bind());
    }

    #[test]
    fn test_bind_unknown_name_fails() {
        let db = db();
        let stmt = db.prepare("SELECT :a").unwrap();
        let err = stmt.bind(":b", &1).unwrap_err();
        assert!(err.is_bind());
        assert!(err.message().contains(":b"));
    }

    #[test]
    fn test_bind_out_of_range_index_fails() {
        let db = db();
        let stmt = db.prepare("SELECT ?").unwrap();
        let err = stmt.bind(2, &1).unwrap_err();
        assert!(err.is_bind());
        assert_eq!(err.code(), Some(ffi::SQLITE_RANGE));
    }

    #[test]
    fn test_parameter_introspection() {
        let db = db();
        let stmt = db
            .prepare("INSERT INTO t (i, f, s) VALUES (:i, @f, $s)")
            .unwrap();
        assert_eq!(stmt.parameter_count(), 3);
        assert_eq!(stmt.parameter_name(2).as_deref(), Some("@f"));
        assert_eq!(stmt.parameter_index("$s"), Some(3));
        assert_eq!(stmt.parameter_index("s"), None);
    }

    #[test]
    fn test_column_introspection() {
        let db = db();
        let stmt = db.prepare("SELECT i, s AS label FROM t").unwrap();
        assert_eq!(stmt.column_count(), 2);
        assert_eq!(stmt.column_names(), vec!["i".to_string(), "label".to_string()]);
        assert_eq!(stmt.column_declared_type(0).as_deref(), Some("INTEGER"));
        assert_eq!(stmt.column_name(5), None);
    }

    #[test]
    fn test_rows_iterate_once() {
        let db = db();
        db.execute("INSERT INTO t (i) VALUES (1), (2), (3)").unwrap();
        let stmt = db.prepare("SELECT i FROM t ORDER BY i").unwrap();

        let values: Vec<i64> = stmt
            .rows()
            .map(|row| row.and_then(|r| r.get(0)))
            .collect::<SqliteResult<_>>()
            .unwrap();
        assert_eq!(values, vec![1, 2, 3]);
        assert_eq!(stmt.state(), StatementState::Done);
        assert_eq!(stmt.rows().count(), 0);
    }

    #[test]
    fn test_range_style_access() {
        let db = db();
        db.execute("INSERT INTO t (i) VALUES (10), (20)").unwrap();
        let stmt = db.prepare("SELECT i FROM t ORDER BY i").unwrap();

        let mut rows = stmt.rows();
        assert_eq!(stmt.state(), StatementState::Fresh);
        assert!(!rows.is_empty().unwrap());
        assert_eq!(rows.front().unwrap().get::<i64>(0).unwrap(), 10);
        rows.pop_front().unwrap();
        assert_eq!(rows.front().unwrap().get::<i64>(0).unwrap(), 20);
        rows.pop_front().unwrap();
        assert!(rows.is_empty().unwrap());
        assert!(rows.front().unwrap_err().is_empty_result());
        assert!(rows.pop_front().unwrap_err().is_empty_result());
    }

    #[test]
    fn test_execute_steps_once() {
        let db = db();
        db.execute("INSERT INTO t (i) VALUES (1), (2)").unwrap();
        let stmt = db.prepare("SELECT i FROM t ORDER BY i").unwrap();

        let rows = stmt.execute().unwrap();
        assert_eq!(rows.front().unwrap().get::<i64>(0).unwrap(), 1);
        let rows = stmt.execute().unwrap();
        assert_eq!(rows.front().unwrap().get::<i64>(0).unwrap(), 2);
        assert!(stmt.execute().unwrap().is_empty().unwrap());
    }

    #[test]
    fn test_one_value() {
        let db = db();
        let stmt = db.prepare("SELECT 6 * 7").unwrap();
        assert_eq!(stmt.one_value::<i64>().unwrap(), 42);

        let stmt = db.prepare("SELECT i FROM t").unwrap();
        assert!(stmt.one_value::<i64>().unwrap_err().is_empty_result());
    }

    #[test]
    fn test_reset_keeps_bindings_and_clear_nulls_them() {
        let db = db();
        let insert = db.prepare("INSERT INTO t (i, s) VALUES (?, ?)").unwrap();
        insert.bind(1, &7).unwrap();
        insert.bind(2, "seven").unwrap();
        insert.execute().unwrap();
        insert.reset().unwrap();
        insert.execute().unwrap();
        insert.reset().unwrap();
        insert.clear_bindings().unwrap();
        insert.execute().unwrap();

        let rows = db
            .prepare("SELECT i, s FROM t ORDER BY rowid")
            .unwrap()
            .fetch_all()
            .unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Value::Integer(7), Value::Text("seven".into())],
                vec![Value::Integer(7), Value::Text("seven".into())],
                vec![Value::Null, Value::Null],
            ]
        );
    }

    #[test]
    fn test_fetch_all_returns_fresh_buffers() {
        let db = db();
        db.execute("INSERT INTO t (i) VALUES (1), (2)").unwrap();
        let first = db.prepare("SELECT i FROM t ORDER BY i").unwrap();
        let second = db.prepare("SELECT i * 10 FROM t ORDER BY i").unwrap();

        let a = first.fetch_all().unwrap();
        let b = second.fetch_all().unwrap();
        assert_eq!(a, vec![vec![Value::Integer(1)], vec![Value::Integer(2)]]);
        assert_eq!(b, vec![vec![Value::Integer(10)], vec![Value::Integer(20)]]);
        assert_eq!(first.state(), StatementState::Fresh);
        assert_eq!(first.fetch_all().unwrap(), a);
    }

    #[test]
    fn test_inject() {
        let db = db();
        let insert = db.prepare("INSERT INTO t (i, s) VALUES (?, ?)").unwrap();
        insert.inject(&[&1, &"one"]).unwrap();
        insert.inject(&[&2, &Null]).unwrap();

        let stmt = db.prepare("SELECT count(*), count(s) FROM t").unwrap();
        let row = stmt.rows().front().unwrap();
        assert_eq!(row.get::<i64>(0).unwrap(), 2);
        assert_eq!(row.get::<i64>(1).unwrap(), 1);
    }

    #[test]
    fn test_rows_debug() {
        let db = db();
        let stmt = db.prepare("SELECT 1").unwrap();
        let rows = stmt.rows();
        assert_eq!(
            format!("{:?}", rows),
            r#"Rows { sql: "SELECT 1", state: Fresh }"#
        );
    }

    #[test]
    fn test_step_error_is_reported_after_reset() {
        let db = db();
        db.execute("CREATE TABLE u (x INTEGER NOT NULL)").unwrap();
        let stmt = db.prepare("INSERT INTO u (x) VALUES (?)").unwrap();
        stmt.bind(1, &Null).unwrap();

        let err = stmt.execute().unwrap_err();
        assert!(err.is_step());
        assert!(err.is_constraint());
        assert!(err.message().contains("NOT NULL"));
        assert_eq!(stmt.state(), StatementState::Fresh);
    }

    #[test]
    fn test_iterator_stops_after_error() {
        let db = db();
        db.execute("CREATE TABLE u (x INTEGER NOT NULL)").unwrap();
        let stmt = db.prepare("INSERT INTO u (x) VALUES (NULL)").unwrap();

        let mut rows = stmt.rows();
        assert!(rows.next().unwrap().is_err());
        assert!(rows.next().is_none());
    }

    #[test]
    fn test_clones_share_cursor() {
        let db = db();
        db.execute("INSERT INTO t (i) VALUES (1), (2)").unwrap();
        let stmt = db.prepare("SELECT i FROM t ORDER BY i").unwrap();
        let other = stmt.clone();

        stmt.execute().unwrap();
        assert_eq!(other.state(), StatementState::Row);
        assert_eq!(other.one_value::<i64>().unwrap(), 1);
    }

    #[test]
    #[should_panic(expected = "used after")]
    fn test_finalized_statement_panics() {
        let db = db();
        let stmt = db.prepare("SELECT 1").unwrap();
        let other = stmt.clone();
        stmt.finalize().unwrap();
        db.close().unwrap();
        let _ = other.execute();
    }
}
