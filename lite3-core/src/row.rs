//! Result rows and decoded columns.

use std::ffi::CStr;
use std::fmt;
use std::os::raw::c_int;

use rusqlite::ffi;
use serde_json::{Map, Value as JsonValue};

use crate::error::{ErrorKind, SqliteError, SqliteResult};
use crate::handle::StatementState;
use crate::statement::Statement;
use crate::value::{FromValue, Value, ValueType};

/// A column position (0-based `usize`, relative to the row's window) or a
/// column name.
pub trait ColumnIndex {
    /// Resolve to an absolute column index of the statement.
    fn column_index(&self, row: &Row<'_>) -> SqliteResult<usize>;
}

impl ColumnIndex for usize {
    fn column_index(&self, row: &Row<'_>) -> SqliteResult<usize> {
        if *self < row.len() {
            Ok(row.front + self)
        } else {
            Err(SqliteError::new(
                ErrorKind::ColumnNotFound,
                format!("column index {} is out of range for a row of {} columns", self, row.len()),
            ))
        }
    }
}

impl ColumnIndex for &str {
    fn column_index(&self, row: &Row<'_>) -> SqliteResult<usize> {
        let stmt = row.checked_ptr();
        (row.front..row.back)
            .find(|&i| {
                // SAFETY: stmt is on a row and i is below column_count; the
                // name is compared before any further engine call.
                unsafe {
                    let name = ffi::sqlite3_column_name(stmt, i as c_int);
                    !name.is_null() && CStr::from_ptr(name).to_bytes() == self.as_bytes()
                }
            })
            .ok_or_else(|| SqliteError::column_not_found(*self))
    }
}

/// The current row of a [`Statement`].
///
/// A row is a window `[front, back)` over the result columns. It iterates
/// from both ends and shrinks as it goes; cloning it copies the window, not
/// the data.
///
/// A row is only valid while the statement stays on it: using a row after
/// the statement was stepped, reset or finalized panics.
#[derive(Clone)]
pub struct Row<'stmt> {
    stmt: &'stmt Statement,
    generation: u64,
    front: usize,
    back: usize,
}

impl<'stmt> Row<'stmt> {
    pub(crate) fn new(stmt: &'stmt Statement) -> Self {
        Self {
            stmt,
            generation: stmt.generation(),
            front: 0,
            back: stmt.column_count(),
        }
    }

    fn checked_ptr(&self) -> *mut ffi::sqlite3_stmt {
        assert!(
            self.stmt.generation() == self.generation && self.stmt.state() == StatementState::Row,
            "row of statement '{}' used after the statement moved on",
            self.stmt.sql()
        );
        self.stmt.as_ptr()
    }

    /// The statement this row belongs to.
    pub fn statement(&self) -> &'stmt Statement {
        self.stmt
    }

    /// Number of columns left in the window.
    pub fn len(&self) -> usize {
        self.back - self.front
    }

    /// True once every column has been consumed.
    pub fn is_empty(&self) -> bool {
        self.front == self.back
    }

    fn decode(&self, index: usize) -> Column {
        self.checked_ptr();
        Column {
            name: self.stmt.column_name(index).unwrap_or_default(),
            value: self.stmt.column_value(index),
        }
    }

    /// The column at `index`, by position or by name.
    ///
    /// Name lookup is a linear scan; the first column with a matching name
    /// wins.
    pub fn column(&self, index: impl ColumnIndex) -> SqliteResult<Column> {
        self.checked_ptr();
        let index = index.column_index(self)?;
        Ok(self.decode(index))
    }

    /// Decode the column at `index` as `T`.
    pub fn get<T: FromValue>(&self, index: impl ColumnIndex) -> SqliteResult<T> {
        self.column(index)?.get()
    }

    /// Decode the column at `index` as `T`, yielding `default` for NULL.
    pub fn get_or<T: FromValue>(&self, index: impl ColumnIndex, default: T) -> SqliteResult<T> {
        self.column(index)?.get_or(default)
    }

    /// Name of the column at the window-relative `index`.
    pub fn column_name(&self, index: usize) -> Option<String> {
        if index < self.len() {
            self.stmt.column_name(self.front + index)
        } else {
            None
        }
    }

    /// Names of the columns left in the window.
    pub fn column_names(&self) -> Vec<String> {
        (self.front..self.back)
            .map(|i| self.stmt.column_name(i).unwrap_or_default())
            .collect()
    }

    /// Values of the columns left in the window, without consuming them.
    pub fn values(&self) -> Vec<Value> {
        self.checked_ptr();
        (self.front..self.back)
            .map(|i| self.stmt.column_value(i))
            .collect()
    }

    /// The columns left in the window as a JSON object keyed by name.
    ///
    /// Later columns overwrite earlier ones with the same name.
    pub fn to_json(&self) -> JsonValue {
        let names = self.column_names();
        let mut map = Map::with_capacity(names.len());
        for (name, value) in names.into_iter().zip(self.values()) {
            map.insert(name, JsonValue::from(&value));
        }
        JsonValue::Object(map)
    }
}

impl Iterator for Row<'_> {
    type Item = Column;

    fn next(&mut self) -> Option<Column> {
        if self.front == self.back {
            return None;
        }
        let column = self.decode(self.front);
        self.front += 1;
        Some(column)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.len(), Some(self.len()))
    }
}

impl DoubleEndedIterator for Row<'_> {
    fn next_back(&mut self) -> Option<Column> {
        if self.front == self.back {
            return None;
        }
        self.back -= 1;
        Some(self.decode(self.back))
    }
}

impl ExactSizeIterator for Row<'_> {}

impl fmt::Debug for Row<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Row")
            .field("sql", &self.stmt.sql())
            .field("front", &self.front)
            .field("back", &self.back)
            .finish()
    }
}

/// One decoded column value together with its name.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    value: Value,
}

impl Column {
    /// Column name as reported by the engine.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The decoded value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Native storage class of the value.
    pub fn value_type(&self) -> ValueType {
        self.value.value_type()
    }

    /// Check if the value is NULL.
    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    /// Decode as `T`.
    pub fn get<T: FromValue>(&self) -> SqliteResult<T> {
        self.value.get().map_err(|e| self.annotate(e))
    }

    /// Decode as `T`, yielding `default` for NULL (and for empty text or
    /// blobs when `T` is a string or byte vector).
    pub fn get_or<T: FromValue>(&self, default: T) -> SqliteResult<T> {
        self.value.get_or(default).map_err(|e| self.annotate(e))
    }

    /// Take the decoded value.
    pub fn into_value(self) -> Value {
        self.value
    }

    fn annotate(&self, err: SqliteError) -> SqliteError {
        SqliteError::new(
            err.kind(),
            format!("column '{}': {}", self.name, err.message()),
        )
    }
}

impl From<Column> for Value {
    fn from(column: Column) -> Self {
        column.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Database;
    use pretty_assertions::assert_eq;

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.execute(
            "CREATE TABLE person (id INTEGER, name TEXT, score REAL, photo BLOB);
             INSERT INTO person VALUES (1, 'ada', 9.5, X'0102'), (2, NULL, NULL, NULL);",
        )
        .unwrap();
        db
    }

    #[test]
    fn test_get_by_position_and_name() {
        let db = db();
        let stmt = db.prepare("SELECT id, name, score, photo FROM person WHERE id = 1").unwrap();
        let row = stmt.rows().front().unwrap();
        assert_eq!(row.len(), 4);
        assert_eq!(row.get::<i64>(0).unwrap(), 1);
        assert_eq!(row.get::<String>("name").unwrap(), "ada");
        assert_eq!(row.get::<f64>("score").unwrap(), 9.5);
        assert_eq!(row.get::<Vec<u8>>(3).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_unknown_column() {
        let db = db();
        let stmt = db.prepare("SELECT id FROM person").unwrap();
        let row = stmt.rows().front().unwrap();
        let err = row.get::<i64>("nope").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ColumnNotFound);
        assert_eq!(row.get::<i64>(1).unwrap_err().kind(), ErrorKind::ColumnNotFound);
    }

    #[test]
    fn test_duplicate_names_first_wins() {
        let db = db();
        let stmt = db.prepare("SELECT 1 AS x, 2 AS x").unwrap();
        let row = stmt.rows().front().unwrap();
        assert_eq!(row.get::<i64>("x").unwrap(), 1);
    }

    #[test]
    fn test_null_handling() {
        let db = db();
        let stmt = db.prepare("SELECT name, score FROM person WHERE id = 2").unwrap();
        let row = stmt.rows().front().unwrap();
        assert!(row.get::<String>(0).unwrap_err().kind() == ErrorKind::Decode);
        assert_eq!(row.get::<Option<String>>(0).unwrap(), None);
        assert_eq!(row.get_or(0, "anon".to_string()).unwrap(), "anon");
        assert_eq!(row.get_or("score", 1.5).unwrap(), 1.5);
    }

    #[test]
    fn test_iterates_both_ends() {
        let db = db();
        let stmt = db.prepare("SELECT 1 AS a, 'two' AS b, 3.0 AS c").unwrap();
        let mut row = stmt.rows().front().unwrap();

        let first = row.next().unwrap();
        assert_eq!(first.name(), "a");
        assert_eq!(first.value(), &Value::Integer(1));
        let last = row.next_back().unwrap();
        assert_eq!(last.name(), "c");
        assert_eq!(last.value_type(), ValueType::Float);
        assert_eq!(row.len(), 1);
        assert_eq!(row.get::<String>(0).unwrap(), "two");
        assert_eq!(row.column_names(), vec!["b".to_string()]);
        assert_eq!(row.next().unwrap().into_value(), Value::Text("two".into()));
        assert!(row.next().is_none());
        assert!(row.next_back().is_none());
    }

    #[test]
    fn test_clone_keeps_window() {
        let db = db();
        let stmt = db.prepare("SELECT 1, 2, 3").unwrap();
        let row = stmt.rows().front().unwrap();
        let collected: Vec<i64> = row.clone().map(|c| c.get().unwrap()).collect();
        assert_eq!(collected, vec![1, 2, 3]);
        assert_eq!(row.len(), 3);
    }

    #[test]
    fn test_to_json() {
        let db = db();
        let stmt = db.prepare("SELECT id, name, photo FROM person ORDER BY id").unwrap();
        let rows: Vec<JsonValue> = stmt.rows().map(|r| r.unwrap().to_json()).collect();
        assert_eq!(
            rows,
            vec![
                serde_json::json!({"id": 1, "name": "ada", "photo": "0102"}),
                serde_json::json!({"id": 2, "name": null, "photo": null}),
            ]
        );
    }

    #[test]
    #[should_panic(expected = "moved on")]
    fn test_stale_row_panics() {
        let db = db();
        let stmt = db.prepare("SELECT id FROM person ORDER BY id").unwrap();
        let mut rows = stmt.rows();
        let first = rows.front().unwrap();
        rows.pop_front().unwrap();
        let _ = first.get::<i64>(0);
    }
}
