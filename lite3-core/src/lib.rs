//! Reference-counted, iterator-based binding over the SQLite C interface.
//!
//! This crate wraps the bundled SQLite library (through `rusqlite::ffi`) with
//! a small, strongly typed API:
//!
//! - [`Database`] - a shared connection handle
//! - [`Statement`] - a prepared statement with typed parameter binding
//! - [`Rows`] / [`Row`] / [`Column`] - lazy result iteration and decoding
//! - [`Database::create_function`], [`Database::create_aggregate`] and
//!   [`Database::create_collation`] - host closures callable from SQL
//! - [`literal`] - rendering host values as SQL literals
//!
//! Connections and statements are reference counted: clones share the
//! native handle, which is released exactly once. They are bound to the
//! thread that created them.
//!
//! # Example
//!
//! ```rust
//! use lite3_core::Database;
//!
//! let db = Database::open_in_memory()?;
//! db.execute("CREATE TABLE person (name TEXT, age INTEGER)")?;
//!
//! let insert = db.prepare("INSERT INTO person VALUES (:name, :age)")?;
//! insert.inject(&[&"ada", &36])?;
//! insert.inject(&[&"alan", &41])?;
//!
//! let stmt = db.prepare("SELECT name, age FROM person ORDER BY age")?;
//! for row in stmt.rows() {
//!     let row = row?;
//!     let name: String = row.get("name")?;
//!     let age: i64 = row.get(1)?;
//!     println!("{} is {}", name, age);
//! }
//! # Ok::<_, lite3_core::SqliteError>(())
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod function;
mod handle;
pub mod literal;
pub mod logging;
pub mod row;
pub mod statement;
pub mod types;
pub mod value;

pub use config::{DatabaseConfig, DatabasePath, JournalMode, OpenFlags, SynchronousMode};
pub use connection::{Database, is_threadsafe, sqlite_version, sqlite_version_number};
pub use error::{ErrorKind, SqliteError, SqliteResult};
pub use function::{Aggregate, ArgType, Arguments, FunctionFlags, Signature};
pub use handle::StatementState;
pub use literal::literal;
pub use row::{Column, ColumnIndex, Row};
pub use statement::{ParameterIndex, Rows, Statement};
pub use types::{BindValue, Null, ToSql};
pub use value::{FromValue, Value, ValueType};
