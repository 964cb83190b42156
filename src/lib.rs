//! # lite3
//!
//! A safe, reference-counted, iterator-based binding for SQLite.
//!
//! lite3 provides:
//! - Shared connection and statement handles that are released exactly once
//! - Typed parameter binding by position or by name
//! - Lazy row iteration with coercive column decoding
//! - Scalar functions, aggregates and collations written as Rust closures
//!
//! ## Quick Start
//!
//! ```rust
//! use lite3::prelude::*;
//!
//! fn main() -> SqliteResult<()> {
//!     let db = Database::open_in_memory()?;
//!     db.execute("CREATE TABLE kv (key TEXT PRIMARY KEY, value BLOB)")?;
//!
//!     let insert = db.prepare("INSERT INTO kv VALUES (?, ?)")?;
//!     insert.inject(&[&"greeting", &b"hello".to_vec()])?;
//!
//!     let value: Vec<u8> = db
//!         .query("SELECT value FROM kv WHERE key = ?", &[&"greeting"])?
//!         .one_value()?;
//!     assert_eq!(value, b"hello");
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use lite3_core::*;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use lite3_core::{
        Aggregate, ArgType, Arguments, Column, Database, DatabaseConfig, FromValue, Null, Row,
        Rows, Signature, SqliteError, SqliteResult, Statement, StatementState, ToSql, Value,
        ValueType, literal,
    };
}
