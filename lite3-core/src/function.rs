//! User-defined functions, aggregates and collations.
//!
//! Every registration boxes the host closure, hands the box to the engine as
//! user data together with a destructor, and installs a generic `extern "C"`
//! trampoline that decodes arguments into [`Value`]s, checks them against the
//! [`Signature`], calls the closure and encodes its result. Errors and panics
//! raised by the closure are reported to the engine as function errors and
//! never unwind across the FFI boundary.
//!
//! ```rust
//! use lite3_core::{ArgType, Database, Signature};
//!
//! let db = Database::open_in_memory()?;
//! db.create_function(
//!     "halve",
//!     Signature::new([ArgType::Float]).deterministic(),
//!     |args| Ok(args.get::<f64>(0)? / 2.0),
//! )?;
//! assert_eq!(db.prepare("SELECT halve(5)")?.one_value::<f64>()?, 2.5);
//! # Ok::<_, lite3_core::SqliteError>(())
//! ```

use std::any::Any;
use std::cmp::Ordering;
use std::ffi::CString;
use std::fmt;
use std::mem;
use std::ops::BitOr;
use std::os::raw::{c_int, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::thread;

use rusqlite::ffi;
use tracing::{debug, warn};

use crate::connection::Database;
use crate::error::{SqliteError, SqliteResult, code_description};
use crate::statement::raw_bytes;
use crate::value::{FromValue, Value, ValueType};

/// Expected type of one function argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgType {
    /// INTEGER.
    Integer,
    /// REAL; INTEGER arguments are accepted and widened.
    Float,
    /// TEXT.
    Text,
    /// BLOB.
    Blob,
    /// Any storage class.
    Any,
}

impl ArgType {
    /// Check if a value of type `actual` is acceptable. NULL always is.
    pub fn accepts(&self, actual: ValueType) -> bool {
        matches!(
            (self, actual),
            (_, ValueType::Null)
                | (Self::Any, _)
                | (Self::Integer, ValueType::Integer)
                | (Self::Float, ValueType::Float | ValueType::Integer)
                | (Self::Text, ValueType::Text)
                | (Self::Blob, ValueType::Blob)
        )
    }

    /// Get the type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Float => "FLOAT",
            Self::Text => "TEXT",
            Self::Blob => "BLOB",
            Self::Any => "ANY",
        }
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flags passed as the text representation of a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionFlags(c_int);

impl FunctionFlags {
    /// Arguments and results are UTF-8. Always set.
    pub const UTF8: Self = Self(ffi::SQLITE_UTF8);
    /// Same inputs always give the same output.
    pub const DETERMINISTIC: Self = Self(ffi::SQLITE_DETERMINISTIC);
    /// Only callable from top-level SQL.
    pub const DIRECTONLY: Self = Self(ffi::SQLITE_DIRECTONLY);
    /// Free of side effects; usable from schema objects.
    pub const INNOCUOUS: Self = Self(ffi::SQLITE_INNOCUOUS);

    /// The raw bits.
    pub fn bits(&self) -> c_int {
        self.0
    }

    /// Check if every flag in `other` is set.
    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for FunctionFlags {
    fn default() -> Self {
        Self::UTF8
    }
}

impl BitOr for FunctionFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Parameter-type descriptor of a function or aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    args: Vec<ArgType>,
    variadic: Option<ArgType>,
    flags: FunctionFlags,
}

impl Signature {
    /// Exactly the given arguments, in order.
    pub fn new(args: impl IntoIterator<Item = ArgType>) -> Self {
        Self {
            args: args.into_iter().collect(),
            variadic: None,
            flags: FunctionFlags::UTF8,
        }
    }

    /// Any number of arguments, each of type `ty`.
    pub fn variadic(ty: ArgType) -> Self {
        Self {
            args: Vec::new(),
            variadic: Some(ty),
            flags: FunctionFlags::UTF8,
        }
    }

    /// Mark the function deterministic.
    pub fn deterministic(self) -> Self {
        self.flags(FunctionFlags::DETERMINISTIC)
    }

    /// Add `flags`. UTF-8 stays set.
    pub fn flags(mut self, flags: FunctionFlags) -> Self {
        self.flags = self.flags | flags | FunctionFlags::UTF8;
        self
    }

    /// Native arity; -1 for variadic.
    pub fn arity(&self) -> c_int {
        match self.variadic {
            Some(_) => -1,
            None => c_int::try_from(self.args.len()).unwrap_or(c_int::MAX),
        }
    }

    /// Registration flags.
    pub fn function_flags(&self) -> FunctionFlags {
        self.flags
    }

    fn expected(&self, index: usize) -> ArgType {
        self.variadic
            .or_else(|| self.args.get(index).copied())
            .unwrap_or(ArgType::Any)
    }
}

/// Decoded arguments of one native call.
#[derive(Debug, Clone, PartialEq)]
pub struct Arguments {
    values: Vec<Value>,
}

impl Arguments {
    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if there are no arguments.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The raw argument at `index`.
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Decode the argument at `index` as `T`.
    pub fn get<T: FromValue>(&self, index: usize) -> SqliteResult<T> {
        self.values
            .get(index)
            .ok_or_else(|| SqliteError::function(format!("missing argument {}", index + 1)))?
            .get()
    }

    /// Decode the argument at `index` as `T`, yielding `default` for NULL.
    pub fn get_or<T: FromValue>(&self, index: usize, default: T) -> SqliteResult<T> {
        self.values
            .get(index)
            .ok_or_else(|| SqliteError::function(format!("missing argument {}", index + 1)))?
            .get_or(default)
    }

    /// Iterate the arguments in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.values.iter()
    }
}

impl<'a> IntoIterator for &'a Arguments {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

/// Per-group state of a user-defined aggregate.
///
/// A fresh state is created for every group on its first row and consumed by
/// [`Aggregate::finalize`]. Groups without rows finalize a fresh state.
pub trait Aggregate: 'static {
    /// Result type.
    type Output: Into<Value>;

    /// Accumulate one row.
    fn step(&mut self, args: &Arguments) -> SqliteResult<()>;

    /// Produce the group's result.
    fn finalize(self) -> SqliteResult<Self::Output>;
}

struct ScalarFunction<F> {
    name: String,
    signature: Signature,
    func: F,
}

struct AggregateFunction<I> {
    name: String,
    signature: Signature,
    init: I,
}

struct Collation<F> {
    name: String,
    compare: F,
}

impl Database {
    /// Register a scalar SQL function.
    ///
    /// Re-registering a name with the same arity replaces the previous
    /// function.
    pub fn create_function<F, R>(
        &self,
        name: &str,
        signature: Signature,
        func: F,
    ) -> SqliteResult<()>
    where
        F: Fn(&Arguments) -> SqliteResult<R> + 'static,
        R: Into<Value>,
    {
        let c_name = registration_name(name)?;
        let (arity, flags) = (signature.arity(), signature.flags.bits());
        let user_data = Box::into_raw(Box::new(ScalarFunction {
            name: name.to_string(),
            signature,
            func,
        }));

        // SAFETY: the engine owns user_data from here on and releases it
        // through drop_boxed, including when registration fails.
        let rc = unsafe {
            ffi::sqlite3_create_function_v2(
                self.as_ptr(),
                c_name.as_ptr(),
                arity,
                flags,
                user_data.cast(),
                Some(call_scalar::<F, R>),
                None,
                None,
                Some(drop_boxed::<ScalarFunction<F>>),
            )
        };
        self.registered(name, rc)
    }

    /// Register an aggregate SQL function whose per-group state is built
    /// by `init`.
    pub fn create_aggregate<A, I>(
        &self,
        name: &str,
        signature: Signature,
        init: I,
    ) -> SqliteResult<()>
    where
        A: Aggregate,
        I: Fn() -> A + 'static,
    {
        let c_name = registration_name(name)?;
        let (arity, flags) = (signature.arity(), signature.flags.bits());
        let user_data = Box::into_raw(Box::new(AggregateFunction {
            name: name.to_string(),
            signature,
            init,
        }));

        // SAFETY: as for create_function.
        let rc = unsafe {
            ffi::sqlite3_create_function_v2(
                self.as_ptr(),
                c_name.as_ptr(),
                arity,
                flags,
                user_data.cast(),
                None,
                Some(aggregate_step::<A, I>),
                Some(aggregate_final::<A, I>),
                Some(drop_boxed::<AggregateFunction<I>>),
            )
        };
        self.registered(name, rc)
    }

    /// Register a collating sequence usable in `COLLATE name`.
    ///
    /// `compare` must define a strict total order.
    pub fn create_collation<F>(&self, name: &str, compare: F) -> SqliteResult<()>
    where
        F: Fn(&str, &str) -> Ordering + 'static,
    {
        let c_name = registration_name(name)?;
        let user_data = Box::into_raw(Box::new(Collation {
            name: name.to_string(),
            compare,
        }));

        // SAFETY: on success the engine releases user_data through
        // drop_boxed; on failure it does not, so it is freed below.
        let rc = unsafe {
            ffi::sqlite3_create_collation_v2(
                self.as_ptr(),
                c_name.as_ptr(),
                ffi::SQLITE_UTF8,
                user_data.cast(),
                Some(compare_strings::<F>),
                Some(drop_boxed::<Collation<F>>),
            )
        };
        if rc != ffi::SQLITE_OK {
            // SAFETY: the engine did not take ownership.
            drop(unsafe { Box::from_raw(user_data) });
        }
        self.registered(name, rc)
    }

    fn registered(&self, name: &str, rc: c_int) -> SqliteResult<()> {
        if rc != ffi::SQLITE_OK {
            return Err(SqliteError::function(format!(
                "cannot register '{}': {}",
                name,
                code_description(rc)
            ))
            .with_code(rc));
        }
        debug!(name = %name, "Registered SQL extension");
        Ok(())
    }
}

fn registration_name(name: &str) -> SqliteResult<CString> {
    CString::new(name)
        .map_err(|_| SqliteError::function(format!("name contains a NUL byte: {:?}", name)))
}

unsafe extern "C" fn call_scalar<F, R>(
    ctx: *mut ffi::sqlite3_context,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
) where
    F: Fn(&Arguments) -> SqliteResult<R> + 'static,
    R: Into<Value>,
{
    // SAFETY: user data is the ScalarFunction boxed by create_function.
    let function = unsafe { &*(ffi::sqlite3_user_data(ctx) as *const ScalarFunction<F>) };
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: argv holds argc protected values for this call.
        let args = unsafe { decode_arguments(&function.name, &function.signature, argc, argv) }?;
        (function.func)(&args).map(Into::into)
    }));
    // SAFETY: ctx is the live context of this call.
    unsafe { report(ctx, &function.name, outcome) };
}

unsafe extern "C" fn aggregate_step<A, I>(
    ctx: *mut ffi::sqlite3_context,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
) where
    A: Aggregate,
    I: Fn() -> A + 'static,
{
    // SAFETY: user data is the AggregateFunction boxed by create_aggregate.
    let function = unsafe { &*(ffi::sqlite3_user_data(ctx) as *const AggregateFunction<I>) };
    // SAFETY: the engine zero-fills the slot on first use within a group.
    let slot = unsafe { ffi::sqlite3_aggregate_context(ctx, mem::size_of::<*mut A>() as c_int) }
        as *mut *mut A;
    if slot.is_null() {
        // SAFETY: ctx is live.
        unsafe { ffi::sqlite3_result_error_nomem(ctx) };
        return;
    }

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: argv holds argc protected values for this call.
        let args = unsafe { decode_arguments(&function.name, &function.signature, argc, argv) }?;
        // SAFETY: slot is either null or holds the state boxed below for
        // this group.
        let state = unsafe {
            if (*slot).is_null() {
                *slot = Box::into_raw(Box::new((function.init)()));
            }
            &mut **slot
        };
        state.step(&args)
    }));

    match outcome {
        Ok(Ok(())) => {}
        // SAFETY: ctx is live.
        other => unsafe {
            report(ctx, &function.name, other.map(|r| r.map(|()| Value::Null)));
        },
    }
}

unsafe extern "C" fn aggregate_final<A, I>(ctx: *mut ffi::sqlite3_context)
where
    A: Aggregate,
    I: Fn() -> A + 'static,
{
    // SAFETY: user data is the AggregateFunction boxed by create_aggregate.
    let function = unsafe { &*(ffi::sqlite3_user_data(ctx) as *const AggregateFunction<I>) };
    // SAFETY: a zero size only looks up an existing slot.
    let slot = unsafe { ffi::sqlite3_aggregate_context(ctx, 0) } as *mut *mut A;
    // SAFETY: a non-null pointer in the slot came from Box::into_raw in
    // aggregate_step and is taken out exactly once here.
    let state = unsafe {
        if slot.is_null() || (*slot).is_null() {
            None
        } else {
            let state = Box::from_raw(*slot);
            *slot = ptr::null_mut();
            Some(*state)
        }
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let state = state.unwrap_or_else(|| (function.init)());
        state.finalize().map(Into::into)
    }));
    // SAFETY: ctx is live.
    unsafe { report(ctx, &function.name, outcome) };
}

unsafe extern "C" fn compare_strings<F>(
    user_data: *mut c_void,
    left_len: c_int,
    left: *const c_void,
    right_len: c_int,
    right: *const c_void,
) -> c_int
where
    F: Fn(&str, &str) -> Ordering + 'static,
{
    // SAFETY: user data is the Collation boxed by create_collation.
    let collation = unsafe { &*(user_data as *const Collation<F>) };
    // SAFETY: each pointer/length pair describes a byte range that is valid
    // for the duration of the call.
    let (left, right) = unsafe {
        (
            raw_bytes(left.cast(), left_len),
            raw_bytes(right.cast(), right_len),
        )
    };
    // Text that is not valid UTF-8 falls back to byte order.
    let (left, right) = match (std::str::from_utf8(left), std::str::from_utf8(right)) {
        (Ok(left), Ok(right)) => (left, right),
        _ => return left.cmp(right) as c_int,
    };

    match panic::catch_unwind(AssertUnwindSafe(|| (collation.compare)(left, right))) {
        Ok(ordering) => ordering as c_int,
        Err(payload) => {
            warn!(
                collation = %collation.name,
                panic = %panic_message(payload.as_ref()),
                "Collation panicked; treating values as equal"
            );
            0
        }
    }
}

unsafe extern "C" fn drop_boxed<T>(user_data: *mut c_void) {
    // SAFETY: user_data was produced by Box::into_raw for a T.
    drop(unsafe { Box::from_raw(user_data as *mut T) });
}

/// # Safety
///
/// `argv` must hold `argc` valid, protected values.
unsafe fn decode_arguments(
    name: &str,
    signature: &Signature,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
) -> SqliteResult<Arguments> {
    let count = usize::try_from(argc).unwrap_or(0);
    let mut values = Vec::with_capacity(count);
    for i in 0..count {
        // SAFETY: i < argc.
        let value = unsafe { decode_value(*argv.add(i)) };
        let expected = signature.expected(i);
        if !expected.accepts(value.value_type()) {
            return Err(SqliteError::function(format!(
                "argument {} of {}() must be {}, got {}",
                i + 1,
                name,
                expected,
                value.value_type()
            )));
        }
        values.push(match (expected, value) {
            (ArgType::Float, Value::Integer(n)) => Value::Float(n as f64),
            (_, value) => value,
        });
    }
    Ok(Arguments { values })
}

/// # Safety
///
/// `value` must be a valid, protected value.
unsafe fn decode_value(value: *mut ffi::sqlite3_value) -> Value {
    // SAFETY: guaranteed by the caller. Text/blob pointers are read before
    // the byte count and copied at once.
    unsafe {
        match ffi::sqlite3_value_type(value) {
            ffi::SQLITE_INTEGER => Value::Integer(ffi::sqlite3_value_int64(value)),
            ffi::SQLITE_FLOAT => Value::Float(ffi::sqlite3_value_double(value)),
            ffi::SQLITE_TEXT => {
                let ptr = ffi::sqlite3_value_text(value);
                let len = ffi::sqlite3_value_bytes(value);
                Value::Text(String::from_utf8_lossy(raw_bytes(ptr.cast(), len)).into_owned())
            }
            ffi::SQLITE_BLOB => {
                let ptr = ffi::sqlite3_value_blob(value);
                let len = ffi::sqlite3_value_bytes(value);
                Value::Blob(raw_bytes(ptr.cast(), len).to_vec())
            }
            _ => Value::Null,
        }
    }
}

/// Hand the outcome of a host call to the engine.
///
/// # Safety
///
/// `ctx` must be the live context of the current call.
unsafe fn report(
    ctx: *mut ffi::sqlite3_context,
    name: &str,
    outcome: thread::Result<SqliteResult<Value>>,
) {
    // SAFETY: guaranteed by the caller.
    unsafe {
        match outcome {
            Ok(Ok(value)) => set_result(ctx, &value),
            Ok(Err(err)) => {
                warn!(function = %name, error = %err, "SQL function failed");
                set_error(ctx, err.message());
            }
            Err(payload) => {
                let message = format!("{}() panicked: {}", name, panic_message(payload.as_ref()));
                warn!(function = %name, "{}", message);
                set_error(ctx, &message);
            }
        }
    }
}

/// # Safety
///
/// `ctx` must be live.
unsafe fn set_result(ctx: *mut ffi::sqlite3_context, value: &Value) {
    // SAFETY: guaranteed by the caller; text and blob are copied by the
    // engine (SQLITE_TRANSIENT).
    unsafe {
        match value {
            Value::Null => ffi::sqlite3_result_null(ctx),
            Value::Integer(i) => ffi::sqlite3_result_int64(ctx, *i),
            Value::Float(f) => ffi::sqlite3_result_double(ctx, *f),
            Value::Text(s) => match c_int::try_from(s.len()) {
                Ok(len) => {
                    ffi::sqlite3_result_text(ctx, s.as_ptr().cast(), len, ffi::SQLITE_TRANSIENT())
                }
                Err(_) => ffi::sqlite3_result_error_toobig(ctx),
            },
            Value::Blob(b) if b.is_empty() => ffi::sqlite3_result_null(ctx),
            Value::Blob(b) => match c_int::try_from(b.len()) {
                Ok(len) => {
                    ffi::sqlite3_result_blob(ctx, b.as_ptr().cast(), len, ffi::SQLITE_TRANSIENT())
                }
                Err(_) => ffi::sqlite3_result_error_toobig(ctx),
            },
        }
    }
}

/// # Safety
///
/// `ctx` must be live.
unsafe fn set_error(ctx: *mut ffi::sqlite3_context, message: &str) {
    let len = c_int::try_from(message.len()).unwrap_or(c_int::MAX);
    // SAFETY: guaranteed by the caller; the message is copied.
    unsafe { ffi::sqlite3_result_error(ctx, message.as_ptr().cast(), len) };
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
