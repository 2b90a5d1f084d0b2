//! Runtime errors. A runtime error aborts the executing coroutine with a
//! diagnostic payload; there is no user-level catch.

use std::fmt;

/// Result type for operations that can raise at runtime.
pub type VmResult<T> = Result<T, VmError>;

/// The closed set of runtime error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum VmErrorKind {
    /// Operator or operation applied to an unsupported type.
    Type,
    DivideByZero,
    /// Integer arithmetic overflowed. All overflow traps; nothing saturates.
    IntegerOverflow,
    OutOfBounds,
    MissingMember,
    MissingMethod,
    MissingKey,
    NotCallable,
    WrongArgumentCount,
    StackOverflow,
    OutOfMemory,
    AssertionFailed,
    ImportFailed,
    UnknownExport,
}

/// A runtime error: category plus rendered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmError {
    pub kind: VmErrorKind,
    pub message: String,
}

impl VmError {
    #[must_use]
    pub fn new(kind: VmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(VmErrorKind::Type, message)
    }

    #[must_use]
    pub fn divide_by_zero() -> Self {
        Self::new(VmErrorKind::DivideByZero, "division by zero")
    }

    #[must_use]
    pub fn integer_overflow() -> Self {
        Self::new(VmErrorKind::IntegerOverflow, "integer overflow")
    }

    pub fn out_of_bounds(index: i64, len: usize) -> Self {
        Self::new(
            VmErrorKind::OutOfBounds,
            format!("index {index} is out of bounds for length {len}"),
        )
    }

    pub fn missing_member(type_name: &str, name: &str) -> Self {
        Self::new(
            VmErrorKind::MissingMember,
            format!("{type_name} value has no member '{name}'"),
        )
    }

    pub fn missing_method(type_name: &str, name: &str) -> Self {
        Self::new(
            VmErrorKind::MissingMethod,
            format!("{type_name} value has no method '{name}'"),
        )
    }

    pub fn not_callable(type_name: &str) -> Self {
        Self::new(VmErrorKind::NotCallable, format!("{type_name} values are not callable"))
    }

    pub fn wrong_argument_count(expected: u32, got: usize) -> Self {
        Self::new(
            VmErrorKind::WrongArgumentCount,
            format!("function expects {expected} arguments, got {got}"),
        )
    }

    #[must_use]
    pub fn stack_overflow() -> Self {
        Self::new(VmErrorKind::StackOverflow, "coroutine stack overflow")
    }

    #[must_use]
    pub fn out_of_memory() -> Self {
        Self::new(VmErrorKind::OutOfMemory, "heap exhausted")
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for VmError {}
