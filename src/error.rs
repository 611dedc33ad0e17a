//! Stable error taxonomy shared by every layer of the storage core.
//!
//! Every fallible operation in the crate returns [`Result<T>`], a thin alias
//! over `std::result::Result<T, DbError>`. `DbError` carries one of the
//! seven stable [`ErrorCode`] variants plus a human-readable message and
//! optional extra context (e.g. the page id involved), so that callers
//! (including the external SQL layer and language bindings) can pattern
//! match on `code` without depending on message text.

/// Stable, externally-visible error classification. Bindings should match on
/// this enum, not on `message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Underlying VFS failure, including injected failpoints.
    Io,
    /// An on-disk format invariant was violated (bad magic, checksum
    /// mismatch, invalid page type, out-of-range length or pointer).
    Corruption,
    /// Semantic/validation error surfaced by storage: constraint violation
    /// or type mismatch. Named `Sql` for parity with the spec's taxonomy,
    /// even though this crate has no SQL parser of its own.
    Sql,
    /// No active transaction, writer-lock misuse, or a reader aborted by
    /// timeout/WAL-pinning limits.
    Transaction,
    /// A memory-bounded operation (sort/aggregate) exceeded its budget.
    /// Raised by operators built on top of this crate, not by the core
    /// itself, but the variant lives here so the taxonomy is complete.
    MemoryLimit,
    /// Invariant violated / unreachable state. Indicates a bug.
    Internal,
}

/// A storage-core error: stable `code`, human message, optional context.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code:?}: {message}{}", context.as_deref().map(|c| format!(" ({c})")).unwrap_or_default())]
pub struct DbError {
    pub code: ErrorCode,
    pub message: String,
    pub context: Option<String>,
}

impl DbError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Io, message)
    }

    pub fn corruption(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Corruption, message)
    }

    /// Constraint violations use the stable `"Unique constraint failed: ..."`
    /// style message prefixes documented in §7 so bindings can pattern
    /// match on message text when they must (legacy shims, user-facing
    /// CLI output) in addition to `code`.
    pub fn sql(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Sql, message)
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Transaction, message)
    }

    pub fn memory_limit(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::MemoryLimit, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

impl From<std::io::Error> for DbError {
    fn from(err: std::io::Error) -> Self {
        DbError::io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
