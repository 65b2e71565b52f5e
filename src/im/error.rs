//! Error types shared by every DAO and service
//!
//! Each variant belongs to one [`ErrorKind`]; callers decide how to surface a
//! failure (denial, retry notice, inline validation message) from the kind alone.

use thiserror::Error;

/// Coarse classification of a [`ChatError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operation attempted by an unauthenticated or non-participant identity
    Authorization,
    /// Input rejected before any storage call
    Validation,
    /// Target row missing or already in a terminal state
    State,
    /// Constraint conflict that could not be resolved by re-reading
    Conflict,
    /// Storage or filesystem failure, safe to retry by the user
    Transient,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("not authenticated")]
    Unauthenticated,

    #[error("permission denied: {0}")]
    Forbidden(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("already resolved: {0}")]
    AlreadyResolved(String),

    #[error("unresolved conflict: {0}")]
    Conflict(String),

    #[error("storage error while {context}: {source}")]
    Storage {
        context: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

pub type Result<T> = std::result::Result<T, ChatError>;

impl ChatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::Unauthenticated | ChatError::Forbidden(_) => ErrorKind::Authorization,
            ChatError::Validation(_) => ErrorKind::Validation,
            ChatError::NotFound(_) | ChatError::AlreadyExists(_) | ChatError::AlreadyResolved(_) => {
                ErrorKind::State
            }
            ChatError::Conflict(_) => ErrorKind::Conflict,
            ChatError::Storage { .. } | ChatError::Io(_) | ChatError::Migrate(_) => {
                ErrorKind::Transient
            }
        }
    }

    /// Only transient failures are worth offering a retry for.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// True when the underlying database rejected a write on a UNIQUE constraint.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            ChatError::Storage {
                source: sqlx::Error::Database(db_err),
                ..
            } => db_err.is_unique_violation(),
            _ => false,
        }
    }
}

/// `.context(..)` for sqlx results, the typed counterpart of `anyhow::Context`.
pub trait DbResultExt<T> {
    fn context(self, context: &'static str) -> Result<T>;
}

impl<T> DbResultExt<T> for std::result::Result<T, sqlx::Error> {
    fn context(self, context: &'static str) -> Result<T> {
        self.map_err(|source| ChatError::Storage { context, source })
    }
}
