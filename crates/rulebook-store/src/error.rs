use thiserror::Error;

/// Errors surfaced by the adapter and its storage backends.
///
/// Storage failures are carried verbatim: callers match on the inner
/// `sqlx::Error` when they need to tell a constraint violation from a lost
/// connection.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("schema bootstrap failed: {0}")]
    Schema(#[source] sqlx::Error),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("operation deadline exceeded")]
    DeadlineExceeded,
    #[error("malformed record: {0}")]
    MalformedRecord(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// Whether this error reports a duplicate `(ptype, v0..v5)` row.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            StoreError::Conflict(_) => true,
            StoreError::Database(err) => is_unique_violation(err),
            _ => false,
        }
    }
}

impl From<StoreError> for casbin::Error {
    fn from(err: StoreError) -> Self {
        casbin::Error::from(casbin::error::AdapterError(Box::new(err)))
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().map(|code| code == "23505").unwrap_or(false);
    }
    false
}
