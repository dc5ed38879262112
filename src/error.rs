use std::{fmt, path::PathBuf, time::Duration};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{backend} embedding provider failed ({kind}): {message}")]
    Provider {
        backend: &'static str,
        kind: ProviderErrorKind,
        message: String,
    },

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("invalid input: {0}")]
    Validation(String),

    #[error(
        "embedding dimension mismatch: collection stores {expected}, \
         got {actual}"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("store error: {0}")]
    Store(String),

    #[error("store connection is closed")]
    Closed,

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

impl From<redb::TableError> for Error {
    fn from(err: redb::TableError) -> Self {
        match err {
            redb::TableError::TableDoesNotExist(table) => Error::NotFound {
                kind: "schema table",
                name: table,
            },
            other => Error::RedbTable(other),
        }
    }
}

/// Why an embedding backend rejected a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Auth,
    RateLimit,
    MalformedInput,
    Backend,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProviderErrorKind::Auth => "auth",
            ProviderErrorKind::RateLimit => "rate_limit",
            ProviderErrorKind::MalformedInput => "malformed_input",
            ProviderErrorKind::Backend => "backend",
        })
    }
}

/// Coarse error categories callers branch on when deciding whether to
/// retry, fix their input, or give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Provider,
    Store,
    NotFound,
    Validation,
    Timeout,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) | Error::DataDir(_) => ErrorKind::Configuration,
            Error::Provider { .. } => ErrorKind::Provider,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Validation(_) | Error::DimensionMismatch { .. } => {
                ErrorKind::Validation
            }
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Io(_)
            | Error::Json(_)
            | Error::Redb(_)
            | Error::RedbDatabase(_)
            | Error::RedbStorage(_)
            | Error::RedbTransaction(_)
            | Error::RedbTable(_)
            | Error::RedbCommit(_)
            | Error::AlreadyExists { .. }
            | Error::Store(_)
            | Error::Closed => ErrorKind::Store,
        }
    }

    pub(crate) fn provider(
        backend: &'static str,
        kind: ProviderErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Error::Provider {
            backend,
            kind,
            message: message.into(),
        }
    }
}
