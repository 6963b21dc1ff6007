//! Typed error type for the db crate.

use engine::RepositoryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("row not found")]
    NotFound,

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A row exists but cannot be turned back into a domain value.
    #[error("cannot decode {table} row: {message}")]
    Decode { table: &'static str, message: String },
}

impl DbError {
    pub(crate) fn decode(table: &'static str, message: impl ToString) -> Self {
        Self::Decode {
            table,
            message: message.to_string(),
        }
    }
}

impl From<DbError> for RepositoryError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound | DbError::Sqlx(sqlx::Error::RowNotFound) => RepositoryError::NotFound,
            DbError::Decode { .. } => RepositoryError::Corrupt(err.to_string()),
            other => RepositoryError::Backend(other.to_string()),
        }
    }
}
