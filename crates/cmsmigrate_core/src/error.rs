use thiserror::Error;

/// Orchestration-level failures. Record-level problems never surface here;
/// they are collected as [`crate::services::RecordFailure`] values instead.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("malformed legacy export: {0}")]
    Malformed(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("migration run {0} is already running")]
    RunInProgress(i64),

    #[error("migration run {0} not found")]
    RunNotFound(i64),

    #[error("migration run {id} is {actual}; expected {expected}")]
    InvalidRunState {
        id: i64,
        expected: String,
        actual: String,
    },

    #[error("migration exceeded its deadline during {0}")]
    Timeout(String),

    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),
}

impl MigrationError {
    /// Infrastructure failures worth retrying from the job wrapper. Data and
    /// state errors will fail the same way on every attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(rusqlite::Error::SqliteFailure(code, _)) => matches!(
                code.code,
                rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
                    | rusqlite::ErrorCode::SystemIoFailure
                    | rusqlite::ErrorCode::CannotOpen
            ),
            Self::Io(_) => true,
            _ => false,
        }
    }
}

pub type MigrationResult<T> = std::result::Result<T, MigrationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_database_is_transient() {
        let err = MigrationError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(err.is_transient());
    }

    #[test]
    fn malformed_input_is_not_transient() {
        assert!(!MigrationError::Malformed("top level".to_string()).is_transient());
        assert!(!MigrationError::RunInProgress(3).is_transient());
    }
}
