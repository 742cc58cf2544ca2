//! Error types for the results store

use rusqlite::ErrorCode;

/// Result type alias for store operations
pub type DaoResult<T> = std::result::Result<T, DaoError>;

/// Errors surfaced by the store and the connection registry
#[derive(Debug, thiserror::Error)]
pub enum DaoError {
    /// A referenced call, result row, chat entry or connection is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Foreign-key or constraint violation, or input that would create one
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// The store could not be opened or reached
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Storage error: {0}")]
    Storage(rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DaoError {
    pub fn not_found(what: impl Into<String>) -> Self {
        DaoError::NotFound(what.into())
    }

    pub fn integrity(what: impl Into<String>) -> Self {
        DaoError::Integrity(what.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DaoError::NotFound(_))
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, DaoError::Integrity(_))
    }
}

impl From<rusqlite::Error> for DaoError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => DaoError::Integrity(err.to_string()),
            Some(
                ErrorCode::CannotOpen
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::SystemIoFailure
                | ErrorCode::NotADatabase,
            ) => DaoError::Connectivity(err.to_string()),
            _ => DaoError::Storage(err),
        }
    }
}

impl From<std::io::Error> for DaoError {
    fn from(err: std::io::Error) -> Self {
        DaoError::Connectivity(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_violation_maps_to_integrity() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT NOT NULL);")
            .unwrap();
        let err = conn
            .execute("INSERT INTO t (v) VALUES (NULL)", [])
            .unwrap_err();
        assert!(DaoError::from(err).is_integrity());
    }

    #[test]
    fn test_other_errors_map_to_storage() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let err = conn.execute("SELECT * FROM missing_table", []).unwrap_err();
        assert!(matches!(DaoError::from(err), DaoError::Storage(_)));
    }
}
