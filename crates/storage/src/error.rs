/// All errors that can be returned by a MarketStorage implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Optimistic concurrency control conflict: another transaction modified
    /// the solution concurrently. The expected version was not found.
    #[error("concurrent conflict on solution {solution_id}: expected version {expected_version}")]
    ConcurrentConflict {
        solution_id: String,
        expected_version: i64,
    },

    /// A guarded status update found the row in a different status.
    #[error("{record} {id} is {actual}, expected {expected}")]
    StatusConflict {
        record: &'static str,
        id: String,
        expected: String,
        actual: String,
    },

    /// No record of the given kind with the given key.
    #[error("{record} not found: {id}")]
    NotFound { record: &'static str, id: String },

    /// A record with this key already exists.
    #[error("{record} already exists: {id}")]
    AlreadyExists { record: &'static str, id: String },

    /// A backend-specific storage error (DB connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn not_found(record: &'static str, id: impl Into<String>) -> Self {
        StorageError::NotFound {
            record,
            id: id.into(),
        }
    }

    pub fn already_exists(record: &'static str, id: impl Into<String>) -> Self {
        StorageError::AlreadyExists {
            record,
            id: id.into(),
        }
    }
}
