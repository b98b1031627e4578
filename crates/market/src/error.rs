use openaero_storage::StorageError;

/// Errors returned by the domain services.
#[derive(Debug, thiserror::Error)]
pub enum MarketError {
    /// Input failed schema or domain validation.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// The actor's role or ownership does not permit the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The record is not in a state that allows the operation, or another
    /// writer changed it first.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Storage(StorageError),
}

impl MarketError {
    /// Stable machine-readable code, used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            MarketError::Validation(_) => "VALIDATION_ERROR",
            MarketError::NotFound(_) => "NOT_FOUND",
            MarketError::Forbidden(_) => "FORBIDDEN",
            MarketError::Conflict(_) => "CONFLICT",
            MarketError::Internal(_) => "INTERNAL_ERROR",
            MarketError::Storage(_) => "STORAGE_ERROR",
        }
    }
}

impl From<StorageError> for MarketError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound { .. } => MarketError::NotFound(e.to_string()),
            StorageError::AlreadyExists { .. }
            | StorageError::ConcurrentConflict { .. }
            | StorageError::StatusConflict { .. } => MarketError::Conflict(e.to_string()),
            StorageError::Backend(_) => MarketError::Storage(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_map_to_domain_kinds() {
        let e: MarketError = StorageError::not_found("solution", "sol-1").into();
        assert!(matches!(e, MarketError::NotFound(_)));
        assert_eq!(e.to_string(), "solution not found: sol-1");

        let e: MarketError = StorageError::ConcurrentConflict {
            solution_id: "sol-1".into(),
            expected_version: 3,
        }
        .into();
        assert_eq!(e.code(), "CONFLICT");

        let e: MarketError = StorageError::already_exists("review", "r-1").into();
        assert_eq!(e.code(), "CONFLICT");

        let e: MarketError = StorageError::Backend("disk full".into()).into();
        assert_eq!(e.code(), "STORAGE_ERROR");
    }
}
