//! Ledger Store errors

use uuid::Uuid;

/// Errors surfaced by a ledger store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("item not found: {0}")]
    ItemNotFound(Uuid),

    /// Optimistic concurrency conflict: a row read under this scope was
    /// modified by a concurrent transaction.
    #[error("write conflict on row {row_id}: expected version {expected}, found {actual}")]
    Conflict {
        row_id: Uuid,
        expected: i64,
        actual: i64,
    },

    /// A write would have driven a balance or stock negative. The
    /// coordinator validates before writing, so this indicates a
    /// coordinator bug if observed.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Backend unreachable or timed out past its retry policy.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Conflicts are resolved by re-running the whole evaluation from a
    /// fresh scope.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    /// Whether this error class warrants an internal retry.
    pub fn is_retryable(&self) -> bool {
        self.is_conflict()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_is_retryable() {
        let conflict = StoreError::Conflict {
            row_id: Uuid::new_v4(),
            expected: 1,
            actual: 2,
        };
        assert!(conflict.is_conflict());
        assert!(conflict.is_retryable());
    }

    #[test]
    fn test_not_found_is_terminal() {
        let not_found = StoreError::AccountNotFound(Uuid::new_v4());
        assert!(!not_found.is_conflict());
        assert!(!not_found.is_retryable());

        let guard = StoreError::ConstraintViolation("balance would go negative".into());
        assert!(!guard.is_retryable());
    }
}
