// ⚠️ Error types
//
// Two classes matter to callers:
// - StoreError: one write or read failed. Row-level during import (recorded
//   in the RunReport), row-level during sync (counted as failed).
// - ImportError: the run itself failed. Everything done so far was rolled
//   back and no RunReport exists.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("BAN {0} must keep at least one subscriber")]
    LastSubscriber(String),

    #[error("subscriber {0} not found")]
    SubscriberNotFound(i64),

    #[error("no remote record for phone {0}")]
    RemoteNotFound(String),
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("failed to begin transaction: {0}")]
    Begin(#[source] StoreError),

    #[error("transaction failed while processing row {row}: {source}")]
    Transaction {
        row: usize,
        #[source]
        source: StoreError,
    },

    #[error("failed to commit transaction: {0}")]
    Commit(#[source] StoreError),

    #[error("required column not found in header row: {0}")]
    MissingColumn(&'static str),

    #[error("import cancelled after {processed} rows; nothing was saved")]
    Cancelled { processed: usize },
}

impl ImportError {
    /// True when the error came from the store rather than from the input
    /// or the caller.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            ImportError::Begin(_) | ImportError::Transaction { .. } | ImportError::Commit(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_error_messages() {
        let err = ImportError::MissingColumn("ban_number");
        assert_eq!(
            err.to_string(),
            "required column not found in header row: ban_number"
        );
        assert!(!err.is_store_failure());

        let err = ImportError::Begin(StoreError::RemoteNotFound("1".to_string()));
        assert!(err.is_store_failure());
    }

    #[test]
    fn test_last_subscriber_message() {
        let err = StoreError::LastSubscriber("B1".to_string());
        assert_eq!(err.to_string(), "BAN B1 must keep at least one subscriber");
    }
}
