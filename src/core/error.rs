// Copyright 2025 Stoolap Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error types for mvplan
//!
//! Planning contract violations and transaction failures share one enum.
//! Write-write contention is not an error: row actions report it through
//! [`ActionOutcome`](crate::storage::mvcc::ActionOutcome) and only the
//! statement runner turns an abandoned conflict into [`Error::SerializationFailure`].

use thiserror::Error;

/// Result type alias for mvplan operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // =========================================================================
    // Planning errors
    // =========================================================================
    /// The resolver was handed a plan shape it cannot work with. Always an
    /// upstream bug, never recoverable.
    #[error("internal invariant violation: {message}")]
    InternalInvariantViolation { message: String },

    /// Feature exists in the plan but not in this execution path
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Invalid argument for an operation
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // =========================================================================
    // Transaction errors
    // =========================================================================
    /// Transaction lost a write-write race and was rolled back
    #[error("serialization failure: {message}")]
    SerializationFailure { message: String },

    /// Waiting would have closed a cycle in the wait graph
    #[error("deadlock detected between session {session} and session {blocker}")]
    Deadlock { session: u64, blocker: u64 },

    /// A blocking wait was cancelled
    #[error("wait interrupted")]
    Interrupted,

    /// Operation requires an active transaction
    #[error("transaction not started")]
    TransactionNotStarted,

    /// The transaction has been marked for rollback
    #[error("transaction aborted")]
    TransactionAborted,

    /// Named savepoint does not exist in the session
    #[error("savepoint '{0}' not found")]
    SavepointNotFound(String),

    /// Session is not registered with the transaction manager
    #[error("session {0} not found")]
    SessionNotFound(u64),

    // =========================================================================
    // Row store errors
    // =========================================================================
    /// Unique constraint violation detected while indexing a row
    #[error("unique constraint failed for index {index} with value {value}")]
    UniqueConstraint { index: String, value: String },

    /// Row id is not present in the store
    #[error("row {0} not found")]
    RowNotFound(i64),

    /// Commit log rejected a record
    #[error("commit log error: {message}")]
    CommitLog { message: String },
}

impl Error {
    /// Create a new InternalInvariantViolation error
    pub fn internal(message: impl Into<String>) -> Self {
        Error::InternalInvariantViolation {
            message: message.into(),
        }
    }

    /// Create a new SerializationFailure error
    pub fn serialization_failure(message: impl Into<String>) -> Self {
        Error::SerializationFailure {
            message: message.into(),
        }
    }

    /// Create a new UniqueConstraint error
    pub fn unique_constraint(index: impl Into<String>, value: impl Into<String>) -> Self {
        Error::UniqueConstraint {
            index: index.into(),
            value: value.into(),
        }
    }

    /// Create a new NotSupported error
    pub fn not_supported(message: impl Into<String>) -> Self {
        Error::NotSupported(message.into())
    }

    /// Create a new InvalidArgument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    /// Create a new CommitLog error
    pub fn commit_log(message: impl Into<String>) -> Self {
        Error::CommitLog {
            message: message.into(),
        }
    }

    /// Check if this error signals an upstream contract violation
    pub fn is_internal(&self) -> bool {
        matches!(self, Error::InternalInvariantViolation { .. })
    }

    /// Check if this is a constraint violation error
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Error::UniqueConstraint { .. })
    }

    /// Check if this is a transaction-related error
    pub fn is_transaction_error(&self) -> bool {
        matches!(
            self,
            Error::SerializationFailure { .. }
                | Error::Deadlock { .. }
                | Error::Interrupted
                | Error::TransactionNotStarted
                | Error::TransactionAborted
                | Error::SavepointNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::internal("empty range variable list").to_string(),
            "internal invariant violation: empty range variable list"
        );
        assert_eq!(
            Error::serialization_failure("row 7").to_string(),
            "serialization failure: row 7"
        );
        assert_eq!(
            Error::Deadlock {
                session: 1,
                blocker: 2
            }
            .to_string(),
            "deadlock detected between session 1 and session 2"
        );
        assert_eq!(
            Error::SavepointNotFound("sp1".to_string()).to_string(),
            "savepoint 'sp1' not found"
        );
        assert_eq!(
            Error::unique_constraint("t_pk", "5").to_string(),
            "unique constraint failed for index t_pk with value 5"
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::internal("x").is_internal());
        assert!(!Error::Interrupted.is_internal());

        assert!(Error::unique_constraint("i", "1").is_constraint_violation());
        assert!(!Error::TransactionAborted.is_constraint_violation());

        assert!(Error::serialization_failure("x").is_transaction_error());
        assert!(Error::Interrupted.is_transaction_error());
        assert!(Error::TransactionNotStarted.is_transaction_error());
        assert!(!Error::RowNotFound(1).is_transaction_error());
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(Error::internal("a"), Error::internal("a"));
        assert_ne!(Error::internal("a"), Error::internal("b"));
        assert_eq!(Error::Interrupted.clone(), Error::Interrupted);
    }
}
