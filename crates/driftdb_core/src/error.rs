//! Error types for DriftDB core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in DriftDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error. The transaction that hit it was rejected.
    #[error("storage error: {0}")]
    Storage(#[from] driftdb_storage::StorageError),

    /// Value or record codec error.
    #[error("codec error: {0}")]
    Codec(#[from] driftdb_codec::CodecError),

    /// A complete commit-log frame could not be decoded.
    #[error("commit log corrupted at offset {offset}: {message}")]
    LogCorruption {
        /// Offset of the offending frame.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// A complete commit-log frame failed its checksum.
    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Offset of the offending frame.
        offset: u64,
        /// Checksum stored in the frame header.
        expected: u32,
        /// Checksum computed over the payload.
        actual: u32,
    },

    /// The caller broke the transaction or cache contract.
    ///
    /// Nested transactions, writes inside read-only transactions, applying a
    /// change buffer twice and acknowledging out of order all end up here.
    #[error("contract violation: {message}")]
    ContractViolation {
        /// What was violated.
        message: String,
    },

    /// A primary-only transaction ran on a non-primary persistence.
    #[error("primary lease lost")]
    PrimaryLeaseLost,

    /// An argument was malformed, e.g. an odd-length document path.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// The persistence layer has been shut down.
    #[error("persistence is shut down")]
    PersistenceClosed,
}

impl CoreError {
    /// Creates a contract violation error.
    pub fn contract_violation(message: impl Into<String>) -> Self {
        Self::ContractViolation {
            message: message.into(),
        }
    }

    /// Creates a log corruption error.
    pub fn log_corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::LogCorruption {
            offset,
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Returns true for errors a caller may skip, like a failed GC pass
    /// after losing the primary lease.
    #[must_use]
    pub fn is_primary_lease_lost(&self) -> bool {
        matches!(self, Self::PrimaryLeaseLost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_problem() {
        let err = CoreError::contract_violation("change buffer applied twice");
        assert_eq!(
            err.to_string(),
            "contract violation: change buffer applied twice"
        );

        let err = CoreError::ChecksumMismatch {
            offset: 16,
            expected: 0xdead_beef,
            actual: 1,
        };
        assert_eq!(
            err.to_string(),
            "checksum mismatch at offset 16: expected deadbeef, got 00000001"
        );
    }

    #[test]
    fn wraps_lower_layers() {
        let err: CoreError = driftdb_storage::StorageError::InjectedFault { operation: "sync" }.into();
        assert!(matches!(err, CoreError::Storage(_)));
        assert!(CoreError::PrimaryLeaseLost.is_primary_lease_lost());
    }
}
