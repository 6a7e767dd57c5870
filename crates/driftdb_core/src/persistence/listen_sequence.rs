//! Listen sequence numbers.

use crate::types::ListenSequenceNumber;

/// Hands out strictly increasing [`ListenSequenceNumber`]s.
///
/// Owned by the persistence layer and advanced once per transaction.
#[derive(Debug, Clone)]
pub struct ListenSequence {
    previous: i64,
}

impl ListenSequence {
    /// Sentinel meaning "no sequence number".
    pub const INVALID: ListenSequenceNumber = ListenSequenceNumber::INVALID;

    /// Starts a sequence after `previous`.
    #[must_use]
    pub fn new(previous: ListenSequenceNumber) -> Self {
        Self {
            previous: previous.as_i64().max(0),
        }
    }

    /// Returns the next number.
    pub fn next(&mut self) -> ListenSequenceNumber {
        self.previous += 1;
        ListenSequenceNumber::new(self.previous)
    }

    /// Returns the last number handed out.
    #[must_use]
    pub fn current(&self) -> ListenSequenceNumber {
        ListenSequenceNumber::new(self.previous)
    }
}
