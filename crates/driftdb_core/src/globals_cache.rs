//! Store-wide singleton values.

use crate::error::CoreResult;
use crate::persistence::{LogRecord, PersistenceTransaction};
use driftdb_codec::ByteString;

/// Access to global values such as the session token.
#[derive(Debug)]
pub struct GlobalsCache<'a> {
    txn: &'a mut PersistenceTransaction,
}

impl<'a> GlobalsCache<'a> {
    pub(crate) fn new(txn: &'a mut PersistenceTransaction) -> Self {
        Self { txn }
    }

    /// Returns the session token, or an empty token if none was set.
    #[must_use]
    pub fn get_session_token(&self) -> ByteString {
        self.txn.state.session_token.clone()
    }

    /// Replaces the session token.
    ///
    /// # Errors
    ///
    /// Fails in read-only transactions.
    pub fn set_session_token(&mut self, token: ByteString) -> CoreResult<()> {
        self.txn.write(LogRecord::SetSessionToken(token))
    }
}

#[cfg(test)]
mod tests {
    use crate::config::StoreConfig;
    use crate::persistence::{Persistence, TransactionMode};
    use driftdb_codec::ByteString;

    #[tokio::test]
    async fn session_token_defaults_to_empty_and_overwrites() {
        let persistence = Persistence::in_memory(StoreConfig::default());
        let token = persistence
            .run_transaction("get", TransactionMode::ReadOnly, |txn| {
                Ok(txn.globals_cache().get_session_token())
            })
            .await
            .unwrap();
        assert!(token.is_empty());

        for value in ["first", "second"] {
            persistence
                .run_transaction("set", TransactionMode::ReadWrite, |txn| {
                    txn.globals_cache().set_session_token(ByteString::from(value))
                })
                .await
                .unwrap();
        }
        let token = persistence
            .run_transaction("get", TransactionMode::ReadOnly, |txn| {
                Ok(txn.globals_cache().get_session_token())
            })
            .await
            .unwrap();
        assert_eq!(token, ByteString::from("second"));
    }
}
