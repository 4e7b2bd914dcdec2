//! Error taxonomy (spec 7). Every failure the core can produce is classified
//! into one of these variants so callers can decide whether to retry, skip,
//! or escalate without re-deriving the policy from a string message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexerError {
    /// Network/5xx/timeout against the gateway. Retried with backoff by the
    /// caller; on exhaustion becomes a block-level or mint-level failure.
    #[error("gateway unavailable: {0}")]
    Transient(String),

    /// HTTP 404 / empty result. Never retried.
    #[error("resource absent: {0}")]
    Absent(String),

    /// Content parsed but failed schema validation.
    #[error("schema invalid: {0}")]
    SchemaInvalid(String),

    /// Content is schema-valid but violates a protocol invariant (duplicate
    /// bitmap, block too early, MIME mismatch, supply exceeded).
    #[error("protocol invalid: {0}")]
    ProtocolInvalid(String),

    /// The store reported a lock/busy condition; retried locally up to a
    /// small bound before being surfaced as a block-level failure.
    #[error("store busy: {0}")]
    StoreBusy(String),

    /// Anything else: a bug, an unreachable state, a poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IndexerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, IndexerError::Transient(_) | IndexerError::StoreBusy(_))
    }
}

impl From<rusqlite::Error> for IndexerError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::DatabaseBusy
                    || err.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                IndexerError::StoreBusy(e.to_string())
            }
            other => IndexerError::Internal(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for IndexerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.status().map(|s| s.is_server_error()).unwrap_or(false) {
            IndexerError::Transient(e.to_string())
        } else if e.status().map(|s| s.as_u16() == 404).unwrap_or(false) {
            IndexerError::Absent(e.to_string())
        } else {
            IndexerError::Internal(e.to_string())
        }
    }
}
