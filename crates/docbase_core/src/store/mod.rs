//! Remote document store contract and its implementations.
//!
//! # Responsibility
//! - Define the minimal set of store calls the entity layer needs.
//! - Classify store failures into transient and permanent errors.
//! - Provide the CouchDB/Cloudant HTTP client and an in-memory test double.
//!
//! # Invariants
//! - Store calls are blocking and safe to share across threads.
//! - `get_document` returns whatever the store resolves for the id; callers
//!   decide whether a revision-less shell counts as present.
//! - Only `StoreError::is_transient` errors are eligible for retry.

use crate::model::document::{Document, RecordId};
use std::error::Error;
use std::fmt::{Display, Formatter};

mod couch;
mod memory;
mod selector;

pub use couch::{ClientOptions, CouchClient, ReplayPolicy};
pub use memory::InMemoryStore;
pub use selector::{IndexSpec, Selector, SortOrder};

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure reported by a store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store answered with a non-success HTTP status.
    Http {
        status: u16,
        error: String,
        reason: String,
    },
    /// The request never produced a response (refused, reset, timed out).
    Connection(String),
    /// The response could not be decoded.
    Decode(String),
}

impl StoreError {
    pub fn http(status: u16, error: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Http {
            status,
            error: error.into(),
            reason: reason.into(),
        }
    }

    /// Returns whether retrying the same call may succeed.
    ///
    /// Rate limiting, request timeouts, server-side failures and dropped
    /// connections are transient. Other statuses and decode failures are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            Self::Connection(_) => true,
            Self::Decode(_) => false,
        }
    }

    /// Returns whether the failure happened on the wire rather than while
    /// decoding a response.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Http { .. } | Self::Connection(_))
    }

    /// Returns whether the store rejected a write for a stale revision.
    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http {
                status,
                error,
                reason,
            } => write!(f, "store returned HTTP {status} ({error}): {reason}"),
            Self::Connection(message) => write!(f, "store unreachable: {message}"),
            Self::Decode(message) => write!(f, "invalid store response: {message}"),
        }
    }
}

impl Error for StoreError {}

/// Identity and revision of a written document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMeta {
    pub id: RecordId,
    pub rev: String,
}

/// Blocking client of a schemaless document store.
pub trait DocumentStore: Send + Sync {
    /// Opens the client session.
    fn connect(&self) -> StoreResult<()>;
    /// Closes the client session.
    fn disconnect(&self) -> StoreResult<()>;

    fn database_exists(&self, db: &str) -> StoreResult<bool>;
    fn create_database(&self, db: &str) -> StoreResult<()>;

    /// Inserts a new document; the store assigns `_id` when absent.
    fn create_document(&self, db: &str, doc: &Document) -> StoreResult<DocumentMeta>;
    /// Fetches a document by id, `None` when the store has nothing for it.
    fn get_document(&self, db: &str, id: &str) -> StoreResult<Option<Document>>;
    /// Writes `doc` over the revision named by its `_rev`.
    fn save_document(&self, db: &str, doc: &Document) -> StoreResult<DocumentMeta>;
    fn delete_document(&self, db: &str, id: &str, rev: &str) -> StoreResult<()>;

    /// Every live document, design documents included.
    fn all_documents(&self, db: &str) -> StoreResult<Vec<Document>>;
    /// Live documents matching `selector`, in store-defined order.
    fn find_documents(&self, db: &str, selector: &Selector) -> StoreResult<Vec<Document>>;
    fn create_index(&self, db: &str, index: &IndexSpec) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::StoreError;

    #[test]
    fn classifies_transient_errors() {
        assert!(StoreError::http(429, "too_many_requests", "slow down").is_transient());
        assert!(StoreError::http(503, "unavailable", "").is_transient());
        assert!(StoreError::http(408, "timeout", "").is_transient());
        assert!(StoreError::Connection("reset".into()).is_transient());

        assert!(!StoreError::http(409, "conflict", "Document update conflict.").is_transient());
        assert!(!StoreError::http(401, "unauthorized", "").is_transient());
        assert!(!StoreError::Decode("eof".into()).is_transient());
    }

    #[test]
    fn decode_errors_are_not_transport_errors() {
        assert!(StoreError::http(400, "bad_request", "").is_transport());
        assert!(!StoreError::Decode("eof".into()).is_transport());
    }
}
