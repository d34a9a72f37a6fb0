//! Record repository: CRUD over the bound database.
//!
//! # Responsibility
//! - Persist records through the shared handle, one repository per record
//!   type.
//! - Route every store call through the handle's retry policy.
//!
//! # Invariants
//! - `create` validates before any store call.
//! - `update`/`delete` on an identity the store no longer holds are silent
//!   no-ops.
//! - `create` downgrades transport failures to a logged no-op; every other
//!   operation propagates them.
//! - A revision conflict on `update`/`delete` triggers a re-read and another
//!   write, up to the retry bound.

use crate::db::{DbError, DocumentStoreHandle};
use crate::model::document::{document_id, revision};
use crate::model::record::{Record, ValidationError};
use crate::store::{DocumentStore, IndexSpec, SortOrder, StoreError, StoreResult};
use log::{debug, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;
use std::sync::Arc;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for record persistence and queries.
#[derive(Debug)]
pub enum RepoError {
    Validation(ValidationError),
    Store(StoreError),
    Db(DbError),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Db(err) => Some(err),
        }
    }
}

impl From<ValidationError> for RepoError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<StoreError> for RepoError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

/// Persistence entry point for records of type `R`.
pub struct RecordRepository<R: Record> {
    handle: Arc<DocumentStoreHandle>,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> Clone for RecordRepository<R> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.handle))
    }
}

impl<R: Record> RecordRepository<R> {
    pub fn new(handle: Arc<DocumentStoreHandle>) -> Self {
        Self {
            handle,
            _record: PhantomData,
        }
    }

    pub fn handle(&self) -> &DocumentStoreHandle {
        &self.handle
    }

    /// Runs one logical store operation under the retry policy.
    pub(crate) fn with_retry<T, F>(&self, operation: &str, mut call: F) -> RepoResult<T>
    where
        F: FnMut(&dyn DocumentStore, &str) -> StoreResult<T>,
    {
        let store = self.handle.store()?;
        let db = self.handle.database_name();
        self.handle
            .retry_policy()
            .run(operation, StoreError::is_transient, || call(store, db))
            .map_err(RepoError::from)
    }

    /// Persists a new record and adopts the store-assigned identity.
    ///
    /// # Errors
    /// - `RepoError::Validation` when required fields are unset.
    ///
    /// A transport failure that survives the retry policy is logged and
    /// swallowed; the record then stays without identity.
    pub fn create(&self, record: &mut R) -> RepoResult<()> {
        record.validate()?;
        let doc = record.serialize();

        match self.with_retry("create", |store, db| store.create_document(db, &doc)) {
            Ok(meta) => {
                info!(
                    "event=record_create module=repo status=ok database={} id={}",
                    self.handle.database_name(),
                    meta.id
                );
                record.assign_id(meta.id);
                Ok(())
            }
            Err(RepoError::Store(err)) if err.is_transport() => {
                warn!(
                    "event=record_create module=repo status=skipped database={} error={}",
                    self.handle.database_name(),
                    err
                );
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Merges the record's fields into its stored document.
    ///
    /// No-op when the record has no identity or the store no longer holds a
    /// live document for it. A revision conflict re-reads the stored
    /// document and merges again, so the last writer wins.
    pub fn update(&self, record: &R) -> RepoResult<()> {
        let Some(id) = record.id() else {
            debug!("event=record_update module=repo status=noop reason=unpersisted");
            return Ok(());
        };
        let changes = record.serialize();

        let attempts = self.handle.retry_policy().tries();
        let updated = self.with_retry("update", |store, db| {
            let mut conflicts = 0;
            loop {
                let Some(mut current) = store.get_document(db, id)? else {
                    return Ok(false);
                };
                if revision(&current).is_none() {
                    return Ok(false);
                }
                for (field, value) in &changes {
                    current.insert(field.clone(), value.clone());
                }
                match store.save_document(db, &current) {
                    Ok(_) => return Ok(true),
                    Err(err) if err.is_conflict() && conflicts + 1 < attempts => {
                        conflicts += 1;
                        log_conflict("record_update", id, conflicts);
                    }
                    Err(err) => return Err(err),
                }
            }
        })?;

        log_outcome("record_update", id, updated);
        Ok(())
    }

    /// Removes the record's stored document; no-op when already gone.
    ///
    /// A revision conflict re-reads the document before deleting again.
    pub fn delete(&self, record: &R) -> RepoResult<()> {
        let Some(id) = record.id() else {
            debug!("event=record_delete module=repo status=noop reason=unpersisted");
            return Ok(());
        };

        let attempts = self.handle.retry_policy().tries();
        let deleted = self.with_retry("delete", |store, db| {
            let mut conflicts = 0;
            loop {
                let Some(current) = store.get_document(db, id)? else {
                    return Ok(false);
                };
                let Some(rev) = revision(&current) else {
                    return Ok(false);
                };
                match store.delete_document(db, id, rev) {
                    Ok(()) => return Ok(true),
                    Err(err) if err.is_conflict() && conflicts + 1 < attempts => {
                        conflicts += 1;
                        log_conflict("record_delete", id, conflicts);
                    }
                    Err(err) => return Err(err),
                }
            }
        })?;

        log_outcome("record_delete", id, deleted);
        Ok(())
    }

    /// Deletes every document in the database, index definitions included.
    ///
    /// Intended for test fixtures. Returns the number of deleted documents.
    pub fn remove_all(&self) -> RepoResult<usize> {
        // Counts across attempts; a retry only sees what is still stored.
        let mut removed = 0;
        self.with_retry("remove_all", |store, db| {
            for doc in &store.all_documents(db)? {
                let (Some(id), Some(rev)) = (document_id(doc), revision(doc)) else {
                    continue;
                };
                store.delete_document(db, id, rev)?;
                removed += 1;
            }
            Ok(())
        })?;

        info!(
            "event=record_remove_all module=repo status=ok database={} removed={}",
            self.handle.database_name(),
            removed
        );
        Ok(removed)
    }

    /// Provisions a JSON query index on `field`.
    pub fn create_query_index(&self, field: &str, order: SortOrder) -> RepoResult<()> {
        let index = IndexSpec::new(field, order);
        self.with_retry("create_query_index", |store, db| store.create_index(db, &index))?;
        info!(
            "event=index_create module=repo status=ok database={} field={} order={}",
            self.handle.database_name(),
            field,
            order
        );
        Ok(())
    }
}

fn log_conflict(event: &str, id: &str, conflicts: u32) {
    debug!("event={event} module=repo status=conflict id={id} refetch={conflicts}");
}

fn log_outcome(event: &str, id: &str, applied: bool) {
    if applied {
        info!("event={event} module=repo status=ok id={id}");
    } else {
        debug!("event={event} module=repo status=noop reason=not_found id={id}");
    }
}
