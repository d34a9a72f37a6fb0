//! Query half of the record repository: id, selector and full-scan lookups.
//!
//! # Invariants
//! - A document without a revision token is a deleted shell and is reported
//!   as not found.
//! - Design documents never surface as records.

use super::record_repo::{RecordRepository, RepoResult};
use crate::model::document::{is_design_document, revision, Document};
use crate::model::record::Record;
use crate::store::Selector;
use serde_json::Value;

impl<R: Record> RecordRepository<R> {
    /// Fetches a record by identity.
    pub fn find(&self, id: &str) -> RepoResult<Option<R>> {
        let found = self.with_retry("find", |store, db| store.get_document(db, id))?;
        match found {
            Some(doc) if revision(&doc).is_some() => decode(doc).map(Some),
            _ => Ok(None),
        }
    }

    /// Returns records whose fields equal every field of `selector`.
    ///
    /// Result order is defined by the store.
    pub fn find_by(&self, selector: &Selector) -> RepoResult<Vec<R>> {
        let documents =
            self.with_retry("find_by", |store, db| store.find_documents(db, selector))?;
        documents.into_iter().map(decode).collect()
    }

    /// Shorthand for `find_by(name == name)`.
    pub fn find_by_name(&self, name: &str) -> RepoResult<Vec<R>> {
        self.find_by(&Selector::new().eq("name", name))
    }

    /// Loads every record in the database without pagination.
    ///
    /// Meant for small datasets and tests.
    pub fn all(&self) -> RepoResult<Vec<R>> {
        let documents = self.with_retry("all", |store, db| store.all_documents(db))?;
        documents
            .into_iter()
            .filter(|doc| !is_design_document(doc))
            .map(decode)
            .collect()
    }
}

fn decode<R: Record>(doc: Document) -> RepoResult<R> {
    let mut record = R::default();
    record.deserialize(&Value::Object(doc))?;
    Ok(record)
}
