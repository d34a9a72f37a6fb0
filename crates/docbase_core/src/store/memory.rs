//! InMemoryStore - process-local `DocumentStore` double for tests.
//!
//! Mirrors the store behaviors the entity layer depends on: generated ids,
//! `N-hex` revision tokens, 409 conflicts on stale revisions, and deleted
//! documents resolving to an `_id`-only shell. Failures can be injected to
//! exercise retry paths.

use super::{DocumentMeta, DocumentStore, IndexSpec, Selector, StoreError, StoreResult};
use crate::model::document::{
    is_design_document, revision, Document, DESIGN_PREFIX, ID_FIELD, REV_FIELD,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

enum Entry {
    Live(Document),
    Deleted,
}

#[derive(Default)]
struct Database {
    docs: BTreeMap<String, Entry>,
    indexes: Vec<IndexSpec>,
}

#[derive(Default)]
struct State {
    connected: bool,
    databases: HashMap<String, Database>,
    queued_outcomes: VecDeque<Option<StoreError>>,
    persistent_failure: Option<StoreError>,
    calls: usize,
}

/// HashMap-backed store. Clones share the same state.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` store calls fail with `error`.
    pub fn fail_next(&self, count: usize, error: StoreError) {
        if let Ok(mut state) = self.state.lock() {
            state
                .queued_outcomes
                .extend(std::iter::repeat(Some(error)).take(count));
        }
    }

    /// Lets the next `count` calls through before queued failures apply.
    pub fn succeed_next(&self, count: usize) {
        if let Ok(mut state) = self.state.lock() {
            state
                .queued_outcomes
                .extend(std::iter::repeat(None).take(count));
        }
    }

    /// Makes every store call fail with `error` until cleared.
    pub fn fail_always(&self, error: StoreError) {
        if let Ok(mut state) = self.state.lock() {
            state.persistent_failure = Some(error);
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.queued_outcomes.clear();
            state.persistent_failure = None;
        }
    }

    /// Number of store calls received, failed ones included.
    pub fn call_count(&self) -> usize {
        self.state.lock().map(|state| state.calls).unwrap_or(0)
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().map(|state| state.connected).unwrap_or(false)
    }

    /// Live documents in `db`, design documents included.
    pub fn document_count(&self, db: &str) -> usize {
        self.state
            .lock()
            .ok()
            .and_then(|state| {
                state.databases.get(db).map(|database| {
                    database
                        .docs
                        .values()
                        .filter(|entry| matches!(entry, Entry::Live(_)))
                        .count()
                })
            })
            .unwrap_or(0)
    }

    pub fn indexes(&self, db: &str) -> Vec<IndexSpec> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.databases.get(db).map(|database| database.indexes.clone()))
            .unwrap_or_default()
    }

    fn begin(&self) -> StoreResult<MutexGuard<'_, State>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| StoreError::Connection("in-memory store lock poisoned".into()))?;
        state.calls += 1;
        match state.queued_outcomes.pop_front() {
            Some(Some(error)) => return Err(error),
            Some(None) => {}
            None => {
                if let Some(error) = state.persistent_failure.clone() {
                    return Err(error);
                }
            }
        }
        Ok(state)
    }
}

fn database<'a>(state: &'a mut State, db: &str) -> StoreResult<&'a mut Database> {
    state
        .databases
        .get_mut(db)
        .ok_or_else(|| StoreError::http(404, "not_found", "Database does not exist."))
}

fn conflict() -> StoreError {
    StoreError::http(409, "conflict", "Document update conflict.")
}

fn missing() -> StoreError {
    StoreError::http(404, "not_found", "missing")
}

fn next_revision(current: Option<&str>) -> String {
    let generation = current
        .and_then(|rev| rev.split_once('-'))
        .and_then(|(generation, _)| generation.parse::<u64>().ok())
        .unwrap_or(0);
    format!("{}-{}", generation + 1, Uuid::new_v4().simple())
}

fn write(
    database: &mut Database,
    id: String,
    mut doc: Document,
    previous: Option<&str>,
) -> DocumentMeta {
    let rev = next_revision(previous);
    doc.insert(ID_FIELD.to_string(), Value::String(id.clone()));
    doc.insert(REV_FIELD.to_string(), Value::String(rev.clone()));
    database.docs.insert(id.clone(), Entry::Live(doc));
    DocumentMeta { id, rev }
}

impl DocumentStore for InMemoryStore {
    fn connect(&self) -> StoreResult<()> {
        self.begin()?.connected = true;
        Ok(())
    }

    fn disconnect(&self) -> StoreResult<()> {
        self.begin()?.connected = false;
        Ok(())
    }

    fn database_exists(&self, db: &str) -> StoreResult<bool> {
        Ok(self.begin()?.databases.contains_key(db))
    }

    fn create_database(&self, db: &str) -> StoreResult<()> {
        let mut state = self.begin()?;
        if state.databases.contains_key(db) {
            return Err(StoreError::http(
                412,
                "file_exists",
                "The database could not be created, the file already exists.",
            ));
        }
        state.databases.insert(db.to_string(), Database::default());
        Ok(())
    }

    fn create_document(&self, db: &str, doc: &Document) -> StoreResult<DocumentMeta> {
        let mut state = self.begin()?;
        let database = database(&mut state, db)?;
        let id = match doc.get(ID_FIELD).and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().simple().to_string(),
        };
        if matches!(database.docs.get(&id), Some(Entry::Live(_))) {
            return Err(conflict());
        }
        let mut doc = doc.clone();
        doc.remove(REV_FIELD);
        Ok(write(database, id, doc, None))
    }

    fn get_document(&self, db: &str, id: &str) -> StoreResult<Option<Document>> {
        let mut state = self.begin()?;
        let database = database(&mut state, db)?;
        Ok(database.docs.get(id).map(|entry| match entry {
            Entry::Live(doc) => doc.clone(),
            Entry::Deleted => {
                let mut shell = Document::new();
                shell.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
                shell
            }
        }))
    }

    fn save_document(&self, db: &str, doc: &Document) -> StoreResult<DocumentMeta> {
        let mut state = self.begin()?;
        let database = database(&mut state, db)?;
        let id = doc
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::http(400, "bad_request", "Document must have an _id."))?
            .to_string();
        let current = match database.docs.get(&id) {
            Some(Entry::Live(stored)) => revision(stored).map(str::to_string),
            _ => None,
        };
        if current.as_deref() != revision(doc) {
            return Err(conflict());
        }
        Ok(write(database, id, doc.clone(), current.as_deref()))
    }

    fn delete_document(&self, db: &str, id: &str, rev: &str) -> StoreResult<()> {
        let mut state = self.begin()?;
        let database = database(&mut state, db)?;
        match database.docs.get(id) {
            Some(Entry::Live(stored)) => {
                if revision(stored) != Some(rev) {
                    return Err(conflict());
                }
                database.docs.insert(id.to_string(), Entry::Deleted);
                if let Some(name) = id.strip_prefix(DESIGN_PREFIX) {
                    database.indexes.retain(|index| index.name != name);
                }
                Ok(())
            }
            _ => Err(missing()),
        }
    }

    fn all_documents(&self, db: &str) -> StoreResult<Vec<Document>> {
        let mut state = self.begin()?;
        let database = database(&mut state, db)?;
        Ok(database
            .docs
            .values()
            .filter_map(|entry| match entry {
                Entry::Live(doc) => Some(doc.clone()),
                Entry::Deleted => None,
            })
            .collect())
    }

    fn find_documents(&self, db: &str, selector: &Selector) -> StoreResult<Vec<Document>> {
        let mut state = self.begin()?;
        let database = database(&mut state, db)?;
        Ok(database
            .docs
            .values()
            .filter_map(|entry| match entry {
                Entry::Live(doc) if !is_design_document(doc) && selector.matches(doc) => {
                    Some(doc.clone())
                }
                _ => None,
            })
            .collect())
    }

    fn create_index(&self, db: &str, index: &IndexSpec) -> StoreResult<()> {
        let mut state = self.begin()?;
        let database = database(&mut state, db)?;
        let id = format!("{DESIGN_PREFIX}{}", index.name);
        database.indexes.retain(|existing| existing.name != index.name);
        database.indexes.push(index.clone());
        if !matches!(database.docs.get(&id), Some(Entry::Live(_))) {
            let mut doc = Document::new();
            doc.insert("language".to_string(), Value::String("query".to_string()));
            write(database, id, doc, None);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::InMemoryStore;
    use crate::model::document::{revision, Document};
    use crate::store::{DocumentStore, IndexSpec, Selector, SortOrder, StoreError};
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn store_with_db() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.create_database("pets").unwrap();
        store
    }

    #[test]
    fn deleted_document_resolves_to_shell_without_revision() {
        let store = store_with_db();
        let meta = store.create_document("pets", &doc(json!({"name": "Rex"}))).unwrap();
        store.delete_document("pets", &meta.id, &meta.rev).unwrap();

        let shell = store.get_document("pets", &meta.id).unwrap().unwrap();
        assert_eq!(shell.get("_id"), Some(&json!(meta.id)));
        assert_eq!(revision(&shell), None);
        assert!(store.all_documents("pets").unwrap().is_empty());
    }

    #[test]
    fn stale_revision_is_a_conflict() {
        let store = store_with_db();
        let meta = store.create_document("pets", &doc(json!({"name": "Rex"}))).unwrap();
        let mut current = store.get_document("pets", &meta.id).unwrap().unwrap();
        current.insert("name".into(), json!("Max"));
        let saved = store.save_document("pets", &current).unwrap();
        assert!(saved.rev.starts_with("2-"));

        let err = store.save_document("pets", &current).unwrap_err();
        assert_eq!(err.status(), Some(409));
    }

    #[test]
    fn injected_failures_are_consumed_in_order() {
        let store = store_with_db();
        store.fail_next(2, StoreError::http(429, "too_many_requests", "slow down"));

        assert!(store.database_exists("pets").is_err());
        assert!(store.database_exists("pets").is_err());
        assert!(store.database_exists("pets").unwrap());
        assert_eq!(store.call_count(), 4);
    }

    #[test]
    fn index_creation_adds_design_document_hidden_from_queries() {
        let store = store_with_db();
        store.create_document("pets", &doc(json!({"name": "Rex"}))).unwrap();
        store
            .create_index("pets", &IndexSpec::new("name", SortOrder::Asc))
            .unwrap();

        assert_eq!(store.indexes("pets").len(), 1);
        assert_eq!(store.document_count("pets"), 2);
        let hits = store
            .find_documents("pets", &Selector::new().eq("name", "Rex"))
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn missing_database_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.all_documents("nope").unwrap_err();
        assert_eq!(err.status(), Some(404));
    }
}
