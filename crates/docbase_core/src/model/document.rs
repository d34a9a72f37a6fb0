//! Stored document shape shared by records and store clients.

use serde_json::{Map, Value};

/// Wire/storage form of a record: a JSON object keyed by field name.
pub type Document = Map<String, Value>;

/// Opaque store-assigned record identity.
pub type RecordId = String;

/// Reserved identity field.
pub const ID_FIELD: &str = "_id";
/// Store-managed revision token; never produced by `serialize()`.
pub const REV_FIELD: &str = "_rev";
/// Prefix of index/design documents that are not records.
pub const DESIGN_PREFIX: &str = "_design/";

/// Returns the document `_id` when it is a string.
pub fn document_id(doc: &Document) -> Option<&str> {
    doc.get(ID_FIELD).and_then(Value::as_str)
}

/// Returns the revision token when present and non-empty.
///
/// A deleted document can still resolve to a shell carrying only `_id`;
/// such shells have no revision and must be treated as absent.
pub fn revision(doc: &Document) -> Option<&str> {
    doc.get(REV_FIELD)
        .and_then(Value::as_str)
        .filter(|rev| !rev.is_empty())
}

pub fn is_design_document(doc: &Document) -> bool {
    document_id(doc).is_some_and(|id| id.starts_with(DESIGN_PREFIX))
}
