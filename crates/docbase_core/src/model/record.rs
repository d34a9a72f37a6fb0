//! Persistable record contract and the `Base` record.
//!
//! # Responsibility
//! - Define how a record maps to and from its stored document.
//! - Validate required fields before persistence.
//!
//! # Invariants
//! - `serialize()` emits `_id` only when an identity is assigned and never
//!   emits `_rev`.
//! - `deserialize()` adopts `_id` only while the record has no identity;
//!   an assigned identity is never replaced.

use super::document::{Document, RecordId, ID_FIELD};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Data validation failure for a record or an incoming document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Input was absent or not a JSON object.
    BadData(String),
    /// A required field is absent.
    MissingField(&'static str),
    /// A field is present with an unusable value.
    InvalidField { field: &'static str, message: String },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadData(message) => {
                write!(f, "invalid record: body of request contained bad or no data ({message})")
            }
            Self::MissingField(field) => write!(f, "invalid record: missing {field}"),
            Self::InvalidField { field, message } => {
                write!(f, "invalid record: field `{field}` {message}")
            }
        }
    }
}

impl Error for ValidationError {}

/// A domain object stored as one document.
///
/// `Default` builds the empty record that query results deserialize into.
pub trait Record: Default {
    /// Store-assigned identity, `None` until first persisted.
    fn id(&self) -> Option<&str>;

    /// Sets the identity when none is assigned yet.
    ///
    /// Returns `false` and leaves the record untouched otherwise.
    fn assign_id(&mut self, id: RecordId) -> bool;

    /// Produces the document form of this record.
    fn serialize(&self) -> Document;

    /// Populates domain fields from `data`.
    fn deserialize(&mut self, data: &Value) -> Result<&mut Self, ValidationError>;

    /// Checks fields required before the first write.
    fn validate(&self) -> Result<(), ValidationError>;

    fn is_persisted(&self) -> bool {
        self.id().is_some()
    }
}

/// Returns `data` as an object, or a `BadData` error naming what it was.
pub fn expect_object(data: &Value) -> Result<&Document, ValidationError> {
    data.as_object().ok_or_else(|| {
        let found = match data {
            Value::Null => "no data",
            Value::Array(_) => "an array",
            _ => "a scalar value",
        };
        ValidationError::BadData(format!("expected a JSON object, got {found}"))
    })
}

/// Adopts `_id` from `doc` into `record` when the record has none.
pub fn adopt_document_id<R: Record>(record: &mut R, doc: &Document) {
    if record.id().is_some() {
        return;
    }
    if let Some(id) = doc.get(ID_FIELD).and_then(Value::as_str) {
        record.assign_id(id.to_string());
    }
}

/// Minimal named record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Base {
    id: Option<RecordId>,
    pub name: Option<String>,
}

impl Base {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: Some(name.into()),
        }
    }

    /// Builds a record from a document, adopting its `_id`.
    pub fn from_document(data: &Value) -> Result<Self, ValidationError> {
        let mut record = Self::default();
        record.deserialize(data)?;
        Ok(record)
    }
}

impl Display for Base {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<Base {} id=[{}]>",
            self.name.as_deref().unwrap_or("None"),
            self.id.as_deref().unwrap_or("None")
        )
    }
}

impl Record for Base {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn assign_id(&mut self, id: RecordId) -> bool {
        if self.id.is_some() {
            return false;
        }
        self.id = Some(id);
        true
    }

    fn serialize(&self) -> Document {
        let mut doc = Document::new();
        doc.insert(
            "name".to_string(),
            self.name.clone().map_or(Value::Null, Value::String),
        );
        if let Some(id) = &self.id {
            doc.insert(ID_FIELD.to_string(), Value::String(id.clone()));
        }
        doc
    }

    fn deserialize(&mut self, data: &Value) -> Result<&mut Self, ValidationError> {
        let doc = expect_object(data)?;
        self.name = match doc.get("name") {
            None => return Err(ValidationError::MissingField("name")),
            Some(Value::Null) => None,
            Some(Value::String(name)) => Some(name.clone()),
            Some(_) => {
                return Err(ValidationError::InvalidField {
                    field: "name",
                    message: "must be a string".to_string(),
                })
            }
        };
        adopt_document_id(self, doc);
        Ok(self)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        match self.name {
            Some(_) => Ok(()),
            None => Err(ValidationError::MissingField("name")),
        }
    }
}
