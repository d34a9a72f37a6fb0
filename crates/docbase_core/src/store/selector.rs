use serde_json::{json, Map, Value};
use std::fmt::{Display, Formatter};

/// Equality conjunction over document fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selector {
    fields: Map<String, Value>,
}

impl Selector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `field == value`; a repeated field replaces the earlier value.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Returns whether every field of the selector equals the document's.
    pub fn matches(&self, doc: &Map<String, Value>) -> bool {
        self.fields
            .iter()
            .all(|(field, expected)| doc.get(field) == Some(expected))
    }

    /// Mango `selector` object.
    pub fn to_json(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Selector {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |selector, (field, value)| selector.eq(field, value))
    }
}

/// Sort direction of an indexed field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }
}

impl Display for SortOrder {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single-field JSON query index, named after its field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub field: String,
    pub order: SortOrder,
}

impl IndexSpec {
    pub fn new(field: impl Into<String>, order: SortOrder) -> Self {
        let field = field.into();
        Self {
            name: field.clone(),
            field,
            order,
        }
    }

    /// `POST /{db}/_index` request body.
    pub fn to_json(&self) -> Value {
        let mut field = Map::new();
        field.insert(self.field.clone(), Value::from(self.order.as_str()));
        json!({
            "index": { "fields": [ field ] },
            "name": self.name,
            "type": "json",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{IndexSpec, Selector, SortOrder};
    use serde_json::json;

    #[test]
    fn selector_matches_only_when_all_fields_equal() {
        let selector = Selector::new().eq("name", "Rex").eq("available", true);
        let hit = json!({"name": "Rex", "available": true, "age": 3});
        let miss = json!({"name": "Rex", "available": false});

        assert!(selector.matches(hit.as_object().unwrap()));
        assert!(!selector.matches(miss.as_object().unwrap()));
    }

    #[test]
    fn selector_collects_from_pairs() {
        let selector: Selector = [("name", "Rex")].into_iter().collect();
        assert_eq!(selector.to_json(), json!({"name": "Rex"}));
    }

    #[test]
    fn index_body_uses_field_order_pair() {
        let body = IndexSpec::new("name", SortOrder::Desc).to_json();
        assert_eq!(
            body,
            json!({"index": {"fields": [{"name": "desc"}]}, "name": "name", "type": "json"})
        );
    }

    #[test]
    fn sort_order_parses_case_insensitively() {
        assert_eq!(SortOrder::parse("ASC"), Some(SortOrder::Asc));
        assert_eq!(SortOrder::parse("down"), None);
    }
}
