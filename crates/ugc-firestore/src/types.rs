//! Firestore REST API types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Firestore document value types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Value {
    NullValue(()),
    BooleanValue(bool),
    /// Firestore sends integers as strings
    IntegerValue(String),
    DoubleValue(f64),
    TimestampValue(String),
    StringValue(String),
    ArrayValue(ArrayValue),
    MapValue(MapValue),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<HashMap<String, Value>>,
}

pub type Fields = HashMap<String, Value>;

/// Firestore document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Fields>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
}

impl Document {
    pub fn new(fields: Fields) -> Self {
        Self {
            fields: Some(fields),
            ..Default::default()
        }
    }

    pub fn named(name: impl Into<String>, fields: Fields) -> Self {
        Self {
            name: Some(name.into()),
            fields: Some(fields),
            ..Default::default()
        }
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.as_ref().and_then(|f| f.get(key))
    }

    pub fn get<T: FromFirestoreValue>(&self, key: &str) -> Option<T> {
        self.field(key).and_then(T::from_firestore_value)
    }

    /// Last path segment of the resource name.
    pub fn id(&self) -> Option<&str> {
        self.name.as_deref().and_then(|n| n.rsplit('/').next())
    }
}

// ============================================================================
// Writes
// ============================================================================

/// One write in an atomic commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Write {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_mask: Option<DocumentMask>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_document: Option<Precondition>,
}

impl Write {
    pub fn update(document: Document) -> Self {
        Self {
            update: Some(document),
            delete: None,
            update_mask: None,
            current_document: None,
        }
    }

    pub fn with_mask(mut self, paths: &[&str]) -> Self {
        self.update_mask = Some(DocumentMask {
            field_paths: paths.iter().map(|p| p.to_string()).collect(),
        });
        self
    }

    pub fn with_precondition(mut self, precondition: Precondition) -> Self {
        self.current_document = Some(precondition);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMask {
    pub field_paths: Vec<String>,
}

/// Precondition on the current state of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Precondition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exists: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
}

impl Precondition {
    pub fn must_not_exist() -> Self {
        Self {
            exists: Some(false),
            update_time: None,
        }
    }

    /// Document must be unchanged since `update_time`.
    pub fn updated_at(update_time: impl Into<String>) -> Self {
        Self {
            exists: None,
            update_time: Some(update_time.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRequest {
    pub writes: Vec<Write>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResponse {
    #[serde(default)]
    pub commit_time: Option<String>,
}

// ============================================================================
// Queries
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryRequest {
    pub structured_query: StructuredQuery,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryResponse {
    #[serde(default)]
    pub document: Option<Document>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredQuery {
    pub from: Vec<CollectionSelector>,
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<Order>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl StructuredQuery {
    pub fn collection(collection_id: impl Into<String>) -> Self {
        Self {
            from: vec![CollectionSelector {
                collection_id: collection_id.into(),
            }],
            ..Default::default()
        }
    }

    /// AND `filter` onto any existing filter.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(match self.filter.take() {
            None => filter,
            Some(Filter::Composite { composite_filter }) => {
                let mut filters = composite_filter.filters;
                filters.push(filter);
                Filter::and(filters)
            }
            Some(existing) => Filter::and(vec![existing, filter]),
        });
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by.push(Order {
            field: FieldReference {
                field_path: field.to_string(),
            },
            direction,
        });
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = (offset > 0).then_some(offset);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSelector {
    pub collection_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldReference {
    pub field_path: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub field: FieldReference,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldOp {
    Equal,
    LessThan,
    GreaterThan,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Filter {
    #[serde(rename_all = "camelCase")]
    Field { field_filter: FieldFilter },
    #[serde(rename_all = "camelCase")]
    Composite { composite_filter: CompositeFilter },
}

impl Filter {
    pub fn field(field: &str, op: FieldOp, value: Value) -> Self {
        Filter::Field {
            field_filter: FieldFilter {
                field: FieldReference {
                    field_path: field.to_string(),
                },
                op,
                value,
            },
        }
    }

    pub fn eq(field: &str, value: Value) -> Self {
        Self::field(field, FieldOp::Equal, value)
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::Composite {
            composite_filter: CompositeFilter {
                op: "AND".to_string(),
                filters,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldFilter {
    pub field: FieldReference,
    pub op: FieldOp,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompositeFilter {
    pub op: String,
    pub filters: Vec<Filter>,
}

// ============================================================================
// Conversions
// ============================================================================

/// Convert a Rust value to a Firestore value.
pub trait ToFirestoreValue {
    fn to_firestore_value(&self) -> Value;
}

impl ToFirestoreValue for String {
    fn to_firestore_value(&self) -> Value {
        Value::StringValue(self.clone())
    }
}

impl ToFirestoreValue for &str {
    fn to_firestore_value(&self) -> Value {
        Value::StringValue(self.to_string())
    }
}

impl ToFirestoreValue for i64 {
    fn to_firestore_value(&self) -> Value {
        Value::IntegerValue(self.to_string())
    }
}

impl ToFirestoreValue for u64 {
    fn to_firestore_value(&self) -> Value {
        Value::IntegerValue(self.to_string())
    }
}

impl ToFirestoreValue for u32 {
    fn to_firestore_value(&self) -> Value {
        Value::IntegerValue(self.to_string())
    }
}

impl ToFirestoreValue for bool {
    fn to_firestore_value(&self) -> Value {
        Value::BooleanValue(*self)
    }
}

impl ToFirestoreValue for DateTime<Utc> {
    fn to_firestore_value(&self) -> Value {
        Value::TimestampValue(self.to_rfc3339())
    }
}

impl<T: ToFirestoreValue> ToFirestoreValue for Option<T> {
    fn to_firestore_value(&self) -> Value {
        match self {
            Some(v) => v.to_firestore_value(),
            None => Value::NullValue(()),
        }
    }
}

/// JSON maps to the closest Firestore type. Strings stay strings; callers
/// convert timestamp fields explicitly so they sort chronologically.
impl ToFirestoreValue for serde_json::Value {
    fn to_firestore_value(&self) -> Value {
        match self {
            serde_json::Value::Null => Value::NullValue(()),
            serde_json::Value::Bool(b) => Value::BooleanValue(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::IntegerValue(i.to_string()),
                None => match n.as_u64() {
                    Some(u) => Value::IntegerValue(u.to_string()),
                    None => Value::DoubleValue(n.as_f64().unwrap_or_default()),
                },
            },
            serde_json::Value::String(s) => Value::StringValue(s.clone()),
            serde_json::Value::Array(items) => Value::ArrayValue(ArrayValue {
                values: Some(items.iter().map(|v| v.to_firestore_value()).collect()),
            }),
            serde_json::Value::Object(map) => Value::MapValue(MapValue {
                fields: Some(
                    map.iter()
                        .map(|(k, v)| (k.clone(), v.to_firestore_value()))
                        .collect(),
                ),
            }),
        }
    }
}

/// Convert a Firestore value to a Rust type.
pub trait FromFirestoreValue: Sized {
    fn from_firestore_value(value: &Value) -> Option<Self>;
}

impl FromFirestoreValue for String {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::StringValue(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromFirestoreValue for i64 {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::IntegerValue(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl FromFirestoreValue for u64 {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::IntegerValue(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl FromFirestoreValue for DateTime<Utc> {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::TimestampValue(s) | Value::StringValue(s) => {
                DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
            }
            _ => None,
        }
    }
}

impl FromFirestoreValue for serde_json::Value {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        Some(match value {
            Value::NullValue(()) => serde_json::Value::Null,
            Value::BooleanValue(b) => serde_json::Value::Bool(*b),
            Value::IntegerValue(s) => match s.parse::<i64>() {
                Ok(i) => serde_json::Value::from(i),
                Err(_) => serde_json::Value::from(s.parse::<u64>().ok()?),
            },
            Value::DoubleValue(f) => serde_json::Value::from(*f),
            Value::TimestampValue(s) | Value::StringValue(s) => serde_json::Value::String(s.clone()),
            Value::ArrayValue(array) => serde_json::Value::Array(
                array
                    .values
                    .iter()
                    .flatten()
                    .filter_map(serde_json::Value::from_firestore_value)
                    .collect(),
            ),
            Value::MapValue(map) => serde_json::Value::Object(
                map.fields
                    .iter()
                    .flatten()
                    .filter_map(|(k, v)| {
                        serde_json::Value::from_firestore_value(v).map(|j| (k.clone(), j))
                    })
                    .collect(),
            ),
        })
    }
}

/// Serialize a record into document fields, storing `timestamp_fields` as
/// Firestore timestamps.
pub fn to_fields<T: Serialize>(
    record: &T,
    timestamp_fields: &[&str],
) -> crate::FirestoreResult<Fields> {
    let json = serde_json::to_value(record)?;
    let serde_json::Value::Object(map) = json else {
        return Err(crate::FirestoreError::invalid_document(
            "record did not serialize to an object",
        ));
    };

    Ok(map
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let value = match (&v, timestamp_fields.contains(&k.as_str())) {
                (serde_json::Value::String(s), true) => Value::TimestampValue(s.clone()),
                _ => v.to_firestore_value(),
            };
            (k, value)
        })
        .collect())
}

/// Deserialize a record from a document's fields.
pub fn from_document<T: serde::de::DeserializeOwned>(doc: &Document) -> crate::FirestoreResult<T> {
    let object: serde_json::Map<String, serde_json::Value> = doc
        .fields
        .iter()
        .flatten()
        .filter_map(|(k, v)| serde_json::Value::from_firestore_value(v).map(|j| (k.clone(), j)))
        .collect();
    serde_json::from_value(serde_json::Value::Object(object)).map_err(|e| {
        crate::FirestoreError::invalid_document(format!(
            "{}: {}",
            doc.name.as_deref().unwrap_or("<unnamed>"),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Row {
        amount: i64,
        created_at: DateTime<Utc>,
        note: Option<String>,
        tags: Vec<String>,
    }

    #[test]
    fn test_fields_use_timestamps_and_signed_integers() {
        let row = Row {
            amount: -1,
            created_at: Utc::now(),
            note: None,
            tags: vec!["a".into()],
        };
        let fields = to_fields(&row, &["createdAt"]).unwrap();
        assert_eq!(fields["amount"], Value::IntegerValue("-1".into()));
        assert!(matches!(fields["createdAt"], Value::TimestampValue(_)));
        assert!(!fields.contains_key("note"));

        let doc = Document::named("projects/p/databases/d/documents/rows/r1", fields);
        let back: Row = from_document(&doc).unwrap();
        assert_eq!(back, row);
        assert_eq!(doc.id(), Some("r1"));
    }

    #[test]
    fn test_query_serializes_where_clause() {
        let query = StructuredQuery::collection("videos")
            .filter(Filter::eq("userId", "u1".to_firestore_value()))
            .filter(Filter::eq("status", "FAILED".to_firestore_value()))
            .order_by("createdAt", Direction::Descending)
            .offset(0)
            .limit(10);
        let json = serde_json::to_value(&query).unwrap();
        assert_eq!(json["from"][0]["collectionId"], "videos");
        assert_eq!(json["where"]["compositeFilter"]["op"], "AND");
        assert_eq!(
            json["where"]["compositeFilter"]["filters"][1]["fieldFilter"]["field"]["fieldPath"],
            "status"
        );
        assert_eq!(json["orderBy"][0]["direction"], "DESCENDING");
        assert!(json.get("offset").is_none());
        assert_eq!(json["limit"], 10);
    }

    #[test]
    fn test_precondition_shapes() {
        let json = serde_json::to_value(Precondition::must_not_exist()).unwrap();
        assert_eq!(json, serde_json::json!({"exists": false}));
        let json = serde_json::to_value(Precondition::updated_at("2026-01-01T00:00:00Z")).unwrap();
        assert_eq!(json, serde_json::json!({"updateTime": "2026-01-01T00:00:00Z"}));
    }
}
