//! JSON documents and the query vocabulary shared by every backend.
//!
//! A [`Document`] is a JSON object with a string `id` field. Collections are
//! queried with [`Filter`] trees over dotted field paths, modified with
//! [`Update`] operation lists, and read with [`FindOptions`]. The in-memory
//! backend evaluates these directly; the `PostgreSQL` backend compiles
//! filters to JSONB path expressions and reuses [`Update::apply`] for
//! read-modify-write under a row lock, so both backends share one semantics.

use std::cmp::Ordering;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::DbError;

/// A JSON object stored in a collection.
pub type Document = Map<String, Value>;

/// Name of the primary key field every document carries.
pub const ID_FIELD: &str = "id";

/// Serialize a value into a [`Document`].
///
/// # Errors
///
/// Returns [`DbError::InvalidDocument`] if the value is not a JSON object.
pub fn to_document<T: Serialize>(value: &T) -> Result<Document, DbError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(DbError::InvalidDocument(format!(
            "expected a JSON object, got {}",
            type_name(&other)
        ))),
    }
}

/// Deserialize a [`Document`] into a typed value.
///
/// # Errors
///
/// Returns [`DbError::Serialization`] if the shape does not match.
pub fn from_document<T: DeserializeOwned>(doc: Document) -> Result<T, DbError> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}

/// Read the string `id` of a document.
///
/// # Errors
///
/// Returns [`DbError::InvalidDocument`] if `id` is missing or not a string.
pub fn document_id(doc: &Document) -> Result<&str, DbError> {
    doc.get(ID_FIELD)
        .and_then(Value::as_str)
        .ok_or_else(|| DbError::InvalidDocument("document has no string id".to_owned()))
}

/// Resolve a dotted path (`systemMetadata.storedSize`) inside a document.
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = doc.get(first)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Write a value at a dotted path, creating intermediate objects.
fn set_path(doc: &mut Document, path: &str, value: Value) -> Result<(), DbError> {
    let mut parts: Vec<&str> = path.split('.').collect();
    let Some(last) = parts.pop() else {
        return Err(DbError::InvalidDocument("empty field path".to_owned()));
    };
    let mut current = doc;
    for part in parts {
        let entry = current
            .entry(part.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        current = entry.as_object_mut().ok_or_else(|| {
            DbError::InvalidDocument(format!("path segment {part} of {path} is not an object"))
        })?;
    }
    current.insert(last.to_owned(), value);
    Ok(())
}

/// Remove the value at a dotted path, if present.
fn remove_path(doc: &mut Document, path: &str) {
    let mut parts: Vec<&str> = path.split('.').collect();
    let Some(last) = parts.pop() else {
        return;
    };
    let mut current = doc;
    for part in parts {
        match current.get_mut(part).and_then(Value::as_object_mut) {
            Some(next) => current = next,
            None => return,
        }
    }
    current.remove(last);
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Order two JSON scalars of the same type.
///
/// Numbers compare numerically, strings lexically (byte order), booleans
/// `false < true`. Values of different types, arrays, and objects are
/// unordered.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                Some(x.cmp(&y))
            } else if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                Some(x.cmp(&y))
            } else {
                x.as_f64()?.partial_cmp(&y.as_f64()?)
            }
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Equality that treats `1` and `1.0` as the same number.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

/// Order used by sorts: missing values first, then by [`compare_values`].
fn sort_cmp(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => compare_values(a, b).unwrap_or(Ordering::Equal),
    }
}

// =========================================================================
// Filters
// =========================================================================

/// A predicate over documents.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document.
    All,
    /// Field equals value.
    Eq(String, Value),
    /// Field is missing or differs from value.
    Ne(String, Value),
    /// Field equals one of the values.
    In(String, Vec<Value>),
    /// Field is greater than value.
    Gt(String, Value),
    /// Field is greater than or equal to value.
    Gte(String, Value),
    /// Field is less than value.
    Lt(String, Value),
    /// Field is less than or equal to value.
    Lte(String, Value),
    /// Field is present (`true`) or absent (`false`).
    Exists(String, bool),
    /// All sub-filters match.
    And(Vec<Filter>),
    /// Any sub-filter matches.
    Or(Vec<Filter>),
}

impl Filter {
    /// `field == value`.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(field.into(), value.into())
    }

    /// `field != value` (or missing).
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Ne(field.into(), value.into())
    }

    /// `field IN values`.
    pub fn in_values<V: Into<Value>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::In(field.into(), values.into_iter().map(Into::into).collect())
    }

    /// `field > value`.
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gt(field.into(), value.into())
    }

    /// `field >= value`.
    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gte(field.into(), value.into())
    }

    /// `field < value`.
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lt(field.into(), value.into())
    }

    /// `field <= value`.
    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lte(field.into(), value.into())
    }

    /// Field presence test.
    pub fn exists(field: impl Into<String>, present: bool) -> Self {
        Self::Exists(field.into(), present)
    }

    /// Combine with another filter using AND, flattening nested ANDs.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::All, f) | (f, Self::All) => f,
            (Self::And(mut a), Self::And(b)) => {
                a.extend(b);
                Self::And(a)
            }
            (Self::And(mut a), f) => {
                a.push(f);
                Self::And(a)
            }
            (f, Self::And(mut b)) => {
                b.insert(0, f);
                Self::And(b)
            }
            (a, b) => Self::And(vec![a, b]),
        }
    }

    /// Evaluate the filter against a document.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Self::All => true,
            Self::Eq(field, value) => get_path(doc, field).is_some_and(|v| values_equal(v, value)),
            Self::Ne(field, value) => !get_path(doc, field).is_some_and(|v| values_equal(v, value)),
            Self::In(field, values) => get_path(doc, field)
                .is_some_and(|v| values.iter().any(|candidate| values_equal(v, candidate))),
            Self::Gt(field, value) => range_match(doc, field, value, |o| o == Ordering::Greater),
            Self::Gte(field, value) => range_match(doc, field, value, |o| o != Ordering::Less),
            Self::Lt(field, value) => range_match(doc, field, value, |o| o == Ordering::Less),
            Self::Lte(field, value) => range_match(doc, field, value, |o| o != Ordering::Greater),
            Self::Exists(field, present) => get_path(doc, field).is_some() == *present,
            Self::And(filters) => filters.iter().all(|f| f.matches(doc)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(doc)),
        }
    }

    /// Every field path referenced by this filter.
    pub fn fields(&self) -> Vec<&str> {
        match self {
            Self::All => Vec::new(),
            Self::Eq(f, _)
            | Self::Ne(f, _)
            | Self::In(f, _)
            | Self::Gt(f, _)
            | Self::Gte(f, _)
            | Self::Lt(f, _)
            | Self::Lte(f, _)
            | Self::Exists(f, _) => vec![f.as_str()],
            Self::And(filters) | Self::Or(filters) => {
                filters.iter().flat_map(Self::fields).collect()
            }
        }
    }
}

fn range_match(
    doc: &Document,
    field: &str,
    bound: &Value,
    accept: impl Fn(Ordering) -> bool,
) -> bool {
    get_path(doc, field)
        .and_then(|v| compare_values(v, bound))
        .is_some_and(accept)
}

// =========================================================================
// Updates
// =========================================================================

/// One modification applied by [`Update`].
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    /// Overwrite the field.
    Set(String, Value),
    /// Write the field only if it is currently absent or null.
    SetIfMissing(String, Value),
    /// Remove the field.
    Unset(String),
    /// Add to a numeric field (missing counts as 0).
    Inc(String, i64),
    /// Append values to an array field (missing counts as empty).
    Push(String, Vec<Value>),
}

/// An ordered list of [`UpdateOp`]s applied atomically to one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    ops: Vec<UpdateOp>,
}

impl Update {
    /// Create an empty update.
    pub const fn new() -> Self {
        Self { ops: Vec::new() }
    }

    /// Append a [`UpdateOp::Set`].
    #[must_use]
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Set(field.into(), value.into()));
        self
    }

    /// Append a [`UpdateOp::SetIfMissing`].
    #[must_use]
    pub fn set_if_missing(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::SetIfMissing(field.into(), value.into()));
        self
    }

    /// Append a [`UpdateOp::Unset`].
    #[must_use]
    pub fn unset(mut self, field: impl Into<String>) -> Self {
        self.ops.push(UpdateOp::Unset(field.into()));
        self
    }

    /// Append a [`UpdateOp::Inc`].
    #[must_use]
    pub fn inc(mut self, field: impl Into<String>, by: i64) -> Self {
        self.ops.push(UpdateOp::Inc(field.into(), by));
        self
    }

    /// Append a [`UpdateOp::Push`].
    #[must_use]
    pub fn push(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.ops.push(UpdateOp::Push(field.into(), values));
        self
    }

    /// The operations in application order.
    pub fn ops(&self) -> &[UpdateOp] {
        &self.ops
    }

    /// Apply every operation to a document in place.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidDocument`] if an operation targets the `id`
    /// field, increments a non-number, or pushes onto a non-array. The
    /// document may be partially modified in that case; backends apply
    /// updates to a copy and discard it on error.
    pub fn apply(&self, doc: &mut Document) -> Result<(), DbError> {
        for op in &self.ops {
            match op {
                UpdateOp::Set(field, value) => {
                    guard_id(field)?;
                    set_path(doc, field, value.clone())?;
                }
                UpdateOp::SetIfMissing(field, value) => {
                    guard_id(field)?;
                    if get_path(doc, field).is_none_or(Value::is_null) {
                        set_path(doc, field, value.clone())?;
                    }
                }
                UpdateOp::Unset(field) => {
                    guard_id(field)?;
                    remove_path(doc, field);
                }
                UpdateOp::Inc(field, by) => {
                    guard_id(field)?;
                    let current = match get_path(doc, field) {
                        None | Some(Value::Null) => 0,
                        Some(v) => v.as_i64().ok_or_else(|| {
                            DbError::InvalidDocument(format!("cannot increment non-integer {field}"))
                        })?,
                    };
                    let next = current.checked_add(*by).ok_or_else(|| {
                        DbError::InvalidDocument(format!("increment of {field} overflows"))
                    })?;
                    set_path(doc, field, Value::from(next))?;
                }
                UpdateOp::Push(field, values) => {
                    guard_id(field)?;
                    let mut array = match get_path(doc, field) {
                        None | Some(Value::Null) => Vec::new(),
                        Some(Value::Array(items)) => items.clone(),
                        Some(_) => {
                            return Err(DbError::InvalidDocument(format!(
                                "cannot push onto non-array {field}"
                            )));
                        }
                    };
                    array.extend(values.iter().cloned());
                    set_path(doc, field, Value::Array(array))?;
                }
            }
        }
        Ok(())
    }
}

fn guard_id(field: &str) -> Result<(), DbError> {
    if field == ID_FIELD {
        Err(DbError::InvalidDocument("the id field is immutable".to_owned()))
    } else {
        Ok(())
    }
}

// =========================================================================
// Find options, indexes, guards
// =========================================================================

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Smallest first.
    Ascending,
    /// Largest first.
    Descending,
}

/// Sorting, paging, and projection for reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
    /// Sort keys in priority order. Ties fall back to `id` ascending.
    pub sort: Vec<(String, SortOrder)>,
    /// Maximum number of documents to return.
    pub limit: Option<usize>,
    /// Number of matching documents to skip.
    pub skip: usize,
    /// Field paths to keep (plus `id`); `None` returns whole documents.
    pub projection: Option<Vec<String>>,
}

impl FindOptions {
    /// Options returning every matching document in id order.
    pub const fn new() -> Self {
        Self {
            sort: Vec::new(),
            limit: None,
            skip: 0,
            projection: None,
        }
    }

    /// Add an ascending sort key.
    #[must_use]
    pub fn sort_asc(mut self, field: impl Into<String>) -> Self {
        self.sort.push((field.into(), SortOrder::Ascending));
        self
    }

    /// Add a descending sort key.
    #[must_use]
    pub fn sort_desc(mut self, field: impl Into<String>) -> Self {
        self.sort.push((field.into(), SortOrder::Descending));
        self
    }

    /// Limit the number of results.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first `skip` results.
    #[must_use]
    pub const fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    /// Only return the given field paths (and `id`).
    #[must_use]
    pub fn project(mut self, fields: &[&str]) -> Self {
        self.projection = Some(fields.iter().map(|f| (*f).to_owned()).collect());
        self
    }
}

/// Sort documents in place according to `sort`, tie-breaking on `id`.
pub fn sort_documents(docs: &mut [Document], sort: &[(String, SortOrder)]) {
    docs.sort_by(|a, b| {
        for (field, order) in sort {
            let ord = sort_cmp(get_path(a, field), get_path(b, field));
            let ord = match order {
                SortOrder::Ascending => ord,
                SortOrder::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        sort_cmp(a.get(ID_FIELD), b.get(ID_FIELD))
    });
}

/// Keep only the projected paths (and `id`) of a document.
pub fn project(doc: &Document, fields: &[String]) -> Document {
    let mut out = Document::new();
    if let Some(id) = doc.get(ID_FIELD) {
        out.insert(ID_FIELD.to_owned(), id.clone());
    }
    for field in fields {
        if let Some(value) = get_path(doc, field) {
            // Paths were validated on the source document, so this cannot fail.
            let _ = set_path(&mut out, field, value.clone());
        }
    }
    out
}

/// Apply skip, limit, and projection to an already sorted result set.
pub fn page(docs: Vec<Document>, options: &FindOptions) -> Vec<Document> {
    let limit = options.limit.unwrap_or(usize::MAX);
    let page = docs.into_iter().skip(options.skip).take(limit);
    let Some(fields) = &options.projection else {
        return page.collect();
    };
    page.map(|doc| project(&doc, fields)).collect()
}

/// A secondary index declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Index name, unique within a collection.
    pub name: String,
    /// Indexed field paths, in order.
    pub fields: Vec<String>,
    /// Whether the field tuple must be unique across documents.
    pub unique: bool,
    /// Whether the (single) field holds an expiry timestamp.
    pub ttl: bool,
}

impl IndexSpec {
    /// A non-unique index over `fields`.
    pub fn new(name: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            name: name.into(),
            fields: fields.iter().map(|f| (*f).to_owned()).collect(),
            unique: false,
            ttl: false,
        }
    }

    /// Mark the index unique.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Mark the index as an expiry index.
    #[must_use]
    pub const fn ttl(mut self) -> Self {
        self.ttl = true;
        self
    }

    /// The index key of a document, or `None` if every field is missing
    /// (such documents are not constrained by a unique index).
    pub fn key_of(&self, doc: &Document) -> Option<Vec<Value>> {
        let key: Vec<Option<&Value>> = self.fields.iter().map(|f| get_path(doc, f)).collect();
        if key.iter().all(Option::is_none) {
            return None;
        }
        Some(
            key.into_iter()
                .map(|v| v.cloned().unwrap_or(Value::Null))
                .collect(),
        )
    }
}

/// Precondition for [`insert_many_guarded`](crate::DocumentCollection::insert_many_guarded).
///
/// The maximum of `field` over documents matching `filter` (0 when none
/// match) must equal `expected` at the moment of the insert.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionGuard {
    /// Documents the maximum is computed over.
    pub filter: Filter,
    /// Integer field whose maximum is checked.
    pub field: String,
    /// Required maximum.
    pub expected: i64,
}

/// Validate a field path for use inside SQL DDL.
///
/// # Errors
///
/// Returns [`DbError::Config`] for anything other than dotted
/// alphanumeric/underscore segments.
pub fn validate_field_path(path: &str) -> Result<(), DbError> {
    let ok = !path.is_empty()
        && path.split('.').all(|seg| {
            !seg.is_empty() && seg.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if ok {
        Ok(())
    } else {
        Err(DbError::Config(format!("invalid field path: {path:?}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => Document::new(),
        }
    }

    #[test]
    fn filters_compare_numbers_across_representations() {
        let d = doc(json!({"id": "a", "version": 3}));
        assert!(Filter::eq("version", 3.0).matches(&d));
        assert!(Filter::gt("version", 2).matches(&d));
        assert!(!Filter::lt("version", 3).matches(&d));
        assert!(Filter::lte("version", 3).matches(&d));
    }

    #[test]
    fn missing_fields_never_satisfy_ranges() {
        let d = doc(json!({"id": "a"}));
        assert!(!Filter::gt("version", 0).matches(&d));
        assert!(!Filter::lt("version", 10).matches(&d));
        assert!(Filter::ne("version", 1).matches(&d));
        assert!(Filter::exists("version", false).matches(&d));
    }

    #[test]
    fn nested_paths_resolve() {
        let d = doc(json!({"id": "a", "systemMetadata": {"storedSize": 42}}));
        assert!(Filter::eq("systemMetadata.storedSize", 42).matches(&d));
        let projected = project(&d, &["systemMetadata.storedSize".to_owned()]);
        assert_eq!(
            Value::Object(projected),
            json!({"id": "a", "systemMetadata": {"storedSize": 42}})
        );
    }

    #[test]
    fn and_flattens() {
        let f = Filter::eq("a", 1).and(Filter::eq("b", 2)).and(Filter::All);
        assert_eq!(f, Filter::And(vec![Filter::eq("a", 1), Filter::eq("b", 2)]));
    }

    #[test]
    fn update_ops_apply_in_order() {
        let mut d = doc(json!({"id": "s", "version": 1, "events": [1]}));
        Update::new()
            .push("events", vec![json!(2), json!(3)])
            .set("version", 3)
            .inc("eventCount", 2)
            .set_if_missing("oldestEventAt", "t1")
            .set_if_missing("version", 99)
            .apply(&mut d)
            .unwrap();
        assert_eq!(
            Value::Object(d),
            json!({"id": "s", "version": 3, "events": [1, 2, 3], "eventCount": 2, "oldestEventAt": "t1"})
        );
    }

    #[test]
    fn update_refuses_to_touch_id() {
        let mut d = doc(json!({"id": "s"}));
        assert!(Update::new().set("id", "other").apply(&mut d).is_err());
    }

    #[test]
    fn sort_puts_missing_first_and_breaks_ties_on_id() {
        let mut docs = vec![
            doc(json!({"id": "c", "v": 2})),
            doc(json!({"id": "b"})),
            doc(json!({"id": "a", "v": 2})),
            doc(json!({"id": "d", "v": 1})),
        ];
        sort_documents(&mut docs, &[("v".to_owned(), SortOrder::Ascending)]);
        let ids: Vec<&str> = docs.iter().map(|d| document_id(d).unwrap()).collect();
        assert_eq!(ids, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn unique_key_ignores_documents_without_fields() {
        let spec = IndexSpec::new("agg_version", &["aggregateId", "version"]).unique();
        assert!(spec.key_of(&doc(json!({"id": "x"}))).is_none());
        assert_eq!(
            spec.key_of(&doc(json!({"id": "x", "aggregateId": "a", "version": 1}))),
            Some(vec![json!("a"), json!(1)])
        );
    }

    #[test]
    fn field_paths_are_validated() {
        assert!(validate_field_path("systemMetadata.storedSize").is_ok());
        assert!(validate_field_path("a'; drop table x; --").is_err());
        assert!(validate_field_path("a..b").is_err());
    }
}
