use crate::error::TfError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::cmp::Ordering;
use thiserror::Error;

/// Stored records are plain JSON documents.
pub type Document = Value;

/// I/O failure talking to the document store. Maps onto
/// [`TfError::StoreUnavailable`] at the query layer.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct StoreError(pub String);

impl From<StoreError> for TfError {
    fn from(err: StoreError) -> Self {
        TfError::StoreUnavailable(err.0)
    }
}

/// Query predicate over documents. Field paths are dot-separated.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Field equals the given JSON value.
    Eq(String, Value),
    /// `__recorded` lies within the half-open interval `[start, end)`.
    Recorded {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// Array field contains at least one element matching the inner filter.
    ElemMatch { path: String, inner: Box<Filter> },
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq_str(path: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Eq(path.into(), Value::String(value.into()))
    }

    pub fn matches(&self, document: &Value) -> bool {
        match self {
            Filter::Eq(path, value) => lookup_path(document, path) == Some(value),
            Filter::Recorded { start, end } => parse_recorded(document.get("__recorded"))
                .is_some_and(|at| *start <= at && at < *end),
            Filter::ElemMatch { path, inner } => lookup_path(document, path)
                .and_then(Value::as_array)
                .is_some_and(|elements| elements.iter().any(|e| inner.matches(e))),
            Filter::And(filters) => filters.iter().all(|f| f.matches(document)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(document)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone)]
pub struct Sort {
    pub field: String,
    pub order: SortOrder,
}

/// One `find` call: collection, predicate, projected fields, sort order.
#[derive(Debug, Clone)]
pub struct FindRequest {
    pub collection: String,
    pub filter: Filter,
    pub projection: Vec<String>,
    pub sort: Option<Sort>,
}

impl FindRequest {
    pub fn new(collection: impl Into<String>, filter: Filter) -> Self {
        Self {
            collection: collection.into(),
            filter,
            projection: Vec::new(),
            sort: None,
        }
    }

    pub fn project(mut self, fields: &[&str]) -> Self {
        self.projection = fields.iter().map(|f| (*f).to_string()).collect();
        self
    }

    pub fn sort_desc(mut self, field: impl Into<String>) -> Self {
        self.sort = Some(Sort {
            field: field.into(),
            order: SortOrder::Descending,
        });
        self
    }
}

/// Read-only view onto the external document store. Implementations must be
/// shareable across lookup threads; all suspension happens inside `find`
/// and cursor iteration.
pub trait DocumentStore: Send + Sync {
    fn find(&self, request: &FindRequest) -> Result<Box<dyn DocumentCursor + '_>, StoreError>;
}

/// Iteration over a result set. Dropping the cursor closes it.
pub trait DocumentCursor {
    fn next_document(&mut self) -> Result<Option<Document>, StoreError>;
}

/// Resolves a dot-separated path inside a JSON document.
pub(crate) fn lookup_path<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(document, |value, segment| value.get(segment))
}

/// Reads a stored instant: either an ISO-8601 string, a `{"$date": …}`
/// wrapper (string or epoch milliseconds), or bare epoch milliseconds.
pub(crate) fn parse_recorded(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::String(raw) => DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Object(map) => parse_recorded(map.get("$date")),
        Value::Number(millis) => millis
            .as_i64()
            .and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

/// In-process reference store: a dashmap of named collections holding JSON
/// documents, evaluating the same filter/sort/projection contract a real
/// store would. Serves tests and replay-from-memory deployments.
#[derive(Default)]
pub struct MemoryStore {
    collections: DashMap<String, Vec<Document>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, collection: &str, document: Document) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(document);
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, |c| c.len())
    }
}

impl DocumentStore for MemoryStore {
    fn find(&self, request: &FindRequest) -> Result<Box<dyn DocumentCursor + '_>, StoreError> {
        let mut matched: Vec<Document> = self
            .collections
            .get(&request.collection)
            .map(|c| c.clone())
            .unwrap_or_default()
            .into_iter()
            .filter(|d| request.filter.matches(d))
            .collect();

        if let Some(sort) = &request.sort {
            matched.sort_by(|a, b| {
                let ordering = compare_fields(a, b, &sort.field);
                match sort.order {
                    SortOrder::Ascending => ordering,
                    SortOrder::Descending => ordering.reverse(),
                }
            });
        }

        if !request.projection.is_empty() {
            for document in &mut matched {
                project(document, &request.projection);
            }
        }

        Ok(Box::new(VecCursor {
            documents: matched.into_iter(),
        }))
    }
}

fn compare_fields(a: &Value, b: &Value, field: &str) -> Ordering {
    let left = lookup_path(a, field);
    let right = lookup_path(b, field);
    // dates sort chronologically, everything else falls back to text
    match (parse_recorded(left), parse_recorded(right)) {
        (Some(l), Some(r)) => l.cmp(&r),
        _ => format!("{:?}", left).cmp(&format!("{:?}", right)),
    }
}

fn project(document: &mut Value, fields: &[String]) {
    if let Value::Object(map) = document {
        map.retain(|key, _| fields.iter().any(|f| f == key || f.starts_with(&format!("{key}."))));
    }
}

struct VecCursor {
    documents: std::vec::IntoIter<Document>,
}

impl DocumentCursor for VecCursor {
    fn next_document(&mut self) -> Result<Option<Document>, StoreError> {
        Ok(self.documents.next())
    }
}
