//! Vector database access
//!
//! This module defines the [`VectorStore`] seam used by every pipeline
//! component and provides:
//! - [`QdrantStore`]: the gRPC-backed implementation
//! - [`MemoryStore`]: an in-process implementation for tests and dry runs
//!
//! A single store handle is created per run and passed by reference.

mod memory;
mod payload;
mod qdrant;

pub use memory::*;
pub use payload::*;
pub use qdrant::*;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Storage identifier of a point
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointKey {
    Num(u64),
    Uuid(Uuid),
}

impl PointKey {
    /// JSON form stored in payload fields such as `linked_record_id`
    pub fn to_json(&self) -> Value {
        match self {
            PointKey::Num(n) => Value::from(*n),
            PointKey::Uuid(u) => Value::String(u.to_string()),
        }
    }

    /// Parse an identifier from a JSON payload value
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_u64().map(PointKey::Num),
            Value::String(s) => s
                .parse::<u64>()
                .ok()
                .map(PointKey::Num)
                .or_else(|| Uuid::try_parse(s).ok().map(PointKey::Uuid)),
            _ => None,
        }
    }

    pub fn as_num(&self) -> Option<u64> {
        match self {
            PointKey::Num(n) => Some(*n),
            PointKey::Uuid(_) => None,
        }
    }
}

impl fmt::Display for PointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointKey::Num(n) => write!(f, "{}", n),
            PointKey::Uuid(u) => write!(f, "{}", u),
        }
    }
}

/// A point ready to be written
#[derive(Debug, Clone)]
pub struct RecordPoint {
    pub id: PointKey,
    pub vector: Vec<f32>,
    pub payload: Map<String, Value>,
}

/// A point read back from a collection (payload only)
#[derive(Debug, Clone)]
pub struct StoredPoint {
    pub id: PointKey,
    pub payload: Map<String, Value>,
}

/// What the store reports about an existing collection
#[derive(Debug, Clone, Default)]
pub struct CollectionDescriptor {
    /// (vector name, size); a single unnamed vector is reported as "default"
    pub vector_sizes: Vec<(String, u64)>,
    pub indexed_fields: Vec<String>,
    pub points_count: u64,
}

/// Exact-match value for a payload filter
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Keyword(String),
    Integer(i64),
}

impl FilterValue {
    /// Build a filter value from a payload value; only strings and integers are matchable
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(FilterValue::Keyword(s.clone())),
            Value::Number(n) => n.as_i64().map(FilterValue::Integer),
            _ => None,
        }
    }

    /// Whether a payload value matches (arrays match on any element)
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (FilterValue::Keyword(expected), Value::String(s)) => expected == s,
            (FilterValue::Integer(expected), Value::Number(n)) => n.as_i64() == Some(*expected),
            (_, Value::Array(items)) => items.iter().any(|item| self.matches(item)),
            _ => false,
        }
    }
}

/// Single-field equality condition
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMatch {
    pub field: String,
    pub value: FilterValue,
}

impl FieldMatch {
    pub fn new(field: impl Into<String>, value: FilterValue) -> Self {
        Self {
            field: field.into(),
            value,
        }
    }

    pub fn keyword(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(field, FilterValue::Keyword(value.into()))
    }
}

/// Conjunction of `must` conditions and, when non-empty, at least one `should`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointFilter {
    pub must: Vec<FieldMatch>,
    pub should: Vec<FieldMatch>,
}

impl PointFilter {
    pub fn must(conditions: Vec<FieldMatch>) -> Self {
        Self {
            must: conditions,
            should: Vec::new(),
        }
    }

    pub fn any_of(conditions: Vec<FieldMatch>) -> Self {
        Self {
            must: Vec::new(),
            should: conditions,
        }
    }

    /// Evaluate the filter against a payload
    pub fn matches(&self, payload: &Map<String, Value>) -> bool {
        let hit = |cond: &FieldMatch| {
            payload
                .get(&cond.field)
                .map(|value| cond.value.matches(value))
                .unwrap_or(false)
        };

        self.must.iter().all(hit) && (self.should.is_empty() || self.should.iter().any(hit))
    }
}

/// Operations the pipeline needs from a vector database
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Fail fast when the database cannot be reached
    async fn health_check(&self) -> Result<()>;

    async fn collection_exists(&self, collection: &str) -> Result<bool>;

    /// Describe a collection, or `None` if it does not exist
    async fn describe_collection(&self, collection: &str) -> Result<Option<CollectionDescriptor>>;

    /// Create a collection with one unnamed cosine vector
    async fn create_collection(&self, collection: &str, vector_size: u64) -> Result<()>;

    /// Create a keyword payload index
    async fn create_keyword_index(&self, collection: &str, field: &str) -> Result<()>;

    /// First point matching the filter, by the store's natural order
    async fn find_first(&self, collection: &str, filter: &PointFilter)
        -> Result<Option<StoredPoint>>;

    /// Largest numeric point id in the collection
    async fn max_numeric_id(&self, collection: &str) -> Result<Option<u64>>;

    /// Write a batch of points in one call, replacing existing ids
    async fn upsert_points(&self, collection: &str, points: Vec<RecordPoint>) -> Result<()>;

    /// Merge payload fields into one existing point
    async fn set_payload(
        &self,
        collection: &str,
        id: &PointKey,
        payload: Map<String, Value>,
    ) -> Result<()>;
}
