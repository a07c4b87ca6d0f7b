use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;

/// Field map of a document, as written by the application.
pub type Document = Map<String, Value>;

/// Full ordered result sets pushed by a live query. Dropping the stream
/// releases the subscription.
pub type SnapshotStream = BoxStream<'static, Result<Vec<StoredRecord>, StoreError>>;

/// Name of the store-assigned creation timestamp, usable as an order key.
pub const CREATED_AT: &str = "created_at";

/// A document as held by the store: application fields plus the id and
/// timestamp the store assigned on insert.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub fields: Document,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn descending(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: Direction::Descending,
        }
    }

    pub fn ascending(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: Direction::Ascending,
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new document. The store assigns the id and `created_at`.
    async fn insert(&self, collection: &str, fields: Document) -> Result<StoredRecord, StoreError>;

    /// Delete a document on behalf of `caller`. Stores with an owner rule
    /// reject callers that do not own the record.
    async fn delete(&self, collection: &str, id: &str, caller: &str) -> Result<(), StoreError>;

    /// Open a live query. The first item is the current result set, every
    /// later item is the full result set after a change.
    async fn subscribe_ordered(
        &self,
        collection: &str,
        order: OrderBy,
    ) -> Result<SnapshotStream, StoreError>;
}

/// Sort records the way a live query orders them. The sort is stable, so
/// ties keep the order the store produced them in.
pub fn sort_records(records: &mut [StoredRecord], order: &OrderBy) {
    records.sort_by(|a, b| {
        let ordering = if order.field == CREATED_AT {
            a.created_at.cmp(&b.created_at)
        } else {
            compare_values(a.fields.get(&order.field), b.fields.get(&order.field))
        };
        match order.direction {
            Direction::Ascending => ordering,
            Direction::Descending => ordering.reverse(),
        }
    });
}

// Numbers before strings before everything else; missing values last.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Number(_) => 0,
            Value::String(_) => 1,
            Value::Bool(_) => 2,
            _ => 3,
        }
    }

    match (a, b) {
        (Some(a), Some(b)) => match (a, b) {
            (Value::Number(x), Value::Number(y)) => {
                let x = x.as_f64().unwrap_or(0.0);
                let y = y.as_f64().unwrap_or(0.0);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
            (Value::String(x), Value::String(y)) => x.cmp(y),
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            _ => rank(a).cmp(&rank(b)),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
