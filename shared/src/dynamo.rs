//! DynamoDB-backed document store.
//!
//! Layout: one item per document, `PK = COLLECTION#{collection}`,
//! `SK = {id}`, a `created_at` RFC 3339 string, and each document field as
//! its own attribute. DynamoDB has no client push, so live queries poll the
//! partition and emit a snapshot whenever the result set changes.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use feedline_atoms::backend::{
    sort_records, Document, DocumentStore, OrderBy, SnapshotStream, StoredRecord, CREATED_AT,
};
use feedline_atoms::StoreError;
use futures::StreamExt;
use serde_json::Value;

const RESERVED: [&str; 3] = ["PK", "SK", CREATED_AT];

#[derive(Clone)]
pub struct DynamoDocumentStore {
    client: DynamoClient,
    table_name: String,
    owner_field: Option<String>,
    poll_interval: Duration,
}

impl DynamoDocumentStore {
    pub fn new(client: DynamoClient, table_name: &str, poll_interval: Duration) -> Self {
        Self {
            client,
            table_name: table_name.to_string(),
            owner_field: None,
            poll_interval,
        }
    }

    /// Only let callers delete items whose `field` attribute equals their id.
    pub fn with_owner_field(mut self, field: &str) -> Self {
        self.owner_field = Some(field.to_string());
        self
    }

    /// Query a whole collection and order it.
    async fn load(&self, collection: &str, order: &OrderBy) -> Result<Vec<StoredRecord>, StoreError> {
        let mut records = Vec::new();
        let mut start_key: Option<HashMap<String, AttributeValue>> = None;

        loop {
            let result = self
                .client
                .query()
                .table_name(&self.table_name)
                .key_condition_expression("PK = :pk")
                .expression_attribute_values(":pk", AttributeValue::S(partition(collection)))
                .consistent_read(true)
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| StoreError::Backend(format!("DynamoDB query error: {}", e)))?;

            for item in result.items() {
                match record_from_item(item) {
                    Ok(record) => records.push(record),
                    Err(e) => tracing::warn!("skipping item in {}: {}", collection, e),
                }
            }

            match result.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }

        sort_records(&mut records, order);
        Ok(records)
    }

    /// Tell a failed delete condition apart: missing item or wrong owner.
    async fn classify_rejected_delete(&self, collection: &str, id: &str) -> StoreError {
        let existing = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(partition(collection)))
            .key("SK", AttributeValue::S(id.to_string()))
            .consistent_read(true)
            .send()
            .await;

        match existing {
            Ok(out) if out.item().is_some() => {
                StoreError::PermissionDenied(format!("caller may not delete {}/{}", collection, id))
            }
            Ok(_) => StoreError::NotFound(id.to_string()),
            Err(e) => StoreError::Backend(format!("DynamoDB get_item error: {}", e)),
        }
    }
}

fn partition(collection: &str) -> String {
    format!("COLLECTION#{}", collection)
}

#[async_trait]
impl DocumentStore for DynamoDocumentStore {
    async fn insert(&self, collection: &str, fields: Document) -> Result<StoredRecord, StoreError> {
        if let Some(key) = fields.keys().find(|k| RESERVED.contains(&k.as_str())) {
            return Err(StoreError::Malformed {
                id: "(new)".to_string(),
                reason: format!("{} is a reserved attribute", key),
            });
        }

        let id = uuid::Uuid::new_v4().to_string();
        // Stored with microsecond precision; truncate so the returned record
        // matches what a later query reads back.
        let created_at = Utc::now().trunc_subsecs(6);

        let mut builder = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .item("PK", AttributeValue::S(partition(collection)))
            .item("SK", AttributeValue::S(id.clone()))
            .item(
                CREATED_AT,
                AttributeValue::S(created_at.to_rfc3339_opts(SecondsFormat::Micros, true)),
            )
            .condition_expression("attribute_not_exists(SK)");

        for (key, value) in &fields {
            builder = builder.item(key, to_attribute(value));
        }

        builder
            .send()
            .await
            .map_err(|e| StoreError::Backend(format!("DynamoDB put_item error: {}", e)))?;

        tracing::debug!("put {}/{}", collection, id);
        Ok(StoredRecord {
            id,
            created_at,
            fields,
        })
    }

    async fn delete(&self, collection: &str, id: &str, caller: &str) -> Result<(), StoreError> {
        let builder = self
            .client
            .delete_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(partition(collection)))
            .key("SK", AttributeValue::S(id.to_string()));

        let builder = match &self.owner_field {
            Some(field) => builder
                .condition_expression("attribute_exists(SK) AND #owner = :caller")
                .expression_attribute_names("#owner", field)
                .expression_attribute_values(":caller", AttributeValue::S(caller.to_string())),
            None => builder.condition_expression("attribute_exists(SK)"),
        };

        match builder.send().await {
            Ok(_) => {
                tracing::debug!("deleted {}/{} by {}", collection, id, caller);
                Ok(())
            }
            Err(e) => {
                let rejected = e
                    .as_service_error()
                    .map(|se| se.is_conditional_check_failed_exception())
                    .unwrap_or(false);
                if rejected {
                    Err(self.classify_rejected_delete(collection, id).await)
                } else {
                    Err(StoreError::Backend(format!("DynamoDB delete_item error: {}", e)))
                }
            }
        }
    }

    async fn subscribe_ordered(
        &self,
        collection: &str,
        order: OrderBy,
    ) -> Result<SnapshotStream, StoreError> {
        let store = self.clone();
        let collection = collection.to_string();

        // State: (last emitted snapshot, whether to wait before querying)
        let stream = futures::stream::unfold(
            (None::<Vec<StoredRecord>>, false),
            move |(last, mut wait)| {
                let store = store.clone();
                let collection = collection.clone();
                let order = order.clone();
                async move {
                    loop {
                        if wait {
                            tokio::time::sleep(store.poll_interval).await;
                        }
                        wait = true;

                        match store.load(&collection, &order).await {
                            Ok(records) if last.as_ref() == Some(&records) => continue,
                            Ok(records) => return Some((Ok(records.clone()), (Some(records), true))),
                            Err(e) => return Some((Err(e), (last, true))),
                        }
                    }
                }
            },
        );

        Ok(stream.boxed())
    }
}

fn record_from_item(item: &HashMap<String, AttributeValue>) -> Result<StoredRecord, StoreError> {
    let id = item
        .get("SK")
        .and_then(|v| v.as_s().ok())
        .cloned()
        .ok_or_else(|| StoreError::Malformed {
            id: "(unknown)".to_string(),
            reason: "missing SK".to_string(),
        })?;

    let created_at = item
        .get(CREATED_AT)
        .and_then(|v| v.as_s().ok())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| StoreError::Malformed {
            id: id.clone(),
            reason: "missing or invalid created_at".to_string(),
        })?;

    let fields = item
        .iter()
        .filter(|(k, _)| !RESERVED.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), from_attribute(v)))
        .collect();

    Ok(StoredRecord {
        id,
        created_at,
        fields,
    })
}

pub fn to_attribute(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(items) => AttributeValue::L(items.iter().map(to_attribute).collect()),
        Value::Object(map) => AttributeValue::M(
            map.iter()
                .map(|(k, v)| (k.clone(), to_attribute(v)))
                .collect(),
        ),
    }
}

pub fn from_attribute(attr: &AttributeValue) -> Value {
    match attr {
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => parse_number(n),
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::L(items) => Value::Array(items.iter().map(from_attribute).collect()),
        AttributeValue::M(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), from_attribute(v)))
                .collect(),
        ),
        AttributeValue::Ss(items) => Value::Array(items.iter().cloned().map(Value::String).collect()),
        AttributeValue::Ns(items) => Value::Array(items.iter().map(|n| parse_number(n)).collect()),
        // Binary attributes are never written by this store
        _ => Value::Null,
    }
}

fn parse_number(n: &str) -> Value {
    n.parse::<serde_json::Number>()
        .map(Value::Number)
        .unwrap_or_else(|_| Value::String(n.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn attributes_preserve_json_values() {
        let value = json!({
            "text": "hi",
            "count": 3,
            "ratio": 0.5,
            "flag": true,
            "nothing": null,
            "tags": ["a", 1],
            "nested": {"k": "v"}
        });
        assert_eq!(from_attribute(&to_attribute(&value)), value);
    }

    #[test]
    fn item_becomes_record_without_key_attributes() {
        let mut item = HashMap::new();
        item.insert("PK".to_string(), AttributeValue::S(partition("posts")));
        item.insert("SK".to_string(), AttributeValue::S("p1".to_string()));
        item.insert(
            CREATED_AT.to_string(),
            AttributeValue::S("2024-05-01T10:00:00.123456Z".to_string()),
        );
        item.insert("author_id".to_string(), AttributeValue::S("u1".to_string()));

        let record = record_from_item(&item).unwrap();
        assert_eq!(record.id, "p1");
        assert_eq!(record.created_at.timestamp_subsec_micros(), 123456);
        assert_eq!(Value::Object(record.fields), json!({"author_id": "u1"}));
    }

    #[test]
    fn item_without_timestamp_is_malformed() {
        let mut item = HashMap::new();
        item.insert("SK".to_string(), AttributeValue::S("p1".to_string()));
        let err = record_from_item(&item).unwrap_err();
        assert!(matches!(err, StoreError::Malformed { ref id, .. } if id == "p1"));
    }

    #[test]
    fn string_sets_become_arrays() {
        let attr = AttributeValue::Ss(vec!["x".to_string(), "y".to_string()]);
        assert_eq!(from_attribute(&attr), json!(["x", "y"]));
        assert_eq!(from_attribute(&AttributeValue::Ns(vec!["7".into()])), json!([7]));
    }
}
