use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::{Document, StoredRecord};
use crate::error::StoreError;

/// Post domain model. Created once, read through the live feed, deleted by
/// its author. There is no update.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Post {
    pub post_id: String,
    pub author_id: String,
    pub text: String,
    // Empty string when the post has no image
    pub image_url: String,
    pub created_at: DateTime<Utc>,
}

/// Fields written to the store. `author_id` comes from the session, never
/// from the payload a client sends.
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct CreatePostPayload {
    #[serde(default)]
    pub author_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub image_url: String,
}

impl CreatePostPayload {
    pub fn into_document(self) -> Document {
        let mut doc = Document::new();
        doc.insert("author_id".to_string(), self.author_id.into());
        doc.insert("text".to_string(), self.text.into());
        doc.insert("image_url".to_string(), self.image_url.into());
        doc
    }
}

impl TryFrom<StoredRecord> for Post {
    type Error = StoreError;

    fn try_from(record: StoredRecord) -> Result<Self, Self::Error> {
        let fields: CreatePostPayload = serde_json::from_value(record.fields.into())
            .map_err(|e| StoreError::Malformed {
                id: record.id.clone(),
                reason: e.to_string(),
            })?;

        Ok(Post {
            post_id: record.id,
            author_id: fields.author_id,
            text: fields.text,
            image_url: fields.image_url,
            created_at: record.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(fields: serde_json::Value) -> StoredRecord {
        StoredRecord {
            id: "p1".to_string(),
            created_at: Utc::now(),
            fields: fields.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let post = Post::try_from(record(json!({"author_id": "u1"}))).unwrap();
        assert_eq!(post.post_id, "p1");
        assert_eq!(post.author_id, "u1");
        assert_eq!(post.text, "");
        assert_eq!(post.image_url, "");
    }

    #[test]
    fn wrongly_typed_fields_are_malformed() {
        let err = Post::try_from(record(json!({"author_id": 7}))).unwrap_err();
        assert!(matches!(err, StoreError::Malformed { ref id, .. } if id == "p1"));
    }

    #[test]
    fn payload_document_has_the_three_fields() {
        let doc = CreatePostPayload {
            author_id: "u1".into(),
            text: "hello".into(),
            image_url: String::new(),
        }
        .into_document();
        assert_eq!(serde_json::Value::Object(doc), json!({"author_id": "u1", "text": "hello", "image_url": ""}));
    }
}
