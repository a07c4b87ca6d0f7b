//! In-process collaborators. Used for local runs (`FEED_BACKEND=memory`) and
//! as the backend for every flow test.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::watch;

use super::blobs::{BlobHandle, BlobStore};
use super::documents::{sort_records, Document, DocumentStore, OrderBy, SnapshotStream, StoredRecord};
use super::identity::IdentityProvider;
use crate::error::{AuthError, StoreError};
use crate::users::model::{Credentials, SignedIn, Session};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ========== DOCUMENTS ==========

/// Document store keeping each collection in a watch channel, so every
/// subscriber sees the full collection after each write.
pub struct MemoryDocumentStore {
    collections: Mutex<HashMap<String, watch::Sender<Vec<StoredRecord>>>>,
    owner_field: Option<String>,
    last_created_at: Mutex<DateTime<Utc>>,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    /// Store without access rules: any caller may delete any record.
    pub fn new() -> Self {
        Self {
            collections: Mutex::new(HashMap::new()),
            owner_field: None,
            last_created_at: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    /// Store that only lets a caller delete records whose `field` equals
    /// the caller's id.
    pub fn with_owner_field(field: &str) -> Self {
        Self {
            owner_field: Some(field.to_string()),
            ..Self::new()
        }
    }

    /// Current contents of a collection, in insertion order.
    pub fn records(&self, collection: &str) -> Vec<StoredRecord> {
        lock(&self.collections)
            .get(collection)
            .map(|tx| tx.borrow().clone())
            .unwrap_or_default()
    }

    // Strictly increasing, so inserts from one store never tie.
    fn next_timestamp(&self) -> DateTime<Utc> {
        let mut last = lock(&self.last_created_at);
        let now = Utc::now();
        let next = if now > *last {
            now
        } else {
            *last + chrono::Duration::microseconds(1)
        };
        *last = next;
        next
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn insert(&self, collection: &str, fields: Document) -> Result<StoredRecord, StoreError> {
        let record = StoredRecord {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: self.next_timestamp(),
            fields,
        };

        let mut collections = lock(&self.collections);
        let tx = collections
            .entry(collection.to_string())
            .or_insert_with(|| watch::channel(Vec::new()).0);
        tx.send_modify(|records| records.push(record.clone()));

        tracing::debug!("memory insert {}/{}", collection, record.id);
        Ok(record)
    }

    async fn delete(&self, collection: &str, id: &str, caller: &str) -> Result<(), StoreError> {
        let collections = lock(&self.collections);
        let tx = collections
            .get(collection)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let existing = tx
            .borrow()
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if let Some(field) = &self.owner_field {
            let owner = existing.fields.get(field).and_then(Value::as_str);
            if owner != Some(caller) {
                return Err(StoreError::PermissionDenied(format!(
                    "{} may not delete {}/{}",
                    caller, collection, id
                )));
            }
        }

        tx.send_modify(|records| records.retain(|r| r.id != id));
        tracing::debug!("memory delete {}/{} by {}", collection, id, caller);
        Ok(())
    }

    async fn subscribe_ordered(
        &self,
        collection: &str,
        order: OrderBy,
    ) -> Result<SnapshotStream, StoreError> {
        let rx = lock(&self.collections)
            .entry(collection.to_string())
            .or_insert_with(|| watch::channel(Vec::new()).0)
            .subscribe();

        // The first poll yields the current value, later polls wait for a
        // change. The stream ends when the store is dropped.
        let stream = futures::stream::unfold((rx, true), move |(mut rx, first)| {
            let order = order.clone();
            async move {
                if !first && rx.changed().await.is_err() {
                    return None;
                }
                let mut records = rx.borrow_and_update().clone();
                sort_records(&mut records, &order);
                Some((Ok(records), (rx, false)))
            }
        });

        Ok(stream.boxed())
    }
}

// ========== BLOBS ==========

pub const MEMORY_BLOB_BASE: &str = "memory://blobs/";

struct StoredBlob {
    bytes: Vec<u8>,
    content_type: String,
}

#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, StoredBlob>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.objects).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        lock(&self.objects).get(key).map(|b| b.content_type.clone())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<BlobHandle, StoreError> {
        lock(&self.objects).insert(
            key.to_string(),
            StoredBlob {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(BlobHandle {
            key: key.to_string(),
        })
    }

    async fn retrieval_url(&self, handle: &BlobHandle) -> Result<String, StoreError> {
        if !lock(&self.objects).contains_key(&handle.key) {
            return Err(StoreError::NotFound(handle.key.clone()));
        }
        Ok(format!("{}{}", MEMORY_BLOB_BASE, handle.key))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StoreError> {
        let key = url
            .strip_prefix(MEMORY_BLOB_BASE)
            .ok_or_else(|| StoreError::NotFound(url.to_string()))?;
        lock(&self.objects)
            .get(key)
            .map(|b| b.bytes.clone())
            .ok_or_else(|| StoreError::NotFound(url.to_string()))
    }
}

// ========== IDENTITY ==========

struct Account {
    password: String,
    session: Session,
}

/// Identity provider with a fixed set of username/password accounts.
pub struct MemoryIdentity {
    session: watch::Sender<Option<Session>>,
    accounts: Mutex<HashMap<String, Account>>,
    tokens: Mutex<HashMap<String, Session>>,
    current_token: Mutex<Option<String>>,
}

impl Default for MemoryIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIdentity {
    pub fn new() -> Self {
        Self {
            session: watch::channel(None).0,
            accounts: Mutex::new(HashMap::new()),
            tokens: Mutex::new(HashMap::new()),
            current_token: Mutex::new(None),
        }
    }

    pub fn with_account(self, user_id: &str, username: &str, password: &str) -> Self {
        lock(&self.accounts).insert(
            username.to_string(),
            Account {
                password: password.to_string(),
                session: Session {
                    user_id: user_id.to_string(),
                    user_name: username.to_string(),
                    user_email: None,
                },
            },
        );
        self
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentity {
    fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.session.subscribe()
    }

    async fn sign_in(&self, credentials: Credentials) -> Result<SignedIn, AuthError> {
        let session = lock(&self.accounts)
            .get(&credentials.username)
            .filter(|account| account.password == credentials.password)
            .map(|account| account.session.clone())
            .ok_or(AuthError::InvalidCredentials)?;

        let access_token = uuid::Uuid::new_v4().to_string();
        lock(&self.tokens).insert(access_token.clone(), session.clone());
        *lock(&self.current_token) = Some(access_token.clone());
        self.session.send_replace(Some(session.clone()));

        tracing::info!("memory sign-in for {}", session.user_id);
        Ok(SignedIn {
            session,
            access_token,
        })
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        if let Some(token) = lock(&self.current_token).take() {
            lock(&self.tokens).remove(&token);
        }
        self.session.send_replace(None);
        Ok(())
    }

    async fn revoke_token(&self, access_token: &str) -> Result<(), AuthError> {
        lock(&self.tokens)
            .remove(access_token)
            .ok_or(AuthError::InvalidToken)?;

        let was_current = {
            let mut current = lock(&self.current_token);
            if current.as_deref() == Some(access_token) {
                *current = None;
                true
            } else {
                false
            }
        };
        if was_current {
            self.session.send_replace(None);
        }
        Ok(())
    }

    async fn verify_token(&self, access_token: &str) -> Result<Session, AuthError> {
        lock(&self.tokens)
            .get(access_token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}
