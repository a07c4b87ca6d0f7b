use futures::stream::BoxStream;
use futures::StreamExt;

use super::model::{CreatePostPayload, Post};
use crate::backend::{DocumentStore, OrderBy, StoredRecord, CREATED_AT};
use crate::error::StoreError;
use crate::users::model::Session;

pub const POSTS_COLLECTION: &str = "posts";

/// Field the store's owner rule checks on delete.
pub const AUTHOR_FIELD: &str = "author_id";

/// Live feed: the full post list, newest first, after every change.
pub type PostStream = BoxStream<'static, Result<Vec<Post>, StoreError>>;

/// Write one post authored by `session`.
pub async fn create_post(
    documents: &dyn DocumentStore,
    session: &Session,
    text: String,
    image_url: String,
) -> Result<Post, StoreError> {
    let payload = CreatePostPayload {
        author_id: session.user_id.clone(),
        text,
        image_url,
    };

    let record = documents
        .insert(POSTS_COLLECTION, payload.into_document())
        .await?;

    tracing::info!("created post {} for {}", record.id, session.user_id);
    Post::try_from(record)
}

/// Delete a post as `session`. Ownership is enforced by the store.
pub async fn delete_post(
    documents: &dyn DocumentStore,
    session: &Session,
    post_id: &str,
) -> Result<(), StoreError> {
    documents
        .delete(POSTS_COLLECTION, post_id, &session.user_id)
        .await?;
    tracing::info!("deleted post {} for {}", post_id, session.user_id);
    Ok(())
}

/// Open the live post query, ordered by creation time, newest first.
pub async fn subscribe_posts(documents: &dyn DocumentStore) -> Result<PostStream, StoreError> {
    let stream = documents
        .subscribe_ordered(POSTS_COLLECTION, OrderBy::descending(CREATED_AT))
        .await?;

    Ok(stream
        .map(|snapshot| snapshot.map(posts_from_records))
        .boxed())
}

/// Decode a snapshot, skipping records that are not posts.
pub fn posts_from_records(records: Vec<StoredRecord>) -> Vec<Post> {
    records
        .into_iter()
        .filter_map(|record| match Post::try_from(record) {
            Ok(post) => Some(post),
            Err(e) => {
                tracing::warn!("skipping record in feed: {}", e);
                None
            }
        })
        .collect()
}
