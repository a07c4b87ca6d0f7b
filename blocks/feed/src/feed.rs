//! Live feed view.
//!
//! A mounted [`FeedView`] owns one background task holding one standing
//! subscription to the post collection, newest first. Every snapshot the
//! store pushes replaces the whole post list; nothing is patched locally and
//! nothing is removed optimistically. Unmounting aborts the task, after
//! which the view's state never changes again.

use std::sync::Arc;
use std::time::Duration;

use feedline_atoms::backend::DocumentStore;
use feedline_atoms::posts::{self, Post};
use feedline_atoms::users::Session;
use feedline_atoms::{FeedError, StoreError};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FeedStatus {
    #[default]
    Connecting,
    Live,
    /// The subscription failed; the last posts are still shown while the
    /// view resubscribes.
    Degraded { attempt: u32, error: String },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FeedState {
    pub posts: Vec<Post>,
    pub status: FeedStatus,
}

/// Exponential backoff between resubscription attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt` (1-based): `initial * 2^(attempt-1)`,
    /// capped at `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial.saturating_mul(factor).min(self.max)
    }
}

pub struct FeedView {
    documents: Arc<dyn DocumentStore>,
    state: watch::Receiver<FeedState>,
    task: Option<JoinHandle<()>>,
    selected: Option<String>,
}

impl FeedView {
    /// Open the view's subscription. Must be called inside a tokio runtime.
    pub fn mount(documents: Arc<dyn DocumentStore>, retry: RetryPolicy) -> Self {
        let (tx, state) = watch::channel(FeedState::default());
        let task = tokio::spawn(run_subscription(documents.clone(), tx, retry));
        tracing::debug!("feed view mounted");

        Self {
            documents,
            state,
            task: Some(task),
            selected: None,
        }
    }

    /// Observe the view's state. After unmount the receiver keeps the last
    /// state and reports the channel as closed.
    pub fn state(&self) -> watch::Receiver<FeedState> {
        self.state.clone()
    }

    pub fn posts(&self) -> Vec<Post> {
        self.state.borrow().posts.clone()
    }

    pub fn status(&self) -> FeedStatus {
        self.state.borrow().status.clone()
    }

    /// Wait until a live snapshot has been applied and return its posts.
    pub async fn wait_live(&self) -> Result<Vec<Post>, FeedError> {
        let mut rx = self.state.clone();
        let state = rx
            .wait_for(|s| s.status == FeedStatus::Live)
            .await
            .map_err(|_| FeedError::Subscription(StoreError::Closed))?;
        Ok(state.posts.clone())
    }

    /// Delete a post the session owns. The post stays in the view until the
    /// store pushes a snapshot without it.
    pub async fn delete_own_post(
        &self,
        session: Option<&Session>,
        post_id: &str,
    ) -> Result<(), FeedError> {
        let session = session.ok_or(FeedError::AuthAbsent)?;

        let post = self
            .find_post(post_id)
            .ok_or_else(|| FeedError::UnknownPost(post_id.to_string()))?;

        if post.author_id != session.user_id {
            tracing::warn!(
                "{} tried to delete post {} owned by {}",
                session.user_id,
                post_id,
                post.author_id
            );
            return Err(FeedError::NotOwner(post_id.to_string()));
        }

        posts::delete_post(self.documents.as_ref(), session, post_id)
            .await
            .map_err(|e| {
                tracing::error!("deleting post {} failed: {}", post_id, e);
                FeedError::Write(e)
            })
    }

    /// Select one post for the detail overlay. Returns `None`, leaving the
    /// selection unchanged, if the post is not in the feed.
    pub fn open_detail(&mut self, post_id: &str) -> Option<Post> {
        let post = self.find_post(post_id)?;
        self.selected = Some(post.post_id.clone());
        Some(post)
    }

    pub fn close_detail(&mut self) {
        self.selected = None;
    }

    /// The selected post as of the latest snapshot.
    pub fn detail(&self) -> Option<Post> {
        self.find_post(self.selected.as_deref()?)
    }

    fn find_post(&self, post_id: &str) -> Option<Post> {
        self.state
            .borrow()
            .posts
            .iter()
            .find(|p| p.post_id == post_id)
            .cloned()
    }

    /// Release the subscription and wait for the background task to stop.
    pub async fn unmount(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        tracing::debug!("feed view unmounted");
    }
}

impl Drop for FeedView {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_subscription(
    documents: Arc<dyn DocumentStore>,
    tx: watch::Sender<FeedState>,
    retry: RetryPolicy,
) {
    let mut attempt: u32 = 0;

    loop {
        let error = match posts::subscribe_posts(documents.as_ref()).await {
            Ok(mut stream) => loop {
                match stream.next().await {
                    Some(Ok(posts)) => {
                        attempt = 0;
                        tracing::debug!("feed snapshot with {} posts", posts.len());
                        tx.send_replace(FeedState {
                            posts,
                            status: FeedStatus::Live,
                        });
                    }
                    Some(Err(e)) => break e,
                    None => break StoreError::Closed,
                }
            },
            Err(e) => e,
        };

        attempt = attempt.saturating_add(1);
        let delay = retry.delay(attempt);
        tracing::warn!(
            "feed subscription failed (attempt {}): {}, resubscribing in {:?}",
            attempt,
            error,
            delay
        );
        tx.send_modify(|state| {
            state.status = FeedStatus::Degraded {
                attempt,
                error: error.to_string(),
            }
        });

        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use feedline_atoms::backend::{Document, MemoryDocumentStore, OrderBy, SnapshotStream, StoredRecord};
    use feedline_atoms::posts::AUTHOR_FIELD;
    use std::sync::atomic::{AtomicU32, Ordering};

    const WAIT: Duration = Duration::from_secs(5);

    fn session(id: &str) -> Session {
        Session {
            user_id: id.to_string(),
            user_name: id.to_string(),
            user_email: None,
        }
    }

    async fn post_as(store: &MemoryDocumentStore, user: &str, text: &str) -> Post {
        posts::create_post(store, &session(user), text.to_string(), String::new())
            .await
            .unwrap()
    }

    async fn wait_for_len(rx: &mut watch::Receiver<FeedState>, len: usize) {
        tokio::time::timeout(WAIT, rx.wait_for(|s| s.status == FeedStatus::Live && s.posts.len() == len))
            .await
            .expect("timed out waiting for snapshot")
            .expect("feed closed");
    }

    /// First subscription delivers one snapshot then fails; later ones are
    /// passed through.
    struct FlakyStore {
        inner: MemoryDocumentStore,
        subscriptions: AtomicU32,
    }

    #[async_trait]
    impl DocumentStore for FlakyStore {
        async fn insert(&self, collection: &str, fields: Document) -> Result<StoredRecord, StoreError> {
            self.inner.insert(collection, fields).await
        }

        async fn delete(&self, collection: &str, id: &str, caller: &str) -> Result<(), StoreError> {
            self.inner.delete(collection, id, caller).await
        }

        async fn subscribe_ordered(&self, collection: &str, order: OrderBy) -> Result<SnapshotStream, StoreError> {
            let stream = self.inner.subscribe_ordered(collection, order).await?;
            if self.subscriptions.fetch_add(1, Ordering::SeqCst) == 0 {
                let failure = futures::stream::once(async {
                    Err(StoreError::Backend("connection reset".into()))
                });
                Ok(stream.take(1).chain(failure).boxed())
            } else {
                Ok(stream)
            }
        }
    }

    /// The first `subscribe_ordered` call is refused outright.
    struct RefusesFirstSubscribe {
        inner: MemoryDocumentStore,
        subscriptions: AtomicU32,
    }

    #[async_trait]
    impl DocumentStore for RefusesFirstSubscribe {
        async fn insert(&self, collection: &str, fields: Document) -> Result<StoredRecord, StoreError> {
            self.inner.insert(collection, fields).await
        }

        async fn delete(&self, collection: &str, id: &str, caller: &str) -> Result<(), StoreError> {
            self.inner.delete(collection, id, caller).await
        }

        async fn subscribe_ordered(&self, collection: &str, order: OrderBy) -> Result<SnapshotStream, StoreError> {
            if self.subscriptions.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(StoreError::Backend("unreachable".into()));
            }
            self.inner.subscribe_ordered(collection, order).await
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let retry = RetryPolicy {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(1000),
        };
        assert_eq!(retry.delay(1), Duration::from_millis(100));
        assert_eq!(retry.delay(2), Duration::from_millis(200));
        assert_eq!(retry.delay(4), Duration::from_millis(800));
        assert_eq!(retry.delay(5), Duration::from_millis(1000));
        assert_eq!(retry.delay(u32::MAX), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn snapshots_replace_the_list_newest_first() {
        let store = Arc::new(MemoryDocumentStore::with_owner_field(AUTHOR_FIELD));
        post_as(&store, "u1", "t1").await;
        post_as(&store, "u1", "t2").await;

        let view = FeedView::mount(store.clone(), RetryPolicy::default());
        let mut rx = view.state();
        wait_for_len(&mut rx, 2).await;

        post_as(&store, "u2", "t3").await;
        wait_for_len(&mut rx, 3).await;

        let texts: Vec<String> = view.posts().into_iter().map(|p| p.text).collect();
        assert_eq!(texts, ["t3", "t2", "t1"]);
        view.unmount().await;
    }

    #[tokio::test]
    async fn owner_delete_removes_post_on_next_snapshot() {
        let store = Arc::new(MemoryDocumentStore::with_owner_field(AUTHOR_FIELD));
        let post = post_as(&store, "u1", "bye").await;
        let view = FeedView::mount(store.clone(), RetryPolicy::default());
        view.wait_live().await.unwrap();

        view.delete_own_post(Some(&session("u1")), &post.post_id).await.unwrap();

        let mut rx = view.state();
        wait_for_len(&mut rx, 0).await;
        view.unmount().await;
    }

    #[tokio::test]
    async fn non_owner_delete_is_refused_and_post_stays() {
        let store = Arc::new(MemoryDocumentStore::with_owner_field(AUTHOR_FIELD));
        let post = post_as(&store, "u1", "mine").await;
        let view = FeedView::mount(store.clone(), RetryPolicy::default());
        view.wait_live().await.unwrap();

        let err = view
            .delete_own_post(Some(&session("u2")), &post.post_id)
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::NotOwner(ref id) if *id == post.post_id));

        let err = view.delete_own_post(None, &post.post_id).await.unwrap_err();
        assert!(matches!(err, FeedError::AuthAbsent));

        let err = view
            .delete_own_post(Some(&session("u1")), "missing")
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::UnknownPost(_)));

        // A later write still shows the post untouched.
        post_as(&store, "u2", "other").await;
        let mut rx = view.state();
        wait_for_len(&mut rx, 2).await;
        assert!(view.posts().iter().any(|p| p.post_id == post.post_id));
        view.unmount().await;
    }

    #[tokio::test]
    async fn unmounted_view_ignores_later_pushes() {
        let store = Arc::new(MemoryDocumentStore::with_owner_field(AUTHOR_FIELD));
        post_as(&store, "u1", "before").await;
        let view = FeedView::mount(store.clone(), RetryPolicy::default());
        view.wait_live().await.unwrap();
        let rx = view.state();

        view.unmount().await;
        post_as(&store, "u1", "after").await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(rx.borrow().posts.len(), 1);
        assert_eq!(rx.borrow().posts[0].text, "before");
        assert!(rx.has_changed().is_err());
    }

    #[tokio::test]
    async fn detail_overlay_selects_one_post() {
        let store = Arc::new(MemoryDocumentStore::with_owner_field(AUTHOR_FIELD));
        let first = post_as(&store, "u1", "first").await;
        let second = post_as(&store, "u1", "second").await;
        let mut view = FeedView::mount(store.clone(), RetryPolicy::default());
        let mut rx = view.state();
        wait_for_len(&mut rx, 2).await;

        assert!(view.detail().is_none());
        assert_eq!(view.open_detail(&first.post_id).map(|p| p.text), Some("first".into()));
        assert_eq!(view.open_detail(&second.post_id).map(|p| p.text), Some("second".into()));
        assert_eq!(view.detail().map(|p| p.post_id), Some(second.post_id.clone()));

        assert!(view.open_detail("missing").is_none());
        assert_eq!(view.detail().map(|p| p.post_id), Some(second.post_id.clone()));

        view.close_detail();
        assert!(view.detail().is_none());

        // A selected post that gets deleted drops out of the overlay.
        view.open_detail(&first.post_id);
        view.delete_own_post(Some(&session("u1")), &first.post_id).await.unwrap();
        wait_for_len(&mut rx, 1).await;
        assert!(view.detail().is_none());
        view.unmount().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_subscription_degrades_then_resubscribes() {
        let store = Arc::new(FlakyStore {
            inner: MemoryDocumentStore::with_owner_field(AUTHOR_FIELD),
            subscriptions: AtomicU32::new(0),
        });
        post_as(&store.inner, "u1", "kept").await;

        let view = FeedView::mount(store.clone(), RetryPolicy::default());
        let mut rx = view.state();

        let degraded = rx
            .wait_for(|s| matches!(s.status, FeedStatus::Degraded { .. }))
            .await
            .unwrap()
            .clone();
        assert_eq!(
            degraded.status,
            FeedStatus::Degraded {
                attempt: 1,
                error: "backend error: connection reset".into()
            }
        );
        assert_eq!(degraded.posts.len(), 1);

        rx.wait_for(|s| s.status == FeedStatus::Live).await.unwrap();
        assert_eq!(store.subscriptions.load(Ordering::SeqCst), 2);

        post_as(&store.inner, "u1", "fresh").await;
        wait_for_len(&mut rx, 2).await;
        view.unmount().await;
    }

    #[tokio::test(start_paused = true)]
    async fn refused_subscribe_degrades_then_goes_live() {
        let store = Arc::new(RefusesFirstSubscribe {
            inner: MemoryDocumentStore::with_owner_field(AUTHOR_FIELD),
            subscriptions: AtomicU32::new(0),
        });
        post_as(&store.inner, "u1", "waiting").await;

        let view = FeedView::mount(store.clone(), RetryPolicy::default());
        let mut rx = view.state();

        let degraded = rx
            .wait_for(|s| matches!(s.status, FeedStatus::Degraded { .. }))
            .await
            .unwrap()
            .clone();
        assert_eq!(
            degraded.status,
            FeedStatus::Degraded {
                attempt: 1,
                error: "backend error: unreachable".into()
            }
        );
        assert!(degraded.posts.is_empty());

        let live = view.wait_live().await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(store.subscriptions.load(Ordering::SeqCst), 2);
        view.unmount().await;
    }

    #[tokio::test]
    async fn state_channel_closes_on_unmount() {
        let store = Arc::new(MemoryDocumentStore::new());
        let view = FeedView::mount(store, RetryPolicy::default());
        let rx = view.state();
        view.unmount().await;
        assert!(rx.has_changed().is_err());
    }
}
