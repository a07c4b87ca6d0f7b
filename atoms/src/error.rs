use thiserror::Error;

/// Failures reported by a document or blob store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("malformed record {id}: {reason}")]
    Malformed { id: String, reason: String },
    #[error("backend error: {0}")]
    Backend(String),
    #[error("subscription closed by the store")]
    Closed,
}

/// Failures reported by an identity provider.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("access token is invalid or expired")]
    InvalidToken,
    #[error("identity provider error: {0}")]
    Provider(String),
}

/// Failures surfaced by the feed flows to the view layer.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("no signed-in session")]
    AuthAbsent,
    #[error("image upload failed: {0}")]
    Upload(#[source] StoreError),
    #[error("write failed: {0}")]
    Write(#[source] StoreError),
    #[error("subscription failed: {0}")]
    Subscription(#[source] StoreError),
    #[error("post {0} is not owned by the current session")]
    NotOwner(String),
    #[error("post {0} is not in the feed")]
    UnknownPost(String),
}
