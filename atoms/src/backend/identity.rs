use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::AuthError;
use crate::users::model::{Credentials, SignedIn, Session};

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Live view of the current session. The receiver starts with the
    /// current value (possibly `None`) and sees every later transition.
    fn subscribe(&self) -> watch::Receiver<Option<Session>>;

    fn current(&self) -> Option<Session> {
        self.subscribe().borrow().clone()
    }

    /// Authenticate and publish the new session to subscribers.
    async fn sign_in(&self, credentials: Credentials) -> Result<SignedIn, AuthError>;

    /// End the session this provider last signed in and publish `None`.
    /// For single-user consumers; a multi-user server revokes the caller's
    /// own token with [`IdentityProvider::revoke_token`].
    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Invalidate one bearer token. Publishes `None` only if the token
    /// belongs to the session this provider is currently publishing.
    async fn revoke_token(&self, access_token: &str) -> Result<(), AuthError>;

    /// Resolve a bearer token issued by [`IdentityProvider::sign_in`].
    async fn verify_token(&self, access_token: &str) -> Result<Session, AuthError>;
}
