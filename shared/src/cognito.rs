use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use aws_sdk_cognitoidentityprovider::types::{AttributeType, AuthFlowType};
use aws_sdk_cognitoidentityprovider::Client as CognitoClient;
use base64::{engine::general_purpose::STANDARD, Engine};
use feedline_atoms::backend::IdentityProvider;
use feedline_atoms::users::{Credentials, Session, SignedIn};
use feedline_atoms::AuthError;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::watch;

type HmacSha256 = Hmac<Sha256>;

/// Cognito user pool app client using the USER_PASSWORD_AUTH flow.
///
/// The published session and `sign_out` track the last `sign_in` made
/// through this value. Request handlers serving many users gate on
/// `verify_token` and end sessions with `revoke_token`.
pub struct CognitoIdentity {
    client: CognitoClient,
    client_id: String,
    client_secret: String,
    session: watch::Sender<Option<Session>>,
    access_token: Mutex<Option<String>>,
}

impl CognitoIdentity {
    pub fn new(client: CognitoClient, client_id: &str, client_secret: &str) -> Self {
        Self {
            client,
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            session: watch::channel(None).0,
            access_token: Mutex::new(None),
        }
    }
}

/// SECRET_HASH for app clients with a secret:
/// Base64(HMAC-SHA256(client_secret, username + client_id)).
pub fn secret_hash(username: &str, client_id: &str, client_secret: &str) -> Result<String, AuthError> {
    let mut mac = HmacSha256::new_from_slice(client_secret.as_bytes())
        .map_err(|e| AuthError::Provider(format!("invalid client secret: {}", e)))?;
    mac.update(username.as_bytes());
    mac.update(client_id.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Build a session from `GetUser` output. The stable user id is the `sub`
/// attribute, falling back to the username for pools that omit it.
pub fn session_from_attributes(username: &str, attributes: &[AttributeType]) -> Session {
    let attribute = |name: &str| {
        attributes
            .iter()
            .find(|a| a.name() == name)
            .and_then(|a| a.value())
            .map(str::to_string)
    };

    Session {
        user_id: attribute("sub").unwrap_or_else(|| username.to_string()),
        user_name: username.to_string(),
        user_email: attribute("email"),
    }
}

#[async_trait]
impl IdentityProvider for CognitoIdentity {
    fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.session.subscribe()
    }

    async fn sign_in(&self, credentials: Credentials) -> Result<SignedIn, AuthError> {
        let hash = secret_hash(&credentials.username, &self.client_id, &self.client_secret)?;

        let result = self
            .client
            .initiate_auth()
            .auth_flow(AuthFlowType::UserPasswordAuth)
            .client_id(&self.client_id)
            .auth_parameters("USERNAME", &credentials.username)
            .auth_parameters("PASSWORD", &credentials.password)
            .auth_parameters("SECRET_HASH", hash)
            .send()
            .await
            .map_err(|e| {
                let rejected = e
                    .as_service_error()
                    .map(|se| se.is_not_authorized_exception() || se.is_user_not_found_exception())
                    .unwrap_or(false);
                if rejected {
                    tracing::warn!("sign-in rejected for {}", credentials.username);
                    AuthError::InvalidCredentials
                } else {
                    tracing::error!("Cognito initiate_auth error: {}", e);
                    AuthError::Provider(format!("Cognito initiate_auth error: {}", e))
                }
            })?;

        // A challenge (e.g. NEW_PASSWORD_REQUIRED) carries no tokens
        let access_token = result
            .authentication_result()
            .and_then(|r| r.access_token())
            .map(str::to_string)
            .ok_or_else(|| {
                AuthError::Provider(format!(
                    "sign-in needs challenge {:?}",
                    result.challenge_name()
                ))
            })?;

        let session = self.verify_token(&access_token).await?;
        *self.access_token.lock().unwrap_or_else(PoisonError::into_inner) = Some(access_token.clone());
        self.session.send_replace(Some(session.clone()));

        tracing::info!("signed in {}", session.user_id);
        Ok(SignedIn {
            session,
            access_token,
        })
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let token = self
            .access_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(token) = token {
            if let Err(e) = self.client.global_sign_out().access_token(token).send().await {
                // The local session ends regardless
                tracing::warn!("Cognito global_sign_out error: {}", e);
            }
        }

        self.session.send_replace(None);
        Ok(())
    }

    async fn revoke_token(&self, access_token: &str) -> Result<(), AuthError> {
        self.client
            .global_sign_out()
            .access_token(access_token)
            .send()
            .await
            .map_err(|e| {
                if e
                    .as_service_error()
                    .map(|se| se.is_not_authorized_exception())
                    .unwrap_or(false)
                {
                    AuthError::InvalidToken
                } else {
                    AuthError::Provider(format!("Cognito global_sign_out error: {}", e))
                }
            })?;

        let was_current = {
            let mut current = self.access_token.lock().unwrap_or_else(PoisonError::into_inner);
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
        let user = self
            .client
            .get_user()
            .access_token(access_token)
            .send()
            .await
            .map_err(|e| {
                if e
                    .as_service_error()
                    .map(|se| se.is_not_authorized_exception())
                    .unwrap_or(false)
                {
                    AuthError::InvalidToken
                } else {
                    AuthError::Provider(format!("Cognito get_user error: {}", e))
                }
            })?;

        Ok(session_from_attributes(user.username(), user.user_attributes()))
    }
}
