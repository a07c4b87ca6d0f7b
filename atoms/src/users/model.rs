use serde::{Deserialize, Serialize};

/// The signed-in identity. Replaced wholesale on every provider notification.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub user_name: String,
    pub user_email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Result of a successful sign-in: the session plus the bearer token that
/// identifies it on later requests.
#[derive(Debug, Serialize, Clone)]
pub struct SignedIn {
    pub session: Session,
    pub access_token: String,
}
