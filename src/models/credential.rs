//! Access credentials provisioned through configuration.

use serde::Deserialize;
use std::fmt;

/// A registered access-key/secret-key pair and the user it belongs to.
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct Credential {
    pub user_id: String,
    pub access_key: String,
    pub secret_key: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user_id", &self.user_id)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Identity attached to a request once it has been authenticated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub access_key: String,
}

impl From<&Credential> for AuthenticatedUser {
    fn from(cred: &Credential) -> Self {
        Self {
            user_id: cred.user_id.clone(),
            access_key: cred.access_key.clone(),
        }
    }
}
