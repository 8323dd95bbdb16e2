//! In-memory credential table. Built once at start-up and shared read-only.

use crate::models::credential::Credential;
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    by_access_key: HashMap<String, Credential>,
}

impl CredentialStore {
    /// Index credentials by access key. A later entry for the same access key
    /// replaces an earlier one.
    pub fn new(credentials: impl IntoIterator<Item = Credential>) -> Self {
        let mut by_access_key = HashMap::new();
        for credential in credentials {
            let access_key = credential.access_key.clone();
            if let Some(previous) = by_access_key.insert(access_key, credential) {
                warn!(
                    "access key {} configured more than once; keeping the last entry",
                    previous.access_key
                );
            }
        }
        Self { by_access_key }
    }

    pub fn get(&self, access_key: &str) -> Option<&Credential> {
        self.by_access_key.get(access_key)
    }

    pub fn len(&self) -> usize {
        self.by_access_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_access_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cred(user: &str, access: &str, secret: &str) -> Credential {
        Credential {
            user_id: user.into(),
            access_key: access.into(),
            secret_key: secret.into(),
        }
    }

    #[test]
    fn later_entries_win() {
        let store = CredentialStore::new([cred("u1", "AK", "old"), cred("u2", "AK", "new")]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("AK").map(|c| c.secret_key.as_str()), Some("new"));
        assert!(store.get("missing").is_none());
    }
}
