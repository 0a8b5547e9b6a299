use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use tracing::info;

use crate::server::models::User;

/// Read-only credential store backed by the users file written by
/// `quantgate-useradd`. Loaded once at startup; request handlers never
/// mutate it.
pub struct UserStore {
    users: HashMap<String, User>,
    /// Hash verified for unknown usernames so a miss costs the same as a
    /// wrong password.
    dummy_hash: String,
}

impl UserStore {
    pub fn load(path: &Path) -> anyhow::Result<UserStore> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read users file {}", path.display()))?;
        let records: Vec<User> = serde_json::from_str(&raw)
            .with_context(|| format!("users file {} is not valid", path.display()))?;

        let users: HashMap<String, User> = records
            .into_iter()
            .map(|u| (u.username.clone(), u))
            .collect();
        info!(count = users.len(), "loaded user records");

        let salt = SaltString::generate(&mut OsRng);
        let dummy_hash = Argon2::default()
            .hash_password(b"quantgate-dummy-credential", &salt)
            .context("failed to derive placeholder hash")?
            .to_string();

        Ok(UserStore { users, dummy_hash })
    }

    /// An empty store, for deployments that only expose `/health` and for
    /// tests that provision users through `hash_password`.
    pub fn from_users(records: Vec<User>) -> anyhow::Result<UserStore> {
        let users = records
            .into_iter()
            .map(|u| (u.username.clone(), u))
            .collect();
        let salt = SaltString::generate(&mut OsRng);
        let dummy_hash = Argon2::default()
            .hash_password(b"quantgate-dummy-credential", &salt)
            .context("failed to derive placeholder hash")?
            .to_string();
        Ok(UserStore { users, dummy_hash })
    }

    pub fn lookup(&self, username: &str) -> Option<&User> {
        self.users.get(username)
    }

    /// Checks a password against the stored hash. The argon2 work runs on
    /// the blocking pool; unknown users verify against a placeholder hash so
    /// the latency class and error surface match a wrong password.
    pub async fn verify(&self, username: &str, password: &str) -> bool {
        let (hash, known) = match self.lookup(username) {
            Some(user) => (user.password_hash.clone(), true),
            None => (self.dummy_hash.clone(), false),
        };
        let password = password.to_string();

        let matched = tokio::task::spawn_blocking(move || {
            PasswordHash::new(&hash)
                .map(|parsed| {
                    Argon2::default()
                        .verify_password(password.as_bytes(), &parsed)
                        .is_ok()
                })
                .unwrap_or(false)
        })
        .await
        .unwrap_or(false);

        matched && known
    }
}

/// Derives an argon2id PHC hash for a new password. Shared with the
/// `quantgate-useradd` utility.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash password: {e}"))?
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(username: &str, password: &str) -> UserStore {
        let user = User {
            username: username.to_string(),
            password_hash: hash_password(password).unwrap(),
        };
        UserStore::from_users(vec![user]).unwrap()
    }

    #[tokio::test]
    async fn correct_password_verifies() {
        let store = store_with("alice", "open sesame");
        assert!(store.verify("alice", "open sesame").await);
    }

    #[tokio::test]
    async fn wrong_password_fails() {
        let store = store_with("alice", "open sesame");
        assert!(!store.verify("alice", "wrong").await);
    }

    #[tokio::test]
    async fn unknown_user_fails_like_wrong_password() {
        let store = store_with("alice", "open sesame");
        assert!(!store.verify("mallory", "open sesame").await);
    }

    #[test]
    fn usernames_are_case_sensitive() {
        let store = store_with("Alice", "pw");
        assert!(store.lookup("alice").is_none());
        assert!(store.lookup("Alice").is_some());
    }
}
