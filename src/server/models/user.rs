use serde::{Deserialize, Serialize};

/// A provisioned account. Records are created by the `quantgate-useradd`
/// utility and never mutated by request handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    /// Argon2id hash in PHC string form.
    pub password_hash: String,
}
