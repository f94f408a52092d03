//! Device auth-token hashing.
//!
//! Not present in the retrieved base files; rebuilt from its call sites
//! in `server/server.rs` (`SaltedTokenHash::generate_for`, `.hash()`,
//! `.salt()`) and the registration/link-device flows that store it.

use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};

const SALT_LEN: usize = 16;

/// A salted SHA-256 hash of a device's auth token, computed the same way a
/// real Signal-Server account authenticator would: `sha256(password + salt)`,
/// hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaltedTokenHash {
    hash: String,
    salt: String,
}

impl SaltedTokenHash {
    pub fn generate_for(password: &str) -> Self {
        let salt: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SALT_LEN)
            .map(char::from)
            .collect();
        Self::with_salt(password, salt)
    }

    pub fn with_salt(password: &str, salt: String) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(password.as_bytes());
        hasher.update(salt.as_bytes());
        let hash = hex::encode(hasher.finalize());
        Self { hash, salt }
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn salt(&self) -> &str {
        &self.salt
    }

    pub fn verify(&self, password: &str) -> bool {
        let candidate = Self::with_salt(password, self.salt.clone());
        candidate.hash == self.hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifies_correct_password() {
        let token = SaltedTokenHash::generate_for("hunter2");
        assert!(token.verify("hunter2"));
    }

    #[test]
    fn rejects_wrong_password() {
        let token = SaltedTokenHash::generate_for("hunter2");
        assert!(!token.verify("hunter3"));
    }

    #[test]
    fn same_password_different_salt_differs() {
        let a = SaltedTokenHash::generate_for("hunter2");
        let b = SaltedTokenHash::generate_for("hunter2");
        assert_ne!(a.hash(), b.hash());
    }
}
