//! Zero-knowledge credential facade for groups/username/backups/call-links.
//! The real `zkgroup` crate implements actual anonymous credential math; no
//! retrieved example file calls it, so rather than guess at its API surface
//! this models the same boundary (a server secret that mints and verifies
//! opaque credential presentations) with HMAC-SHA256, matching the existing
//! reach for `hmac`/`sha2` over bespoke crypto elsewhere (see
//! `server/server.rs`'s link-device HMAC). This is a deliberately
//! reduced-fidelity stand-in — see DESIGN.md.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use super::CryptoError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct ServerSecretParams {
    secret: [u8; 32],
}

impl ServerSecretParams {
    pub fn generate() -> Self {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self { secret }
    }

    /// Builds params from config-loaded secret bytes (`ServerConfig::zk_params`)
    /// instead of generating fresh ones, so the same credential secret
    /// survives a restart.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut secret = [0u8; 32];
        let mut mac = HmacSha256::new_from_slice(b"zk-server-secret-params")
            .expect("HMAC can take key of any size");
        mac.update(bytes);
        secret.copy_from_slice(&mac.finalize().into_bytes());
        Self { secret }
    }

    /// Mints an opaque credential presentation binding `subject` (a group id,
    /// username hash, or backup room id) to this server's secret.
    pub fn issue_presentation(&self, subject: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|_| CryptoError::BadInput)?;
        mac.update(subject);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Verifies a presentation minted by `issue_presentation` for the same
    /// subject, in constant time.
    pub fn verify_presentation(&self, subject: &[u8], presentation: &[u8]) -> bool {
        let mut mac = match HmacSha256::new_from_slice(&self.secret) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(subject);
        mac.verify_slice(presentation).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presentation_round_trips() {
        let params = ServerSecretParams::generate();
        let presentation = params.issue_presentation(b"group-id").unwrap();
        assert!(params.verify_presentation(b"group-id", &presentation));
        assert!(!params.verify_presentation(b"other-group", &presentation));
    }
}
