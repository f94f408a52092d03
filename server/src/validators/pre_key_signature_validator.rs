//! Verifies that signed/last-resort prekeys are actually signed by the
//! account's identity key.
//!
//! Not present in the retrieved base files; rebuilt from its call site in
//! `server/server.rs::handle_post_link_device`.

use common::web_api::UploadSignedPreKey;
use libsignal_protocol::IdentityKey;

pub struct PreKeySignatureValidator;

impl PreKeySignatureValidator {
    pub fn validate_pre_key_signatures(identity_key: &IdentityKey, keys: &[UploadSignedPreKey]) -> bool {
        keys.iter().all(|key| {
            identity_key
                .public_key()
                .verify_signature(&key.public_key, &key.signature)
                .unwrap_or(false)
        })
    }
}
