//! Provisioning-message encryption: X25519 ECDH against the client's public key, HKDF-SHA256
//! to derive AES-256-CBC + HMAC-SHA256 keys, `version(1) || ciphertext ||
//! mac(32)`.
//!
//! Not present in the retrieved base files; grounded on
//! `test_utils/key.rs`'s `KeyPair::generate(&mut OsRng)` pattern for
//! ephemeral key material.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockEncryptMut, KeyIvInit};
use common::signalservice::ProvisionEnvelope;
use hmac::{Hmac, Mac};
use libsignal_protocol::{KeyPair, PublicKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use super::CryptoError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

const PROVISIONING_VERSION: u8 = 1;

/// Encrypts `plaintext` (a serialized `ProvisionMessage`) for `recipient_pub`
/// using a fresh ephemeral keypair; the envelope carries the ephemeral
/// public key alongside the ciphertext so the recipient can redo the ECDH.
pub fn encrypt_provision_message(
    plaintext: &[u8],
    recipient_pub: &PublicKey,
) -> Result<ProvisionEnvelope, CryptoError> {
    let ephemeral = KeyPair::generate(&mut OsRng);
    let shared_secret = ephemeral
        .private_key
        .calculate_agreement(recipient_pub)
        .map_err(|_| CryptoError::BadInput)?;

    let okm = super::hkdf(&shared_secret, &[], b"WhisperProvisioningMessage", 64)?;
    let (aes_key, mac_key) = okm.split_at(32);

    let mut iv = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut iv);
    let encryptor =
        Aes256CbcEnc::new_from_slices(aes_key, &iv).map_err(|_| CryptoError::BadInput)?;
    let ciphertext = encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut framed = Vec::with_capacity(1 + iv.len() + ciphertext.len());
    framed.push(PROVISIONING_VERSION);
    framed.extend_from_slice(&iv);
    framed.extend_from_slice(&ciphertext);

    let mut mac = Hmac::<Sha256>::new_from_slice(mac_key).map_err(|_| CryptoError::BadInput)?;
    mac.update(&framed);
    let tag = mac.finalize().into_bytes();
    framed.extend_from_slice(&tag);

    Ok(ProvisionEnvelope {
        public_key: ephemeral.public_key.serialize().to_vec(),
        body: framed,
    })
}
