//! Attachment encryption: AES-256-CBC with
//! a random IV, HMAC-SHA256 appended, keyed by a 64-byte random key split
//! into an AES half and a MAC half.
//!
//! Not present in the retrieved base files; grounded on `crypto::hkdf`'s
//! sibling `encrypt_provision_message` shape (random key material, CBC +
//! HMAC, SHA-256 digest over the whole frame).

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::CryptoError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

pub struct EncryptedAttachment {
    pub blob: Vec<u8>,
    pub key: [u8; 64],
    pub digest: [u8; 32],
    pub size: usize,
}

/// Encrypts `plaintext` under a freshly generated 64-byte key (32 bytes AES,
/// 32 bytes HMAC), returning `iv || ciphertext || mac` as `blob`.
pub fn encrypt_attachment(plaintext: &[u8]) -> Result<EncryptedAttachment, CryptoError> {
    let mut key = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut key);
    encrypt_attachment_with_key(plaintext, &key)
}

pub fn encrypt_attachment_with_key(
    plaintext: &[u8],
    key: &[u8; 64],
) -> Result<EncryptedAttachment, CryptoError> {
    let (aes_key, mac_key) = key.split_at(32);

    let mut iv = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut iv);

    let encryptor =
        Aes256CbcEnc::new_from_slices(aes_key, &iv).map_err(|_| CryptoError::BadInput)?;
    let ciphertext = encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut mac = Hmac::<Sha256>::new_from_slice(mac_key).map_err(|_| CryptoError::BadInput)?;
    mac.update(&iv);
    mac.update(&ciphertext);
    let tag = mac.finalize().into_bytes();

    let mut blob = Vec::with_capacity(iv.len() + ciphertext.len() + tag.len());
    blob.extend_from_slice(&iv);
    blob.extend_from_slice(&ciphertext);
    blob.extend_from_slice(&tag);

    let digest: [u8; 32] = Sha256::digest(&blob).into();

    Ok(EncryptedAttachment {
        size: plaintext.len(),
        blob,
        key: *key,
        digest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_covers_whole_blob() {
        let encrypted = encrypt_attachment(b"hello world").unwrap();
        let expected: [u8; 32] = Sha256::digest(&encrypted.blob).into();
        assert_eq!(encrypted.digest, expected);
        assert_eq!(encrypted.size, 11);
    }
}
