//! Crypto facade: certificate issuance, attachment/provisioning
//! encryption, and the zk-credential facade used by groups/username/backups.

pub mod attachment;
pub mod certs;
pub mod provisioning;
pub mod sealed_sender;
pub mod zk;

/// Cryptographic inputs of the wrong shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    BadInput,
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CryptoError::BadInput => write!(f, "bad cryptographic input"),
        }
    }
}

impl std::error::Error for CryptoError {}

/// `hkdf(input, salt, info, length)`, shared by the attachment
/// and provisioning encryption paths.
pub fn hkdf(input: &[u8], salt: &[u8], info: &[u8], length: usize) -> Result<Vec<u8>, CryptoError> {
    let hk = hkdf::Hkdf::<sha2::Sha256>::new(Some(salt), input);
    let mut out = vec![0u8; length];
    hk.expand(info, &mut out).map_err(|_| CryptoError::BadInput)?;
    Ok(out)
}
