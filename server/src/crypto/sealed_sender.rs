//! Sealed-sender certificate validation:
//! the server never unwraps sealed-sender ciphertext itself (that's the
//! recipient's job), but it does validate the embedded `SenderCertificate`
//! before accepting a sealed-sender single-recipient envelope.
//!
//! Not present in the retrieved base files; grounded on
//! `validators/pre_key_signature_validator.rs`'s verify-then-decode shape.

use common::signalservice::{sender_certificate, server_certificate, SenderCertificate};
use libsignal_protocol::PublicKey;
use prost::Message;

use super::CryptoError;

/// Verifies the full certificate chain backing a sealed-sender send: the
/// embedded `ServerCertificate` must be signed by `trust_root_public`, and
/// `cert` itself must be signed by the signing key that certificate
/// attests to. Also checks `cert` has not expired as of `now_ms`. Returns
/// the decoded inner certificate on success.
pub fn validate_sender_certificate(
    cert: &SenderCertificate,
    trust_root_public: &PublicKey,
    now_ms: u64,
) -> Result<sender_certificate::Certificate, CryptoError> {
    let server_cert = cert.signer.as_ref().ok_or(CryptoError::BadInput)?;
    let server_cert_verified = trust_root_public
        .verify_signature(&server_cert.certificate, &server_cert.signature)
        .map_err(|_| CryptoError::BadInput)?;
    if !server_cert_verified {
        return Err(CryptoError::BadInput);
    }
    let server_certificate = server_certificate::Certificate::decode(server_cert.certificate.as_slice())
        .map_err(|_| CryptoError::BadInput)?;
    let signing_key = server_certificate.key.ok_or(CryptoError::BadInput)?;
    let signing_public = PublicKey::deserialize(&signing_key).map_err(|_| CryptoError::BadInput)?;

    let verified = signing_public
        .verify_signature(&cert.certificate, &cert.signature)
        .map_err(|_| CryptoError::BadInput)?;
    if !verified {
        return Err(CryptoError::BadInput);
    }

    let certificate = sender_certificate::Certificate::decode(cert.certificate.as_slice())
        .map_err(|_| CryptoError::BadInput)?;
    match certificate.expires {
        Some(expires) if expires >= now_ms => Ok(certificate),
        _ => Err(CryptoError::BadInput),
    }
}
