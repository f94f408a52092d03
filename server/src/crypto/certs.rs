//! Server/sender certificate issuance.
//!
//! Not present in the retrieved base files; grounded on
//! `test_utils/key.rs`'s pattern of `PrivateKey::calculate_signature` for
//! signing and `KeyPair::generate` for key material.

use common::signalservice::{server_certificate, sender_certificate, ServerCertificate, SenderCertificate};
use libsignal_core::DeviceId;
use libsignal_protocol::{IdentityKey, KeyPair, PrivateKey};
use prost::Message;
use rand::rngs::OsRng;

use super::CryptoError;

/// A freshly generated signing keypair, signed by `trust_root_private`. The
/// private half stays with the caller to sign `SenderCertificate`s.
pub fn generate_server_certificate(
    id: u32,
    trust_root_private: &PrivateKey,
) -> Result<(ServerCertificate, KeyPair), CryptoError> {
    let signing_key = KeyPair::generate(&mut OsRng);
    let certificate = server_certificate::Certificate {
        id: Some(id),
        key: Some(signing_key.public_key.serialize().to_vec()),
    };
    let encoded = certificate.encode_to_vec();
    let signature = trust_root_private
        .calculate_signature(&encoded, &mut OsRng)
        .map_err(|_| CryptoError::BadInput)?;
    Ok((
        ServerCertificate {
            certificate: encoded,
            signature: signature.to_vec(),
        },
        signing_key,
    ))
}

/// Binds `(aci, e164, device_id, identity_key)` into a certificate signed by
/// the server's certificate-signing key, with an absolute `expiration_ms`.
pub fn generate_sender_certificate(
    server_cert: &ServerCertificate,
    server_signing_key: &PrivateKey,
    aci: &str,
    e164: &str,
    device_id: DeviceId,
    identity_key: &IdentityKey,
    expiration_ms: u64,
) -> Result<SenderCertificate, CryptoError> {
    let certificate = sender_certificate::Certificate {
        sender_e164: Some(e164.to_owned()),
        sender_uuid: Some(aci.to_owned()),
        sender_device: Some(device_id.into()),
        expires: Some(expiration_ms),
        identity_key: Some(identity_key.serialize().to_vec()),
        signer: Some(server_cert.clone()),
    };
    let encoded = certificate.encode_to_vec();
    let signature = server_signing_key
        .calculate_signature(&encoded, &mut OsRng)
        .map_err(|_| CryptoError::BadInput)?;
    Ok(SenderCertificate {
        certificate: encoded,
        signature: signature.to_vec(),
    })
}
