//! Prekey upload/fetch/count.
//!
//! Not present in the retrieved base files; rebuilt from its call sites
//! in `server/server.rs` (`handle_get_keys_id_device_id`,
//! `get_one_time_pre_key_count`, `handle_post_keycheck`, `handle_put_keys`).

use std::any::Any;

use anyhow::Result;
use base64::Engine;
use hyper::StatusCode;
use libsignal_core::{ServiceId, ServiceIdKind};

use common::web_api::{PreKeyCount, PreKeyResponse, PreKeyResponseItem, SetKeyRequest};

use crate::account::AuthenticatedDevice;
use crate::error::ApiError;
use crate::storage::database::SignalDatabase;
use crate::validators::pre_key_signature_validator::PreKeySignatureValidator;

use super::manager::Manager;

#[derive(Default, Debug, Clone)]
pub struct KeyManager<T>
where
    T: SignalDatabase,
{
    db: T,
}

impl<T> Manager for KeyManager<T>
where
    T: SignalDatabase,
{
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T> KeyManager<T>
where
    T: SignalDatabase,
{
    pub fn new(db: T) -> Self {
        Self { db }
    }

    /// `GET /v2/keys/{serviceId}/{deviceId}`. `device_id` of `"*"` targets
    /// every device on the account; a numeric string targets one.
    pub async fn handle_get_keys_id_device_id(
        &self,
        db: &T,
        authenticated_device: &AuthenticatedDevice,
        identifier: ServiceId,
        device_id: String,
    ) -> Result<PreKeyResponse, ApiError> {
        let _ = authenticated_device;
        let kind = identifier.kind();
        let account = db.get_account(&identifier).await.map_err(|_| ApiError {
            status_code: StatusCode::NOT_FOUND,
            body: "account not found".to_owned(),
        })?;

        let targets: Vec<_> = if device_id == "*" {
            account.devices()
        } else {
            let id: u32 = device_id.parse().map_err(|_| ApiError {
                status_code: StatusCode::BAD_REQUEST,
                body: "invalid device id".to_owned(),
            })?;
            account
                .device(id.into())
                .into_iter()
                .collect()
        };

        if targets.is_empty() {
            return Err(ApiError {
                status_code: StatusCode::NOT_FOUND,
                body: "device not found".to_owned(),
            });
        }

        let mut devices = Vec::with_capacity(targets.len());
        for device in targets {
            let address = account.get_protocol_address(kind, device.device_id());
            let signed_pre_key = self.db.get_signed_pre_key(kind, &address).await.map_err(|_| ApiError {
                status_code: StatusCode::INTERNAL_SERVER_ERROR,
                body: "missing signed prekey".to_owned(),
            })?;
            let pre_key = self
                .db
                .take_one_time_ec_pre_key(kind, &address)
                .await
                .map_err(|_| ApiError {
                    status_code: StatusCode::INTERNAL_SERVER_ERROR,
                    body: "prekey store error".to_owned(),
                })?;
            let pq_pre_key = self
                .db
                .take_one_time_pq_pre_key(kind, &address)
                .await
                .map_err(|_| ApiError {
                    status_code: StatusCode::INTERNAL_SERVER_ERROR,
                    body: "missing pq prekey".to_owned(),
                })?;

            devices.push(PreKeyResponseItem::new(
                device.device_id().into(),
                device.registration_id(),
                pre_key,
                pq_pre_key,
                signed_pre_key,
            ));
        }

        let identity_key = match kind {
            ServiceIdKind::Aci => account.aci_identity_key(),
            ServiceIdKind::Pni => account.pni_identity_key(),
        };

        let identity_key_b64 = base64::engine::general_purpose::STANDARD.encode(identity_key.serialize());
        Ok(PreKeyResponse::new(identity_key_b64, devices))
    }

    pub async fn get_one_time_pre_key_count(&self, service_id: &ServiceId) -> Result<(u32, u32)> {
        let count = self
            .db
            .get_one_time_pre_key_count(service_id.kind(), service_id)
            .await?;
        Ok((count.count, count.pq_count))
    }

    /// `POST /v1/keys/check`: confirms the client's locally-cached identity
    /// key digest still matches the server's record.
    pub async fn handle_post_keycheck(
        &self,
        authenticated_device: &AuthenticatedDevice,
        kind: ServiceIdKind,
        user_digest: [u8; 32],
    ) -> Result<bool, ApiError> {
        let identity_key = match kind {
            ServiceIdKind::Aci => authenticated_device.account().aci_identity_key(),
            ServiceIdKind::Pni => authenticated_device.account().pni_identity_key(),
        };
        let digest = identity_key_digest(&identity_key.serialize());
        Ok(digest == user_digest)
    }

    /// `PUT /v2/keys?identity={aci|pni}`.
    pub async fn handle_put_keys(
        &self,
        authenticated_device: &AuthenticatedDevice,
        set_keys_request: SetKeyRequest,
        kind: ServiceIdKind,
    ) -> Result<(), ApiError> {
        let address = authenticated_device.get_protocol_address(kind);
        let internal_err = |err: anyhow::Error| ApiError {
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
            body: err.to_string(),
        };
        let identity_key = match kind {
            ServiceIdKind::Aci => authenticated_device.account().aci_identity_key(),
            ServiceIdKind::Pni => authenticated_device.account().pni_identity_key(),
        };

        if let Some(pre_keys) = set_keys_request.pre_keys {
            self.db
                .add_one_time_ec_pre_keys(kind, &address, pre_keys)
                .await
                .map_err(internal_err)?;
        }
        if let Some(pq_pre_keys) = set_keys_request.pq_pre_keys {
            if !PreKeySignatureValidator::validate_pre_key_signatures(&identity_key, &pq_pre_keys) {
                return Err(ApiError {
                    status_code: StatusCode::BAD_REQUEST,
                    body: "pq prekey signature does not match identity key".to_owned(),
                });
            }
            self.db
                .add_one_time_pq_pre_keys(kind, &address, pq_pre_keys)
                .await
                .map_err(internal_err)?;
        }

        let signed_pre_key = set_keys_request.signed_pre_key;
        let pq_last_resort_pre_key = set_keys_request.pq_last_resort_pre_key;
        if signed_pre_key.is_some() || pq_last_resort_pre_key.is_some() {
            let to_check: Vec<_> = signed_pre_key.iter().chain(pq_last_resort_pre_key.iter()).cloned().collect();
            if !PreKeySignatureValidator::validate_pre_key_signatures(&identity_key, &to_check) {
                return Err(ApiError {
                    status_code: StatusCode::BAD_REQUEST,
                    body: "prekey signature does not match identity key".to_owned(),
                });
            }
            self.db
                .replace_signed_pre_keys(kind, &address, signed_pre_key, pq_last_resort_pre_key)
                .await
                .map_err(internal_err)?;
        }
        Ok(())
    }
}

fn identity_key_digest(public_key: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(public_key);
    hasher.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::user::new_account_and_address;
    use common::web_api::{UploadPreKey, UploadSignedPreKey};

    fn upload_pre_key(key_id: u32) -> UploadPreKey {
        UploadPreKey {
            key_id,
            public_key: vec![1u8; 33].into_boxed_slice(),
        }
    }

    fn upload_signed_pre_key(key_id: u32) -> UploadSignedPreKey {
        UploadSignedPreKey {
            key_id,
            public_key: vec![2u8; 33].into_boxed_slice(),
            signature: vec![3u8; 64].into_boxed_slice(),
        }
    }

    #[tokio::test]
    async fn put_then_get_consumes_one_time_prekey_fifo() {
        let db = crate::storage::memory::InMemoryDatabase::default();
        let (account, device, address) = new_account_and_address(&db).await;
        let key_manager = KeyManager::new(db.clone());
        let authenticated_device = AuthenticatedDevice::new(account.clone(), device.clone());

        db.store_key_bundle(
            ServiceIdKind::Aci,
            &common::web_api::DevicePreKeyBundle {
                aci_signed_pre_key: upload_signed_pre_key(100),
                pni_signed_pre_key: upload_signed_pre_key(200),
                aci_pq_pre_key: upload_signed_pre_key(101),
                pni_pq_pre_key: upload_signed_pre_key(201),
            },
            &address,
        )
        .await
        .unwrap();

        key_manager
            .handle_put_keys(
                &authenticated_device,
                SetKeyRequest {
                    pre_keys: Some(vec![upload_pre_key(1), upload_pre_key(2)]),
                    pq_pre_keys: None,
                    pq_last_resort_pre_key: None,
                    signed_pre_key: None,
                },
                ServiceIdKind::Aci,
            )
            .await
            .unwrap();

        let response = key_manager
            .handle_get_keys_id_device_id(
                &db,
                &authenticated_device,
                ServiceId::Aci(account.aci()),
                device.device_id().to_string(),
            )
            .await
            .unwrap();

        assert_eq!(response.devices.len(), 1);
        assert_eq!(response.devices[0].pre_key.as_ref().unwrap().key_id, 1);

        let (count, _pq_count) = key_manager
            .get_one_time_pre_key_count(&ServiceId::Aci(account.aci()))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn keycheck_matches_stored_identity_key() {
        let db = crate::storage::memory::InMemoryDatabase::default();
        let (account, device, _address) = new_account_and_address(&db).await;
        let key_manager = KeyManager::new(db.clone());
        let authenticated_device = AuthenticatedDevice::new(account.clone(), device);

        let digest = identity_key_digest(&account.aci_identity_key().serialize());
        assert!(key_manager
            .handle_post_keycheck(&authenticated_device, ServiceIdKind::Aci, digest)
            .await
            .unwrap());
        assert!(!key_manager
            .handle_post_keycheck(&authenticated_device, ServiceIdKind::Aci, [0u8; 32])
            .await
            .unwrap());
    }
}
