use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;

use crate::{
    account::{Account, Device},
    error::ApiError,
    storage::database::SignalDatabase,
};
use anyhow::Result;
use common::web_api::DevicePreKeyBundle;
use hyper::StatusCode;
use libsignal_core::{Aci, Pni, ProtocolAddress, ServiceId, ServiceIdKind};
use libsignal_protocol::IdentityKey;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::manager::Manager;

#[derive(Default, Debug, Clone)]
pub struct AccountManager<T>
where
    T: SignalDatabase,
{
    db: T,
    /// Spent device-link verification codes. Not part of `SignalDatabase` since it's pure
    /// replay-protection bookkeeping, not account state.
    used_link_tokens: Arc<RwLock<HashSet<String>>>,
}

impl<T> Manager for AccountManager<T>
where
    T: SignalDatabase,
{
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T> AccountManager<T>
where
    T: SignalDatabase,
{
    pub fn new(db: T) -> Self {
        Self {
            db,
            used_link_tokens: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Records `token` as spent, rejecting a replayed verification code.
    pub async fn add_used_device_link_token(&self, token: String) -> Result<(), ApiError> {
        let mut used = self.used_link_tokens.write().await;
        if !used.insert(token) {
            return Err(ApiError {
                status_code: StatusCode::FORBIDDEN,
                body: "verification code already used".to_owned(),
            });
        }
        Ok(())
    }
    /// Registers a fresh account for `phone_number`. If an account already
    /// holds that number, registration is only allowed to replace it (spec
    /// §4.2 registration) when `reregistration_allowed` is set, i.e. the
    /// caller authenticated with that account's own password; otherwise the
    /// E164 collision is rejected with 409 Conflict.
    pub async fn create_account(
        &self,
        phone_number: String,
        aci_identity_key: IdentityKey,
        pni_identity_key: IdentityKey,
        primary_device: Device,
        reregistration_allowed: bool,
    ) -> Result<Account, ApiError> {
        if let Ok(existing) = self
            .db
            .get_account_from_phonenumber_without_devices(&phone_number)
            .await
        {
            if !reregistration_allowed {
                return Err(ApiError {
                    status_code: StatusCode::CONFLICT,
                    body: "phone number already in use".to_owned(),
                });
            }
            self.db
                .delete_account(&ServiceId::Aci(existing.aci()))
                .await
                .map_err(|err| ApiError {
                    status_code: StatusCode::INTERNAL_SERVER_ERROR,
                    body: err.to_string(),
                })?;
        }

        let account = Account::new(
            Pni::from(Uuid::new_v4()),
            aci_identity_key,
            pni_identity_key,
            primary_device,
            phone_number,
        );
        self.db.add_account(&account).await.map_err(|err| ApiError {
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
            body: err.to_string(),
        })?;
        Ok(account)
    }

    pub async fn get_account(&self, service_id: &ServiceId) -> Result<Account> {
        self.db.get_account(service_id).await
    }

    pub async fn get_account_from_phonenumber_without_devices(
        &self,
        phone_number: &str,
    ) -> Result<Account> {
        self.db
            .get_account_from_phonenumber_without_devices(phone_number)
            .await
    }

    pub async fn update_account_aci(&self, service_id: &ServiceId, new_aci: Aci) -> Result<()> {
        self.db.update_account_aci(service_id, new_aci).await
    }

    pub async fn update_account_pni(&self, service_id: &ServiceId, new_pni: Pni) -> Result<()> {
        self.db.update_account_pni(service_id, new_pni).await
    }

    pub async fn delete_account(&self, service_id: &ServiceId) -> Result<()> {
        self.db.delete_account(service_id).await
    }

    pub async fn add_device(&self, service_id: &ServiceId, device: &Device) -> Result<()> {
        self.db.add_device(service_id, device).await
    }

    pub async fn get_all_devices(&self, service_id: &ServiceId) -> Result<Vec<Device>> {
        self.db.get_all_devices(service_id).await
    }
    pub async fn get_device(&self, address: &ProtocolAddress) -> Result<Device> {
        self.db.get_device(address).await
    }
    pub async fn delete_device(&self, address: &ProtocolAddress) -> Result<()> {
        self.db.delete_device(address).await
    }

    pub async fn store_key_bundle(
        &self,
        kind: ServiceIdKind,
        data: &DevicePreKeyBundle,
        address: &ProtocolAddress,
    ) -> Result<()> {
        self.db.store_key_bundle(kind, data, address).await
    }
}
