//! In-memory `SignalDatabase`.
//!
//! Grounded on the `storage::postgres::PostgresDatabase` shape implied by
//! the `SignalDatabase` call sites, with a `tokio::sync::RwLock<HashMap<...>>`
//! standing in for the SQL tables.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use common::web_api::{DevicePreKeyBundle, PreKeyCount, UploadPreKey, UploadSignedPreKey};
use libsignal_core::{Aci, Pni, ProtocolAddress, ServiceId, ServiceIdKind};
use tokio::sync::RwLock;

use crate::account::{Account, Device};
use crate::storage::database::SignalDatabase;

#[derive(Debug, Default, Clone)]
struct KeyMaterial {
    signed_pre_key: Option<UploadSignedPreKey>,
    pq_last_resort_pre_key: Option<UploadSignedPreKey>,
    one_time_ec_pre_keys: VecDeque<UploadPreKey>,
    one_time_pq_pre_keys: VecDeque<UploadSignedPreKey>,
}

#[derive(Debug, Default, Clone)]
struct DeviceKeys {
    aci: KeyMaterial,
    pni: KeyMaterial,
}

impl DeviceKeys {
    fn flavor(&self, kind: ServiceIdKind) -> &KeyMaterial {
        match kind {
            ServiceIdKind::Aci => &self.aci,
            ServiceIdKind::Pni => &self.pni,
        }
    }

    fn flavor_mut(&mut self, kind: ServiceIdKind) -> &mut KeyMaterial {
        match kind {
            ServiceIdKind::Aci => &mut self.aci,
            ServiceIdKind::Pni => &mut self.pni,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    accounts: HashMap<Aci, Account>,
    pni_index: HashMap<Pni, Aci>,
    phone_index: HashMap<String, Aci>,
    keys: HashMap<ProtocolAddress, DeviceKeys>,
}

/// Cheap-to-clone handle shared by every manager that touches account
/// state, mirroring a `PostgresDatabase` connection pool handle, also cheap
/// to clone.
#[derive(Debug, Clone)]
pub struct InMemoryDatabase {
    inner: Arc<RwLock<Inner>>,
}

impl Default for InMemoryDatabase {
    fn default() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }
}

fn not_found(what: &str) -> anyhow::Error {
    anyhow!("{what} not found")
}

#[async_trait::async_trait]
impl SignalDatabase for InMemoryDatabase {
    async fn add_account(&self, account: &Account) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.phone_index.contains_key(account.phone_number()) {
            return Err(anyhow!("phone number already in use"));
        }
        inner
            .phone_index
            .insert(account.phone_number().to_owned(), account.aci());
        inner.pni_index.insert(account.pni(), account.aci());
        inner.accounts.insert(account.aci(), account.clone());
        Ok(())
    }

    async fn get_account(&self, service_id: &ServiceId) -> Result<Account> {
        let inner = self.inner.read().await;
        let aci = resolve_aci(&inner, service_id)?;
        inner
            .accounts
            .get(&aci)
            .cloned()
            .ok_or_else(|| not_found("account"))
    }

    async fn get_account_from_phonenumber_without_devices(
        &self,
        phone_number: &str,
    ) -> Result<Account> {
        let inner = self.inner.read().await;
        let aci = inner
            .phone_index
            .get(phone_number)
            .ok_or_else(|| not_found("account"))?;
        inner
            .accounts
            .get(aci)
            .cloned()
            .ok_or_else(|| not_found("account"))
    }

    async fn update_account_aci(&self, service_id: &ServiceId, new_aci: Aci) -> Result<()> {
        let mut inner = self.inner.write().await;
        let old_aci = resolve_aci(&inner, service_id)?;
        let mut account = inner
            .accounts
            .remove(&old_aci)
            .ok_or_else(|| not_found("account"))?;
        inner.phone_index.insert(account.phone_number().to_owned(), new_aci);
        inner.pni_index.insert(account.pni(), new_aci);
        account = rebuild_account_with_aci(account, new_aci);
        inner.accounts.insert(new_aci, account);
        Ok(())
    }

    async fn update_account_pni(&self, service_id: &ServiceId, new_pni: Pni) -> Result<()> {
        let mut inner = self.inner.write().await;
        let aci = resolve_aci(&inner, service_id)?;
        let old_pni = inner
            .accounts
            .get(&aci)
            .ok_or_else(|| not_found("account"))?
            .pni();
        inner.pni_index.remove(&old_pni);
        inner.pni_index.insert(new_pni, aci);
        let account = inner.accounts.get_mut(&aci).unwrap();
        *account = rebuild_account_with_pni(account.clone(), new_pni);
        Ok(())
    }

    async fn delete_account(&self, service_id: &ServiceId) -> Result<()> {
        let mut inner = self.inner.write().await;
        let aci = resolve_aci(&inner, service_id)?;
        if let Some(account) = inner.accounts.remove(&aci) {
            inner.phone_index.remove(account.phone_number());
            inner.pni_index.remove(&account.pni());
            for device in account.devices() {
                inner
                    .keys
                    .remove(&account.get_protocol_address(ServiceIdKind::Aci, device.device_id()));
            }
        }
        Ok(())
    }

    async fn add_device(&self, service_id: &ServiceId, device: &Device) -> Result<()> {
        let mut inner = self.inner.write().await;
        let aci = resolve_aci(&inner, service_id)?;
        let account = inner
            .accounts
            .get_mut(&aci)
            .ok_or_else(|| not_found("account"))?;
        account.add_device(device.clone());
        Ok(())
    }

    async fn get_all_devices(&self, service_id: &ServiceId) -> Result<Vec<Device>> {
        let inner = self.inner.read().await;
        let aci = resolve_aci(&inner, service_id)?;
        let account = inner.accounts.get(&aci).ok_or_else(|| not_found("account"))?;
        Ok(account.devices().into_iter().cloned().collect())
    }

    async fn get_device(&self, address: &ProtocolAddress) -> Result<Device> {
        let inner = self.inner.read().await;
        let service_id = ServiceId::parse_from_service_id_string(address.name())
            .ok_or_else(|| anyhow!("invalid service id in address"))?;
        let aci = resolve_aci(&inner, &service_id)?;
        let account = inner.accounts.get(&aci).ok_or_else(|| not_found("account"))?;
        account
            .device(address.device_id())
            .cloned()
            .ok_or_else(|| not_found("device"))
    }

    async fn delete_device(&self, address: &ProtocolAddress) -> Result<()> {
        let mut inner = self.inner.write().await;
        let service_id = ServiceId::parse_from_service_id_string(address.name())
            .ok_or_else(|| anyhow!("invalid service id in address"))?;
        let aci = resolve_aci(&inner, &service_id)?;
        if let Some(account) = inner.accounts.get_mut(&aci) {
            account.remove_device(address.device_id());
        }
        inner.keys.remove(address);
        Ok(())
    }

    async fn store_key_bundle(
        &self,
        kind: ServiceIdKind,
        data: &DevicePreKeyBundle,
        address: &ProtocolAddress,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let entry = inner.keys.entry(address.clone()).or_default();
        let (signed, pq) = match kind {
            ServiceIdKind::Aci => (data.aci_signed_pre_key.clone(), data.aci_pq_pre_key.clone()),
            ServiceIdKind::Pni => (data.pni_signed_pre_key.clone(), data.pni_pq_pre_key.clone()),
        };
        let material = entry.flavor_mut(kind);
        material.signed_pre_key = Some(signed);
        material.pq_last_resort_pre_key = Some(pq);
        Ok(())
    }

    async fn get_signed_pre_key(
        &self,
        kind: ServiceIdKind,
        address: &ProtocolAddress,
    ) -> Result<UploadSignedPreKey> {
        let inner = self.inner.read().await;
        inner
            .keys
            .get(address)
            .and_then(|k| k.flavor(kind).signed_pre_key.clone())
            .ok_or_else(|| not_found("signed prekey"))
    }

    async fn get_pq_last_resort_pre_key(
        &self,
        kind: ServiceIdKind,
        address: &ProtocolAddress,
    ) -> Result<UploadSignedPreKey> {
        let inner = self.inner.read().await;
        inner
            .keys
            .get(address)
            .and_then(|k| k.flavor(kind).pq_last_resort_pre_key.clone())
            .ok_or_else(|| not_found("pq last-resort prekey"))
    }

    async fn replace_signed_pre_keys(
        &self,
        kind: ServiceIdKind,
        address: &ProtocolAddress,
        signed_pre_key: Option<UploadSignedPreKey>,
        pq_last_resort_pre_key: Option<UploadSignedPreKey>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let entry = inner.keys.entry(address.clone()).or_default();
        let material = entry.flavor_mut(kind);
        if let Some(signed) = signed_pre_key {
            material.signed_pre_key = Some(signed);
        }
        if let Some(pq_last_resort) = pq_last_resort_pre_key {
            material.pq_last_resort_pre_key = Some(pq_last_resort);
        }
        Ok(())
    }

    async fn add_one_time_ec_pre_keys(
        &self,
        kind: ServiceIdKind,
        address: &ProtocolAddress,
        keys: Vec<UploadPreKey>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let entry = inner.keys.entry(address.clone()).or_default();
        entry.flavor_mut(kind).one_time_ec_pre_keys.extend(keys);
        Ok(())
    }

    async fn add_one_time_pq_pre_keys(
        &self,
        kind: ServiceIdKind,
        address: &ProtocolAddress,
        keys: Vec<UploadSignedPreKey>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let entry = inner.keys.entry(address.clone()).or_default();
        entry.flavor_mut(kind).one_time_pq_pre_keys.extend(keys);
        Ok(())
    }

    async fn take_one_time_ec_pre_key(
        &self,
        kind: ServiceIdKind,
        address: &ProtocolAddress,
    ) -> Result<Option<UploadPreKey>> {
        let mut inner = self.inner.write().await;
        Ok(inner
            .keys
            .get_mut(address)
            .and_then(|k| k.flavor_mut(kind).one_time_ec_pre_keys.pop_front()))
    }

    async fn take_one_time_pq_pre_key(
        &self,
        kind: ServiceIdKind,
        address: &ProtocolAddress,
    ) -> Result<UploadSignedPreKey> {
        let mut inner = self.inner.write().await;
        let keys = inner.keys.get_mut(address).ok_or_else(|| not_found("device keys"))?;
        let material = keys.flavor_mut(kind);
        if let Some(key) = material.one_time_pq_pre_keys.pop_front() {
            return Ok(key);
        }
        material
            .pq_last_resort_pre_key
            .clone()
            .ok_or_else(|| not_found("pq prekey"))
    }

    async fn get_one_time_pre_key_count(
        &self,
        kind: ServiceIdKind,
        service_id: &ServiceId,
    ) -> Result<PreKeyCount> {
        let inner = self.inner.read().await;
        let aci = resolve_aci(&inner, service_id)?;
        let account = inner.accounts.get(&aci).ok_or_else(|| not_found("account"))?;
        let mut count = 0u32;
        let mut pq_count = 0u32;
        for device in account.devices() {
            let address = account.get_protocol_address(ServiceIdKind::Aci, device.device_id());
            if let Some(keys) = inner.keys.get(&address) {
                let material = keys.flavor(kind);
                count += material.one_time_ec_pre_keys.len() as u32;
                pq_count += material.one_time_pq_pre_keys.len() as u32;
            }
        }
        Ok(PreKeyCount { count, pq_count })
    }
}

fn resolve_aci(inner: &Inner, service_id: &ServiceId) -> Result<Aci> {
    match service_id {
        ServiceId::Aci(aci) => {
            if inner.accounts.contains_key(aci) {
                Ok(*aci)
            } else {
                Err(not_found("account"))
            }
        }
        ServiceId::Pni(pni) => inner
            .pni_index
            .get(pni)
            .copied()
            .ok_or_else(|| not_found("account")),
    }
}

fn rebuild_account_with_aci(mut account: Account, new_aci: Aci) -> Account {
    account.set_aci(new_aci);
    account
}

fn rebuild_account_with_pni(mut account: Account, new_pni: Pni) -> Account {
    account.set_pni(new_pni);
    account
}
