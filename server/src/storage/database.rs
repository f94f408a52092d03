//! Account/device/key storage, abstracted behind a trait the same way a
//! Postgres-backed store would be, so tests can run against the same trait
//! the real server uses.
//!
//! Not present in the retrieved base files (only `storage/redis.rs` was
//! captured); rebuilt from the call sites in `managers/account_manager.rs`,
//! `managers/websocket/connection.rs` and `server/server.rs`.

use crate::account::{Account, Device};
use anyhow::Result;
use common::web_api::{DevicePreKeyBundle, PreKeyCount, UploadPreKey, UploadSignedPreKey};
use libsignal_core::{Aci, Pni, ProtocolAddress, ServiceId, ServiceIdKind};

#[async_trait::async_trait]
pub trait SignalDatabase: Clone + Default + Send + Sync + 'static {
    async fn add_account(&self, account: &Account) -> Result<()>;
    async fn get_account(&self, service_id: &ServiceId) -> Result<Account>;
    async fn get_account_from_phonenumber_without_devices(
        &self,
        phone_number: &str,
    ) -> Result<Account>;
    async fn update_account_aci(&self, service_id: &ServiceId, new_aci: Aci) -> Result<()>;
    async fn update_account_pni(&self, service_id: &ServiceId, new_pni: Pni) -> Result<()>;
    async fn delete_account(&self, service_id: &ServiceId) -> Result<()>;

    async fn add_device(&self, service_id: &ServiceId, device: &Device) -> Result<()>;
    async fn get_all_devices(&self, service_id: &ServiceId) -> Result<Vec<Device>>;
    async fn get_device(&self, address: &ProtocolAddress) -> Result<Device>;
    async fn delete_device(&self, address: &ProtocolAddress) -> Result<()>;

    /// Stores the signed + last-resort PQ prekeys minted at registration
    /// or device-link time for one identity flavor of one device.
    async fn store_key_bundle(
        &self,
        kind: ServiceIdKind,
        data: &DevicePreKeyBundle,
        address: &ProtocolAddress,
    ) -> Result<()>;
    async fn get_signed_pre_key(
        &self,
        kind: ServiceIdKind,
        address: &ProtocolAddress,
    ) -> Result<UploadSignedPreKey>;
    async fn get_pq_last_resort_pre_key(
        &self,
        kind: ServiceIdKind,
        address: &ProtocolAddress,
    ) -> Result<UploadSignedPreKey>;
    /// Replaces the signed prekey and/or PQ last-resort prekey for a device,
    /// as uploaded post-registration via `PUT /v2/keys`. Either argument may
    /// be `None` to leave that key untouched.
    async fn replace_signed_pre_keys(
        &self,
        kind: ServiceIdKind,
        address: &ProtocolAddress,
        signed_pre_key: Option<UploadSignedPreKey>,
        pq_last_resort_pre_key: Option<UploadSignedPreKey>,
    ) -> Result<()>;

    /// Adds one-time (EC) prekeys uploaded via `PUT /v2/keys`.
    async fn add_one_time_ec_pre_keys(
        &self,
        kind: ServiceIdKind,
        address: &ProtocolAddress,
        keys: Vec<UploadPreKey>,
    ) -> Result<()>;
    /// Adds one-time Kyber (PQ) prekeys uploaded via `PUT /v2/keys`.
    async fn add_one_time_pq_pre_keys(
        &self,
        kind: ServiceIdKind,
        address: &ProtocolAddress,
        keys: Vec<UploadSignedPreKey>,
    ) -> Result<()>;
    /// Pops (consumes) one one-time EC prekey for delivery in a `PreKeyResponseItem`.
    async fn take_one_time_ec_pre_key(
        &self,
        kind: ServiceIdKind,
        address: &ProtocolAddress,
    ) -> Result<Option<UploadPreKey>>;
    /// Pops one one-time PQ prekey, falling back to the last-resort PQ key
    /// (which is never consumed) if the pool is empty.
    async fn take_one_time_pq_pre_key(
        &self,
        kind: ServiceIdKind,
        address: &ProtocolAddress,
    ) -> Result<UploadSignedPreKey>;
    async fn get_one_time_pre_key_count(
        &self,
        kind: ServiceIdKind,
        service_id: &ServiceId,
    ) -> Result<PreKeyCount>;
}
