//! Account/device fixtures shared by manager unit tests.

use libsignal_core::{Aci, DeviceId, Pni, ProtocolAddress, ServiceIdKind};
use uuid::Uuid;

use crate::account::{Account, AuthenticatedDevice, Device};
use crate::storage::database::SignalDatabase;
use crate::test_utils::key::new_identity_key;

/// Inserts a fresh account with a single primary device into `db` and
/// returns it alongside that device's ACI protocol address.
pub async fn new_account_and_address<T: SignalDatabase>(
    db: &T,
) -> (Account, Device, ProtocolAddress) {
    let device = new_device(1.into());
    let mut account = Account::new(
        Pni::from(Uuid::new_v4()),
        new_identity_key(),
        new_identity_key(),
        device.clone(),
        format!("+1555{:07}", rand::random::<u32>() % 10_000_000),
    );
    account.set_aci(Aci::from(Uuid::new_v4()));
    db.add_account(&account).await.unwrap();
    let address = account.get_protocol_address(ServiceIdKind::Aci, device.device_id());
    (account, device, address)
}

pub fn new_device(device_id: DeviceId) -> Device {
    Device::builder()
        .device_id(device_id)
        .last_seen(0)
        .created(0)
        .auth_token("token".to_owned())
        .salt("salt".to_owned())
        .registration_id(1)
        .pni_registration_id(1)
        .build()
}

pub fn new_protocol_address() -> ProtocolAddress {
    ProtocolAddress::new(Aci::from(Uuid::new_v4()).service_id_string(), 1.into())
}

/// A standalone `AuthenticatedDevice` not backed by any database, for tests
/// that only need a plausible identity to attach to a connection.
pub fn new_authenticated_device() -> AuthenticatedDevice {
    let device = new_device(1.into());
    let mut account = Account::new(
        Pni::from(Uuid::new_v4()),
        new_identity_key(),
        new_identity_key(),
        device.clone(),
        format!("+1555{:07}", rand::random::<u32>() % 10_000_000),
    );
    account.set_aci(Aci::from(Uuid::new_v4()));
    AuthenticatedDevice::new(account, device)
}
