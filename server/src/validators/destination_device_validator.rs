//! Checks that the device ids named in an incoming multi-recipient send
//! exactly match the destination account's current device list.
//!
//! Not present in the retrieved base files; rebuilt from its call sites
//! in `server/server.rs::handle_put_messages`.

use common::web_api::{MismatchedDevices, SignalMessage};

use crate::account::Account;

pub struct DestinationDeviceValidator;

impl DestinationDeviceValidator {
    /// `message_device_ids` must name every device on `destination` except
    /// those in `exclude_device_ids` (the sender's own device on a sync
    /// send), with nothing extra and nothing missing.
    pub fn validate_complete_device_list(
        destination: &Account,
        message_device_ids: &[u32],
        exclude_device_ids: &[u32],
    ) -> Result<(), MismatchedDevices> {
        let account_device_ids: Vec<u32> = destination
            .devices()
            .into_iter()
            .map(|d| d.device_id().into())
            .filter(|id| !exclude_device_ids.contains(id))
            .collect();

        let missing_devices: Vec<u32> = account_device_ids
            .iter()
            .filter(|id| !message_device_ids.contains(id))
            .copied()
            .collect();
        let extra_devices: Vec<u32> = message_device_ids
            .iter()
            .filter(|id| !account_device_ids.contains(id))
            .copied()
            .collect();

        if missing_devices.is_empty() && extra_devices.is_empty() {
            return Ok(());
        }
        Err(MismatchedDevices {
            stale_devices: Vec::new(),
            missing_devices,
            extra_devices,
        })
    }

    /// Every `SignalMessage` must carry the registration id the server has
    /// on file for its target device, proving the sender's session isn't
    /// built against a rotated identity.
    pub fn validate_registration_id_from_messages(
        destination: &Account,
        messages: &[SignalMessage],
        is_pni: bool,
    ) -> Result<(), MismatchedDevices> {
        let stale_devices: Vec<u32> = messages
            .iter()
            .filter(|message| {
                destination
                    .device(message.destination_device_id.into())
                    .map(|device| {
                        let expected = if is_pni {
                            device.pni_registration_id()
                        } else {
                            device.registration_id()
                        };
                        expected != message.destination_registration_id
                    })
                    .unwrap_or(false)
            })
            .map(|message| message.destination_device_id)
            .collect();

        if stale_devices.is_empty() {
            return Ok(());
        }
        Err(MismatchedDevices {
            stale_devices,
            missing_devices: Vec::new(),
            extra_devices: Vec::new(),
        })
    }
}
