//! Converts the wire-level `SignalMessage` DTO into the protobuf `Envelope`
//! actually queued for delivery.
//!
//! Not present in the retrieved base files; rebuilt from its call site in
//! `server/server.rs::handle_put_messages` (`message.to_envelope(...)`).

use common::signalservice::{envelope, Envelope};
use common::web_api::SignalMessage;
use libsignal_core::{DeviceId, ServiceId};
use uuid::Uuid;

pub trait ToEnvelope {
    #[allow(clippy::too_many_arguments)]
    fn to_envelope(
        &self,
        destination_service_id: &ServiceId,
        source_service_id: Option<ServiceId>,
        source_device_id: Option<DeviceId>,
        destination_registration_id: u32,
        timestamp: u64,
        story: bool,
    ) -> Envelope;
}

impl ToEnvelope for SignalMessage {
    fn to_envelope(
        &self,
        destination_service_id: &ServiceId,
        source_service_id: Option<ServiceId>,
        source_device_id: Option<DeviceId>,
        destination_registration_id: u32,
        timestamp: u64,
        story: bool,
    ) -> Envelope {
        use base64::prelude::{Engine, BASE64_STANDARD};

        let content = BASE64_STANDARD.decode(&self.content).unwrap_or_default();

        Envelope {
            r#type: Some(self.r#type as i32),
            source_service_id: source_service_id.map(|id| id.service_id_string()),
            source_device: source_device_id.map(u32::from),
            destination_service_id: Some(destination_service_id.service_id_string()),
            destination_device_id: Some(self.destination_device_id),
            destination_registration_id: Some(destination_registration_id),
            timestamp: Some(timestamp),
            content: Some(content),
            server_guid: Some(Uuid::new_v4().to_string()),
            server_timestamp: Some(timestamp),
            ephemeral: Some(false),
            urgent: Some(true),
            story: Some(story),
        }
    }
}

pub fn envelope_type_name(r#type: i32) -> &'static str {
    match envelope::Type::try_from(r#type) {
        Ok(envelope::Type::Ciphertext) => "ciphertext",
        Ok(envelope::Type::KeyExchange) => "key-exchange",
        Ok(envelope::Type::PrekeyBundle) => "prekey-bundle",
        Ok(envelope::Type::Receipt) => "receipt",
        Ok(envelope::Type::UnidentifiedSender) => "unidentified-sender",
        Ok(envelope::Type::SenderkeyMessage) => "sender-key",
        Ok(envelope::Type::PlaintextContent) => "plaintext",
        _ => "unknown",
    }
}
