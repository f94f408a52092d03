//! JSON request/response DTOs for the HTTP surface.
//!
//! Plain `serde` structs using the wire's camelCase field names, kept close
//! to what a real Signal client sends so it can be pointed at this server
//! unmodified.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub mod authorization {
    use std::str::FromStr;

    /// `Authorization: Basic base64(serviceId.deviceId:password)`.
    #[derive(Debug, Clone)]
    pub struct BasicAuthorizationHeader {
        username: String,
        password: String,
    }

    impl BasicAuthorizationHeader {
        pub fn new(username: String, password: String) -> Self {
            Self { username, password }
        }

        pub fn username(&self) -> &str {
            &self.username
        }

        pub fn password(&self) -> &str {
            &self.password
        }
    }

    impl FromStr for BasicAuthorizationHeader {
        type Err = anyhow::Error;

        fn from_str(header: &str) -> Result<Self, Self::Err> {
            let encoded = header
                .strip_prefix("Basic ")
                .ok_or_else(|| anyhow::anyhow!("Authorization header is not Basic"))?;
            let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded)?;
            let decoded = String::from_utf8(decoded)?;
            let (username, password) = decoded
                .split_once(':')
                .ok_or_else(|| anyhow::anyhow!("Malformed basic auth credentials"))?;
            Ok(Self::new(username.to_owned(), password.to_owned()))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceCapabilityType {
    Storage,
    DeleteSync,
    VersionedExpirationTimer,
}

pub struct DeviceCapabilityInfo {
    pub prevent_downgrade: bool,
}

impl DeviceCapabilityType {
    pub const VALUES: [DeviceCapabilityType; 3] = [
        DeviceCapabilityType::Storage,
        DeviceCapabilityType::DeleteSync,
        DeviceCapabilityType::VersionedExpirationTimer,
    ];

    pub fn value(&self) -> DeviceCapabilityInfo {
        match self {
            DeviceCapabilityType::Storage => DeviceCapabilityInfo {
                prevent_downgrade: true,
            },
            DeviceCapabilityType::DeleteSync => DeviceCapabilityInfo {
                prevent_downgrade: true,
            },
            DeviceCapabilityType::VersionedExpirationTimer => DeviceCapabilityInfo {
                prevent_downgrade: false,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountAttributes {
    pub name: Option<Vec<u8>>,
    pub registration_id: u32,
    pub pni_registration_id: u32,
    pub fetches_messages: bool,
    #[serde(default)]
    pub capabilities: HashSet<DeviceCapabilityType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPreKey {
    pub key_id: u32,
    #[serde(with = "crate::web_api::base64_bytes")]
    pub public_key: Box<[u8]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSignedPreKey {
    pub key_id: u32,
    #[serde(with = "crate::web_api::base64_bytes")]
    pub public_key: Box<[u8]>,
    #[serde(with = "crate::web_api::base64_bytes")]
    pub signature: Box<[u8]>,
}

pub mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Box<[u8]>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes.as_ref()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Box<[u8]>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(s)
            .map(Vec::into_boxed_slice)
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePreKeyBundle {
    pub aci_signed_pre_key: UploadSignedPreKey,
    pub pni_signed_pre_key: UploadSignedPreKey,
    pub aci_pq_pre_key: UploadSignedPreKey,
    pub pni_pq_pre_key: UploadSignedPreKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    session_id: Option<String>,
    account_attributes: AccountAttributes,
    aci_identity_key: String,
    pni_identity_key: String,
    aci_signed_pre_key: UploadSignedPreKey,
    pni_signed_pre_key: UploadSignedPreKey,
    aci_pq_last_resort_pre_key: UploadSignedPreKey,
    pni_pq_last_resort_pre_key: UploadSignedPreKey,
}

impl RegistrationRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn for_test(
        account_attributes: AccountAttributes,
        aci_identity_key: String,
        pni_identity_key: String,
        aci_signed_pre_key: UploadSignedPreKey,
        pni_signed_pre_key: UploadSignedPreKey,
        aci_pq_last_resort_pre_key: UploadSignedPreKey,
        pni_pq_last_resort_pre_key: UploadSignedPreKey,
    ) -> Self {
        Self {
            session_id: None,
            account_attributes,
            aci_identity_key,
            pni_identity_key,
            aci_signed_pre_key,
            pni_signed_pre_key,
            aci_pq_last_resort_pre_key,
            pni_pq_last_resort_pre_key,
        }
    }

    pub fn account_attributes(&self) -> &AccountAttributes {
        &self.account_attributes
    }
    pub fn aci_identity_key(&self) -> &str {
        &self.aci_identity_key
    }
    pub fn pni_identity_key(&self) -> &str {
        &self.pni_identity_key
    }
    pub fn aci_signed_pre_key(&self) -> &UploadSignedPreKey {
        &self.aci_signed_pre_key
    }
    pub fn pni_signed_pre_key(&self) -> &UploadSignedPreKey {
        &self.pni_signed_pre_key
    }
    pub fn aci_pq_last_resort_pre_key(&self) -> &UploadSignedPreKey {
        &self.aci_pq_last_resort_pre_key
    }
    pub fn pni_pq_last_resort_pre_key(&self) -> &UploadSignedPreKey {
        &self.pni_pq_last_resort_pre_key
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    pub uuid: String,
    pub pni: String,
    pub number: String,
    pub username_hash: Option<String>,
    pub storage_capable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceActivationRequest {
    pub aci_signed_pre_key: UploadSignedPreKey,
    pub aci_pq_last_resort_pre_key: UploadSignedPreKey,
    pub pni_signed_pre_key: UploadSignedPreKey,
    pub pni_pq_last_resort_pre_key: UploadSignedPreKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkDeviceRequest {
    pub verification_code: String,
    pub account_attributes: AccountAttributes,
    pub device_activation_request: DeviceActivationRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkDeviceResponse {
    pub aci: String,
    pub pni: String,
    pub device_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkDeviceToken {
    pub verification_code: String,
    pub token_identifier: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreKeyCount {
    pub count: u32,
    pub pq_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetKeyRequest {
    pub pre_keys: Option<Vec<UploadPreKey>>,
    pub pq_pre_keys: Option<Vec<UploadSignedPreKey>>,
    pub pq_last_resort_pre_key: Option<UploadSignedPreKey>,
    pub signed_pre_key: Option<UploadSignedPreKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreKeyResponseItem {
    pub device_id: u32,
    pub registration_id: u32,
    pub pre_key: Option<UploadPreKey>,
    pub pq_pre_key: Option<UploadSignedPreKey>,
    pub signed_pre_key: UploadSignedPreKey,
}

impl PreKeyResponseItem {
    pub fn new(
        device_id: u32,
        registration_id: u32,
        pre_key: Option<UploadPreKey>,
        pq_pre_key: UploadSignedPreKey,
        signed_pre_key: UploadSignedPreKey,
    ) -> Self {
        Self {
            device_id,
            registration_id,
            pre_key,
            pq_pre_key: Some(pq_pre_key),
            signed_pre_key,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreKeyResponse {
    pub identity_key: String,
    pub devices: Vec<PreKeyResponseItem>,
}

impl PreKeyResponse {
    pub fn new(identity_key: impl ToString, devices: Vec<PreKeyResponseItem>) -> Self {
        Self {
            identity_key: identity_key.to_string(),
            devices,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalMessage {
    pub r#type: u32,
    pub destination_device_id: u32,
    pub destination_registration_id: u32,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageList {
    pub messages: Vec<SignalMessage>,
    pub online: bool,
    pub urgent: bool,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub needs_sync: bool,
}

/// Stale/missing/extra device set returned on a 409.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MismatchedDevices {
    pub stale_devices: Vec<u32>,
    pub missing_devices: Vec<u32>,
    pub extra_devices: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsernameHashRequest {
    pub username_hashes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsernameHashResponse {
    pub username_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsernameHashConfirmRequest {
    pub username_hash: String,
    pub zk_proof: String,
    pub encrypted_username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBackupIdRequest {
    #[serde(with = "crate::web_api::base64_bytes")]
    pub messages_backup_auth_credential_request: Box<[u8]>,
    #[serde(with = "crate::web_api::base64_bytes")]
    pub media_backup_auth_credential_request: Box<[u8]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBackupKeyRequest {
    #[serde(with = "crate::web_api::base64_bytes")]
    pub backup_id_public_key: Box<[u8]>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CallLinkRestrictions {
    None,
    AdminApproval,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCallLinkRequest {
    #[serde(with = "crate::web_api::base64_bytes")]
    pub create_call_link_credential_presentation: Box<[u8]>,
    #[serde(with = "crate::web_api::base64_bytes")]
    pub room_id: Box<[u8]>,
    #[serde(with = "crate::web_api::base64_bytes")]
    pub admin_passkey: Box<[u8]>,
    #[serde(with = "crate::web_api::base64_bytes")]
    pub zk_params: Box<[u8]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallLinkStateResponse {
    pub restrictions: CallLinkRestrictions,
    pub revoked: bool,
    #[serde(with = "crate::web_api::base64_bytes")]
    pub name: Box<[u8]>,
}

/// One key/value record in the storage service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageItem {
    #[serde(with = "crate::web_api::base64_bytes")]
    pub key: Box<[u8]>,
    #[serde(with = "crate::web_api::base64_bytes")]
    pub value: Box<[u8]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageManifest {
    pub version: u64,
    #[serde(with = "crate::web_api::base64_bytes")]
    pub value: Box<[u8]>,
}

/// `PUT /v1/storage` body: an atomic manifest swap plus incremental item
/// changes, applied only if `manifest.version` strictly exceeds the stored
/// version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteOperation {
    pub manifest: StorageManifest,
    #[serde(default)]
    pub insert_item: Vec<StorageItem>,
    #[serde(default)]
    pub delete_key: Vec<Box<[u8]>>,
    #[serde(default)]
    pub clear_all: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadOperation {
    pub read_key: Vec<Box<[u8]>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageItems {
    pub items: Vec<StorageItem>,
}

/// A group's membership/attribute blob, opaque to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupState {
    pub version: u32,
    #[serde(with = "crate::web_api::base64_bytes")]
    pub group: Box<[u8]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupChange {
    pub version: u32,
    #[serde(with = "crate::web_api::base64_bytes")]
    pub change: Box<[u8]>,
    #[serde(with = "crate::web_api::base64_bytes")]
    pub server_signature: Box<[u8]>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GroupChangeLog {
    pub changes: Vec<GroupChange>,
}

/// Opaque 32-hex attachment CDN key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentUploadForm {
    pub cdn_key: String,
    pub upload_url: String,
}
