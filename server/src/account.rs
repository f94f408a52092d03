//! Account and device descriptors.
//!
//! Not present in the retrieved base files (`account.rs` was filtered
//! out of the retrieval pack) but referenced throughout `server.rs` and the
//! managers; rebuilt here from those call sites and the account/device
//! data model they assume.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::headers::authorization::Basic;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use common::web_api::{AccountAttributes, DeviceCapabilityType};
use libsignal_core::{Aci, DeviceId, Pni, ProtocolAddress, ServiceIdKind};
use libsignal_protocol::IdentityKey;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::account_authenticator::SaltedTokenHash;
use crate::error::ApiError;
use crate::managers::state::SignalServerState;
use crate::storage::memory::InMemoryDatabase;

#[derive(Debug, Clone, bon::Builder)]
pub struct Device {
    pub device_id: DeviceId,
    pub name: Option<Vec<u8>>,
    pub last_seen: u128,
    pub created: u128,
    pub auth_token: String,
    pub salt: String,
    pub registration_id: u32,
    pub pni_registration_id: u32,
    #[builder(default)]
    pub capabilities: HashSet<DeviceCapabilityType>,
    #[builder(default = true)]
    pub fetches_messages: bool,
}

impl Device {
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    pub fn pni_registration_id(&self) -> u32 {
        self.pni_registration_id
    }
}

#[derive(Debug, Clone)]
pub struct Account {
    aci: Aci,
    pni: Pni,
    phone_number: String,
    aci_identity_key: IdentityKey,
    pni_identity_key: IdentityKey,
    devices: HashMap<DeviceId, Device>,
    profile_key: Option<[u8; 32]>,
    username_hash: Option<String>,
    username_link: Option<Uuid>,
    backup_id_public_key: Option<Vec<u8>>,
}

impl Account {
    pub fn new(
        pni: Pni,
        aci_identity_key: IdentityKey,
        pni_identity_key: IdentityKey,
        primary_device: Device,
        phone_number: String,
    ) -> Self {
        let mut devices = HashMap::new();
        devices.insert(primary_device.device_id(), primary_device);
        Self {
            aci: Aci::from(Uuid::new_v4()),
            pni,
            phone_number,
            aci_identity_key,
            pni_identity_key,
            devices,
            profile_key: None,
            username_hash: None,
            username_link: None,
            backup_id_public_key: None,
        }
    }

    pub fn aci(&self) -> Aci {
        self.aci
    }

    pub fn pni(&self) -> Pni {
        self.pni
    }

    pub fn set_aci(&mut self, aci: Aci) {
        self.aci = aci;
    }

    pub fn set_pni(&mut self, pni: Pni) {
        self.pni = pni;
    }

    pub fn phone_number(&self) -> &str {
        &self.phone_number
    }

    pub fn aci_identity_key(&self) -> IdentityKey {
        self.aci_identity_key
    }

    pub fn pni_identity_key(&self) -> IdentityKey {
        self.pni_identity_key
    }

    pub fn devices(&self) -> Vec<&Device> {
        let mut devices: Vec<&Device> = self.devices.values().collect();
        devices.sort_by_key(|d| u32::from(d.device_id()));
        devices
    }

    pub fn device(&self, device_id: DeviceId) -> Option<&Device> {
        self.devices.get(&device_id)
    }

    pub fn add_device(&mut self, device: Device) {
        self.devices.insert(device.device_id(), device);
    }

    pub fn remove_device(&mut self, device_id: DeviceId) -> Option<Device> {
        self.devices.remove(&device_id)
    }

    pub fn get_next_device_id(&self) -> u32 {
        self.devices
            .keys()
            .map(|id| u32::from(*id))
            .max()
            .unwrap_or(1)
            + 1
    }

    pub fn has_capability(&self, capability: &DeviceCapabilityType) -> bool {
        self.devices
            .values()
            .all(|d| d.capabilities.contains(capability))
    }

    pub fn get_protocol_address(&self, kind: ServiceIdKind, device_id: DeviceId) -> ProtocolAddress {
        let identifier = match kind {
            ServiceIdKind::Aci => self.aci.service_id_string(),
            ServiceIdKind::Pni => self.pni.service_id_string(),
        };
        ProtocolAddress::new(identifier, device_id)
    }

    pub fn set_profile_key(&mut self, key: [u8; 32]) {
        self.profile_key = Some(key);
    }

    pub fn profile_key(&self) -> Option<&[u8; 32]> {
        self.profile_key.as_ref()
    }

    pub fn username_hash(&self) -> Option<&str> {
        self.username_hash.as_deref()
    }

    pub fn set_username_hash(&mut self, hash: Option<String>) {
        self.username_hash = hash;
    }

    pub fn username_link(&self) -> Option<Uuid> {
        self.username_link
    }

    pub fn set_username_link(&mut self, link: Option<Uuid>) {
        self.username_link = link;
    }

    pub fn backup_id_public_key(&self) -> Option<&[u8]> {
        self.backup_id_public_key.as_deref()
    }

    pub fn set_backup_id_public_key(&mut self, key: Vec<u8>) {
        self.backup_id_public_key = Some(key);
    }
}

/// The authenticated device behind a request, produced by the Basic-auth
/// Axum extractor for every `basic(device)`-mode route.
#[derive(Debug, Clone)]
pub struct AuthenticatedDevice {
    account: Account,
    device: Device,
}

impl AuthenticatedDevice {
    pub fn new(account: Account, device: Device) -> Self {
        Self { account, device }
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn get_protocol_address(&self, kind: ServiceIdKind) -> ProtocolAddress {
        self.account
            .get_protocol_address(kind, self.device.device_id())
    }
}

/// Resolves the `Authorization: Basic` header against `ServerState`.
/// Username is `<e164>.<deviceId>` (device id omitted defaults to the
/// primary device, id 1), mirroring the `<identifier>.<deviceId>:<password>`
/// convention used by the link-device verification-code claims
/// (`server.rs`'s `handle_get_link_device_token`).
#[axum::async_trait]
impl FromRequestParts<SignalServerState<InMemoryDatabase, crate::managers::websocket::signal_websocket::SignalWebSocket>>
    for AuthenticatedDevice
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SignalServerState<InMemoryDatabase, crate::managers::websocket::signal_websocket::SignalWebSocket>,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(basic)) =
            TypedHeader::<Authorization<Basic>>::from_request_parts(parts, state)
                .await
                .map_err(|_| ApiError {
                    status_code: axum::http::StatusCode::UNAUTHORIZED,
                    body: "missing or malformed Authorization header".to_owned(),
                })?;

        let (phone_number, device_id) = match basic.username().split_once('.') {
            Some((number, id)) => (
                number,
                id.parse::<u32>().map_err(|_| ApiError {
                    status_code: axum::http::StatusCode::UNAUTHORIZED,
                    body: "malformed device id in Authorization username".to_owned(),
                })?,
            ),
            None => (basic.username(), 1),
        };

        let account = state
            .account_manager
            .get_account_from_phonenumber_without_devices(phone_number)
            .await
            .map_err(|_| ApiError {
                status_code: axum::http::StatusCode::UNAUTHORIZED,
                body: "no such account".to_owned(),
            })?;
        let full_account = state
            .account_manager
            .get_account(&libsignal_core::ServiceId::Aci(account.aci()))
            .await
            .map_err(|_| ApiError {
                status_code: axum::http::StatusCode::UNAUTHORIZED,
                body: "no such account".to_owned(),
            })?;
        let device = full_account
            .device(device_id.into())
            .cloned()
            .ok_or_else(|| ApiError {
                status_code: axum::http::StatusCode::UNAUTHORIZED,
                body: "no such device".to_owned(),
            })?;

        let token = SaltedTokenHash::with_salt(basic.password(), device.salt.clone());
        if token.hash() != device.auth_token {
            return Err(ApiError {
                status_code: axum::http::StatusCode::UNAUTHORIZED,
                body: "bad credentials".to_owned(),
            });
        }

        Ok(AuthenticatedDevice::new(full_account, device))
    }
}

/// Builds `AccountAttributes`-shaped capability checks convenient for the
/// registration/link handlers.
pub fn capabilities_from_attributes(attributes: &AccountAttributes) -> HashSet<DeviceCapabilityType> {
    attributes.capabilities.clone()
}

fn decode_header_base64(parts: &Parts, name: &str) -> Result<Box<[u8]>, ApiError> {
    use base64::prelude::{Engine as _, BASE64_STANDARD};

    let value = parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError {
            status_code: axum::http::StatusCode::UNAUTHORIZED,
            body: format!("missing {name} header"),
        })?;
    BASE64_STANDARD
        .decode(value)
        .map(Vec::into_boxed_slice)
        .map_err(|_| ApiError {
            status_code: axum::http::StatusCode::UNAUTHORIZED,
            body: format!("malformed {name} header"),
        })
}

/// `Group-Auth: base64(zkAuthPresentation)`, required by group endpoints.
/// The handler still has to check the presentation against the group id via
/// `crypto::zk::ServerSecretParams::verify_presentation`; this extractor
/// only pulls the bytes off the wire.
pub struct GroupAuth(pub Box<[u8]>);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for GroupAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        decode_header_base64(parts, "Group-Auth").map(GroupAuth)
    }
}

/// `x-signal-zk-auth` + `x-signal-zk-auth-signature`, required by backup
/// endpoints. Verified the same way as `GroupAuth`, against the backup zk
/// params instead of the group ones.
pub struct BackupZkAuth {
    pub auth: Box<[u8]>,
    pub signature: Box<[u8]>,
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for BackupZkAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self {
            auth: decode_header_base64(parts, "x-signal-zk-auth")?,
            signature: decode_header_base64(parts, "x-signal-zk-auth-signature")?,
        })
    }
}

/// `Unidentified-Access-Key` + `x-signal-sender-certificate`, the sealed-sender
/// send path. The caller never presents device credentials; the sender
/// certificate is checked against the trust root here, and the access key
/// is left for the handler to compare against the destination's profile key
/// (which the path hasn't been resolved to yet at extraction time).
pub struct UnidentifiedSenderAuth {
    pub access_key: Box<[u8]>,
    pub sender_aci: Aci,
    pub sender_device_id: DeviceId,
}

#[axum::async_trait]
impl FromRequestParts<SignalServerState<InMemoryDatabase, crate::managers::websocket::signal_websocket::SignalWebSocket>>
    for UnidentifiedSenderAuth
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SignalServerState<InMemoryDatabase, crate::managers::websocket::signal_websocket::SignalWebSocket>,
    ) -> Result<Self, Self::Rejection> {
        use prost::Message;

        let access_key = decode_header_base64(parts, "Unidentified-Access-Key")?;
        let cert_bytes = decode_header_base64(parts, "x-signal-sender-certificate")?;
        let certificate = common::signalservice::SenderCertificate::decode(cert_bytes.as_ref()).map_err(|_| ApiError {
            status_code: axum::http::StatusCode::UNAUTHORIZED,
            body: "malformed sender certificate".to_owned(),
        })?;

        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|_| ApiError {
                status_code: axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                body: "Time went backwards".to_owned(),
            })?
            .as_millis() as u64;

        let decoded = crate::crypto::sealed_sender::validate_sender_certificate(
            &certificate,
            &state.config.trust_root.public_key,
            now_ms,
        )
        .map_err(|_| ApiError {
            status_code: axum::http::StatusCode::UNAUTHORIZED,
            body: "invalid sender certificate".to_owned(),
        })?;

        let sender_aci = Aci::parse_from_service_id_string(
            decoded.sender_uuid.as_deref().ok_or_else(|| ApiError {
                status_code: axum::http::StatusCode::UNAUTHORIZED,
                body: "sender certificate missing sender uuid".to_owned(),
            })?,
        )
        .ok_or_else(|| ApiError {
            status_code: axum::http::StatusCode::UNAUTHORIZED,
            body: "sender certificate has malformed sender uuid".to_owned(),
        })?;
        let sender_device_id: DeviceId = decoded
            .sender_device
            .ok_or_else(|| ApiError {
                status_code: axum::http::StatusCode::UNAUTHORIZED,
                body: "sender certificate missing sender device".to_owned(),
            })?
            .into();

        Ok(Self {
            access_key,
            sender_aci,
            sender_device_id,
        })
    }
}

/// Either a regular authenticated send or a sealed-sender send identified
/// only by its certificate, used by the message-send endpoint so it can
/// accept both without two separate routes.
pub enum MessageSender {
    Identified(AuthenticatedDevice),
    Sealed(UnidentifiedSenderAuth),
}

#[axum::async_trait]
impl FromRequestParts<SignalServerState<InMemoryDatabase, crate::managers::websocket::signal_websocket::SignalWebSocket>>
    for MessageSender
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SignalServerState<InMemoryDatabase, crate::managers::websocket::signal_websocket::SignalWebSocket>,
    ) -> Result<Self, Self::Rejection> {
        if parts.headers.contains_key(axum::http::header::AUTHORIZATION) {
            AuthenticatedDevice::from_request_parts(parts, state)
                .await
                .map(MessageSender::Identified)
        } else {
            UnidentifiedSenderAuth::from_request_parts(parts, state)
                .await
                .map(MessageSender::Sealed)
        }
    }
}
