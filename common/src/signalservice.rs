//! Hand-authored `prost::Message` types for the subset of the `signalservice`
//! wire protocol this server needs. Proto schema compilation via a `build.rs`
//! is out of scope; these mirror what `prost-build` would have generated from
//! `Envelope`, `WebSocketMessage` and friends in `SignalService.proto`.

use prost::Message;

#[derive(Clone, PartialEq, Message)]
pub struct Envelope {
    #[prost(enumeration = "envelope::Type", optional, tag = "1")]
    pub r#type: Option<i32>,
    #[prost(string, optional, tag = "2")]
    pub source_service_id: Option<String>,
    #[prost(uint32, optional, tag = "7")]
    pub source_device: Option<u32>,
    #[prost(string, optional, tag = "13")]
    pub destination_service_id: Option<String>,
    #[prost(uint32, optional, tag = "14")]
    pub destination_device_id: Option<u32>,
    #[prost(uint32, optional, tag = "15")]
    pub destination_registration_id: Option<u32>,
    #[prost(uint64, optional, tag = "5")]
    pub timestamp: Option<u64>,
    #[prost(bytes = "vec", optional, tag = "8")]
    pub content: Option<Vec<u8>>,
    #[prost(string, optional, tag = "9")]
    pub server_guid: Option<String>,
    #[prost(uint64, optional, tag = "10")]
    pub server_timestamp: Option<u64>,
    #[prost(bool, optional, tag = "16")]
    pub ephemeral: Option<bool>,
    #[prost(bool, optional, tag = "17")]
    pub urgent: Option<bool>,
    #[prost(bool, optional, tag = "18")]
    pub story: Option<bool>,
}

pub mod envelope {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
    #[repr(i32)]
    pub enum Type {
        Unknown = 0,
        Ciphertext = 1,
        KeyExchange = 2,
        PrekeyBundle = 3,
        Receipt = 5,
        UnidentifiedSender = 6,
        SenderkeyMessage = 7,
        PlaintextContent = 8,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum WebSocketMessageType {
    Unknown = 0,
    Request = 1,
    Response = 2,
}

pub mod web_socket_message {
    pub use super::WebSocketMessageType as Type;
}

#[derive(Clone, PartialEq, Message)]
pub struct WebSocketRequestMessage {
    #[prost(string, optional, tag = "1")]
    pub verb: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub path: Option<String>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub body: Option<Vec<u8>>,
    #[prost(uint64, optional, tag = "4")]
    pub id: Option<u64>,
    #[prost(string, repeated, tag = "5")]
    pub headers: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct WebSocketResponseMessage {
    #[prost(uint64, optional, tag = "1")]
    pub id: Option<u64>,
    #[prost(uint32, optional, tag = "2")]
    pub status: Option<u32>,
    #[prost(string, optional, tag = "3")]
    pub message: Option<String>,
    #[prost(string, repeated, tag = "4")]
    pub headers: Vec<String>,
    #[prost(bytes = "vec", optional, tag = "5")]
    pub body: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct WebSocketMessage {
    #[prost(enumeration = "WebSocketMessageType", optional, tag = "1")]
    pub r#type: Option<i32>,
    #[prost(message, optional, tag = "2")]
    pub request: Option<WebSocketRequestMessage>,
    #[prost(message, optional, tag = "3")]
    pub response: Option<WebSocketResponseMessage>,
}

impl Envelope {
    pub fn server_guid(&self) -> &str {
        self.server_guid.as_deref().unwrap_or("")
    }
}

impl WebSocketMessage {
    pub fn r#type(&self) -> WebSocketMessageType {
        match self.r#type {
            Some(1) => WebSocketMessageType::Request,
            Some(2) => WebSocketMessageType::Response,
            _ => WebSocketMessageType::Unknown,
        }
    }
}

impl WebSocketRequestMessage {
    pub fn path(&self) -> &str {
        self.path.as_deref().unwrap_or("")
    }
}

/// Member access levels and roles for [`Group`]: the access-control triple
/// and member roles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum AccessControlLevel {
    Unknown = 0,
    Any = 1,
    Member = 2,
    Administrator = 3,
    Unsatisfiable = 4,
}

#[derive(Clone, PartialEq, Message)]
pub struct AccessControl {
    #[prost(enumeration = "AccessControlLevel", tag = "1")]
    pub attributes: i32,
    #[prost(enumeration = "AccessControlLevel", tag = "2")]
    pub members: i32,
    #[prost(enumeration = "AccessControlLevel", tag = "3")]
    pub add_from_invite_link: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum MemberRole {
    Unknown = 0,
    Default = 1,
    Administrator = 2,
}

#[derive(Clone, PartialEq, Message)]
pub struct Member {
    /// Opaque zkgroup-encrypted user id; the server never learns the ACI.
    #[prost(bytes = "vec", tag = "1")]
    pub user_id: Vec<u8>,
    #[prost(enumeration = "MemberRole", tag = "2")]
    pub role: i32,
    #[prost(bytes = "vec", tag = "3")]
    pub profile_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub presentation: Vec<u8>,
    #[prost(uint32, tag = "5")]
    pub joined_at_version: u32,
}

/// A signed diff against a prior `Group` version, as submitted to
/// `PATCH /v1/groups` and returned from `GET /v1/groups/logs/:from`.
#[derive(Clone, PartialEq, Message)]
pub struct GroupChange {
    /// The actions protobuf, opaque to the server beyond the version field.
    #[prost(bytes = "vec", tag = "1")]
    pub actions: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub server_signature: Vec<u8>,
    #[prost(uint32, tag = "3")]
    pub change_epoch: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct GroupChanges {
    #[prost(message, repeated, tag = "1")]
    pub group_changes: Vec<GroupChangeState>,
}

#[derive(Clone, PartialEq, Message)]
pub struct GroupChangeState {
    #[prost(message, optional, tag = "1")]
    pub group_change: Option<GroupChange>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub group_state: Option<Vec<u8>>,
}

/// Storage-service records.
#[derive(Clone, PartialEq, Message)]
pub struct StorageManifest {
    #[prost(uint64, tag = "1")]
    pub version: u64,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct StorageItem {
    #[prost(bytes = "vec", tag = "1")]
    pub key: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ReadOperation {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub read_key: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct WriteOperation {
    #[prost(message, optional, tag = "1")]
    pub manifest: Option<StorageManifest>,
    #[prost(message, repeated, tag = "2")]
    pub insert_item: Vec<StorageItem>,
    #[prost(bytes = "vec", repeated, tag = "3")]
    pub delete_key: Vec<Vec<u8>>,
    #[prost(bool, optional, tag = "4")]
    pub clear_all: Option<bool>,
}

/// Provisioning-message payload, encrypted per §4.1
/// before being returned to the linking client.
#[derive(Clone, PartialEq, Message)]
pub struct ProvisionMessage {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub aci_identity_key_private: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub pni_identity_key_private: Option<Vec<u8>>,
    #[prost(string, optional, tag = "3")]
    pub number: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub aci: Option<String>,
    #[prost(string, optional, tag = "11")]
    pub pni: Option<String>,
    #[prost(string, optional, tag = "5")]
    pub provisioning_code: Option<String>,
    #[prost(bytes = "vec", optional, tag = "6")]
    pub profile_key: Option<Vec<u8>>,
    #[prost(bool, optional, tag = "8")]
    pub read_receipts: Option<bool>,
    #[prost(string, optional, tag = "9")]
    pub user_agent: Option<String>,
    #[prost(uint32, optional, tag = "10")]
    pub provisioning_version: Option<u32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProvisionEnvelope {
    #[prost(bytes = "vec", tag = "1")]
    pub public_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub body: Vec<u8>,
}

/// Signing-key certificate minted by the trust root, embedded in every [`SenderCertificate`].
#[derive(Clone, PartialEq, Message)]
pub struct ServerCertificate {
    #[prost(bytes = "vec", tag = "1")]
    pub certificate: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,
}

pub mod server_certificate {
    use prost::Message;

    #[derive(Clone, PartialEq, Message)]
    pub struct Certificate {
        #[prost(uint32, optional, tag = "1")]
        pub id: Option<u32>,
        #[prost(bytes = "vec", optional, tag = "2")]
        pub key: Option<Vec<u8>>,
    }
}

/// Binds an account's identity to a device for sealed-sender unwrap (spec
/// §4.1 `generate_sender_certificate`).
#[derive(Clone, PartialEq, Message)]
pub struct SenderCertificate {
    #[prost(bytes = "vec", tag = "1")]
    pub certificate: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,
}

pub mod sender_certificate {
    use prost::Message;

    #[derive(Clone, PartialEq, Message)]
    pub struct Certificate {
        #[prost(string, optional, tag = "1")]
        pub sender_e164: Option<String>,
        #[prost(string, optional, tag = "6")]
        pub sender_uuid: Option<String>,
        #[prost(uint32, optional, tag = "7")]
        pub sender_device: Option<u32>,
        #[prost(uint64, optional, tag = "4")]
        pub expires: Option<u64>,
        #[prost(bytes = "vec", optional, tag = "5")]
        pub identity_key: Option<Vec<u8>>,
        #[prost(message, optional, tag = "3")]
        pub signer: Option<super::ServerCertificate>,
    }
}
