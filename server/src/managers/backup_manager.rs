//! Backup-id/backup-key bindings and call link state. Both are anonymous-credential-gated features keyed off a
//! server-minted room id or the account's backup public key; the server
//! stores only opaque blobs and never interprets zkgroup material beyond
//! what `crypto::zk` hands back as "verified".
//!
//! Not present in the retrieved base files; grounded on
//! `storage_service_manager.rs`'s shape since backups/call links have no
//! dedicated base module.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use common::web_api::{CallLinkRestrictions, CallLinkStateResponse};
use libsignal_core::Aci;
use tokio::sync::RwLock;

use super::manager::Manager;

#[derive(Debug, Clone, Default)]
struct BackupBinding {
    backup_id_request: Box<[u8]>,
    media_backup_id_request: Box<[u8]>,
    backup_public_key: Option<Box<[u8]>>,
}

#[derive(Debug, Clone)]
struct CallLink {
    restrictions: CallLinkRestrictions,
    revoked: bool,
    name: Box<[u8]>,
    admin_passkey: Box<[u8]>,
}

#[derive(Debug, Clone, Default)]
pub struct BackupManager {
    bindings: Arc<RwLock<HashMap<Aci, BackupBinding>>>,
    call_links: Arc<RwLock<HashMap<Box<[u8]>, CallLink>>>,
}

impl Manager for BackupManager {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl BackupManager {
    pub fn connect() -> Self {
        Self::default()
    }

    /// `PUT /v1/archives/backupid`.
    pub async fn set_backup_id(
        &self,
        account: Aci,
        messages_backup_auth_credential_request: Box<[u8]>,
        media_backup_auth_credential_request: Box<[u8]>,
    ) {
        let mut bindings = self.bindings.write().await;
        let binding = bindings.entry(account).or_default();
        binding.backup_id_request = messages_backup_auth_credential_request;
        binding.media_backup_id_request = media_backup_auth_credential_request;
    }

    /// `PUT /v1/archives/keys`.
    pub async fn set_backup_key(&self, account: Aci, backup_id_public_key: Box<[u8]>) {
        let mut bindings = self.bindings.write().await;
        bindings.entry(account).or_default().backup_public_key = Some(backup_id_public_key);
    }

    pub async fn backup_public_key(&self, account: &Aci) -> Option<Box<[u8]>> {
        self.bindings
            .read()
            .await
            .get(account)
            .and_then(|binding| binding.backup_public_key.clone())
    }

    /// Creates a call link under `room_id`, minted from the presented
    /// credential (verified by the caller via `crypto::zk` before reaching
    /// here).
    pub async fn create_call_link(
        &self,
        room_id: Box<[u8]>,
        admin_passkey: Box<[u8]>,
        restrictions: CallLinkRestrictions,
    ) -> Result<CallLinkStateResponse, CallLinkStateResponse> {
        let mut links = self.call_links.write().await;
        if let Some(existing) = links.get(&room_id) {
            return Err(to_response(existing));
        }
        let link = CallLink {
            restrictions,
            revoked: false,
            name: Box::from([]),
            admin_passkey,
        };
        let response = to_response(&link);
        links.insert(room_id, link);
        Ok(response)
    }

    pub async fn get_call_link(&self, room_id: &[u8]) -> Option<CallLinkStateResponse> {
        self.call_links.read().await.get(room_id).map(to_response)
    }

    pub async fn revoke_call_link(&self, room_id: &[u8], admin_passkey: &[u8]) -> Result<(), ()> {
        let mut links = self.call_links.write().await;
        match links.get_mut(room_id) {
            Some(link) if link.admin_passkey.as_ref() == admin_passkey => {
                link.revoked = true;
                Ok(())
            }
            _ => Err(()),
        }
    }
}

fn to_response(link: &CallLink) -> CallLinkStateResponse {
    CallLinkStateResponse {
        restrictions: link.restrictions,
        revoked: link.revoked,
        name: link.name.clone(),
    }
}
