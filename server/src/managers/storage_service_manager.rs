//! Per-account key/value store for synced client configuration. The server never interprets `StorageItem` contents,
//! only orders manifest versions and keeps the matching blob set.
//!
//! Not present in the retrieved base files; grounded on
//! `client_presence_manager.rs`'s shape (an `Arc<Mutex<HashMap<..>>>` behind
//! a manager struct) since storage service has no dedicated base module.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use common::web_api::{ReadOperation, StorageItem, StorageItems, StorageManifest, WriteOperation};
use libsignal_core::Aci;
use tokio::sync::{Notify, RwLock};

use super::manager::Manager;

#[derive(Debug)]
struct AccountStorage {
    manifest: Option<StorageManifest>,
    items: HashMap<Box<[u8]>, Box<[u8]>>,
    notify: Arc<Notify>,
}

impl Default for AccountStorage {
    fn default() -> Self {
        Self {
            manifest: None,
            items: HashMap::new(),
            notify: Arc::new(Notify::new()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StorageServiceManager {
    accounts: Arc<RwLock<HashMap<Aci, AccountStorage>>>,
}

impl Manager for StorageServiceManager {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl StorageServiceManager {
    pub fn connect() -> Self {
        Self::default()
    }

    pub async fn get_manifest(&self, account: &Aci) -> Option<StorageManifest> {
        self.accounts
            .read()
            .await
            .get(account)
            .and_then(|storage| storage.manifest.clone())
    }

    /// Applies `operation` only if its manifest version strictly advances
    /// the stored one (or none is stored yet); returns the conflicting
    /// manifest on failure so the caller can surface a 409.
    pub async fn apply_write(
        &self,
        account: &Aci,
        operation: WriteOperation,
    ) -> Result<(), StorageManifest> {
        let mut accounts = self.accounts.write().await;
        let storage = accounts.entry(*account).or_default();

        if let Some(current) = &storage.manifest {
            if operation.manifest.version <= current.version {
                return Err(current.clone());
            }
        }

        if operation.clear_all {
            storage.items.clear();
        }
        for key in operation.delete_key {
            storage.items.remove(&key);
        }
        for item in operation.insert_item {
            storage.items.insert(item.key, item.value);
        }
        storage.manifest = Some(operation.manifest);
        storage.notify.notify_waiters();
        Ok(())
    }

    /// Non-blocking conditional fetch for `GET /v1/storage/manifest/version/{v}`:
    /// returns the current manifest only if its version is strictly newer
    /// than `v`, `None` otherwise (including when no manifest exists yet).
    pub async fn get_manifest_if_newer(&self, account: &Aci, after_version: u64) -> Option<StorageManifest> {
        self.accounts
            .read()
            .await
            .get(account)
            .and_then(|storage| storage.manifest.clone())
            .filter(|manifest| manifest.version > after_version)
    }

    /// Blocks until a manifest newer than `after_version` is installed for
    /// `account`, used by the test
    /// façade's `wait_for_storage_manifest`.
    pub async fn wait_for_manifest_after(&self, account: &Aci, after_version: u64) -> StorageManifest {
        loop {
            let notify = {
                let mut accounts = self.accounts.write().await;
                let storage = accounts.entry(*account).or_default();
                if let Some(manifest) = &storage.manifest {
                    if manifest.version > after_version {
                        return manifest.clone();
                    }
                }
                storage.notify.clone()
            };
            notify.notified().await;
        }
    }

    pub async fn read_items(&self, account: &Aci, operation: ReadOperation) -> StorageItems {
        let accounts = self.accounts.read().await;
        let items = accounts
            .get(account)
            .map(|storage| {
                operation
                    .read_key
                    .into_iter()
                    .filter_map(|key| {
                        storage.items.get(&key).map(|value| StorageItem {
                            key: key.clone(),
                            value: value.clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        StorageItems { items }
    }
}
