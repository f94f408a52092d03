//! In-memory attachment CDN: issues opaque
//! 32-hex upload keys and stores/serves the raw bytes uploaded against them.
//!
//! Not present in the retrieved base files; grounded on
//! `client_presence_manager.rs`'s shape since attachments have no dedicated
//! base module.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use common::web_api::AttachmentUploadForm;
use rand::RngCore;
use tokio::sync::RwLock;

use super::manager::Manager;

#[derive(Debug, Clone, Default)]
pub struct AttachmentManager {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl Manager for AttachmentManager {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl AttachmentManager {
    pub fn connect() -> Self {
        Self::default()
    }

    /// `POST /v3/attachments/form/upload`: mints a fresh opaque key and the
    /// URL the client should `PUT` bytes to.
    pub async fn create_upload_form(&self, base_url: &str) -> AttachmentUploadForm {
        let mut raw = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut raw);
        let cdn_key = hex::encode(raw);
        self.blobs.write().await.insert(cdn_key.clone(), Vec::new());
        AttachmentUploadForm {
            upload_url: format!("{base_url}/attachments/{cdn_key}"),
            cdn_key,
        }
    }

    pub async fn store(&self, cdn_key: &str, bytes: Vec<u8>) -> bool {
        let mut blobs = self.blobs.write().await;
        match blobs.get_mut(cdn_key) {
            Some(slot) => {
                *slot = bytes;
                true
            }
            None => false,
        }
    }

    pub async fn fetch(&self, cdn_key: &str) -> Option<Vec<u8>> {
        self.blobs.read().await.get(cdn_key).cloned()
    }
}
