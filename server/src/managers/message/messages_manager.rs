//! Queues envelopes for delivery and fans out availability notifications.
//!
//! Adapted from the base `MessagesManager`: since there is no persistence
//! tier, the cache/db "may have persisted messages" split collapses to a
//! single in-memory queue.

use super::message_cache::MessageCache;
use crate::availability_listener::AvailabilityListener;
use crate::managers::manager::Manager;
use anyhow::Result;
use common::signalservice::Envelope;
use libsignal_core::ProtocolAddress;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug)]
pub struct MessagesManager<U>
where
    U: AvailabilityListener + 'static,
{
    message_cache: MessageCache<U>,
}

impl<U> Clone for MessagesManager<U>
where
    U: AvailabilityListener,
{
    fn clone(&self) -> Self {
        Self {
            message_cache: self.message_cache.clone(),
        }
    }
}

impl<U> Default for MessagesManager<U>
where
    U: AvailabilityListener,
{
    fn default() -> Self {
        Self {
            message_cache: MessageCache::connect(),
        }
    }
}

impl<U> Manager for MessagesManager<U>
where
    U: AvailabilityListener + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<U> MessagesManager<U>
where
    U: AvailabilityListener,
{
    pub fn new(message_cache: MessageCache<U>) -> Self {
        Self { message_cache }
    }

    pub async fn insert(&self, address: &ProtocolAddress, envelope: &mut Envelope) -> Result<u64> {
        self.message_cache
            .insert(address, envelope, &Uuid::new_v4().to_string())
            .await
    }

    pub async fn may_have_messages(&self, address: &ProtocolAddress) -> Result<bool> {
        self.message_cache.has_messages(address).await
    }

    pub async fn get_messages_for_device(&self, address: &ProtocolAddress) -> Result<Vec<Envelope>> {
        self.message_cache.get_all_messages(address).await
    }

    pub async fn delete(
        &self,
        address: &ProtocolAddress,
        message_guids: Vec<String>,
    ) -> Result<Vec<Envelope>> {
        self.message_cache.remove(address, message_guids).await
    }

    pub async fn add_message_availability_listener(
        &mut self,
        address: &ProtocolAddress,
        listener: Arc<Mutex<U>>,
    ) {
        self.message_cache
            .add_message_availability_listener(address, listener)
            .await;
    }

    pub async fn remove_message_availability_listener(&mut self, address: &ProtocolAddress) {
        self.message_cache
            .remove_message_availability_listener(address)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::message_cache::MockWebSocketConnection;
    use crate::test_utils::user::new_protocol_address;

    fn init_manager() -> MessagesManager<MockWebSocketConnection> {
        MessagesManager::default()
    }

    #[tokio::test]
    async fn test_may_have_messages() {
        let msg_manager = init_manager();
        let address = new_protocol_address();
        let mut envelope = Envelope::default();

        assert!(!msg_manager.may_have_messages(&address).await.unwrap());
        msg_manager.insert(&address, &mut envelope).await.unwrap();
        assert!(msg_manager.may_have_messages(&address).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_messages_for_device() {
        let msg_manager = init_manager();
        let address = new_protocol_address();
        let mut envelope1 = Envelope::default();
        let mut envelope2 = Envelope::default();

        msg_manager.insert(&address, &mut envelope1).await.unwrap();
        msg_manager.insert(&address, &mut envelope2).await.unwrap();

        let messages = msg_manager.get_messages_for_device(&address).await.unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_messages() {
        let msg_manager = init_manager();
        let address = new_protocol_address();
        let mut envelope = Envelope::default();
        msg_manager.insert(&address, &mut envelope).await.unwrap();
        let guid = envelope.server_guid().to_string();

        let deleted = msg_manager.delete(&address, vec![guid]).await.unwrap();
        assert_eq!(deleted.len(), 1);
        assert!(msg_manager
            .get_messages_for_device(&address)
            .await
            .unwrap()
            .is_empty());
    }
}
