//! In-memory stand-in for a Redis-backed `MessageCache`.
//!
//! Keeps the same public API (`insert`/`remove`/`has_messages`/
//! `get_all_messages`/listener registration) so `MessagesManager` and
//! `WebSocketConnection` need no changes at their call sites.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use common::signalservice::Envelope;
use libsignal_core::ProtocolAddress;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::availability_listener::{add, notify_cached, remove, AvailabilityListener, ListenerMap};
use crate::managers::manager::Manager;

#[derive(Debug, Clone, Default)]
struct Queue {
    messages: VecDeque<(String, Envelope)>,
}

#[derive(Debug)]
pub struct MessageCache<T>
where
    T: AvailabilityListener,
{
    queues: Arc<Mutex<HashMap<ProtocolAddress, Queue>>>,
    listeners: ListenerMap<T>,
}

impl<T> Manager for MessageCache<T>
where
    T: AvailabilityListener + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T> Clone for MessageCache<T>
where
    T: AvailabilityListener,
{
    fn clone(&self) -> Self {
        Self {
            queues: self.queues.clone(),
            listeners: self.listeners.clone(),
        }
    }
}

impl<T> Default for MessageCache<T>
where
    T: AvailabilityListener,
{
    fn default() -> Self {
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
            listeners: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T> MessageCache<T>
where
    T: AvailabilityListener,
{
    pub fn connect() -> Self {
        Self::default()
    }

    pub async fn insert(
        &self,
        address: &ProtocolAddress,
        envelope: &mut Envelope,
        message_guid: &str,
    ) -> Result<u64> {
        envelope.server_guid = Some(message_guid.to_string());
        let mut queues = self.queues.lock().await;
        let queue = queues.entry(address.clone()).or_default();
        queue.messages.push_back((message_guid.to_string(), envelope.clone()));
        let message_id = queue.messages.len() as u64;
        drop(queues);

        notify_cached(self.listeners.clone(), address).await;
        Ok(message_id)
    }

    pub async fn remove(
        &self,
        address: &ProtocolAddress,
        message_guids: Vec<String>,
    ) -> Result<Vec<Envelope>> {
        let mut queues = self.queues.lock().await;
        let Some(queue) = queues.get_mut(address) else {
            return Ok(Vec::new());
        };
        let mut removed = Vec::new();
        queue.messages.retain(|(guid, envelope)| {
            if message_guids.contains(guid) {
                removed.push(envelope.clone());
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    pub async fn has_messages(&self, address: &ProtocolAddress) -> Result<bool> {
        let queues = self.queues.lock().await;
        let has_messages = queues
            .get(address)
            .map(|q| !q.messages.is_empty())
            .unwrap_or(false);
        drop(queues);
        notify_cached(self.listeners.clone(), address).await;
        Ok(has_messages)
    }

    pub async fn get_all_messages(&self, address: &ProtocolAddress) -> Result<Vec<Envelope>> {
        let queues = self.queues.lock().await;
        Ok(queues
            .get(address)
            .map(|q| q.messages.iter().map(|(_, e)| e.clone()).collect())
            .unwrap_or_default())
    }

    pub async fn add_message_availability_listener(
        &mut self,
        address: &ProtocolAddress,
        listener: Arc<Mutex<T>>,
    ) {
        add(self.listeners.clone(), address, listener).await;
    }

    pub async fn remove_message_availability_listener(&mut self, address: &ProtocolAddress) {
        remove(self.listeners.clone(), address).await
    }
}

pub fn new_message_guid() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::message_cache::MockWebSocketConnection;
    use crate::test_utils::user::new_protocol_address;

    #[tokio::test]
    async fn test_message_availability_listener_new_messages() {
        let mut message_cache: MessageCache<MockWebSocketConnection> = MessageCache::connect();
        let websocket = Arc::new(Mutex::new(MockWebSocketConnection::new()));
        let address = new_protocol_address();
        let mut envelope = Envelope::default();

        message_cache
            .add_message_availability_listener(&address, websocket.clone())
            .await;

        message_cache
            .insert(&address, &mut envelope, &new_message_guid())
            .await
            .unwrap();

        assert!(websocket.lock().await.evoked_handle_new_messages);
    }

    #[tokio::test]
    async fn test_insert_and_get_all_messages() {
        let message_cache: MessageCache<MockWebSocketConnection> = MessageCache::connect();
        let address = new_protocol_address();
        let mut envelope = Envelope::default();
        let guid = new_message_guid();

        message_cache.insert(&address, &mut envelope, &guid).await.unwrap();

        let messages = message_cache.get_all_messages(&address).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].server_guid(), guid);
    }

    #[tokio::test]
    async fn test_insert_different_ids_are_both_kept() {
        let message_cache: MessageCache<MockWebSocketConnection> = MessageCache::connect();
        let address = new_protocol_address();
        let mut envelope1 = Envelope::default();
        let mut envelope2 = Envelope::default();

        message_cache
            .insert(&address, &mut envelope1, &new_message_guid())
            .await
            .unwrap();
        message_cache
            .insert(&address, &mut envelope2, &new_message_guid())
            .await
            .unwrap();

        let messages = message_cache.get_all_messages(&address).await.unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn test_remove() {
        let message_cache: MessageCache<MockWebSocketConnection> = MessageCache::connect();
        let address = new_protocol_address();
        let mut envelope = Envelope::default();
        let guid = new_message_guid();

        message_cache.insert(&address, &mut envelope, &guid).await.unwrap();
        let removed = message_cache.remove(&address, vec![guid]).await.unwrap();

        assert_eq!(removed.len(), 1);
        assert!(message_cache.get_all_messages(&address).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_has_messages() {
        let message_cache: MessageCache<MockWebSocketConnection> = MessageCache::connect();
        let address = new_protocol_address();
        let mut envelope = Envelope::default();

        assert!(!message_cache.has_messages(&address).await.unwrap());
        message_cache
            .insert(&address, &mut envelope, &new_message_guid())
            .await
            .unwrap();
        assert!(message_cache.has_messages(&address).await.unwrap());
    }
}
