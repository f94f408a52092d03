//! `AvailabilityListener` + the listener registry that notifies sockets
//! when new messages land in a device's queue.
//!
//! The retrieval pack only captured the bare trait (`send_cached` /
//! `send_persisted`); the registry functions (`add`, `remove`,
//! `notify_cached`, `notify_persisted`, `ListenerMap`) are rebuilt here from
//! their call sites in `managers/message/message_cache.rs`.

use axum::async_trait;
use libsignal_core::ProtocolAddress;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[async_trait]
pub trait AvailabilityListener: Send + 'static {
    /// Notifies the listener that a message was just cached for its device.
    async fn send_cached(&mut self) -> bool;
    /// Notifies the listener that queued messages are being redelivered,
    /// e.g. right after a connection re-establishes presence.
    async fn send_persisted(&mut self) -> bool;
}

pub type ListenerMap<T> = Arc<Mutex<HashMap<ProtocolAddress, Arc<Mutex<T>>>>>;

pub async fn add<T: AvailabilityListener>(
    listeners: ListenerMap<T>,
    address: &ProtocolAddress,
    listener: Arc<Mutex<T>>,
) {
    listeners.lock().await.insert(address.clone(), listener);
}

pub async fn remove<T: AvailabilityListener>(listeners: ListenerMap<T>, address: &ProtocolAddress) {
    listeners.lock().await.remove(address);
}

pub async fn notify_cached<T: AvailabilityListener>(listeners: ListenerMap<T>, address: &ProtocolAddress) {
    let listener = listeners.lock().await.get(address).cloned();
    if let Some(listener) = listener {
        listener.lock().await.send_cached().await;
    }
}

pub async fn notify_persisted<T: AvailabilityListener>(
    listeners: ListenerMap<T>,
    address: &ProtocolAddress,
) {
    let listener = listeners.lock().await.get(address).cloned();
    if let Some(listener) = listener {
        listener.lock().await.send_persisted().await;
    }
}
