//! Tracks which devices currently have a live WebSocket attached to this
//! process.
//!
//! Not present in the retrieved base files; rebuilt from its call sites
//! in `server/server.rs` (`is_locally_present`, `set_present`) and
//! `managers/websocket/connection.rs` (`disconnect_presence_in_test`).

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use libsignal_core::ProtocolAddress;
use tokio::sync::Mutex;

use super::manager::Manager;

#[async_trait::async_trait]
pub trait DisplacedPresenceListener: Send + 'static {
    /// Called on the connection being displaced. `connected_elsewhere` is
    /// true when a new connection just took its place; false when it is
    /// simply being evicted (e.g. test teardown).
    async fn handle_displacement(&mut self, connected_elsewhere: bool);
}

#[derive(Debug)]
pub struct ClientPresenceManager<T>
where
    T: DisplacedPresenceListener,
{
    present: Arc<std::sync::Mutex<HashMap<ProtocolAddress, Arc<Mutex<T>>>>>,
}

impl<T> Clone for ClientPresenceManager<T>
where
    T: DisplacedPresenceListener,
{
    fn clone(&self) -> Self {
        Self {
            present: self.present.clone(),
        }
    }
}

impl<T> Default for ClientPresenceManager<T>
where
    T: DisplacedPresenceListener,
{
    fn default() -> Self {
        Self {
            present: Arc::new(std::sync::Mutex::new(HashMap::new())),
        }
    }
}

impl<T> Manager for ClientPresenceManager<T>
where
    T: DisplacedPresenceListener + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T> ClientPresenceManager<T>
where
    T: DisplacedPresenceListener,
{
    pub fn connect() -> Self {
        Self::default()
    }

    pub fn is_locally_present(&self, address: &ProtocolAddress) -> bool {
        self.present.lock().unwrap().contains_key(address)
    }

    /// Marks `address` present, displacing (and disconnecting) whatever
    /// connection was previously present for it.
    pub async fn set_present(
        &self,
        address: &ProtocolAddress,
        connection: Arc<Mutex<T>>,
    ) -> Result<()> {
        let previous = self
            .present
            .lock()
            .unwrap()
            .insert(address.clone(), connection);
        if let Some(previous) = previous {
            previous.lock().await.handle_displacement(true).await;
        }
        Ok(())
    }

    pub async fn disconnect_presence(&self, address: &ProtocolAddress) -> Result<()> {
        let previous = self.present.lock().unwrap().remove(address);
        if let Some(previous) = previous {
            previous.lock().await.handle_displacement(false).await;
        }
        Ok(())
    }

    #[cfg(test)]
    pub async fn disconnect_presence_in_test(&self, address: &ProtocolAddress) -> Result<()> {
        self.disconnect_presence(address).await
    }
}
