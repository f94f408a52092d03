use super::{
    account_manager::AccountManager,
    attachment_manager::AttachmentManager,
    backup_manager::BackupManager,
    client_presence_manager::ClientPresenceManager,
    group_manager::GroupManager,
    key_manager::KeyManager,
    manager::Manager,
    message::{message_cache::MessageCache, messages_manager::MessagesManager},
    provisioning_manager::ProvisioningManager,
    storage_service_manager::StorageServiceManager,
    username_manager::UsernameManager,
    websocket::{connection::WebSocketConnection, websocket_manager::WebSocketManager},
};
use crate::config::ServerConfig;
use crate::storage::{database::SignalDatabase, memory::InMemoryDatabase};
use axum::extract::ws::Message;
use common::websocket::wsstream::WSStream;
use std::fmt::Debug;

#[derive(Debug)]
pub struct SignalServerState<T, U>
where
    T: SignalDatabase,
    U: WSStream<Message, axum::Error> + Debug,
{
    pub db: T,
    pub config: ServerConfig,
    pub websocket_manager: WebSocketManager<U, T>,
    pub account_manager: AccountManager<T>,
    pub key_manager: KeyManager<T>,
    pub message_manager: MessagesManager<WebSocketConnection<U, T>>,
    pub client_presence_manager: ClientPresenceManager<WebSocketConnection<U, T>>,
    pub message_cache: MessageCache<WebSocketConnection<U, T>>,
    pub group_manager: GroupManager,
    pub storage_service_manager: StorageServiceManager,
    pub username_manager: UsernameManager<T>,
    pub attachment_manager: AttachmentManager,
    pub backup_manager: BackupManager,
    pub provisioning_manager: ProvisioningManager,
}

impl<T, U> Manager for SignalServerState<T, U>
where
    T: SignalDatabase,
    U: WSStream<Message, axum::Error> + Debug,
{
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl<T, U> Clone for SignalServerState<T, U>
where
    T: SignalDatabase,
    U: WSStream<Message, axum::Error> + Debug,
{
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            config: self.config.clone(),
            websocket_manager: self.websocket_manager.clone(),
            account_manager: self.account_manager.clone(),
            key_manager: self.key_manager.clone(),
            message_manager: self.message_manager.clone(),
            client_presence_manager: self.client_presence_manager.clone(),
            message_cache: self.message_cache.clone(),
            group_manager: self.group_manager.clone(),
            storage_service_manager: self.storage_service_manager.clone(),
            username_manager: self.username_manager.clone(),
            attachment_manager: self.attachment_manager.clone(),
            backup_manager: self.backup_manager.clone(),
            provisioning_manager: self.provisioning_manager.clone(),
        }
    }
}

impl<U> SignalServerState<InMemoryDatabase, U>
where
    U: WSStream<Message, axum::Error> + Debug,
{
    /// Builds a fresh, empty server state. There is no connection string to
    /// thread through, unlike a Postgres-backed `connect`.
    pub fn new(config: ServerConfig) -> Self {
        let db = InMemoryDatabase::default();
        let cache = MessageCache::connect();
        let queue_timeout = std::time::Duration::from_secs(config.queue_timeout_seconds);
        Self {
            db: db.clone(),
            config,
            websocket_manager: WebSocketManager::new(),
            account_manager: AccountManager::new(db.clone()),
            key_manager: KeyManager::new(db.clone()),
            message_manager: MessagesManager::new(cache.clone()),
            client_presence_manager: ClientPresenceManager::connect(),
            message_cache: cache,
            group_manager: GroupManager::connect(),
            storage_service_manager: StorageServiceManager::connect(),
            username_manager: UsernameManager::new(db),
            attachment_manager: AttachmentManager::connect(),
            backup_manager: BackupManager::connect(),
            provisioning_manager: ProvisioningManager::with_timeout(queue_timeout),
        }
    }
}

impl<U> Default for SignalServerState<InMemoryDatabase, U>
where
    U: WSStream<Message, axum::Error> + Debug,
{
    fn default() -> Self {
        Self::new(ServerConfig::for_test())
    }
}
