pub mod account_manager;
pub mod attachment_manager;
pub mod backup_manager;
pub mod client_presence_manager;
pub mod group_manager;
pub mod key_manager;
pub mod manager;
pub mod message;
pub mod provisioning_manager;
pub mod state;
pub mod storage_service_manager;
pub mod username_manager;
pub mod websocket;
