pub mod key;
pub mod message_cache;
pub mod user;
pub mod websocket;
