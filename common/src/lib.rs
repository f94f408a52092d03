pub mod signalservice;
pub mod web_api;
pub mod websocket;
