//! Owns the live `ProtocolAddress -> WebSocketConnection` map and the
//! per-connection read loop.
//!
//! Not present in the retrieved base files; rebuilt from its call sites
//! in `server/server.rs`'s websocket upgrade handler and
//! `websocket/connection.rs`'s test module.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use axum::extract::ws::Message;
use common::websocket::wsstream::WSStream;
use futures_util::stream::SplitStream;
use futures_util::StreamExt;
use libsignal_core::ProtocolAddress;
use tokio::sync::Mutex;

use crate::storage::database::SignalDatabase;

use super::connection::{ClientConnection, WebSocketConnection};
use super::manager::Manager;

#[derive(Debug)]
pub struct WebSocketManager<U, T>
where
    U: WSStream<Message, axum::Error> + Debug + Send + 'static,
    T: SignalDatabase,
{
    sockets: Arc<Mutex<HashMap<ProtocolAddress, ClientConnection<U, T>>>>,
}

impl<U, T> Clone for WebSocketManager<U, T>
where
    U: WSStream<Message, axum::Error> + Debug + Send + 'static,
    T: SignalDatabase,
{
    fn clone(&self) -> Self {
        Self {
            sockets: self.sockets.clone(),
        }
    }
}

impl<U, T> Manager for WebSocketManager<U, T>
where
    U: WSStream<Message, axum::Error> + Debug + Send + 'static,
    T: SignalDatabase,
{
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<U, T> Default for WebSocketManager<U, T>
where
    U: WSStream<Message, axum::Error> + Debug + Send + 'static,
    T: SignalDatabase,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<U, T> WebSocketManager<U, T>
where
    U: WSStream<Message, axum::Error> + Debug + Send + 'static,
    T: SignalDatabase,
{
    pub fn new() -> Self {
        Self {
            sockets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn get(&self, address: &ProtocolAddress) -> Option<ClientConnection<U, T>> {
        self.sockets.lock().await.get(address).cloned()
    }

    /// Registers `connection` under its own protocol address and spawns the
    /// task that drains `stream` into `on_receive`/close for the lifetime of
    /// the socket.
    pub async fn listen(&mut self, connection: WebSocketConnection<U, T>, mut stream: SplitStream<U>) {
        let address = connection.protocol_address();
        let connection = Arc::new(Mutex::new(connection));
        self.sockets.lock().await.insert(address.clone(), connection.clone());

        let sockets = self.sockets.clone();
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let msg = match frame {
                    Ok(Message::Binary(bytes)) => {
                        match <common::signalservice::WebSocketMessage as prost::Message>::decode(
                            bytes.as_slice(),
                        ) {
                            Ok(msg) => msg,
                            Err(_) => continue,
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                if connection.lock().await.on_receive(msg).await.is_err() {
                    break;
                }
            }
            connection.lock().await.close().await;
            sockets.lock().await.remove(&address);
        });
    }
}
