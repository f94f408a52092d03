//! In-memory stand-ins for `SignalDatabase`/`WSStream` used by manager and
//! websocket unit tests, so those tests never need a real socket or store.

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::extract::ws::Message;
use axum::Error;
use futures_util::{Sink, Stream};
use tokio::sync::mpsc::{Receiver, Sender};

use crate::storage::memory::InMemoryDatabase;

/// `MockDB` is just a named alias over the real in-memory store: there is
/// only one `SignalDatabase` impl now, so "mock" only means "fresh and
/// disposable per test".
pub type MockDB = InMemoryDatabase;

/// A duplex in-memory socket backed by channels: the test drives `recv()`
/// by feeding the returned `Sender`, and inspects what the code under test
/// wrote by draining the returned `Receiver`.
#[derive(Debug)]
pub struct MockSocket {
    inbound: Receiver<Result<Message, Error>>,
    outbound: Sender<Message>,
}

impl MockSocket {
    pub fn new() -> (Self, Sender<Result<Message, Error>>, Receiver<Message>) {
        let (in_tx, in_rx) = tokio::sync::mpsc::channel(64);
        let (out_tx, out_rx) = tokio::sync::mpsc::channel(64);
        (
            Self {
                inbound: in_rx,
                outbound: out_tx,
            },
            in_tx,
            out_rx,
        )
    }
}

impl Stream for MockSocket {
    type Item = Result<Message, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inbound.poll_recv(cx)
    }
}

impl Sink<Message> for MockSocket {
    type Error = Error;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
        self.outbound
            .try_send(item)
            .map_err(|err| Error::new(err.to_string()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

#[async_trait::async_trait]
impl common::websocket::wsstream::WSStream<Message, Error> for MockSocket {
    async fn recv(&mut self) -> Option<Result<Message, Error>> {
        self.inbound.recv().await
    }

    async fn send(&mut self, msg: Message) -> Result<(), Error> {
        self.outbound
            .send(msg)
            .await
            .map_err(|err| Error::new(err.to_string()))
    }

    async fn close(self) -> Result<(), Error> {
        Ok(())
    }
}
