//! `PromiseQueue<T>`: a bounded rendezvous queue used by the
//! provisioning coordinator to hand device-linking state between the HTTP
//! poller and the WebSocket that pushed it, without the two sides knowing
//! about each other directly.
//!
//! Not present in the retrieved base files; modeled on the existing use of
//! `tokio::sync::{mpsc, oneshot}` elsewhere (e.g. `test_utils/websocket.rs`
//! mock channels) rather than a bespoke synchronization primitive.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};

/// Why a `push_and_wait` call never got its reply.
#[derive(Debug)]
pub enum QueueError {
    /// The `shift` side was dropped before replying.
    Closed,
    /// No reply arrived within the allotted duration.
    Timeout,
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::Closed => write!(f, "reply channel closed before a response arrived"),
            QueueError::Timeout => write!(f, "timed out waiting for a reply"),
        }
    }
}

impl std::error::Error for QueueError {}

/// An unbounded multi-producer, single-consumer queue with an optional
/// "push and wait for a reply" mode, used for provisioning rendezvous
/// (`provisionQueue`, `provisionResultQueueByCode`, `manifestQueueByUuid`).
pub struct PromiseQueue<T> {
    sender: mpsc::UnboundedSender<T>,
    receiver: mpsc::UnboundedReceiver<T>,
}

impl<T> Default for PromiseQueue<T> {
    fn default() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self { sender, receiver }
    }
}

impl<T> PromiseQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, value: T) -> Result<(), T> {
        self.sender.send(value).map_err(|err| err.0)
    }

    pub async fn shift(&mut self) -> Option<T> {
        self.receiver.recv().await
    }
}

/// A one-shot reply channel, for `push_and_wait`-style flows where the
/// pushed item itself carries the means to reply. The receiver side is
/// behind an async mutex so `push_and_wait` and `shift` can both take `&self`
/// and be called concurrently from different tasks sharing one `Arc`.
pub struct ReplyQueue<Req, Resp> {
    sender: mpsc::UnboundedSender<(Req, oneshot::Sender<Resp>)>,
    receiver: Mutex<mpsc::UnboundedReceiver<(Req, oneshot::Sender<Resp>)>>,
}

impl<Req, Resp> Default for ReplyQueue<Req, Resp> {
    fn default() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }
}

impl<Req, Resp> ReplyQueue<Req, Resp> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a request and waits for whoever calls `shift` to reply, giving
    /// up with `QueueError::Timeout` if nobody does within `timeout`.
    pub async fn push_and_wait(&self, request: Req, timeout: Duration) -> Result<Resp, QueueError> {
        let (tx, rx) = oneshot::channel();
        let _ = self.sender.send((request, tx));
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(QueueError::Closed),
            Err(_) => Err(QueueError::Timeout),
        }
    }

    pub async fn shift(&self) -> Option<(Req, oneshot::Sender<Resp>)> {
        self.receiver.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_then_shift_returns_in_order() {
        let mut queue = PromiseQueue::new();
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        assert_eq!(queue.shift().await, Some(1));
        assert_eq!(queue.shift().await, Some(2));
    }

    #[tokio::test]
    async fn push_and_wait_rendezvous_with_shift() {
        use std::sync::Arc;

        let queue: Arc<ReplyQueue<&'static str, u32>> = Arc::new(ReplyQueue::new());
        let waiter = tokio::spawn({
            let queue = queue.clone();
            async move { queue.push_and_wait("code-123", Duration::from_secs(5)).await }
        });

        let (req, reply) = queue.shift().await.unwrap();
        assert_eq!(req, "code-123");
        reply.send(42).unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), 42);
    }

    #[tokio::test]
    async fn push_and_wait_times_out_when_nobody_shifts() {
        let queue: ReplyQueue<&'static str, u32> = ReplyQueue::new();
        let result = queue.push_and_wait("code-456", Duration::from_millis(10)).await;
        assert!(matches!(result, Err(QueueError::Timeout)));
    }
}
