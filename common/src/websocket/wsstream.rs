use futures_util::{Sink, Stream};

/// Abstracts over a duplex WebSocket connection so the multiplexer in
/// `server::managers::websocket` can run against a real Axum socket in
/// production and an in-memory mock in tests.
#[async_trait::async_trait]
pub trait WSStream<Msg, Err>: Stream<Item = Result<Msg, Err>> + Sink<Msg, Error = Err> + Send
where
    Msg: Send,
    Err: Send,
{
    async fn recv(&mut self) -> Option<Result<Msg, Err>>;
    async fn send(&mut self, msg: Msg) -> Result<(), Err>;
    async fn close(self) -> Result<(), Err>;
}
