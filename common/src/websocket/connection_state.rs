use futures_util::stream::SplitSink;

/// The send half of a WebSocket connection, or a tombstone once closed.
/// Kept as its own enum (rather than an `Option`) so call sites read as
/// "active or closed" rather than "some or none".
#[derive(Debug)]
pub enum ConnectionState<W, Msg>
where
    W: futures_util::Sink<Msg> + Send,
{
    Active(SplitSink<W, Msg>),
    Closed,
}

impl<W, Msg> ConnectionState<W, Msg>
where
    W: futures_util::Sink<Msg> + Send,
{
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Active(_))
    }
}
