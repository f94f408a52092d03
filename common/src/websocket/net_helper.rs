use crate::signalservice::{
    web_socket_message, WebSocketMessage, WebSocketRequestMessage, WebSocketResponseMessage,
};
use crate::web_api::MessageList;
use axum::http::{StatusCode, Uri};
use rand::Rng;
use std::time::{SystemTime, SystemTimeError, UNIX_EPOCH};

/// Builds an outbound (server- or client-initiated) request frame, as used
/// by `WebSocketConnection::create_message` and `send_queue_empty`.
pub fn create_request(
    id: u64,
    verb: &str,
    path: &str,
    headers: Vec<String>,
    body: Option<Vec<u8>>,
) -> WebSocketMessage {
    WebSocketMessage {
        r#type: Some(web_socket_message::Type::Request as i32),
        request: Some(WebSocketRequestMessage {
            verb: Some(verb.to_string()),
            path: Some(path.to_string()),
            body,
            id: Some(id),
            headers,
        }),
        response: None,
    }
}

pub fn create_response(
    id: u64,
    status: StatusCode,
    headers: Vec<String>,
    body: Option<Vec<u8>>,
) -> Result<WebSocketMessage, String> {
    Ok(WebSocketMessage {
        r#type: Some(web_socket_message::Type::Response as i32),
        request: None,
        response: Some(WebSocketResponseMessage {
            id: Some(id),
            status: Some(status.as_u16() as u32),
            message: Some(
                status
                    .canonical_reason()
                    .unwrap_or("")
                    .to_string(),
            ),
            headers,
            body,
        }),
    })
}

/// Monotonic-enough request id: each WebSocket connection is single-writer
/// per direction, so a random 63-bit value is collision-free in practice
/// without needing a shared atomic counter across connections.
pub fn generate_req_id() -> u64 {
    rand::thread_rng().gen_range(0..i64::MAX as u64)
}

pub fn current_millis() -> Result<u64, SystemTimeError> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis() as u64)
}

/// Pulls the nth `/`-separated path segment out of a request URI, used to
/// read `{destination}` out of `/v1/messages/{destination}` when a message
/// send arrives framed over the WebSocket rather than over HTTP.
pub struct PathExtractor {
    segments: Vec<String>,
}

impl PathExtractor {
    pub fn new(uri: &Uri) -> Result<Self, String> {
        Ok(Self {
            segments: uri
                .path()
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        })
    }

    pub fn extract<T: std::str::FromStr>(&self, index: usize) -> Result<T, String> {
        self.segments
            .get(index)
            .ok_or_else(|| format!("Path did not have segment at index {index}"))?
            .parse()
            .map_err(|_| format!("Could not parse path segment at index {index}"))
    }
}

/// Decodes the JSON body of an inbound `PUT /v1/messages/:destination`
/// frame received over the WebSocket, mirroring the HTTP handler's
/// `Json<MessageList>` extraction.
pub fn unpack_messages(body: Option<Vec<u8>>) -> Result<MessageList, String> {
    let body = body.ok_or_else(|| "Request had no body".to_string())?;
    serde_json::from_slice(&body).map_err(|err| err.to_string())
}
