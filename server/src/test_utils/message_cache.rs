use crate::availability_listener::AvailabilityListener;
use common::signalservice::Envelope;
use uuid::Uuid;

pub fn generate_uuid() -> String {
    Uuid::new_v4().to_string()
}

pub fn generate_envelope(uuid: &str) -> Envelope {
    Envelope {
        server_guid: Some(uuid.to_string()),
        ..Default::default()
    }
}

pub struct MockWebSocketConnection {
    pub evoked_handle_new_messages: bool,
    pub evoked_handle_messages_persisted: bool,
}

impl MockWebSocketConnection {
    pub(crate) fn new() -> Self {
        MockWebSocketConnection {
            evoked_handle_new_messages: false,
            evoked_handle_messages_persisted: false,
        }
    }
}

#[async_trait::async_trait]
impl AvailabilityListener for MockWebSocketConnection {
    async fn send_cached(&mut self) -> bool {
        self.evoked_handle_new_messages = true;
        true
    }

    async fn send_persisted(&mut self) -> bool {
        self.evoked_handle_messages_persisted = true;
        true
    }
}
