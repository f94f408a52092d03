pub use common::web_api::{LinkDeviceResponse, LinkDeviceToken, SendMessageResponse};
