//! Provisioning coordinator: bridges the HTTP long-poll from
//! a linking device, the test harness playing the primary device, and the
//! `PUT /v1/devices/{code}` completion call, via `queue.rs`'s
//! `ReplyQueue`/`PromiseQueue` rendezvous primitives.
//!
//! Not present in the retrieved base files; grounded on the device-linking
//! state machine and queue names (`provisionQueue`,
//! `provisionResultQueueByCode`, `provisionResultQueueByKey`) and on
//! `client_presence_manager.rs`'s `Arc<Mutex<HashMap<..>>>` shape for the
//! per-code/per-registration-id bookkeeping.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::{Notify, RwLock};

use crate::account::Device;
use crate::queue::{QueueError, ReplyQueue};

/// Default `push_and_wait` timeout when a manager is built without an
/// explicit one (the test façade and unit tests below).
const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(60);

use super::manager::Manager;

/// Enqueued onto `provisionQueue` when a linking device opens
/// `GET /v1/devices/provisioning/{uuid}`.
#[derive(Debug, Clone)]
pub struct PendingProvision {
    pub device_uuid: String,
    pub pub_key: Vec<u8>,
}

/// Filled in by the test harness, acting as the primary device, once it has
/// picked up a `PendingProvision`.
#[derive(Debug, Clone)]
pub struct PendingProvisionResponse {
    pub primary_device_identity_private: Vec<u8>,
    pub primary_device_aci: String,
    pub primary_device_pni: Option<String>,
    pub primary_device_phone_number: String,
    pub profile_key: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningState {
    Advertised,
    CodeIssued,
    DeviceRegistered,
    KeysUploaded,
}

#[derive(Debug)]
pub struct ProvisioningManager {
    provision_queue: Arc<ReplyQueue<PendingProvision, PendingProvisionResponse>>,
    result_senders_by_code: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<Device>>>>,
    result_senders_by_registration_id: Arc<RwLock<HashMap<u32, mpsc::UnboundedSender<Device>>>>,
    states: Arc<RwLock<HashMap<String, ProvisioningState>>>,
    /// Devices delivered by `complete_with_keys` but not yet collected by
    /// whoever is waiting on the originating code (the HTTP handler that
    /// called `install_code` does not itself block on the channel it gets
    /// back; `await_completion` lets the test façade do that instead).
    completed_by_code: Arc<RwLock<HashMap<String, Device>>>,
    completion_notify: Arc<Notify>,
    /// `code -> device_uuid`, so `PUT /v1/devices/{code}` (which only knows
    /// the code decrypted out of its provision envelope, not the uuid the
    /// GET route advertised it under) can still update `states`.
    code_to_uuid: Arc<RwLock<HashMap<String, String>>>,
    /// `code -> primary device's aci`, so `PUT /v1/devices/{code}` knows
    /// which account to add the new device to.
    code_to_account_aci: Arc<RwLock<HashMap<String, String>>>,
    /// How long `push_pending_provision` waits for a reply before raising
    /// `QueueError::Timeout`.
    queue_timeout: Duration,
}

impl Default for ProvisioningManager {
    fn default() -> Self {
        Self::with_timeout(DEFAULT_QUEUE_TIMEOUT)
    }
}

impl Clone for ProvisioningManager {
    fn clone(&self) -> Self {
        Self {
            provision_queue: self.provision_queue.clone(),
            result_senders_by_code: self.result_senders_by_code.clone(),
            result_senders_by_registration_id: self.result_senders_by_registration_id.clone(),
            states: self.states.clone(),
            completed_by_code: self.completed_by_code.clone(),
            completion_notify: self.completion_notify.clone(),
            code_to_uuid: self.code_to_uuid.clone(),
            code_to_account_aci: self.code_to_account_aci.clone(),
            queue_timeout: self.queue_timeout,
        }
    }
}

impl Manager for ProvisioningManager {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl ProvisioningManager {
    pub fn connect() -> Self {
        Self::default()
    }

    pub fn with_timeout(queue_timeout: Duration) -> Self {
        Self {
            provision_queue: Arc::new(ReplyQueue::new()),
            result_senders_by_code: Arc::new(RwLock::new(HashMap::new())),
            result_senders_by_registration_id: Arc::new(RwLock::new(HashMap::new())),
            states: Arc::new(RwLock::new(HashMap::new())),
            completed_by_code: Arc::new(RwLock::new(HashMap::new())),
            completion_notify: Arc::new(Notify::new()),
            code_to_uuid: Arc::new(RwLock::new(HashMap::new())),
            code_to_account_aci: Arc::new(RwLock::new(HashMap::new())),
            queue_timeout,
        }
    }

    /// `GET /v1/devices/provisioning/{uuid}`: enqueues the pending provision
    /// and suspends until the test harness supplies the primary device's
    /// identity bundle, or `queue_timeout` elapses.
    pub async fn push_pending_provision(
        &self,
        device_uuid: String,
        pub_key: Vec<u8>,
    ) -> Result<PendingProvisionResponse, QueueError> {
        self.states
            .write()
            .await
            .insert(device_uuid.clone(), ProvisioningState::Advertised);
        self.provision_queue
            .push_and_wait(PendingProvision { device_uuid, pub_key }, self.queue_timeout)
            .await
    }

    /// Called by the test harness/façade to pop the next pending provision.
    pub async fn shift_pending_provision(
        &self,
    ) -> Option<(PendingProvision, tokio::sync::oneshot::Sender<PendingProvisionResponse>)> {
        self.provision_queue.shift().await
    }

    /// Binds a freshly minted `ProvisioningCode` to a fresh result channel,
    /// returning the receiving half to the caller so it can await
    /// completion directly.
    pub async fn install_code(
        &self,
        device_uuid: &str,
        code: String,
        primary_account_aci: String,
    ) -> mpsc::UnboundedReceiver<Device> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.code_to_uuid
            .write()
            .await
            .insert(code.clone(), device_uuid.to_owned());
        self.code_to_account_aci
            .write()
            .await
            .insert(code.clone(), primary_account_aci);
        self.result_senders_by_code.write().await.insert(code, tx);
        self.states
            .write()
            .await
            .insert(device_uuid.to_owned(), ProvisioningState::CodeIssued);
        rx
    }

    /// The account the linking device should register under, resolved from
    /// the code it decrypted out of its provision envelope.
    pub async fn account_for_code(&self, code: &str) -> Option<String> {
        self.code_to_account_aci.read().await.get(code).cloned()
    }

    /// `PUT /v1/devices/{code}`: like `register_device`, but looks up the
    /// device uuid from `code` itself since the linking device only knows
    /// the code it decrypted out of its provision envelope.
    pub async fn register_device_by_code(&self, code: &str, registration_id: u32) -> bool {
        let Some(device_uuid) = self.code_to_uuid.read().await.get(code).cloned() else {
            return false;
        };
        self.register_device(&device_uuid, code, registration_id).await
    }

    /// `PUT /v1/devices/{code}`: re-keys the pending result channel from
    /// `code` to the freshly registered device's registration id, since
    /// `complete_with_keys` (called once keys are uploaded) only knows the
    /// latter.
    pub async fn register_device(&self, device_uuid: &str, code: &str, registration_id: u32) -> bool {
        let sender = self.result_senders_by_code.write().await.remove(code);
        match sender {
            Some(sender) => {
                self.result_senders_by_registration_id
                    .write()
                    .await
                    .insert(registration_id, sender);
                self.states
                    .write()
                    .await
                    .insert(device_uuid.to_owned(), ProvisioningState::DeviceRegistered);
                true
            }
            None => false,
        }
    }

    /// Called once `updateDeviceKeys` completes for `registration_id`:
    /// delivers `device` to whoever is awaiting the receiver returned by
    /// `install_code`.
    pub async fn complete_with_keys(&self, device_uuid: &str, registration_id: u32, device: Device) -> bool {
        let sender = self
            .result_senders_by_registration_id
            .write()
            .await
            .remove(&registration_id);
        match sender {
            Some(sender) => {
                self.states
                    .write()
                    .await
                    .insert(device_uuid.to_owned(), ProvisioningState::KeysUploaded);
                sender.send(device).is_ok()
            }
            None => false,
        }
    }

    /// Drains `rx` in the background and records the device under `code`
    /// once `complete_with_keys` delivers it, so a GET provisioning handler
    /// can return its HTTP response without blocking on the rest of the
    /// linking flow.
    pub fn spawn_completion_watcher(&self, code: String, mut rx: mpsc::UnboundedReceiver<Device>) {
        let completed = self.completed_by_code.clone();
        let notify = self.completion_notify.clone();
        tokio::spawn(async move {
            if let Some(device) = rx.recv().await {
                completed.write().await.insert(code, device);
                notify.notify_waiters();
            }
        });
    }

    /// Blocks until `code`'s linking flow reaches keys-uploaded, for the test façade's `create_secondary_device`.
    pub async fn await_completion(&self, code: &str) -> Device {
        loop {
            if let Some(device) = self.completed_by_code.write().await.remove(code) {
                return device;
            }
            self.completion_notify.notified().await;
        }
    }

    pub async fn state_of(&self, device_uuid: &str) -> Option<ProvisioningState> {
        self.states.read().await.get(device_uuid).copied()
    }

    /// Collapses a pending link on timeout.
    pub async fn cancel(&self, device_uuid: &str) {
        self.states.write().await.remove(device_uuid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::user::new_device;

    #[tokio::test]
    async fn push_and_wait_rendezvous_with_harness() {
        let manager = ProvisioningManager::connect();
        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .push_pending_provision("uuid-1".to_owned(), vec![1, 2, 3])
                    .await
            })
        };

        let (pending, reply) = manager.shift_pending_provision().await.unwrap();
        assert_eq!(pending.device_uuid, "uuid-1");
        reply
            .send(PendingProvisionResponse {
                primary_device_identity_private: vec![9],
                primary_device_aci: "aci".to_owned(),
                primary_device_pni: None,
                primary_device_phone_number: "+15551234567".to_owned(),
                profile_key: vec![0; 32],
            })
            .unwrap();

        let response = waiter.await.unwrap().unwrap();
        assert_eq!(response.primary_device_aci, "aci");
    }

    #[tokio::test]
    async fn code_to_registration_id_handoff_delivers_device() {
        let manager = ProvisioningManager::connect();
        let mut rx = manager
            .install_code("uuid-2", "code-1".to_owned(), "aci-1".to_owned())
            .await;
        assert!(manager.register_device("uuid-2", "code-1", 42).await);

        let device = new_device(1.into());
        assert!(manager.complete_with_keys("uuid-2", 42, device.clone()).await);

        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered.device_id(), device.device_id());
        assert_eq!(
            manager.state_of("uuid-2").await,
            Some(ProvisioningState::KeysUploaded)
        );
    }
}
