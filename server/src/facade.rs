//! Test-facing process surface: the handle an external
//! harness drives instead of raw HTTP/WebSocket, so a test can spin up a
//! server in-process, seed accounts directly, and push a linking flow all
//! the way through the provisioning coordinator's queues without speaking
//! the wire protocol itself.
//!
//! `create_primary_device` bypasses the wire protocol entirely (direct
//! `SignalServerState` mutation, the same shortcut `test_utils::user`'s
//! fixtures take). `create_secondary_device` instead drives
//! `ProvisioningManager`'s actual queues (`push_pending_provision`,
//! `install_code`, `register_device_by_code`, `complete_with_keys`) and
//! `server::signal_server::add_linked_device` (the same helper the real
//! `PUT /v1/devices/{code}` handler calls), so linking tests exercise the
//! real state machine rather than a shortcut. The external `PrimaryDevice`
//! simulator and its own client-side crypto stack remain out of scope;
//! this façade holds just enough key material itself to stand in for one.

use std::collections::HashSet;
use std::net::SocketAddr;

use libsignal_core::{Aci, Pni};
use libsignal_protocol::{IdentityKeyPair, KeyPair};
use rand::rngs::OsRng;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::account::{Account, Device};
use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::managers::provisioning_manager::PendingProvisionResponse;
use crate::managers::state::SignalServerState;
use crate::managers::websocket::signal_websocket::SignalWebSocket;
use crate::server::signal_server::{add_linked_device, build_router};
use crate::storage::database::SignalDatabase;
use crate::storage::memory::InMemoryDatabase;
use common::web_api::{AccountAttributes, DeviceActivationRequest, StorageManifest, UploadSignedPreKey};

/// A primary device the façade holds on behalf of an external harness: the
/// account as the server sees it, plus the identity key pairs only the
/// device itself would know in a real deployment.
pub struct PrimaryDevice {
    pub account: Account,
    pub device: Device,
    aci_identity: IdentityKeyPair,
    pni_identity: IdentityKeyPair,
    profile_key: [u8; 32],
}

/// An in-process mock Signal server, bound to an ephemeral port.
pub struct Server {
    pub state: SignalServerState<InMemoryDatabase, SignalWebSocket>,
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Server {
    /// Binds an ephemeral TCP port and serves the full HTTP/WebSocket router
    /// in the background. No TLS; the test harness's TLS bundle is an
    /// external concern.
    pub async fn listen() -> std::io::Result<Self> {
        let state =
            SignalServerState::<InMemoryDatabase, SignalWebSocket>::new(ServerConfig::for_test());
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let app = build_router(state.clone()).into_make_service_with_connect_info::<SocketAddr>();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        Ok(Self {
            state,
            addr,
            shutdown: Some(shutdown_tx),
        })
    }

    pub fn address(&self) -> SocketAddr {
        self.addr
    }

    /// Stops accepting new connections; in-flight ones are left to drain.
    pub fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }

    /// Seeds an account with a single primary device directly in the
    /// database, bypassing registration entirely.
    pub async fn create_primary_device(&self, phone_number: impl Into<String>) -> PrimaryDevice {
        let aci_identity = IdentityKeyPair::generate(&mut OsRng);
        let pni_identity = IdentityKeyPair::generate(&mut OsRng);
        let mut profile_key = [0u8; 32];
        rand::RngCore::fill_bytes(&mut OsRng, &mut profile_key);

        let device = Device::builder()
            .device_id(1.into())
            .last_seen(0)
            .created(0)
            .auth_token("test-auth-token".to_owned())
            .salt("test-salt".to_owned())
            .registration_id(1)
            .pni_registration_id(1)
            .build();

        let account = Account::new(
            Pni::from(Uuid::new_v4()),
            *aci_identity.identity_key(),
            *pni_identity.identity_key(),
            device.clone(),
            phone_number.into(),
        );

        self.state
            .db
            .add_account(&account)
            .await
            .expect("freshly generated aci/pni cannot already be in use");

        PrimaryDevice {
            account,
            device,
            aci_identity,
            pni_identity,
            profile_key,
        }
    }

    /// Pops the next pending `GET /v1/devices/provisioning/{uuid}` long-poll
    /// and answers it as `primary`, returning the
    /// linking device's uuid. Run this concurrently with whatever opened
    /// that long-poll — `create_secondary_device` does both itself.
    pub async fn wait_for_provision(&self, primary: &PrimaryDevice) -> String {
        let (pending, reply) = self
            .state
            .provisioning_manager
            .shift_pending_provision()
            .await
            .expect("a linking device should have a pending provision queued");

        reply
            .send(provision_response(primary))
            .expect("linking device is still awaiting its provision response");

        pending.device_uuid
    }

    /// Blocks until `account`'s storage manifest passes `after_version`.
    pub async fn wait_for_storage_manifest(&self, account: &Aci, after_version: u64) -> StorageManifest {
        self.state
            .storage_service_manager
            .wait_for_manifest_after(account, after_version)
            .await
    }

    /// Drives a full secondary-device linking flow against `primary`,
    /// through the real `ProvisioningManager` queues and
    /// `add_linked_device`. Returns the new `Device`
    /// once it has registered and "uploaded" its keys.
    pub async fn create_secondary_device(&self, primary: &PrimaryDevice) -> Result<Device, ApiError> {
        let ephemeral = KeyPair::generate(&mut OsRng);
        let device_uuid = Uuid::new_v4().to_string();

        let answerer = {
            let provisioning_manager = self.state.provisioning_manager.clone();
            let response = provision_response(primary);
            tokio::spawn(async move {
                if let Some((_, reply)) = provisioning_manager.shift_pending_provision().await {
                    let _ = reply.send(response);
                }
            })
        };

        self.state
            .provisioning_manager
            .push_pending_provision(device_uuid.clone(), ephemeral.public_key.serialize().to_vec())
            .await
            .map_err(|_| ApiError {
                status_code: axum::http::StatusCode::GATEWAY_TIMEOUT,
                body: "ProvisionTimeout".to_owned(),
            })?;
        answerer.await.expect("primary-device stand-in task should not panic");

        let code = {
            let mut raw = [0u8; 16];
            rand::RngCore::fill_bytes(&mut OsRng, &mut raw);
            hex::encode(raw)
        };
        let rx = self
            .state
            .provisioning_manager
            .install_code(
                &device_uuid,
                code.clone(),
                primary.account.aci().service_id_string(),
            )
            .await;
        self.state
            .provisioning_manager
            .spawn_completion_watcher(code.clone(), rx);

        let aci_signed_pre_key = sign_pre_key(&primary.aci_identity, 1);
        let aci_pq_last_resort_pre_key = sign_pre_key(&primary.aci_identity, 2);
        let pni_signed_pre_key = sign_pre_key(&primary.pni_identity, 1);
        let pni_pq_last_resort_pre_key = sign_pre_key(&primary.pni_identity, 2);

        let account_attributes = AccountAttributes {
            name: None,
            registration_id: primary.device.registration_id(),
            pni_registration_id: primary.device.pni_registration_id(),
            fetches_messages: true,
            capabilities: HashSet::new(),
        };
        let device_activation_request = DeviceActivationRequest {
            aci_signed_pre_key,
            aci_pq_last_resort_pre_key,
            pni_signed_pre_key,
            pni_pq_last_resort_pre_key,
        };

        let device = add_linked_device(
            &self.state,
            &primary.account.aci().into(),
            &primary.account,
            "secondary-test-password",
            account_attributes,
            device_activation_request,
        )
        .await?;

        if !self
            .state
            .provisioning_manager
            .register_device_by_code(&code, device.registration_id())
            .await
        {
            return Err(ApiError {
                status_code: axum::http::StatusCode::GONE,
                body: "".to_owned(),
            });
        }

        // "keys-uploaded": `add_linked_device`
        // already persisted the device's own signed pre-keys above, so the
        // secondary device's linking flow is complete.
        self.state
            .provisioning_manager
            .complete_with_keys(&device_uuid, device.registration_id(), device.clone())
            .await;

        Ok(device)
    }
}

fn provision_response(primary: &PrimaryDevice) -> PendingProvisionResponse {
    PendingProvisionResponse {
        primary_device_identity_private: primary.aci_identity.private_key().serialize().to_vec(),
        primary_device_aci: primary.account.aci().service_id_string(),
        primary_device_pni: Some(primary.account.pni().service_id_string()),
        primary_device_phone_number: primary.account.phone_number().to_owned(),
        profile_key: primary.profile_key.to_vec(),
    }
}

fn sign_pre_key(identity: &IdentityKeyPair, key_id: u32) -> UploadSignedPreKey {
    let pre_key = KeyPair::generate(&mut OsRng);
    let public_key = pre_key.public_key.serialize();
    let signature = identity
        .private_key()
        .calculate_signature(&public_key, &mut OsRng)
        .expect("signing with a freshly generated key cannot fail");
    UploadSignedPreKey {
        key_id,
        public_key,
        signature,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn secondary_device_links_against_primary() {
        let server = Server::listen().await.expect("ephemeral port should bind");
        let primary = server.create_primary_device("+15557654321").await;

        let device = server
            .create_secondary_device(&primary)
            .await
            .expect("linking flow should succeed");

        assert_ne!(device.device_id(), primary.device.device_id());
        server.close();
    }
}
