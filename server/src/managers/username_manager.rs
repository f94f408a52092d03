//! Username hash reservation/confirmation.
//!
//! Not present in the retrieved base files; grounded on
//! `account_manager.rs`'s shape (a thin wrapper over `SignalDatabase`) with
//! its own reservation table, since usernames are not part of account
//! creation in this server.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use hyper::StatusCode;
use libsignal_core::{Aci, ServiceId};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::account::AuthenticatedDevice;
use crate::crypto::zk::ServerSecretParams;
use crate::error::ApiError;
use crate::storage::database::SignalDatabase;

use super::manager::Manager;

#[derive(Debug, Default)]
struct Reservations {
    /// username_hash -> reserving account, expires once confirmed or
    /// replaced by a fresh reservation.
    reserved: HashMap<String, Aci>,
    /// username_hash -> owning account, for confirmed usernames.
    confirmed: HashMap<String, Aci>,
}

#[derive(Debug, Clone)]
pub struct UsernameManager<T: SignalDatabase> {
    db: T,
    reservations: Arc<RwLock<Reservations>>,
}

impl<T: SignalDatabase> Default for UsernameManager<T> {
    fn default() -> Self {
        Self {
            db: T::default(),
            reservations: Arc::new(RwLock::new(Reservations::default())),
        }
    }
}

impl<T: SignalDatabase> Manager for UsernameManager<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T: SignalDatabase> UsernameManager<T> {
    pub fn new(db: T) -> Self {
        Self {
            db,
            reservations: Arc::new(RwLock::new(Reservations::default())),
        }
    }

    /// `PUT /v1/accounts/username_hash/reserve`: reserves the first
    /// available candidate hash for the caller.
    pub async fn reserve(
        &self,
        authenticated_device: &AuthenticatedDevice,
        candidate_hashes: Vec<String>,
    ) -> Result<String, ApiError> {
        let aci = authenticated_device.account().aci();
        let mut reservations = self.reservations.write().await;
        for hash in candidate_hashes {
            if !reservations.reserved.contains_key(&hash) {
                reservations.reserved.insert(hash.clone(), aci);
                return Ok(hash);
            }
        }
        Err(ApiError {
            status_code: StatusCode::CONFLICT,
            body: "no candidate username hash is free".to_owned(),
        })
    }

    /// `PUT /v1/accounts/username_hash/confirm`: finalizes a prior
    /// reservation, assigning it (and a fresh link handle) to the account.
    /// `zk_proof` is a base64-encoded presentation binding `username_hash`
    /// to the generic server secret params; confirmation is refused if it
    /// does not verify.
    pub async fn confirm(
        &self,
        authenticated_device: &AuthenticatedDevice,
        username_hash: String,
        zk_proof: &str,
        zk_params: &ServerSecretParams,
    ) -> Result<Uuid, ApiError> {
        use base64::prelude::{Engine as _, BASE64_STANDARD};
        let presentation = BASE64_STANDARD.decode(zk_proof).map_err(|_| ApiError {
            status_code: StatusCode::BAD_REQUEST,
            body: "malformed zk proof".to_owned(),
        })?;
        if !zk_params.verify_presentation(username_hash.as_bytes(), &presentation) {
            return Err(ApiError {
                status_code: StatusCode::UNAUTHORIZED,
                body: "zk proof does not match username hash".to_owned(),
            });
        }

        let aci = authenticated_device.account().aci();
        let mut reservations = self.reservations.write().await;
        match reservations.reserved.get(&username_hash) {
            Some(owner) if *owner == aci => {}
            _ => {
                return Err(ApiError {
                    status_code: StatusCode::CONFLICT,
                    body: "username hash was not reserved by this account".to_owned(),
                })
            }
        }
        reservations.reserved.remove(&username_hash);
        reservations.confirmed.insert(username_hash.clone(), aci);
        drop(reservations);

        let service_id = ServiceId::Aci(aci);
        let mut account = self.db.get_account(&service_id).await.map_err(|_| ApiError {
            status_code: StatusCode::NOT_FOUND,
            body: "account not found".to_owned(),
        })?;
        let link = Uuid::new_v4();
        account.set_username_hash(Some(username_hash));
        account.set_username_link(Some(link));
        self.db
            .delete_account(&service_id)
            .await
            .map_err(|err| internal(err))?;
        self.db.add_account(&account).await.map_err(|err| internal(err))?;
        Ok(link)
    }

    /// `DELETE /v1/accounts/username_hash`.
    pub async fn delete(&self, authenticated_device: &AuthenticatedDevice) -> Result<(), ApiError> {
        let aci = authenticated_device.account().aci();
        let service_id = ServiceId::Aci(aci);
        let mut account = self.db.get_account(&service_id).await.map_err(|_| ApiError {
            status_code: StatusCode::NOT_FOUND,
            body: "account not found".to_owned(),
        })?;
        if let Some(hash) = account.username_hash().map(str::to_owned) {
            self.reservations.write().await.confirmed.remove(&hash);
        }
        account.set_username_hash(None);
        account.set_username_link(None);
        self.db
            .delete_account(&service_id)
            .await
            .map_err(|err| internal(err))?;
        self.db.add_account(&account).await.map_err(|err| internal(err))?;
        Ok(())
    }

    /// `GET /v1/accounts/username_hash/{hash}`: resolves a hash to its ACI
    /// for contact lookup.
    pub async fn lookup(&self, username_hash: &str) -> Result<ServiceId, ApiError> {
        self.reservations
            .read()
            .await
            .confirmed
            .get(username_hash)
            .map(|aci| ServiceId::Aci(*aci))
            .ok_or_else(|| ApiError {
                status_code: StatusCode::NOT_FOUND,
                body: format!("no account for username hash {username_hash}"),
            })
    }
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError {
        status_code: StatusCode::INTERNAL_SERVER_ERROR,
        body: err.to_string(),
    }
}
