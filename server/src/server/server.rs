use super::query::CheckKeysRequest;
use super::response::{LinkDeviceResponse, LinkDeviceToken, SendMessageResponse};
use crate::{
    account::{Account, AuthenticatedDevice, BackupZkAuth, Device, GroupAuth, MessageSender},
    account_authenticator::SaltedTokenHash,
    crypto::{
        attachment::encrypt_attachment,
        certs::{generate_sender_certificate, generate_server_certificate},
        provisioning::encrypt_provision_message,
        zk::ServerSecretParams,
    },
    envelope::ToEnvelope,
    error::ApiError,
    managers::{
        state::SignalServerState,
        websocket::{
            connection::{UserIdentity, WebSocketConnection},
            signal_websocket::SignalWebSocket,
        },
    },
    storage::database::SignalDatabase,
    storage::memory::InMemoryDatabase,
    validators::{
        destination_device_validator::DestinationDeviceValidator,
        pre_key_signature_validator::PreKeySignatureValidator,
    },
};
use anyhow::Result;
use axum::{
    body::Bytes,
    debug_handler,
    extract::{
        connect_info::ConnectInfo,
        ws::{Message, WebSocketUpgrade},
        Host, Path, Query, Request, State,
    },
    handler::HandlerWithoutStateExt,
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, ORIGIN},
        HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri,
    },
    middleware::{from_fn, Next},
    response::{IntoResponse, Redirect, Response},
    routing::{any, delete, get, patch, post, put},
    BoxError, Json, Router,
};
use axum_extra::{headers, TypedHeader};
use axum_server::tls_rustls::RustlsConfig;
use base64::prelude::{Engine as _, BASE64_STANDARD, BASE64_URL_SAFE, BASE64_URL_SAFE_NO_PAD};
use common::web_api::{
    authorization::BasicAuthorizationHeader, AccountAttributes, AttachmentUploadForm,
    CallLinkRestrictions, CallLinkStateResponse, CreateCallLinkRequest, DeviceActivationRequest,
    DeviceCapabilityType, DevicePreKeyBundle, GroupChange, GroupChangeLog, GroupState,
    LinkDeviceRequest, MessageList, PreKeyCount, PreKeyResponse, ReadOperation,
    RegistrationRequest, RegistrationResponse, SetBackupIdRequest, SetBackupKeyRequest,
    SetKeyRequest, StorageItems, StorageManifest, UsernameHashConfirmRequest, UsernameHashRequest,
    UsernameHashResponse, WriteOperation,
};
use common::websocket::wsstream::WSStream;
use futures_util::StreamExt;
use headers::authorization::Basic;
use headers::Authorization;
use hmac::{Hmac, Mac};
use libsignal_core::{Aci, ProtocolAddress, ServiceId, ServiceIdKind};
use libsignal_protocol::IdentityKey;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::{
    env,
    fmt::Debug,
    net::SocketAddr,
    str::FromStr,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;

pub async fn handle_put_messages<T: SignalDatabase, U: WSStream<Message, axum::Error> + Debug>(
    state: &SignalServerState<T, U>,
    authenticated_device: &AuthenticatedDevice,
    destination_identifier: &ServiceId,
    payload: MessageList,
) -> Result<SendMessageResponse, ApiError> {
    if *destination_identifier == authenticated_device.account().pni() {
        return Err(ApiError {
            status_code: StatusCode::FORBIDDEN,
            body: "".to_owned(),
        });
    }

    let is_sync_message = *destination_identifier == authenticated_device.account().aci();
    let destination: Account = if is_sync_message {
        authenticated_device.account().clone()
    } else {
        state
            .account_manager
            .get_account(destination_identifier)
            .await
            .map_err(|_| ApiError {
                status_code: StatusCode::NOT_FOUND,
                body: "Destination account not found".to_owned(),
            })?
    };
    let exclude_device_ids: Vec<u32> = if is_sync_message {
        vec![authenticated_device.device().device_id().into()]
    } else {
        Vec::new()
    };

    let message_device_ids: Vec<u32> = payload
        .messages
        .iter()
        .map(|message| message.destination_device_id)
        .collect();
    DestinationDeviceValidator::validate_complete_device_list(
        &destination,
        &message_device_ids,
        &exclude_device_ids,
    )
    .map_err(|err| ApiError {
        status_code: StatusCode::CONFLICT,
        body: serde_json::to_string(&err).expect("Can serialize device ids"),
    })?;

    DestinationDeviceValidator::validate_registration_id_from_messages(
        &destination,
        &payload.messages,
        destination_identifier.kind() == ServiceIdKind::Pni,
    )
    .map_err(|err| ApiError {
        status_code: StatusCode::CONFLICT,
        body: serde_json::to_string(&err).expect("Can serialize device ids"),
    })?;

    let source_service_id = Some(authenticated_device.account().aci().into());
    let source_device_id = Some(authenticated_device.device().device_id());

    for message in &payload.messages {
        let mut envelope = message.to_envelope(
            destination_identifier,
            source_service_id,
            source_device_id,
            message.destination_registration_id,
            payload.timestamp,
            false,
        );
        let address = ProtocolAddress::new(
            destination.aci().service_id_string(),
            message.destination_device_id.into(),
        );
        state
            .message_manager
            .insert(&address, &mut envelope)
            .await
            .map_err(|_| ApiError {
                status_code: StatusCode::INTERNAL_SERVER_ERROR,
                body: "Could not insert message".to_owned(),
            })?;
    }

    let needs_sync = !is_sync_message && authenticated_device.account().devices().len() > 1;
    Ok(SendMessageResponse { needs_sync })
}

/// Sealed-sender counterpart of `handle_put_messages`: the sender is only
/// known through a validated `SenderCertificate`, so there is no sync-message
/// or self-send case and every destination device must be addressed.
pub async fn handle_put_messages_sealed<T: SignalDatabase, U: WSStream<Message, axum::Error> + Debug>(
    state: &SignalServerState<T, U>,
    sender_aci: Aci,
    sender_device_id: libsignal_core::DeviceId,
    destination_identifier: &ServiceId,
    payload: MessageList,
) -> Result<SendMessageResponse, ApiError> {
    let destination: Account = state
        .account_manager
        .get_account(destination_identifier)
        .await
        .map_err(|_| ApiError {
            status_code: StatusCode::NOT_FOUND,
            body: "Destination account not found".to_owned(),
        })?;

    let message_device_ids: Vec<u32> = payload
        .messages
        .iter()
        .map(|message| message.destination_device_id)
        .collect();
    DestinationDeviceValidator::validate_complete_device_list(&destination, &message_device_ids, &[]).map_err(
        |err| ApiError {
            status_code: StatusCode::CONFLICT,
            body: serde_json::to_string(&err).expect("Can serialize device ids"),
        },
    )?;

    DestinationDeviceValidator::validate_registration_id_from_messages(
        &destination,
        &payload.messages,
        destination_identifier.kind() == ServiceIdKind::Pni,
    )
    .map_err(|err| ApiError {
        status_code: StatusCode::CONFLICT,
        body: serde_json::to_string(&err).expect("Can serialize device ids"),
    })?;

    let source_service_id = Some(ServiceId::Aci(sender_aci));
    let source_device_id = Some(sender_device_id);

    for message in &payload.messages {
        let mut envelope = message.to_envelope(
            destination_identifier,
            source_service_id,
            source_device_id,
            message.destination_registration_id,
            payload.timestamp,
            false,
        );
        let address = ProtocolAddress::new(
            destination.aci().service_id_string(),
            message.destination_device_id.into(),
        );
        state
            .message_manager
            .insert(&address, &mut envelope)
            .await
            .map_err(|_| ApiError {
                status_code: StatusCode::INTERNAL_SERVER_ERROR,
                body: "Could not insert message".to_owned(),
            })?;
    }

    Ok(SendMessageResponse { needs_sync: false })
}

pub async fn handle_keepalive<T: SignalDatabase, U: WSStream<Message, axum::Error> + Debug>(
    state: &SignalServerState<T, U>,
    authenticated_device: &AuthenticatedDevice,
) -> Result<(), ApiError> {
    //Check if present in presencemanager. If not present, close connection for device. Else return 200 Ok
    if !state
        .client_presence_manager
        .is_locally_present(&authenticated_device.get_protocol_address(ServiceIdKind::Aci))
    {
        if let Some(connection) = state
            .websocket_manager
            .get(&authenticated_device.get_protocol_address(ServiceIdKind::Aci))
            .await
        {
            let _ = connection
                .lock()
                .await
                .close_reason(1000, "OK")
                .await
                .map_err(|err| err.to_string());
        }
    }

    Ok(())
}

/// Computes whether re-registering `phone_number` is authorized: there is no
/// existing account, or the caller's password hashes against the existing
/// primary device's stored salt.
async fn reregistration_allowed<T: SignalDatabase>(
    account_manager: &crate::managers::account_manager::AccountManager<T>,
    phone_number: &str,
    password: &str,
) -> bool {
    let Ok(existing) = account_manager
        .get_account_from_phonenumber_without_devices(phone_number)
        .await
    else {
        return true;
    };
    let Ok(existing) = account_manager
        .get_account(&ServiceId::Aci(existing.aci()))
        .await
    else {
        return false;
    };
    match existing.device(1.into()) {
        Some(primary) => SaltedTokenHash::with_salt(password, primary.salt.clone()).hash() == primary.auth_token,
        None => false,
    }
}

async fn handle_post_registration<T: SignalDatabase, U: WSStream<Message, axum::Error> + Debug>(
    state: SignalServerState<T, U>,
    auth_header: BasicAuthorizationHeader,
    registration: RegistrationRequest,
) -> Result<RegistrationResponse, ApiError> {
    let time_now = time_now()?;
    let phone_number = auth_header.username();
    let hash = SaltedTokenHash::generate_for(auth_header.password());
    let device = Device::builder()
        .device_id(1.into())
        .maybe_name(registration.account_attributes().name.clone())
        .last_seen(time_now)
        .created(time_now)
        .auth_token(hash.hash().to_owned())
        .salt(hash.salt().to_owned())
        .registration_id(registration.account_attributes().registration_id)
        .pni_registration_id(registration.account_attributes().pni_registration_id)
        .capabilities(registration.account_attributes().capabilities.clone())
        .build();

    let device_pre_key_bundle = DevicePreKeyBundle {
        aci_signed_pre_key: registration.aci_signed_pre_key().to_owned(),
        pni_signed_pre_key: registration.pni_signed_pre_key().to_owned(),
        aci_pq_pre_key: registration.aci_pq_last_resort_pre_key().to_owned(),
        pni_pq_pre_key: registration.pni_pq_last_resort_pre_key().to_owned(),
    };

    let aci_identity_key =
        IdentityKey::decode(&BASE64_STANDARD.decode(registration.aci_identity_key()).map_err(
            |_| ApiError {
                status_code: StatusCode::BAD_REQUEST,
                body: "aciIdentityKey is not valid base64".to_owned(),
            },
        )?)
        .map_err(|_| ApiError {
            status_code: StatusCode::BAD_REQUEST,
            body: "aciIdentityKey is malformed".to_owned(),
        })?;
    let pni_identity_key =
        IdentityKey::decode(&BASE64_STANDARD.decode(registration.pni_identity_key()).map_err(
            |_| ApiError {
                status_code: StatusCode::BAD_REQUEST,
                body: "pniIdentityKey is not valid base64".to_owned(),
            },
        )?)
        .map_err(|_| ApiError {
            status_code: StatusCode::BAD_REQUEST,
            body: "pniIdentityKey is malformed".to_owned(),
        })?;

    let reregistration_allowed =
        reregistration_allowed(&state.account_manager, phone_number, auth_header.password()).await;

    let account = state
        .account_manager
        .create_account(
            phone_number.to_owned(),
            aci_identity_key,
            pni_identity_key,
            device.clone(),
            reregistration_allowed,
        )
        .await?;

    let aci = account.aci();
    let address = ProtocolAddress::new(aci.service_id_string(), device.device_id());

    state
        .account_manager
        .store_key_bundle(ServiceIdKind::Aci, &device_pre_key_bundle, &address)
        .await
        .map_err(|err| ApiError {
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
            body: err.to_string(),
        })?;

    Ok(RegistrationResponse {
        uuid: aci.into(),
        pni: account.pni().into(),
        number: phone_number.to_owned(),
        username_hash: None,
        storage_capable: true,
    })
}

async fn handle_get_link_device_token<
    T: SignalDatabase,
    U: WSStream<Message, axum::Error> + Debug,
>(
    state: SignalServerState<T, U>,
    authenticated_device: AuthenticatedDevice,
) -> Result<LinkDeviceToken, ApiError> {
    if authenticated_device.device().device_id() != 1.into() {
        return Err(ApiError {
            status_code: StatusCode::UNAUTHORIZED,
            body: "".to_owned(),
        });
    }

    let claims = format!(
        "{}.{}",
        authenticated_device.account().aci().service_id_string(),
        time_now()?
    );

    let mut mac = Hmac::<Sha256>::new_from_slice(state.config.link_device_secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(claims.as_bytes());
    let signature = mac.finalize().into_bytes();
    let link_device_token = format!("{}:{}", claims, BASE64_URL_SAFE.encode(signature));

    let mut hasher = Sha256::new();
    hasher.update(link_device_token.as_bytes());
    let digest = hasher.finalize();
    let token_identifier = BASE64_URL_SAFE_NO_PAD.encode(digest);

    Ok(LinkDeviceToken {
        verification_code: link_device_token,
        token_identifier,
    })
}

/// Shared by both device-linking flows: validates the new device's uploaded
/// pre-key signatures and downgrade-sensitive capabilities against `account`,
/// then builds and persists the `Device` under `aci`.
pub(crate) async fn add_linked_device<T: SignalDatabase, U: WSStream<Message, axum::Error> + Debug>(
    state: &SignalServerState<T, U>,
    aci: &ServiceId,
    account: &Account,
    auth_password: &str,
    account_attributes: AccountAttributes,
    device_activation_request: DeviceActivationRequest,
) -> Result<Device, ApiError> {
    let all_keys_valid = PreKeySignatureValidator::validate_pre_key_signatures(
        &account.aci_identity_key(),
        &[
            device_activation_request.aci_signed_pre_key,
            device_activation_request.aci_pq_last_resort_pre_key,
        ],
    ) && PreKeySignatureValidator::validate_pre_key_signatures(
        &account.pni_identity_key(),
        &[
            device_activation_request.pni_signed_pre_key,
            device_activation_request.pni_pq_last_resort_pre_key,
        ],
    );

    if !all_keys_valid {
        return Err(ApiError {
            status_code: StatusCode::UNPROCESSABLE_ENTITY,
            body: "".to_owned(),
        });
    }

    if !DeviceCapabilityType::VALUES
        .iter()
        .filter(|capability| {
            capability.value().prevent_downgrade && account.has_capability(capability)
        })
        .all(|required_capability| {
            account_attributes
                .capabilities
                .contains(required_capability)
        })
    {
        return Err(ApiError {
            status_code: StatusCode::CONFLICT,
            body: "".to_owned(),
        });
    }

    let new_device_id = account.get_next_device_id();
    let hash = SaltedTokenHash::generate_for(auth_password);
    let device = Device::builder()
        .device_id(new_device_id.into())
        .maybe_name(account_attributes.name)
        .last_seen(time_now()?)
        .created(time_now()?)
        .auth_token(hash.hash().to_owned())
        .salt(hash.salt().to_owned())
        .registration_id(account_attributes.registration_id)
        .pni_registration_id(account_attributes.pni_registration_id)
        .capabilities(account_attributes.capabilities)
        .build();

    state
        .account_manager
        .add_device(aci, &device)
        .await
        .map_err(|_| ApiError {
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
            body: "".to_owned(),
        })?;

    Ok(device)
}

async fn handle_post_link_device<T: SignalDatabase, U: WSStream<Message, axum::Error> + Debug>(
    state: SignalServerState<T, U>,
    auth_header: Basic,
    link_device_request: LinkDeviceRequest,
) -> Result<LinkDeviceResponse, ApiError> {
    let (claims, b64_signature) = link_device_request
        .verification_code
        .split_once(':')
        .ok_or(ApiError {
            status_code: StatusCode::FORBIDDEN,
            body: "".to_owned(),
        })?;

    let mut mac = Hmac::<Sha256>::new_from_slice(state.config.link_device_secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(claims.as_bytes());
    let expected_signature = mac.finalize().into_bytes();
    let signature = BASE64_URL_SAFE
        .decode(b64_signature)
        .map_err(|_| ApiError {
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
            body: "".to_owned(),
        })?;
    if expected_signature.as_slice() != signature {
        return Err(ApiError {
            status_code: StatusCode::FORBIDDEN,
            body: "".to_owned(),
        });
    }

    let (aci_str, timestamp_str) = claims.split_once('.').ok_or(ApiError {
        status_code: StatusCode::FORBIDDEN,
        body: "".to_owned(),
    })?;
    let aci = ServiceId::parse_from_service_id_string(aci_str).ok_or(ApiError {
        status_code: StatusCode::FORBIDDEN,
        body: "".to_owned(),
    })?;
    let timestamp = timestamp_str.parse().map_err(|_| ApiError {
        status_code: StatusCode::INTERNAL_SERVER_ERROR,
        body: "".to_owned(),
    })?;
    let time_then = Duration::from_millis(timestamp);
    let time_now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards");
    let elapsed_time = time_now - time_then;
    if elapsed_time.as_secs() > 600 {
        return Err(ApiError {
            status_code: StatusCode::FORBIDDEN,
            body: "".to_owned(),
        });
    }

    let account = state
        .account_manager
        .get_account(&aci)
        .await
        .map_err(|_| ApiError {
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
            body: "".to_owned(),
        })?;

    state
        .account_manager
        .add_used_device_link_token(link_device_request.verification_code)
        .await?;

    let device = add_linked_device(
        &state,
        &aci,
        &account,
        auth_header.password(),
        link_device_request.account_attributes,
        link_device_request.device_activation_request,
    )
    .await?;

    Ok(LinkDeviceResponse {
        aci: account.aci().service_id_string(),
        pni: account.pni().service_id_string(),
        device_id: u32::from(device.device_id()),
    })
}

async fn handle_delete_account<T: SignalDatabase, U: WSStream<Message, axum::Error> + Debug>(
    state: SignalServerState<T, U>,
    authenticated_device: AuthenticatedDevice,
) -> Result<(), ApiError> {
    state
        .account_manager
        .delete_account(&authenticated_device.account().aci().into())
        .await
        .map_err(|_| ApiError {
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
            body: "".to_owned(),
        })
}

async fn handle_delete_device<T: SignalDatabase, U: WSStream<Message, axum::Error> + Debug>(
    state: SignalServerState<T, U>,
    device_id: u32,
    authenticated_device: AuthenticatedDevice,
) -> Result<(), ApiError> {
    if authenticated_device.device().device_id() != 1.into()
        && authenticated_device.device().device_id() != device_id.into()
    {
        return Err(ApiError {
            status_code: StatusCode::UNAUTHORIZED,
            body: "".to_owned(),
        });
    }

    if device_id == 1 {
        return Err(ApiError {
            status_code: StatusCode::FORBIDDEN,
            body: "".to_owned(),
        });
    }

    state
        .account_manager
        .delete_device(&ProtocolAddress::new(
            authenticated_device.account().aci().service_id_string(),
            device_id.into(),
        ))
        .await
        .map_err(|_| ApiError {
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
            body: "".to_owned(),
        })
}

// redirect from http to https. this is temporary
async fn redirect_http_to_https(addr: SocketAddr, http: u16, https: u16) -> Result<(), BoxError> {
    fn make_https(host: String, uri: Uri, http: u16, https: u16) -> Result<Uri, BoxError> {
        let mut parts = uri.into_parts();

        parts.scheme = Some(axum::http::uri::Scheme::HTTPS);

        if parts.path_and_query.is_none() {
            parts.path_and_query = Some("/".parse()?);
        }

        let https_host = host.replace(&http.to_string(), &https.to_string());
        parts.authority = Some(https_host.parse()?);

        Ok(Uri::from_parts(parts)?)
    }

    let redirect = move |Host(host): Host, uri: Uri| async move {
        match make_https(host, uri, http, https) {
            Ok(uri) => Ok(Redirect::permanent(&uri.to_string())),
            Err(_) => Err(StatusCode::BAD_REQUEST),
        }
    };

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, redirect.into_make_service()).await?;
    Ok(())
}

fn parse_service_id(string: String) -> Result<ServiceId, ApiError> {
    ServiceId::parse_from_service_id_string(&string).ok_or_else(|| ApiError {
        status_code: StatusCode::BAD_REQUEST,
        body: "Could not parse service id".to_owned(),
    })
}

fn parse_b64(string: &str) -> Result<Box<[u8]>, ApiError> {
    BASE64_URL_SAFE_NO_PAD
        .decode(string)
        .or_else(|_| BASE64_STANDARD.decode(string))
        .map(Vec::into_boxed_slice)
        .map_err(|_| ApiError {
            status_code: StatusCode::BAD_REQUEST,
            body: "Could not parse base64 path segment".to_owned(),
        })
}

fn internal(err: impl std::fmt::Display) -> ApiError {
    ApiError {
        status_code: StatusCode::INTERNAL_SERVER_ERROR,
        body: err.to_string(),
    }
}

/// Handler for the GET v1/identifier/{phone_number} endpoint.
#[debug_handler]
async fn get_identifier_endpoint(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    _authenticated_device: AuthenticatedDevice,
    Path(phone_number): Path<String>,
) -> Result<String, ApiError> {
    Ok(state
        .account_manager
        .get_account_from_phonenumber_without_devices(&phone_number)
        .await
        .map_err(|err| ApiError {
            status_code: StatusCode::BAD_REQUEST,
            body: format!("Could not get ACI: {}", err),
        })?
        .aci()
        .service_id_string())
}

/// Derives the unidentified access key a sealed-sender client must present
/// for a recipient holding `profile_key`, and checks it against `presented`.
fn verify_unidentified_access_key(profile_key: &[u8; 32], presented: &[u8]) -> bool {
    let mut mac = match Hmac::<Sha256>::new_from_slice(profile_key) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(b"unidentified-delivery");
    let expected = mac.finalize().into_bytes();
    expected.as_slice() == presented
}

/// Handler for the PUT v1/messages/{address} endpoint.
#[debug_handler]
async fn put_messages_endpoint(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    sender: MessageSender,
    Path(destination_identifier): Path<String>,
    Json(payload): Json<MessageList>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    let destination_identifier = parse_service_id(destination_identifier)?;
    match sender {
        MessageSender::Identified(authenticated_device) => {
            handle_put_messages(&state, &authenticated_device, &destination_identifier, payload)
                .await
                .map(Json)
        }
        MessageSender::Sealed(auth) => {
            let destination = state
                .account_manager
                .get_account(&destination_identifier)
                .await
                .map_err(|_| ApiError {
                    status_code: StatusCode::NOT_FOUND,
                    body: "Destination account not found".to_owned(),
                })?;
            let profile_key = destination.profile_key().ok_or_else(|| ApiError {
                status_code: StatusCode::UNAUTHORIZED,
                body: "Destination has no profile key".to_owned(),
            })?;
            if !verify_unidentified_access_key(profile_key, &auth.access_key) {
                return Err(ApiError {
                    status_code: StatusCode::UNAUTHORIZED,
                    body: "invalid unidentified access key".to_owned(),
                });
            }
            handle_put_messages_sealed(
                &state,
                auth.sender_aci,
                auth.sender_device_id,
                &destination_identifier,
                payload,
            )
            .await
            .map(Json)
        }
    }
}

/// Handler for `GET /v1/messages`: drains the caller's queued envelopes
/// without deleting them, mirroring the long-poll REST fallback to the
/// WebSocket delivery path.
#[debug_handler]
async fn get_messages_endpoint(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    authenticated_device: AuthenticatedDevice,
) -> Result<Json<serde_json::Value>, ApiError> {
    let address = authenticated_device.get_protocol_address(ServiceIdKind::Aci);
    let envelopes = state
        .message_manager
        .get_messages_for_device(&address)
        .await
        .map_err(internal)?;

    let messages: Vec<_> = envelopes
        .iter()
        .map(|envelope| {
            serde_json::json!({
                "guid": envelope.server_guid(),
                "type": envelope.r#type,
                "sourceServiceId": envelope.source_service_id,
                "sourceDevice": envelope.source_device,
                "timestamp": envelope.timestamp,
                "serverTimestamp": envelope.server_timestamp,
                "content": envelope.content.as_ref().map(|c| BASE64_STANDARD.encode(c)),
            })
        })
        .collect();

    Ok(Json(serde_json::json!({ "messages": messages, "more": false })))
}

/// Handler for `DELETE /v1/messages/uuid/{guid}`: acknowledges (removes)
/// one delivered envelope.
#[debug_handler]
async fn delete_message_ack_endpoint(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    authenticated_device: AuthenticatedDevice,
    Path(guid): Path<String>,
) -> Result<(), ApiError> {
    let address = authenticated_device.get_protocol_address(ServiceIdKind::Aci);
    state.message_manager.delete(&address, vec![guid]).await.map_err(internal)?;
    Ok(())
}

/// Handler for the POST v1/registration endpoint.
#[debug_handler]
async fn post_registration_endpoint(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    headers: HeaderMap,
    Json(registration): Json<RegistrationRequest>,
) -> Result<Json<RegistrationResponse>, ApiError> {
    let auth_header = headers
        .get("Authorization")
        .ok_or_else(|| ApiError {
            status_code: StatusCode::UNAUTHORIZED,
            body: "Missing authorization header".to_owned(),
        })?
        .to_str()
        .map_err(|err| ApiError {
            status_code: StatusCode::UNAUTHORIZED,
            body: format!(
                "Authorization header could not be parsed as string: {}",
                err
            ),
        })?
        .parse()
        .map_err(|err| ApiError {
            status_code: StatusCode::UNAUTHORIZED,
            body: format!("Authorization header could not be parsed: {}", err),
        })?;

    handle_post_registration(state, auth_header, registration)
        .await
        .map(Json)
}

/// Handler for the GET /v2/keys/:identifier/:device_id endpoint.
#[debug_handler]
async fn get_keys_id_device_id(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    authenticated_device: AuthenticatedDevice,
    Path((identifier, device_id)): Path<(String, String)>,
) -> Result<Json<PreKeyResponse>, ApiError> {
    state
        .key_manager
        .handle_get_keys_id_device_id(
            &state.db,
            &authenticated_device,
            ServiceId::parse_from_service_id_string(&identifier).ok_or_else(|| ApiError {
                status_code: StatusCode::BAD_REQUEST,
                body: "Identifier is not of right format".into(),
            })?,
            device_id,
        )
        .await
        .map(Json)
}

/// Handler for the GET /v2/keys endpoint.
#[debug_handler]
async fn get_keys(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    authenticated_device: AuthenticatedDevice,
) -> Result<Json<PreKeyCount>, ApiError> {
    let (count, pq_count) = state
        .key_manager
        .get_one_time_pre_key_count(&authenticated_device.account().aci().into())
        .await
        .map_err(|_| ApiError {
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
            body: "".to_string(),
        })?;
    Ok(axum::Json(PreKeyCount { count, pq_count }))
}

/// Handler for the POST v2/keys/check endpoint.
#[debug_handler]
async fn post_keycheck_endpoint(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    authenticated_device: AuthenticatedDevice,
    Json(check_keys_request): Json<CheckKeysRequest>,
) -> Result<(), ApiError> {
    state
        .key_manager
        .handle_post_keycheck(
            &authenticated_device,
            get_kind(check_keys_request.identity_type)?,
            check_keys_request.user_digest,
        )
        .await?
        .then_some(())
        .ok_or_else(|| ApiError {
            status_code: StatusCode::CONFLICT,
            body: "".into(),
        })
}

/// Handler for the PUT v2/keys endpoint.
#[debug_handler]
async fn put_keys_endpoint(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    authenticated_device: AuthenticatedDevice,
    Query(params): Query<HashMap<String, String>>,
    Json(set_keys_request): Json<SetKeyRequest>,
) -> Result<(), ApiError> {
    state
        .key_manager
        .handle_put_keys(
            &authenticated_device,
            set_keys_request,
            get_kind(params.get("identity").cloned().unwrap_or_default())?,
        )
        .await?;

    // `updateDeviceKeys`: if this
    // device came from the provisioning coordinator, deliver it to whoever
    // is awaiting that code. A no-op for ordinary (non-linked) key uploads.
    state
        .provisioning_manager
        .complete_with_keys(
            "",
            authenticated_device.device().registration_id(),
            authenticated_device.device().clone(),
        )
        .await;

    Ok(())
}

/// Handler for the DELETE v1/accounts/me endpoint.
#[debug_handler]
async fn delete_account_endpoint(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    authenticated_device: AuthenticatedDevice,
) -> Result<(), ApiError> {
    handle_delete_account(state, authenticated_device).await
}

/// Handler for the DELETE v1/devices/{device_id} endpoint.
#[debug_handler]
async fn delete_device_endpoint(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    Path(device_id): Path<u32>,
    authenticated_device: AuthenticatedDevice,
) -> Result<(), ApiError> {
    handle_delete_device(state, device_id, authenticated_device).await
}

/// Handler for the GET v1/devices/provisioning/code endpoint.
#[debug_handler]
async fn get_link_device_token(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    authenticated_device: AuthenticatedDevice,
) -> Result<LinkDeviceToken, ApiError> {
    handle_get_link_device_token(state, authenticated_device).await
}

/// Handler for the POST v1/devices/link endpoint.
#[debug_handler]
async fn post_link_device_endpoint(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    TypedHeader(Authorization(basic)): TypedHeader<Authorization<Basic>>,
    Json(link_device_request): Json<LinkDeviceRequest>,
) -> Result<LinkDeviceResponse, ApiError> {
    handle_post_link_device(state, basic, link_device_request).await
}

/// Handler for the GET v1/devices/provisioning/{uuid} endpoint: advertises the pending link, waits for the primary device's
/// identity bundle, mints a code, and returns the encrypted provision
/// envelope.
#[debug_handler]
async fn get_device_provisioning_endpoint(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    Path(device_uuid): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Vec<u8>, ApiError> {
    let pub_key_b64 = params.get("pub_key").ok_or_else(|| ApiError {
        status_code: StatusCode::BAD_REQUEST,
        body: "missing pub_key query parameter".to_owned(),
    })?;
    let pub_key_bytes = BASE64_URL_SAFE.decode(pub_key_b64).map_err(|_| ApiError {
        status_code: StatusCode::BAD_REQUEST,
        body: "pub_key is not valid base64".to_owned(),
    })?;
    let recipient_pub = libsignal_protocol::PublicKey::deserialize(&pub_key_bytes).map_err(|_| ApiError {
        status_code: StatusCode::BAD_REQUEST,
        body: "pub_key is not a valid curve25519 public key".to_owned(),
    })?;

    let response = state
        .provisioning_manager
        .push_pending_provision(device_uuid.clone(), pub_key_bytes.clone())
        .await
        .map_err(|_| ApiError {
            status_code: StatusCode::GATEWAY_TIMEOUT,
            body: "ProvisionTimeout".to_owned(),
        })?;

    let code: String = {
        let mut raw = [0u8; 16];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut raw);
        hex::encode(raw)
    };
    let rx = state
        .provisioning_manager
        .install_code(&device_uuid, code.clone(), response.primary_device_aci.clone())
        .await;
    state
        .provisioning_manager
        .spawn_completion_watcher(code.clone(), rx);

    let provision_message = common::signalservice::ProvisionMessage {
        aci_identity_key_private: Some(response.primary_device_identity_private),
        pni_identity_key_private: None,
        number: Some(response.primary_device_phone_number),
        aci: Some(response.primary_device_aci),
        pni: response.primary_device_pni,
        provisioning_code: Some(code),
        profile_key: Some(response.profile_key),
        read_receipts: Some(true),
        user_agent: None,
        provisioning_version: Some(1),
    };
    let plaintext = {
        use prost::Message;
        provision_message.encode_to_vec()
    };

    let envelope = encrypt_provision_message(&plaintext, &recipient_pub).map_err(internal)?;
    use prost::Message;
    Ok(envelope.encode_to_vec())
}

/// Handler for the PUT v1/devices/{code} endpoint.
#[debug_handler]
async fn put_device_by_code_endpoint(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    Path(code): Path<String>,
    TypedHeader(Authorization(basic)): TypedHeader<Authorization<Basic>>,
    Json(link_device_request): Json<LinkDeviceRequest>,
) -> Result<Json<LinkDeviceResponse>, ApiError> {
    let aci_str = state
        .provisioning_manager
        .account_for_code(&code)
        .await
        .ok_or(ApiError {
            status_code: StatusCode::FORBIDDEN,
            body: "".to_owned(),
        })?;
    let aci = ServiceId::parse_from_service_id_string(&aci_str).ok_or(ApiError {
        status_code: StatusCode::FORBIDDEN,
        body: "".to_owned(),
    })?;

    let account = state
        .account_manager
        .get_account(&aci)
        .await
        .map_err(|_| ApiError {
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
            body: "".to_owned(),
        })?;

    let device = add_linked_device(
        &state,
        &aci,
        &account,
        basic.password(),
        link_device_request.account_attributes,
        link_device_request.device_activation_request,
    )
    .await?;

    // "device-registered": re-key the pending result channel
    // under this device's registration id now that it exists.
    if !state
        .provisioning_manager
        .register_device_by_code(&code, device.registration_id())
        .await
    {
        return Err(ApiError {
            status_code: StatusCode::GONE,
            body: "".to_owned(),
        });
    }

    Ok(Json(LinkDeviceResponse {
        aci: account.aci().service_id_string(),
        pni: account.pni().service_id_string(),
        device_id: u32::from(device.device_id()),
    }))
}

/// Websocket upgrade handler for the unauthenticated provisioning socket:
/// the server mints and hands out a uuid over the socket itself rather than
/// requiring the caller to invent one, then the rest of the linking flow
/// proceeds exactly as it does for a caller-chosen uuid over
/// `GET /v1/devices/provisioning/{uuid}`.
#[debug_handler]
async fn provisioning_websocket_endpoint(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(|mut socket| async move {
        let device_uuid = uuid::Uuid::new_v4().to_string();
        if socket
            .send(Message::Text(device_uuid.clone()))
            .await
            .is_err()
        {
            tracing::warn!("provisioning websocket closed before uuid could be sent");
            return;
        }
        tracing::info!(%device_uuid, "provisioning websocket issued uuid");
    })
}

/// Websocket upgrade handler '/v1/websocket'
#[debug_handler]
async fn create_websocket_endpoint(
    State(mut state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    authenticated_device: AuthenticatedDevice,
    ws: WebSocketUpgrade,
    user_agent: Option<TypedHeader<headers::UserAgent>>,
    ConnectInfo(socket_addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    let user_agent = match user_agent {
        Some(TypedHeader(user_agent)) => user_agent.to_string(),
        None => "Unknown browser".to_string(),
    };

    tracing::info!(%user_agent, %socket_addr, "websocket connected");

    ws.on_upgrade(move |socket| {
        let mut websocket_manager = state.websocket_manager.clone();
        async move {
            let signal_websocket = SignalWebSocket::new(socket);
            let (sender, receiver) = signal_websocket.split();

            // Create websocket connection
            let websocket = WebSocketConnection::new(
                UserIdentity::AuthenticatedDevice(authenticated_device.into()),
                socket_addr,
                sender,
                state.clone(),
            );

            let address = websocket.protocol_address();

            // Listen for new messages
            websocket_manager.listen(websocket, receiver).await;

            // Check if webSocket upgrade was successful
            let Some(websocket_manager) = websocket_manager.get(&address).await else {
                tracing::warn!("ws.on_upgrade: WebSocket does not exist in WebSocketManager");
                return;
            };

            // Send all persisted message to new connected device
            websocket_manager.lock().await.send_persisted().await;

            state
                .message_manager
                .add_message_availability_listener(&address, websocket_manager.clone())
                .await;

            let _ = state
                .client_presence_manager
                .set_present(&address, websocket_manager)
                .await;
        }
    })
}

#[debug_handler]
pub async fn get_keepalive(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    authenticated_device: AuthenticatedDevice,
) -> impl IntoResponse {
    handle_keepalive(&state, &authenticated_device).await
}

/// Handler for the GET /v1/certificate/delivery endpoint.
#[debug_handler]
async fn get_delivery_certificate_endpoint(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    authenticated_device: AuthenticatedDevice,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (server_cert, signing_key) =
        generate_server_certificate(1, &state.config.trust_root.private_key).map_err(internal)?;
    let expiration = time_now()? as u64 + Duration::from_secs(86400).as_millis() as u64;
    let sender_cert = generate_sender_certificate(
        &server_cert,
        &signing_key.private_key,
        &authenticated_device.account().aci().service_id_string(),
        authenticated_device.account().phone_number(),
        authenticated_device.device().device_id(),
        &authenticated_device.account().aci_identity_key(),
        expiration,
    )
    .map_err(internal)?;

    use prost::Message;
    Ok(Json(serde_json::json!({
        "certificate": BASE64_STANDARD.encode(sender_cert.encode_to_vec()),
    })))
}

/// Handler for `PUT /v1/groups`: creates a group.
#[debug_handler]
async fn put_group_endpoint(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    _authenticated_device: AuthenticatedDevice,
    GroupAuth(presentation): GroupAuth,
    Path(group_id): Path<String>,
    body: Bytes,
) -> Result<(), ApiError> {
    let group_id = parse_b64(&group_id)?;
    verify_group_auth(&state, &group_id, &presentation)?;
    state
        .group_manager
        .create(group_id, body.to_vec().into_boxed_slice())
        .await
        .map_err(|existing| ApiError {
            status_code: StatusCode::CONFLICT,
            body: serde_json::to_string(&existing).unwrap_or_default(),
        })
}

/// Checks a `Group-Auth` presentation against the group-credential server
/// secret params, minted deterministically from `ServerConfig::zk_params`.
fn verify_group_auth(
    state: &SignalServerState<InMemoryDatabase, SignalWebSocket>,
    group_id: &[u8],
    presentation: &[u8],
) -> Result<(), ApiError> {
    let params = ServerSecretParams::from_bytes(&state.config.zk_params.zk_secret);
    if params.verify_presentation(group_id, presentation) {
        Ok(())
    } else {
        Err(ApiError {
            status_code: StatusCode::UNAUTHORIZED,
            body: "invalid group credential presentation".to_owned(),
        })
    }
}

/// Handler for `GET /v1/groups/{groupId}`.
#[debug_handler]
async fn get_group_endpoint(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    _authenticated_device: AuthenticatedDevice,
    Path(group_id): Path<String>,
) -> Result<Json<GroupState>, ApiError> {
    let group_id = parse_b64(&group_id)?;
    state
        .group_manager
        .get_state(&group_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError {
            status_code: StatusCode::NOT_FOUND,
            body: "no such group".to_owned(),
        })
}

/// Handler for `PATCH /v1/groups/{groupId}`.
#[debug_handler]
async fn patch_group_endpoint(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    _authenticated_device: AuthenticatedDevice,
    GroupAuth(presentation): GroupAuth,
    Path(group_id): Path<String>,
    Json(change): Json<GroupChange>,
) -> Result<(), ApiError> {
    let group_id_bytes = parse_b64(&group_id)?;
    verify_group_auth(&state, &group_id_bytes, &presentation)?;
    state
        .group_manager
        .apply_change(&group_id_bytes, change.change.clone(), change)
        .await
        .map_err(|conflict| ApiError {
            status_code: StatusCode::CONFLICT,
            body: serde_json::to_string(&conflict).unwrap_or_default(),
        })
}

/// Handler for `GET /v1/groups/logs/{groupId}/{fromVersion}`.
#[debug_handler]
async fn get_group_log_endpoint(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    _authenticated_device: AuthenticatedDevice,
    Path((group_id, from_version)): Path<(String, u32)>,
) -> Result<Json<GroupChangeLog>, ApiError> {
    let group_id = parse_b64(&group_id)?;
    Ok(Json(
        state.group_manager.change_log_since(&group_id, from_version).await,
    ))
}

/// Handler for `GET /v1/storage/manifest`.
#[debug_handler]
async fn get_storage_manifest_endpoint(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    authenticated_device: AuthenticatedDevice,
) -> Result<Json<StorageManifest>, ApiError> {
    state
        .storage_service_manager
        .get_manifest(&authenticated_device.account().aci())
        .await
        .map(Json)
        .ok_or_else(|| ApiError {
            status_code: StatusCode::NOT_FOUND,
            body: "no stored manifest".to_owned(),
        })
}

/// Handler for `GET /v1/storage/manifest/version/{version}`: a non-blocking
/// conditional fetch, returning 204 if the stored manifest is not newer
/// than `version`.
#[debug_handler]
async fn get_storage_manifest_version_endpoint(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    authenticated_device: AuthenticatedDevice,
    Path(version): Path<u64>,
) -> Result<Response, ApiError> {
    match state
        .storage_service_manager
        .get_manifest_if_newer(&authenticated_device.account().aci(), version)
        .await
    {
        Some(manifest) => Ok(Json(manifest).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// Handler for `PUT /v1/storage`.
#[debug_handler]
async fn put_storage_endpoint(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    authenticated_device: AuthenticatedDevice,
    Json(operation): Json<WriteOperation>,
) -> Result<(), ApiError> {
    state
        .storage_service_manager
        .apply_write(&authenticated_device.account().aci(), operation)
        .await
        .map_err(|conflict| ApiError {
            status_code: StatusCode::CONFLICT,
            body: serde_json::to_string(&conflict).unwrap_or_default(),
        })
}

/// Handler for `PUT /v1/storage/read`.
#[debug_handler]
async fn read_storage_items_endpoint(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    authenticated_device: AuthenticatedDevice,
    Json(operation): Json<ReadOperation>,
) -> Result<Json<StorageItems>, ApiError> {
    Ok(Json(
        state
            .storage_service_manager
            .read_items(&authenticated_device.account().aci(), operation)
            .await,
    ))
}

/// Handler for `PUT /v1/accounts/username_hash/reserve`.
#[debug_handler]
async fn reserve_username_hash_endpoint(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    authenticated_device: AuthenticatedDevice,
    Json(request): Json<UsernameHashRequest>,
) -> Result<Json<UsernameHashResponse>, ApiError> {
    state
        .username_manager
        .reserve(&authenticated_device, request.username_hashes)
        .await
        .map(|username_hash| Json(UsernameHashResponse { username_hash }))
}

/// Handler for `PUT /v1/accounts/username_hash/confirm`.
#[debug_handler]
async fn confirm_username_hash_endpoint(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    authenticated_device: AuthenticatedDevice,
    Json(request): Json<UsernameHashConfirmRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let zk_params = ServerSecretParams::from_bytes(&state.config.zk_params.generic_zk_secret);
    let link = state
        .username_manager
        .confirm(&authenticated_device, request.username_hash, &request.zk_proof, &zk_params)
        .await?;
    Ok(Json(serde_json::json!({ "usernameLinkHandle": link })))
}

/// Handler for `DELETE /v1/accounts/username_hash`.
#[debug_handler]
async fn delete_username_hash_endpoint(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    authenticated_device: AuthenticatedDevice,
) -> Result<(), ApiError> {
    state.username_manager.delete(&authenticated_device).await
}

/// Handler for `GET /v1/accounts/username_hash/{hash}`.
#[debug_handler]
async fn lookup_username_hash_endpoint(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    _authenticated_device: AuthenticatedDevice,
    Path(hash): Path<String>,
) -> Result<String, ApiError> {
    state
        .username_manager
        .lookup(&hash)
        .await
        .map(|service_id| service_id.service_id_string())
}

/// Handler for `POST /v3/attachments/form/upload`.
#[debug_handler]
async fn create_attachment_upload_form_endpoint(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    _authenticated_device: AuthenticatedDevice,
) -> Json<AttachmentUploadForm> {
    Json(state.attachment_manager.create_upload_form("/attachments").await)
}

/// Handler for `PUT /attachments/{cdnKey}`.
#[debug_handler]
async fn put_attachment_endpoint(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    Path(cdn_key): Path<String>,
    body: Bytes,
) -> Result<(), ApiError> {
    let encrypted = encrypt_attachment(&body).map_err(internal)?;
    state
        .attachment_manager
        .store(&cdn_key, encrypted.blob)
        .await
        .then_some(())
        .ok_or_else(|| ApiError {
            status_code: StatusCode::NOT_FOUND,
            body: "unknown cdn key".to_owned(),
        })
}

/// Handler for `GET /attachments/{cdnKey}`.
#[debug_handler]
async fn get_attachment_endpoint(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    Path(cdn_key): Path<String>,
) -> Result<Vec<u8>, ApiError> {
    state
        .attachment_manager
        .fetch(&cdn_key)
        .await
        .ok_or_else(|| ApiError {
            status_code: StatusCode::NOT_FOUND,
            body: "unknown cdn key".to_owned(),
        })
}

/// Handler for `PUT /v1/archives/backupid`.
#[debug_handler]
async fn put_backup_id_endpoint(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    authenticated_device: AuthenticatedDevice,
    zk_auth: BackupZkAuth,
    Json(request): Json<SetBackupIdRequest>,
) -> Result<(), ApiError> {
    verify_backup_zk_auth(&state, &authenticated_device, &zk_auth)?;
    state
        .backup_manager
        .set_backup_id(
            authenticated_device.account().aci(),
            request.messages_backup_auth_credential_request,
            request.media_backup_auth_credential_request,
        )
        .await;
    Ok(())
}

/// Handler for `PUT /v1/archives/keys`.
#[debug_handler]
async fn put_backup_key_endpoint(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    authenticated_device: AuthenticatedDevice,
    zk_auth: BackupZkAuth,
    Json(request): Json<SetBackupKeyRequest>,
) -> Result<(), ApiError> {
    verify_backup_zk_auth(&state, &authenticated_device, &zk_auth)?;
    state
        .backup_manager
        .set_backup_key(authenticated_device.account().aci(), request.backup_id_public_key)
        .await;
    Ok(())
}

/// Checks the dual `x-signal-zk-auth`/`x-signal-zk-auth-signature` headers
/// against the backup server secret params, binding the presentation to the
/// caller's own ACI.
fn verify_backup_zk_auth(
    state: &SignalServerState<InMemoryDatabase, SignalWebSocket>,
    authenticated_device: &AuthenticatedDevice,
    zk_auth: &BackupZkAuth,
) -> Result<(), ApiError> {
    let params = ServerSecretParams::from_bytes(&state.config.zk_params.backup_zk_secret);
    let subject = [
        authenticated_device.account().aci().service_id_string().as_bytes(),
        &zk_auth.auth,
    ]
    .concat();
    if params.verify_presentation(&subject, &zk_auth.signature) {
        Ok(())
    } else {
        Err(ApiError {
            status_code: StatusCode::UNAUTHORIZED,
            body: "invalid backup credential presentation".to_owned(),
        })
    }
}

/// Handler for `PUT /v1/call-link`.
#[debug_handler]
async fn put_call_link_endpoint(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    _authenticated_device: AuthenticatedDevice,
    Json(request): Json<CreateCallLinkRequest>,
) -> Result<Json<CallLinkStateResponse>, ApiError> {
    let params = ServerSecretParams::from_bytes(&state.config.zk_params.generic_zk_secret);
    if !params.verify_presentation(&request.room_id, &request.create_call_link_credential_presentation) {
        return Err(ApiError {
            status_code: StatusCode::UNAUTHORIZED,
            body: "invalid call link credential presentation".to_owned(),
        });
    }
    state
        .backup_manager
        .create_call_link(request.room_id, request.admin_passkey, CallLinkRestrictions::None)
        .await
        .map(Json)
        .map_err(|existing| ApiError {
            status_code: StatusCode::CONFLICT,
            body: serde_json::to_string(&existing).unwrap_or_default(),
        })
}

/// Handler for `GET /v1/call-link/{roomId}`.
#[debug_handler]
async fn get_call_link_endpoint(
    State(state): State<SignalServerState<InMemoryDatabase, SignalWebSocket>>,
    _authenticated_device: AuthenticatedDevice,
    Path(room_id): Path<String>,
) -> Result<Json<CallLinkStateResponse>, ApiError> {
    let room_id = parse_b64(&room_id)?;
    state
        .backup_manager
        .get_call_link(&room_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError {
            status_code: StatusCode::NOT_FOUND,
            body: "no such call link".to_owned(),
        })
}

async fn signal_time_middleware(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;

    response.headers_mut().insert(
        "x-signal-timestamp",
        HeaderValue::from(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("Time went backwards")
                .as_millis() as u64,
        ),
    );

    response
}

/// Builds the full router over an already-constructed `SignalServerState`,
/// shared between `start_server` and the test façade.
pub fn build_router(
    state: SignalServerState<InMemoryDatabase, SignalWebSocket>,
) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .max_age(Duration::from_secs(5184000))
        .allow_credentials(true)
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            CONTENT_LENGTH,
            ACCEPT,
            ORIGIN,
            HeaderName::from_static("x-requested-with"),
            HeaderName::from_static("x-signal-agent"),
        ]);

    Router::new()
        .route("/", get(|| async { "Hello from Signal Server" }))
        .route("/v1/identifier/:phone_number", get(get_identifier_endpoint))
        .route("/v1/messages/:destination", put(put_messages_endpoint))
        .route("/v1/messages", get(get_messages_endpoint))
        .route("/v1/messages/uuid/:guid", delete(delete_message_ack_endpoint))
        .route("/v1/registration", post(post_registration_endpoint))
        .route(
            "/v2/keys/:identifier/:device_id",
            get(get_keys_id_device_id),
        )
        .route("/v2/keys", get(get_keys))
        .route("/v2/keys/check", post(post_keycheck_endpoint))
        .route("/v2/keys", put(put_keys_endpoint))
        .route("/v1/accounts/me", delete(delete_account_endpoint))
        .route("/v1/devices/provisioning/code", get(get_link_device_token))
        .route("/v1/devices/provisioning/:uuid", get(get_device_provisioning_endpoint))
        .route("/v1/devices/link", post(post_link_device_endpoint))
        .route("/v1/devices/:code", put(put_device_by_code_endpoint))
        .route("/v1/devices/:device_id", delete(delete_device_endpoint))
        .route("/v1/websocket", any(create_websocket_endpoint))
        .route(
            "/v1/websocket/provisioning/",
            any(provisioning_websocket_endpoint),
        )
        .route("/v1/keepalive", get(get_keepalive))
        .route("/v1/certificate/delivery", get(get_delivery_certificate_endpoint))
        .route("/v1/groups/:group_id", put(put_group_endpoint))
        .route("/v1/groups/:group_id", get(get_group_endpoint))
        .route("/v1/groups/:group_id", patch(patch_group_endpoint))
        .route("/v1/groups/logs/:group_id/:from_version", get(get_group_log_endpoint))
        .route("/v1/storage/manifest", get(get_storage_manifest_endpoint))
        .route("/v1/storage/manifest/version/:version", get(get_storage_manifest_version_endpoint))
        .route("/v1/storage", put(put_storage_endpoint))
        .route("/v1/storage/read", put(read_storage_items_endpoint))
        .route("/v1/accounts/username_hash/reserve", put(reserve_username_hash_endpoint))
        .route("/v1/accounts/username_hash/confirm", put(confirm_username_hash_endpoint))
        .route("/v1/accounts/username_hash", delete(delete_username_hash_endpoint))
        .route("/v1/accounts/username_hash/:hash", get(lookup_username_hash_endpoint))
        .route("/v3/attachments/form/upload", post(create_attachment_upload_form_endpoint))
        .route("/attachments/:cdn_key", put(put_attachment_endpoint))
        .route("/attachments/:cdn_key", get(get_attachment_endpoint))
        .route("/v1/archives/backupid", put(put_backup_id_endpoint))
        .route("/v1/archives/keys", put(put_backup_key_endpoint))
        .route("/v1/call-link", put(put_call_link_endpoint))
        .route("/v1/call-link/:room_id", get(get_call_link_endpoint))
        .with_state(state)
        .layer(CompressionLayer::new().gzip(true))
        .layer(cors)
        .layer(from_fn(signal_time_middleware))
}

/// To add a new endpoint:
///  * create an async router function: `<method>_<endpoint_name>_endpoint`.
///  * create an async handler function: `handle_<method>_<endpoint_name>`
///  * add the router function to the axum router below.
///  * call the handler function from the router function to handle the request.
pub async fn start_server(use_tls: bool) -> Result<(), Box<dyn std::error::Error>> {
    if use_tls {
        rustls::crypto::ring::default_provider()
            .install_default()
            .expect("Failed to install rustls crypto provider");
    }

    let config = crate::config::ServerConfig::from_env()?;
    let address = config.address.clone();
    let https_port = config.https_port.clone();
    let http_port = config.http_port.clone();

    let state = SignalServerState::<InMemoryDatabase, SignalWebSocket>::new(config);
    let app = build_router(state)
        .into_make_service_with_connect_info::<SocketAddr>();

    let http_addr = SocketAddr::from_str(format!("{}:{}", address, http_port).as_str())?;
    let https_addr = SocketAddr::from_str(format!("{}:{}", address, https_port).as_str())?;

    // we should probably sometime in future a proxy or something to redirect instead

    if use_tls {
        tokio::spawn(redirect_http_to_https(
            http_addr,
            http_port.parse()?,
            https_port.parse()?,
        ));
        let tls_config = RustlsConfig::from_pem_file("cert/server.crt", "cert/server.key").await?;
        axum_server::bind_rustls(https_addr, tls_config)
            .serve(app)
            .await?;
    } else {
        axum_server::bind(http_addr).serve(app).await?;
    }

    Ok(())
}

fn time_now() -> Result<u128, ApiError> {
    Ok(SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_err(|_| ApiError {
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
            body: "".into(),
        })?
        .as_millis())
}

fn get_kind(identity_string: String) -> Result<ServiceIdKind, ApiError> {
    match identity_string.as_str() {
        "aci" | "ACI" | "" => Ok(ServiceIdKind::Aci),
        "pni" | "PNI" => Ok(ServiceIdKind::Pni),
        _ => {
             Err(ApiError {
                status_code: StatusCode::BAD_REQUEST,
                body: "Identity type needs to be either of: aci | pni | ACI | PNI or none which will default to aci".into(),
            })
        }
    }
}

#[cfg(test)]
mod server_tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::test_utils::key::new_device_pre_key_bundle;
    use crate::test_utils::user::{new_account_and_address, new_device};
    use base64::prelude::{Engine as _, BASE64_STANDARD};
    use common::web_api::{SignalMessage, UploadSignedPreKey};

    fn test_state() -> SignalServerState<InMemoryDatabase, SignalWebSocket> {
        SignalServerState::new(ServerConfig::for_test())
    }

    fn signed_pre_key() -> UploadSignedPreKey {
        UploadSignedPreKey {
            key_id: 1,
            public_key: Box::new([1, 2, 3, 4]),
            signature: Box::new([1, 2, 3, 4]),
        }
    }

    #[tokio::test]
    async fn handle_register_account_registers_account() {
        let state = test_state();
        let identity = libsignal_protocol::IdentityKeyPair::generate(&mut rand::rngs::OsRng);
        let identity_b64 = BASE64_STANDARD.encode(identity.identity_key().serialize());

        let registration = RegistrationRequest::for_test(
            AccountAttributes {
                name: None,
                registration_id: 1,
                pni_registration_id: 1,
                capabilities: Default::default(),
                fetches_messages: true,
            },
            identity_b64.clone(),
            identity_b64,
            signed_pre_key(),
            signed_pre_key(),
            signed_pre_key(),
            signed_pre_key(),
        );

        let auth_header = BasicAuthorizationHeader::new("+15551234567".to_owned(), "hunter2".to_owned());
        let response = handle_post_registration(state, auth_header, registration)
            .await
            .expect("registration should succeed");
        assert_eq!(response.number, "+15551234567");
    }

    #[tokio::test]
    async fn handle_get_keys_gets_keys() {
        let state = test_state();
        let (account, device, address) = new_account_and_address(&state.db).await;
        state
            .account_manager
            .store_key_bundle(ServiceIdKind::Aci, &new_device_pre_key_bundle(), &address)
            .await
            .unwrap();

        let authenticated_device = AuthenticatedDevice::new(account.clone(), device);
        let response = state
            .key_manager
            .handle_get_keys_id_device_id(
                &state.db,
                &authenticated_device,
                ServiceId::Aci(account.aci()),
                "1".to_owned(),
            )
            .await
            .unwrap();
        assert_eq!(response.identity_key, account.aci_identity_key().serialize());
    }

    #[tokio::test]
    async fn handle_delete_account_deletes_account() {
        let state = test_state();
        let (account, device, _) = new_account_and_address(&state.db).await;
        let authenticated_device = AuthenticatedDevice::new(account.clone(), device);
        handle_delete_account(state.clone(), authenticated_device).await.unwrap();
        assert!(state
            .account_manager
            .get_account(&ServiceId::Aci(account.aci()))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn handle_delete_device_deletes_device() {
        let state = test_state();
        let (mut account, primary, _) = new_account_and_address(&state.db).await;
        let second = new_device(2.into());
        account.add_device(second.clone());
        state.db.add_device(&ServiceId::Aci(account.aci()), &second).await.unwrap();

        let authenticated_device = AuthenticatedDevice::new(account.clone(), primary);
        handle_delete_device(state.clone(), 2, authenticated_device).await.unwrap();

        let address = ProtocolAddress::new(account.aci().service_id_string(), 2.into());
        assert!(state.db.get_device(&address).await.is_err());
    }

    #[tokio::test]
    async fn handle_put_messages_rejects_mismatched_devices() {
        let state = test_state();
        let (sender_account, sender_device, _) = new_account_and_address(&state.db).await;
        let (destination_account, _, _) = new_account_and_address(&state.db).await;
        let authenticated_device = AuthenticatedDevice::new(sender_account, sender_device);

        let payload = MessageList {
            messages: vec![SignalMessage {
                r#type: 1,
                destination_device_id: 99,
                destination_registration_id: 1,
                content: BASE64_STANDARD.encode(b"hi"),
            }],
            online: false,
            urgent: true,
            timestamp: 1,
        };

        let result = handle_put_messages(
            &state,
            &authenticated_device,
            &ServiceId::Aci(destination_account.aci()),
            payload,
        )
        .await;
        assert!(result.is_err());
    }
}
