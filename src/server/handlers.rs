use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use super::state::KmState;
use crate::error::{QkdError, QkdResult};
use crate::protocol::{
    messages, ConsumeRequest, CreateKeyRequest, ErrorBody, IntrusionState, IntrusionToggle,
    KeyCreatedResponse, KeyInfo, MaterialQuery, SliceResponse, StatusResponse,
};
use crate::store::{KeyRequest, KeyStore};

/// A `{error}` body with its status code
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn bad_request(message: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorBody::new(message),
        }
    }

    fn internal(message: String) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: ErrorBody::new(message),
        }
    }
}

impl From<QkdError> for ApiError {
    fn from(err: QkdError) -> Self {
        let status =
            StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            log::error!("KM operation failed: {}", err);
        }
        Self {
            status,
            body: ErrorBody::from_error(&err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Runs a store operation on the blocking pool; persistence may hit the disk.
async fn with_store<T, F>(state: &Arc<KmState>, op: F) -> Result<T, ApiError>
where
    F: FnOnce(&KeyStore) -> QkdResult<T> + Send + 'static,
    T: Send + 'static,
{
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || op(&store))
        .await
        .map_err(|e| ApiError::internal(format!("store task failed: {}", e)))?
        .map_err(ApiError::from)
}

/// Lenient JSON body: an empty body is the default value.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Option<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Some(T::default());
    }
    serde_json::from_slice(body).ok()
}

pub async fn handle_status(State(state): State<Arc<KmState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok".to_string(),
        intrusion: state.tamper.is_enabled(),
    })
}

pub async fn handle_create_key(
    State(state): State<Arc<KmState>>,
    body: Bytes,
) -> ApiResult<KeyCreatedResponse> {
    let request: CreateKeyRequest =
        parse_body(&body).ok_or_else(|| ApiError::bad_request(messages::INVALID_PARAMS))?;
    create_key(state, request).await
}

/// GET fallback for environments that block POST
pub async fn handle_create_key_get(
    State(state): State<Arc<KmState>>,
    query: Result<Query<CreateKeyRequest>, QueryRejection>,
) -> ApiResult<KeyCreatedResponse> {
    let Query(request) = query.map_err(|_| ApiError::bad_request(messages::INVALID_PARAMS))?;
    create_key(state, request).await
}

async fn create_key(
    state: Arc<KmState>,
    request: CreateKeyRequest,
) -> ApiResult<KeyCreatedResponse> {
    let length = request.length();
    if length == 0 || length > state.max_key_length {
        return Err(ApiError::bad_request(messages::INVALID_LENGTH));
    }
    let mut key_request = KeyRequest::new(request.client_id(), request.peer_id(), length);
    key_request.expires_in = request.expires_in.filter(|s| *s > 0).map(Duration::from_secs);
    key_request.max_uses = request.max_uses;

    let created = with_store(&state, move |store| store.create(key_request)).await?;
    let (sent, digest) = state.outbound(&created.material);
    Ok(Json(KeyCreatedResponse::new(&created, &sent, digest)))
}

pub async fn handle_get_key(
    State(state): State<Arc<KmState>>,
    Path(key_id): Path<String>,
) -> ApiResult<KeyInfo> {
    let meta = with_store(&state, move |store| store.lookup(&key_id)).await?;
    Ok(Json(KeyInfo::from(&meta)))
}

pub async fn handle_consume(
    State(state): State<Arc<KmState>>,
    Path(key_id): Path<String>,
    body: Bytes,
) -> ApiResult<SliceResponse> {
    let request: ConsumeRequest = serde_json::from_slice(&body)
        .map_err(|_| ApiError::bad_request(messages::INVALID_BYTES))?;
    if request.bytes == 0 {
        return Err(ApiError::bad_request(messages::INVALID_BYTES));
    }

    let consumption = with_store(&state, move |store| store.consume(&key_id, request.bytes)).await?;
    let (sent, digest) = state.outbound(&consumption.bytes);
    Ok(Json(SliceResponse::new(consumption.offset, &sent, digest)))
}

pub async fn handle_material(
    State(state): State<Arc<KmState>>,
    Path(key_id): Path<String>,
    query: Result<Query<MaterialQuery>, QueryRejection>,
) -> ApiResult<SliceResponse> {
    let Query(range) = query.map_err(|_| ApiError::bad_request(messages::INVALID_PARAMS))?;

    let slice = with_store(&state, move |store| {
        match store.peek(&key_id, range.offset, range.bytes) {
            Err(QkdError::InvalidParameter { .. }) => Ok(None),
            other => other.map(Some),
        }
    })
    .await?
    .ok_or_else(|| ApiError::bad_request(messages::RANGE_OUT_OF_BOUNDS))?;

    let (sent, digest) = state.outbound(&slice);
    Ok(Json(SliceResponse::new(range.offset, &sent, digest)))
}

pub async fn handle_get_intrusion(State(state): State<Arc<KmState>>) -> Json<IntrusionState> {
    Json(IntrusionState {
        intrusion: state.tamper.is_enabled(),
    })
}

pub async fn handle_set_intrusion(
    State(state): State<Arc<KmState>>,
    body: Bytes,
) -> ApiResult<IntrusionState> {
    let toggle: IntrusionToggle =
        parse_body(&body).ok_or_else(|| ApiError::bad_request(messages::INVALID_PARAMS))?;
    state.tamper.set_enabled(toggle.enabled);
    Ok(Json(IntrusionState {
        intrusion: state.tamper.is_enabled(),
    }))
}
