use crate::domain::EventAdmissionService;
use crate::http::{domain_error_to_response, AdmissionOutcome};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use common::domain::DeviceId;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub admission: Arc<EventAdmissionService>,
}

/// `POST /` ingests events, `GET /` lists devices, `GET /health` is the liveness check
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_devices).post(receive_event))
        .route("/health", get(health))
        .with_state(state)
}

/// The body is parsed regardless of `Content-Type`; devices do not always send one.
async fn receive_event(State(state): State<AppState>, body: Bytes) -> Response {
    let value: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Request rejected: malformed JSON body");
            let mut response = (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("Malformed JSON body: {}", e) })),
            )
                .into_response();
            response.extensions_mut().insert(AdmissionOutcome {
                device_id: None,
                event_type: None,
                outcome: AdmissionOutcome::MALFORMED,
            });
            return response;
        }
    };

    let device_id = value
        .get("id")
        .and_then(DeviceId::from_json)
        .map(|id| id.to_string());
    let event_type = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string);

    let (mut response, outcome) = match state.admission.process_event(value).await {
        Ok(_) => (StatusCode::OK.into_response(), AdmissionOutcome::ACCEPTED),
        Err(e) => {
            let kind = e.kind();
            (domain_error_to_response(e), kind)
        }
    };
    response.extensions_mut().insert(AdmissionOutcome {
        device_id,
        event_type,
        outcome,
    });
    response
}

async fn list_devices(State(state): State<AppState>) -> Response {
    match state.admission.list_devices().await {
        Ok(devices) => Json(devices).into_response(),
        Err(e) => domain_error_to_response(e),
    }
}

async fn health() -> &'static str {
    "ok"
}
