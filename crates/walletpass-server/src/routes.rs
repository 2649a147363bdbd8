//! HTTP surface of the PassKit web service.

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::webservice::{LatestPass, RegisterOutcome, UpdatedSerials, WebService};

pub const PKPASS_CONTENT_TYPE: &str = "application/vnd.apple.pkpass";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub web: WebService,
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/devices/{device_library_id}/registrations/{pass_type_id}/{serial_number}",
            post(register_device).delete(unregister_device),
        )
        .route(
            "/v1/devices/{device_library_id}/registrations/{pass_type_id}",
            get(updated_serials),
        )
        .route("/v1/passes/{pass_type_id}/{serial_number}", get(latest_pass))
        .route("/v1/log", post(submit_logs))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn header_str<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// `POST /v1/devices/{device}/registrations/{pass_type}/{serial}`
async fn register_device(
    State(state): State<AppState>,
    Path((device, pass_type, serial)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let outcome = state
        .web
        .register_device(
            &device,
            &pass_type,
            &serial,
            header_str(&headers, header::AUTHORIZATION),
            &body,
        )
        .await?;

    Ok(match outcome {
        RegisterOutcome::Created => StatusCode::CREATED,
        RegisterOutcome::AlreadyRegistered => StatusCode::OK,
    })
}

/// `DELETE /v1/devices/{device}/registrations/{pass_type}/{serial}`
async fn unregister_device(
    State(state): State<AppState>,
    Path((device, pass_type, serial)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    state
        .web
        .unregister_device(
            &device,
            &pass_type,
            &serial,
            header_str(&headers, header::AUTHORIZATION),
        )
        .await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct UpdatedSerialsQuery {
    #[serde(rename = "passesUpdatedSince")]
    passes_updated_since: Option<String>,
}

/// `GET /v1/devices/{device}/registrations/{pass_type}`
async fn updated_serials(
    State(state): State<AppState>,
    Path((device, pass_type)): Path<(String, String)>,
    Query(query): Query<UpdatedSerialsQuery>,
) -> Result<Response, ApiError> {
    let result = state
        .web
        .updated_serials(&device, &pass_type, query.passes_updated_since.as_deref())
        .await?;

    Ok(match result {
        UpdatedSerials::Updated(serials) => Json(serials).into_response(),
        UpdatedSerials::NoContent => StatusCode::NO_CONTENT.into_response(),
    })
}

/// `GET /v1/passes/{pass_type}/{serial}`
async fn latest_pass(
    State(state): State<AppState>,
    Path((pass_type, serial)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let result = state
        .web
        .latest_pass(
            &pass_type,
            &serial,
            header_str(&headers, header::AUTHORIZATION),
            header_str(&headers, header::IF_MODIFIED_SINCE),
        )
        .await?;

    Ok(match result {
        LatestPass::NotModified => StatusCode::NOT_MODIFIED.into_response(),
        LatestPass::Redirect(url) => (StatusCode::FOUND, [(header::LOCATION, url)]).into_response(),
        LatestPass::Artifact {
            data,
            last_modified,
        } => (
            [
                (header::CONTENT_TYPE, PKPASS_CONTENT_TYPE.to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=pass.pkpass".to_string(),
                ),
                (header::LAST_MODIFIED, last_modified),
            ],
            data,
        )
            .into_response(),
    })
}

/// `POST /v1/log`, always 200.
async fn submit_logs(State(state): State<AppState>, body: Bytes) -> StatusCode {
    state.web.submit_logs(&body).await;
    StatusCode::OK
}

/// `GET /health`
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
