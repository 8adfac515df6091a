//! Read API and metrics exposition
//!
//! Every route maps directly onto a snapshot-store read; nothing here
//! mutates state. Served from the same listener as `/metrics` so the
//! endpoint stays available through device failures.

use crate::metrics::Metrics;
use crate::store::{Coordinates, DiffEntry, SnapshotStore, StoreError};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use routesnap_core::{Afi, CoordinateDiff, TableKind};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<SnapshotStore>,
    pub metrics: Arc<Metrics>,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    code: &'static str,
    message: String,
}

type ApiError = (StatusCode, Json<ErrorEnvelope>);

fn not_found(message: String) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorEnvelope {
            code: "NOT_FOUND",
            message,
        }),
    )
}

fn bad_request(message: String) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorEnvelope {
            code: "BAD_REQUEST",
            message,
        }),
    )
}

fn internal(error: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorEnvelope {
            code: "INTERNAL_ERROR",
            message: error.to_string(),
        }),
    )
}

/// Missing files are a 404, everything else a 500.
fn store_error(error: StoreError) -> ApiError {
    match &error {
        StoreError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
            not_found("no such artifact".to_string())
        }
        _ => internal(error),
    }
}

fn parse_coordinate(kind: &str, afi: &str) -> Result<(TableKind, Afi), ApiError> {
    let kind: TableKind = kind.parse().map_err(|e: routesnap_core::Error| bad_request(e.to_string()))?;
    let afi: Afi = afi.parse().map_err(|e: routesnap_core::Error| bad_request(e.to_string()))?;
    Ok((kind, afi))
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_text))
        .route("/api/devices", get(list_devices))
        .route("/api/devices/:device/tables", get(list_tables))
        .route("/api/devices/:device/:kind/:vrf/:afi/latest", get(read_latest))
        .route("/api/devices/:device/:kind/:vrf/:afi/archive", get(list_archive))
        .route("/api/devices/:device/:kind/:vrf/:afi/archive/:ts", get(read_archive))
        .route("/api/devices/:device/diffs/:vrf/:afi", get(list_diffs))
        .route("/api/devices/:device/diffs/:vrf/:afi/:ts", get(read_diff))
        .with_state(state)
}

/// Bind and serve until the process exits.
pub async fn serve(state: ApiState, port: u16) -> anyhow::Result<()> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "metrics and read API listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn metrics_text(State(state): State<ApiState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.export(),
    )
}

async fn list_devices(State(state): State<ApiState>) -> Result<Json<Vec<String>>, ApiError> {
    state.store.enumerate_devices().map(Json).map_err(internal)
}

async fn list_tables(
    State(state): State<ApiState>,
    Path(device): Path<String>,
) -> Result<Json<Coordinates>, ApiError> {
    state
        .store
        .enumerate_coordinates(&device)
        .map(Json)
        .map_err(internal)
}

async fn read_latest(
    State(state): State<ApiState>,
    Path((device, kind, vrf, afi)): Path<(String, String, String, String)>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let (kind, afi) = parse_coordinate(&kind, &afi)?;
    match state.store.read_latest::<Value>(&device, kind, &vrf, afi) {
        Ok(Some(rows)) => Ok(Json(rows)),
        Ok(None) => Err(not_found(format!(
            "no snapshot for {device}/{kind}/{vrf}.{afi}"
        ))),
        Err(e) => Err(internal(e)),
    }
}

async fn list_archive(
    State(state): State<ApiState>,
    Path((device, kind, vrf, afi)): Path<(String, String, String, String)>,
) -> Result<Json<Vec<String>>, ApiError> {
    let (kind, afi) = parse_coordinate(&kind, &afi)?;
    state
        .store
        .list_archive_timestamps(&device, kind, &vrf, afi)
        .map(Json)
        .map_err(internal)
}

async fn read_archive(
    State(state): State<ApiState>,
    Path((device, kind, vrf, afi, ts)): Path<(String, String, String, String, String)>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let (kind, afi) = parse_coordinate(&kind, &afi)?;
    state
        .store
        .read_archive::<Value>(&device, kind, &vrf, afi, &ts)
        .map(Json)
        .map_err(store_error)
}

async fn list_diffs(
    State(state): State<ApiState>,
    Path((device, vrf, afi)): Path<(String, String, String)>,
) -> Result<Json<Vec<DiffEntry>>, ApiError> {
    let afi: Afi = afi.parse().map_err(|e: routesnap_core::Error| bad_request(e.to_string()))?;
    state
        .store
        .list_diffs(&device, &vrf, afi)
        .map(Json)
        .map_err(internal)
}

async fn read_diff(
    State(state): State<ApiState>,
    Path((device, vrf, afi, ts)): Path<(String, String, String, String)>,
) -> Result<Json<CoordinateDiff>, ApiError> {
    let afi: Afi = afi.parse().map_err(|e: routesnap_core::Error| bad_request(e.to_string()))?;
    state
        .store
        .read_diff(&device, &vrf, afi, &ts)
        .map(Json)
        .map_err(store_error)
}
