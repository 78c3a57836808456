//! Thin HTTP surface: health, process snapshots, coordinate lookup
//! (spec §6, §7, §8 scenario f).

use crate::lifecycle::{ProcessSnapshot, ProcessStatus};
use crate::server::OrchestratorState;
use crate::spatial_index::{NotFound, SpatialIndex};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;

pub fn router(state: Arc<OrchestratorState>) -> Router {
	Router::new().route("/health", get(health)).route("/servers", get(servers)).route("/lookup", get(lookup)).with_state(state)
}

async fn health() -> impl IntoResponse {
	Json(serde_json::json!({ "status": "ok" }))
}

async fn servers(State(orchestrator): State<Arc<OrchestratorState>>) -> Json<Vec<ServerSnapshotResponse>> {
	Json(orchestrator.lifecycle.snapshot().into_iter().map(ServerSnapshotResponse::from).collect())
}

#[derive(Deserialize)]
struct LookupQuery {
	x: i64,
	y: i64,
}

#[derive(Serialize)]
struct LookupResponse {
	id: String,
	listen_address: SocketAddr,
	http_address: SocketAddr,
}

#[derive(Debug, Error)]
enum LookupError {
	#[error("no chunk server owns that coordinate")]
	NotFound,
}

impl IntoResponse for LookupError {
	fn into_response(self) -> Response {
		let message = self.to_string();
		match self {
			LookupError::NotFound => (StatusCode::NOT_FOUND, message),
		}
		.into_response()
	}
}

async fn lookup(State(orchestrator): State<Arc<OrchestratorState>>, Query(LookupQuery { x, y }): Query<LookupQuery>) -> Result<Json<LookupResponse>, LookupError> {
	let index = SpatialIndex::new(&orchestrator.config.world, &orchestrator.config.chunk_servers);
	index
		.lookup(x, y)
		.map(|hit| Json(LookupResponse { id: hit.server_id.to_string(), listen_address: hit.listen_address, http_address: hit.http_address }))
		.map_err(|NotFound| LookupError::NotFound)
}

#[derive(Serialize)]
struct ServerSnapshotResponse {
	id: String,
	status: &'static str,
	listen_address: SocketAddr,
	http_address: SocketAddr,
	#[serde(with = "time::serde::rfc3339::option")]
	started_at: Option<OffsetDateTime>,
	#[serde(with = "time::serde::rfc3339::option")]
	stopped_at: Option<OffsetDateTime>,
	last_error: Option<String>,
}

impl From<ProcessSnapshot> for ServerSnapshotResponse {
	fn from(snapshot: ProcessSnapshot) -> Self {
		Self {
			id: snapshot.id,
			status: status_label(snapshot.status),
			listen_address: snapshot.listen_address,
			http_address: snapshot.http_address,
			started_at: snapshot.started_at,
			stopped_at: snapshot.stopped_at,
			last_error: snapshot.last_error,
		}
	}
}

fn status_label(status: ProcessStatus) -> &'static str {
	match status {
		ProcessStatus::Starting => "starting",
		ProcessStatus::Pending => "pending",
		ProcessStatus::Running => "running",
		ProcessStatus::Exited => "exited",
		ProcessStatus::Stopped => "stopped",
	}
}
