//! `axum` routes implementing the server wire contract (§6): `stream`,
//! `getInitialState`, `insert`/`update`/`remove`, `getProtocolVersion`.

use crate::app::App;
use crate::error::LsResult;
use crate::writer::MutationRequest;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use loomsync_types::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub fn router(app: Arc<App>) -> Router {
	Router::new()
		.route("/collections/{collection}/stream", post(stream))
		.route("/collections/{collection}/initial-state", get(get_initial_state))
		.route("/collections/{collection}/insert", post(insert))
		.route("/collections/{collection}/update", post(update))
		.route("/collections/{collection}/remove", post(remove))
		.route("/protocol-version", get(protocol_version))
		.route("/ws/stream/{collection}", get(crate::websocket::handle_upgrade))
		.with_state(app)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
	#[serde(default)]
	pub checkpoint: Checkpoint,
	#[serde(default = "default_limit")]
	pub limit: usize,
}

fn default_limit() -> usize {
	500
}

async fn stream(
	State(app): State<Arc<App>>,
	Path(collection): Path<String>,
	Json(request): Json<StreamRequest>,
) -> LsResult<Json<StreamResponse>> {
	Ok(Json(app.stream(&collection, request.checkpoint, request.limit).await?))
}

async fn get_initial_state(
	State(app): State<Arc<App>>,
	Path(collection): Path<String>,
) -> LsResult<Json<Option<InitialState>>> {
	Ok(Json(app.get_initial_state(&collection).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationRequestBody {
	pub document_id: String,
	pub crdt_bytes: Vec<u8>,
	#[serde(default)]
	pub materialized_doc: serde_json::Value,
	pub version: u64,
	#[serde(default)]
	pub schema_version: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationResponse {
	pub success: bool,
	pub metadata: MutationMetadata,
}

async fn insert(
	state: State<Arc<App>>,
	path: Path<String>,
	body: Json<MutationRequestBody>,
) -> LsResult<Json<MutationResponse>> {
	mutate(state, path, body, MutationKind::Insert).await
}

async fn update(
	state: State<Arc<App>>,
	path: Path<String>,
	body: Json<MutationRequestBody>,
) -> LsResult<Json<MutationResponse>> {
	mutate(state, path, body, MutationKind::Update).await
}

async fn remove(
	state: State<Arc<App>>,
	path: Path<String>,
	body: Json<MutationRequestBody>,
) -> LsResult<Json<MutationResponse>> {
	mutate(state, path, body, MutationKind::Delete).await
}

async fn mutate(
	State(app): State<Arc<App>>,
	Path(collection): Path<String>,
	Json(body): Json<MutationRequestBody>,
	kind: MutationKind,
) -> LsResult<Json<MutationResponse>> {
	let request = MutationRequest {
		document_id: body.document_id,
		crdt_bytes: body.crdt_bytes,
		materialized_doc: body.materialized_doc,
		version: body.version,
		schema_version: body.schema_version,
	};
	let metadata = app.apply_mutation(&collection, kind, request).await?;
	Ok(Json(MutationResponse { success: true, metadata }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProtocolVersionResponse {
	protocol_version: u32,
}

async fn protocol_version(State(app): State<Arc<App>>) -> Json<ProtocolVersionResponse> {
	Json(ProtocolVersionResponse { protocol_version: app.protocol_version() })
}

// vim: ts=4
