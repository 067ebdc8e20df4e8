//! Server-facing error type. Wraps [`loomsync_types::error::Error`] and maps
//! it (plus a few errors only the server side can produce) onto HTTP
//! responses, following `server/src/error.rs`'s status/code/message shape.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

pub type LsResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	Core(loomsync_types::error::Error),
	CollectionNotFound(String),
	MigrationChainGap { from_version: u32, collection: String },
}

impl From<loomsync_types::error::Error> for Error {
	fn from(err: loomsync_types::error::Error) -> Self {
		Error::Core(err)
	}
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Error::Core(err) => write!(f, "{err}"),
			Error::CollectionNotFound(name) => write!(f, "unknown collection: {name}"),
			Error::MigrationChainGap { from_version, collection } => {
				write!(f, "no migration from schema version {from_version} registered for collection {collection}")
			}
		}
	}
}

impl std::error::Error for Error {}

#[derive(Serialize)]
struct ErrorResponse {
	code: String,
	message: String,
}

impl IntoResponse for Error {
	fn into_response(self) -> axum::response::Response {
		use loomsync_types::error::Error as Core;

		let (status, code, message) = match &self {
			Error::CollectionNotFound(name) => {
				(StatusCode::NOT_FOUND, "E-CORE-NOTFOUND", format!("unknown collection: {name}"))
			}
			Error::MigrationChainGap { .. } => {
				tracing::warn!(error = %self, "migration chain gap");
				(StatusCode::INTERNAL_SERVER_ERROR, "E-SYNC-MIGRATION", "schema migration failed".to_string())
			}
			Error::Core(Core::Validation(msg) | Core::DeltaValidation(msg) | Core::SnapshotValidation(msg)) => {
				(StatusCode::UNPROCESSABLE_ENTITY, "E-SYNC-VALIDATION", msg.clone())
			}
			Error::Core(Core::GapWithoutSnapshot) => (
				StatusCode::CONFLICT,
				"E-SYNC-GAP",
				"checkpoint predates the oldest retained delta and no snapshot covers the gap".to_string(),
			),
			Error::Core(Core::VersionConflict(msg)) => (StatusCode::CONFLICT, "E-SYNC-CONFLICT", msg.clone()),
			Error::Core(Core::Auth) => {
				(StatusCode::UNAUTHORIZED, "E-AUTH-UNAUTH", "authentication required".to_string())
			}
			Error::Core(Core::ProtocolVersion { can_migrate }) => (
				StatusCode::UPGRADE_REQUIRED,
				"E-SYNC-PROTOVER",
				format!("protocol version mismatch (can_migrate={can_migrate})"),
			),
			Error::Core(Core::Storage(msg) | Core::Checkpoint(msg)) => {
				tracing::warn!(error = %msg, "storage error");
				(StatusCode::INTERNAL_SERVER_ERROR, "E-SYNC-STORAGE", "internal server error".to_string())
			}
			Error::Core(err) => {
				tracing::warn!(error = %err, "internal sync error");
				(StatusCode::INTERNAL_SERVER_ERROR, "E-SYNC-INTERNAL", "internal server error".to_string())
			}
		};

		(status, Json(ErrorResponse { code: code.to_string(), message })).into_response()
	}
}

// vim: ts=4
