//! Wire types shared between the server and client halves of loomsync.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Server wall-clock milliseconds. Monotone per collection by construction
/// of the write path (§3): each append reads the clock inside the same
/// transaction that inserts the delta row.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
	pub fn now() -> Self {
		let millis = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.map(|d| d.as_millis() as u64)
			.unwrap_or(0);
		Timestamp(millis)
	}

	pub fn zero() -> Self {
		Timestamp(0)
	}
}

impl std::fmt::Display for Timestamp {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Tag describing what a `stream()` response page carries (§4.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationType {
	Delta,
	Snapshot,
	Diff,
}

/// The three mutation shapes accepted by the dual-storage writer (§4.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
	Insert,
	Update,
	Delete,
}

/// An append-only server log row (§3 Document).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Delta {
	pub collection: String,
	pub document_id: String,
	pub crdt_bytes: Vec<u8>,
	pub version: u64,
	pub timestamp: Timestamp,
}

/// A merged-update row produced by the compactor (§3 Snapshot).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
	pub collection: String,
	pub snapshot_bytes: Vec<u8>,
	pub latest_compaction_timestamp: Timestamp,
	pub created_at: Timestamp,
}

/// One page of a `stream()` response: either a run of deltas or one snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StreamChange {
	Delta(Delta),
	Snapshot(Snapshot),
}

impl StreamChange {
	pub fn operation_type(&self) -> OperationType {
		match self {
			StreamChange::Delta(_) => OperationType::Delta,
			StreamChange::Snapshot(_) => OperationType::Snapshot,
		}
	}
}

/// Response envelope for `stream(collection, checkpoint, limit, vector?)` (§4.2, §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamResponse {
	pub changes: Vec<StreamChange>,
	pub checkpoint: Checkpoint,
	pub has_more: bool,
}

/// Response of `getInitialState(collection)` (§4.2, §6): `None` if the
/// collection has no deltas and no snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialState {
	pub crdt_bytes: Vec<u8>,
	pub checkpoint: Checkpoint,
}

/// The client's durable per-collection watermark (§3 Checkpoint, §4.5).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
	pub last_modified: Timestamp,
}

impl Checkpoint {
	pub fn zero() -> Self {
		Checkpoint { last_modified: Timestamp::zero() }
	}
}

/// Server-read-table record keyed by `id` (§3 Materialized record).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MaterializedRecord {
	pub id: String,
	pub fields: serde_json::Value,
	pub version: u64,
	pub timestamp: Timestamp,
}

/// Result of a successful `insert`/`update`/`remove` call (§4.3, §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationMetadata {
	pub document_id: String,
	pub timestamp: Timestamp,
	pub version: u64,
	pub collection: String,
}

/// A durable outbox entry (§3 Outbox entry).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutboxEntry {
	pub idempotency_key: String,
	pub collection: String,
	pub kind: MutationKind,
	pub document_id: String,
	pub materialized_doc: serde_json::Value,
	pub crdt_bytes: Vec<u8>,
	pub version: u64,
	pub created_at: Timestamp,
}

/// Locally persisted protocol metadata (§3 Protocol metadata).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct ProtocolMeta {
	pub protocol_version: u32,
}
