//! Storage adapter traits.
//!
//! Every durable side-effect in loomsync — the server's event log and
//! materialized read table, and the client's checkpoint/outbox/protocol
//! metadata — goes through one of these traits. Concrete backends live in
//! `adapters/`; `loomsync-server` and `loomsync-client` depend only on the
//! traits, never on a specific storage backend.

use crate::error::LsResult;
use crate::types::{Checkpoint, Delta, MaterializedRecord, OutboxEntry, ProtocolMeta, Snapshot};
use async_trait::async_trait;
use std::fmt::Debug;

/// Server-side durable store backing the event log (C2), the dual-storage
/// writer (C3), and the compactor (C4).
///
/// `append_delta_and_upsert`/`append_delta_and_remove` are the only ways
/// the writer should persist a mutation: each commits the new delta and
/// the materialized read-table change in one transaction, so a crash or
/// error between the two is impossible (§3 invariant: "the server appends
/// exactly one delta and either inserts or upserts exactly one read-table
/// record"). The redb adapter implements this by opening a single
/// `WriteTransaction` across both tables. `append_delta`, `upsert_record`,
/// and `remove_record` remain as standalone primitives for callers (the
/// compactor, tests) that don't need the combined atomicity.
#[async_trait]
pub trait ServerStore: Debug + Send + Sync {
	/// Append a new delta. The timestamp is assigned by the store at
	/// insert time, not supplied by the caller (§4.2).
	async fn append_delta(
		&self,
		collection: &str,
		document_id: &str,
		crdt_bytes: Vec<u8>,
		version: u64,
	) -> LsResult<Delta>;

	/// Append a delta and upsert the materialized record it produced in one
	/// transaction (§4.3).
	async fn append_delta_and_upsert(
		&self,
		collection: &str,
		document_id: &str,
		crdt_bytes: Vec<u8>,
		version: u64,
		build_record: Box<dyn FnOnce(crate::types::Timestamp) -> MaterializedRecord + Send>,
	) -> LsResult<Delta>;

	/// Append a delta and remove the materialized record it produced in one
	/// transaction (§4.3).
	async fn append_delta_and_remove(
		&self,
		collection: &str,
		document_id: &str,
		crdt_bytes: Vec<u8>,
		version: u64,
	) -> LsResult<Delta>;

	/// Deltas with `timestamp > since`, ascending, capped at `limit`.
	async fn deltas_since(&self, collection: &str, since: crate::types::Timestamp, limit: usize) -> LsResult<Vec<Delta>>;

	/// The oldest delta still retained for a collection, if any.
	async fn oldest_delta(&self, collection: &str) -> LsResult<Option<Delta>>;

	/// All deltas strictly older than `cutoff`, ascending by timestamp.
	async fn deltas_older_than(&self, collection: &str, cutoff: crate::types::Timestamp) -> LsResult<Vec<Delta>>;

	/// All deltas for a collection, ascending by timestamp (SSR / `getInitialState`).
	async fn all_deltas(&self, collection: &str) -> LsResult<Vec<Delta>>;

	/// Delete a set of deltas identified by `(document_id, version, timestamp)`
	/// after they have been folded into a snapshot.
	async fn delete_deltas(&self, collection: &str, deltas: &[Delta]) -> LsResult<()>;

	/// Insert a newly computed snapshot row.
	async fn insert_snapshot(&self, snapshot: Snapshot) -> LsResult<()>;

	/// The most recently created snapshot for a collection, if any.
	async fn latest_snapshot(&self, collection: &str) -> LsResult<Option<Snapshot>>;

	/// All snapshots for a collection, newest first (for pruning).
	async fn list_snapshots(&self, collection: &str) -> LsResult<Vec<Snapshot>>;

	/// Delete one snapshot by its `created_at` key.
	async fn delete_snapshot(&self, collection: &str, created_at: crate::types::Timestamp) -> LsResult<()>;

	/// Upsert a materialized record keyed by `id`.
	async fn upsert_record(&self, collection: &str, record: MaterializedRecord) -> LsResult<()>;

	/// Remove a materialized record by `id`.
	async fn remove_record(&self, collection: &str, id: &str) -> LsResult<()>;

	/// Fetch a materialized record by `id`.
	async fn get_record(&self, collection: &str, id: &str) -> LsResult<Option<MaterializedRecord>>;
}

/// Client-side durable per-collection watermark store (C5).
#[async_trait]
pub trait CheckpointStore: Debug + Send + Sync {
	/// Persist a checkpoint. Implementations MUST refuse (no-op) a write
	/// whose `last_modified` is strictly less than the stored value — the
	/// checkpoint is monotone (§4.5).
	async fn save(&self, collection: &str, checkpoint: Checkpoint) -> LsResult<()>;

	/// Load the stored checkpoint, or `{last_modified: 0}` if absent.
	async fn load(&self, collection: &str) -> LsResult<Checkpoint>;

	/// Forget the stored checkpoint for a collection.
	async fn clear(&self, collection: &str) -> LsResult<()>;
}

/// Client-side durable outbox (C9).
#[async_trait]
pub trait OutboxStore: Debug + Send + Sync {
	/// Append an entry. Idempotency keys are assigned by the caller and are
	/// never transmitted to the server.
	async fn enqueue(&self, entry: OutboxEntry) -> LsResult<()>;

	/// All pending entries, in FIFO order.
	async fn list(&self) -> LsResult<Vec<OutboxEntry>>;

	/// Remove an entry once its mutation has been acknowledged.
	async fn remove(&self, idempotency_key: &str) -> LsResult<()>;
}

/// Client-side persistence for the Yjs client id and the negotiated
/// protocol version (§3, §6 key layout).
#[async_trait]
pub trait ClientMetaStore: Debug + Send + Sync {
	/// Load the persisted 31-bit Yjs client id for a collection, creating
	/// and persisting a fresh random one on first use.
	async fn client_id(&self, collection: &str) -> LsResult<u32>;

	async fn load_protocol_meta(&self) -> LsResult<ProtocolMeta>;

	async fn save_protocol_meta(&self, meta: ProtocolMeta) -> LsResult<()>;
}
