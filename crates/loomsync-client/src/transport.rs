//! The wire contract (§6) as a Rust trait, so the rest of the client
//! depends on `dyn SyncTransport` rather than a concrete RPC/REST client.
//! A concrete implementation (HTTP, WebSocket, in-process) lives outside
//! this crate; [`LoopbackTransport`] below is a test double only.

use async_trait::async_trait;
use loomsync_types::prelude::*;
use std::fmt::Debug;

#[async_trait]
pub trait SyncTransport: Debug + Send + Sync {
	async fn stream(&self, collection: &str, checkpoint: Checkpoint, limit: usize) -> LsResult<StreamResponse>;

	async fn get_initial_state(&self, collection: &str) -> LsResult<Option<InitialState>>;

	async fn mutate(
		&self,
		collection: &str,
		kind: MutationKind,
		document_id: &str,
		crdt_bytes: Vec<u8>,
		materialized_doc: serde_json::Value,
		version: u64,
		schema_version: Option<u32>,
	) -> LsResult<MutationMetadata>;

	async fn protocol_version(&self) -> LsResult<u32>;
}

/// An in-process [`SyncTransport`] backed by plain in-memory vectors,
/// mirroring the wire contract's semantics exactly (including ascending
/// pagination and `hasMore`) without any real network or storage. Used by
/// this crate's own tests; `loomsync-demo` wires a real server instead.
#[derive(Debug)]
pub struct LoopbackTransport {
	state: tokio::sync::Mutex<LoopbackState>,
	protocol_version: u32,
}

#[derive(Debug, Default)]
struct LoopbackState {
	deltas: Vec<Delta>,
	records: std::collections::HashMap<String, MaterializedRecord>,
	next_timestamp: u64,
}

impl LoopbackTransport {
	pub fn new(protocol_version: u32) -> Self {
		Self { state: tokio::sync::Mutex::new(LoopbackState::default()), protocol_version }
	}
}

#[async_trait]
impl SyncTransport for LoopbackTransport {
	async fn stream(&self, collection: &str, checkpoint: Checkpoint, limit: usize) -> LsResult<StreamResponse> {
		let state = self.state.lock().await;
		let page: Vec<Delta> = state
			.deltas
			.iter()
			.filter(|d| d.collection == collection && d.timestamp > checkpoint.last_modified)
			.take(limit)
			.cloned()
			.collect();
		match page.last() {
			Some(last) => {
				let new_checkpoint = Checkpoint { last_modified: last.timestamp };
				let has_more = page.len() == limit;
				let changes = page.into_iter().map(StreamChange::Delta).collect();
				Ok(StreamResponse { changes, checkpoint: new_checkpoint, has_more })
			}
			None => Ok(StreamResponse { changes: vec![], checkpoint, has_more: false }),
		}
	}

	async fn get_initial_state(&self, collection: &str) -> LsResult<Option<InitialState>> {
		let state = self.state.lock().await;
		let deltas: Vec<&Delta> = state.deltas.iter().filter(|d| d.collection == collection).collect();
		let Some(newest) = deltas.last() else {
			return Ok(None);
		};
		let updates: Vec<Vec<u8>> = deltas.iter().map(|d| d.crdt_bytes.clone()).collect();
		let merged = loomsync_crdt::CrdtDocument::merge_updates(0, &updates)?;
		Ok(Some(InitialState {
			crdt_bytes: merged,
			checkpoint: Checkpoint { last_modified: newest.timestamp },
		}))
	}

	async fn mutate(
		&self,
		collection: &str,
		kind: MutationKind,
		document_id: &str,
		crdt_bytes: Vec<u8>,
		materialized_doc: serde_json::Value,
		version: u64,
		_schema_version: Option<u32>,
	) -> LsResult<MutationMetadata> {
		let mut state = self.state.lock().await;
		state.next_timestamp += 1;
		let timestamp = Timestamp(state.next_timestamp);

		state.deltas.push(Delta {
			collection: collection.to_string(),
			document_id: document_id.to_string(),
			crdt_bytes,
			version,
			timestamp,
		});

		match kind {
			MutationKind::Insert | MutationKind::Update => {
				state.records.insert(
					document_id.to_string(),
					MaterializedRecord { id: document_id.to_string(), fields: materialized_doc, version, timestamp },
				);
			}
			MutationKind::Delete => {
				state.records.remove(document_id);
			}
		}

		Ok(MutationMetadata { document_id: document_id.to_string(), timestamp, version, collection: collection.to_string() })
	}

	async fn protocol_version(&self) -> LsResult<u32> {
		Ok(self.protocol_version)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn mutate_then_stream_round_trips() {
		let transport = LoopbackTransport::new(1);
		let meta = transport
			.mutate("notes", MutationKind::Insert, "doc-1", vec![1, 2, 3], serde_json::json!({"a": 1}), 1, None)
			.await
			.unwrap();
		assert_eq!(meta.document_id, "doc-1");

		let page = transport.stream("notes", Checkpoint::zero(), 10).await.unwrap();
		assert_eq!(page.changes.len(), 1);
		assert!(!page.has_more);
	}

	#[tokio::test]
	async fn initial_state_is_none_before_any_mutation() {
		let transport = LoopbackTransport::new(1);
		assert!(transport.get_initial_state("notes").await.unwrap().is_none());
	}
}

// vim: ts=4
