//! C2 Event Log: paging through a collection's delta/snapshot history and
//! serving a fresh reader's initial state, against the generic
//! [`ServerStore`] trait (§4.2).

use crate::error::LsResult;
use loomsync_crdt::CrdtDocument;
use loomsync_types::error::Error as CoreError;
use loomsync_types::prelude::*;

/// `stream(collection, checkpoint, limit)` (§4.2).
///
/// 1. Up to `limit` deltas newer than `checkpoint`, ascending.
/// 2. If none and the checkpoint predates the oldest retained delta, the
///    gap has been compacted away: return the latest snapshot, or fail with
///    `GapWithoutSnapshot` if pruning outran compaction.
/// 3. Otherwise: caller is caught up, return an empty page.
pub async fn stream(
	store: &dyn ServerStore,
	collection: &str,
	checkpoint: Checkpoint,
	limit: usize,
) -> LsResult<StreamResponse> {
	let deltas = store.deltas_since(collection, checkpoint.last_modified, limit).await?;

	if let Some(last) = deltas.last() {
		let new_checkpoint = Checkpoint { last_modified: last.timestamp };
		let has_more = deltas.len() == limit;
		let changes = deltas.into_iter().map(StreamChange::Delta).collect();
		return Ok(StreamResponse { changes, checkpoint: new_checkpoint, has_more });
	}

	if let Some(oldest) = store.oldest_delta(collection).await? {
		if checkpoint.last_modified < oldest.timestamp {
			let snapshot =
				store.latest_snapshot(collection).await?.ok_or(CoreError::GapWithoutSnapshot)?;
			let new_checkpoint = Checkpoint { last_modified: snapshot.latest_compaction_timestamp };
			return Ok(StreamResponse {
				changes: vec![StreamChange::Snapshot(snapshot)],
				checkpoint: new_checkpoint,
				has_more: false,
			});
		}
	}

	Ok(StreamResponse { changes: vec![], checkpoint, has_more: false })
}

/// `getInitialState(collection)` (§4.2): the latest snapshot if one exists,
/// else every delta merged into one update, else `None` for an empty
/// collection.
pub async fn get_initial_state(store: &dyn ServerStore, collection: &str) -> LsResult<Option<InitialState>> {
	if let Some(snapshot) = store.latest_snapshot(collection).await? {
		return Ok(Some(InitialState {
			crdt_bytes: snapshot.snapshot_bytes,
			checkpoint: Checkpoint { last_modified: snapshot.latest_compaction_timestamp },
		}));
	}

	let deltas = store.all_deltas(collection).await?;
	let Some(newest) = deltas.last() else {
		return Ok(None);
	};
	let checkpoint = Checkpoint { last_modified: newest.timestamp };
	let updates: Vec<Vec<u8>> = deltas.iter().map(|d| d.crdt_bytes.clone()).collect();
	let merged = CrdtDocument::merge_updates(0, &updates)?;
	Ok(Some(InitialState { crdt_bytes: merged, checkpoint }))
}

#[cfg(test)]
mod tests {
	use super::*;
	use loomsync_storage_adapter_redb::ServerStoreRedb;

	fn store() -> ServerStoreRedb {
		let dir = tempfile::tempdir().unwrap();
		ServerStoreRedb::open(dir.keep().join("event_log.redb")).unwrap()
	}

	#[tokio::test]
	async fn stream_pages_deltas_ascending() {
		let store = store();
		for v in 1..=3u64 {
			store.append_delta("notes", "doc-1", vec![v as u8], v).await.unwrap();
			// Timestamp() has millisecond resolution; space out inserts so
			// `deltas_since`'s strict `>` filter sees each one.
			tokio::time::sleep(std::time::Duration::from_millis(2)).await;
		}

		let page = stream(&store, "notes", Checkpoint::zero(), 2).await.unwrap();
		assert_eq!(page.changes.len(), 2);
		assert!(page.has_more);

		let page2 = stream(&store, "notes", page.checkpoint, 2).await.unwrap();
		assert_eq!(page2.changes.len(), 1);
		assert!(!page2.has_more);
	}

	#[tokio::test]
	async fn stream_returns_empty_page_when_caught_up() {
		let store = store();
		store.append_delta("notes", "doc-1", vec![1], 1).await.unwrap();
		let page = stream(&store, "notes", Checkpoint::zero(), 10).await.unwrap();
		assert_eq!(page.changes.len(), 1);

		let caught_up = stream(&store, "notes", page.checkpoint, 10).await.unwrap();
		assert!(caught_up.changes.is_empty());
		assert_eq!(caught_up.checkpoint, page.checkpoint);
	}

	#[tokio::test]
	async fn stream_gap_without_snapshot_fails() {
		let store = store();
		let delta = store.append_delta("notes", "doc-1", vec![1], 1).await.unwrap();
		store.delete_deltas("notes", &[delta]).await.unwrap();
		store.append_delta("notes", "doc-1", vec![2], 2).await.unwrap();

		let err = stream(&store, "notes", Checkpoint::zero(), 10).await.unwrap_err();
		assert!(matches!(err, crate::error::Error::Core(CoreError::GapWithoutSnapshot)));
	}

	#[tokio::test]
	async fn initial_state_is_none_for_empty_collection() {
		let store = store();
		assert!(get_initial_state(&store, "notes").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn initial_state_merges_deltas_when_no_snapshot() {
		use loomsync_crdt::{ApplyOrigin, CrdtDocument};

		let store = store();
		let doc = CrdtDocument::new(1);
		let fields = serde_json::json!({"title": "a"});
		let update = doc.encode_mutation(MutationKind::Insert, "doc-1", Some(&fields)).unwrap();
		store.append_delta("notes", "doc-1", update, 1).await.unwrap();

		let state = get_initial_state(&store, "notes").await.unwrap().unwrap();
		let replay = CrdtDocument::new(2);
		replay.apply_update(&state.crdt_bytes, ApplyOrigin::Snapshot).await.unwrap();
		assert_eq!(replay.get_document("doc-1"), Some(fields));
	}
}

// vim: ts=4
