//! C5 Checkpoint Store: a thin, monotone-enforcing wrapper over
//! [`CheckpointStore`] (§4.5). The monotonicity guarantee itself lives in
//! the adapter (`ClientStoreRedb::save`); this module is the stable
//! call-site surface the rest of the client depends on.

use loomsync_types::prelude::*;

/// Persist `checkpoint`, a no-op if it would move the watermark backward.
pub async fn save(store: &dyn CheckpointStore, collection: &str, checkpoint: Checkpoint) -> LsResult<()> {
	store.save(collection, checkpoint).await
}

/// Load the stored checkpoint, or `{last_modified: 0}` if none was ever saved.
pub async fn load(store: &dyn CheckpointStore, collection: &str) -> LsResult<Checkpoint> {
	store.load(collection).await
}

/// Forget the stored checkpoint, e.g. when a collection is reset.
pub async fn clear(store: &dyn CheckpointStore, collection: &str) -> LsResult<()> {
	store.clear(collection).await
}

/// Advance the stored checkpoint to `candidate` only if it is strictly
/// newer than what's currently stored, returning whether it moved.
pub async fn advance(store: &dyn CheckpointStore, collection: &str, candidate: Checkpoint) -> LsResult<bool> {
	let current = store.load(collection).await?;
	if candidate.last_modified <= current.last_modified {
		return Ok(false);
	}
	store.save(collection, candidate).await?;
	Ok(true)
}

#[cfg(test)]
mod tests {
	use super::*;
	use loomsync_kv_adapter_redb::ClientStoreRedb;

	fn store() -> ClientStoreRedb {
		let dir = tempfile::tempdir().unwrap();
		ClientStoreRedb::open(dir.keep().join("checkpoint.redb")).unwrap()
	}

	#[tokio::test]
	async fn advance_moves_forward_only() {
		let store = store();
		assert!(advance(&store, "notes", Checkpoint { last_modified: Timestamp(10) }).await.unwrap());
		assert!(!advance(&store, "notes", Checkpoint { last_modified: Timestamp(5) }).await.unwrap());
		assert_eq!(load(&store, "notes").await.unwrap().last_modified, Timestamp(10));
	}

	#[tokio::test]
	async fn clear_resets_to_zero() {
		let store = store();
		save(&store, "notes", Checkpoint { last_modified: Timestamp(10) }).await.unwrap();
		clear(&store, "notes").await.unwrap();
		assert_eq!(load(&store, "notes").await.unwrap(), Checkpoint::zero());
	}
}

// vim: ts=4
