//! Redb-based checkpoint, outbox, and protocol metadata storage for the
//! client half of loomsync.
//!
//! # Storage layout
//! - `checkpoints`: `collection` → JSON [`Checkpoint`].
//! - `outbox`: `"{created_at:020}|{seq:020}"` → JSON [`OutboxEntry`], with the sequence
//!   suffix breaking ties within the same millisecond so FIFO drain order survives a restart.
//! - `client_ids`: `collection` → the persisted 31-bit Yjs client id as a decimal string.
//! - `meta`: a single `"protocol"` row → JSON [`ProtocolMeta`].

mod error;
pub use error::Error;

use async_trait::async_trait;
use loomsync_types::prelude::*;
use rand::Rng;
use redb::{ReadableDatabase, ReadableTable};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

mod tables {
	use redb::TableDefinition;

	pub const TABLE_CHECKPOINTS: TableDefinition<&str, &str> = TableDefinition::new("checkpoints");
	pub const TABLE_OUTBOX: TableDefinition<&str, &str> = TableDefinition::new("outbox");
	pub const TABLE_CLIENT_IDS: TableDefinition<&str, &str> = TableDefinition::new("client_ids");
	pub const TABLE_META: TableDefinition<&str, &str> = TableDefinition::new("meta");
}
use tables::*;

const PROTOCOL_META_KEY: &str = "protocol";

fn outbox_key(created_at: Timestamp, seq: u64) -> String {
	format!("{:020}|{:020}", created_at.0, seq)
}

/// A [`CheckpointStore`] + [`OutboxStore`] + [`ClientMetaStore`] backed by a
/// single redb database file.
pub struct ClientStoreRedb {
	db: Arc<redb::Database>,
	outbox_seq: AtomicU64,
}

impl ClientStoreRedb {
	pub fn open(path: impl AsRef<Path>) -> LsResult<Self> {
		if let Some(parent) = path.as_ref().parent() {
			std::fs::create_dir_all(parent).map_err(|e| Error::Io(e.to_string()))?;
		}
		let db = redb::Database::create(path).map_err(|e| Error::Db(e.to_string()))?;
		{
			let tx = db.begin_write().map_err(|e| Error::Db(e.to_string()))?;
			let _ = tx.open_table(TABLE_CHECKPOINTS);
			let _ = tx.open_table(TABLE_OUTBOX);
			let _ = tx.open_table(TABLE_CLIENT_IDS);
			let _ = tx.open_table(TABLE_META);
			tx.commit().map_err(|e| Error::Db(e.to_string()))?;
		}
		Ok(Self { db: Arc::new(db), outbox_seq: AtomicU64::new(0) })
	}
}

impl std::fmt::Debug for ClientStoreRedb {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ClientStoreRedb").finish_non_exhaustive()
	}
}

#[async_trait]
impl CheckpointStore for ClientStoreRedb {
	async fn save(&self, collection: &str, checkpoint: Checkpoint) -> LsResult<()> {
		let current = self.load(collection).await?;
		if checkpoint.last_modified < current.last_modified {
			tracing::trace!(collection, "checkpoint save skipped: not monotone");
			return Ok(());
		}

		let json = serde_json::to_string(&checkpoint).map_err(Error::from)?;
		let tx = self.db.begin_write().map_err(|e| Error::Db(e.to_string()))?;
		{
			let mut table = tx.open_table(TABLE_CHECKPOINTS).map_err(|e| Error::Db(e.to_string()))?;
			table.insert(collection, json.as_str()).map_err(|e| Error::Db(e.to_string()))?;
		}
		tx.commit().map_err(|e| Error::Db(e.to_string()))?;
		Ok(())
	}

	async fn load(&self, collection: &str) -> LsResult<Checkpoint> {
		let tx = self.db.begin_read().map_err(|e| Error::Db(e.to_string()))?;
		let table = tx.open_table(TABLE_CHECKPOINTS).map_err(|e| Error::Db(e.to_string()))?;
		match table.get(collection).map_err(|e| Error::Db(e.to_string()))? {
			Some(value) => Ok(serde_json::from_str(value.value()).map_err(Error::from)?),
			None => Ok(Checkpoint::zero()),
		}
	}

	async fn clear(&self, collection: &str) -> LsResult<()> {
		let tx = self.db.begin_write().map_err(|e| Error::Db(e.to_string()))?;
		{
			let mut table = tx.open_table(TABLE_CHECKPOINTS).map_err(|e| Error::Db(e.to_string()))?;
			table.remove(collection).map_err(|e| Error::Db(e.to_string()))?;
		}
		tx.commit().map_err(|e| Error::Db(e.to_string()))?;
		Ok(())
	}
}

#[async_trait]
impl OutboxStore for ClientStoreRedb {
	async fn enqueue(&self, entry: OutboxEntry) -> LsResult<()> {
		let seq = self.outbox_seq.fetch_add(1, Ordering::SeqCst);
		let key = outbox_key(entry.created_at, seq);
		let json = serde_json::to_string(&entry).map_err(Error::from)?;

		let tx = self.db.begin_write().map_err(|e| Error::Db(e.to_string()))?;
		{
			let mut table = tx.open_table(TABLE_OUTBOX).map_err(|e| Error::Db(e.to_string()))?;
			table.insert(key.as_str(), json.as_str()).map_err(|e| Error::Db(e.to_string()))?;
		}
		tx.commit().map_err(|e| Error::Db(e.to_string()))?;
		tracing::debug!(idempotency_key = %entry.idempotency_key, "outbox entry enqueued");
		Ok(())
	}

	async fn list(&self) -> LsResult<Vec<OutboxEntry>> {
		let tx = self.db.begin_read().map_err(|e| Error::Db(e.to_string()))?;
		let table = tx.open_table(TABLE_OUTBOX).map_err(|e| Error::Db(e.to_string()))?;
		let mut out = Vec::new();
		for item in table.iter().map_err(|e| Error::Db(e.to_string()))? {
			let (_, value) = item.map_err(|e| Error::Db(e.to_string()))?;
			out.push(serde_json::from_str(value.value()).map_err(Error::from)?);
		}
		Ok(out)
	}

	async fn remove(&self, idempotency_key: &str) -> LsResult<()> {
		let tx = self.db.begin_write().map_err(|e| Error::Db(e.to_string()))?;
		{
			let mut table = tx.open_table(TABLE_OUTBOX).map_err(|e| Error::Db(e.to_string()))?;
			let keys_to_remove: Vec<String> = {
				let mut found = Vec::new();
				for item in table.iter().map_err(|e| Error::Db(e.to_string()))? {
					let (key, value) = item.map_err(|e| Error::Db(e.to_string()))?;
					let entry: OutboxEntry = serde_json::from_str(value.value()).map_err(Error::from)?;
					if entry.idempotency_key == idempotency_key {
						found.push(key.value().to_string());
					}
				}
				found
			};
			for key in keys_to_remove {
				table.remove(key.as_str()).map_err(|e| Error::Db(e.to_string()))?;
			}
		}
		tx.commit().map_err(|e| Error::Db(e.to_string()))?;
		Ok(())
	}
}

#[async_trait]
impl ClientMetaStore for ClientStoreRedb {
	async fn client_id(&self, collection: &str) -> LsResult<u32> {
		{
			let tx = self.db.begin_read().map_err(|e| Error::Db(e.to_string()))?;
			let table = tx.open_table(TABLE_CLIENT_IDS).map_err(|e| Error::Db(e.to_string()))?;
			if let Some(value) = table.get(collection).map_err(|e| Error::Db(e.to_string()))? {
				let id: u32 = value.value().parse().map_err(|_| Error::Serialization("corrupt client id".to_string()))?;
				return Ok(id);
			}
		}

		let fresh: u32 = rand::rng().random::<u32>() & 0x7FFF_FFFF;
		let tx = self.db.begin_write().map_err(|e| Error::Db(e.to_string()))?;
		{
			let mut table = tx.open_table(TABLE_CLIENT_IDS).map_err(|e| Error::Db(e.to_string()))?;
			table.insert(collection, fresh.to_string().as_str()).map_err(|e| Error::Db(e.to_string()))?;
		}
		tx.commit().map_err(|e| Error::Db(e.to_string()))?;
		tracing::debug!(collection, client_id = fresh, "generated fresh CRDT client id");
		Ok(fresh)
	}

	async fn load_protocol_meta(&self) -> LsResult<ProtocolMeta> {
		let tx = self.db.begin_read().map_err(|e| Error::Db(e.to_string()))?;
		let table = tx.open_table(TABLE_META).map_err(|e| Error::Db(e.to_string()))?;
		match table.get(PROTOCOL_META_KEY).map_err(|e| Error::Db(e.to_string()))? {
			Some(value) => Ok(serde_json::from_str(value.value()).map_err(Error::from)?),
			None => Ok(ProtocolMeta::default()),
		}
	}

	async fn save_protocol_meta(&self, meta: ProtocolMeta) -> LsResult<()> {
		let json = serde_json::to_string(&meta).map_err(Error::from)?;
		let tx = self.db.begin_write().map_err(|e| Error::Db(e.to_string()))?;
		{
			let mut table = tx.open_table(TABLE_META).map_err(|e| Error::Db(e.to_string()))?;
			table.insert(PROTOCOL_META_KEY, json.as_str()).map_err(|e| Error::Db(e.to_string()))?;
		}
		tx.commit().map_err(|e| Error::Db(e.to_string()))?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn store() -> ClientStoreRedb {
		let dir = tempfile::tempdir().unwrap();
		ClientStoreRedb::open(dir.keep().join("client.redb")).unwrap()
	}

	#[tokio::test]
	async fn checkpoint_defaults_to_zero() {
		let store = store();
		assert_eq!(store.load("notes").await.unwrap(), Checkpoint::zero());
	}

	#[tokio::test]
	async fn checkpoint_save_is_monotone() {
		let store = store();
		store.save("notes", Checkpoint { last_modified: Timestamp(100) }).await.unwrap();
		store.save("notes", Checkpoint { last_modified: Timestamp(50) }).await.unwrap();
		assert_eq!(store.load("notes").await.unwrap().last_modified, Timestamp(100));

		store.save("notes", Checkpoint { last_modified: Timestamp(150) }).await.unwrap();
		assert_eq!(store.load("notes").await.unwrap().last_modified, Timestamp(150));
	}

	#[tokio::test]
	async fn outbox_fifo_order_and_removal() {
		let store = store();
		for i in 0..3u64 {
			store
				.enqueue(OutboxEntry {
					idempotency_key: format!("key-{i}"),
					collection: "notes".to_string(),
					kind: MutationKind::Insert,
					document_id: format!("doc-{i}"),
					materialized_doc: serde_json::json!({}),
					crdt_bytes: vec![i as u8],
					version: i,
					created_at: Timestamp(i),
				})
				.await
				.unwrap();
		}

		let entries = store.list().await.unwrap();
		assert_eq!(entries.len(), 3);
		assert_eq!(entries[0].idempotency_key, "key-0");

		store.remove("key-1").await.unwrap();
		let remaining = store.list().await.unwrap();
		assert_eq!(remaining.len(), 2);
		assert!(remaining.iter().all(|e| e.idempotency_key != "key-1"));
	}

	#[tokio::test]
	async fn client_id_is_persisted_and_31_bit() {
		let store = store();
		let id = store.client_id("notes").await.unwrap();
		assert!(id <= 0x7FFF_FFFF);
		assert_eq!(store.client_id("notes").await.unwrap(), id);
	}

	#[tokio::test]
	async fn protocol_meta_round_trips() {
		let store = store();
		assert_eq!(store.load_protocol_meta().await.unwrap().protocol_version, 0);
		store.save_protocol_meta(ProtocolMeta { protocol_version: 3 }).await.unwrap();
		assert_eq!(store.load_protocol_meta().await.unwrap().protocol_version, 3);
	}
}
