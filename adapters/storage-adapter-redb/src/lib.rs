//! Redb-based event log, snapshot, and materialized view storage.
//!
//! Implements [`loomsync_types::adapters::ServerStore`] against three redb
//! tables in a single database file. Every key embeds the collection name
//! as a `"{collection}|..."` prefix so a single file serves every
//! collection, the same layout `rtdb-adapter-redb` uses for its `docs`
//! table.
//!
//! # Storage layout
//! - `deltas`: `"{collection}|{timestamp:020}|{document_id}|{version}"` → JSON [`Delta`]. The
//!   zero-padded timestamp makes lexicographic key order equal to the `by_timestamp` index the
//!   event log needs for `stream()`.
//! - `snapshots`: `"{collection}|{created_at:020}"` → JSON [`Snapshot`].
//! - `records`: `"{collection}|{id}"` → JSON [`MaterializedRecord`].

mod error;
pub use error::Error;

use async_trait::async_trait;
use loomsync_types::prelude::*;
use redb::{ReadableDatabase, ReadableTable};
use std::path::Path;
use std::sync::Arc;

mod tables {
	use redb::TableDefinition;

	pub const TABLE_DELTAS: TableDefinition<&str, &str> = TableDefinition::new("deltas");
	pub const TABLE_SNAPSHOTS: TableDefinition<&str, &str> = TableDefinition::new("snapshots");
	pub const TABLE_RECORDS: TableDefinition<&str, &str> = TableDefinition::new("records");
}
use tables::*;

fn delta_key(collection: &str, timestamp: Timestamp, document_id: &str, version: u64) -> String {
	format!("{collection}|{:020}|{document_id}|{version}", timestamp.0)
}

fn snapshot_key(collection: &str, created_at: Timestamp) -> String {
	format!("{collection}|{:020}", created_at.0)
}

fn record_key(collection: &str, id: &str) -> String {
	format!("{collection}|{id}")
}

/// A [`ServerStore`] backed by a single redb database file.
pub struct ServerStoreRedb {
	db: Arc<redb::Database>,
}

impl ServerStoreRedb {
	pub fn open(path: impl AsRef<Path>) -> LsResult<Self> {
		if let Some(parent) = path.as_ref().parent() {
			std::fs::create_dir_all(parent).map_err(|e| Error::Io(e.to_string()))?;
		}
		let db = redb::Database::create(path).map_err(|e| Error::Db(e.to_string()))?;
		{
			let tx = db.begin_write().map_err(|e| Error::Db(e.to_string()))?;
			let _ = tx.open_table(TABLE_DELTAS);
			let _ = tx.open_table(TABLE_SNAPSHOTS);
			let _ = tx.open_table(TABLE_RECORDS);
			tx.commit().map_err(|e| Error::Db(e.to_string()))?;
		}
		Ok(Self { db: Arc::new(db) })
	}
}

impl std::fmt::Debug for ServerStoreRedb {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ServerStoreRedb").finish_non_exhaustive()
	}
}

#[async_trait]
impl ServerStore for ServerStoreRedb {
	async fn append_delta(
		&self,
		collection: &str,
		document_id: &str,
		crdt_bytes: Vec<u8>,
		version: u64,
	) -> LsResult<Delta> {
		let timestamp = Timestamp::now();
		let delta = Delta { collection: collection.to_string(), document_id: document_id.to_string(), crdt_bytes, version, timestamp };
		let key = delta_key(collection, timestamp, document_id, version);
		let json = serde_json::to_string(&delta).map_err(Error::from)?;

		let tx = self.db.begin_write().map_err(|e| Error::Db(e.to_string()))?;
		{
			let mut table = tx.open_table(TABLE_DELTAS).map_err(|e| Error::Db(e.to_string()))?;
			table.insert(key.as_str(), json.as_str()).map_err(|e| Error::Db(e.to_string()))?;
		}
		tx.commit().map_err(|e| Error::Db(e.to_string()))?;

		tracing::trace!(collection, document_id, version, "appended delta");
		Ok(delta)
	}

	async fn append_delta_and_upsert(
		&self,
		collection: &str,
		document_id: &str,
		crdt_bytes: Vec<u8>,
		version: u64,
		build_record: Box<dyn FnOnce(Timestamp) -> MaterializedRecord + Send>,
	) -> LsResult<Delta> {
		let timestamp = Timestamp::now();
		let delta = Delta { collection: collection.to_string(), document_id: document_id.to_string(), crdt_bytes, version, timestamp };
		let delta_row_key = delta_key(collection, timestamp, document_id, version);
		let delta_json = serde_json::to_string(&delta).map_err(Error::from)?;

		let record = build_record(timestamp);
		let record_row_key = record_key(collection, &record.id);
		let record_json = serde_json::to_string(&record).map_err(Error::from)?;

		let tx = self.db.begin_write().map_err(|e| Error::Db(e.to_string()))?;
		{
			let mut deltas = tx.open_table(TABLE_DELTAS).map_err(|e| Error::Db(e.to_string()))?;
			deltas.insert(delta_row_key.as_str(), delta_json.as_str()).map_err(|e| Error::Db(e.to_string()))?;
			let mut records = tx.open_table(TABLE_RECORDS).map_err(|e| Error::Db(e.to_string()))?;
			records.insert(record_row_key.as_str(), record_json.as_str()).map_err(|e| Error::Db(e.to_string()))?;
		}
		tx.commit().map_err(|e| Error::Db(e.to_string()))?;

		tracing::trace!(collection, document_id, version, "appended delta and upserted record");
		Ok(delta)
	}

	async fn append_delta_and_remove(
		&self,
		collection: &str,
		document_id: &str,
		crdt_bytes: Vec<u8>,
		version: u64,
	) -> LsResult<Delta> {
		let timestamp = Timestamp::now();
		let delta = Delta { collection: collection.to_string(), document_id: document_id.to_string(), crdt_bytes, version, timestamp };
		let delta_row_key = delta_key(collection, timestamp, document_id, version);
		let delta_json = serde_json::to_string(&delta).map_err(Error::from)?;
		let record_row_key = record_key(collection, document_id);

		let tx = self.db.begin_write().map_err(|e| Error::Db(e.to_string()))?;
		{
			let mut deltas = tx.open_table(TABLE_DELTAS).map_err(|e| Error::Db(e.to_string()))?;
			deltas.insert(delta_row_key.as_str(), delta_json.as_str()).map_err(|e| Error::Db(e.to_string()))?;
			let mut records = tx.open_table(TABLE_RECORDS).map_err(|e| Error::Db(e.to_string()))?;
			records.remove(record_row_key.as_str()).map_err(|e| Error::Db(e.to_string()))?;
		}
		tx.commit().map_err(|e| Error::Db(e.to_string()))?;

		tracing::trace!(collection, document_id, version, "appended delta and removed record");
		Ok(delta)
	}

	async fn deltas_since(&self, collection: &str, since: Timestamp, limit: usize) -> LsResult<Vec<Delta>> {
		let prefix = format!("{collection}|");
		let tx = self.db.begin_read().map_err(|e| Error::Db(e.to_string()))?;
		let table = tx.open_table(TABLE_DELTAS).map_err(|e| Error::Db(e.to_string()))?;
		let range = table.range(prefix.as_str()..).map_err(|e| Error::Db(e.to_string()))?;

		let mut out = Vec::new();
		for item in range {
			let (key, value) = item.map_err(|e| Error::Db(e.to_string()))?;
			if !key.value().starts_with(&prefix) {
				break;
			}
			let delta: Delta = serde_json::from_str(value.value()).map_err(Error::from)?;
			if delta.timestamp > since {
				out.push(delta);
				if out.len() >= limit {
					break;
				}
			}
		}
		Ok(out)
	}

	async fn oldest_delta(&self, collection: &str) -> LsResult<Option<Delta>> {
		let prefix = format!("{collection}|");
		let tx = self.db.begin_read().map_err(|e| Error::Db(e.to_string()))?;
		let table = tx.open_table(TABLE_DELTAS).map_err(|e| Error::Db(e.to_string()))?;
		let mut range = table.range(prefix.as_str()..).map_err(|e| Error::Db(e.to_string()))?;

		match range.next() {
			Some(item) => {
				let (key, value) = item.map_err(|e| Error::Db(e.to_string()))?;
				if !key.value().starts_with(&prefix) {
					return Ok(None);
				}
				let delta: Delta = serde_json::from_str(value.value()).map_err(Error::from)?;
				Ok(Some(delta))
			}
			None => Ok(None),
		}
	}

	async fn deltas_older_than(&self, collection: &str, cutoff: Timestamp) -> LsResult<Vec<Delta>> {
		let prefix = format!("{collection}|");
		let tx = self.db.begin_read().map_err(|e| Error::Db(e.to_string()))?;
		let table = tx.open_table(TABLE_DELTAS).map_err(|e| Error::Db(e.to_string()))?;
		let range = table.range(prefix.as_str()..).map_err(|e| Error::Db(e.to_string()))?;

		let mut out = Vec::new();
		for item in range {
			let (key, value) = item.map_err(|e| Error::Db(e.to_string()))?;
			if !key.value().starts_with(&prefix) {
				break;
			}
			let delta: Delta = serde_json::from_str(value.value()).map_err(Error::from)?;
			if delta.timestamp >= cutoff {
				break;
			}
			out.push(delta);
		}
		Ok(out)
	}

	async fn all_deltas(&self, collection: &str) -> LsResult<Vec<Delta>> {
		let prefix = format!("{collection}|");
		let tx = self.db.begin_read().map_err(|e| Error::Db(e.to_string()))?;
		let table = tx.open_table(TABLE_DELTAS).map_err(|e| Error::Db(e.to_string()))?;
		let range = table.range(prefix.as_str()..).map_err(|e| Error::Db(e.to_string()))?;

		let mut out = Vec::new();
		for item in range {
			let (key, value) = item.map_err(|e| Error::Db(e.to_string()))?;
			if !key.value().starts_with(&prefix) {
				break;
			}
			out.push(serde_json::from_str(value.value()).map_err(Error::from)?);
		}
		Ok(out)
	}

	async fn delete_deltas(&self, collection: &str, deltas: &[Delta]) -> LsResult<()> {
		let tx = self.db.begin_write().map_err(|e| Error::Db(e.to_string()))?;
		{
			let mut table = tx.open_table(TABLE_DELTAS).map_err(|e| Error::Db(e.to_string()))?;
			for delta in deltas {
				let key = delta_key(collection, delta.timestamp, &delta.document_id, delta.version);
				table.remove(key.as_str()).map_err(|e| Error::Db(e.to_string()))?;
			}
		}
		tx.commit().map_err(|e| Error::Db(e.to_string()))?;
		tracing::debug!(collection, count = deltas.len(), "deleted compacted deltas");
		Ok(())
	}

	async fn insert_snapshot(&self, snapshot: Snapshot) -> LsResult<()> {
		let key = snapshot_key(&snapshot.collection, snapshot.created_at);
		let json = serde_json::to_string(&snapshot).map_err(Error::from)?;
		let tx = self.db.begin_write().map_err(|e| Error::Db(e.to_string()))?;
		{
			let mut table = tx.open_table(TABLE_SNAPSHOTS).map_err(|e| Error::Db(e.to_string()))?;
			table.insert(key.as_str(), json.as_str()).map_err(|e| Error::Db(e.to_string()))?;
		}
		tx.commit().map_err(|e| Error::Db(e.to_string()))?;
		Ok(())
	}

	async fn latest_snapshot(&self, collection: &str) -> LsResult<Option<Snapshot>> {
		let snapshots = self.list_snapshots(collection).await?;
		Ok(snapshots.into_iter().next())
	}

	async fn list_snapshots(&self, collection: &str) -> LsResult<Vec<Snapshot>> {
		let prefix = format!("{collection}|");
		let tx = self.db.begin_read().map_err(|e| Error::Db(e.to_string()))?;
		let table = tx.open_table(TABLE_SNAPSHOTS).map_err(|e| Error::Db(e.to_string()))?;
		let range = table.range(prefix.as_str()..).map_err(|e| Error::Db(e.to_string()))?;

		let mut out = Vec::new();
		for item in range {
			let (key, value) = item.map_err(|e| Error::Db(e.to_string()))?;
			if !key.value().starts_with(&prefix) {
				break;
			}
			out.push(serde_json::from_str::<Snapshot>(value.value()).map_err(Error::from)?);
		}
		out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
		Ok(out)
	}

	async fn delete_snapshot(&self, collection: &str, created_at: Timestamp) -> LsResult<()> {
		let key = snapshot_key(collection, created_at);
		let tx = self.db.begin_write().map_err(|e| Error::Db(e.to_string()))?;
		{
			let mut table = tx.open_table(TABLE_SNAPSHOTS).map_err(|e| Error::Db(e.to_string()))?;
			table.remove(key.as_str()).map_err(|e| Error::Db(e.to_string()))?;
		}
		tx.commit().map_err(|e| Error::Db(e.to_string()))?;
		Ok(())
	}

	async fn upsert_record(&self, collection: &str, record: MaterializedRecord) -> LsResult<()> {
		let key = record_key(collection, &record.id);
		let json = serde_json::to_string(&record).map_err(Error::from)?;
		let tx = self.db.begin_write().map_err(|e| Error::Db(e.to_string()))?;
		{
			let mut table = tx.open_table(TABLE_RECORDS).map_err(|e| Error::Db(e.to_string()))?;
			table.insert(key.as_str(), json.as_str()).map_err(|e| Error::Db(e.to_string()))?;
		}
		tx.commit().map_err(|e| Error::Db(e.to_string()))?;
		Ok(())
	}

	async fn remove_record(&self, collection: &str, id: &str) -> LsResult<()> {
		let key = record_key(collection, id);
		let tx = self.db.begin_write().map_err(|e| Error::Db(e.to_string()))?;
		{
			let mut table = tx.open_table(TABLE_RECORDS).map_err(|e| Error::Db(e.to_string()))?;
			table.remove(key.as_str()).map_err(|e| Error::Db(e.to_string()))?;
		}
		tx.commit().map_err(|e| Error::Db(e.to_string()))?;
		Ok(())
	}

	async fn get_record(&self, collection: &str, id: &str) -> LsResult<Option<MaterializedRecord>> {
		let key = record_key(collection, id);
		let tx = self.db.begin_read().map_err(|e| Error::Db(e.to_string()))?;
		let table = tx.open_table(TABLE_RECORDS).map_err(|e| Error::Db(e.to_string()))?;
		match table.get(key.as_str()).map_err(|e| Error::Db(e.to_string()))? {
			Some(value) => Ok(Some(serde_json::from_str(value.value()).map_err(Error::from)?)),
			None => Ok(None),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn store() -> ServerStoreRedb {
		let dir = tempfile::tempdir().unwrap();
		ServerStoreRedb::open(dir.keep().join("server.redb")).unwrap()
	}

	#[tokio::test]
	async fn append_and_stream_deltas() {
		let store = store();
		store.append_delta("notes", "doc-1", vec![1, 2, 3], 1).await.unwrap();
		store.append_delta("notes", "doc-1", vec![4, 5, 6], 2).await.unwrap();

		let all = store.all_deltas("notes").await.unwrap();
		assert_eq!(all.len(), 2);
		assert!(all[0].timestamp <= all[1].timestamp);
	}

	#[tokio::test]
	async fn deltas_since_filters_and_limits() {
		let store = store();
		for i in 0..5u64 {
			store.append_delta("notes", "doc-1", vec![i as u8], i).await.unwrap();
		}
		let all = store.all_deltas("notes").await.unwrap();
		let midpoint = all[1].timestamp;
		let since = store.deltas_since("notes", midpoint, 2).await.unwrap();
		assert!(since.len() <= 2);
		assert!(since.iter().all(|d| d.timestamp > midpoint));
	}

	#[tokio::test]
	async fn snapshots_round_trip_newest_first() {
		let store = store();
		store
			.insert_snapshot(Snapshot {
				collection: "notes".to_string(),
				snapshot_bytes: vec![1],
				latest_compaction_timestamp: Timestamp(1),
				created_at: Timestamp(1),
			})
			.await
			.unwrap();
		store
			.insert_snapshot(Snapshot {
				collection: "notes".to_string(),
				snapshot_bytes: vec![2],
				latest_compaction_timestamp: Timestamp(2),
				created_at: Timestamp(2),
			})
			.await
			.unwrap();

		let latest = store.latest_snapshot("notes").await.unwrap().unwrap();
		assert_eq!(latest.created_at, Timestamp(2));
		assert_eq!(store.list_snapshots("notes").await.unwrap().len(), 2);
	}

	#[tokio::test]
	async fn append_delta_and_upsert_commits_both_rows() {
		let store = store();
		let delta = store
			.append_delta_and_upsert(
				"notes",
				"doc-1",
				vec![1, 2, 3],
				1,
				Box::new(|timestamp| MaterializedRecord {
					id: "doc-1".to_string(),
					fields: json!({"title": "a"}),
					version: 1,
					timestamp,
				}),
			)
			.await
			.unwrap();

		assert_eq!(store.all_deltas("notes").await.unwrap().len(), 1);
		let record = store.get_record("notes", "doc-1").await.unwrap().unwrap();
		assert_eq!(record.timestamp, delta.timestamp);
		assert_eq!(record.fields, json!({"title": "a"}));
	}

	#[tokio::test]
	async fn append_delta_and_remove_commits_both_rows() {
		let store = store();
		store
			.upsert_record("notes", MaterializedRecord { id: "doc-1".to_string(), fields: json!({"title": "a"}), version: 1, timestamp: Timestamp::now() })
			.await
			.unwrap();

		store.append_delta_and_remove("notes", "doc-1", vec![1], 2).await.unwrap();

		assert_eq!(store.all_deltas("notes").await.unwrap().len(), 1);
		assert!(store.get_record("notes", "doc-1").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn records_upsert_and_remove() {
		let store = store();
		let record = MaterializedRecord { id: "doc-1".to_string(), fields: json!({"title": "a"}), version: 1, timestamp: Timestamp::now() };
		store.upsert_record("notes", record.clone()).await.unwrap();
		assert_eq!(store.get_record("notes", "doc-1").await.unwrap().unwrap().fields, record.fields);

		store.remove_record("notes", "doc-1").await.unwrap();
		assert!(store.get_record("notes", "doc-1").await.unwrap().is_none());
	}
}
