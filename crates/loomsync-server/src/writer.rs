//! C3 Dual-Storage Writer: one server transaction per `insert`/`update`/
//! `delete` that appends a delta to the event log and upserts/removes the
//! matching materialized record (§4.3).

use crate::config::{CollectionConfig, MutationContext};
use crate::error::LsResult;
use loomsync_types::prelude::*;

/// One `insert`/`update`/`delete` request (§6 wire contract).
#[derive(Debug, Clone)]
pub struct MutationRequest {
	pub document_id: String,
	pub crdt_bytes: Vec<u8>,
	pub materialized_doc: serde_json::Value,
	pub version: u64,
	pub schema_version: Option<u32>,
}

/// Run the writer transaction for one mutation against `collection`.
///
/// Steps, exactly as §4.3 orders them:
/// 1. Migrate `materialized_doc` if the caller's `_schemaVersion` trails the
///    collection's target.
/// 2. Run the collection's `onInsert`/`onUpdate`/`onRemove` hook, if any —
///    a hook failure fails the whole mutation before anything is persisted.
/// 3. Append the delta and upsert (insert/update) or remove (delete) the
///    materialized record in one atomic store call, so the two can never
///    diverge and a failing hook never leaves a dangling write behind.
pub async fn apply_mutation(
	store: &dyn ServerStore,
	config: &CollectionConfig,
	kind: MutationKind,
	request: MutationRequest,
) -> LsResult<MutationMetadata> {
	let fields = match kind {
		MutationKind::Insert | MutationKind::Update => {
			config.migrate(request.schema_version.unwrap_or(config.schema_version), request.materialized_doc)?
		}
		MutationKind::Delete => request.materialized_doc,
	};

	let ctx = MutationContext {
		collection: config.name.clone(),
		document_id: request.document_id.clone(),
		fields: if matches!(kind, MutationKind::Delete) { serde_json::Value::Null } else { fields.clone() },
		version: request.version,
	};
	let hook = match kind {
		MutationKind::Insert => &config.on_insert,
		MutationKind::Update => &config.on_update,
		MutationKind::Delete => &config.on_remove,
	};
	if let Some(hook) = hook {
		hook(&ctx)?;
	}

	let delta = match kind {
		MutationKind::Insert | MutationKind::Update => {
			let document_id = request.document_id.clone();
			let version = request.version;
			store
				.append_delta_and_upsert(
					&config.name,
					&request.document_id,
					request.crdt_bytes,
					request.version,
					Box::new(move |timestamp| MaterializedRecord { id: document_id, fields, version, timestamp }),
				)
				.await?
		}
		MutationKind::Delete => {
			store.append_delta_and_remove(&config.name, &request.document_id, request.crdt_bytes, request.version).await?
		}
	};

	Ok(MutationMetadata {
		document_id: request.document_id,
		timestamp: delta.timestamp,
		version: request.version,
		collection: config.name.clone(),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use loomsync_storage_adapter_redb::ServerStoreRedb;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;

	fn store() -> ServerStoreRedb {
		let dir = tempfile::tempdir().unwrap();
		ServerStoreRedb::open(dir.keep().join("writer.redb")).unwrap()
	}

	#[tokio::test]
	async fn insert_appends_delta_and_upserts_record() {
		let store = store();
		let config = CollectionConfig::builder("notes").build();
		let req = MutationRequest {
			document_id: "doc-1".to_string(),
			crdt_bytes: vec![1, 2, 3],
			materialized_doc: serde_json::json!({"title": "hi"}),
			version: 1,
			schema_version: None,
		};

		let meta = apply_mutation(&store, &config, MutationKind::Insert, req).await.unwrap();
		assert_eq!(meta.document_id, "doc-1");
		assert_eq!(meta.version, 1);

		let record = store.get_record("notes", "doc-1").await.unwrap().unwrap();
		assert_eq!(record.fields, serde_json::json!({"title": "hi"}));
		assert_eq!(record.timestamp, meta.timestamp);

		let deltas = store.all_deltas("notes").await.unwrap();
		assert_eq!(deltas.len(), 1);
		assert_eq!(deltas[0].timestamp, meta.timestamp);
	}

	#[tokio::test]
	async fn delete_removes_record_but_keeps_delta() {
		let store = store();
		let config = CollectionConfig::builder("notes").build();
		let insert = MutationRequest {
			document_id: "doc-1".to_string(),
			crdt_bytes: vec![1],
			materialized_doc: serde_json::json!({"title": "hi"}),
			version: 1,
			schema_version: None,
		};
		apply_mutation(&store, &config, MutationKind::Insert, insert).await.unwrap();

		let delete = MutationRequest {
			document_id: "doc-1".to_string(),
			crdt_bytes: vec![2],
			materialized_doc: serde_json::Value::Null,
			version: 2,
			schema_version: None,
		};
		apply_mutation(&store, &config, MutationKind::Delete, delete).await.unwrap();

		assert!(store.get_record("notes", "doc-1").await.unwrap().is_none());
		assert_eq!(store.all_deltas("notes").await.unwrap().len(), 2);
	}

	#[tokio::test]
	async fn failing_hook_fails_whole_mutation() {
		let store = store();
		let config = CollectionConfig::builder("notes")
			.on_insert(|_ctx| Err(loomsync_types::error::Error::Validation("rejected".to_string()).into()))
			.build();
		let req = MutationRequest {
			document_id: "doc-1".to_string(),
			crdt_bytes: vec![1],
			materialized_doc: serde_json::json!({"title": "hi"}),
			version: 1,
			schema_version: None,
		};

		let err = apply_mutation(&store, &config, MutationKind::Insert, req).await;
		assert!(err.is_err());
		assert!(store.get_record("notes", "doc-1").await.unwrap().is_none());
		assert!(store.all_deltas("notes").await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn migration_runs_before_the_write() {
		let store = store();
		let calls = Arc::new(AtomicUsize::new(0));
		let calls_clone = calls.clone();
		let config = CollectionConfig::builder("notes")
			.schema_version(1)
			.migration(0, move |mut v| {
				calls_clone.fetch_add(1, Ordering::SeqCst);
				v["migrated"] = serde_json::json!(true);
				Ok(v)
			})
			.build();

		let req = MutationRequest {
			document_id: "doc-1".to_string(),
			crdt_bytes: vec![1],
			materialized_doc: serde_json::json!({"title": "hi"}),
			version: 1,
			schema_version: Some(0),
		};
		apply_mutation(&store, &config, MutationKind::Insert, req).await.unwrap();

		assert_eq!(calls.load(Ordering::SeqCst), 1);
		let record = store.get_record("notes", "doc-1").await.unwrap().unwrap();
		assert_eq!(record.fields["migrated"], serde_json::json!(true));
	}
}

// vim: ts=4
