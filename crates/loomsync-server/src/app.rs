//! Server core: [`App`] holds the shared store and per-collection configs;
//! [`AppBuilder`] wires them together and starts the scheduler, mirroring
//! `core/app.rs`'s `AppBuilder::build()` tail (module init, scheduler
//! start, spawned serve loop).

use crate::config::CollectionConfig;
use crate::error::{Error, LsResult};
use crate::scheduler::Scheduler;
use crate::{compactor, event_log, writer};
use loomsync_types::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared server state: the durable store, one [`CollectionConfig`] per
/// registered collection, and the negotiated protocol version returned by
/// `getProtocolVersion()`.
pub struct App {
	store: Arc<dyn ServerStore>,
	collections: HashMap<String, Arc<CollectionConfig>>,
	protocol_version: u32,
	scheduler: Mutex<Scheduler>,
}

impl std::fmt::Debug for App {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("App")
			.field("collections", &self.collections.keys().collect::<Vec<_>>())
			.field("protocol_version", &self.protocol_version)
			.finish_non_exhaustive()
	}
}

impl App {
	fn collection(&self, name: &str) -> LsResult<&CollectionConfig> {
		self.collections.get(name).map(Arc::as_ref).ok_or_else(|| Error::CollectionNotFound(name.to_string()))
	}

	pub async fn stream(&self, collection: &str, checkpoint: Checkpoint, limit: usize) -> LsResult<StreamResponse> {
		self.collection(collection)?;
		event_log::stream(self.store.as_ref(), collection, checkpoint, limit).await
	}

	pub async fn get_initial_state(&self, collection: &str) -> LsResult<Option<InitialState>> {
		self.collection(collection)?;
		event_log::get_initial_state(self.store.as_ref(), collection).await
	}

	pub async fn apply_mutation(
		&self,
		collection: &str,
		kind: MutationKind,
		request: writer::MutationRequest,
	) -> LsResult<MutationMetadata> {
		let config = self.collection(collection)?;
		writer::apply_mutation(self.store.as_ref(), config, kind, request).await
	}

	pub fn protocol_version(&self) -> u32 {
		self.protocol_version
	}

	/// Run compaction for `collection` immediately, outside its scheduled
	/// interval (the wire contract's internal `compact(cutoffDays?)`).
	pub async fn compact_now(&self, collection: &str) -> LsResult<compactor::CompactionOutcome> {
		let config = self.collection(collection)?;
		compactor::compact(self.store.as_ref(), config).await
	}

	/// Run pruning for `collection` immediately (the wire contract's
	/// internal `prune(retentionDays?)`).
	pub async fn prune_now(&self, collection: &str) -> LsResult<usize> {
		let config = self.collection(collection)?;
		compactor::prune(self.store.as_ref(), config).await
	}

	/// Stop the background compaction/pruning tasks. Intended for tests and
	/// graceful shutdown; a dropped `App` also stops them.
	pub async fn shutdown(&self) {
		self.scheduler.lock().await.shutdown();
	}
}

/// Builds an [`App`], registering collections and starting their
/// compaction/pruning loops on [`AppBuilder::build`].
pub struct AppBuilder {
	store: Arc<dyn ServerStore>,
	collections: Vec<CollectionConfig>,
	protocol_version: u32,
}

impl AppBuilder {
	pub fn new(store: Arc<dyn ServerStore>) -> Self {
		Self { store, collections: Vec::new(), protocol_version: 0 }
	}

	pub fn protocol_version(mut self, version: u32) -> Self {
		self.protocol_version = version;
		self
	}

	pub fn collection(mut self, config: CollectionConfig) -> Self {
		self.collections.push(config);
		self
	}

	pub fn build(self) -> Arc<App> {
		let mut scheduler = Scheduler::new();
		let mut collections = HashMap::new();
		for config in self.collections {
			let config = Arc::new(config);
			scheduler.spawn_collection(self.store.clone(), config.clone());
			collections.insert(config.name.clone(), config);
		}

		Arc::new(App {
			store: self.store,
			collections,
			protocol_version: self.protocol_version,
			scheduler: Mutex::new(scheduler),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use loomsync_storage_adapter_redb::ServerStoreRedb;

	fn app() -> Arc<App> {
		let dir = tempfile::tempdir().unwrap();
		let store = ServerStoreRedb::open(dir.keep().join("app.redb")).unwrap();
		AppBuilder::new(Arc::new(store))
			.protocol_version(2)
			.collection(CollectionConfig::builder("notes").compaction_interval(std::time::Duration::from_secs(3600)).build())
			.build()
	}

	#[tokio::test]
	async fn unknown_collection_is_rejected() {
		let app = app();
		let err = app.stream("ghost", Checkpoint::zero(), 10).await.unwrap_err();
		assert!(matches!(err, Error::CollectionNotFound(_)));
	}

	#[tokio::test]
	async fn protocol_version_is_exposed() {
		assert_eq!(app().protocol_version(), 2);
	}

	#[tokio::test]
	async fn insert_then_stream_round_trips() {
		let app = app();
		let request = writer::MutationRequest {
			document_id: "doc-1".to_string(),
			crdt_bytes: vec![1, 2, 3],
			materialized_doc: serde_json::json!({"title": "hi"}),
			version: 1,
			schema_version: None,
		};
		app.apply_mutation("notes", MutationKind::Insert, request).await.unwrap();

		let page = app.stream("notes", Checkpoint::zero(), 10).await.unwrap();
		assert_eq!(page.changes.len(), 1);
		app.shutdown().await;
	}
}

// vim: ts=4
