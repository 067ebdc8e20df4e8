//! Top-level per-collection client handle: wires C1/C5-C11 together behind
//! `insert`/`update`/`delete` and a `start()` entrypoint that negotiates the
//! protocol, bootstraps from the server's initial state, catches up the
//! stream, and keeps a live subscription running.

use crate::barrier::ReplicationBarrier;
use crate::checkpoint;
use crate::config::CollectionClientConfig;
use crate::ingestor::{StreamIngestor, ViewDecoder};
use crate::leader::LeaderElector;
use crate::outbox::OfflineQueue;
use crate::protocol::ProtocolNegotiator;
use crate::subscription::SubscriptionController;
use crate::transport::SyncTransport;
use crate::view::MaterializedView;
use dashmap::DashMap;
use loomsync_crdt::{ApplyOrigin, CrdtDocument};
use loomsync_types::prelude::*;
use std::sync::Arc;
use std::time::Duration;

/// How often the live subscription's background loop re-polls the stream
/// once it has caught up, absent a push-capable transport.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// A fully wired client handle for one collection.
pub struct Collection<T> {
	name: String,
	transport: Arc<dyn SyncTransport>,
	document: Arc<CrdtDocument>,
	view: Arc<MaterializedView<T>>,
	checkpoint_store: Arc<dyn CheckpointStore>,
	outbox: Arc<OfflineQueue>,
	barrier: Arc<ReplicationBarrier>,
	protocol: Arc<ProtocolNegotiator>,
	subscription: Arc<SubscriptionController>,
	decode: ViewDecoder<T>,
	config: CollectionClientConfig,
	versions: DashMap<String, u64>,
}

impl<T> std::fmt::Debug for Collection<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Collection").field("name", &self.name).finish_non_exhaustive()
	}
}

impl<T: Clone + Send + Sync + 'static> Collection<T> {
	/// Build a collection handle. `holder_id` identifies this process
	/// instance to the offline queue's leader election (§4.9).
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		name: impl Into<String>,
		holder_id: impl Into<String>,
		client_id: u32,
		transport: Arc<dyn SyncTransport>,
		checkpoint_store: Arc<dyn CheckpointStore>,
		outbox_store: Arc<dyn OutboxStore>,
		meta_store: Arc<dyn ClientMetaStore>,
		elector: Arc<dyn LeaderElector>,
		decode: ViewDecoder<T>,
		config: CollectionClientConfig,
	) -> Self {
		let name = name.into();
		let barrier = Arc::new(ReplicationBarrier::new());
		let outbox = Arc::new(OfflineQueue::new(holder_id, outbox_store, elector, transport.clone(), barrier.clone()));
		Self {
			document: Arc::new(CrdtDocument::new(client_id)),
			view: Arc::new(MaterializedView::new()),
			protocol: Arc::new(ProtocolNegotiator::new(meta_store)),
			subscription: Arc::new(SubscriptionController::new(name.clone())),
			checkpoint_store,
			outbox,
			barrier,
			transport,
			decode,
			config,
			name,
			versions: DashMap::new(),
		}
	}

	pub fn view(&self) -> Arc<MaterializedView<T>> {
		self.view.clone()
	}

	fn ingestor(&self, handler: Option<crate::subscription::SubscriptionHandler>) -> StreamIngestor<T> {
		StreamIngestor::new(
			self.name.clone(),
			self.transport.clone(),
			self.checkpoint_store.clone(),
			self.document.clone(),
			self.view.clone(),
			self.barrier.clone(),
			self.decode.clone(),
			self.config.clone(),
			handler,
		)
	}

	/// Negotiate the protocol, bootstrap from the server's initial state if
	/// this is the collection's first run, catch up any remaining deltas,
	/// and establish the live subscription loop. Idempotent: calling it
	/// again after a disconnect simply restarts the subscription (§4.8).
	pub async fn start(&self) -> LsResult<()> {
		let server_version = self.transport.protocol_version().await?;
		self.protocol.negotiate(server_version).await?;

		if checkpoint::load(&*self.checkpoint_store, &self.name).await? == Checkpoint::zero() {
			if let Some(initial) = self.transport.get_initial_state(&self.name).await? {
				self.document.apply_update(&initial.crdt_bytes, ApplyOrigin::Snapshot).await?;
				self.republish_all();
				checkpoint::advance(&*self.checkpoint_store, &self.name, initial.checkpoint).await?;
			}
		}

		self.ingestor(None).catch_up().await?;
		self.run_subscription().await
	}

	async fn run_subscription(&self) -> LsResult<()> {
		let handler: crate::subscription::SubscriptionHandler = Arc::new(|_response| {});
		let ingestor = Arc::new(self.ingestor(Some(handler.clone())));
		let loop_body = {
			let ingestor = ingestor.clone();
			move || async move {
				loop {
					tokio::time::sleep(POLL_INTERVAL).await;
					if let Err(err) = ingestor.catch_up().await {
						tracing::warn!(error = %err, "subscription poll failed, retrying next tick");
					}
				}
			}
		};
		self.subscription.create(handler, loop_body).await
	}

	/// Stop the live subscription without affecting the outbox.
	pub async fn stop(&self) {
		self.subscription.cleanup().await;
	}

	/// Drain the offline queue, sending any pending mutations if this
	/// process instance currently holds leadership (§4.9).
	pub async fn sync_outbox(&self) -> LsResult<Vec<crate::outbox::DrainOutcome>> {
		self.outbox.drain().await
	}

	pub async fn insert(&self, document_id: &str, fields: serde_json::Value) -> LsResult<()> {
		self.mutate(MutationKind::Insert, document_id, Some(fields)).await
	}

	pub async fn update(&self, document_id: &str, fields: serde_json::Value) -> LsResult<()> {
		self.mutate(MutationKind::Update, document_id, Some(fields)).await
	}

	pub async fn delete(&self, document_id: &str) -> LsResult<()> {
		self.mutate(MutationKind::Delete, document_id, None).await
	}

	/// Apply a mutation optimistically to C1/C7, then durably enqueue it for
	/// the offline queue to send (§4.9's optimistic-apply-then-enqueue
	/// sequence).
	async fn mutate(&self, kind: MutationKind, document_id: &str, fields: Option<serde_json::Value>) -> LsResult<()> {
		let crdt_bytes = self.document.encode_mutation(kind, document_id, fields.as_ref())?;

		let version = {
			let mut slot = self.versions.entry(document_id.to_string()).or_insert(0);
			*slot += 1;
			*slot
		};

		match kind {
			MutationKind::Insert | MutationKind::Update => {
				if let Some(fields) = &fields {
					if let Some(value) = (self.decode)(fields) {
						if self.view.has(document_id) {
							self.view.update(document_id, |slot| *slot = value);
						} else {
							self.view.insert(document_id.to_string(), value);
						}
					}
				}
			}
			MutationKind::Delete => {
				self.view.delete(document_id);
			}
		}

		let materialized_doc = fields.unwrap_or(serde_json::Value::Null);
		self.outbox.enqueue(&self.name, kind, document_id, crdt_bytes, materialized_doc, version).await?;
		Ok(())
	}

	fn republish_all(&self) {
		let entries = self
			.document
			.document_ids()
			.into_iter()
			.filter_map(|id| {
				let fields = self.document.get_document(&id)?;
				let value = (self.decode)(&fields)?;
				Some((id, value))
			})
			.collect::<Vec<_>>();
		self.view.reset(entries);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::leader::SingleProcessElector;
	use crate::transport::LoopbackTransport;
	use loomsync_kv_adapter_redb::ClientStoreRedb;

	#[derive(Clone, Debug, PartialEq)]
	struct Note {
		title: String,
	}

	fn decode() -> ViewDecoder<Note> {
		Arc::new(|value: &serde_json::Value| {
			value.get("title").and_then(serde_json::Value::as_str).map(|title| Note { title: title.to_string() })
		})
	}

	fn stores() -> (Arc<ClientStoreRedb>, Arc<ClientStoreRedb>, Arc<ClientStoreRedb>) {
		let dir = tempfile::tempdir().unwrap();
		let store = Arc::new(ClientStoreRedb::open(dir.keep().join("client.redb")).unwrap());
		(store.clone(), store.clone(), store)
	}

	#[tokio::test]
	async fn insert_is_visible_locally_before_any_drain() {
		let (checkpoint_store, outbox_store, meta_store) = stores();
		let collection = Collection::new(
			"notes",
			"proc-1",
			1,
			Arc::new(LoopbackTransport::new(1)),
			checkpoint_store,
			outbox_store,
			meta_store,
			Arc::new(SingleProcessElector::default()),
			decode(),
			CollectionClientConfig::builder("notes").build(),
		);

		collection.insert("doc-1", serde_json::json!({"title": "hello"})).await.unwrap();
		assert_eq!(collection.view().get("doc-1"), Some(Note { title: "hello".to_string() }));
	}

	#[tokio::test]
	async fn outbox_drain_sends_the_optimistic_mutation() {
		let (checkpoint_store, outbox_store, meta_store) = stores();
		let collection = Collection::new(
			"notes",
			"proc-1",
			1,
			Arc::new(LoopbackTransport::new(1)),
			checkpoint_store,
			outbox_store,
			meta_store,
			Arc::new(SingleProcessElector::default()),
			decode(),
			CollectionClientConfig::builder("notes").build(),
		);

		collection.insert("doc-1", serde_json::json!({"title": "hello"})).await.unwrap();
		let outcomes = collection.sync_outbox().await.unwrap();
		assert_eq!(outcomes.len(), 1);
	}
}

// vim: ts=4
