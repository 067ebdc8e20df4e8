//! C6 Stream Ingestor: pages through [`SyncTransport::stream`] starting at a
//! checkpoint, applies each change to the CRDT document (C1), republishes
//! the materialized view (C7), and advances the checkpoint (C5) — all under
//! a device-adaptive token-bucket throttle (§4.6).
//!
//! The throttle uses `governor`'s synchronous `check()` plus
//! `wait_time_from` against a single unkeyed bucket per ingestor, since one
//! ingestor drains exactly one collection's stream.

use crate::barrier::ReplicationBarrier;
use crate::buffer::BoundedBuffer;
use crate::checkpoint;
use crate::config::{CollectionClientConfig, PAGE_QUERY_TIMEOUT, PAGE_RETRY_ATTEMPTS, PAGE_RETRY_BASE_DELAY};
use crate::subscription::SubscriptionHandler;
use crate::transport::SyncTransport;
use crate::view::MaterializedView;
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use loomsync_crdt::{ApplyOrigin, CrdtDocument, MAX_ENCODED_BYTES};
use loomsync_types::error::Error;
use loomsync_types::prelude::*;
use std::sync::Arc;

/// Decodes a document's current JSON fields into the view's value type.
/// Returning `None` drops the document from the view rather than erroring —
/// a schema that doesn't recognize a field set is treated as "not ours".
pub type ViewDecoder<T> = Arc<dyn Fn(&serde_json::Value) -> Option<T> + Send + Sync>;

/// Drains a collection's stream from a checkpoint forward, publishing every
/// applied change to its materialized view.
pub struct StreamIngestor<T> {
	collection: String,
	transport: Arc<dyn SyncTransport>,
	checkpoint_store: Arc<dyn CheckpointStore>,
	document: Arc<CrdtDocument>,
	view: Arc<MaterializedView<T>>,
	barrier: Arc<ReplicationBarrier>,
	decode: ViewDecoder<T>,
	config: CollectionClientConfig,
	limiter: DefaultDirectRateLimiter,
	handler: Option<SubscriptionHandler>,
}

impl<T> std::fmt::Debug for StreamIngestor<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("StreamIngestor").field("collection", &self.collection).finish_non_exhaustive()
	}
}

impl<T: Clone + Send + Sync + 'static> StreamIngestor<T> {
	pub fn new(
		collection: impl Into<String>,
		transport: Arc<dyn SyncTransport>,
		checkpoint_store: Arc<dyn CheckpointStore>,
		document: Arc<CrdtDocument>,
		view: Arc<MaterializedView<T>>,
		barrier: Arc<ReplicationBarrier>,
		decode: ViewDecoder<T>,
		config: CollectionClientConfig,
		handler: Option<SubscriptionHandler>,
	) -> Self {
		let quota = Quota::per_second(config.max_deltas_per_second).allow_burst(config.burst);
		Self {
			collection: collection.into(),
			transport,
			checkpoint_store,
			document,
			view,
			barrier,
			decode,
			config,
			limiter: RateLimiter::direct(quota),
			handler,
		}
	}

	/// Drain every page from the current checkpoint until the server reports
	/// no more changes, returning the final checkpoint reached.
	///
	/// A per-delta `DeltaValidation`/`CrdtApplication` failure is logged and
	/// skipped so one bad delta can't stall the rest of the collection's
	/// sync (§4.6, §7); any other error (checkpoint I/O, a non-retriable
	/// transport failure) aborts the whole catch-up.
	pub async fn catch_up(&self) -> LsResult<Checkpoint> {
		let mut current = checkpoint::load(&*self.checkpoint_store, &self.collection).await?;
		loop {
			let page = self.fetch_page_with_retry(current).await?;
			self.notify_handler(page.clone());
			let mut buffer = BoundedBuffer::new(self.config.buffer_capacity, self.config.buffer_strategy);
			for change in page.changes {
				buffer.push(change);
			}
			while let Some(change) = buffer.pop() {
				self.throttle().await;
				let skip_checkpoint = checkpoint_for(&change);
				match self.apply_change(change).await {
					Ok(next) => current = next,
					Err(err @ (Error::DeltaValidation(_) | Error::CrdtApplication(_))) => {
						tracing::warn!(collection = %self.collection, error = %err, "skipping bad delta, stream continues");
						// Still advance past the bad item's timestamp so it isn't
						// refetched and retried forever on every catch_up.
						checkpoint::advance(&*self.checkpoint_store, &self.collection, skip_checkpoint).await?;
						current = skip_checkpoint;
					}
					Err(err) => return Err(err),
				}
			}
			if !page.has_more {
				return Ok(current);
			}
		}
	}

	/// Invoke the subscription handler, if any, with the page just fetched.
	/// The handler is a plain closure with no `Result`, so a panic inside it
	/// is the only failure mode (§4.8) — caught and logged rather than
	/// allowed to unwind through the ingestor.
	fn notify_handler(&self, response: StreamResponse) {
		let Some(handler) = &self.handler else { return };
		let handler = handler.clone();
		if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || handler(response))) {
			let message = panic
				.downcast_ref::<&str>()
				.map(|s| (*s).to_string())
				.or_else(|| panic.downcast_ref::<String>().cloned())
				.unwrap_or_else(|| "non-string panic payload".to_string());
			tracing::error!(collection = %self.collection, error = %message, "subscription handler panicked");
		}
	}

	async fn throttle(&self) {
		loop {
			match self.limiter.check() {
				Ok(()) => return,
				Err(not_until) => {
					let wait = not_until.wait_time_from(DefaultClock::default().now());
					tokio::time::sleep(wait).await;
				}
			}
		}
	}

	async fn fetch_page_with_retry(&self, checkpoint: Checkpoint) -> LsResult<StreamResponse> {
		let mut last_err = Error::Network("stream() never attempted".to_string());
		for attempt in 1..=PAGE_RETRY_ATTEMPTS {
			let attempted = tokio::time::timeout(
				PAGE_QUERY_TIMEOUT,
				self.transport.stream(&self.collection, checkpoint, self.config.page_size),
			)
			.await;

			match attempted {
				Ok(Ok(page)) => return Ok(page),
				Ok(Err(err)) if !err.is_retriable() => return Err(err),
				Ok(Err(err)) => {
					tracing::warn!(collection = %self.collection, attempt, error = %err, "stream() page failed");
					last_err = err;
				}
				Err(_) => {
					tracing::warn!(collection = %self.collection, attempt, "stream() page timed out");
					last_err = Error::ConnectionTimeout;
				}
			}
			if attempt < PAGE_RETRY_ATTEMPTS {
				tokio::time::sleep(PAGE_RETRY_BASE_DELAY * attempt).await;
			}
		}
		Err(last_err)
	}

	async fn apply_change(&self, change: StreamChange) -> LsResult<Checkpoint> {
		match change {
			StreamChange::Delta(delta) => {
				validate_delta(&delta)?;
				self.document.apply_update(&delta.crdt_bytes, ApplyOrigin::Subscription).await?;
				self.publish_one(&delta.document_id);
				self.barrier.observe(&delta.document_id, delta.timestamp);
				let candidate = Checkpoint { last_modified: delta.timestamp };
				checkpoint::advance(&*self.checkpoint_store, &self.collection, candidate).await?;
				Ok(candidate)
			}
			StreamChange::Snapshot(snapshot) => {
				validate_snapshot(&snapshot)?;
				self.document.apply_update(&snapshot.snapshot_bytes, ApplyOrigin::Snapshot).await?;
				self.republish_all();
				let candidate = Checkpoint { last_modified: snapshot.latest_compaction_timestamp };
				checkpoint::advance(&*self.checkpoint_store, &self.collection, candidate).await?;
				Ok(candidate)
			}
		}
	}

	fn publish_one(&self, document_id: &str) {
		match self.document.get_document(document_id).and_then(|fields| (self.decode)(&fields)) {
			Some(value) if self.view.has(document_id) => {
				self.view.update(document_id, |slot| *slot = value);
			}
			Some(value) => self.view.insert(document_id.to_string(), value),
			None => {
				self.view.delete(document_id);
			}
		}
	}

	/// Clear-and-repopulate the view wholesale, the §4.6 short-circuit taken
	/// whenever a snapshot jumps the checkpoint forward.
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

/// The checkpoint a change would advance to, used to skip past a change
/// that fails validation/application without re-deriving its timestamp.
fn checkpoint_for(change: &StreamChange) -> Checkpoint {
	match change {
		StreamChange::Delta(delta) => Checkpoint { last_modified: delta.timestamp },
		StreamChange::Snapshot(snapshot) => Checkpoint { last_modified: snapshot.latest_compaction_timestamp },
	}
}

fn validate_delta(delta: &Delta) -> LsResult<()> {
	if delta.crdt_bytes.is_empty() {
		return Err(Error::DeltaValidation("crdtBytes is empty".to_string()));
	}
	if delta.crdt_bytes.len() > MAX_ENCODED_BYTES {
		return Err(Error::DeltaValidation(format!("crdtBytes exceeds {MAX_ENCODED_BYTES} bytes")));
	}
	if delta.version == 0 {
		return Err(Error::DeltaValidation("version must be positive".to_string()));
	}
	if delta.timestamp == Timestamp::zero() {
		return Err(Error::DeltaValidation("timestamp must be non-zero".to_string()));
	}
	Ok(())
}

fn validate_snapshot(snapshot: &Snapshot) -> LsResult<()> {
	if snapshot.snapshot_bytes.is_empty() {
		return Err(Error::DeltaValidation("snapshotBytes is empty".to_string()));
	}
	if snapshot.snapshot_bytes.len() > MAX_ENCODED_BYTES {
		return Err(Error::DeltaValidation(format!("snapshotBytes exceeds {MAX_ENCODED_BYTES} bytes")));
	}
	if snapshot.latest_compaction_timestamp == Timestamp::zero() {
		return Err(Error::DeltaValidation("latestCompactionTimestamp must be non-zero".to_string()));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transport::LoopbackTransport;
	use loomsync_kv_adapter_redb::ClientStoreRedb;
	use serde_json::Value;
	use std::num::NonZeroU32;

	#[derive(Clone, Debug, PartialEq)]
	struct Note {
		title: String,
	}

	fn decode() -> ViewDecoder<Note> {
		Arc::new(|value: &Value| {
			value.get("title").and_then(Value::as_str).map(|title| Note { title: title.to_string() })
		})
	}

	fn checkpoint_store() -> Arc<dyn CheckpointStore> {
		let dir = tempfile::tempdir().unwrap();
		Arc::new(ClientStoreRedb::open(dir.keep().join("ingestor.redb")).unwrap())
	}

	fn config() -> CollectionClientConfig {
		CollectionClientConfig::builder("notes")
			.max_deltas_per_second(NonZeroU32::new(1000).unwrap_or(NonZeroU32::MIN))
			.build()
	}

	#[tokio::test]
	async fn catch_up_applies_deltas_and_advances_checkpoint() {
		let transport = Arc::new(LoopbackTransport::new(1));
		transport
			.mutate("notes", MutationKind::Insert, "doc-1", vec![0], serde_json::json!({"title": "hi"}), 1, None)
			.await
			.unwrap();

		let document = Arc::new(CrdtDocument::new(1));
		let crdt_bytes = document
			.encode_mutation(MutationKind::Insert, "doc-1", Some(&serde_json::json!({"title": "hi"})))
			.unwrap();
		transport
			.mutate("notes", MutationKind::Update, "doc-1", crdt_bytes, serde_json::json!({"title": "hi"}), 1, None)
			.await
			.unwrap();

		let view = Arc::new(MaterializedView::<Note>::new());
		let store = checkpoint_store();
		let ingestor = StreamIngestor::new(
			"notes",
			transport,
			store.clone(),
			document,
			view.clone(),
			Arc::new(ReplicationBarrier::new()),
			decode(),
			config(),
			None,
		);

		let reached = ingestor.catch_up().await.unwrap();
		assert_eq!(view.get("doc-1"), Some(Note { title: "hi".to_string() }));
		assert_eq!(checkpoint::load(&*store, "notes").await.unwrap(), reached);
	}

	#[tokio::test]
	async fn catch_up_on_an_empty_collection_is_a_no_op() {
		let transport = Arc::new(LoopbackTransport::new(1));
		let document = Arc::new(CrdtDocument::new(1));
		let view = Arc::new(MaterializedView::<Note>::new());
		let ingestor = StreamIngestor::new(
			"notes",
			transport,
			checkpoint_store(),
			document,
			view.clone(),
			Arc::new(ReplicationBarrier::new()),
			decode(),
			config(),
			None,
		);

		let reached = ingestor.catch_up().await.unwrap();
		assert_eq!(reached, Checkpoint::zero());
		assert_eq!(view.size(), 0);
	}

	#[tokio::test]
	async fn a_corrupt_delta_is_skipped_and_the_stream_continues() {
		let transport = Arc::new(LoopbackTransport::new(1));
		transport.mutate("notes", MutationKind::Insert, "bad", vec![9, 9, 9], serde_json::json!({}), 1, None).await.unwrap();

		let document = Arc::new(CrdtDocument::new(1));
		let crdt_bytes = document
			.encode_mutation(MutationKind::Insert, "doc-1", Some(&serde_json::json!({"title": "hi"})))
			.unwrap();
		transport
			.mutate("notes", MutationKind::Update, "doc-1", crdt_bytes, serde_json::json!({"title": "hi"}), 1, None)
			.await
			.unwrap();

		let view = Arc::new(MaterializedView::<Note>::new());
		let store = checkpoint_store();
		let ingestor = StreamIngestor::new(
			"notes",
			transport,
			store.clone(),
			document,
			view.clone(),
			Arc::new(ReplicationBarrier::new()),
			decode(),
			config(),
			None,
		);

		let reached = ingestor.catch_up().await.unwrap();
		assert_eq!(view.get("doc-1"), Some(Note { title: "hi".to_string() }));
		assert_eq!(checkpoint::load(&*store, "notes").await.unwrap(), reached);
	}

	#[test]
	fn empty_crdt_bytes_are_rejected() {
		let delta = Delta {
			collection: "notes".to_string(),
			document_id: "doc-1".to_string(),
			crdt_bytes: vec![],
			version: 1,
			timestamp: Timestamp(1),
		};
		assert!(matches!(validate_delta(&delta), Err(Error::DeltaValidation(_))));
	}

	#[test]
	fn zero_version_is_rejected() {
		let delta = Delta {
			collection: "notes".to_string(),
			document_id: "doc-1".to_string(),
			crdt_bytes: vec![1],
			version: 0,
			timestamp: Timestamp(1),
		};
		assert!(matches!(validate_delta(&delta), Err(Error::DeltaValidation(_))));
	}
}

// vim: ts=4
