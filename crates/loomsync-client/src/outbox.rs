//! C9 Offline Queue: a durable FIFO of pending mutations, drained by
//! whichever process instance holds leadership (§4.9). Each entry is sent
//! through [`SyncTransport::mutate`]; failures are classified via
//! [`loomsync_types::error::Error::is_retriable`] to decide whether the
//! entry stays queued for a later retry or is dropped as permanently
//! rejected.

use crate::barrier::ReplicationBarrier;
use crate::config::REPLAY_FRESHNESS_THRESHOLD;
use crate::leader::LeaderElector;
use crate::transport::SyncTransport;
use loomsync_types::prelude::*;
use std::sync::Arc;
use std::time::Duration;

/// Attempts per entry within one [`OfflineQueue::drain`] call before
/// giving up and leaving it queued for the next drain.
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// Outcome of draining one entry, for logging/testing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
	Sent { document_id: String },
	NonRetriableDropped { document_id: String, reason: String },
	RetriesExhausted { document_id: String },
}

/// The durable, leader-arbitrated send queue for one client installation.
pub struct OfflineQueue {
	holder_id: String,
	store: Arc<dyn OutboxStore>,
	elector: Arc<dyn LeaderElector>,
	transport: Arc<dyn SyncTransport>,
	barrier: Arc<ReplicationBarrier>,
	on_leadership_change: Option<Box<dyn Fn(bool) + Send + Sync>>,
}

impl std::fmt::Debug for OfflineQueue {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("OfflineQueue").field("holder_id", &self.holder_id).finish_non_exhaustive()
	}
}

impl OfflineQueue {
	pub fn new(
		holder_id: impl Into<String>,
		store: Arc<dyn OutboxStore>,
		elector: Arc<dyn LeaderElector>,
		transport: Arc<dyn SyncTransport>,
		barrier: Arc<ReplicationBarrier>,
	) -> Self {
		Self { holder_id: holder_id.into(), store, elector, transport, barrier, on_leadership_change: None }
	}

	pub fn on_leadership_change(mut self, callback: impl Fn(bool) + Send + Sync + 'static) -> Self {
		self.on_leadership_change = Some(Box::new(callback));
		self
	}

	/// Assign a fresh, locally-scoped idempotency key and enqueue `entry`
	/// durably. The caller is responsible for the synchronous optimistic
	/// apply to C1/C7 before or after this call (§4.9).
	pub async fn enqueue(
		&self,
		collection: &str,
		kind: MutationKind,
		document_id: &str,
		crdt_bytes: Vec<u8>,
		materialized_doc: serde_json::Value,
		version: u64,
	) -> LsResult<OutboxEntry> {
		let entry = OutboxEntry {
			idempotency_key: uuid::Uuid::new_v4().to_string(),
			collection: collection.to_string(),
			kind,
			document_id: document_id.to_string(),
			materialized_doc,
			crdt_bytes,
			version,
			created_at: Timestamp::now(),
		};
		self.store.enqueue(entry.clone()).await?;
		tracing::debug!(document_id, idempotency_key = %entry.idempotency_key, "outbox entry enqueued");
		Ok(entry)
	}

	/// Attempt to become (or remain) leader, notifying
	/// [`Self::on_leadership_change`] on a transition, and drain every
	/// currently queued entry if leadership was obtained.
	pub async fn drain(&self) -> LsResult<Vec<DrainOutcome>> {
		let became_leader = self.elector.acquire(&self.holder_id).await.unwrap_or_else(|err| {
			tracing::warn!(error = %err, "leader election backend failed; downgrading to online-only");
			false
		});

		if let Some(callback) = &self.on_leadership_change {
			callback(became_leader);
		}
		if !became_leader {
			return Ok(vec![]);
		}

		let mut outcomes = Vec::new();
		for entry in self.store.list().await? {
			outcomes.push(self.drain_entry(entry).await);
		}
		Ok(outcomes)
	}

	async fn drain_entry(&self, entry: OutboxEntry) -> DrainOutcome {
		let age = Duration::from_millis(Timestamp::now().0.saturating_sub(entry.created_at.0));
		let mut delay = RETRY_BASE_DELAY;

		for attempt in 1..=RETRY_ATTEMPTS {
			let result = self
				.transport
				.mutate(
					&entry.collection,
					entry.kind,
					&entry.document_id,
					entry.crdt_bytes.clone(),
					entry.materialized_doc.clone(),
					entry.version,
					None,
				)
				.await;

			match result {
				Ok(metadata) => {
					if age < REPLAY_FRESHNESS_THRESHOLD {
						if let Err(err) = self.barrier.await_echo(&metadata.document_id, metadata.timestamp).await {
							tracing::warn!(document_id = %metadata.document_id, error = %err, "replication barrier wait failed after send");
						}
					}
					if let Err(err) = self.store.remove(&entry.idempotency_key).await {
						tracing::warn!(error = %err, "failed to remove acknowledged outbox entry");
					}
					return DrainOutcome::Sent { document_id: entry.document_id };
				}
				Err(err) if !err.is_retriable() => {
					tracing::warn!(document_id = %entry.document_id, error = %err, "non-retriable mutation failure");
					if let Err(remove_err) = self.store.remove(&entry.idempotency_key).await {
						tracing::warn!(error = %remove_err, "failed to remove rejected outbox entry");
					}
					return DrainOutcome::NonRetriableDropped { document_id: entry.document_id, reason: err.to_string() };
				}
				Err(err) => {
					tracing::warn!(document_id = %entry.document_id, attempt, error = %err, "retriable mutation failure");
					if attempt < RETRY_ATTEMPTS {
						tokio::time::sleep(delay).await;
						delay *= 2;
					}
				}
			}
		}

		DrainOutcome::RetriesExhausted { document_id: entry.document_id }
	}
}


// vim: ts=4
