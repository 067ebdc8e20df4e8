//! C10 Replication Barrier: guarantees an optimistic outbox write isn't
//! superseded by a stale ingested value before the server's echo arrives
//! (§4.10). The same shape as SYNC-echo matching: generalized from "did my
//! own update come back" to "has the server-assigned timestamp for this
//! document been observed by the ingestor yet".

use crate::config::{BARRIER_POLL_INTERVAL, BARRIER_TIMEOUT};
use loomsync_types::error::Error;
use loomsync_types::prelude::*;
use std::collections::HashMap;
use std::sync::Mutex;

/// Tracks, per `documentId`, the newest server timestamp the ingestor has
/// applied. C6/C7 call [`Self::observe`] for every ingested delta;
/// [`Self::await_echo`] is the offline queue's wait point after a send.
#[derive(Debug, Default)]
pub struct ReplicationBarrier {
	seen: Mutex<HashMap<String, Timestamp>>,
}

impl ReplicationBarrier {
	pub fn new() -> Self {
		Self::default()
	}

	/// Record that `document_id` has been ingested up to `timestamp`.
	/// A no-op if `timestamp` is not newer than what's already recorded,
	/// so out-of-order delivery can't move the watermark backward.
	pub fn observe(&self, document_id: &str, timestamp: Timestamp) {
		let mut seen = self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
		let entry = seen.entry(document_id.to_string()).or_insert(Timestamp::zero());
		if timestamp > *entry {
			*entry = timestamp;
		}
	}

	fn has_seen(&self, document_id: &str, timestamp: Timestamp) -> bool {
		let seen = self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
		seen.get(document_id).is_some_and(|seen_ts| *seen_ts >= timestamp)
	}

	/// Wait for `document_id`'s ingested watermark to reach `timestamp`.
	/// Fast path returns immediately if it already has; otherwise polls
	/// every 50 ms up to a 30 s timeout, per §4.10.
	pub async fn await_echo(&self, document_id: &str, timestamp: Timestamp) -> LsResult<()> {
		if self.has_seen(document_id, timestamp) {
			return Ok(());
		}

		let deadline = tokio::time::Instant::now() + BARRIER_TIMEOUT;
		loop {
			tokio::time::sleep(BARRIER_POLL_INTERVAL).await;
			if self.has_seen(document_id, timestamp) {
				return Ok(());
			}
			if tokio::time::Instant::now() >= deadline {
				return Err(Error::ReplicationBarrierTimeout);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	#[tokio::test]
	async fn fast_path_returns_immediately_when_already_seen() {
		let barrier = ReplicationBarrier::new();
		barrier.observe("doc-1", Timestamp(10));
		barrier.await_echo("doc-1", Timestamp(10)).await.unwrap();
	}

	#[tokio::test(start_paused = true)]
	async fn slow_path_resolves_once_observed_later() {
		let barrier = std::sync::Arc::new(ReplicationBarrier::new());
		let waiter = {
			let barrier = barrier.clone();
			tokio::spawn(async move { barrier.await_echo("doc-1", Timestamp(5)).await })
		};

		tokio::time::advance(Duration::from_millis(120)).await;
		barrier.observe("doc-1", Timestamp(5));
		tokio::time::advance(Duration::from_millis(60)).await;

		waiter.await.unwrap().unwrap();
	}

	#[tokio::test(start_paused = true)]
	async fn timeout_reports_replication_barrier_timeout() {
		let barrier = ReplicationBarrier::new();
		let waiter = tokio::spawn(async move { barrier.await_echo("doc-1", Timestamp(5)).await });

		tokio::time::advance(Duration::from_secs(31)).await;
		let err = waiter.await.unwrap().unwrap_err();
		assert!(matches!(err, loomsync_types::error::Error::ReplicationBarrierTimeout));
	}
}

// vim: ts=4
