//! C4 Compactor: folds old deltas into a snapshot, and prunes snapshots
//! beyond the retention window, per collection (§4.4).

use crate::config::{CollectionConfig, COMPACTION_MIN_DELTAS, PRUNE_KEEP_SNAPSHOTS};
use crate::error::LsResult;
use loomsync_crdt::CrdtDocument;
use loomsync_types::prelude::*;
use std::time::Duration;

/// Outcome of one compaction pass, for logging/testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionOutcome {
	/// Fewer than [`COMPACTION_MIN_DELTAS`] were eligible; nothing done.
	SkippedTooFewDeltas,
	/// A snapshot was written and its source deltas deleted.
	Compacted { delta_count: usize },
}

/// Run one compaction pass for `collection` against `cutoff = now -
/// config.compaction_retention` (§4.4 steps 1-5).
///
/// A merge/containment validation failure aborts without deleting any
/// delta — the event log is append-only from the caller's perspective
/// until compaction provably subsumes it.
pub async fn compact(store: &dyn ServerStore, config: &CollectionConfig) -> LsResult<CompactionOutcome> {
	let cutoff = now_minus(config.compaction_retention);
	let deltas = store.deltas_older_than(&config.name, cutoff).await?;

	if deltas.len() < COMPACTION_MIN_DELTAS {
		return Ok(CompactionOutcome::SkippedTooFewDeltas);
	}

	let updates: Vec<Vec<u8>> = deltas.iter().map(|d| d.crdt_bytes.clone()).collect();
	let merged = match CrdtDocument::merge_updates(0, &updates) {
		Ok(bytes) => bytes,
		Err(err) => {
			tracing::error!(collection = %config.name, delta_count = deltas.len(), error = %err, "compaction merge failed");
			return Err(err.into());
		}
	};
	if let Err(err) = CrdtDocument::validate_contains(0, &merged, &updates) {
		tracing::error!(collection = %config.name, delta_count = deltas.len(), error = %err, "snapshot validation failed");
		return Err(err.into());
	}

	let newest_timestamp = deltas
		.iter()
		.map(|d| d.timestamp)
		.max()
		.unwrap_or_else(Timestamp::zero);

	store
		.insert_snapshot(Snapshot {
			collection: config.name.clone(),
			snapshot_bytes: merged,
			latest_compaction_timestamp: newest_timestamp,
			created_at: Timestamp::now(),
		})
		.await?;
	store.delete_deltas(&config.name, &deltas).await?;

	tracing::debug!(collection = %config.name, delta_count = deltas.len(), "compaction complete");
	Ok(CompactionOutcome::Compacted { delta_count: deltas.len() })
}

/// Delete snapshots older than `config.pruning_retention`, always keeping
/// at least [`PRUNE_KEEP_SNAPSHOTS`] most recent ones (§4.4).
pub async fn prune(store: &dyn ServerStore, config: &CollectionConfig) -> LsResult<usize> {
	let cutoff = now_minus(config.pruning_retention);
	let mut snapshots = store.list_snapshots(&config.name).await?;
	snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));

	let mut deleted = 0;
	for snapshot in snapshots.into_iter().skip(PRUNE_KEEP_SNAPSHOTS) {
		if snapshot.created_at < cutoff {
			store.delete_snapshot(&config.name, snapshot.created_at).await?;
			deleted += 1;
		}
	}
	if deleted > 0 {
		tracing::debug!(collection = %config.name, deleted, "pruning complete");
	}
	Ok(deleted)
}

fn now_minus(duration: Duration) -> Timestamp {
	let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
	Timestamp(Timestamp::now().0.saturating_sub(millis))
}


// vim: ts=4
