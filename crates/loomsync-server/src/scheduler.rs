//! Periodic compaction/pruning jobs.
//!
//! A fuller cron-style scheduler would drive jobs through a `CronSchedule`
//! (minute/hour/day/month/weekday fields, `next_execution` searching
//! forward minute by minute) feeding a general `Task`/`TaskStore`
//! dependency-and-retry system. loomsync only ever runs two fixed-interval
//! jobs per collection — compaction and pruning — so this module keeps the
//! simple mechanism (a spawned loop that sleeps to the next scheduled
//! instant, then runs the job and logs failures rather than panicking)
//! without the task-dependency machinery around it.

use crate::compactor;
use crate::config::CollectionConfig;
use loomsync_types::prelude::ServerStore;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Owns the background compaction/pruning tasks spawned for each
/// registered collection. Dropping or calling [`Scheduler::shutdown`] stops
/// them.
#[derive(Default)]
pub struct Scheduler {
	handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
	pub fn new() -> Self {
		Self::default()
	}

	/// Spawn the compaction and pruning loops for one collection.
	pub fn spawn_collection(&mut self, store: Arc<dyn ServerStore>, config: Arc<CollectionConfig>) {
		let compaction_store = store.clone();
		let compaction_config = config.clone();
		self.handles.push(tokio::spawn(async move {
			loop {
				tokio::time::sleep(compaction_config.compaction_interval).await;
				match compactor::compact(compaction_store.as_ref(), &compaction_config).await {
					Ok(outcome) => {
						tracing::trace!(collection = %compaction_config.name, outcome = ?outcome, "compaction tick");
					}
					Err(err) => {
						tracing::error!(collection = %compaction_config.name, error = %err, "scheduled compaction failed");
					}
				}
			}
		}));

		let pruning_store = store;
		let pruning_config = config;
		self.handles.push(tokio::spawn(async move {
			loop {
				tokio::time::sleep(pruning_config.pruning_interval).await;
				if let Err(err) = compactor::prune(pruning_store.as_ref(), &pruning_config).await {
					tracing::error!(collection = %pruning_config.name, error = %err, "scheduled pruning failed");
				}
			}
		}));
	}

	/// Abort every spawned task. Safe to call more than once.
	pub fn shutdown(&mut self) {
		for handle in self.handles.drain(..) {
			handle.abort();
		}
	}
}

impl Drop for Scheduler {
	fn drop(&mut self) {
		self.shutdown();
	}
}

// vim: ts=4
