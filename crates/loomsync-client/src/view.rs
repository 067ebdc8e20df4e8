//! C7 Materialized View: the reactive `documentId -> T` map the UI reads
//! from. The CRDT document (C1) stays the single source of truth for
//! conflict resolution; this view exists purely for fast, reactive reads
//! (§4.7). Backed by `dashmap`, the usual choice for concurrently-read,
//! concurrently-written maps (unlike `loomsync-server::App`'s collection
//! registry, which is read-only after startup and uses a plain `HashMap`
//! instead).

use dashmap::DashMap;
use tokio::sync::broadcast;

const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// One coalesced change notification delivered to `subscribe_changes`
/// subscribers.
#[derive(Debug, Clone)]
pub enum ViewChange<T> {
	Inserted(String, T),
	Updated(String, T),
	Removed(String),
	/// The view was cleared and repopulated wholesale, e.g. by applying a
	/// compaction snapshot (§4.6's "clear and repopulate" short-circuit).
	Reset,
}

/// The reactive materialized view for one collection.
#[derive(Debug)]
pub struct MaterializedView<T> {
	entries: DashMap<String, T>,
	changes: broadcast::Sender<ViewChange<T>>,
}

impl<T: Clone + Send + Sync + 'static> Default for MaterializedView<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T: Clone + Send + Sync + 'static> MaterializedView<T> {
	pub fn new() -> Self {
		let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
		Self { entries: DashMap::new(), changes }
	}

	pub fn insert(&self, key: impl Into<String>, value: T) {
		let key = key.into();
		self.entries.insert(key.clone(), value.clone());
		let _ = self.changes.send(ViewChange::Inserted(key, value));
	}

	/// Mutate the value at `key` in place via `mutator`, publishing
	/// [`ViewChange::Updated`]. A no-op (and returns `false`) if `key` is
	/// absent.
	pub fn update(&self, key: &str, mutator: impl FnOnce(&mut T)) -> bool {
		let Some(mut entry) = self.entries.get_mut(key) else {
			return false;
		};
		mutator(&mut entry);
		let updated = entry.clone();
		drop(entry);
		let _ = self.changes.send(ViewChange::Updated(key.to_string(), updated));
		true
	}

	pub fn delete(&self, key: &str) -> bool {
		let removed = self.entries.remove(key).is_some();
		if removed {
			let _ = self.changes.send(ViewChange::Removed(key.to_string()));
		}
		removed
	}

	pub fn get(&self, key: &str) -> Option<T> {
		self.entries.get(key).map(|entry| entry.clone())
	}

	pub fn has(&self, key: &str) -> bool {
		self.entries.contains_key(key)
	}

	pub fn size(&self) -> usize {
		self.entries.len()
	}

	pub fn values(&self) -> Vec<T> {
		self.entries.iter().map(|entry| entry.value().clone()).collect()
	}

	/// Clear the view and repopulate it from `entries`, publishing one
	/// [`ViewChange::Reset`] rather than one event per row — used when a
	/// compaction snapshot supersedes the whole collection (§4.6).
	pub fn reset(&self, entries: impl IntoIterator<Item = (String, T)>) {
		self.entries.clear();
		for (key, value) in entries {
			self.entries.insert(key, value);
		}
		let _ = self.changes.send(ViewChange::Reset);
	}

	pub fn subscribe_changes(&self) -> broadcast::Receiver<ViewChange<T>> {
		self.changes.subscribe()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn insert_update_delete_round_trip() {
		let view: MaterializedView<i32> = MaterializedView::new();
		view.insert("a", 1);
		assert_eq!(view.get("a"), Some(1));
		assert!(view.update("a", |v| *v += 1));
		assert_eq!(view.get("a"), Some(2));
		assert!(view.delete("a"));
		assert!(!view.has("a"));
	}

	#[test]
	fn update_on_missing_key_is_a_no_op() {
		let view: MaterializedView<i32> = MaterializedView::new();
		assert!(!view.update("missing", |v| *v += 1));
	}

	#[tokio::test]
	async fn subscribers_observe_changes() {
		let view: MaterializedView<i32> = MaterializedView::new();
		let mut rx = view.subscribe_changes();
		view.insert("a", 1);
		match rx.recv().await.unwrap() {
			ViewChange::Inserted(key, value) => {
				assert_eq!(key, "a");
				assert_eq!(value, 1);
			}
			other => panic!("unexpected change: {other:?}"),
		}
	}

	#[test]
	fn reset_replaces_contents_with_one_notification() {
		let view: MaterializedView<i32> = MaterializedView::new();
		view.insert("a", 1);
		view.reset([("b".to_string(), 2)]);
		assert!(!view.has("a"));
		assert_eq!(view.get("b"), Some(2));
		assert_eq!(view.size(), 1);
	}
}

// vim: ts=4
