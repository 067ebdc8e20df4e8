//! Per-collection configuration: migration chain, mutation hooks, and
//! compaction/pruning schedule, with `with_*` setters and a builder that
//! produces an immutable config.

use crate::error::{Error, LsResult};
use std::collections::BTreeMap;
use std::time::Duration;

/// Default compaction retention: 90 days (§6 `compaction.retention` default 129600 minutes).
pub const DEFAULT_COMPACTION_RETENTION: Duration = Duration::from_secs(90 * 24 * 60 * 60);
/// Default pruning retention: 180 days (§6 `pruning.retention` default 259200 minutes).
pub const DEFAULT_PRUNING_RETENTION: Duration = Duration::from_secs(180 * 24 * 60 * 60);
/// Default compaction job interval (§4.4: "default every 24h").
pub const DEFAULT_COMPACTION_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
/// Default pruning job interval (§4.4: "default weekly").
pub const DEFAULT_PRUNING_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
/// Below this many eligible deltas, a compaction pass is skipped (§4.4).
pub const COMPACTION_MIN_DELTAS: usize = 100;
/// Pruning always keeps at least this many most-recent snapshots (§4.4).
pub const PRUNE_KEEP_SNAPSHOTS: usize = 2;

/// A single transform step in a schema migration chain: takes the
/// materialized fields at version `n` and returns the fields at `n + 1`.
pub type MigrationStep = Box<dyn Fn(serde_json::Value) -> LsResult<serde_json::Value> + Send + Sync>;

/// Context passed to `onInsert`/`onUpdate`/`onRemove` hooks (§4.3 step 4).
#[derive(Debug, Clone)]
pub struct MutationContext {
	pub collection: String,
	pub document_id: String,
	pub fields: serde_json::Value,
	pub version: u64,
}

pub type MutationHook = Box<dyn Fn(&MutationContext) -> LsResult<()> + Send + Sync>;

/// Settings and hooks for one collection, built once at startup and held
/// immutably by [`crate::app::App`] for the collection's lifetime.
pub struct CollectionConfig {
	pub name: String,
	pub schema_version: u32,
	migrations: BTreeMap<u32, MigrationStep>,
	pub on_insert: Option<MutationHook>,
	pub on_update: Option<MutationHook>,
	pub on_remove: Option<MutationHook>,
	pub compaction_retention: Duration,
	pub pruning_retention: Duration,
	pub compaction_interval: Duration,
	pub pruning_interval: Duration,
}

impl std::fmt::Debug for CollectionConfig {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CollectionConfig")
			.field("name", &self.name)
			.field("schema_version", &self.schema_version)
			.field("migrations", &self.migrations.keys().collect::<Vec<_>>())
			.finish_non_exhaustive()
	}
}

impl CollectionConfig {
	pub fn builder(name: impl Into<String>) -> CollectionConfigBuilder {
		CollectionConfigBuilder::new(name)
	}

	/// Apply the registered migration chain starting at `from_version` up to
	/// `self.schema_version`, in order. A missing step anywhere in the chain
	/// is a fatal `MigrationError` (§4.3 step 1).
	pub fn migrate(&self, from_version: u32, mut fields: serde_json::Value) -> Result<serde_json::Value, Error> {
		let mut version = from_version;
		while version < self.schema_version {
			let step = self
				.migrations
				.get(&version)
				.ok_or_else(|| Error::MigrationChainGap { from_version: version, collection: self.name.clone() })?;
			fields = step(fields).map_err(Error::Core)?;
			version += 1;
		}
		Ok(fields)
	}
}

pub struct CollectionConfigBuilder {
	name: String,
	schema_version: u32,
	migrations: BTreeMap<u32, MigrationStep>,
	on_insert: Option<MutationHook>,
	on_update: Option<MutationHook>,
	on_remove: Option<MutationHook>,
	compaction_retention: Duration,
	pruning_retention: Duration,
	compaction_interval: Duration,
	pruning_interval: Duration,
}

impl CollectionConfigBuilder {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			schema_version: 0,
			migrations: BTreeMap::new(),
			on_insert: None,
			on_update: None,
			on_remove: None,
			compaction_retention: DEFAULT_COMPACTION_RETENTION,
			pruning_retention: DEFAULT_PRUNING_RETENTION,
			compaction_interval: DEFAULT_COMPACTION_INTERVAL,
			pruning_interval: DEFAULT_PRUNING_INTERVAL,
		}
	}

	pub fn schema_version(mut self, version: u32) -> Self {
		self.schema_version = version;
		self
	}

	/// Register the transform from `from_version` to `from_version + 1`.
	pub fn migration(
		mut self,
		from_version: u32,
		step: impl Fn(serde_json::Value) -> LsResult<serde_json::Value> + Send + Sync + 'static,
	) -> Self {
		self.migrations.insert(from_version, Box::new(step));
		self
	}

	pub fn on_insert(mut self, hook: impl Fn(&MutationContext) -> LsResult<()> + Send + Sync + 'static) -> Self {
		self.on_insert = Some(Box::new(hook));
		self
	}

	pub fn on_update(mut self, hook: impl Fn(&MutationContext) -> LsResult<()> + Send + Sync + 'static) -> Self {
		self.on_update = Some(Box::new(hook));
		self
	}

	pub fn on_remove(mut self, hook: impl Fn(&MutationContext) -> LsResult<()> + Send + Sync + 'static) -> Self {
		self.on_remove = Some(Box::new(hook));
		self
	}

	pub fn compaction_retention(mut self, retention: Duration) -> Self {
		self.compaction_retention = retention;
		self
	}

	pub fn pruning_retention(mut self, retention: Duration) -> Self {
		self.pruning_retention = retention;
		self
	}

	pub fn compaction_interval(mut self, interval: Duration) -> Self {
		self.compaction_interval = interval;
		self
	}

	pub fn pruning_interval(mut self, interval: Duration) -> Self {
		self.pruning_interval = interval;
		self
	}

	pub fn build(self) -> CollectionConfig {
		CollectionConfig {
			name: self.name,
			schema_version: self.schema_version,
			migrations: self.migrations,
			on_insert: self.on_insert,
			on_update: self.on_update,
			on_remove: self.on_remove,
			compaction_retention: self.compaction_retention,
			pruning_retention: self.pruning_retention,
			compaction_interval: self.compaction_interval,
			pruning_interval: self.pruning_interval,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn migration_chain_runs_in_order() {
		let cfg = CollectionConfig::builder("notes")
			.schema_version(2)
			.migration(0, |mut v| {
				v["migrated_from_v0"] = serde_json::json!(true);
				Ok(v)
			})
			.migration(1, |mut v| {
				v["migrated_from_v1"] = serde_json::json!(true);
				Ok(v)
			})
			.build();

		let out = cfg.migrate(0, serde_json::json!({"title": "hi"})).unwrap();
		assert_eq!(out["migrated_from_v0"], serde_json::json!(true));
		assert_eq!(out["migrated_from_v1"], serde_json::json!(true));
	}

	#[test]
	fn missing_migration_step_is_fatal() {
		let cfg = CollectionConfig::builder("notes").schema_version(2).build();
		let err = cfg.migrate(0, serde_json::json!({})).unwrap_err();
		assert!(matches!(err, Error::MigrationChainGap { from_version: 0, .. }));
	}

	#[test]
	fn already_current_version_is_a_no_op() {
		let cfg = CollectionConfig::builder("notes").schema_version(3).build();
		let fields = serde_json::json!({"a": 1});
		assert_eq!(cfg.migrate(3, fields.clone()).unwrap(), fields);
	}
}

// vim: ts=4
