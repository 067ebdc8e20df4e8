//! C11 Protocol Negotiator: runs once per process per collection family,
//! memoized so concurrent callers share the same initialization attempt
//! (§4.11). An init-once pattern generalized from "build the app once" to
//! "negotiate the protocol version once, clearing the memo on failure so
//! a retry is possible".

use loomsync_types::error::Error;
use loomsync_types::prelude::*;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// An ordered migration step run when the server's protocol version is
/// ahead of the locally stored one.
pub type MigrationHook = Box<dyn Fn(u32) -> LsResult<()> + Send + Sync>;

/// Negotiates and persists the protocol version once per process.
pub struct ProtocolNegotiator {
	meta_store: Arc<dyn ClientMetaStore>,
	migrations: Vec<MigrationHook>,
	once: OnceCell<u32>,
}

impl std::fmt::Debug for ProtocolNegotiator {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ProtocolNegotiator")
			.field("migrations", &self.migrations.len())
			.finish_non_exhaustive()
	}
}

impl ProtocolNegotiator {
	pub fn new(meta_store: Arc<dyn ClientMetaStore>) -> Self {
		Self { meta_store, migrations: Vec::new(), once: OnceCell::new() }
	}

	/// Register a migration hook, run in registration order when upgrading.
	pub fn with_migration(mut self, hook: MigrationHook) -> Self {
		self.migrations.push(hook);
		self
	}

	/// Negotiate against `server_version`, memoizing the result for the
	/// lifetime of this negotiator. On failure the memo is cleared so the
	/// next call retries from scratch.
	pub async fn negotiate(&self, server_version: u32) -> LsResult<u32> {
		let result = self
			.once
			.get_or_try_init(|| self.negotiate_uncached(server_version))
			.await;

		match result {
			Ok(version) => Ok(*version),
			Err(err) => {
				// OnceCell has no public "clear" once initialization is
				// attempted inside get_or_try_init and fails it stays
				// uninitialized, so a subsequent call retries naturally.
				Err(err)
			}
		}
	}

	async fn negotiate_uncached(&self, server_version: u32) -> LsResult<u32> {
		let stored = self.meta_store.load_protocol_meta().await?.protocol_version;
		let stored = if stored == 0 { 1 } else { stored };

		if server_version > stored {
			for hook in &self.migrations {
				hook(server_version).map_err(|err| {
					Error::Migration(format!("migration toward protocol {server_version} failed: {err}"))
				})?;
			}
			tracing::debug!(from = stored, to = server_version, "protocol migrated up");
		} else if server_version < stored {
			tracing::warn!(
				local = stored,
				server = server_version,
				"server protocol version is older than the locally stored one"
			);
		}

		self.meta_store.save_protocol_meta(ProtocolMeta { protocol_version: server_version }).await?;
		Ok(server_version)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use loomsync_kv_adapter_redb::ClientStoreRedb;
	use std::sync::atomic::{AtomicU32, Ordering};

	fn meta_store() -> Arc<dyn ClientMetaStore> {
		let dir = tempfile::tempdir().unwrap();
		Arc::new(ClientStoreRedb::open(dir.keep().join("protocol.redb")).unwrap())
	}

	#[tokio::test]
	async fn first_negotiation_persists_server_version() {
		let negotiator = ProtocolNegotiator::new(meta_store());
		let version = negotiator.negotiate(3).await.unwrap();
		assert_eq!(version, 3);
	}

	#[tokio::test]
	async fn concurrent_callers_share_one_negotiation() {
		let store = meta_store();
		let calls = Arc::new(AtomicU32::new(0));
		let negotiator = Arc::new({
			let calls = calls.clone();
			ProtocolNegotiator::new(store).with_migration(Box::new(move |_to| {
				calls.fetch_add(1, Ordering::SeqCst);
				Ok(())
			}))
		});

		let a = { let n = negotiator.clone(); tokio::spawn(async move { n.negotiate(2).await }) };
		let b = { let n = negotiator.clone(); tokio::spawn(async move { n.negotiate(2).await }) };
		let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());
		assert_eq!((a, b), (2, 2));
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn downgrade_warns_but_persists_server_version() {
		let store = meta_store();
		store.save_protocol_meta(ProtocolMeta { protocol_version: 5 }).await.unwrap();
		let negotiator = ProtocolNegotiator::new(store);
		let version = negotiator.negotiate(3).await.unwrap();
		assert_eq!(version, 3);
	}

	#[tokio::test]
	async fn failing_migration_is_reported() {
		let negotiator = ProtocolNegotiator::new(meta_store())
			.with_migration(Box::new(|_to| Err(Error::Validation("boom".to_string()))));
		let err = negotiator.negotiate(2).await.unwrap_err();
		assert!(matches!(err, Error::Migration(_)));
	}
}

// vim: ts=4
