//! Leader election for the offline queue (C9 §5): "exactly one process
//! instance drains the queue at a time". [`SingleProcessElector`] is
//! correct for a single OS process embedding loomsync;
//! [`FileLockElector`] extends that to several desktop processes sharing
//! one outbox directory, the concurrency model's "several tabs" analogue,
//! using a lock file plus a heartbeat timestamp rather than an
//! `acquire_lock`/`release_lock` row (there is no shared server to host
//! that row on the client side).

use async_trait::async_trait;
use loomsync_types::error::Error;
use loomsync_types::prelude::*;
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Arbitrates which process instance may drain the outbox.
#[async_trait]
pub trait LeaderElector: Debug + Send + Sync {
	/// Attempt to (re)acquire leadership for `holder_id`. Renewing an
	/// already-held lease and acquiring a free one both return `true`.
	async fn acquire(&self, holder_id: &str) -> LsResult<bool>;

	/// Give up leadership if `holder_id` currently holds it.
	async fn release(&self, holder_id: &str) -> LsResult<()>;
}

/// The trivial elector for a single process instance: the first caller to
/// acquire becomes, and stays, leader until it releases.
#[derive(Debug, Default)]
pub struct SingleProcessElector {
	held_by: Mutex<Option<String>>,
}

#[async_trait]
impl LeaderElector for SingleProcessElector {
	async fn acquire(&self, holder_id: &str) -> LsResult<bool> {
		let mut held_by = self.held_by.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
		match held_by.as_deref() {
			Some(current) if current == holder_id => Ok(true),
			Some(_) => Ok(false),
			None => {
				*held_by = Some(holder_id.to_string());
				Ok(true)
			}
		}
	}

	async fn release(&self, holder_id: &str) -> LsResult<()> {
		let mut held_by = self.held_by.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
		if held_by.as_deref() == Some(holder_id) {
			*held_by = None;
		}
		Ok(())
	}
}

/// A lock-file-plus-heartbeat elector for several desktop processes
/// sharing one outbox directory. The lock file's contents are
/// `"{holder_id}|{unix_millis}"`; a lease older than `lease_ttl` is
/// considered abandoned and may be stolen.
#[derive(Debug)]
pub struct FileLockElector {
	lock_path: PathBuf,
	lease_ttl: Duration,
}

impl FileLockElector {
	pub fn new(lock_path: impl Into<PathBuf>, lease_ttl: Duration) -> Self {
		Self { lock_path: lock_path.into(), lease_ttl }
	}

	fn now_millis() -> u64 {
		SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
	}

	fn read_lease(path: &std::path::Path) -> Option<(String, u64)> {
		let contents = std::fs::read_to_string(path).ok()?;
		let (holder, millis) = contents.split_once('|')?;
		Some((holder.to_string(), millis.parse().ok()?))
	}

	fn write_lease(path: &std::path::Path, holder_id: &str) -> std::io::Result<()> {
		std::fs::write(path, format!("{holder_id}|{}", Self::now_millis()))
	}
}

#[async_trait]
impl LeaderElector for FileLockElector {
	async fn acquire(&self, holder_id: &str) -> LsResult<bool> {
		let path = self.lock_path.clone();
		let holder_id = holder_id.to_string();
		let lease_ttl = self.lease_ttl;
		tokio::task::spawn_blocking(move || {
			if let Some(parent) = path.parent() {
				let _ = std::fs::create_dir_all(parent);
			}
			match FileLockElector::read_lease(&path) {
				Some((current_holder, _)) if current_holder == holder_id => {
					FileLockElector::write_lease(&path, &holder_id).map_err(|e| Error::Storage(e.to_string()))?;
					Ok(true)
				}
				Some((_, written_at_other)) => {
					let age = FileLockElector::now_millis().saturating_sub(written_at_other);
					if age > lease_ttl.as_millis() as u64 {
						FileLockElector::write_lease(&path, &holder_id).map_err(|e| Error::Storage(e.to_string()))?;
						Ok(true)
					} else {
						Ok(false)
					}
				}
				None => {
					FileLockElector::write_lease(&path, &holder_id).map_err(|e| Error::Storage(e.to_string()))?;
					Ok(true)
				}
			}
		})
		.await
		.map_err(|e| Error::Storage(e.to_string()))?
	}

	async fn release(&self, holder_id: &str) -> LsResult<()> {
		let path = self.lock_path.clone();
		let holder_id = holder_id.to_string();
		tokio::task::spawn_blocking(move || {
			if let Some((current_holder, _)) = FileLockElector::read_lease(&path) {
				if current_holder == holder_id {
					let _ = std::fs::remove_file(&path);
				}
			}
		})
		.await
		.map_err(|e| Error::Storage(e.to_string()))?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn single_process_elector_is_exclusive() {
		let elector = SingleProcessElector::default();
		assert!(elector.acquire("a").await.unwrap());
		assert!(!elector.acquire("b").await.unwrap());
		elector.release("a").await.unwrap();
		assert!(elector.acquire("b").await.unwrap());
	}

	#[tokio::test]
	async fn file_lock_elector_is_exclusive_until_released() {
		let dir = tempfile::tempdir().unwrap();
		let lock_path = dir.path().join("leader.lock");
		let elector = FileLockElector::new(&lock_path, Duration::from_secs(30));

		assert!(elector.acquire("a").await.unwrap());
		assert!(!elector.acquire("b").await.unwrap());
		assert!(elector.acquire("a").await.unwrap(), "renewal by the current holder succeeds");

		elector.release("a").await.unwrap();
		assert!(elector.acquire("b").await.unwrap());
	}

	#[tokio::test]
	async fn file_lock_elector_reclaims_a_stale_lease() {
		let dir = tempfile::tempdir().unwrap();
		let lock_path = dir.path().join("leader.lock");
		let elector = FileLockElector::new(&lock_path, Duration::from_millis(10));

		assert!(elector.acquire("a").await.unwrap());
		tokio::time::sleep(Duration::from_millis(30)).await;
		assert!(elector.acquire("b").await.unwrap(), "a stale lease may be stolen");
	}
}

// vim: ts=4
