//! C8 Subscription Controller: at most one active live query at a time
//! (§4.8). The "live query" here is the ingestor's paging loop; this
//! module owns the handler table and the create/recreate/cleanup
//! lifecycle, independent of how the loop itself is driven.

use loomsync_types::error::Error;
use loomsync_types::prelude::*;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Callback invoked once per ingested [`StreamResponse`] page. Errors are
/// logged and isolated — per §4.8, "a thrown error must not break the
/// subscription".
pub type SubscriptionHandler = Arc<dyn Fn(StreamResponse) + Send + Sync>;

struct ActiveSubscription {
	handle: JoinHandle<()>,
	handler: SubscriptionHandler,
}

/// Owns at most one running subscription task per collection.
pub struct SubscriptionController {
	collection: String,
	active: Mutex<Option<ActiveSubscription>>,
}

impl std::fmt::Debug for SubscriptionController {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SubscriptionController").field("collection", &self.collection).finish_non_exhaustive()
	}
}

impl SubscriptionController {
	pub fn new(collection: impl Into<String>) -> Self {
		Self { collection: collection.into(), active: Mutex::new(None) }
	}

	/// Tear down any prior subscription, then spawn `run` (typically the
	/// ingestor's paging loop) as the new one, remembering `handler` so
	/// [`Self::recreate`] can restart it from a fresh checkpoint without
	/// the caller re-supplying the callback.
	pub async fn create<F, Fut>(&self, handler: SubscriptionHandler, run: F) -> LsResult<()>
	where
		F: FnOnce() -> Fut + Send + 'static,
		Fut: std::future::Future<Output = ()> + Send + 'static,
	{
		self.cleanup().await;
		let handle = tokio::spawn(run());
		*self.active.lock().await = Some(ActiveSubscription { handle, handler });
		tracing::debug!(collection = %self.collection, "subscription created");
		Ok(())
	}

	/// Re-establish the subscription from a new checkpoint, reusing the
	/// stored handler. `spawn_with` receives the stored handler and must
	/// produce the new paging future.
	pub async fn recreate<F, Fut>(&self, spawn_with: F) -> LsResult<()>
	where
		F: FnOnce(SubscriptionHandler) -> Fut + Send + 'static,
		Fut: std::future::Future<Output = ()> + Send + 'static,
	{
		let handler = {
			let guard = self.active.lock().await;
			guard
				.as_ref()
				.map(|sub| sub.handler.clone())
				.ok_or_else(|| Error::Subscription("recreate called with no prior subscription".to_string()))?
		};
		self.cleanup().await;
		let handle = tokio::spawn(spawn_with(handler.clone()));
		*self.active.lock().await = Some(ActiveSubscription { handle, handler });
		tracing::debug!(collection = %self.collection, "subscription recreated");
		Ok(())
	}

	/// Abort the running task, if any, and forget the handler.
	pub async fn cleanup(&self) {
		if let Some(sub) = self.active.lock().await.take() {
			sub.handle.abort();
		}
	}

	pub async fn is_active(&self) -> bool {
		self.active.lock().await.as_ref().is_some_and(|sub| !sub.handle.is_finished())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};

	#[tokio::test]
	async fn create_replaces_prior_subscription() {
		let controller = SubscriptionController::new("notes");
		let calls: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));

		let first_calls = calls.clone();
		controller
			.create(Arc::new(|_| {}), move || async move {
				first_calls.fetch_add(1, Ordering::SeqCst);
				tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
			})
			.await
			.unwrap();
		assert!(controller.is_active().await);

		controller.create(Arc::new(|_| {}), move || async move {}).await.unwrap();
		tokio::task::yield_now().await;
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn cleanup_deactivates() {
		let controller = SubscriptionController::new("notes");
		controller
			.create(Arc::new(|_| {}), || async move {
				tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
			})
			.await
			.unwrap();
		controller.cleanup().await;
		assert!(!controller.is_active().await);
	}

	#[tokio::test]
	async fn recreate_without_prior_subscription_fails() {
		let controller = SubscriptionController::new("notes");
		let err = controller.recreate(|_handler| async move {}).await.unwrap_err();
		assert!(matches!(err, loomsync_types::error::Error::Subscription(_)));
	}
}

// vim: ts=4
