//! Per-collection client configuration (§6 "Configuration recognized by a
//! collection builder"). Mirrors `loomsync_server::config`'s builder shape.

use crate::device::DeviceClass;
use std::num::NonZeroU32;
use std::time::Duration;

/// What the bounded ingestor buffer (capacity 1000, §4.6) does when full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferStrategy {
	/// Drop the oldest buffered delta to make room for the new one.
	#[default]
	DropOldest,
	/// Reject the new delta, keeping the buffer's current contents.
	DropNewest,
	/// Await a free slot, applying backpressure to the page fetcher.
	Suspending,
}

const DEFAULT_BUFFER_CAPACITY: usize = 1000;
const DEFAULT_PAGE_SIZE: usize = 500;

/// Per-collection client-side tuning. Built with [`CollectionClientConfig::builder`].
#[derive(Debug, Clone)]
pub struct CollectionClientConfig {
	pub name: String,
	pub buffer_capacity: usize,
	pub buffer_strategy: BufferStrategy,
	pub page_size: usize,
	pub max_deltas_per_second: NonZeroU32,
	pub burst: NonZeroU32,
}

impl CollectionClientConfig {
	pub fn builder(name: impl Into<String>) -> CollectionClientConfigBuilder {
		CollectionClientConfigBuilder::new(name)
	}
}

/// Builder for [`CollectionClientConfig`], following
/// `loomsync_server::config::CollectionConfigBuilder`'s `with_*`-setter shape.
pub struct CollectionClientConfigBuilder {
	name: String,
	buffer_capacity: usize,
	buffer_strategy: BufferStrategy,
	page_size: usize,
	max_deltas_per_second: Option<NonZeroU32>,
	burst: NonZeroU32,
}

impl CollectionClientConfigBuilder {
	fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			buffer_capacity: DEFAULT_BUFFER_CAPACITY,
			buffer_strategy: BufferStrategy::default(),
			page_size: DEFAULT_PAGE_SIZE,
			max_deltas_per_second: None,
			burst: NonZeroU32::new(10).unwrap_or(NonZeroU32::MIN),
		}
	}

	pub fn buffer_capacity(mut self, capacity: usize) -> Self {
		self.buffer_capacity = capacity;
		self
	}

	pub fn buffer_strategy(mut self, strategy: BufferStrategy) -> Self {
		self.buffer_strategy = strategy;
		self
	}

	pub fn page_size(mut self, page_size: usize) -> Self {
		self.page_size = page_size;
		self
	}

	/// Override the device-adaptive default rate (§6 `maxDeltasPerSecond`).
	pub fn max_deltas_per_second(mut self, rate: NonZeroU32) -> Self {
		self.max_deltas_per_second = Some(rate);
		self
	}

	pub fn burst(mut self, burst: NonZeroU32) -> Self {
		self.burst = burst;
		self
	}

	pub fn build(self) -> CollectionClientConfig {
		let rate = self.max_deltas_per_second.unwrap_or_else(|| DeviceClass::detect().default_rate());
		CollectionClientConfig {
			name: self.name,
			buffer_capacity: self.buffer_capacity,
			buffer_strategy: self.buffer_strategy,
			page_size: self.page_size,
			max_deltas_per_second: rate,
			burst: self.burst,
		}
	}
}

/// How long the offline queue waits for a fresh mutation's echo before
/// giving up (§4.10).
pub const BARRIER_TIMEOUT: Duration = Duration::from_secs(30);
pub const BARRIER_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Age past which an outbox entry bypasses the replication barrier to let
/// large offline backlogs flush fast (§4.9).
pub const REPLAY_FRESHNESS_THRESHOLD: Duration = Duration::from_millis(2000);

/// Per-page query timeout and retry backoff for the ingestor (§4.6).
pub const PAGE_QUERY_TIMEOUT: Duration = Duration::from_secs(10);
pub const PAGE_RETRY_ATTEMPTS: u32 = 5;
pub const PAGE_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn builder_defaults_rate_from_device_class() {
		let config = CollectionClientConfig::builder("notes").build();
		assert!(config.max_deltas_per_second.get() > 0);
		assert_eq!(config.buffer_capacity, DEFAULT_BUFFER_CAPACITY);
	}

	#[test]
	fn builder_honors_explicit_rate_override() {
		let rate = NonZeroU32::new(7).unwrap_or(NonZeroU32::MIN);
		let config = CollectionClientConfig::builder("notes").max_deltas_per_second(rate).build();
		assert_eq!(config.max_deltas_per_second, rate);
	}
}

// vim: ts=4
