#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

//! Client half of loomsync: checkpoint store (C5), stream ingestor (C6),
//! materialized view (C7), subscription controller (C8), offline queue and
//! leader election (C9), replication barrier (C10), and protocol negotiator
//! (C11).

pub mod barrier;
pub mod buffer;
pub mod checkpoint;
pub mod client;
pub mod config;
pub mod device;
pub mod ingestor;
pub mod leader;
pub mod outbox;
pub mod protocol;
pub mod subscription;
pub mod transport;
pub mod view;

pub use barrier::ReplicationBarrier;
pub use client::Collection;
pub use config::{BufferStrategy, CollectionClientConfig, CollectionClientConfigBuilder};
pub use device::DeviceClass;
pub use ingestor::{StreamIngestor, ViewDecoder};
pub use leader::{FileLockElector, LeaderElector, SingleProcessElector};
pub use outbox::{DrainOutcome, OfflineQueue};
pub use protocol::ProtocolNegotiator;
pub use subscription::{SubscriptionController, SubscriptionHandler};
pub use transport::SyncTransport;
pub use view::{MaterializedView, ViewChange};

// vim: ts=4
