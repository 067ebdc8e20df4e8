//! Shared wire types, storage adapter traits, and error taxonomy for loomsync.
//!
//! Every other crate in the workspace depends on this one: `loomsync-crdt`
//! and `loomsync-server` for the server-facing types and `ServerStore`
//! trait, `loomsync-client` for the client-facing types and its own
//! adapter traits, and both redb adapters for the trait definitions they
//! implement.

pub mod adapters;
pub mod error;
pub mod types;

pub mod prelude {
	pub use crate::adapters::{CheckpointStore, ClientMetaStore, OutboxStore, ServerStore};
	pub use crate::error::{Error, LsResult};
	pub use crate::types::{
		Checkpoint, Delta, InitialState, MaterializedRecord, MutationKind, MutationMetadata, OperationType,
		OutboxEntry, ProtocolMeta, Snapshot, StreamChange, StreamResponse, Timestamp,
	};
}
