//! Error taxonomy shared across loomsync crates (§7).
//!
//! Server- and client-specific concerns (HTTP status mapping, transport
//! retries) live in their own `Error` enums in `loomsync-server` and
//! `loomsync-client`; this enum is the common vocabulary both wrap.

pub type LsResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	// CRDT layer (C1)
	CrdtEncoding(String),
	CrdtApplication(String),

	// Validation and gap recovery (C2, C6)
	DeltaValidation(String),
	CorruptDelta(String),
	GapWithoutSnapshot,
	SnapshotValidation(String),

	// Storage (C2-C5, C9)
	Storage(String),
	Checkpoint(String),

	// Protocol negotiation (C11)
	ProtocolVersion { can_migrate: bool },
	Migration(String),
	ProtocolInitialization(String),

	// Networking / subscriptions (C6, C8)
	Network(String),
	Subscription(String),
	Reconnection(String),
	ConnectionTimeout,

	// Offline queue and barrier (C9, C10)
	Auth,
	Validation(String),
	ServerMutation(String),
	VersionConflict(String),
	ReplicationBarrierTimeout,
	TabCoordination(String),
}

impl Error {
	/// Whether a retry is expected to eventually succeed (§7).
	pub fn is_retriable(&self) -> bool {
		match self {
			Error::Network(_)
			| Error::Subscription(_)
			| Error::Reconnection(_)
			| Error::ConnectionTimeout
			| Error::Storage(_)
			| Error::ReplicationBarrierTimeout => true,
			Error::ProtocolVersion { can_migrate } => *can_migrate,
			Error::Auth
			| Error::Validation(_)
			| Error::CorruptDelta(_)
			| Error::GapWithoutSnapshot
			| Error::Migration(_)
			| Error::ProtocolInitialization(_) => false,
			Error::CrdtEncoding(_)
			| Error::CrdtApplication(_)
			| Error::DeltaValidation(_)
			| Error::SnapshotValidation(_)
			| Error::Checkpoint(_)
			| Error::ServerMutation(_)
			| Error::VersionConflict(_)
			| Error::TabCoordination(_) => false,
		}
	}
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Error::CrdtEncoding(msg) => write!(f, "CRDT encoding failed: {msg}"),
			Error::CrdtApplication(msg) => write!(f, "CRDT apply failed: {msg}"),
			Error::DeltaValidation(msg) => write!(f, "delta validation failed: {msg}"),
			Error::CorruptDelta(msg) => write!(f, "corrupt delta: {msg}"),
			Error::GapWithoutSnapshot => write!(f, "checkpoint gap with no snapshot to recover from"),
			Error::SnapshotValidation(msg) => write!(f, "snapshot validation failed: {msg}"),
			Error::Storage(msg) => write!(f, "storage error: {msg}"),
			Error::Checkpoint(msg) => write!(f, "checkpoint store error: {msg}"),
			Error::ProtocolVersion { can_migrate } => {
				write!(f, "protocol version mismatch (can_migrate={can_migrate})")
			}
			Error::Migration(msg) => write!(f, "migration failed: {msg}"),
			Error::ProtocolInitialization(msg) => write!(f, "protocol initialization failed: {msg}"),
			Error::Network(msg) => write!(f, "network error: {msg}"),
			Error::Subscription(msg) => write!(f, "subscription error: {msg}"),
			Error::Reconnection(msg) => write!(f, "reconnection error: {msg}"),
			Error::ConnectionTimeout => write!(f, "connection timed out"),
			Error::Auth => write!(f, "authentication/authorization error"),
			Error::Validation(msg) => write!(f, "validation error: {msg}"),
			Error::ServerMutation(msg) => write!(f, "server mutation failed: {msg}"),
			Error::VersionConflict(msg) => write!(f, "version conflict: {msg}"),
			Error::ReplicationBarrierTimeout => write!(f, "replication barrier timed out"),
			Error::TabCoordination(msg) => write!(f, "tab coordination error: {msg}"),
		}
	}
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Error::Storage(format!("json error: {err}"))
	}
}
