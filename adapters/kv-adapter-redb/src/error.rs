//! Error types local to the redb client-side storage adapter.

use std::fmt;

#[derive(Debug)]
pub enum Error {
	Db(String),
	Io(String),
	Serialization(String),
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::Db(msg) => write!(f, "database error: {msg}"),
			Error::Io(msg) => write!(f, "I/O error: {msg}"),
			Error::Serialization(msg) => write!(f, "serialization error: {msg}"),
		}
	}
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Error::Serialization(err.to_string())
	}
}

impl From<Error> for loomsync_types::error::Error {
	fn from(err: Error) -> Self {
		loomsync_types::error::Error::Storage(err.to_string())
	}
}
