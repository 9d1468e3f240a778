//! Shared error taxonomy for the sync engine crates.

use std::io;

/// A storage-layer failure raised while opening or probing an index store.
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
	#[error("failed to create data directory '{0}': {1}")]
	CreateDir(String, #[source] io::Error),
	#[error("failed to open sqlite database: {0}")]
	Open(#[from] sqlx::Error),
	#[error("schema probe failed: {0}")]
	SchemaProbe(sqlx::Error),
}

/// The error type returned by every fallible operation in this workspace.
#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("storage unavailable: {0}")]
	StorageUnavailable(#[from] StorageError),

	#[error("endpoint unavailable: {0}")]
	EndpointUnavailable(String),

	#[error("state mismatch for path '{path}': {reason}")]
	StateMismatch { path: String, reason: String },

	#[error("a merge is already in progress")]
	ConcurrentMerge,

	#[error("transport failure: {0}")]
	TransportFailure(#[from] reqwest::Error),

	#[error("invalid filter configuration: {0}")]
	FilterConfig(#[from] globset::Error),

	#[error(transparent)]
	Database(#[from] sqlx::Error),

	#[error(transparent)]
	Io(#[from] io::Error),
}

impl Error {
	pub fn state_mismatch(path: impl Into<String>, reason: impl Into<String>) -> Self {
		Error::StateMismatch {
			path: path.into(),
			reason: reason.into(),
		}
	}
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
