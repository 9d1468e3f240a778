//! A uniform, cursor-addressable view over a change stream, implemented
//! once against the local index store and once against a remote Pydio
//! server.

mod local;
mod remote;

pub use local::LocalEndpoint;
pub use remote::{HttpRemoteSdk, RemoteConfig, RemoteEndpoint, RemoteSdk};

use async_trait::async_trait;
use ps_errors::Result;
use ps_index_store::ChangeKind;

/// A change row joined against the inode it refers to. `bytesize`/`md5`/
/// `mtime` are `None` for changes whose inode has since been deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedChange {
	pub seq: i64,
	pub node_id: Option<i64>,
	pub kind: ChangeKind,
	pub source: String,
	pub target: String,
	pub bytesize: Option<i64>,
	pub md5: Option<String>,
	pub mtime: Option<f64>,
}

/// The boundary the merge coordinator drives both sides of a job through.
#[async_trait]
pub trait SynchronizableEndpoint: Send + Sync {
	async fn assert_ready(&self) -> Result<()>;
	async fn get_changes(&self, cursor: i64) -> Result<Vec<ResolvedChange>>;
	fn cursor(&self) -> i64;
	async fn advance_cursor(&self, new_cursor: i64) -> Result<()>;

	/// Applies a change observed on the *other* endpoint to this one —
	/// this is the "mutation interface" the merge coordinator reconciles
	/// through once the strategy has decided a change should propagate.
	async fn apply_change(&self, change: &ResolvedChange) -> Result<()>;

	/// Renames a path on this endpoint, used by conflict resolution to
	/// relocate the losing side's copy rather than discard it.
	async fn rename(&self, from: &str, to: &str) -> Result<()>;
}
