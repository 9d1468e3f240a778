use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ps_errors::{Error, Result};
use ps_index_store::{ChangeKind, Inode, IndexStore};
use ps_state_manager::{Intent, StateSink};
use sqlx::Row;

use crate::{ResolvedChange, SynchronizableEndpoint};

/// Serves changes out of the local index store, keyed by the watched
/// directory's own cursor side table. Reconciliation is applied back
/// through the same [`StateSink`] the filesystem watcher dispatches to.
pub struct LocalEndpoint {
	directory: PathBuf,
	store: Arc<IndexStore>,
	sink: Arc<dyn StateSink>,
	cursor: AtomicI64,
}

impl LocalEndpoint {
	pub async fn new(directory: PathBuf, store: Arc<IndexStore>, sink: Arc<dyn StateSink>) -> Result<Self> {
		let cursor = store.load_cursor().await?;
		Ok(Self {
			directory,
			store,
			sink,
			cursor: AtomicI64::new(cursor),
		})
	}
}

fn resolved_to_inode(change: &ResolvedChange, node_path: String) -> Inode {
	Inode {
		node_path,
		bytesize: change.bytesize.unwrap_or(0),
		md5: change.md5.clone().unwrap_or_else(|| Inode::DIRECTORY_MD5.to_owned()),
		mtime: change.mtime.unwrap_or(0.0),
		stat_result: Vec::new(),
	}
}

#[async_trait]
impl SynchronizableEndpoint for LocalEndpoint {
	async fn assert_ready(&self) -> Result<()> {
		tokio::fs::metadata(&self.directory)
			.await
			.map(|_| ())
			.map_err(|err| Error::EndpointUnavailable(format!("{}: {err}", self.directory.display())))
	}

	async fn get_changes(&self, cursor: i64) -> Result<Vec<ResolvedChange>> {
		let rows = sqlx::query(
			"SELECT c.seq, c.node_id, c.type, c.source, c.target, i.bytesize, i.md5, i.mtime \
			 FROM ajxp_changes c LEFT JOIN ajxp_index i ON i.rowid = c.node_id \
			 WHERE c.seq > ?1 ORDER BY c.node_id, c.seq",
		)
		.bind(cursor)
		.fetch_all(self.store.pool())
		.await?;

		rows.into_iter()
			.map(|row| {
				let kind: String = row.get("type");
				let kind: ChangeKind = kind.parse()?;
				Ok(ResolvedChange {
					seq: row.get("seq"),
					node_id: row.get("node_id"),
					kind,
					source: row.get("source"),
					target: row.get("target"),
					bytesize: row.get("bytesize"),
					md5: row.get("md5"),
					mtime: row.get("mtime"),
				})
			})
			.collect()
	}

	fn cursor(&self) -> i64 {
		self.cursor.load(Ordering::SeqCst)
	}

	async fn advance_cursor(&self, new_cursor: i64) -> Result<()> {
		self.cursor.store(new_cursor, Ordering::SeqCst);
		self.store.save_cursor(new_cursor).await
	}

	async fn apply_change(&self, change: &ResolvedChange) -> Result<()> {
		let is_dir = change.md5.as_deref() == Some(Inode::DIRECTORY_MD5);
		match change.kind {
			ChangeKind::Create => {
				let inode = resolved_to_inode(change, change.target.clone());
				self.sink.apply(Intent::Create { inode, is_dir }).await
			}
			ChangeKind::Modify => {
				let inode = resolved_to_inode(change, change.target.clone());
				self.sink.apply(Intent::Modify { inode, is_dir }).await
			}
			ChangeKind::Delete => {
				self.sink
					.apply(Intent::Delete { node_path: change.source.clone(), is_dir })
					.await
			}
			ChangeKind::Move => {
				let inode = resolved_to_inode(change, change.target.clone());
				self.sink
					.apply(Intent::Move { old_path: change.source.clone(), inode, is_dir })
					.await
			}
		}
	}

	async fn rename(&self, from: &str, to: &str) -> Result<()> {
		let Some(inode) = self.store.get_inode(from).await? else {
			return Err(Error::state_mismatch(from, "no such node"));
		};
		let is_dir = inode.md5 == Inode::DIRECTORY_MD5;
		let mut renamed = inode;
		renamed.node_path = to.to_owned();
		self.sink
			.apply(Intent::Move { old_path: from.to_owned(), inode: renamed, is_dir })
			.await
	}
}
