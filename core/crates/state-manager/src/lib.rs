//! Translates inode mutation intents into transactional index-store writes.

use std::sync::Arc;

use async_trait::async_trait;
use ps_errors::{Error, Result};
use ps_index_store::{Inode, IndexStore};

/// A single mutation to apply against the inode table.
#[derive(Debug, Clone)]
pub enum Intent {
	Create { inode: Inode, is_dir: bool },
	Delete { node_path: String, is_dir: bool },
	Modify { inode: Inode, is_dir: bool },
	Move { old_path: String, inode: Inode, is_dir: bool },
}

/// The boundary the filesystem watcher dispatches enriched events across.
#[async_trait]
pub trait StateSink: Send + Sync {
	async fn apply(&self, intent: Intent) -> Result<()>;
}

pub struct StateManager {
	store: Arc<IndexStore>,
}

impl StateManager {
	pub fn new(store: Arc<IndexStore>) -> Self {
		Self { store }
	}

	async fn create(&self, inode: &Inode) -> Result<()> {
		let result = sqlx::query(
			"INSERT INTO ajxp_index (node_path, bytesize, md5, mtime, stat_result) VALUES (?1, ?2, ?3, ?4, ?5)",
		)
		.bind(&inode.node_path)
		.bind(inode.bytesize)
		.bind(&inode.md5)
		.bind(inode.mtime)
		.bind(&inode.stat_result)
		.execute(self.store.pool())
		.await;

		match result {
			Ok(_) => Ok(()),
			Err(err) => {
				tracing::warn!(path = %inode.node_path, error = %err, "create failed");
				Err(Error::state_mismatch(inode.node_path.clone(), err.to_string()))
			}
		}
	}

	async fn delete(&self, node_path: &str) -> Result<()> {
		let prefix = format!("{node_path}/%");
		let result = sqlx::query("DELETE FROM ajxp_index WHERE node_path = ?1 OR node_path LIKE ?2")
			.bind(node_path)
			.bind(prefix)
			.execute(self.store.pool())
			.await?;

		if result.rows_affected() == 0 {
			tracing::warn!(path = %node_path, "delete of nonexistent node");
			return Err(Error::state_mismatch(node_path, "no such node"));
		}
		Ok(())
	}

	async fn modify(&self, inode: &Inode, is_dir: bool) -> Result<()> {
		if is_dir {
			return Ok(());
		}

		let mut tx = self.store.pool().begin().await?;

		let result = sqlx::query(
			"UPDATE ajxp_index SET bytesize = ?1, md5 = ?2, mtime = ?3, stat_result = ?4 WHERE node_path = ?5",
		)
		.bind(inode.bytesize)
		.bind(&inode.md5)
		.bind(inode.mtime)
		.bind(&inode.stat_result)
		.bind(&inode.node_path)
		.execute(&mut *tx)
		.await?;

		if result.rows_affected() == 0 {
			tx.rollback().await?;
			tracing::warn!(path = %inode.node_path, "modify of nonexistent node");
			return Err(Error::state_mismatch(inode.node_path.clone(), "no such node"));
		}

		sqlx::query(
			"INSERT INTO ajxp_changes (node_id, type, source, target) \
			 VALUES ((SELECT rowid FROM ajxp_index WHERE node_path = ?1), 'modify', '', ?1)",
		)
		.bind(&inode.node_path)
		.execute(&mut *tx)
		.await?;

		tx.commit().await?;
		Ok(())
	}

	async fn move_node(&self, old_path: &str, new_path: &str, is_dir: bool) -> Result<()> {
		let mut tx = self.store.pool().begin().await?;

		let result = sqlx::query("UPDATE ajxp_index SET node_path = ?1 WHERE node_path = ?2")
			.bind(new_path)
			.bind(old_path)
			.execute(&mut *tx)
			.await?;

		if result.rows_affected() == 0 {
			tx.rollback().await?;
			tracing::warn!(path = %old_path, "move of nonexistent node");
			return Err(Error::state_mismatch(old_path, "no such node"));
		}

		if is_dir {
			let old_prefix = format!("{old_path}/");
			sqlx::query(
				"UPDATE ajxp_index SET node_path = ?1 || substr(node_path, ?2) \
				 WHERE node_path LIKE ?3",
			)
			.bind(format!("{new_path}/"))
			.bind(old_prefix.len() as i64 + 1)
			.bind(format!("{old_prefix}%"))
			.execute(&mut *tx)
			.await?;
		}

		tx.commit().await?;
		Ok(())
	}
}

#[async_trait]
impl StateSink for StateManager {
	async fn apply(&self, intent: Intent) -> Result<()> {
		match intent {
			Intent::Create { inode, .. } => self.create(&inode).await,
			Intent::Delete { node_path, .. } => self.delete(&node_path).await,
			Intent::Modify { inode, is_dir } => self.modify(&inode, is_dir).await,
			Intent::Move { old_path, inode, is_dir } => {
				self.move_node(&old_path, &inode.node_path, is_dir).await
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::path::PathBuf;

	async fn manager() -> (StateManager, Arc<IndexStore>) {
		let store = Arc::new(IndexStore::init(&PathBuf::from(":memory:")).await.unwrap());
		(StateManager::new(store.clone()), store)
	}

	fn file(path: &str) -> Inode {
		Inode {
			node_path: path.to_owned(),
			bytesize: 4,
			md5: "d41d8cd98f00b204e9800998ecf8427e".to_owned(),
			mtime: 1.0,
			stat_result: vec![1, 2, 3],
		}
	}

	// S1: create then modify updates the row and appends one modify change.
	#[tokio::test]
	async fn create_then_modify() {
		let (mgr, store) = manager().await;
		mgr.apply(Intent::Create { inode: file("a.txt"), is_dir: false }).await.unwrap();

		let mut updated = file("a.txt");
		updated.bytesize = 9;
		updated.md5 = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_owned();
		mgr.apply(Intent::Modify { inode: updated.clone(), is_dir: false }).await.unwrap();

		let stored = store.get_inode("a.txt").await.unwrap().unwrap();
		assert_eq!(stored.bytesize, 9);

		let changes = store.changes_since(0).await.unwrap();
		assert_eq!(changes.len(), 2);
		assert_eq!(changes[1].kind, ps_index_store::ChangeKind::Modify);
	}

	// S2: deleting a directory cascades to every descendant inode.
	#[tokio::test]
	async fn delete_directory_cascades() {
		let (mgr, store) = manager().await;
		mgr.apply(Intent::Create { inode: Inode::directory("dir"), is_dir: true }).await.unwrap();
		mgr.apply(Intent::Create { inode: file("dir/a.txt"), is_dir: false }).await.unwrap();
		mgr.apply(Intent::Create { inode: file("dir/sub/b.txt"), is_dir: false }).await.unwrap();

		mgr.apply(Intent::Delete { node_path: "dir".to_owned(), is_dir: true }).await.unwrap();

		assert!(store.get_inode("dir").await.unwrap().is_none());
		assert!(store.get_inode("dir/a.txt").await.unwrap().is_none());
		assert!(store.get_inode("dir/sub/b.txt").await.unwrap().is_none());
	}

	// S3: moving a directory rewrites every descendant's path prefix.
	#[tokio::test]
	async fn move_directory_cascades() {
		let (mgr, store) = manager().await;
		mgr.apply(Intent::Create { inode: Inode::directory("dir"), is_dir: true }).await.unwrap();
		mgr.apply(Intent::Create { inode: file("dir/a.txt"), is_dir: false }).await.unwrap();

		mgr.apply(Intent::Move {
			old_path: "dir".to_owned(),
			inode: Inode::directory("moved"),
			is_dir: true,
		})
		.await
		.unwrap();

		assert!(store.get_inode("dir").await.unwrap().is_none());
		assert!(store.get_inode("moved").await.unwrap().is_some());
		assert!(store.get_inode("moved/a.txt").await.unwrap().is_some());
	}

	#[tokio::test]
	async fn modify_of_nonexistent_is_state_mismatch() {
		let (mgr, _store) = manager().await;
		let err = mgr.apply(Intent::Modify { inode: file("nope.txt"), is_dir: false }).await;
		assert!(matches!(err, Err(Error::StateMismatch { .. })));
	}

	#[tokio::test]
	async fn modify_on_directory_is_noop() {
		let (mgr, store) = manager().await;
		mgr.apply(Intent::Create { inode: Inode::directory("dir"), is_dir: true }).await.unwrap();
		mgr.apply(Intent::Modify { inode: Inode::directory("dir"), is_dir: true }).await.unwrap();
		let changes = store.changes_since(0).await.unwrap();
		assert_eq!(changes.len(), 1);
	}
}
