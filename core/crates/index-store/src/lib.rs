//! The persistent inode table and monotonic change log.
//!
//! Backed by a single-writer SQLite pool: `max_connections(1)` turns the
//! pool's own acquisition queue into the FIFO serialization this store
//! relies on, so no additional locking is needed around `execute`.

use std::path::Path;
use std::str::FromStr;

use ps_errors::{Error, Result, StorageError};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

const SCHEMA: &str = include_str!("schema.sql");

/// A row of `ajxp_index`: the last-known state of one filesystem entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Inode {
	pub node_path: String,
	pub bytesize: i64,
	pub md5: String,
	pub mtime: f64,
	pub stat_result: Vec<u8>,
}

impl Inode {
	/// The sentinel MD5 stored for directory inodes.
	pub const DIRECTORY_MD5: &'static str = "directory";

	pub fn directory(node_path: impl Into<String>) -> Self {
		Self {
			node_path: node_path.into(),
			bytesize: 0,
			md5: Self::DIRECTORY_MD5.to_owned(),
			mtime: 0.0,
			stat_result: Vec::new(),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
	Create,
	Delete,
	Modify,
	Move,
}

impl ChangeKind {
	fn as_str(self) -> &'static str {
		match self {
			ChangeKind::Create => "create",
			ChangeKind::Delete => "delete",
			ChangeKind::Modify => "modify",
			ChangeKind::Move => "move",
		}
	}
}

impl FromStr for ChangeKind {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		match s {
			"create" => Ok(ChangeKind::Create),
			"delete" => Ok(ChangeKind::Delete),
			"modify" => Ok(ChangeKind::Modify),
			"move" => Ok(ChangeKind::Move),
			other => Err(Error::state_mismatch("", format!("unknown change kind '{other}'"))),
		}
	}
}

/// A row of `ajxp_changes`.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
	pub seq: i64,
	pub node_id: Option<i64>,
	pub kind: ChangeKind,
	pub source: String,
	pub target: String,
}

pub struct IndexStore {
	pool: SqlitePool,
}

impl IndexStore {
	/// Opens (creating if absent) the sqlite file at `path` and ensures the
	/// schema and change-log triggers exist. `:memory:` databases keep a
	/// single pooled connection alive for the store's whole lifetime.
	pub async fn init(path: &Path) -> Result<Self> {
		let is_memory = path.as_os_str() == ":memory:";

		if !is_memory {
			if let Some(parent) = path.parent() {
				if !parent.as_os_str().is_empty() {
					tokio::fs::create_dir_all(parent).await.map_err(|err| {
						Error::StorageUnavailable(StorageError::CreateDir(
							parent.display().to_string(),
							err,
						))
					})?;
				}
			}
		}

		let options = if is_memory {
			SqliteConnectOptions::new().in_memory(true)
		} else {
			SqliteConnectOptions::new().filename(path).create_if_missing(true)
		};

		let pool = SqlitePoolOptions::new()
			.max_connections(1)
			.min_connections(1)
			.connect_with(options)
			.await
			.map_err(|err| Error::StorageUnavailable(StorageError::Open(err)))?;

		sqlx::raw_sql(SCHEMA)
			.execute(&pool)
			.await
			.map_err(|err| Error::StorageUnavailable(StorageError::Open(err)))?;

		sqlx::query("SELECT * FROM ajxp_index LIMIT 1")
			.fetch_optional(&pool)
			.await
			.map_err(|err| Error::StorageUnavailable(StorageError::SchemaProbe(err)))?;

		Ok(Self { pool })
	}

	pub fn pool(&self) -> &SqlitePool {
		&self.pool
	}

	pub async fn close(self) {
		self.pool.close().await;
	}

	pub async fn get_inode(&self, node_path: &str) -> Result<Option<Inode>> {
		let row = sqlx::query("SELECT node_path, bytesize, md5, mtime, stat_result FROM ajxp_index WHERE node_path = ?1")
			.bind(node_path)
			.fetch_optional(&self.pool)
			.await?;

		Ok(row.map(|row| Inode {
			node_path: row.get("node_path"),
			bytesize: row.get("bytesize"),
			md5: row.get("md5"),
			mtime: row.get("mtime"),
			stat_result: row.get("stat_result"),
		}))
	}

	pub async fn list_subtree(&self, node_path: &str) -> Result<Vec<Inode>> {
		let prefix = format!("{node_path}/%");
		let rows = sqlx::query(
			"SELECT node_path, bytesize, md5, mtime, stat_result FROM ajxp_index \
			 WHERE node_path = ?1 OR node_path LIKE ?2 ORDER BY node_path",
		)
		.bind(node_path)
		.bind(prefix)
		.fetch_all(&self.pool)
		.await?;

		Ok(rows
			.into_iter()
			.map(|row| Inode {
				node_path: row.get("node_path"),
				bytesize: row.get("bytesize"),
				md5: row.get("md5"),
				mtime: row.get("mtime"),
				stat_result: row.get("stat_result"),
			})
			.collect())
	}

	/// Changes with `seq > cursor`, ordered by `seq` ascending.
	pub async fn changes_since(&self, cursor: i64) -> Result<Vec<Change>> {
		let rows = sqlx::query(
			"SELECT seq, node_id, type, source, target FROM ajxp_changes WHERE seq > ?1 ORDER BY seq ASC",
		)
		.bind(cursor)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter()
			.map(|row| {
				let kind: String = row.get("type");
				Ok(Change {
					seq: row.get("seq"),
					node_id: row.get("node_id"),
					kind: kind.parse()?,
					source: row.get("source"),
					target: row.get("target"),
				})
			})
			.collect()
	}

	pub async fn max_seq(&self) -> Result<i64> {
		let row = sqlx::query("SELECT COALESCE(MAX(seq), 0) AS m FROM ajxp_changes")
			.fetch_one(&self.pool)
			.await?;
		Ok(row.get("m"))
	}

	pub async fn load_cursor(&self) -> Result<i64> {
		let row = sqlx::query("SELECT cursor FROM ajxp_cursor WHERE id = 0")
			.fetch_one(&self.pool)
			.await?;
		Ok(row.get("cursor"))
	}

	pub async fn save_cursor(&self, cursor: i64) -> Result<()> {
		sqlx::query("UPDATE ajxp_cursor SET cursor = ?1 WHERE id = 0")
			.bind(cursor)
			.execute(&self.pool)
			.await?;
		Ok(())
	}
}
