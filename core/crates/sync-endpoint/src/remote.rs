use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ps_errors::{Error, Result};
use ps_index_store::ChangeKind;
use serde::{Deserialize, Serialize};

use crate::{ResolvedChange, SynchronizableEndpoint};

/// Connection parameters for a remote Pydio workspace. Owned by the job
/// configuration; translated here into a `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
	pub server: String,
	pub workspace: String,
	pub remote_folder: String,
	pub user_id: String,
	pub device_id: String,
	pub trust_ssl: bool,
	pub proxies: Vec<String>,
	pub timeout: Duration,
}

impl Default for RemoteConfig {
	fn default() -> Self {
		Self {
			server: String::new(),
			workspace: String::new(),
			remote_folder: String::new(),
			user_id: String::new(),
			device_id: String::new(),
			trust_ssl: false,
			proxies: Vec::new(),
			timeout: Duration::from_secs(20),
		}
	}
}

/// The wire-level operations a remote endpoint needs. Kept as a trait so the
/// concrete Pydio API surface can change without touching the merge path.
#[async_trait]
pub trait RemoteSdk: Send + Sync {
	async fn ping(&self) -> Result<()>;
	async fn get_changes(&self, cursor: i64) -> Result<Vec<ResolvedChange>>;
	async fn push_change(&self, change: &ResolvedChange) -> Result<()>;
	async fn rename(&self, from: &str, to: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct WireChange {
	seq: i64,
	#[serde(rename = "type")]
	kind: String,
	source: String,
	target: String,
	bytesize: Option<i64>,
	md5: Option<String>,
	mtime: Option<f64>,
}

#[derive(Debug, Serialize)]
struct WirePush<'a> {
	#[serde(rename = "type")]
	kind: &'a str,
	source: &'a str,
	target: &'a str,
	bytesize: Option<i64>,
	md5: Option<&'a str>,
	mtime: Option<f64>,
}

fn change_kind_str(kind: ChangeKind) -> &'static str {
	match kind {
		ChangeKind::Create => "create",
		ChangeKind::Delete => "delete",
		ChangeKind::Modify => "modify",
		ChangeKind::Move => "move",
	}
}

/// The default `RemoteSdk`, speaking a small JSON changes API over HTTP.
pub struct HttpRemoteSdk {
	client: reqwest::Client,
	config: RemoteConfig,
}

impl HttpRemoteSdk {
	pub fn new(config: RemoteConfig) -> Result<Self> {
		let mut builder = reqwest::Client::builder()
			.timeout(config.timeout)
			.danger_accept_invalid_certs(config.trust_ssl);

		for proxy in &config.proxies {
			builder = builder.proxy(reqwest::Proxy::all(proxy)?);
		}

		Ok(Self {
			client: builder.build()?,
			config,
		})
	}
}

#[async_trait]
impl RemoteSdk for HttpRemoteSdk {
	async fn ping(&self) -> Result<()> {
		let url = format!("{}/api/ping", self.config.server.trim_end_matches('/'));
		let result = async {
			self.client.get(&url).send().await?.error_for_status()?;
			Ok::<(), reqwest::Error>(())
		}
		.await;

		result.map_err(|err| Error::EndpointUnavailable(format!("{url}: {err}")))
	}

	async fn get_changes(&self, cursor: i64) -> Result<Vec<ResolvedChange>> {
		let url = format!("{}/api/changes", self.config.server.trim_end_matches('/'));
		let response = self
			.client
			.get(url)
			.query(&[
				("workspace", self.config.workspace.as_str()),
				("remote_folder", self.config.remote_folder.as_str()),
				("user_id", self.config.user_id.as_str()),
				("device_id", self.config.device_id.as_str()),
				("seq", &cursor.to_string()),
			])
			.send()
			.await?
			.error_for_status()?;

		let wire: Vec<WireChange> = response.json().await?;

		wire.into_iter()
			.map(|c| {
				let kind: ChangeKind = c.kind.parse()?;
				Ok(ResolvedChange {
					seq: c.seq,
					node_id: None,
					kind,
					source: c.source,
					target: c.target,
					bytesize: c.bytesize,
					md5: c.md5,
					mtime: c.mtime,
				})
			})
			.collect()
	}

	async fn push_change(&self, change: &ResolvedChange) -> Result<()> {
		let url = format!("{}/api/changes", self.config.server.trim_end_matches('/'));
		let body = WirePush {
			kind: change_kind_str(change.kind),
			source: &change.source,
			target: &change.target,
			bytesize: change.bytesize,
			md5: change.md5.as_deref(),
			mtime: change.mtime,
		};
		self.client
			.put(url)
			.query(&[
				("workspace", self.config.workspace.as_str()),
				("remote_folder", self.config.remote_folder.as_str()),
			])
			.json(&body)
			.send()
			.await?
			.error_for_status()?;
		Ok(())
	}

	async fn rename(&self, from: &str, to: &str) -> Result<()> {
		let url = format!("{}/api/rename", self.config.server.trim_end_matches('/'));
		self.client
			.post(url)
			.query(&[
				("workspace", self.config.workspace.as_str()),
				("from", from),
				("to", to),
			])
			.send()
			.await?
			.error_for_status()?;
		Ok(())
	}
}

/// Pluggable remote endpoint: bound to whatever `RemoteSdk` the job was
/// configured with, with its cursor held in memory for the process lifetime.
pub struct RemoteEndpoint {
	sdk: Arc<dyn RemoteSdk>,
	cursor: AtomicI64,
}

impl RemoteEndpoint {
	pub fn new(sdk: Arc<dyn RemoteSdk>, initial_cursor: i64) -> Self {
		Self {
			sdk,
			cursor: AtomicI64::new(initial_cursor),
		}
	}
}

#[async_trait]
impl SynchronizableEndpoint for RemoteEndpoint {
	async fn assert_ready(&self) -> Result<()> {
		self.sdk.ping().await
	}

	async fn get_changes(&self, cursor: i64) -> Result<Vec<ResolvedChange>> {
		self.sdk.get_changes(cursor).await
	}

	fn cursor(&self) -> i64 {
		self.cursor.load(Ordering::SeqCst)
	}

	async fn advance_cursor(&self, new_cursor: i64) -> Result<()> {
		self.cursor.store(new_cursor, Ordering::SeqCst);
		Ok(())
	}

	async fn apply_change(&self, change: &ResolvedChange) -> Result<()> {
		self.sdk.push_change(change).await
	}

	async fn rename(&self, from: &str, to: &str) -> Result<()> {
		self.sdk.rename(from, to).await
	}
}
