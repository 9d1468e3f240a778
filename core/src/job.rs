//! Wires one job's configuration into a running set of components and
//! owns their lifecycle, the in-core analogue of an external scheduler
//! composing several long-lived services.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ps_errors::Result;
use ps_fs_watcher::{EventHandler, FilterSet, WatcherHandle};
use ps_index_store::IndexStore;
use ps_merge::{MergeCoordinator, SystemClock, TwoWayStrategy};
use ps_state_manager::{StateManager, StateSink};
use ps_sync_endpoint::{HttpRemoteSdk, LocalEndpoint, RemoteConfig, RemoteEndpoint, SynchronizableEndpoint};
use tokio::task::JoinHandle;

use crate::config::{Frequency, JobConfig};
use crate::sched::{ClockLoop, Looper, PeriodicLoop};

/// A single synchronized directory, end to end: watcher, index store,
/// endpoints, merge coordinator, and the loop that drives `sync()`.
pub struct Job {
	name: String,
	watcher: Option<WatcherHandle>,
	looper_handle: Option<JoinHandle<()>>,
}

impl Job {
	pub async fn start(name: impl Into<String>, config: JobConfig) -> Result<Self> {
		let name = name.into();
		let data_dir: PathBuf = config.directory.join(".ps-sync");
		let db_path = data_dir.join("index.sqlite");

		let store = Arc::new(IndexStore::init(&db_path).await?);
		let sink: Arc<dyn StateSink> = Arc::new(StateManager::new(store.clone()));

		let filter = FilterSet::new(&config.includes, &config.excludes)?;
		let watcher = EventHandler::new(config.directory.clone(), filter, sink.clone()).spawn()?;

		let local: Arc<dyn SynchronizableEndpoint> =
			Arc::new(LocalEndpoint::new(config.directory.clone(), store.clone(), sink).await?);

		let remote_config = RemoteConfig {
			server: config.server.clone(),
			workspace: config.workspace.clone(),
			remote_folder: String::new(),
			user_id: String::new(),
			device_id: name.clone(),
			trust_ssl: config.trust_ssl,
			proxies: Vec::new(),
			timeout: Duration::from_secs(config.timeout),
		};
		let sdk = Arc::new(HttpRemoteSdk::new(remote_config)?);
		let remote: Arc<dyn SynchronizableEndpoint> = Arc::new(RemoteEndpoint::new(sdk, 0));

		let strategy = Box::new(TwoWayStrategy::new(config.solve, Arc::new(SystemClock)));
		let coordinator = Arc::new(MergeCoordinator::new(local, remote, config.direction, strategy));

		let tick = Arc::new(move || {
			let coordinator = coordinator.clone();
			Box::pin(async move {
				if let Err(err) = coordinator.sync().await {
					tracing::error!(error = %err, "sync failed");
				}
			}) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
		});

		let looper_handle = match config.frequency {
			Frequency::Seconds(secs) => Arc::new(PeriodicLoop::new(Duration::from_secs(secs))).start(tick),
			Frequency::Clock(at) => Arc::new(ClockLoop::new(at)).start(tick),
		};

		Ok(Self {
			name,
			watcher: Some(watcher),
			looper_handle: Some(looper_handle),
		})
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub async fn stop(mut self) {
		if let Some(handle) = self.looper_handle.take() {
			handle.abort();
		}
		if let Some(watcher) = self.watcher.take() {
			watcher.shutdown().await;
		}
	}
}
