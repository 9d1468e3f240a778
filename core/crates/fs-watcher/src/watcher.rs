use std::path::{Path, PathBuf};
use std::sync::Arc;

use md5::{Digest, Md5};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use ps_errors::{Error, Result};
use ps_index_store::Inode;
use ps_state_manager::{Intent, StateSink};
use tokio::sync::mpsc;

use crate::event::{classify, encode_stat, RawEvent, StatBlob};
use crate::filter::FilterSet;

/// Observes `root` recursively, filters and enriches events, and dispatches
/// the resulting intents to `sink`. The `notify` watcher's OS thread only
/// ever pushes raw events onto an mpsc channel; all IO-bearing enrichment
/// happens in the async consumer loop via `spawn_blocking`.
pub struct EventHandler {
	root: PathBuf,
	filter: FilterSet,
	sink: Arc<dyn StateSink>,
}

impl EventHandler {
	pub fn new(root: impl Into<PathBuf>, filter: FilterSet, sink: Arc<dyn StateSink>) -> Self {
		Self { root: root.into(), filter, sink }
	}

	/// Spawns the platform watcher and the consumer loop, returning a handle
	/// that can be used to shut both down.
	pub fn spawn(self) -> Result<WatcherHandle> {
		let (tx, rx) = std::sync::mpsc::channel::<notify::Result<notify::Event>>();

		let mut watcher = notify::recommended_watcher(move |event| {
			let _ = tx.send(event);
		})
		.map_err(watch_err)?;

		watcher
			.watch(&self.root, RecursiveMode::Recursive)
			.map_err(watch_err)?;

		let (async_tx, mut async_rx) = mpsc::unbounded_channel::<notify::Event>();

		// notify delivers events on its own OS thread; bridge them onto a
		// tokio channel without blocking the async runtime.
		let bridge = std::thread::spawn(move || {
			while let Ok(Ok(event)) = rx.recv() {
				if async_tx.send(event).is_err() {
					break;
				}
			}
		});

		let root = self.root.clone();
		let filter = self.filter;
		let sink = self.sink;

		let consumer = tokio::spawn(async move {
			while let Some(event) = async_rx.recv().await {
				if let Err(err) = handle_event(&root, &filter, &sink, event).await {
					tracing::error!(error = %err, "event enrichment failed");
				}
			}
		});

		Ok(WatcherHandle {
			watcher,
			bridge: Some(bridge),
			consumer: Some(consumer),
		})
	}
}

pub struct WatcherHandle {
	watcher: RecommendedWatcher,
	bridge: Option<std::thread::JoinHandle<()>>,
	consumer: Option<tokio::task::JoinHandle<()>>,
}

impl WatcherHandle {
	pub async fn shutdown(mut self) {
		drop(self.watcher);
		if let Some(consumer) = self.consumer.take() {
			consumer.abort();
			let _ = consumer.await;
		}
		if let Some(bridge) = self.bridge.take() {
			let _ = bridge.join();
		}
	}
}

fn watch_err(err: notify::Error) -> Error {
	Error::EndpointUnavailable(err.to_string())
}

async fn handle_event(
	root: &Path,
	filter: &FilterSet,
	sink: &Arc<dyn StateSink>,
	event: notify::Event,
) -> Result<()> {
	let Some(first_path) = event.paths.first() else {
		return Ok(());
	};
	let is_dir = tokio::fs::metadata(first_path).await.map(|m| m.is_dir()).unwrap_or(false);

	let Some(raw) = classify(&event.kind, &event.paths, is_dir) else {
		return Ok(());
	};

	match raw {
		RawEvent::Created { path, is_dir } => {
			let Some(rel) = accepted_relative(root, filter, &path) else { return Ok(()) };
			let inode = build_inode(root, &rel, is_dir).await?;
			sink.apply(Intent::Create { inode, is_dir }).await
		}
		RawEvent::Deleted { path, is_dir } => {
			let Some(rel) = accepted_relative(root, filter, &path) else { return Ok(()) };
			sink.apply(Intent::Delete { node_path: rel, is_dir }).await
		}
		RawEvent::Modified { path, is_dir } => {
			let Some(rel) = accepted_relative(root, filter, &path) else { return Ok(()) };
			let inode = build_inode(root, &rel, is_dir).await?;
			sink.apply(Intent::Modify { inode, is_dir }).await
		}
		RawEvent::Moved { from, to, is_dir } => {
			let old_rel = ps_path_utils::relative(root, &from).unwrap_or(from);
			let Some(new_rel) = accepted_relative(root, filter, &to) else { return Ok(()) };
			let inode = build_inode(root, &new_rel, is_dir).await?;
			sink.apply(Intent::Move { old_path: old_rel, inode, is_dir }).await
		}
	}
}

fn accepted_relative(root: &Path, filter: &FilterSet, path: &str) -> Option<String> {
	let rel = ps_path_utils::relative(root, path)?;
	filter.accepts(&rel).then_some(rel)
}

async fn build_inode(root: &Path, rel: &str, is_dir: bool) -> Result<Inode> {
	if is_dir {
		return Ok(Inode::directory(rel));
	}

	let full = ps_path_utils::join(root, rel);
	let metadata = tokio::fs::metadata(&full).await?;
	let mtime = metadata
		.modified()
		.ok()
		.and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
		.map(|d| d.as_secs_f64())
		.unwrap_or(0.0);

	let stat = StatBlob {
		len: metadata.len(),
		mtime,
		readonly: metadata.permissions().readonly(),
	};

	let md5 = compute_md5(full).await?;

	Ok(Inode {
		node_path: rel.to_owned(),
		bytesize: metadata.len() as i64,
		md5,
		mtime,
		stat_result: encode_stat(&stat),
	})
}

async fn compute_md5(path: PathBuf) -> Result<String> {
	tokio::task::spawn_blocking(move || -> Result<String> {
		let mut file = std::fs::File::open(&path)?;
		let mut hasher = Md5::new();
		std::io::copy(&mut file, &mut hasher)?;
		Ok(hex::encode(hasher.finalize()))
	})
	.await
	.map_err(|err| Error::EndpointUnavailable(err.to_string()))?
}
