//! Scheduling primitives that invoke a job's `sync()` on a timer.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveTime, Timelike, Utc};
use tokio::task::JoinHandle;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A start/stop-aware periodic trigger, mirroring the rest of this
/// workspace's service lifecycle convention.
pub trait Looper: Send + Sync {
	fn start(self: Arc<Self>, tick: Arc<dyn Fn() -> BoxFuture + Send + Sync>) -> JoinHandle<()>;
}

/// Fires every `interval`.
pub struct PeriodicLoop {
	interval: Duration,
}

impl PeriodicLoop {
	pub fn new(interval: Duration) -> Self {
		Self { interval }
	}
}

impl Looper for PeriodicLoop {
	fn start(self: Arc<Self>, tick: Arc<dyn Fn() -> BoxFuture + Send + Sync>) -> JoinHandle<()> {
		let interval = self.interval;
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(interval);
			loop {
				ticker.tick().await;
				tick().await;
			}
		})
	}
}

/// Fires once per day at a fixed wall-clock time.
pub struct ClockLoop {
	at: NaiveTime,
}

impl ClockLoop {
	pub fn new(at: NaiveTime) -> Self {
		Self { at }
	}

	fn duration_until_next(&self) -> Duration {
		let now = Utc::now();
		let today_at = now.date_naive().and_time(self.at);
		let target = if today_at > now.naive_utc() {
			today_at
		} else {
			today_at + chrono::Duration::days(1)
		};
		(target - now.naive_utc())
			.to_std()
			.unwrap_or(Duration::from_secs(0))
	}
}

impl Looper for ClockLoop {
	fn start(self: Arc<Self>, tick: Arc<dyn Fn() -> BoxFuture + Send + Sync>) -> JoinHandle<()> {
		tokio::spawn(async move {
			loop {
				tokio::time::sleep(self.duration_until_next()).await;
				tick().await;
			}
		})
	}
}
