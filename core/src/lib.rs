//! Assembles the filesystem watcher, index store, synchronizable
//! endpoints, and merge coordinator into runnable synchronization jobs.

pub mod config;
pub mod job;
pub mod sched;

pub use config::{load_jobs, Frequency, JobConfig};
pub use job::Job;

/// Installs a `tracing_subscriber::fmt` layer honoring `RUST_LOG`, the
/// same ambient-logging convention used across this workspace's crates.
pub fn init_tracing() {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).init();
}
