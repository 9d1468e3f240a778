use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A `Drop`-based RAII guard over the merge lock. Acquired with a single
/// `compare_exchange` (never a blocking wait); released unconditionally,
/// on every exit path, when the guard goes out of scope.
pub struct MergeGuard {
	lock: Arc<AtomicBool>,
}

impl MergeGuard {
	pub fn try_acquire(lock: &Arc<AtomicBool>) -> Option<Self> {
		lock.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.ok()
			.map(|_| Self { lock: lock.clone() })
	}
}

impl Drop for MergeGuard {
	fn drop(&mut self) {
		self.lock.store(false, Ordering::Release);
	}
}
