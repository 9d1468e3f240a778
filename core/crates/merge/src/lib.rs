//! Binds two [`SynchronizableEndpoint`]s, enforces the single-active-merge
//! guarantee, and reconciles their change streams with a pluggable
//! [`MergeStrategy`].

mod guard;
mod strategy;

pub use guard::MergeGuard;
pub use strategy::{
	Clock, ConflictPolicy, Direction, MergeStrategy, Plan, ReconcileOp, Side, SystemClock, TwoWayStrategy,
};

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use ps_errors::Result;
use ps_sync_endpoint::SynchronizableEndpoint;

/// Observability-only snapshot of where `sync()` currently is. Does not gate
/// control flow beyond the `?`-propagation already present in each step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
	Idle,
	Acquiring,
	ReadyChecking,
	Fetching,
	Merging,
	Applying,
}

pub struct MergeCoordinator {
	local: Arc<dyn SynchronizableEndpoint>,
	remote: Arc<dyn SynchronizableEndpoint>,
	direction: Direction,
	strategy: Box<dyn MergeStrategy>,
	merge_lock: Arc<AtomicBool>,
}

impl MergeCoordinator {
	pub fn new(
		local: Arc<dyn SynchronizableEndpoint>,
		remote: Arc<dyn SynchronizableEndpoint>,
		direction: Direction,
		strategy: Box<dyn MergeStrategy>,
	) -> Self {
		Self {
			local,
			remote,
			direction,
			strategy,
			merge_lock: Arc::new(AtomicBool::new(false)),
		}
	}

	/// Runs one merge pass. A concurrent call observes the lock held,
	/// logs, and returns `Ok(())` rather than propagating `ConcurrentMerge`.
	pub async fn sync(&self) -> Result<()> {
		tracing::info!(state = ?MergeState::Acquiring, "merge: acquiring lock");
		let Some(_guard) = MergeGuard::try_acquire(&self.merge_lock) else {
			tracing::warn!("merge already in progress, skipping this tick");
			return Ok(());
		};

		tracing::info!(state = ?MergeState::ReadyChecking, "merge: checking readiness");
		tokio::try_join!(self.local.assert_ready(), self.remote.assert_ready())?;

		tracing::info!(state = ?MergeState::Fetching, "merge: fetching changes");
		let (local_changes, remote_changes) = tokio::try_join!(
			self.local.get_changes(self.local.cursor()),
			self.remote.get_changes(self.remote.cursor())
		)?;

		tracing::info!(
			state = ?MergeState::Merging,
			local_count = local_changes.len(),
			remote_count = remote_changes.len(),
			"merge: reconciling"
		);
		let plan = self.strategy.plan(&local_changes, &remote_changes, self.direction);

		tracing::info!(state = ?MergeState::Applying, ops = plan.operations.len(), "merge: applying");
		// Track, per originating side, the lowest seq that failed to apply —
		// a skipped change must not have its side's cursor advance past it,
		// or it would never be re-fetched on a later tick.
		let mut local_failed_at: Option<i64> = None;
		let mut remote_failed_at: Option<i64> = None;

		for op in &plan.operations {
			if let Err(err) = op.apply(&self.local, &self.remote).await {
				match err {
					ps_errors::Error::StateMismatch { ref path, ref reason } => {
						tracing::warn!(path = %path, reason = %reason, "state mismatch applying reconcile op, skipping path");
						if let Some((origin, seq)) = reconcile_op_origin(op) {
							let slot = match origin {
								Side::Local => &mut local_failed_at,
								Side::Remote => &mut remote_failed_at,
							};
							*slot = Some(slot.map_or(seq, |existing| existing.min(seq)));
						}
					}
					other => return Err(other),
				}
			}
		}

		let local_max = local_changes.iter().map(|c| c.seq).max();
		let remote_max = remote_changes.iter().map(|c| c.seq).max();
		if let Some(seq) = cursor_target(local_max, local_failed_at) {
			self.local.advance_cursor(seq).await?;
		}
		if let Some(seq) = cursor_target(remote_max, remote_failed_at) {
			self.remote.advance_cursor(seq).await?;
		}

		tracing::info!(state = ?MergeState::Idle, "merge: done");
		Ok(())
	}
}

/// The side whose own change stream `op` ultimately re-applies elsewhere,
/// together with that change's `seq` in its origin's sequence — i.e. the
/// opposite of `op`'s destination `side`. `Rename` carries no change of its
/// own and has no origin to report.
fn reconcile_op_origin(op: &ReconcileOp) -> Option<(Side, i64)> {
	match op {
		ReconcileOp::Apply { side, change } => {
			let origin = match side {
				Side::Local => Side::Remote,
				Side::Remote => Side::Local,
			};
			Some((origin, change.seq))
		}
		ReconcileOp::Rename { .. } => None,
	}
}

/// The cursor to persist for one side: the highest observed `seq` unless a
/// change at or after some `seq` failed to apply, in which case the cursor
/// stops just short of it so that change is re-fetched on the next tick.
fn cursor_target(max_observed: Option<i64>, failed_at: Option<i64>) -> Option<i64> {
	match (max_observed, failed_at) {
		(Some(max), Some(failed)) => Some(max.min(failed - 1)),
		(max, None) => max,
		(None, Some(_)) => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use ps_sync_endpoint::ResolvedChange;
	use std::sync::atomic::Ordering;
	use std::sync::Mutex;

	struct StubEndpoint {
		ready: bool,
		changes: Vec<ResolvedChange>,
		cursor: std::sync::atomic::AtomicI64,
		applied: Mutex<Vec<ResolvedChange>>,
		mismatched_targets: Vec<String>,
	}

	impl StubEndpoint {
		fn new(ready: bool, changes: Vec<ResolvedChange>) -> Self {
			Self {
				ready,
				changes,
				cursor: std::sync::atomic::AtomicI64::new(0),
				applied: Mutex::new(Vec::new()),
				mismatched_targets: Vec::new(),
			}
		}

		fn with_mismatch_on(mut self, target: &str) -> Self {
			self.mismatched_targets.push(target.to_owned());
			self
		}
	}

	#[async_trait]
	impl SynchronizableEndpoint for StubEndpoint {
		async fn assert_ready(&self) -> Result<()> {
			if self.ready {
				Ok(())
			} else {
				Err(ps_errors::Error::EndpointUnavailable("stub not ready".into()))
			}
		}

		async fn get_changes(&self, cursor: i64) -> Result<Vec<ResolvedChange>> {
			Ok(self.changes.iter().filter(|c| c.seq > cursor).cloned().collect())
		}

		fn cursor(&self) -> i64 {
			self.cursor.load(Ordering::SeqCst)
		}

		async fn advance_cursor(&self, new_cursor: i64) -> Result<()> {
			self.cursor.store(new_cursor, Ordering::SeqCst);
			Ok(())
		}

		async fn apply_change(&self, change: &ResolvedChange) -> Result<()> {
			if self.mismatched_targets.iter().any(|t| t == &change.target) {
				return Err(ps_errors::Error::state_mismatch(change.target.clone(), "stubbed mismatch"));
			}
			self.applied.lock().unwrap().push(change.clone());
			Ok(())
		}

		async fn rename(&self, _from: &str, _to: &str) -> Result<()> {
			Ok(())
		}
	}

	fn change(seq: i64, target: &str) -> ResolvedChange {
		ResolvedChange {
			seq,
			node_id: Some(seq),
			kind: ps_index_store::ChangeKind::Create,
			source: String::new(),
			target: target.to_owned(),
			bytesize: Some(1),
			md5: Some("abc".into()),
			mtime: Some(1.0),
		}
	}

	// Invariant: two concurrent sync() calls never both proceed past the lock.
	#[tokio::test]
	async fn merge_lock_rejects_concurrent_sync() {
		let local = Arc::new(StubEndpoint::new(true, vec![change(1, "a.txt")]));
		let remote = Arc::new(StubEndpoint::new(true, vec![]));
		let coordinator = Arc::new(MergeCoordinator::new(
			local,
			remote,
			Direction::Bi,
			Box::new(TwoWayStrategy::new(ConflictPolicy::Both, Arc::new(SystemClock))),
		));

		let guard = MergeGuard::try_acquire(&coordinator.merge_lock).unwrap();
		let result = coordinator.sync().await;
		assert!(result.is_ok());
		drop(guard);
	}

	#[tokio::test]
	async fn unready_endpoint_propagates_error() {
		let local = Arc::new(StubEndpoint::new(false, vec![]));
		let remote = Arc::new(StubEndpoint::new(true, vec![]));
		let coordinator = MergeCoordinator::new(
			local,
			remote,
			Direction::Bi,
			Box::new(TwoWayStrategy::new(ConflictPolicy::Both, Arc::new(SystemClock))),
		);

		let result = coordinator.sync().await;
		assert!(matches!(result, Err(ps_errors::Error::EndpointUnavailable(_))));
	}

	#[tokio::test]
	async fn one_sided_change_propagates_to_the_other_endpoint() {
		let local = Arc::new(StubEndpoint::new(true, vec![change(1, "a.txt")]));
		let remote = Arc::new(StubEndpoint::new(true, vec![]));
		let coordinator = MergeCoordinator::new(
			local,
			remote.clone(),
			Direction::Bi,
			Box::new(TwoWayStrategy::new(ConflictPolicy::Both, Arc::new(SystemClock))),
		);

		coordinator.sync().await.unwrap();
		assert_eq!(remote.applied.lock().unwrap().len(), 1);
	}

	// StateMismatch on one path is logged and skipped; sync still completes
	// and still applies the other, unaffected paths.
	#[tokio::test]
	async fn state_mismatch_on_one_path_is_skipped_not_fatal() {
		let local = Arc::new(StubEndpoint::new(
			true,
			vec![change(1, "broken.txt"), change(2, "fine.txt")],
		));
		let remote = Arc::new(StubEndpoint::new(true, vec![]).with_mismatch_on("broken.txt"));
		let coordinator = MergeCoordinator::new(
			local.clone(),
			remote.clone(),
			Direction::Bi,
			Box::new(TwoWayStrategy::new(ConflictPolicy::Both, Arc::new(SystemClock))),
		);

		let result = coordinator.sync().await;
		assert!(result.is_ok());
		let applied = remote.applied.lock().unwrap();
		assert_eq!(applied.len(), 1);
		assert_eq!(applied[0].target, "fine.txt");

		// local's cursor must not pass the seq of the change that failed to
		// apply, or "broken.txt" would never be retried on the next tick.
		assert_eq!(local.cursor(), 0);
	}

	// A non-StateMismatch error applying a reconcile op still aborts the sync.
	#[tokio::test]
	async fn transport_failure_applying_a_change_aborts_sync() {
		struct FailingApply(StubEndpoint);

		#[async_trait]
		impl SynchronizableEndpoint for FailingApply {
			async fn assert_ready(&self) -> Result<()> {
				self.0.assert_ready().await
			}
			async fn get_changes(&self, cursor: i64) -> Result<Vec<ResolvedChange>> {
				self.0.get_changes(cursor).await
			}
			fn cursor(&self) -> i64 {
				self.0.cursor()
			}
			async fn advance_cursor(&self, new_cursor: i64) -> Result<()> {
				self.0.advance_cursor(new_cursor).await
			}
			async fn apply_change(&self, _change: &ResolvedChange) -> Result<()> {
				Err(ps_errors::Error::EndpointUnavailable("down".into()))
			}
			async fn rename(&self, from: &str, to: &str) -> Result<()> {
				self.0.rename(from, to).await
			}
		}

		let local = Arc::new(StubEndpoint::new(true, vec![change(1, "a.txt")]));
		let remote = Arc::new(FailingApply(StubEndpoint::new(true, vec![])));
		let coordinator = MergeCoordinator::new(
			local,
			remote,
			Direction::Bi,
			Box::new(TwoWayStrategy::new(ConflictPolicy::Both, Arc::new(SystemClock))),
		);

		let result = coordinator.sync().await;
		assert!(matches!(result, Err(ps_errors::Error::EndpointUnavailable(_))));
	}
}
