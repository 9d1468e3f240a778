use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use ps_errors::Result;
use ps_sync_endpoint::{ResolvedChange, SynchronizableEndpoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
	Up,
	Down,
	Bi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
	Local,
	Remote,
	Both,
}

/// Injectable wall-clock, so conflict-suffix generation is deterministic
/// in tests.
pub trait Clock: Send + Sync {
	fn now_unix(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
	fn now_unix(&self) -> i64 {
		SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
	Local,
	Remote,
}

#[derive(Debug, Clone)]
pub enum ReconcileOp {
	Apply { side: Side, change: ResolvedChange },
	Rename { side: Side, from: String, to: String },
}

impl ReconcileOp {
	pub async fn apply(
		&self,
		local: &Arc<dyn SynchronizableEndpoint>,
		remote: &Arc<dyn SynchronizableEndpoint>,
	) -> Result<()> {
		match self {
			ReconcileOp::Apply { side: Side::Local, change } => local.apply_change(change).await,
			ReconcileOp::Apply { side: Side::Remote, change } => remote.apply_change(change).await,
			ReconcileOp::Rename { side: Side::Local, from, to } => local.rename(from, to).await,
			ReconcileOp::Rename { side: Side::Remote, from, to } => remote.rename(from, to).await,
		}
	}
}

pub struct Plan {
	pub operations: Vec<ReconcileOp>,
}

pub trait MergeStrategy: Send + Sync {
	fn plan(&self, local: &[ResolvedChange], remote: &[ResolvedChange], direction: Direction) -> Plan;
}

/// Groups both change streams by the path they ultimately refer to, then
/// resolves each path independently: changes seen on only one side
/// propagate to the other; changes seen on both are conflicts, resolved
/// per `ConflictPolicy`.
pub struct TwoWayStrategy {
	policy: ConflictPolicy,
	clock: Arc<dyn Clock>,
}

impl TwoWayStrategy {
	pub fn new(policy: ConflictPolicy, clock: Arc<dyn Clock>) -> Self {
		Self { policy, clock }
	}
}

fn change_path(change: &ResolvedChange) -> &str {
	if change.target.is_empty() {
		&change.source
	} else {
		&change.target
	}
}

fn latest_by_path(changes: &[ResolvedChange]) -> BTreeMap<String, ResolvedChange> {
	let mut map = BTreeMap::new();
	for change in changes {
		let path = change_path(change).to_owned();
		map.entry(path)
			.and_modify(|existing: &mut ResolvedChange| {
				if change.seq > existing.seq {
					*existing = change.clone();
				}
			})
			.or_insert_with(|| change.clone());
	}
	map
}

impl MergeStrategy for TwoWayStrategy {
	fn plan(&self, local: &[ResolvedChange], remote: &[ResolvedChange], direction: Direction) -> Plan {
		let local_map = latest_by_path(local);
		let remote_map = latest_by_path(remote);

		let mut paths: Vec<&String> = local_map.keys().chain(remote_map.keys()).collect();
		paths.sort();
		paths.dedup();

		let mut operations = Vec::new();

		for path in paths {
			match (local_map.get(path), remote_map.get(path)) {
				(Some(l), None) => {
					if matches!(direction, Direction::Up | Direction::Bi) {
						operations.push(ReconcileOp::Apply { side: Side::Remote, change: l.clone() });
					}
				}
				(None, Some(r)) => {
					if matches!(direction, Direction::Down | Direction::Bi) {
						operations.push(ReconcileOp::Apply { side: Side::Local, change: r.clone() });
					}
				}
				(Some(l), Some(r)) => {
					self.resolve_conflict(path, l, r, direction, &mut operations);
				}
				(None, None) => unreachable!("path came from one of the two maps"),
			}
		}

		Plan { operations }
	}
}

impl TwoWayStrategy {
	fn resolve_conflict(
		&self,
		path: &str,
		local_change: &ResolvedChange,
		remote_change: &ResolvedChange,
		direction: Direction,
		operations: &mut Vec<ReconcileOp>,
	) {
		match direction {
			Direction::Up => {
				operations.push(ReconcileOp::Apply { side: Side::Remote, change: local_change.clone() });
			}
			Direction::Down => {
				operations.push(ReconcileOp::Apply { side: Side::Local, change: remote_change.clone() });
			}
			Direction::Bi => match self.policy {
				ConflictPolicy::Local => {
					operations.push(ReconcileOp::Apply { side: Side::Remote, change: local_change.clone() });
				}
				ConflictPolicy::Remote => {
					operations.push(ReconcileOp::Apply { side: Side::Local, change: remote_change.clone() });
				}
				ConflictPolicy::Both => {
					let suffix = format!(".conflict-{}", self.clock.now_unix());
					let renamed_remote = format!("{path}{suffix}");
					let renamed_local = format!("{path}{suffix}-local");

					operations.push(ReconcileOp::Rename {
						side: Side::Remote,
						from: path.to_owned(),
						to: renamed_remote,
					});
					operations.push(ReconcileOp::Apply { side: Side::Remote, change: local_change.clone() });

					operations.push(ReconcileOp::Rename {
						side: Side::Local,
						from: path.to_owned(),
						to: renamed_local,
					});
					operations.push(ReconcileOp::Apply { side: Side::Local, change: remote_change.clone() });
				}
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use ps_index_store::ChangeKind;

	struct FixedClock(i64);
	impl Clock for FixedClock {
		fn now_unix(&self) -> i64 {
			self.0
		}
	}

	fn change(seq: i64, path: &str) -> ResolvedChange {
		ResolvedChange {
			seq,
			node_id: Some(seq),
			kind: ChangeKind::Create,
			source: String::new(),
			target: path.to_owned(),
			bytesize: Some(1),
			md5: Some("abc".into()),
			mtime: Some(1.0),
		}
	}

	// S5: a one-sided local change propagates to the remote side only.
	#[test]
	fn one_sided_local_change_pushes_to_remote() {
		let strategy = TwoWayStrategy::new(ConflictPolicy::Both, Arc::new(FixedClock(100)));
		let plan = strategy.plan(&[change(1, "a.txt")], &[], Direction::Bi);
		assert_eq!(plan.operations.len(), 1);
		assert!(matches!(&plan.operations[0], ReconcileOp::Apply { side: Side::Remote, .. }));
	}

	// S6: conflicting changes on both sides, policy "both", produce a
	// rename-then-apply pair per side rather than a silent overwrite.
	#[test]
	fn conflicting_change_with_both_policy_renames_and_applies_both_ways() {
		let strategy = TwoWayStrategy::new(ConflictPolicy::Both, Arc::new(FixedClock(100)));
		let plan = strategy.plan(&[change(1, "a.txt")], &[change(2, "a.txt")], Direction::Bi);
		assert_eq!(plan.operations.len(), 4);

		let renames: Vec<_> = plan
			.operations
			.iter()
			.filter(|op| matches!(op, ReconcileOp::Rename { .. }))
			.collect();
		assert_eq!(renames.len(), 2);
	}

	#[test]
	fn conflict_with_local_policy_favors_local() {
		let strategy = TwoWayStrategy::new(ConflictPolicy::Local, Arc::new(FixedClock(100)));
		let plan = strategy.plan(&[change(1, "a.txt")], &[change(2, "a.txt")], Direction::Bi);
		assert_eq!(plan.operations.len(), 1);
		assert!(matches!(&plan.operations[0], ReconcileOp::Apply { side: Side::Remote, .. }));
	}

	#[test]
	fn up_direction_never_pulls_from_remote() {
		let strategy = TwoWayStrategy::new(ConflictPolicy::Both, Arc::new(FixedClock(100)));
		let plan = strategy.plan(&[], &[change(1, "only-remote.txt")], Direction::Up);
		assert!(plan.operations.is_empty());
	}
}
