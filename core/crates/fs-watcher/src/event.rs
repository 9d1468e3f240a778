use serde::Serialize;

/// A classified, path-normalized filesystem event, prior to enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
	Created { path: String, is_dir: bool },
	Deleted { path: String, is_dir: bool },
	Modified { path: String, is_dir: bool },
	Moved { from: String, to: String, is_dir: bool },
}

/// The opaque stat blob stored alongside every inode, serialized with
/// MessagePack so it round-trips bit-exact without committing to a schema.
#[derive(Debug, Clone, Serialize)]
pub struct StatBlob {
	pub len: u64,
	pub mtime: f64,
	pub readonly: bool,
}

pub fn encode_stat(blob: &StatBlob) -> Vec<u8> {
	rmp_serde::to_vec(blob).unwrap_or_default()
}

pub fn classify(kind: &notify::EventKind, paths: &[std::path::PathBuf], is_dir: bool) -> Option<RawEvent> {
	use notify::EventKind;

	match kind {
		EventKind::Create(_) => paths.first().map(|p| RawEvent::Created {
			path: p.display().to_string(),
			is_dir,
		}),
		EventKind::Remove(_) => paths.first().map(|p| RawEvent::Deleted {
			path: p.display().to_string(),
			is_dir,
		}),
		EventKind::Modify(notify::event::ModifyKind::Name(_)) if paths.len() == 2 => {
			Some(RawEvent::Moved {
				from: paths[0].display().to_string(),
				to: paths[1].display().to_string(),
				is_dir,
			})
		}
		EventKind::Modify(_) => paths.first().map(|p| RawEvent::Modified {
			path: p.display().to_string(),
			is_dir,
		}),
		_ => None,
	}
}
