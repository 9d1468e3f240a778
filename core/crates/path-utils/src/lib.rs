//! Lexical path normalization, independent of the filesystem.
//!
//! Everything here operates on path *text*: no symlink resolution, no stat
//! calls. Whole-file sync only cares about a stable, comparable node path.

use std::path::{Component, Path, PathBuf};

/// Collapses `.` and redundant separators, resolves `..` against the
/// components seen so far, and always uses `/` regardless of platform.
///
/// Idempotent: `normalize(normalize(p)) == normalize(p)`.
pub fn normalize(path: impl AsRef<Path>) -> String {
	let mut out: Vec<String> = Vec::new();
	for component in path.as_ref().components() {
		match component {
			Component::Normal(part) => out.push(part.to_string_lossy().into_owned()),
			Component::ParentDir => {
				out.pop();
			}
			Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
		}
	}
	out.join("/")
}

/// Strips `base` from `path` and returns the remainder, normalized, with no
/// leading separator. Returns `None` if `path` does not live under `base`.
pub fn relative(base: impl AsRef<Path>, path: impl AsRef<Path>) -> Option<String> {
	let base = normalize(base);
	let path = normalize(path);

	if base.is_empty() {
		return Some(path);
	}

	if path == base {
		return Some(String::new());
	}

	path.strip_prefix(&base)
		.and_then(|rest| rest.strip_prefix('/'))
		.map(str::to_owned)
}

/// Joins a normalized relative path back onto a base directory.
pub fn join(base: impl AsRef<Path>, relative: &str) -> PathBuf {
	if relative.is_empty() {
		return base.as_ref().to_path_buf();
	}
	base.as_ref().join(relative)
}
