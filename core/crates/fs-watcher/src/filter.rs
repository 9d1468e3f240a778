use globset::{Glob, GlobSet, GlobSetBuilder};
use ps_errors::Result;

/// Default include/exclude patterns applied to a freshly configured job.
pub fn default_excludes() -> Vec<String> {
	vec![
		".*".to_owned(),
		"*/.*".to_owned(),
		"/recycle_bin*".to_owned(),
		"*.pydio_dl".to_owned(),
		"*.DS_Store".to_owned(),
		".~lock.*".to_owned(),
		"~*".to_owned(),
		"*.xlk".to_owned(),
		"*.tmp".to_owned(),
	]
}

pub fn default_includes() -> Vec<String> {
	vec!["*".to_owned()]
}

/// Compiled include/exclude glob sets, evaluated against a normalized
/// relative path. A path is accepted when it matches at least one include
/// pattern, matches no exclude pattern, and is non-empty.
pub struct FilterSet {
	include: GlobSet,
	exclude: GlobSet,
}

impl FilterSet {
	pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
		Ok(Self {
			include: build(include)?,
			exclude: build(exclude)?,
		})
	}

	pub fn accepts(&self, relative_path: &str) -> bool {
		!relative_path.is_empty()
			&& self.include.is_match(relative_path)
			&& !self.exclude.is_match(relative_path)
	}
}

fn build(patterns: &[String]) -> Result<GlobSet> {
	let mut builder = GlobSetBuilder::new();
	for pattern in patterns {
		builder.add(Glob::new(pattern)?);
	}
	Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_include_matches_nothing() {
		let filter = FilterSet::new(&[], &default_excludes()).unwrap();
		assert!(!filter.accepts("a.txt"));
	}

	#[test]
	fn default_filter_accepts_ordinary_files() {
		let filter = FilterSet::new(&default_includes(), &default_excludes()).unwrap();
		assert!(filter.accepts("docs/report.txt"));
	}

	#[test]
	fn default_filter_rejects_dotfiles_and_temp_artifacts() {
		let filter = FilterSet::new(&default_includes(), &default_excludes()).unwrap();
		assert!(!filter.accepts(".git"));
		assert!(!filter.accepts("docs/.gitignore"));
		assert!(!filter.accepts("report.tmp"));
		assert!(!filter.accepts(".DS_Store"));
		assert!(!filter.accepts("~report.txt"));
	}

	#[test]
	fn empty_path_never_accepted() {
		let filter = FilterSet::new(&default_includes(), &[]).unwrap();
		assert!(!filter.accepts(""));
	}
}
