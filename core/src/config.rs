//! Job configuration model: one entry per synchronized directory.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::NaiveTime;
use ps_errors::Result;
use ps_fs_watcher::{default_excludes, default_includes};
use ps_merge::{ConflictPolicy, Direction};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};

/// Either a fixed polling interval or a daily wall-clock time, mirroring
/// the two scheduling modes a job can be configured with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Frequency {
	Seconds(u64),
	Clock(NaiveTime),
}

impl<'de> Deserialize<'de> for Frequency {
	fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		struct FrequencyVisitor;

		impl<'de> Visitor<'de> for FrequencyVisitor {
			type Value = Frequency;

			fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
				f.write_str("an integer number of seconds, or an \"HH:MM\" clock time")
			}

			fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Frequency, E> {
				Ok(Frequency::Seconds(v))
			}

			fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Frequency, E> {
				Ok(Frequency::Seconds(v.max(0) as u64))
			}

			fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Frequency, E> {
				NaiveTime::parse_from_str(v, "%H:%M")
					.map(Frequency::Clock)
					.map_err(|_| de::Error::custom(format!("invalid clock frequency '{v}'")))
			}
		}

		deserializer.deserialize_any(FrequencyVisitor)
	}
}

fn default_frequency() -> Frequency {
	Frequency::Seconds(10)
}

fn default_direction() -> Direction {
	Direction::Bi
}

fn default_solve() -> ConflictPolicy {
	ConflictPolicy::Both
}

fn default_true() -> bool {
	true
}

fn default_timeout() -> u64 {
	20
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
	pub directory: PathBuf,
	pub server: String,
	pub workspace: String,

	#[serde(default = "default_frequency")]
	pub frequency: Frequency,

	#[serde(default = "default_direction")]
	pub direction: Direction,

	#[serde(default = "default_solve")]
	pub solve: ConflictPolicy,

	#[serde(default = "default_includes")]
	pub includes: Vec<String>,

	#[serde(default = "default_excludes")]
	pub excludes: Vec<String>,

	#[serde(default)]
	pub trust_ssl: bool,

	#[serde(default = "default_timeout")]
	pub timeout: u64,

	#[serde(default = "default_true")]
	pub active: bool,
}

/// Loads a YAML mapping of job name to [`JobConfig`].
pub fn load_jobs(path: &Path) -> Result<HashMap<String, JobConfig>> {
	let contents = std::fs::read_to_string(path)?;
	let jobs: HashMap<String, JobConfig> = serde_yaml::from_str(&contents)
		.map_err(|err| ps_errors::Error::state_mismatch(path.display().to_string(), err.to_string()))?;
	Ok(jobs)
}
