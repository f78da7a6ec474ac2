//! Crash-safe incremental storage for long batch runs.
//!
//! The whole map is rewritten on every commit: serialized to a sibling
//! `.tmp` file, synced, then renamed over the snapshot. The file on disk is
//! therefore always some complete state the run went through, never a
//! half-written entry.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Writes of a rolled-back state before a run gives up.
pub const DEFAULT_PERSIST_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum SnapshotError {
	#[error("snapshot I/O on '{path}': {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
	#[error("snapshot '{path}' is not valid JSON: {source}")]
	Corrupt {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},
	#[error("failed to serialize snapshot: {0}")]
	Serialize(#[from] serde_json::Error),
	#[error("snapshot '{path}' could not be persisted after {attempts} attempts")]
	Exhausted { path: PathBuf, attempts: u32 },
}

/// Site -> payload map mirrored to a JSON file.
#[derive(Debug)]
pub struct Snapshot<T> {
	path: PathBuf,
	entries: BTreeMap<String, T>,
	persist_attempts: u32,
	#[cfg(test)]
	failing_writes: std::cell::Cell<u32>,
}

impl<T: Serialize + DeserializeOwned> Snapshot<T> {
	/// Resume from `path`, or start empty if it does not exist yet.
	pub fn open(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
		let path = path.as_ref().to_path_buf();
		let entries = if path.exists() {
			Self::load(&path)?
		} else {
			BTreeMap::new()
		};
		Ok(Self {
			path,
			entries,
			persist_attempts: DEFAULT_PERSIST_ATTEMPTS,
			#[cfg(test)]
			failing_writes: std::cell::Cell::new(0),
		})
	}

	/// Read a snapshot file without opening it for writing.
	pub fn load(path: impl AsRef<Path>) -> Result<BTreeMap<String, T>, SnapshotError> {
		let path = path.as_ref();
		let bytes = fs::read(path).map_err(|source| SnapshotError::Io {
			path: path.to_path_buf(),
			source,
		})?;
		serde_json::from_slice(&bytes).map_err(|source| SnapshotError::Corrupt {
			path: path.to_path_buf(),
			source,
		})
	}

	/// How many times a rolled-back state is re-written before giving up.
	pub fn with_persist_attempts(mut self, attempts: u32) -> Self {
		self.persist_attempts = attempts.max(1);
		self
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn entries(&self) -> &BTreeMap<String, T> {
		&self.entries
	}

	pub fn into_entries(self) -> BTreeMap<String, T> {
		self.entries
	}

	pub fn contains(&self, key: &str) -> bool {
		self.entries.contains_key(key)
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	fn tmp_path(&self) -> PathBuf {
		let mut name = self.path.file_name().unwrap_or_default().to_os_string();
		name.push(".tmp");
		self.path.with_file_name(name)
	}

	/// Make the next `n` writes fail before touching the disk.
	#[cfg(test)]
	pub(crate) fn fail_next_writes(&self, n: u32) {
		self.failing_writes.set(n);
	}

	/// Write the full in-memory map to disk atomically.
	pub fn persist(&self) -> Result<(), SnapshotError> {
		let data = serde_json::to_vec(&self.entries)?;
		let tmp = self.tmp_path();
		let io_err = |source| SnapshotError::Io { path: tmp.clone(), source };

		#[cfg(test)]
		{
			let failing = self.failing_writes.get();
			if failing > 0 {
				self.failing_writes.set(failing - 1);
				return Err(io_err(io::Error::new(io::ErrorKind::Other, "injected write failure")));
			}
		}

		let mut file = fs::File::create(&tmp).map_err(io_err)?;
		file.write_all(&data).map_err(io_err)?;
		file.sync_all().map_err(io_err)?;
		drop(file);

		fs::rename(&tmp, &self.path).map_err(|source| SnapshotError::Io {
			path: self.path.clone(),
			source,
		})?;

		// The rename is only durable once the directory entry is synced
		#[cfg(unix)]
		{
			let dir = match self.path.parent() {
				Some(parent) if !parent.as_os_str().is_empty() => parent,
				_ => Path::new("."),
			};
			fs::File::open(dir)
				.and_then(|d| d.sync_all())
				.map_err(|source| SnapshotError::Io { path: dir.to_path_buf(), source })?;
		}
		debug!(path = %self.path.display(), entries = self.entries.len(), bytes = data.len(), "snapshot persisted");
		Ok(())
	}

	/// Add one site's payload and make it durable.
	///
	/// If the write fails the entry is taken back out (restoring whatever
	/// was there before) and the previous state is written again, so memory
	/// and disk keep agreeing. Returns `Ok(false)` when the entry had to be
	/// rolled back and `Err` only if even the rolled-back state cannot be
	/// written.
	pub fn commit(&mut self, key: String, value: T) -> Result<bool, SnapshotError> {
		let previous = self.entries.insert(key.clone(), value);
		let err = match self.persist() {
			Ok(()) => return Ok(true),
			Err(e) => e,
		};

		warn!(site = %key, error = %err, "snapshot write failed, rolling back entry");
		match previous {
			Some(prev) => {
				self.entries.insert(key, prev);
			}
			None => {
				self.entries.remove(&key);
			}
		}

		for attempt in 1..=self.persist_attempts {
			match self.persist() {
				Ok(()) => return Ok(false),
				Err(e) => warn!(attempt, error = %e, "retrying snapshot write"),
			}
		}
		Err(SnapshotError::Exhausted {
			path: self.path.clone(),
			attempts: self.persist_attempts,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn test_open_missing_starts_empty() {
		let dir = TempDir::new().unwrap();
		let snap: Snapshot<Vec<u32>> = Snapshot::open(dir.path().join("ttls.json")).unwrap();
		assert!(snap.is_empty());
		assert!(!snap.path().exists());
	}

	#[test]
	fn test_reload_after_n_commits() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("alldata.json");

		let mut snap = Snapshot::open(&path).unwrap();
		for (i, site) in ["a.com", "b.com", "c.com"].iter().enumerate() {
			assert!(snap.commit(site.to_string(), vec![i as u32; i + 1]).unwrap());
		}
		// Simulate a crash: drop without any shutdown step
		drop(snap);

		let reloaded: Snapshot<Vec<u32>> = Snapshot::open(&path).unwrap();
		assert_eq!(reloaded.len(), 3);
		assert_eq!(reloaded.entries()["a.com"], vec![0]);
		assert_eq!(reloaded.entries()["c.com"], vec![2, 2, 2]);
		assert!(!dir.path().join("alldata.json.tmp").exists());
	}

	#[test]
	fn test_failed_write_rolls_back_entry() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("snap.json");

		let mut snap = Snapshot::open(&path).unwrap().with_persist_attempts(2);
		snap.commit("a.com".to_string(), vec![60u32]).unwrap();

		// Point the snapshot into a directory that no longer exists
		snap.path = dir.path().join("gone").join("snap.json");
		let err = snap.commit("b.com".to_string(), vec![30]).unwrap_err();
		assert!(matches!(err, SnapshotError::Exhausted { attempts: 2, .. }));
		assert!(!snap.contains("b.com"));
		assert!(snap.contains("a.com"));

		// The last good state is still on disk
		let on_disk: BTreeMap<String, Vec<u32>> = Snapshot::load(&path).unwrap();
		assert_eq!(on_disk.len(), 1);
		assert_eq!(on_disk["a.com"], vec![60]);
	}

	#[test]
	fn test_rollback_restores_previous_value() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("snap.json");

		let mut snap = Snapshot::open(&path).unwrap().with_persist_attempts(1);
		snap.commit("a.com".to_string(), vec![1u32]).unwrap();
		snap.path = dir.path().join("gone").join("snap.json");
		assert!(snap.commit("a.com".to_string(), vec![2]).is_err());
		assert_eq!(snap.entries()["a.com"], vec![1]);
	}

	#[test]
	fn test_write_retried_after_single_failure() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("snap.json");

		let mut snap = Snapshot::open(&path).unwrap();
		snap.commit("a.com".to_string(), vec![60u32]).unwrap();

		snap.fail_next_writes(1);
		assert!(!snap.commit("b.com".to_string(), vec![30]).unwrap());
		assert!(!snap.contains("b.com"));
		assert!(snap.contains("a.com"));

		let on_disk: BTreeMap<String, Vec<u32>> = Snapshot::load(&path).unwrap();
		assert_eq!(on_disk.keys().collect::<Vec<_>>(), vec!["a.com"]);
		assert!(!dir.path().join("snap.json.tmp").exists());

		// The next commit goes through normally
		assert!(snap.commit("c.com".to_string(), vec![5]).unwrap());
		assert_eq!(Snapshot::<Vec<u32>>::load(&path).unwrap().len(), 2);
	}

	#[test]
	fn test_retries_stop_after_persist_attempts() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("snap.json");

		// First write plus two retries fail, the third retry succeeds
		let mut snap = Snapshot::<Vec<u32>>::open(&path).unwrap();
		snap.fail_next_writes(3);
		assert!(!snap.commit("a.com".to_string(), vec![1]).unwrap());

		let mut snap = Snapshot::<Vec<u32>>::open(&path).unwrap().with_persist_attempts(2);
		snap.fail_next_writes(3);
		let err = snap.commit("a.com".to_string(), vec![1]).unwrap_err();
		assert!(matches!(err, SnapshotError::Exhausted { attempts: 2, .. }));
	}

	#[test]
	fn test_default_attempts_shared_with_config() {
		let dir = TempDir::new().unwrap();
		let snap: Snapshot<Vec<u32>> = Snapshot::open(dir.path().join("s.json")).unwrap();
		assert_eq!(snap.persist_attempts, DEFAULT_PERSIST_ATTEMPTS);
		assert_eq!(crate::transport::MeasureConfig::default().persist_attempts, DEFAULT_PERSIST_ATTEMPTS);
	}

	#[test]
	fn test_corrupt_file_is_error() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("snap.json");
		fs::write(&path, b"{\"a.com\": [1, 2").unwrap();

		let err = Snapshot::<Vec<u32>>::open(&path).unwrap_err();
		assert!(matches!(err, SnapshotError::Corrupt { .. }));
	}

	#[test]
	fn test_commit_overwrites_stale_tmp() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("snap.json");
		// Leftover from a crash between write and rename
		fs::write(dir.path().join("snap.json.tmp"), b"garbage").unwrap();

		let mut snap = Snapshot::open(&path).unwrap();
		snap.commit("a.com".to_string(), vec![5u32]).unwrap();

		let on_disk: BTreeMap<String, Vec<u32>> = Snapshot::load(&path).unwrap();
		assert_eq!(on_disk["a.com"], vec![5]);
	}
}
