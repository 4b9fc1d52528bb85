//! On-disk home directory and the file-backed record store.

use anyhow::{Context, Result};
use microtask_core::{KeyValueStore, StoreError};
use std::fs;
use std::path::PathBuf;
use tracing::warn;

pub fn microtask_home() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("MICROTASK_HOME") {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    let home = std::env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home).join(".microtask"))
}

pub fn ensure_home() -> Result<PathBuf> {
    let dir = microtask_home()?;
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    Ok(dir)
}

/// One `<key>.json` file per record under a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn open_default() -> Result<Self> {
        Ok(Self::new(ensure_home()?))
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        let p = self.path_for(key);
        match fs::read_to_string(&p) {
            Ok(s) => Some(s),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %p.display(), error = %e, "unreadable record");
                None
            }
        }
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), StoreError> {
        let write_err = |e: std::io::Error| StoreError::Write {
            key: key.to_string(),
            message: e.to_string(),
        };

        fs::create_dir_all(&self.dir).map_err(write_err)?;
        let p = self.path_for(key);
        let tmp = p.with_extension("json.tmp");
        fs::write(&tmp, value).map_err(write_err)?;
        fs::rename(&tmp, &p).map_err(write_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use microtask_core::{StatStore, TASK_STATS_KEY};

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path());

        assert_eq!(store.get(TASK_STATS_KEY), None);
        store.set(TASK_STATS_KEY, "{\"totalTasks\":2}".to_string()).unwrap();
        assert_eq!(store.get(TASK_STATS_KEY).as_deref(), Some("{\"totalTasks\":2}"));
        assert!(dir.path().join("taskStats.json").exists());
        assert!(!dir.path().join("taskStats.json.tmp").exists());
    }

    #[test]
    fn test_stat_store_over_files_initializes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut stats = StatStore::new(FileStore::new(dir.path()));
        stats.ensure_initialized().unwrap();

        let raw = fs::read_to_string(dir.path().join("taskStats.json")).unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["totalTasks"], 0);
        assert!(dir.path().join("unlockedMedals.json").exists());
    }

    #[test]
    fn test_garbage_file_reads_as_default_stats() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("taskStats.json"), "not json at all").unwrap();

        let stats = StatStore::new(FileStore::new(dir.path())).load_stats();
        assert_eq!(stats.total_tasks, 0);
        assert_eq!(stats.total_experience, 0);
    }
}
