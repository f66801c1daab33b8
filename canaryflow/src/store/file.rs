//! File-backed run store: one JSON document per run.

use super::RunStore;
use crate::core::PipelineRun;
use crate::errors::StoreError;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

const EXTENSION: &str = "json";

/// Run store writing `<state_dir>/<run_id>.json`.
///
/// Writes go to a temporary file that is renamed over the target, so a crash
/// mid-write never leaves a truncated record behind.
#[derive(Debug, Clone)]
pub struct FileRunStore {
    dir: PathBuf,
}

impl FileRunStore {
    /// Opens (and creates if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// The store's root directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, run_id: Uuid) -> PathBuf {
        self.dir.join(format!("{run_id}.{EXTENSION}"))
    }

    fn read(path: &Path) -> Result<PipelineRun, StoreError> {
        let raw = fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}

impl RunStore for FileRunStore {
    fn save(&self, run: &PipelineRun) -> Result<(), StoreError> {
        let path = self.path_for(run.id());
        let tmp = self.dir.join(format!(".{}.{EXTENSION}.tmp", run.id()));
        let json = serde_json::to_string_pretty(run)?;

        fs::write(&tmp, json).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;

        debug!(run_id = %run.id(), state = %run.state(), path = %path.display(), "Run saved");
        Ok(())
    }

    fn load(&self, run_id: Uuid) -> Result<Option<PipelineRun>, StoreError> {
        let path = self.path_for(run_id);
        match Self::read(&path) {
            Ok(run) => Ok(Some(run)),
            Err(StoreError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn list(&self) -> Result<Vec<PipelineRun>, StoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut runs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            let is_record = path.extension().is_some_and(|ext| ext == EXTENSION)
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| !name.starts_with('.'));
            if !is_record {
                continue;
            }

            match Self::read(&path) {
                Ok(run) => runs.push(run),
                Err(StoreError::Serialization(e)) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable run record");
                }
                Err(e) => return Err(e),
            }
        }

        runs.sort_by_key(|run| (run.created_at(), run.id()));
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Artifact, ImageReference, RunState, SourceSnapshot, StageName, Trigger};

    fn run() -> PipelineRun {
        PipelineRun::new("canary", Trigger::push("app", "main", "abc123"))
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::open(dir.path()).unwrap();

        let mut run = run();
        run.start_stage(StageName::Source).unwrap();
        run.complete_stage(
            StageName::Source,
            Artifact::SourceSnapshot(SourceSnapshot {
                repository: "app".to_string(),
                branch: "main".to_string(),
                commit: "abc123".to_string(),
                location: "s3://artifacts/abc123.zip".to_string(),
            }),
        )
        .unwrap();
        run.start_stage(StageName::Build).unwrap();
        run.complete_stage(
            StageName::Build,
            Artifact::Image(ImageReference::new("repo/app", "abc123").unwrap()),
        )
        .unwrap();
        store.save(&run).unwrap();

        let reopened = FileRunStore::open(dir.path()).unwrap();
        let loaded = reopened.load(run.id()).unwrap().unwrap();
        assert_eq!(loaded, run);
        assert_eq!(loaded.state(), RunState::DeployCanary);
        assert_eq!(loaded.image().unwrap().uri(), "repo/app:abc123");
    }

    #[test]
    fn test_load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::open(dir.path()).unwrap();
        assert!(store.load(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_list_skips_foreign_and_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::open(dir.path().join("runs")).unwrap();

        let first = run();
        let second = run();
        store.save(&first).unwrap();
        store.save(&second).unwrap();
        fs::write(store.dir().join("notes.txt"), "not a run").unwrap();
        fs::write(store.dir().join("broken.json"), "{").unwrap();

        let runs = store.list().unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id(), first.id());
        assert_eq!(runs[1].id(), second.id());
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::open(dir.path()).unwrap();
        store.save(&run()).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".json"));
    }

    #[test]
    fn test_truncated_stage_list_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::open(dir.path()).unwrap();
        let intact = run();
        let damaged = run();
        store.save(&intact).unwrap();

        let mut json = serde_json::to_value(&damaged).unwrap();
        json["stages"].as_array_mut().unwrap().truncate(2);
        fs::write(
            store.dir().join(format!("{}.json", damaged.id())),
            serde_json::to_string(&json).unwrap(),
        )
        .unwrap();

        assert!(matches!(
            store.load(damaged.id()),
            Err(StoreError::Serialization(_))
        ));
        let runs = store.list().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id(), intact.id());
    }
}
