//! In-memory run store.

use super::RunStore;
use crate::core::PipelineRun;
use crate::errors::StoreError;
use dashmap::DashMap;
use uuid::Uuid;

/// Run store backed by a concurrent map. Runs are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    runs: DashMap<Uuid, PipelineRun>,
}

impl MemoryRunStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// Returns true if no runs are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

impl RunStore for MemoryRunStore {
    fn save(&self, run: &PipelineRun) -> Result<(), StoreError> {
        self.runs.insert(run.id(), run.clone());
        Ok(())
    }

    fn load(&self, run_id: Uuid) -> Result<Option<PipelineRun>, StoreError> {
        Ok(self.runs.get(&run_id).map(|entry| entry.value().clone()))
    }

    fn list(&self) -> Result<Vec<PipelineRun>, StoreError> {
        let mut runs: Vec<_> = self.runs.iter().map(|entry| entry.value().clone()).collect();
        runs.sort_by_key(|run| (run.created_at(), run.id()));
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RunState, StageName, Trigger};
    use crate::errors::StageFailure;

    fn run(commit: &str) -> PipelineRun {
        PipelineRun::new("canary", Trigger::push("app", "main", commit))
    }

    #[test]
    fn test_save_and_load() {
        let store = MemoryRunStore::new();
        let run = run("a1");

        store.save(&run).unwrap();

        assert_eq!(store.load(run.id()).unwrap(), Some(run));
        assert_eq!(store.load(Uuid::nil()).unwrap(), None);
    }

    #[test]
    fn test_save_replaces() {
        let store = MemoryRunStore::new();
        let mut run = run("a1");
        store.save(&run).unwrap();

        run.start_stage(StageName::Source).unwrap();
        store.save(&run).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.load(run.id()).unwrap().unwrap(), run);
    }

    #[test]
    fn test_list_by_state() {
        let store = MemoryRunStore::new();
        let active = run("a1");
        let mut failed = run("b2");
        failed.start_stage(StageName::Source).unwrap();
        failed
            .fail_stage(StageName::Source, StageFailure::source_fetch("gone"))
            .unwrap();

        store.save(&active).unwrap();
        store.save(&failed).unwrap();

        assert_eq!(store.list().unwrap().len(), 2);
        assert_eq!(store.list_by_state(RunState::Failed).unwrap(), vec![failed]);
        assert_eq!(store.list_unfinished().unwrap(), vec![active]);
    }
}
