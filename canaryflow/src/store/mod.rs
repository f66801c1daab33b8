//! Persistence of pipeline runs.
//!
//! The coordinator saves a run after every transition, so a run suspended at
//! the approval gate can be reloaded and resumed after a process restart.

mod file;
mod memory;

pub use file::FileRunStore;
pub use memory::MemoryRunStore;

use crate::core::{PipelineRun, RunState};
use crate::errors::StoreError;
use uuid::Uuid;

/// Durable map of run id to [`PipelineRun`].
pub trait RunStore: Send + Sync {
    /// Inserts or replaces a run.
    fn save(&self, run: &PipelineRun) -> Result<(), StoreError>;

    /// Loads a run by id.
    fn load(&self, run_id: Uuid) -> Result<Option<PipelineRun>, StoreError>;

    /// Lists all runs, oldest first.
    fn list(&self) -> Result<Vec<PipelineRun>, StoreError>;

    /// Lists runs in a given state, oldest first.
    fn list_by_state(&self, state: RunState) -> Result<Vec<PipelineRun>, StoreError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|run| run.state() == state)
            .collect())
    }

    /// Lists runs that have not reached a terminal state, oldest first.
    fn list_unfinished(&self) -> Result<Vec<PipelineRun>, StoreError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|run| !run.is_terminal())
            .collect())
    }
}
