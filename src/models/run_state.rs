use std::fmt;

/// Phases of a migration run.
///
/// `Aborted` is only ever entered from `Validating` or `Preparing`; later failures are
/// either recorded in the report or end the run with an error from the phase they hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationPhase {
    Validating,
    Preparing,
    Converting,
    Finalizing,
    Completed,
    Aborted,
}

impl MigrationPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            MigrationPhase::Validating => "validating",
            MigrationPhase::Preparing => "preparing",
            MigrationPhase::Converting => "converting",
            MigrationPhase::Finalizing => "finalizing",
            MigrationPhase::Completed => "completed",
            MigrationPhase::Aborted => "aborted",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MigrationPhase::Completed | MigrationPhase::Aborted)
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state of the current (or last) migration run.
///
/// Wrapped in `Arc<RwLock<_>>` by [`StateManager`](crate::state::StateManager); mutate it
/// only through the manager so change events are emitted.
#[derive(Clone, Debug, Default)]
pub struct RunState {
    pub is_migrating: bool,
    pub phase: Option<MigrationPhase>,
    pub status: String,

    // Run progress, counted in mods
    pub progress: u64,
    pub total_mods: u64,
    pub current_mod: Option<String>,

    // File progress of the current mod
    pub file_progress: u64,
    pub file_total: u64,

    // Results
    pub migrated_mods: usize,
    pub skipped_mods: usize,
    pub migrated_tools: usize,
    pub failed_mods: Vec<String>,
    pub failed_tools: Vec<String>,
    pub cancelled: bool,
}

impl RunState {
    /// Clear everything from a previous run.
    pub fn reset(&mut self) {
        *self = RunState::default();
    }

    pub fn progress_fraction(&self) -> f64 {
        if self.total_mods == 0 {
            0.0
        } else {
            self.progress as f64 / self.total_mods as f64
        }
    }
}
