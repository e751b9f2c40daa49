// State management module
//
// This module provides the StateManager which wraps RunState with thread-safe access
// using Arc<RwLock<T>> and emits change events for front ends following a migration.

use crate::models::{MigrationPhase, MigrationReport, RunState};
use crate::services::progress::{ModOutcome, ProgressReporter, ProgressStage, ProgressUpdate};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

/// Change events emitted when state is modified
///
/// These events notify interested parties (the CLI progress printer, tests) about state
/// changes without requiring them to poll the state.
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    /// A migration run has started
    MigrationStarted {
        total_mods: u64,
    },

    /// The run entered a new phase
    PhaseChanged {
        phase: MigrationPhase,
    },

    /// Run progress, counted in mods
    ProgressUpdated {
        current: u64,
        total: u64,
        current_mod: Option<String>,
    },

    /// File progress of the mod currently being installed
    FileProgress {
        current: u64,
        total: u64,
    },

    /// Status line has changed
    StatusChanged {
        status: String,
    },

    /// A mod has been processed
    ModProcessed {
        name: String,
        outcome: ModOutcome,
    },

    /// The run has finished, successfully or not
    MigrationFinished {
        migrated: usize,
        failed_mods: usize,
        failed_tools: usize,
        cancelled: bool,
    },

    /// State has been reset
    StateReset,
}

/// Thread-safe run state manager with event emission
///
/// - Provides thread-safe access to [`RunState`] via `Arc<RwLock<T>>`
/// - Detects state changes and emits [`StateChange`] events
/// - Supports subscribing to state changes via tokio broadcast channels
///
/// The migration worker never sees this type directly; it reports through the
/// [`ProgressReporter`] returned by [`progress_reporter()`](Self::progress_reporter).
pub struct StateManager {
    /// The run state protected by RwLock for thread-safe access
    state: Arc<RwLock<RunState>>,

    /// Broadcast channel for emitting state change events
    state_tx: broadcast::Sender<StateChange>,
}

impl StateManager {
    /// Create a new StateManager with default state
    ///
    /// # Returns
    /// A new StateManager with a broadcast channel buffer of 100 events
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(100);
        Self {
            state: Arc::new(RwLock::new(RunState::default())),
            state_tx,
        }
    }

    /// Get a cloned snapshot of the current state
    pub fn snapshot(&self) -> RunState {
        self.state.read().unwrap().clone()
    }

    /// Execute a function with read access to the state
    ///
    /// # Example
    /// ```ignore
    /// let fraction = state_manager.read(|state| state.progress_fraction());
    /// ```
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&RunState) -> R,
    {
        let state = self.state.read().unwrap();
        f(&state)
    }

    /// Update the state and emit change events
    ///
    /// # Arguments
    /// * `update_fn` - A function that mutates the state
    ///
    /// # Returns
    /// A vector of StateChange events that were emitted
    pub fn update<F>(&self, update_fn: F) -> Vec<StateChange>
    where
        F: FnOnce(&mut RunState),
    {
        let mut state = self.state.write().unwrap();
        let old_state = state.clone();

        update_fn(&mut state);

        let changes = self.detect_changes(&old_state, &state);

        for change in &changes {
            // No subscribers is fine
            let _ = self.state_tx.send(change.clone());
        }

        changes
    }

    /// Subscribe to state change events
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    /// Detect what changed between two states and generate events
    fn detect_changes(&self, old: &RunState, new: &RunState) -> Vec<StateChange> {
        let mut changes = Vec::new();

        if old.is_migrating != new.is_migrating {
            if new.is_migrating {
                changes.push(StateChange::MigrationStarted {
                    total_mods: new.total_mods,
                });
            } else {
                changes.push(StateChange::MigrationFinished {
                    migrated: new.migrated_mods,
                    failed_mods: new.failed_mods.len(),
                    failed_tools: new.failed_tools.len(),
                    cancelled: new.cancelled,
                });
            }
        }

        if old.phase != new.phase
            && let Some(phase) = new.phase
        {
            changes.push(StateChange::PhaseChanged { phase });
        }

        if old.progress != new.progress
            || old.total_mods != new.total_mods
            || old.current_mod != new.current_mod
        {
            changes.push(StateChange::ProgressUpdated {
                current: new.progress,
                total: new.total_mods,
                current_mod: new.current_mod.clone(),
            });
        }

        if old.file_progress != new.file_progress || old.file_total != new.file_total {
            changes.push(StateChange::FileProgress {
                current: new.file_progress,
                total: new.file_total,
            });
        }

        if old.status != new.status {
            changes.push(StateChange::StatusChanged {
                status: new.status.clone(),
            });
        }

        changes
    }

    /// Start a migration run over `total_mods` mods
    pub fn start_migration(&self, total_mods: u64) -> Vec<StateChange> {
        self.update(|state| {
            state.reset();
            state.is_migrating = true;
            state.total_mods = total_mods;
            state.phase = Some(MigrationPhase::Validating);
            state.status = "Starting migration...".to_string();
        })
    }

    /// Fold one progress update from the worker into the state
    pub fn apply_progress(&self, update: ProgressUpdate) -> Vec<StateChange> {
        if let ProgressStage::Mod(outcome) = update.stage {
            return self.record_mod_result(update.status.unwrap_or_default(), outcome);
        }

        self.update(|state| match update.stage {
            ProgressStage::Run => {
                state.progress = update.current;
                state.total_mods = update.maximum;
                state.current_mod = update.status.clone();
                state.file_progress = 0;
                state.file_total = 0;
                if let Some(status) = update.status {
                    state.status = status;
                }
            }
            ProgressStage::File => {
                state.file_progress = update.current;
                state.file_total = update.maximum;
            }
            ProgressStage::Phase(phase) => {
                state.phase = Some(phase);
                if phase == MigrationPhase::Finalizing {
                    state.current_mod = None;
                }
            }
            ProgressStage::Mod(_) => {}
        })
    }

    /// Record the result of migrating a mod
    ///
    /// # Arguments
    /// * `name` - Display name of the mod
    /// * `outcome` - What happened to it
    pub fn record_mod_result(&self, name: String, outcome: ModOutcome) -> Vec<StateChange> {
        let mut changes = self.update(|state| match outcome {
            ModOutcome::Migrated => state.migrated_mods += 1,
            ModOutcome::Skipped => state.skipped_mods += 1,
            ModOutcome::Failed => state.failed_mods.push(name.clone()),
        });

        let event = StateChange::ModProcessed { name, outcome };
        let _ = self.state_tx.send(event.clone());
        changes.push(event);

        changes
    }

    /// Finish the run, copying the final counts from `report`
    pub fn finish_migration(&self, report: &MigrationReport) -> Vec<StateChange> {
        self.update(|state| {
            state.is_migrating = false;
            state.migrated_mods = report.migrated_mods();
            state.migrated_tools = report.migrated_tools();
            state.failed_mods = report.failed_mods().keys().cloned().collect();
            state.failed_tools = report.failed_tools().keys().cloned().collect();
            state.cancelled = report.cancelled();
            state.current_mod = None;
            state.phase = Some(MigrationPhase::Completed);
            state.status = if report.cancelled() {
                "Migration cancelled".to_string()
            } else {
                "Migration completed".to_string()
            };
        })
    }

    /// End the run after a fatal error
    pub fn abort_migration(&self, reason: &str) -> Vec<StateChange> {
        self.update(|state| {
            state.is_migrating = false;
            state.current_mod = None;
            if !matches!(
                state.phase,
                Some(MigrationPhase::Converting | MigrationPhase::Finalizing)
            ) {
                state.phase = Some(MigrationPhase::Aborted);
            }
            state.status = format!("Migration failed: {}", reason);
        })
    }

    /// Reset all run state
    pub fn reset(&self) -> Vec<StateChange> {
        let mut changes = self.update(|state| state.reset());

        let reset_event = StateChange::StateReset;
        let _ = self.state_tx.send(reset_event.clone());
        changes.push(reset_event);

        changes
    }

    /// Build a reporter that folds every worker update into this manager
    pub fn progress_reporter(&self) -> ProgressReporter {
        let manager = self.clone();
        ProgressReporter::new(Arc::new(move |update: ProgressUpdate| {
            manager.apply_progress(update);
        }))
    }

    /// Get an Arc reference to the state for use in worker threads
    pub fn state_arc(&self) -> Arc<RwLock<RunState>> {
        Arc::clone(&self.state)
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for StateManager {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            state_tx: self.state_tx.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ManagerError;

    #[test]
    fn test_new_state_manager() {
        let manager = StateManager::new();
        let state = manager.snapshot();

        assert!(!state.is_migrating);
        assert!(state.phase.is_none());
        assert_eq!(state.progress, 0);
    }

    #[test]
    fn test_update_with_change_detection() {
        let manager = StateManager::new();

        let changes = manager.update(|state| {
            state.is_migrating = true;
            state.total_mods = 10;
        });

        assert_eq!(changes.len(), 2);
        assert!(matches!(changes[0], StateChange::MigrationStarted { total_mods: 10 }));
        assert!(matches!(changes[1], StateChange::ProgressUpdated { .. }));
    }

    #[test]
    fn test_start_migration() {
        let manager = StateManager::new();
        manager.update(|state| state.failed_mods.push("Old".to_string()));

        let changes = manager.start_migration(3);

        assert!(matches!(changes[0], StateChange::MigrationStarted { total_mods: 3 }));
        assert!(changes.contains(&StateChange::PhaseChanged {
            phase: MigrationPhase::Validating
        }));

        let state = manager.snapshot();
        assert!(state.is_migrating);
        assert!(state.failed_mods.is_empty());
    }

    #[test]
    fn test_apply_run_progress_resets_file_progress() {
        let manager = StateManager::new();
        manager.start_migration(2);
        manager.apply_progress(ProgressUpdate {
            stage: ProgressStage::File,
            current: 5,
            maximum: 9,
            status: None,
        });

        let changes = manager.apply_progress(ProgressUpdate {
            stage: ProgressStage::Run,
            current: 1,
            maximum: 2,
            status: Some("SkyUI".to_string()),
        });

        assert!(changes.contains(&StateChange::ProgressUpdated {
            current: 1,
            total: 2,
            current_mod: Some("SkyUI".to_string()),
        }));
        assert!(changes.contains(&StateChange::FileProgress { current: 0, total: 0 }));

        let state = manager.snapshot();
        assert_eq!(state.status, "SkyUI");
        assert_eq!(state.progress_fraction(), 0.5);
    }

    #[test]
    fn test_phase_update() {
        let manager = StateManager::new();
        let changes = manager.apply_progress(ProgressUpdate {
            stage: ProgressStage::Phase(MigrationPhase::Converting),
            current: 0,
            maximum: 0,
            status: None,
        });

        assert_eq!(
            changes,
            vec![StateChange::PhaseChanged {
                phase: MigrationPhase::Converting
            }]
        );
    }

    #[test]
    fn test_record_mod_result() {
        let manager = StateManager::new();
        manager.start_migration(3);

        let changes = manager.record_mod_result("A".to_string(), ModOutcome::Migrated);
        assert!(changes.contains(&StateChange::ModProcessed {
            name: "A".to_string(),
            outcome: ModOutcome::Migrated,
        }));

        manager.record_mod_result("B".to_string(), ModOutcome::Failed);
        manager.record_mod_result("C".to_string(), ModOutcome::Skipped);
        let state = manager.snapshot();
        assert_eq!(state.migrated_mods, 1);
        assert_eq!(state.skipped_mods, 1);
        assert_eq!(state.failed_mods, vec!["B".to_string()]);
    }

    #[test]
    fn test_mod_progress_is_recorded_as_result() {
        let manager = StateManager::new();
        manager.start_migration(2);
        let mut rx = manager.subscribe();
        let reporter = manager.progress_reporter();

        reporter.mod_result("USSEP", ModOutcome::Failed);
        reporter.mod_result("SkyUI", ModOutcome::Migrated);

        assert_eq!(
            rx.try_recv().unwrap(),
            StateChange::ModProcessed {
                name: "USSEP".to_string(),
                outcome: ModOutcome::Failed,
            }
        );
        let state = manager.snapshot();
        assert_eq!(state.failed_mods, vec!["USSEP".to_string()]);
        assert_eq!(state.migrated_mods, 1);
    }

    #[test]
    fn test_finish_migration_copies_report() {
        let manager = StateManager::new();
        manager.start_migration(2);

        let mut report = MigrationReport::new();
        report.record_mod_migrated();
        report.record_mod_failure("Broken", ManagerError::Other("bad".to_string()));
        report.mark_cancelled();

        let changes = manager.finish_migration(&report);
        assert!(changes.contains(&StateChange::MigrationFinished {
            migrated: 1,
            failed_mods: 1,
            failed_tools: 0,
            cancelled: true,
        }));

        let state = manager.snapshot();
        assert_eq!(state.phase, Some(MigrationPhase::Completed));
        assert_eq!(state.status, "Migration cancelled");
    }

    #[test]
    fn test_abort_migration_before_converting() {
        let manager = StateManager::new();
        manager.start_migration(1);

        manager.abort_migration("database locked");

        let state = manager.snapshot();
        assert!(!state.is_migrating);
        assert_eq!(state.phase, Some(MigrationPhase::Aborted));
    }

    #[test]
    fn test_abort_migration_keeps_late_phase() {
        let manager = StateManager::new();
        manager.start_migration(1);
        manager.update(|state| state.phase = Some(MigrationPhase::Converting));

        manager.abort_migration("disk full");
        assert_eq!(manager.snapshot().phase, Some(MigrationPhase::Converting));
    }

    #[test]
    fn test_reset() {
        let manager = StateManager::new();
        manager.start_migration(1);

        let changes = manager.reset();

        assert!(changes.iter().any(|c| matches!(c, StateChange::StateReset)));
        let state = manager.snapshot();
        assert!(!state.is_migrating);
        assert_eq!(state.total_mods, 0);
    }

    #[test]
    fn test_subscribe_to_changes() {
        let manager = StateManager::new();
        let mut rx = manager.subscribe();

        manager.update(|state| {
            state.is_migrating = true;
        });

        let event = rx.try_recv();
        assert!(matches!(event.unwrap(), StateChange::MigrationStarted { .. }));
    }

    #[test]
    fn test_progress_reporter_feeds_state() {
        let manager = StateManager::new();
        let reporter = manager.progress_reporter();

        reporter.phase(MigrationPhase::Converting);
        reporter.run(1, 4, Some("USSEP".to_string()));
        reporter.file(3, 7);

        let state = manager.snapshot();
        assert_eq!(state.phase, Some(MigrationPhase::Converting));
        assert_eq!(state.current_mod.as_deref(), Some("USSEP"));
        assert_eq!((state.file_progress, state.file_total), (3, 7));
    }

    #[test]
    fn test_clone_and_state_arc() {
        let manager1 = StateManager::new();
        let manager2 = manager1.clone();

        manager1.update(|state| state.progress = 10);
        assert_eq!(manager2.read(|state| state.progress), 10);

        {
            let arc = manager2.state_arc();
            arc.write().unwrap().progress = 99;
        }
        assert_eq!(manager1.snapshot().progress, 99);
    }
}
