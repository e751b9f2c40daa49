//! Background execution of a migration.
//!
//! Each run gets its own named OS thread; the migration does blocking file I/O and
//! spawns the archiver, neither of which belongs on the async runtime. The result comes
//! back through a oneshot channel so async callers can `.await` it.

use crate::context::AppContext;
use crate::error::MigrationError;
use crate::models::MigrationReport;
use crate::services::migrator::{MigrationRequest, Migrator};
use crate::services::progress::{CancellationToken, ProgressReporter};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;

pub type MigrationResult = Result<MigrationReport, MigrationError>;

const WORKER_THREAD_NAME: &str = "migration-worker";

/// Handle to a migration running on its worker thread.
#[derive(Debug)]
pub struct MigrationHandle {
    cancel: CancellationToken,
    result_rx: oneshot::Receiver<MigrationResult>,
    thread: JoinHandle<()>,
}

impl MigrationHandle {
    /// Ask the worker to stop after the file it is currently transferring.
    pub fn cancel(&self) {
        tracing::info!("Cancellation requested");
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the result without blocking the runtime.
    pub async fn join(self) -> MigrationResult {
        let result = self.result_rx.await;
        finish(self.thread, result)
    }

    /// Block the calling thread until the result is available.
    ///
    /// Must not be called from within an async context; use [`join`](Self::join) there.
    pub fn wait(self) -> MigrationResult {
        let result = self.result_rx.blocking_recv();
        finish(self.thread, result)
    }
}

fn finish(
    thread: JoinHandle<()>,
    result: Result<MigrationResult, oneshot::error::RecvError>,
) -> MigrationResult {
    match result {
        Ok(result) => {
            let _ = thread.join();
            result
        }
        Err(_) => {
            let reason = match thread.join() {
                Err(panic) => panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "worker panicked".to_string()),
                Ok(()) => "worker exited early".to_string(),
            };
            tracing::error!("Migration worker failed: {}", reason);
            Err(MigrationError::Worker(reason))
        }
    }
}

/// Start `request` on a dedicated thread.
///
/// # Arguments
/// * `ctx` - Shared services
/// * `request` - The run to execute
/// * `progress` - Receives updates on the worker thread; must not block
///
/// # Errors
/// Fails only when the operating system refuses to create the thread.
pub fn spawn_migration(
    ctx: Arc<AppContext>,
    request: MigrationRequest,
    progress: ProgressReporter,
) -> std::io::Result<MigrationHandle> {
    let cancel = CancellationToken::new();
    let (result_tx, result_rx) = oneshot::channel();

    let worker_cancel = cancel.clone();
    let thread = thread::Builder::new()
        .name(WORKER_THREAD_NAME.to_string())
        .spawn(move || {
            tracing::debug!("Migration worker started");
            let mut migrator = Migrator::new(&ctx, worker_cancel);
            let result = migrator.migrate(&request, &progress);
            if result_tx.send(result).is_err() {
                tracing::warn!("Migration result dropped, nobody is waiting for it");
            }
            tracing::debug!("Migration worker finished");
        })?;

    Ok(MigrationHandle {
        cancel,
        result_rx,
        thread,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managers::MockModManager;
    use crate::models::{AppConfig, Game, Instance, InstanceInfo, MigrationPhase, Mo2InstanceInfo};
    use crate::services::filesystem::{DiskSpace, MockDiskSpaceProbe};
    use crate::services::migrator::MigrationOptions;
    use crate::state::StateManager;
    use camino::Utf8PathBuf;

    fn context() -> Arc<AppContext> {
        let mut probe = MockDiskSpaceProbe::new();
        probe.expect_available_space().returning(|_| {
            Some(DiskSpace {
                disk: "/".to_string(),
                available: u64::MAX,
            })
        });
        Arc::new(AppContext::new(AppConfig::default()).with_disk_space(Arc::new(probe)))
    }

    fn empty_request() -> MigrationRequest {
        let game = Game::by_id("skyrimse").unwrap().clone();
        let mut src = MockModManager::new();
        src.expect_run_preflight_checks().returning(|_, _, _| Ok(()));
        src.expect_additional_files().returning(|_| Vec::new());

        let mut dst = MockModManager::new();
        dst.expect_run_preflight_checks().returning(|_, _, _| Ok(()));
        dst.expect_instance_exists().return_const(false);
        dst.expect_destination_mods_path()
            .returning(|_| Ok(Utf8PathBuf::from("/dst/mods")));
        dst.expect_create_instance()
            .returning(|_, game| Ok(Instance::new("Dest", "/dst", game, "Default")));
        dst.expect_finalize().returning(|_, _, _| Ok(()));
        dst.expect_completed_message().returning(|_| "done".to_string());

        MigrationRequest {
            src_instance: Instance::new("Source", "/src", "/games/Skyrim", "Default"),
            src_info: InstanceInfo::ModOrganizer(Mo2InstanceInfo::portable("Src", game.clone(), "/src")),
            dst_info: InstanceInfo::ModOrganizer(Mo2InstanceInfo::portable("Dst", game, "/dst")),
            src: Arc::new(src),
            dst: Arc::new(dst),
            options: MigrationOptions::default(),
            included_tools: None,
        }
    }

    #[tokio::test]
    async fn test_join_returns_report() {
        let state = StateManager::new();
        let handle = spawn_migration(context(), empty_request(), state.progress_reporter()).unwrap();

        let report = handle.join().await.unwrap();

        assert_eq!(report.migrated_mods(), 0);
        assert_eq!(state.snapshot().phase, Some(MigrationPhase::Completed));
    }

    #[test]
    fn test_wait_blocks_for_result() {
        let handle =
            spawn_migration(context(), empty_request(), ProgressReporter::silent()).unwrap();
        let token = handle.cancellation_token();

        let report = handle.wait().unwrap();

        assert!(!report.cancelled());
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_panicking_worker_is_reported() {
        let mut request = empty_request();
        let mut dst = MockModManager::new();
        dst.expect_run_preflight_checks()
            .returning(|_, _, _| panic!("adapter exploded"));
        request.dst = Arc::new(dst);

        let handle = spawn_migration(context(), request, ProgressReporter::silent()).unwrap();
        let err = handle.wait().unwrap_err();

        assert!(matches!(err, MigrationError::Worker(ref reason) if reason.contains("adapter exploded")));
    }
}
