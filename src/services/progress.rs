use crate::models::MigrationPhase;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// What happened to one mod during `Converting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModOutcome {
    Migrated,
    /// The destination already had it.
    Skipped,
    Failed,
}

impl ModOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ModOutcome::Migrated => "migrated",
            ModOutcome::Skipped => "skipped",
            ModOutcome::Failed => "failed",
        }
    }
}

impl fmt::Display for ModOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Granularity of a progress update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStage {
    /// Whole run, counted in mods.
    Run,
    /// Files of the mod currently being installed.
    File,
    /// The run entered a new phase.
    Phase(MigrationPhase),
    /// A mod is done; `status` carries its name.
    Mod(ModOutcome),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub stage: ProgressStage,
    pub current: u64,
    pub maximum: u64,
    pub status: Option<String>,
}

pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Cheap handle the worker uses to publish progress.
///
/// Callbacks run on the worker thread and must not block; [`channel`] builds one that
/// hands updates to another thread without waiting.
#[derive(Clone, Default)]
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
}

impl ProgressReporter {
    pub fn new(callback: ProgressCallback) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    /// Reporter that discards every update.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn report(&self, update: ProgressUpdate) {
        if let Some(callback) = &self.callback {
            callback(update);
        }
    }

    pub fn run(&self, current: u64, maximum: u64, status: Option<String>) {
        self.report(ProgressUpdate {
            stage: ProgressStage::Run,
            current,
            maximum,
            status,
        });
    }

    pub fn phase(&self, phase: MigrationPhase) {
        self.report(ProgressUpdate {
            stage: ProgressStage::Phase(phase),
            current: 0,
            maximum: 0,
            status: Some(phase.to_string()),
        });
    }

    pub fn file(&self, current: u64, maximum: u64) {
        self.report(ProgressUpdate {
            stage: ProgressStage::File,
            current,
            maximum,
            status: None,
        });
    }

    pub fn mod_result(&self, name: &str, outcome: ModOutcome) {
        self.report(ProgressUpdate {
            stage: ProgressStage::Mod(outcome),
            current: 0,
            maximum: 0,
            status: Some(name.to_string()),
        });
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// Build a reporter that forwards updates into a bounded channel.
///
/// Uses `try_send`, so a slow receiver loses intermediate updates instead of stalling
/// the worker.
pub fn channel(capacity: usize) -> (ProgressReporter, mpsc::Receiver<ProgressUpdate>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let reporter = ProgressReporter::new(Arc::new(move |update: ProgressUpdate| {
        if let Err(mpsc::error::TrySendError::Full(update)) = tx.try_send(update) {
            tracing::trace!("Progress channel full, dropping update {:?}", update);
        }
    }));
    (reporter, rx)
}

/// Cooperative stop flag shared between the caller and the worker.
///
/// Checked between files and between mods; an in-flight file operation always completes.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_reporter_invokes_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reporter = ProgressReporter::new(Arc::new(move |u: ProgressUpdate| sink.lock().unwrap().push(u)));

        reporter.run(1, 3, Some("Foo".to_string()));
        reporter.file(2, 10);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].stage, ProgressStage::Run);
        assert_eq!(seen[1].current, 2);
    }

    #[test]
    fn test_channel_never_blocks_when_full() {
        let (reporter, mut rx) = channel(1);
        for i in 0..100 {
            reporter.file(i, 100);
        }
        let first = rx.try_recv().unwrap();
        assert_eq!(first.current, 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
