//! Services module - the migration engine below the mod manager adapters.
//!
//! These services have no knowledge of any particular mod manager; adapters in
//! [`crate::managers`] build on them.
//!
//! # Components
//!
//! - [`archive`]: reading and extracting mod archives through an external archiver, with the
//!   supported formats kept in a closed registry
//! - [`blacklist`]: process-wide list of file names never copied between instances
//! - [`filesystem`]: the merge engine (hardlink-or-copy per file, name cleaning, free space)
//! - [`progress`]: non-blocking progress reporting and cooperative cancellation
//! - [`migrator`]: the phase state machine that drives one migration
//! - [`worker`]: runs a migration on its own thread and hands back the result as a future
//!
//! # Usage Example
//!
//! ```ignore
//! use modmigrator::services::{spawn_migration, MigrationRequest};
//!
//! let handle = spawn_migration(ctx, request, state.progress_reporter())?;
//! let report = handle.join().await?;
//! println!("{}", report.summary());
//! ```

pub mod archive;
pub mod blacklist;
pub mod filesystem;
pub mod migrator;
pub mod progress;
pub mod worker;

pub use archive::{Archive, ArchiveError, ArchiveFormat, Archiver};
pub use blacklist::FileBlacklist;
pub use filesystem::{DiskSpace, DiskSpaceProbe, MergeError, MergeOptions, MergeStats, SystemDiskSpace};
pub use migrator::{MigrationOptions, MigrationRequest, Migrator};
pub use progress::{CancellationToken, ModOutcome, ProgressReporter, ProgressStage, ProgressUpdate};
pub use worker::{MigrationHandle, MigrationResult, spawn_migration};
