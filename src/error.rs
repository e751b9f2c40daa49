//! Error taxonomy shared by the adapters and the migration engine.
//!
//! Every error exposes an [`ErrorKind`] with a stable code. The engine never builds
//! user-facing sentences from these; presentation layers call
//! [`ErrorKind::default_message`] (or their own catalog keyed by [`ErrorKind::code`]) and
//! append [`MigrationError::details`] for diagnostics.

use crate::managers::vortex::DatabaseError;
use crate::services::archive::ArchiveError;
use crate::services::filesystem::MergeError;
use camino::Utf8PathBuf;
use std::error::Error as _;
use thiserror::Error;

/// Stable classification of every error the engine can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Environment,
    Manager,
    InstanceNotFound,
    InvalidGlobalInstancePath,
    CannotInstallGlobal,
    GlobalInstanceDetected,
    DatabaseLocked,
    StillDeployed,
    NotFullySetup,
    UnsupportedModKind,
    InsufficientSpace,
    SameSourceAndDestination,
    UnsupportedArchiveFormat,
    Archive,
    Database,
    Io,
    Cancelled,
}

impl ErrorKind {
    /// Stable identifier for message catalogs and machine consumers.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Environment => "environment.missing_resource",
            ErrorKind::Manager => "manager.general",
            ErrorKind::InstanceNotFound => "manager.instance_not_found",
            ErrorKind::InvalidGlobalInstancePath => "preflight.invalid_global_instance_path",
            ErrorKind::CannotInstallGlobal => "preflight.cannot_install_global",
            ErrorKind::GlobalInstanceDetected => "preflight.global_instance_detected",
            ErrorKind::DatabaseLocked => "preflight.database_locked",
            ErrorKind::StillDeployed => "preflight.still_deployed",
            ErrorKind::NotFullySetup => "preflight.not_fully_setup",
            ErrorKind::UnsupportedModKind => "preflight.unsupported_mod_kind",
            ErrorKind::InsufficientSpace => "general.insufficient_space",
            ErrorKind::SameSourceAndDestination => "general.same_source_destination",
            ErrorKind::UnsupportedArchiveFormat => "archive.unsupported_format",
            ErrorKind::Archive => "archive.failed",
            ErrorKind::Database => "manager.database",
            ErrorKind::Io => "general.io",
            ErrorKind::Cancelled => "general.cancelled",
        }
    }

    /// Short English message used when no localized catalog is available.
    pub fn default_message(self) -> &'static str {
        match self {
            ErrorKind::Environment => "A required external resource is missing.",
            ErrorKind::Manager => "The mod manager reported an error.",
            ErrorKind::InstanceNotFound => "The instance could not be found.",
            ErrorKind::InvalidGlobalInstancePath => {
                "Global instances must be located in the mod manager's instance folder."
            }
            ErrorKind::CannotInstallGlobal => {
                "The mod manager cannot be installed into a global instance."
            }
            ErrorKind::GlobalInstanceDetected => {
                "Global instances exist; a portable instance cannot be created safely."
            }
            ErrorKind::DatabaseLocked => "The mod manager is running. Close it and try again.",
            ErrorKind::StillDeployed => {
                "The mod manager is still deployed. Purge its deployment first."
            }
            ErrorKind::NotFullySetup => "The mod manager is not fully set up for this game.",
            ErrorKind::UnsupportedModKind => {
                "A selected mod cannot be installed into the destination."
            }
            ErrorKind::InsufficientSpace => "There is not enough free disk space.",
            ErrorKind::SameSourceAndDestination => "Source and destination are identical.",
            ErrorKind::UnsupportedArchiveFormat => "The archive format is not supported.",
            ErrorKind::Archive => "An archive could not be read or extracted.",
            ErrorKind::Database => "The mod manager database could not be accessed.",
            ErrorKind::Io => "A file operation failed.",
            ErrorKind::Cancelled => "The migration was cancelled.",
        }
    }
}

/// Pre-migration check failures. Always fatal for the run, raised before any mutation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreflightError {
    #[error("global instance path {path} is not inside {expected_root}")]
    InvalidGlobalInstancePath {
        path: Utf8PathBuf,
        expected_root: Utf8PathBuf,
    },

    #[error("{manager} cannot be installed into a global instance")]
    CannotInstallGlobal { manager: String },

    #[error("{count} global instance(s) detected, refusing to create a portable instance")]
    GlobalInstanceDetected { count: usize },

    #[error("{manager} holds a lock on its database (is it running?)")]
    DatabaseLocked { manager: String },

    #[error("{manager} is still deployed to {path}")]
    StillDeployed { manager: String, path: Utf8PathBuf },

    #[error("{manager} is not fully set up: {reason}")]
    NotFullySetup { manager: String, reason: String },

    #[error("mod '{mod_name}' of kind {kind} cannot be installed into {manager}")]
    UnsupportedModKind {
        mod_name: String,
        kind: String,
        manager: String,
    },
}

impl PreflightError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PreflightError::InvalidGlobalInstancePath { .. } => ErrorKind::InvalidGlobalInstancePath,
            PreflightError::CannotInstallGlobal { .. } => ErrorKind::CannotInstallGlobal,
            PreflightError::GlobalInstanceDetected { .. } => ErrorKind::GlobalInstanceDetected,
            PreflightError::DatabaseLocked { .. } => ErrorKind::DatabaseLocked,
            PreflightError::StillDeployed { .. } => ErrorKind::StillDeployed,
            PreflightError::NotFullySetup { .. } => ErrorKind::NotFullySetup,
            PreflightError::UnsupportedModKind { .. } => ErrorKind::UnsupportedModKind,
        }
    }
}

/// Errors raised by a mod manager adapter.
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("instance '{name}' not found")]
    InstanceNotFound { name: String },

    #[error(transparent)]
    PreMigrationCheck(#[from] PreflightError),

    #[error("required resource missing: {0}")]
    Environment(String),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{manager} cannot handle a {got} instance descriptor")]
    WrongInstanceKind { manager: String, got: String },

    #[error("{0}")]
    Other(String),
}

impl ManagerError {
    pub fn io(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        ManagerError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the orchestrator may record this error against a single mod or tool and
    /// keep going. Anything else aborts the run.
    pub fn is_item_scoped(&self) -> bool {
        match self {
            ManagerError::PreMigrationCheck(_)
            | ManagerError::Environment(_)
            | ManagerError::WrongInstanceKind { .. } => false,
            ManagerError::Database(err) => !err.is_locked(),
            ManagerError::Merge(err) => !err.is_cancelled(),
            ManagerError::Archive(err) => !err.is_environment(),
            _ => true,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ManagerError::Merge(err) if err.is_cancelled())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ManagerError::InstanceNotFound { .. } => ErrorKind::InstanceNotFound,
            ManagerError::PreMigrationCheck(err) => err.kind(),
            ManagerError::Environment(_) => ErrorKind::Environment,
            ManagerError::Archive(err) => err.kind(),
            ManagerError::Merge(err) => err.kind(),
            ManagerError::Database(err) => err.kind(),
            ManagerError::Io { .. } => ErrorKind::Io,
            ManagerError::WrongInstanceKind { .. } | ManagerError::Other(_) => ErrorKind::Manager,
        }
    }
}

/// Errors that end a migration run.
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error(transparent)]
    Preflight(#[from] PreflightError),

    #[error(transparent)]
    Manager(#[from] ManagerError),

    #[error("not enough space on {disk}: {required} bytes required, {available} bytes available")]
    InsufficientSpace {
        disk: String,
        required: u64,
        available: u64,
    },

    #[error("source and destination refer to the same instance")]
    SameSourceAndDestination,

    #[error("required resource missing: {0}")]
    Environment(String),

    #[error("migration cancelled")]
    Cancelled,

    #[error("migration worker stopped without a result: {0}")]
    Worker(String),
}

impl MigrationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MigrationError::Preflight(err) => err.kind(),
            MigrationError::Manager(err) => err.kind(),
            MigrationError::InsufficientSpace { .. } => ErrorKind::InsufficientSpace,
            MigrationError::SameSourceAndDestination => ErrorKind::SameSourceAndDestination,
            MigrationError::Environment(_) => ErrorKind::Environment,
            MigrationError::Cancelled => ErrorKind::Cancelled,
            MigrationError::Worker(_) => ErrorKind::Manager,
        }
    }

    /// Full technical detail: the error and its source chain, one cause per line.
    pub fn details(&self) -> String {
        let mut out = format!("[{}] {}", self.kind().code(), self);
        let mut source = self.source();
        while let Some(cause) = source {
            out.push_str(&format!("\n  caused by: {}", cause));
            source = cause.source();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preflight_errors_are_fatal() {
        let err = ManagerError::from(PreflightError::DatabaseLocked {
            manager: "Vortex".to_string(),
        });
        assert!(!err.is_item_scoped());
        assert_eq!(err.kind(), ErrorKind::DatabaseLocked);
    }

    #[test]
    fn test_io_errors_are_item_scoped() {
        let err = ManagerError::io(
            "mods/Foo",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.is_item_scoped());
        assert_eq!(err.kind().code(), "general.io");
    }

    #[test]
    fn test_codes_are_unique() {
        let kinds = [
            ErrorKind::Environment,
            ErrorKind::Manager,
            ErrorKind::InstanceNotFound,
            ErrorKind::InvalidGlobalInstancePath,
            ErrorKind::CannotInstallGlobal,
            ErrorKind::GlobalInstanceDetected,
            ErrorKind::DatabaseLocked,
            ErrorKind::StillDeployed,
            ErrorKind::NotFullySetup,
            ErrorKind::UnsupportedModKind,
            ErrorKind::InsufficientSpace,
            ErrorKind::SameSourceAndDestination,
            ErrorKind::UnsupportedArchiveFormat,
            ErrorKind::Archive,
            ErrorKind::Database,
            ErrorKind::Io,
            ErrorKind::Cancelled,
        ];
        let codes: std::collections::HashSet<_> = kinds.iter().map(|k| k.code()).collect();
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn test_details_include_cause_chain() {
        let err = MigrationError::from(ManagerError::io(
            "mods/Foo/a.esp",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        ));
        let details = err.details();
        assert!(details.starts_with("[general.io]"));
        assert!(details.contains("caused by: denied"));
    }
}
