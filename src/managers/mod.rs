//! Mod manager adapters.
//!
//! Each adapter translates between one mod manager's on-disk layout and the canonical
//! [`Instance`] model, and knows which preconditions must hold before it may be read from
//! or written to.
//!
//! # Adapters
//!
//! - [`ModOrganizer`]: portable or global instances with `ModOrganizer.ini`, profile
//!   `modlist.txt` files and a reserved `overwrite` folder
//! - [`Vortex`]: one LevelDB state database with per-game staging folders that must not be
//!   deployed or opened by a running Vortex during migration
//!
//! # Error Policy
//!
//! [`ModManager::run_preflight_checks`] returns [`PreflightError`]s, which always abort a run.
//! Errors from [`ModManager::install_mod`] and [`ModManager::add_tool`] are recorded per item
//! when [`ManagerError::is_item_scoped`] allows it.

pub mod modorganizer;
pub mod vortex;

pub use modorganizer::ModOrganizer;
pub use vortex::Vortex;

use crate::error::{ManagerError, PreflightError};
use crate::models::{Game, Instance, InstanceInfo, Mod, Tool};
use crate::services::blacklist::FileBlacklist;
use crate::services::filesystem::{self, MergeOptions, MergeStats};
use crate::services::progress::{CancellationToken, ProgressReporter};
use camino::{Utf8Path, Utf8PathBuf};

/// Which side of a migration an instance is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationRole {
    Source,
    Destination,
}

/// Options for installing one mod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallOptions {
    pub merge: MergeOptions,
    /// Maximum characters of the destination mod folder name.
    pub modname_limit: usize,
}

/// Options for finalizing a destination instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalizeOptions {
    /// Make the instance the manager's active one.
    pub activate: bool,
}

/// A mod's files, resolved to a readable folder (extracted if it came from an archive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFiles {
    pub root: Utf8PathBuf,
    pub files: Vec<Utf8PathBuf>,
}

/// Shared, per-run inputs for the merge engine.
#[derive(Debug, Clone)]
pub struct MergeContext {
    pub blacklist: &'static FileBlacklist,
    pub progress: ProgressReporter,
    pub cancel: CancellationToken,
}

impl MergeContext {
    pub fn new(progress: ProgressReporter, cancel: CancellationToken) -> Self {
        Self {
            blacklist: FileBlacklist::global(),
            progress,
            cancel,
        }
    }
}

/// Capabilities every mod manager adapter provides.
#[cfg_attr(test, mockall::automock)]
pub trait ModManager: Send + Sync {
    /// Stable identifier, e.g. `modorganizer`.
    fn id(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    /// Scan the environment for existing instances of `game`.
    fn detect_instances(&self, game: &Game) -> Result<Vec<InstanceInfo>, ManagerError>;

    /// Read an existing instance into the canonical model.
    fn load_instance(&self, info: &InstanceInfo) -> Result<Instance, ManagerError>;

    fn instance_exists(&self, info: &InstanceInfo) -> bool;

    /// Check manager-specific preconditions before anything is written.
    ///
    /// `source` is the instance being migrated; destinations use it to reject mods they
    /// cannot represent.
    fn run_preflight_checks(
        &self,
        info: &InstanceInfo,
        role: MigrationRole,
        source: &Instance,
    ) -> Result<(), PreflightError>;

    /// Folder mods will be written to, used for the free space check.
    fn destination_mods_path(&self, info: &InstanceInfo) -> Result<Utf8PathBuf, ManagerError>;

    /// Create a new, empty destination instance.
    fn create_instance(
        &self,
        info: &InstanceInfo,
        game_folder: &Utf8Path,
    ) -> Result<Instance, ManagerError>;

    /// Install one mod into `instance`, recording it there on success.
    fn install_mod(
        &self,
        source_mod: &Mod,
        files: &ResolvedFiles,
        instance: &mut Instance,
        info: &InstanceInfo,
        options: &InstallOptions,
        merge: &MergeContext,
    ) -> Result<MergeStats, ManagerError>;

    /// Register a tool in the destination manager.
    fn add_tool(
        &self,
        tool: &Tool,
        instance: &mut Instance,
        info: &InstanceInfo,
    ) -> Result<(), ManagerError>;

    /// Existing per-profile files (load order lists and the like) worth carrying over.
    fn additional_files(&self, info: &InstanceInfo) -> Vec<Utf8PathBuf>;

    /// Copy one file returned by another adapter's `additional_files` into this instance.
    fn migrate_additional_file(
        &self,
        file: &Utf8Path,
        info: &InstanceInfo,
    ) -> Result<(), ManagerError>;

    /// Folder holding profile-local INI files.
    fn ini_folder(&self, info: &InstanceInfo) -> Option<Utf8PathBuf>;

    /// Write load order and profile metadata; optionally activate the instance.
    fn finalize(
        &self,
        instance: &Instance,
        info: &InstanceInfo,
        options: &FinalizeOptions,
    ) -> Result<(), ManagerError>;

    /// Human-readable summary shown after a successful migration.
    fn completed_message(&self, info: &InstanceInfo) -> String;
}

/// Copy `file` into `folder`, keeping its name. Identical files are left untouched.
pub(crate) fn copy_into(file: &Utf8Path, folder: &Utf8Path) -> Result<Utf8PathBuf, ManagerError> {
    let name = file
        .file_name()
        .ok_or_else(|| ManagerError::Other(format!("{} has no file name", file)))?;
    let target = folder.join(name);
    if filesystem::copy_if_changed(file, &target).map_err(|e| ManagerError::io(file, e))? {
        tracing::debug!("Copied {} to {}", file, target);
    }
    Ok(target)
}

/// Strip trailing `.0` components while more than one dot remains, e.g. `1.2.0.0` becomes `1.2`.
pub(crate) fn normalize_version(version: &str) -> String {
    let mut version = version.trim();
    while version.matches('.').count() > 1 {
        match version.strip_suffix(".0") {
            Some(stripped) => version = stripped,
            None => break,
        }
    }
    version.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_version() {
        assert_eq!(normalize_version("1.2.0.0"), "1.2");
        assert_eq!(normalize_version("1.0"), "1.0");
        assert_eq!(normalize_version("3.1.4"), "3.1.4");
        assert_eq!(normalize_version(""), "");
    }

    #[test]
    fn test_copy_into_keeps_identical_files() {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let file = root.join("plugins.txt");
        std::fs::write(&file, "*Skyrim.esm").unwrap();

        let target = copy_into(&file, &root.join("profile")).unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "*Skyrim.esm");
        let modified = std::fs::metadata(&target).unwrap().modified().unwrap();

        copy_into(&file, &root.join("profile")).unwrap();
        assert_eq!(std::fs::metadata(&target).unwrap().modified().unwrap(), modified);
    }
}
