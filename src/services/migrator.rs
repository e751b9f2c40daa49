//! Migration orchestrator.
//!
//! A run walks through `Validating -> Preparing -> Converting -> Finalizing -> Completed`.
//! Nothing is written before `Preparing` creates or loads the destination, so every
//! precondition failure ends the run as `Aborted` with the destination untouched. From
//! `Converting` on, errors scoped to one mod or tool are collected in the
//! [`MigrationReport`]; anything else ends the run with the error and leaves what was
//! already written in place (there is no rollback).

use crate::context::AppContext;
use crate::error::{ManagerError, MigrationError};
use crate::managers::{
    FinalizeOptions, InstallOptions, MergeContext, MigrationRole, ModManager, ResolvedFiles,
    copy_into,
};
use crate::models::{Instance, InstanceInfo, MigrationPhase, MigrationReport, MigrationSettings, Mod, ModSource};
use crate::services::filesystem::{MergeOptions, MergeStats};
use crate::services::progress::{CancellationToken, ModOutcome, ProgressReporter};
use camino::Utf8PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;

/// User choices for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationOptions {
    pub use_hardlinks: bool,
    /// Overwrite files (and reinstall mods) already present in the destination.
    pub replace: bool,
    pub modname_limit: usize,
    pub activate_new_instance: bool,
}

impl From<&MigrationSettings> for MigrationOptions {
    fn from(settings: &MigrationSettings) -> Self {
        Self {
            use_hardlinks: settings.use_hardlinks,
            replace: settings.replace,
            modname_limit: settings.modname_limit,
            activate_new_instance: settings.activate_new_instance,
        }
    }
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self::from(&MigrationSettings::default())
    }
}

/// Everything one run needs. Owned so it can be moved onto the worker thread.
pub struct MigrationRequest {
    pub src_instance: Instance,
    pub src_info: InstanceInfo,
    pub dst_info: InstanceInfo,
    pub src: Arc<dyn ModManager>,
    pub dst: Arc<dyn ModManager>,
    pub options: MigrationOptions,
    /// Display names of the tools to migrate; `None` migrates every enabled tool.
    pub included_tools: Option<Vec<String>>,
}

impl MigrationRequest {
    fn includes_tool(&self, name: &str) -> bool {
        self.included_tools
            .as_ref()
            .is_none_or(|names| names.iter().any(|n| n == name))
    }
}

/// Runs one migration and tracks its phase.
pub struct Migrator<'a> {
    ctx: &'a AppContext,
    cancel: CancellationToken,
    phase: MigrationPhase,
}

impl<'a> Migrator<'a> {
    pub fn new(ctx: &'a AppContext, cancel: CancellationToken) -> Self {
        Self {
            ctx,
            cancel,
            phase: MigrationPhase::Validating,
        }
    }

    /// Phase the last (or current) run reached.
    pub fn phase(&self) -> MigrationPhase {
        self.phase
    }

    /// Whether the destination already exists, in which case mods are merged into it.
    ///
    /// Callers that want the user to confirm a merge ask this before calling
    /// [`migrate`](Self::migrate).
    pub fn destination_exists(request: &MigrationRequest) -> bool {
        request.dst.instance_exists(&request.dst_info)
    }

    /// Run a full migration.
    ///
    /// # Arguments
    /// * `request` - Source instance, descriptors, adapters and options
    /// * `progress` - Receives phase, mod and file updates
    ///
    /// # Returns
    /// The report of per-item failures, or the error that ended the run
    pub fn migrate(
        &mut self,
        request: &MigrationRequest,
        progress: &ProgressReporter,
    ) -> Result<MigrationReport, MigrationError> {
        let started = Instant::now();
        let mut report = MigrationReport::new();

        tracing::info!(
            "Starting migration from {} to {}",
            request.src_info.variant_name(),
            request.dst_info.variant_name()
        );
        request.src_info.log("Source");
        request.dst_info.log("Destination");

        self.enter(MigrationPhase::Validating, progress);
        if let Err(e) = self.validate(request) {
            return Err(self.abort(e, progress));
        }

        self.enter(MigrationPhase::Preparing, progress);
        let mut instance = match self.prepare(request, &mut report) {
            Ok(instance) => instance,
            Err(e) => return Err(self.abort(e, progress)),
        };

        self.enter(MigrationPhase::Converting, progress);
        let cancelled = self.convert(request, &mut instance, &mut report, progress)?;

        self.enter(MigrationPhase::Finalizing, progress);
        self.finalize(request, &mut instance, &mut report, cancelled)?;

        if cancelled {
            report.mark_cancelled();
            report.record_other("cancelled", MigrationError::Cancelled);
        }

        self.enter(MigrationPhase::Completed, progress);
        self.ctx.metrics.record_run(started.elapsed());
        tracing::info!(
            "Migration finished in {:.2}s: {} mod(s), {} tool(s), {} failed mod(s), {} failed tool(s){}",
            started.elapsed().as_secs_f64(),
            report.migrated_mods(),
            report.migrated_tools(),
            report.failed_mods().len(),
            report.failed_tools().len(),
            if cancelled { " (cancelled)" } else { "" }
        );
        Ok(report)
    }

    fn enter(&mut self, phase: MigrationPhase, progress: &ProgressReporter) {
        tracing::info!("Migration phase: {}", phase);
        self.phase = phase;
        progress.phase(phase);
    }

    fn abort(&mut self, error: MigrationError, progress: &ProgressReporter) -> MigrationError {
        tracing::error!("Migration aborted during {}: {}", self.phase, error.details());
        self.enter(MigrationPhase::Aborted, progress);
        error
    }

    fn validate(&self, request: &MigrationRequest) -> Result<(), MigrationError> {
        if same_instance(&request.src_info, &request.dst_info) {
            return Err(MigrationError::SameSourceAndDestination);
        }
        request.src.run_preflight_checks(
            &request.src_info,
            MigrationRole::Source,
            &request.src_instance,
        )?;
        request.dst.run_preflight_checks(
            &request.dst_info,
            MigrationRole::Destination,
            &request.src_instance,
        )?;
        Ok(())
    }

    fn prepare(
        &self,
        request: &MigrationRequest,
        report: &mut MigrationReport,
    ) -> Result<Instance, MigrationError> {
        let exists = request.dst.instance_exists(&request.dst_info);
        if exists {
            tracing::info!(
                "Destination '{}' exists, merging into it",
                request.dst_info.display_name()
            );
            report.mark_merged_into_existing();
        }

        self.check_free_space(request)?;

        let mut instance = if exists {
            request.dst.load_instance(&request.dst_info)?
        } else {
            request
                .dst
                .create_instance(&request.dst_info, &request.src_instance.game_folder)?
        };
        instance.separate_ini_files = request.src_instance.separate_ini_files;
        instance.separate_save_games = request.src_instance.separate_save_games;
        Ok(instance)
    }

    fn check_free_space(&self, request: &MigrationRequest) -> Result<(), MigrationError> {
        let mut required = 0u64;
        for m in request.src_instance.enabled_mods() {
            match m.size(&self.ctx.archiver) {
                Ok(size) => required += size,
                Err(e) => tracing::warn!("Could not size '{}': {}", m.display_name, e),
            }
        }

        let target = request.dst.destination_mods_path(&request.dst_info)?;
        match self.ctx.disk_space.available_space(&target) {
            Some(space) if space.available < required => Err(MigrationError::InsufficientSpace {
                disk: space.disk,
                required,
                available: space.available,
            }),
            Some(space) => {
                tracing::info!(
                    "{} bytes required, {} bytes available on {}",
                    required,
                    space.available,
                    space.disk
                );
                Ok(())
            }
            None => {
                tracing::warn!("Could not determine free space for {}, continuing", target);
                Ok(())
            }
        }
    }

    /// Install the enabled mods in load order. Returns whether the run was cancelled.
    fn convert(
        &self,
        request: &MigrationRequest,
        instance: &mut Instance,
        report: &mut MigrationReport,
        progress: &ProgressReporter,
    ) -> Result<bool, MigrationError> {
        let mods: Vec<&Mod> = request
            .src_instance
            .load_order()
            .into_iter()
            .filter(|m| m.enabled)
            .collect();
        let total = mods.len() as u64;
        tracing::info!("Migrating {} enabled mod(s)", total);

        let install = InstallOptions {
            merge: MergeOptions {
                use_hardlinks: request.options.use_hardlinks,
                replace: request.options.replace,
            },
            modname_limit: request.options.modname_limit,
        };
        let merge = MergeContext {
            blacklist: self.ctx.blacklist,
            progress: progress.clone(),
            cancel: self.cancel.clone(),
        };

        for (index, m) in mods.iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::info!("Migration cancelled after {} of {} mods", index, total);
                return Ok(true);
            }
            progress.run(index as u64, total, Some(m.display_name.clone()));

            if !request.options.replace
                && instance.is_mod_installed(m, request.options.modname_limit)
            {
                tracing::info!("'{}' is already installed, skipping", m.display_name);
                self.ctx.metrics.record_mod_skipped();
                progress.mod_result(&m.display_name, ModOutcome::Skipped);
                continue;
            }

            tracing::info!("Migrating '{}' ({}/{})", m.display_name, index + 1, total);
            match self.install_one(request, m, instance, &install, &merge) {
                Ok(stats) => {
                    report.record_mod_migrated();
                    self.ctx.metrics.record_mod_migrated(&stats);
                    progress.mod_result(&m.display_name, ModOutcome::Migrated);
                }
                Err(e) if e.is_cancelled() => {
                    tracing::info!("Migration cancelled while installing '{}'", m.display_name);
                    return Ok(true);
                }
                Err(e) if e.is_item_scoped() => {
                    tracing::warn!("Failed to migrate '{}': {}", m.display_name, e);
                    self.ctx.metrics.record_mod_failed();
                    report.record_mod_failure(&m.display_name, e);
                    progress.mod_result(&m.display_name, ModOutcome::Failed);
                }
                Err(e) => {
                    tracing::error!("Fatal error while migrating '{}': {}", m.display_name, e);
                    return Err(e.into());
                }
            }
        }

        progress.run(total, total, None);
        Ok(self.cancel.is_cancelled())
    }

    fn install_one(
        &self,
        request: &MigrationRequest,
        m: &Mod,
        instance: &mut Instance,
        install: &InstallOptions,
        merge: &MergeContext,
    ) -> Result<MergeStats, ManagerError> {
        // Keeps an extracted archive alive until the install is done
        let mut _extracted: Option<TempDir> = None;

        let files = match &m.source {
            ModSource::Folder(root) => ResolvedFiles {
                root: root.clone(),
                files: m.files(&self.ctx.archiver)?.to_vec(),
            },
            ModSource::Archive(path) => {
                let archive = self.ctx.archiver.load(path)?;
                let temp = tempfile::Builder::new()
                    .prefix("modmigrator-")
                    .tempdir()
                    .map_err(|e| ManagerError::io(path, e))?;
                let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).map_err(|p| {
                    ManagerError::Other(format!("non UTF-8 temporary path: {}", p.display()))
                })?;
                tracing::debug!("Extracting {} to {}", path, root);
                let files = archive.extract_filtered(&root, self.ctx.blacklist)?;
                _extracted = Some(temp);
                ResolvedFiles { root, files }
            }
        };

        request
            .dst
            .install_mod(m, &files, instance, &request.dst_info, install, merge)
    }

    fn finalize(
        &self,
        request: &MigrationRequest,
        instance: &mut Instance,
        report: &mut MigrationReport,
        cancelled: bool,
    ) -> Result<(), MigrationError> {
        if cancelled {
            tracing::info!("Skipping tools of a cancelled migration");
        } else {
            self.migrate_tools(request, instance, report)?;
        }

        for file in request.src.additional_files(&request.src_info) {
            tracing::info!("Copying profile file {}", file);
            if let Err(e) = request.dst.migrate_additional_file(&file, &request.dst_info) {
                tracing::warn!("Failed to copy {}: {}", file, e);
                report.record_other(file.as_str(), e.into());
            }
        }

        if request.src_instance.separate_ini_files {
            self.migrate_ini_files(request, report);
        }

        request.dst.finalize(
            instance,
            &request.dst_info,
            &FinalizeOptions {
                activate: request.options.activate_new_instance,
            },
        )?;
        tracing::info!("{}", request.dst.completed_message(&request.dst_info));
        Ok(())
    }

    fn migrate_tools(
        &self,
        request: &MigrationRequest,
        instance: &mut Instance,
        report: &mut MigrationReport,
    ) -> Result<(), MigrationError> {
        for tool in request.src_instance.enabled_tools() {
            if !request.includes_tool(&tool.display_name) {
                tracing::debug!("Tool '{}' not selected", tool.display_name);
                continue;
            }
            match request.dst.add_tool(tool, instance, &request.dst_info) {
                Ok(()) => {
                    report.record_tool_migrated();
                    self.ctx.metrics.record_tool_migrated();
                }
                Err(e) if e.is_item_scoped() => {
                    tracing::warn!("Failed to migrate tool '{}': {}", tool.display_name, e);
                    self.ctx.metrics.record_tool_failed();
                    report.record_tool_failure(&tool.display_name, e);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn migrate_ini_files(&self, request: &MigrationRequest, report: &mut MigrationReport) {
        let (Some(src_folder), Some(dst_folder)) = (
            request.src.ini_folder(&request.src_info),
            request.dst.ini_folder(&request.dst_info),
        ) else {
            tracing::warn!("Profile-local INI files requested but a manager has no INI folder");
            return;
        };

        for name in &request.src_info.game().ini_files {
            let file = src_folder.join(name);
            if !file.is_file() {
                continue;
            }
            if let Err(e) = copy_into(&file, &dst_folder) {
                tracing::warn!("Failed to copy {}: {}", file, e);
                report.record_other(name, e.into());
            }
        }
    }
}

/// Whether two descriptors point at the same instance and profile.
fn same_instance(a: &InstanceInfo, b: &InstanceInfo) -> bool {
    match (a, b) {
        (InstanceInfo::ModOrganizer(a), InstanceInfo::ModOrganizer(b)) => {
            a.base_folder == b.base_folder && a.profile == b.profile
        }
        (InstanceInfo::Vortex(a), InstanceInfo::Vortex(b)) => a.id == b.id,
        _ => false,
    }
}
