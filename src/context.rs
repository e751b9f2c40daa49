//! Process-wide collaborators of the migration engine.
//!
//! [`AppContext`] is built once at startup from the loaded [`AppConfig`] and passed by
//! reference (or `Arc`) to everything that needs the archiver, the blacklist, the disk
//! probe or the metrics.

use crate::error::ManagerError;
use crate::managers::{ModManager, ModOrganizer, Vortex};
use crate::metrics::Metrics;
use crate::models::AppConfig;
use crate::services::archive::Archiver;
use crate::services::blacklist::FileBlacklist;
use crate::services::filesystem::{DiskSpaceProbe, SystemDiskSpace};
use crate::services::migrator::MigrationOptions;
use camino::Utf8PathBuf;
use std::fmt;
use std::sync::Arc;

/// Shared services for one process.
pub struct AppContext {
    pub config: AppConfig,
    pub archiver: Archiver,
    pub blacklist: &'static FileBlacklist,
    pub disk_space: Arc<dyn DiskSpaceProbe>,
    pub metrics: Arc<Metrics>,
}

impl AppContext {
    pub fn new(config: AppConfig) -> Self {
        let archiver = Archiver::new(config.archiver.executable.as_str());
        tracing::debug!(
            "Using archiver {} and {} blacklisted file names",
            archiver.executable(),
            FileBlacklist::global().len()
        );
        Self {
            config,
            archiver,
            blacklist: FileBlacklist::global(),
            disk_space: Arc::new(SystemDiskSpace),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Replace the free-space probe.
    pub fn with_disk_space(mut self, probe: Arc<dyn DiskSpaceProbe>) -> Self {
        self.disk_space = probe;
        self
    }

    pub fn migration_options(&self) -> MigrationOptions {
        MigrationOptions::from(&self.config.migration)
    }

    /// MO2 adapter using the configured global root and release archive.
    pub fn modorganizer(&self) -> Result<ModOrganizer, ManagerError> {
        let settings = &self.config.modorganizer;
        let global_root = match &settings.global_root {
            Some(root) => Utf8PathBuf::from(root),
            None => ModOrganizer::default_global_root()?,
        };
        let mut adapter = ModOrganizer::new(global_root, self.archiver.clone());
        if let Some(archive) = &settings.release_archive {
            adapter = adapter.with_release_archive(archive.as_str());
        }
        Ok(adapter)
    }

    /// Vortex adapter on the configured (or default) application data folder.
    pub fn vortex(&self) -> Result<Vortex, ManagerError> {
        let appdata = match &self.config.vortex.appdata {
            Some(appdata) => Utf8PathBuf::from(appdata),
            None => Vortex::default_appdata()?,
        };
        Ok(Vortex::open(appdata).with_modname_limit(self.config.migration.modname_limit))
    }

    /// Adapter by identifier (`modorganizer`/`mo2` or `vortex`).
    pub fn manager(&self, id: &str) -> Result<Arc<dyn ModManager>, ManagerError> {
        match id.to_ascii_lowercase().as_str() {
            "mo2" | "modorganizer" => Ok(Arc::new(self.modorganizer()?)),
            "vortex" => Ok(Arc::new(self.vortex()?)),
            other => Err(ManagerError::Other(format!("unknown mod manager '{}'", other))),
        }
    }
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("config", &self.config)
            .field("archiver", &self.archiver)
            .field("blacklist", &self.blacklist.len())
            .finish_non_exhaustive()
    }
}
