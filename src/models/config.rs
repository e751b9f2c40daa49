use serde::{Deserialize, Serialize};

/// Application configuration from `modmigrator.yaml`.
///
/// Every section falls back to its defaults, so a partial (or missing) file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub migration: MigrationSettings,

    #[serde(default)]
    pub archiver: ArchiverSettings,

    #[serde(default)]
    pub modorganizer: ModOrganizerSettings,

    #[serde(default)]
    pub vortex: VortexSettings,

    #[serde(default = "default_language")]
    pub language: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            logging: LoggingSettings::default(),
            migration: MigrationSettings::default(),
            archiver: ArchiverSettings::default(),
            modorganizer: ModOrganizerSettings::default(),
            vortex: VortexSettings::default(),
            language: default_language(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `EnvFilter` directive, e.g. `info` or `modmigrator=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_directory")]
    pub directory: String,

    #[serde(default = "default_log_prefix")]
    pub file_prefix: String,

    #[serde(default)]
    pub console: bool,

    /// Write the log file as JSON lines.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: default_log_directory(),
            file_prefix: default_log_prefix(),
            console: false,
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationSettings {
    #[serde(default = "default_true")]
    pub use_hardlinks: bool,

    /// Overwrite files that already exist in the destination.
    #[serde(default, alias = "replace_when_merge")]
    pub replace: bool,

    /// Maximum characters of a destination mod folder name.
    #[serde(default = "default_modname_limit")]
    pub modname_limit: usize,

    #[serde(default = "default_true")]
    pub activate_new_instance: bool,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            use_hardlinks: true,
            replace: false,
            modname_limit: default_modname_limit(),
            activate_new_instance: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiverSettings {
    #[serde(default = "default_archiver")]
    pub executable: String,
}

impl Default for ArchiverSettings {
    fn default() -> Self {
        Self {
            executable: default_archiver(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModOrganizerSettings {
    /// Local release archive extracted when a new instance should include MO2 itself.
    #[serde(default)]
    pub release_archive: Option<String>,

    /// Overrides `<local app data>/ModOrganizer` for global instances.
    #[serde(default)]
    pub global_root: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VortexSettings {
    /// Overrides `<app data>/Vortex`.
    #[serde(default)]
    pub appdata: Option<String>,
}

fn default_language() -> String {
    "en".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_directory() -> String {
    "logs".to_string()
}

fn default_log_prefix() -> String {
    "modmigrator".to_string()
}

fn default_true() -> bool {
    true
}

fn default_modname_limit() -> usize {
    100
}

fn default_archiver() -> String {
    "7z".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_defaults() {
        let settings = MigrationSettings::default();
        assert!(settings.use_hardlinks);
        assert!(!settings.replace);
        assert_eq!(settings.modname_limit, 100);
        assert!(settings.activate_new_instance);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: AppConfig =
            serde_yaml_ng::from_str("migration:\n  replace_when_merge: true\n").unwrap();
        assert!(config.migration.replace);
        assert!(config.migration.use_hardlinks);
        assert_eq!(config.archiver.executable, "7z");
        assert_eq!(config.language, "en");
    }

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.file_prefix, "modmigrator");
        assert!(config.modorganizer.release_archive.is_none());
    }
}
