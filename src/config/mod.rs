use crate::models::AppConfig;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Environment, File, FileFormat};
use std::fs;

/// Prefix of environment variables overriding configuration keys,
/// e.g. `MODMIGRATOR__MIGRATION__USE_HARDLINKS=false`.
pub const ENV_PREFIX: &str = "MODMIGRATOR";

/// Name of the configuration file inside the configuration directory.
pub const CONFIG_FILE_NAME: &str = "modmigrator.yaml";

/// Configuration manager for loading and saving the YAML configuration file.
///
/// Values are layered: built-in defaults, then `modmigrator.yaml` (optional), then
/// `MODMIGRATOR__SECTION__KEY` environment variables.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    app_config_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified configuration directory.
    ///
    /// # Arguments
    /// * `config_dir` - Directory containing `modmigrator.yaml`; created if missing
    ///
    /// # Returns
    /// A new ConfigManager instance
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            app_config_path: config_dir.join(CONFIG_FILE_NAME),
            config_dir,
        })
    }

    /// Default configuration directory: `<config dir>/modmigrator`, or `./config` when the
    /// platform has none.
    pub fn default_dir() -> Utf8PathBuf {
        dirs::config_dir()
            .and_then(|dir| Utf8PathBuf::try_from(dir).ok())
            .map(|dir| dir.join("modmigrator"))
            .unwrap_or_else(|| Utf8PathBuf::from("config"))
    }

    /// Load the application configuration.
    ///
    /// # Returns
    /// The layered AppConfig; defaults when neither the file nor any variable is present
    pub fn load_app_config(&self) -> Result<AppConfig> {
        if !self.app_config_path.exists() {
            tracing::warn!(
                "Config file not found at {}, using defaults",
                self.app_config_path
            );
        }

        let settings = config::Config::builder()
            .add_source(
                File::from(self.app_config_path.as_std_path())
                    .format(FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config: {}", self.app_config_path))?;

        let config: AppConfig = settings
            .try_deserialize()
            .with_context(|| format!("Failed to parse config: {}", self.app_config_path))?;

        tracing::info!("Loaded config from {}", self.app_config_path);
        Ok(config)
    }

    /// Save the application configuration file.
    ///
    /// # Arguments
    /// * `config` - The AppConfig to save
    pub fn save_app_config(&self, config: &AppConfig) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize config to YAML")?;

        fs::write(&self.app_config_path, yaml_string)
            .with_context(|| format!("Failed to write config: {}", self.app_config_path))?;

        tracing::info!("Saved config to {}", self.app_config_path);
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn app_config_path(&self) -> &Utf8Path {
        &self.app_config_path
    }
}
