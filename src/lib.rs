// modmigrator - Migrate mod manager instances between Mod Organizer 2 and Vortex
//
// This is the library crate containing the migration engine and the mod manager adapters.
// The binary crate (main.rs) provides the command-line front end.

pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod managers;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;
pub mod utils;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use context::AppContext;
pub use error::{ErrorKind, ManagerError, MigrationError, PreflightError};
pub use managers::{ModManager, ModOrganizer, Vortex};
pub use models::{AppConfig, Game, Instance, InstanceInfo, MigrationReport, Mod, Tool};
pub use services::{MigrationHandle, MigrationOptions, MigrationRequest, Migrator, spawn_migration};
pub use state::{StateChange, StateManager};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
