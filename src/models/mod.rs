//! Data models for the migration engine.
//!
//! - [`Instance`], [`Mod`], [`Tool`]: the canonical in-memory form of a mod manager instance,
//!   produced by an adapter's load operation and owned by the caller for one migration
//! - [`InstanceInfo`]: descriptor used to locate or create an instance for either manager
//! - [`Game`]: the built-in list of supported games
//! - [`MigrationReport`]: per-item failures of one run
//! - [`RunState`] / [`MigrationPhase`]: observable progress, held by
//!   [`StateManager`](crate::state::StateManager)
//! - [`AppConfig`]: settings loaded by [`ConfigManager`](crate::config::ConfigManager)

pub mod config;
pub mod game;
pub mod instance;
pub mod instance_info;
pub mod report;
pub mod run_state;

pub use config::{
    AppConfig, ArchiverSettings, LoggingSettings, MigrationSettings, ModOrganizerSettings,
    VortexSettings,
};
pub use game::Game;
pub use instance::{Instance, Metadata, Mod, ModKind, ModSource, Tool};
pub use instance_info::{InstanceInfo, InstanceKind, Mo2InstanceInfo, VortexProfileInfo, generate_id};
pub use report::MigrationReport;
pub use run_state::{MigrationPhase, RunState};
