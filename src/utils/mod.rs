//! Small format helpers shared by the mod manager adapters.

pub mod ini;

pub use ini::Ini;
