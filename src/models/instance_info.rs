use crate::models::game::Game;
use camino::{Utf8Path, Utf8PathBuf};
use rand::Rng;
use rand::distributions::Alphanumeric;

/// Whether an MO2 instance is self-contained or registered under the global root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceKind {
    Portable,
    Global,
}

/// Locates (or describes how to create) an MO2 instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mo2InstanceInfo {
    pub name: String,
    pub game: Game,
    pub profile: String,
    pub kind: InstanceKind,
    pub base_folder: Utf8PathBuf,
    pub mods_folder: Utf8PathBuf,
    pub profiles_folder: Utf8PathBuf,
    pub overwrite_folder: Utf8PathBuf,
    /// Also install Mod Organizer itself into the base folder.
    pub install_mo2: bool,
    /// Deploy root mods through the Root Builder plugin layout.
    pub use_root_builder: bool,
}

impl Mo2InstanceInfo {
    /// Describe an instance with the default folder layout below `base_folder`.
    pub fn new(
        name: impl Into<String>,
        game: Game,
        kind: InstanceKind,
        base_folder: impl Into<Utf8PathBuf>,
    ) -> Self {
        let base_folder = base_folder.into();
        Self {
            name: name.into(),
            game,
            profile: "Default".to_string(),
            kind,
            mods_folder: base_folder.join("mods"),
            profiles_folder: base_folder.join("profiles"),
            overwrite_folder: base_folder.join("overwrite"),
            base_folder,
            install_mo2: false,
            use_root_builder: true,
        }
    }

    pub fn portable(name: impl Into<String>, game: Game, base_folder: impl Into<Utf8PathBuf>) -> Self {
        Self::new(name, game, InstanceKind::Portable, base_folder)
    }

    /// Global instances live in `<global_root>/<name>`.
    pub fn global(name: impl Into<String>, game: Game, global_root: &Utf8Path) -> Self {
        let name = name.into();
        let base = global_root.join(&name);
        Self::new(name, game, InstanceKind::Global, base)
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    pub fn profile_folder(&self) -> Utf8PathBuf {
        self.profiles_folder.join(&self.profile)
    }

    pub fn ini_path(&self) -> Utf8PathBuf {
        self.base_folder.join("ModOrganizer.ini")
    }
}

/// Locates (or describes how to create) a Vortex profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VortexProfileInfo {
    pub name: String,
    pub game: Game,
    pub id: String,
}

impl VortexProfileInfo {
    pub fn new(name: impl Into<String>, game: Game, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            game,
            id: id.into(),
        }
    }

    /// A profile that does not exist yet, with a freshly generated id.
    pub fn new_profile(name: impl Into<String>, game: Game) -> Self {
        Self::new(name, game, generate_id(9))
    }
}

/// Random alphanumeric identifier in the style Vortex uses for profiles and tools.
pub fn generate_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Descriptor for a source or destination instance, one variant per manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceInfo {
    ModOrganizer(Mo2InstanceInfo),
    Vortex(VortexProfileInfo),
}

impl InstanceInfo {
    pub fn display_name(&self) -> &str {
        match self {
            InstanceInfo::ModOrganizer(info) => &info.name,
            InstanceInfo::Vortex(info) => &info.name,
        }
    }

    pub fn game(&self) -> &Game {
        match self {
            InstanceInfo::ModOrganizer(info) => &info.game,
            InstanceInfo::Vortex(info) => &info.game,
        }
    }

    pub fn variant_name(&self) -> &'static str {
        match self {
            InstanceInfo::ModOrganizer(_) => "Mod Organizer",
            InstanceInfo::Vortex(_) => "Vortex",
        }
    }

    /// Log every field of the descriptor.
    pub fn log(&self, label: &str) {
        match self {
            InstanceInfo::ModOrganizer(info) => tracing::info!(
                "{}: MO2 instance '{}' ({:?}) game={} profile={} base={} mods={} profiles={} overwrite={} install_mo2={} root_builder={}",
                label,
                info.name,
                info.kind,
                info.game.id,
                info.profile,
                info.base_folder,
                info.mods_folder,
                info.profiles_folder,
                info.overwrite_folder,
                info.install_mo2,
                info.use_root_builder
            ),
            InstanceInfo::Vortex(info) => tracing::info!(
                "{}: Vortex profile '{}' id={} game={}",
                label,
                info.name,
                info.id,
                info.game.id
            ),
        }
    }
}
