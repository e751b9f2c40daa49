use camino::Utf8PathBuf;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

static GAMES_SOURCE: &str = include_str!("../../res/games.yaml");

static SUPPORTED_GAMES: Lazy<Vec<Game>> = Lazy::new(|| {
    match serde_yaml_ng::from_str::<Vec<Game>>(GAMES_SOURCE) {
        Ok(games) => games,
        Err(e) => {
            tracing::error!("Failed to parse built-in game list: {}", e);
            Vec::new()
        }
    }
});

/// A game the engine knows how to migrate instances for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    /// Identifier as used by Vortex, e.g. `skyrimse`.
    pub id: String,

    /// Name as used by MO2's `gameName`, e.g. `Skyrim Special Edition`.
    pub display_name: String,

    pub short_name: String,

    /// Nexus Mods domain.
    pub nexus_id: String,

    /// Folder holding the game's INI files; `%DOCUMENTS%` is expanded.
    pub ini_dir: String,

    pub ini_files: Vec<String>,

    /// Mods folder relative to the game's install directory.
    pub mods_folder: String,

    /// Per-profile files carried along with a migration, e.g. `plugins.txt`.
    #[serde(default)]
    pub additional_files: Vec<String>,
}

impl Game {
    pub fn supported() -> &'static [Game] {
        &SUPPORTED_GAMES
    }

    /// Look up a game by id or short name, ignoring case. Ids shared by several editions
    /// resolve to the first one listed.
    pub fn by_id(id: &str) -> Option<&'static Game> {
        Self::supported()
            .iter()
            .find(|g| g.id.eq_ignore_ascii_case(id) || g.short_name.eq_ignore_ascii_case(id))
    }

    /// Look up a game by the display name MO2 stores in `ModOrganizer.ini`.
    pub fn by_display_name(name: &str) -> Option<&'static Game> {
        Self::supported()
            .iter()
            .find(|g| g.display_name.eq_ignore_ascii_case(name))
    }

    /// The game's INI folder with `%DOCUMENTS%` expanded.
    pub fn resolved_ini_dir(&self) -> Option<Utf8PathBuf> {
        if !self.ini_dir.contains("%DOCUMENTS%") {
            return Some(Utf8PathBuf::from(&self.ini_dir));
        }
        let documents = dirs::document_dir().and_then(|d| Utf8PathBuf::from_path_buf(d).ok())?;
        Some(Utf8PathBuf::from(
            self.ini_dir.replace("%DOCUMENTS%", documents.as_str()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_games_parse() {
        assert!(Game::supported().len() >= 5);
    }

    #[test]
    fn test_lookup_by_id_and_short_name() {
        let sse = Game::by_id("SkyrimSE").unwrap();
        assert_eq!(sse.id, "skyrimse");
        assert_eq!(Game::by_id("skyrimse"), Some(sse));
        assert_eq!(sse.ini_files, vec!["Skyrim.ini", "SkyrimPrefs.ini", "SkyrimCustom.ini"]);
        assert!(Game::by_id("minecraft").is_none());
    }

    #[test]
    fn test_gog_editions_have_their_own_ini_dir() {
        let gog = Game::by_id("SkyrimSEGOG").unwrap();
        assert_eq!(gog.id, "skyrimse");
        assert_eq!(gog.display_name, "Skyrim Special Edition GOG");
        assert!(gog.ini_dir.ends_with("My Games/Skyrim Special Edition GOG"));
        assert_eq!(Game::by_id("skyrimse").unwrap().display_name, "Skyrim Special Edition");

        let enderal_gog = Game::by_display_name("Enderal Special Edition GOG").unwrap();
        assert_eq!(enderal_gog.short_name, "EnderalSEGOG");
        assert!(enderal_gog.ini_dir.ends_with("My Games/Enderal Special Edition GOG"));
    }

    #[test]
    fn test_enderal_is_distinct_from_special_edition() {
        let enderal = Game::by_id("enderal").unwrap();
        assert_eq!(enderal.display_name, "Enderal");
        assert_eq!(enderal.nexus_id, "enderal");
        assert_eq!(Game::supported().len(), 10);
    }

    #[test]
    fn test_lookup_by_display_name() {
        let fo4 = Game::by_display_name("fallout 4").unwrap();
        assert_eq!(fo4.id, "fallout4");
        assert!(fo4.additional_files.contains(&"plugins.txt".to_string()));
    }
}
