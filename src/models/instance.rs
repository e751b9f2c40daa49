use crate::error::ManagerError;
use crate::services::archive::Archiver;
use crate::services::filesystem;
use camino::{Utf8Path, Utf8PathBuf};
use once_cell::sync::OnceCell;

/// Where a mod's files come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModSource {
    /// An installed (extracted) mod folder.
    Folder(Utf8PathBuf),
    /// A downloaded archive that still has to be extracted.
    Archive(Utf8PathBuf),
}

impl ModSource {
    pub fn path(&self) -> &Utf8Path {
        match self {
            ModSource::Folder(path) | ModSource::Archive(path) => path,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModKind {
    Regular,
    /// Visual divider in the mod list; has no files.
    Separator,
    /// Files written by tools outside any named mod.
    Overwrite,
}

impl ModKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ModKind::Regular => "regular",
            ModKind::Separator => "separator",
            ModKind::Overwrite => "overwrite",
        }
    }
}

/// Download metadata of a mod.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub mod_id: Option<u64>,
    pub file_id: Option<u64>,
    pub version: String,
    /// Name of the archive the mod was installed from.
    pub file_name: Option<String>,
    pub game_id: String,
}

/// A named, independently toggleable unit of files.
#[derive(Debug, Clone)]
pub struct Mod {
    pub display_name: String,
    pub source: ModSource,
    pub enabled: bool,
    /// Position in the stored load order (0 is loaded first).
    pub priority: usize,
    pub kind: ModKind,
    /// Deployment target relative to the game folder; `"."` is the game root,
    /// `None` the data folder.
    pub deploy_path: Option<Utf8PathBuf>,
    pub metadata: Metadata,
    pub installed: bool,
    /// Names of mods that overwrite this one and must load after it.
    pub mod_conflicts: Vec<String>,
    files: OnceCell<Vec<Utf8PathBuf>>,
    size: OnceCell<u64>,
}

impl Mod {
    pub fn new(display_name: impl Into<String>, source: ModSource) -> Self {
        Self {
            display_name: display_name.into(),
            source,
            enabled: true,
            priority: 0,
            kind: ModKind::Regular,
            deploy_path: None,
            metadata: Metadata::default(),
            installed: true,
            mod_conflicts: Vec::new(),
            files: OnceCell::new(),
            size: OnceCell::new(),
        }
    }

    pub fn with_kind(mut self, kind: ModKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_priority(mut self, priority: usize) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn is_root_mod(&self) -> bool {
        self.deploy_path.as_deref() == Some(Utf8Path::new("."))
    }

    /// Relative paths of the mod's regular files, resolved on first call only.
    pub fn files(&self, archiver: &Archiver) -> Result<&[Utf8PathBuf], ManagerError> {
        self.files
            .get_or_try_init(|| match &self.source {
                ModSource::Folder(path) if self.kind == ModKind::Separator && !path.exists() => {
                    Ok(Vec::new())
                }
                ModSource::Folder(path) => Ok(filesystem::list_files(path)?),
                ModSource::Archive(path) => {
                    let archive = archiver.load(path)?;
                    Ok(archive.files()?.into_iter().map(Utf8PathBuf::from).collect())
                }
            })
            .map(Vec::as_slice)
    }

    /// Total size in bytes of the mod's files, resolved on first call only.
    pub fn size(&self, archiver: &Archiver) -> Result<u64, ManagerError> {
        self.size
            .get_or_try_init(|| match &self.source {
                ModSource::Folder(path) => {
                    let files = self.files(archiver)?;
                    Ok(filesystem::total_size(path, files))
                }
                ModSource::Archive(path) => Ok(archiver.load(path)?.uncompressed_size()?),
            })
            .copied()
    }
}

/// A tool registered in a mod manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tool {
    pub display_name: String,
    pub executable: Utf8PathBuf,
    pub arguments: Vec<String>,
    pub working_dir: Option<Utf8PathBuf>,
    pub enabled: bool,
}

impl Tool {
    pub fn new(display_name: impl Into<String>, executable: impl Into<Utf8PathBuf>) -> Self {
        Self {
            display_name: display_name.into(),
            executable: executable.into(),
            arguments: Vec::new(),
            working_dir: None,
            enabled: true,
        }
    }

    /// Arguments joined into one command line, quoting those with spaces.
    pub fn command_line(&self) -> String {
        self.arguments
            .iter()
            .map(|arg| {
                if arg.contains(' ') {
                    format!("\"{}\"", arg)
                } else {
                    arg.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Split a command line on spaces outside double quotes.
    pub fn split_command_line(line: &str) -> Vec<String> {
        let mut args = Vec::new();
        let mut current = String::new();
        let mut quoted = false;
        for c in line.chars() {
            match c {
                '"' => quoted = !quoted,
                ' ' if !quoted => {
                    if !current.is_empty() {
                        args.push(std::mem::take(&mut current));
                    }
                }
                other => current.push(other),
            }
        }
        if !current.is_empty() {
            args.push(current);
        }
        args
    }
}

/// One managed collection of mods and tools for a game.
#[derive(Debug, Clone)]
pub struct Instance {
    pub display_name: String,
    /// Root folder of the instance (MO2 base folder, Vortex staging folder).
    pub root: Utf8PathBuf,
    pub game_folder: Utf8PathBuf,
    pub profile: String,
    pub mods: Vec<Mod>,
    pub tools: Vec<Tool>,
    /// Whether [`Instance::mods`] is a meaningful load order.
    pub order_matters: bool,
    pub separate_ini_files: bool,
    pub separate_save_games: bool,
}

impl Instance {
    pub fn new(
        display_name: impl Into<String>,
        root: impl Into<Utf8PathBuf>,
        game_folder: impl Into<Utf8PathBuf>,
        profile: impl Into<String>,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            root: root.into(),
            game_folder: game_folder.into(),
            profile: profile.into(),
            mods: Vec::new(),
            tools: Vec::new(),
            order_matters: true,
            separate_ini_files: false,
            separate_save_games: false,
        }
    }

    pub fn enabled_mods(&self) -> impl Iterator<Item = &Mod> {
        self.mods.iter().filter(|m| m.enabled)
    }

    pub fn enabled_tools(&self) -> impl Iterator<Item = &Tool> {
        self.tools.iter().filter(|t| t.enabled)
    }

    pub fn mod_by_name(&self, name: &str) -> Option<&Mod> {
        self.mods.iter().find(|m| m.display_name == name)
    }

    /// Toggle a mod by name. Returns `false` if no such mod exists.
    pub fn set_mod_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.mods.iter_mut().find(|m| m.display_name == name) {
            Some(m) => {
                m.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Whether an equivalent mod already exists in this instance.
    ///
    /// Mods with download metadata match on mod id and file id, others on name. Installed
    /// names may be the cleaned and clamped form of `candidate`'s name, so those match too.
    pub fn is_mod_installed(&self, candidate: &Mod, modname_limit: usize) -> bool {
        let ids = (candidate.metadata.mod_id, candidate.metadata.file_id);
        let folder_name = filesystem::mod_folder_name(&candidate.display_name, modname_limit);
        let clamped = filesystem::clamp_name(&candidate.display_name, modname_limit);
        self.mods.iter().any(|m| match (ids, (m.metadata.mod_id, m.metadata.file_id)) {
            ((Some(mod_id), Some(file_id)), (Some(other_mod), Some(other_file))) => {
                mod_id == other_mod && file_id == other_file
            }
            _ => {
                m.display_name == candidate.display_name
                    || m.display_name == folder_name
                    || m.display_name == clamped
            }
        })
    }

    /// Mods in the order their files are applied, later entries winning conflicts.
    ///
    /// Order-insensitive instances derive one: alphabetical, with each mod moved in front of
    /// the earliest mod that overwrites it.
    pub fn load_order(&self) -> Vec<&Mod> {
        let mut order: Vec<&Mod> = self.mods.iter().collect();
        if self.order_matters {
            order.sort_by_key(|m| m.priority);
            return order;
        }

        order.sort_by_key(|m| m.display_name.to_lowercase());
        for current in &self.mods {
            if current.mod_conflicts.is_empty() {
                continue;
            }
            let Some(old_index) = position(&order, &current.display_name) else {
                continue;
            };
            let target = current
                .mod_conflicts
                .iter()
                .filter_map(|name| position(&order, name))
                .fold(old_index, usize::min);
            if target != old_index {
                let moved = order.remove(old_index);
                order.insert(target, moved);
            }
        }
        order
    }

    /// Sum of the enabled mods' sizes.
    pub fn total_enabled_size(&self, archiver: &Archiver) -> Result<u64, ManagerError> {
        let mut total = 0;
        for m in self.enabled_mods() {
            total += m.size(archiver)?;
        }
        Ok(total)
    }
}

fn position(order: &[&Mod], name: &str) -> Option<usize> {
    order.iter().position(|m| m.display_name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn folder_mod(name: &str, priority: usize) -> Mod {
        Mod::new(name, ModSource::Folder(Utf8PathBuf::from(format!("/mods/{}", name))))
            .with_priority(priority)
    }

    #[test]
    fn test_files_are_memoised() {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        fs::write(root.join("a.esp"), "abc").unwrap();
        fs::create_dir(root.join("textures")).unwrap();

        let m = Mod::new("A", ModSource::Folder(root.clone()));
        let archiver = Archiver::default();
        assert_eq!(m.files(&archiver).unwrap(), &[Utf8PathBuf::from("a.esp")]);

        fs::write(root.join("b.esp"), "later").unwrap();
        assert_eq!(m.files(&archiver).unwrap().len(), 1);
        assert_eq!(m.size(&archiver).unwrap(), 3);
    }

    #[test]
    fn test_archive_mods_are_listed_and_sized_from_the_archive() {
        use std::io::Write;

        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let path = root.join("Packed-1-1-0.zip");
        let mut writer = zip::ZipWriter::new(fs::File::create(&path).unwrap());
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for (name, contents) in [("plugin.esp", "12345"), ("textures/sky.dds", "1234567")] {
            writer.start_file(name, options).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap();

        let loose = root.join("loose");
        fs::create_dir(&loose).unwrap();
        fs::write(loose.join("loose.esp"), "abc").unwrap();

        let archiver = Archiver::default();
        let packed = Mod::new("Packed", ModSource::Archive(path));
        assert_eq!(
            packed.files(&archiver).unwrap(),
            &[Utf8PathBuf::from("plugin.esp"), Utf8PathBuf::from("textures/sky.dds")]
        );

        let mut instance = Instance::new("Test", &root, "/game", "Default");
        instance.mods = vec![
            packed.with_priority(0),
            Mod::new("Loose", ModSource::Folder(loose)).with_priority(1),
            folder_mod("Off", 2).with_enabled(false),
        ];
        assert_eq!(instance.total_enabled_size(&archiver).unwrap(), 15);
    }

    #[test]
    fn test_missing_folder_is_an_error() {
        let m = Mod::new("Gone", ModSource::Folder(Utf8PathBuf::from("/does/not/exist")));
        assert!(m.files(&Archiver::default()).is_err());
    }

    #[test]
    fn test_ordered_load_order_uses_priority() {
        let mut instance = Instance::new("Test", "/root", "/game", "Default");
        instance.mods = vec![folder_mod("B", 1), folder_mod("A", 0), folder_mod("C", 2)];
        let names: Vec<_> = instance.load_order().iter().map(|m| m.display_name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_unordered_load_order_respects_overwrites() {
        let mut instance = Instance::new("Test", "/root", "/game", "Default");
        instance.order_matters = false;
        let mut z = folder_mod("Zeta", 0);
        z.mod_conflicts = vec!["Beta".to_string()];
        instance.mods = vec![folder_mod("Beta", 0), folder_mod("Alpha", 0), z];

        let names: Vec<_> = instance.load_order().iter().map(|m| m.display_name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Zeta", "Beta"]);
    }

    #[test]
    fn test_is_mod_installed_prefers_ids() {
        let mut instance = Instance::new("Test", "/root", "/game", "Default");
        let metadata = Metadata {
            mod_id: Some(266),
            file_id: Some(1000),
            ..Metadata::default()
        };
        instance.mods.push(folder_mod("SKSE", 0).with_metadata(metadata.clone()));

        let renamed = folder_mod("Script Extender", 0).with_metadata(metadata);
        assert!(instance.is_mod_installed(&renamed, 64));
        assert!(instance.is_mod_installed(&folder_mod("SKSE", 3), 64));
        assert!(!instance.is_mod_installed(&folder_mod("Other", 0), 64));
    }

    #[test]
    fn test_is_mod_installed_matches_cleaned_folder_names() {
        let mut instance = Instance::new("Test", "/root", "/game", "Default");
        let cleaned = filesystem::mod_folder_name("Scripts, Tweaks & More", 64);
        assert_ne!(cleaned, "Scripts, Tweaks & More");
        instance.mods.push(folder_mod(&cleaned, 0));
        instance.mods.push(folder_mod("A Very Long", 1));

        assert!(instance.is_mod_installed(&folder_mod("Scripts, Tweaks & More", 0), 64));
        assert!(instance.is_mod_installed(&folder_mod("A Very Long Mod Name", 1), 11));
        assert!(!instance.is_mod_installed(&folder_mod("A Very Long Mod Name", 1), 64));
    }

    #[test]
    fn test_tool_command_line_round_trip() {
        let mut tool = Tool::new("xEdit", "C:/Tools/SSEEdit.exe");
        tool.arguments = vec!["-quickautoclean".to_string(), "My Plugin.esp".to_string()];
        let line = tool.command_line();
        assert_eq!(line, "-quickautoclean \"My Plugin.esp\"");
        assert_eq!(Tool::split_command_line(&line), tool.arguments);
    }

    #[test]
    fn test_set_mod_enabled() {
        let mut instance = Instance::new("Test", "/root", "/game", "Default");
        instance.mods.push(folder_mod("A", 0));
        assert!(instance.set_mod_enabled("A", false));
        assert!(!instance.set_mod_enabled("missing", false));
        assert_eq!(instance.enabled_mods().count(), 0);
    }
}
