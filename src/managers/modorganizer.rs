//! Mod Organizer 2 adapter.
//!
//! An instance is a base folder holding `ModOrganizer.ini`, a mods folder with one
//! subfolder per mod, a profiles folder and a reserved `overwrite` folder. Each profile
//! stores its load order in `modlist.txt`, highest priority first, with `+`/`-` marking
//! enabled and disabled mods.

use crate::error::{ManagerError, PreflightError};
use crate::managers::{
    FinalizeOptions, InstallOptions, MergeContext, MigrationRole, ModManager, ResolvedFiles,
    copy_into, normalize_version,
};
use crate::models::{
    Game, Instance, InstanceInfo, InstanceKind, Metadata, Mo2InstanceInfo, Mod, ModKind,
    ModSource, Tool,
};
use crate::services::archive::Archiver;
use crate::services::filesystem::{self, MergeStats};
use crate::utils::Ini;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::fs;

const MANAGER_NAME: &str = "Mod Organizer";
const BASE_DIR: &str = "%BASE_DIR%";
const SEPARATOR_SUFFIX: &str = "_separator";
const ROOT_FOLDER: &str = "Root";
const OVERWRITE_NAME: &str = "Overwrite";

/// Adapter for Mod Organizer 2 instances.
#[derive(Debug, Clone)]
pub struct ModOrganizer {
    global_root: Utf8PathBuf,
    archiver: Archiver,
    release_archive: Option<Utf8PathBuf>,
}

impl ModOrganizer {
    /// # Arguments
    /// * `global_root` - Folder holding global instances (`%LOCALAPPDATA%/ModOrganizer`)
    /// * `archiver` - Used to unpack the MO2 release archive for new instances
    pub fn new(global_root: impl Into<Utf8PathBuf>, archiver: Archiver) -> Self {
        Self {
            global_root: global_root.into(),
            archiver,
            release_archive: None,
        }
    }

    /// Default global root: `<local app data>/ModOrganizer`.
    pub fn default_global_root() -> Result<Utf8PathBuf, ManagerError> {
        dirs::data_local_dir()
            .and_then(|d| Utf8PathBuf::from_path_buf(d).ok())
            .map(|d| d.join("ModOrganizer"))
            .ok_or_else(|| ManagerError::Environment("local application data folder".to_string()))
    }

    /// Archive extracted into new instances that request a bundled MO2.
    pub fn with_release_archive(mut self, archive: impl Into<Utf8PathBuf>) -> Self {
        self.release_archive = Some(archive.into());
        self
    }

    pub fn global_root(&self) -> &Utf8Path {
        &self.global_root
    }

    /// Names of the global instances managing `game`.
    pub fn global_instance_names(&self, game: &Game) -> Vec<String> {
        self.global_instance_folders()
            .into_iter()
            .filter(|base| {
                read_ini(&base.join("ModOrganizer.ini"))
                    .ok()
                    .and_then(|ini| ini.get("General", "gameName").map(str::to_string))
                    .is_some_and(|name| name.eq_ignore_ascii_case(&game.display_name))
            })
            .filter_map(|base| base.file_name().map(str::to_string))
            .collect()
    }

    fn global_instance_folders(&self) -> Vec<Utf8PathBuf> {
        let Ok(entries) = self.global_root.read_dir_utf8() else {
            return Vec::new();
        };
        let mut folders: Vec<Utf8PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.into_path())
            .filter(|path| path.join("ModOrganizer.ini").is_file())
            .collect();
        folders.sort();
        folders
    }

    /// Build a descriptor for an existing instance from its `ModOrganizer.ini`.
    ///
    /// # Arguments
    /// * `base_folder` - Folder containing `ModOrganizer.ini`
    /// * `profile` - Profile to use; the instance's selected profile if `None`
    pub fn describe_instance(
        &self,
        base_folder: &Utf8Path,
        game: &Game,
        profile: Option<&str>,
    ) -> Result<Mo2InstanceInfo, ManagerError> {
        let ini_path = base_folder.join("ModOrganizer.ini");
        if !ini_path.is_file() {
            return Err(ManagerError::InstanceNotFound {
                name: base_folder.to_string(),
            });
        }
        let ini = read_ini(&ini_path)?;
        let name = base_folder
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| base_folder.to_string());
        let kind = if base_folder.starts_with(&self.global_root) {
            InstanceKind::Global
        } else {
            InstanceKind::Portable
        };

        let mut info = Mo2InstanceInfo::new(name, game.clone(), kind, base_folder);
        let base_directory = ini
            .get("Settings", "base_directory")
            .map(|dir| Utf8PathBuf::from(unwrap_byte_array(dir)))
            .unwrap_or_else(|| base_folder.to_path_buf());
        if let Some(dir) = ini.get("Settings", "mod_directory") {
            info.mods_folder = resolve_base_dir(dir, &base_directory);
        }
        if let Some(dir) = ini.get("Settings", "profiles_directory") {
            info.profiles_folder = resolve_base_dir(dir, &base_directory);
        }
        if let Some(dir) = ini.get("Settings", "overwrite_directory") {
            info.overwrite_folder = resolve_base_dir(dir, &base_directory);
        }
        info.profile = match profile {
            Some(profile) => profile.to_string(),
            None => ini
                .get("General", "selected_profile")
                .map(|p| unwrap_byte_array(p).to_string())
                .unwrap_or_else(|| "Default".to_string()),
        };
        Ok(info)
    }

    /// Profile folder names of an instance, sorted.
    pub fn profile_names(info: &Mo2InstanceInfo) -> Vec<String> {
        let Ok(entries) = info.profiles_folder.read_dir_utf8() else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_dir())
            .map(|entry| entry.file_name().to_string())
            .collect();
        names.sort();
        names
    }

    fn info<'a>(&self, info: &'a InstanceInfo) -> Result<&'a Mo2InstanceInfo, ManagerError> {
        match info {
            InstanceInfo::ModOrganizer(info) => Ok(info),
            other => Err(ManagerError::WrongInstanceKind {
                manager: MANAGER_NAME.to_string(),
                got: other.variant_name().to_string(),
            }),
        }
    }

    fn load_mods(&self, info: &Mo2InstanceInfo) -> Result<Vec<Mod>, ManagerError> {
        let modlist_path = info.profile_folder().join("modlist.txt");
        let modlist = fs::read_to_string(&modlist_path).map_err(|e| ManagerError::io(&modlist_path, e))?;
        let mut entries = parse_modlist(&modlist);

        // Folders MO2 has not listed yet are loaded last, disabled.
        let mut unmanaged: Vec<String> = info
            .mods_folder
            .read_dir_utf8()
            .map_err(|e| ManagerError::io(&info.mods_folder, e))?
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_dir())
            .map(|entry| entry.file_name().to_string())
            .filter(|name| !entries.iter().any(|(listed, _)| listed == name))
            .collect();
        unmanaged.sort();
        for name in unmanaged {
            tracing::info!("Found unmanaged mod folder '{}', loading it disabled", name);
            entries.push((name, false));
        }

        let mut mods = Vec::with_capacity(entries.len() + 1);
        for (priority, (folder_name, enabled)) in entries.into_iter().enumerate() {
            let folder = info.mods_folder.join(&folder_name);
            let metadata = read_meta_ini(&folder.join("meta.ini"), &info.game);

            let (display_name, kind) = match folder_name.strip_suffix(SEPARATOR_SUFFIX) {
                Some(stripped) => (stripped.to_string(), ModKind::Separator),
                None => (folder_name.clone(), ModKind::Regular),
            };

            let root_folder = folder.join(ROOT_FOLDER);
            let mut m = if kind == ModKind::Regular && root_folder.is_dir() {
                let mut m = Mod::new(display_name, ModSource::Folder(root_folder));
                m.deploy_path = Some(Utf8PathBuf::from("."));
                m
            } else {
                Mod::new(display_name, ModSource::Folder(folder))
            };
            m = m
                .with_kind(kind)
                .with_enabled(enabled)
                .with_priority(priority)
                .with_metadata(metadata);
            mods.push(m);
        }

        if folder_has_files(&info.overwrite_folder) {
            let priority = mods.len();
            mods.push(
                Mod::new(OVERWRITE_NAME, ModSource::Folder(info.overwrite_folder.clone()))
                    .with_kind(ModKind::Overwrite)
                    .with_enabled(false)
                    .with_priority(priority),
            );
        }

        self.process_conflicts(&mut mods);
        Ok(mods)
    }

    /// Record, for every mod, the later mods that overwrite one of its files.
    fn process_conflicts(&self, mods: &mut [Mod]) {
        let mut index: IndexMap<String, Vec<usize>> = IndexMap::new();
        for (position, m) in mods.iter().enumerate() {
            if m.kind != ModKind::Regular {
                continue;
            }
            match m.files(&self.archiver) {
                Ok(files) => {
                    for file in files {
                        index.entry(file.as_str().to_lowercase()).or_default().push(position);
                    }
                }
                Err(e) => tracing::warn!("Could not index files of '{}': {}", m.display_name, e),
            }
        }

        for owners in index.values().filter(|owners| owners.len() > 1) {
            for (i, &earlier) in owners.iter().enumerate() {
                for &later in &owners[i + 1..] {
                    let name = mods[later].display_name.clone();
                    if !mods[earlier].mod_conflicts.contains(&name) {
                        mods[earlier].mod_conflicts.push(name);
                    }
                }
            }
        }
    }

    fn load_tools(ini: &Ini) -> Vec<Tool> {
        let Some(section) = ini.section("customExecutables") else {
            return Vec::new();
        };
        let count: usize = section.get("size").and_then(|s| s.parse().ok()).unwrap_or(0);
        (1..=count)
            .filter_map(|i| {
                let title = section.get(&format!("{}\\title", i))?;
                let binary = section.get(&format!("{}\\binary", i))?;
                let mut tool = Tool::new(title.as_str(), binary.as_str());
                tool.arguments = section
                    .get(&format!("{}\\arguments", i))
                    .map(|a| Tool::split_command_line(a))
                    .unwrap_or_default();
                tool.working_dir = section
                    .get(&format!("{}\\workingDirectory", i))
                    .filter(|d| !d.is_empty())
                    .map(Utf8PathBuf::from);
                Some(tool)
            })
            .collect()
    }

    fn install_separator(
        &self,
        source_mod: &Mod,
        instance: &mut Instance,
        info: &Mo2InstanceInfo,
        options: &InstallOptions,
    ) -> Result<MergeStats, ManagerError> {
        let name = filesystem::mod_folder_name(
            &source_mod.display_name,
            options.modname_limit.saturating_sub(SEPARATOR_SUFFIX.len()).max(1),
        );
        let folder = info.mods_folder.join(format!("{}{}", name, SEPARATOR_SUFFIX));
        fs::create_dir_all(&folder).map_err(|e| ManagerError::io(&folder, e))?;

        if instance.mod_by_name(&name).is_none() {
            let priority = instance.mods.len();
            instance.mods.push(
                Mod::new(name, ModSource::Folder(folder))
                    .with_kind(ModKind::Separator)
                    .with_priority(priority),
            );
        }
        Ok(MergeStats::default())
    }

    fn write_modlist(&self, instance: &Instance, info: &Mo2InstanceInfo) -> Result<(), ManagerError> {
        let mut lines = Vec::new();
        for m in instance.load_order().into_iter().rev() {
            if m.kind == ModKind::Overwrite {
                continue;
            }
            let marker = if m.enabled { '+' } else { '-' };
            match m.kind {
                ModKind::Separator => lines.push(format!("{}{}{}", marker, m.display_name, SEPARATOR_SUFFIX)),
                _ => lines.push(format!("{}{}", marker, m.display_name)),
            }
        }
        let mut contents = lines.join("\n");
        contents.push('\n');

        let path = info.profile_folder().join("modlist.txt");
        if filesystem::write_if_changed(&path, &contents).map_err(|e| ManagerError::io(&path, e))? {
            tracing::info!("Wrote {} mods to {}", lines.len(), path);
        }
        Ok(())
    }
}

impl ModManager for ModOrganizer {
    fn id(&self) -> &'static str {
        "modorganizer"
    }

    fn display_name(&self) -> &'static str {
        MANAGER_NAME
    }

    fn detect_instances(&self, game: &Game) -> Result<Vec<InstanceInfo>, ManagerError> {
        let mut found = Vec::new();
        for name in self.global_instance_names(game) {
            let base = self.global_root.join(&name);
            let info = self.describe_instance(&base, game, None)?;
            let profiles = Self::profile_names(&info);
            tracing::info!("Found global MO2 instance '{}' with {} profile(s)", name, profiles.len());
            for profile in profiles {
                found.push(InstanceInfo::ModOrganizer(info.clone().with_profile(profile)));
            }
        }
        Ok(found)
    }

    fn load_instance(&self, info: &InstanceInfo) -> Result<Instance, ManagerError> {
        let info = self.info(info)?;
        let label = format!("{} > {}", info.name, info.profile);

        if info.kind == InstanceKind::Global
            && !self.global_instance_names(&info.game).contains(&info.name)
        {
            return Err(ManagerError::InstanceNotFound { name: label });
        }
        let ini_path = info.ini_path();
        if !ini_path.is_file() || !info.profile_folder().is_dir() {
            return Err(ManagerError::InstanceNotFound { name: label });
        }

        tracing::info!("Loading MO2 instance '{}'", label);
        let ini = read_ini(&ini_path)?;
        let game_folder = ini
            .get("General", "gamePath")
            .map(|p| Utf8PathBuf::from(unwrap_byte_array(p).replace("\\\\", "/")))
            .unwrap_or_default();

        let mut instance = Instance::new(label, &info.base_folder, game_folder, &info.profile);
        instance.mods = self.load_mods(info)?;
        instance.tools = Self::load_tools(&ini);

        let settings = read_ini_or_default(&info.profile_folder().join("settings.ini"))?;
        instance.separate_save_games = ini_bool(&settings, "General", "LocalSaves");
        instance.separate_ini_files = ini_bool(&settings, "General", "LocalSettings");

        tracing::info!(
            "Loaded {} mods and {} tools from '{}'",
            instance.mods.len(),
            instance.tools.len(),
            instance.display_name
        );
        Ok(instance)
    }

    fn instance_exists(&self, info: &InstanceInfo) -> bool {
        self.info(info).is_ok_and(|info| info.ini_path().is_file())
    }

    fn run_preflight_checks(
        &self,
        info: &InstanceInfo,
        role: MigrationRole,
        _source: &Instance,
    ) -> Result<(), PreflightError> {
        let InstanceInfo::ModOrganizer(info) = info else {
            return Ok(());
        };
        if role == MigrationRole::Source {
            return Ok(());
        }

        match info.kind {
            InstanceKind::Portable => {
                let globals = self.global_instance_folders().len();
                if globals > 0 {
                    return Err(PreflightError::GlobalInstanceDetected { count: globals });
                }
            }
            InstanceKind::Global => {
                if !info.base_folder.starts_with(&self.global_root) {
                    return Err(PreflightError::InvalidGlobalInstancePath {
                        path: info.base_folder.clone(),
                        expected_root: self.global_root.clone(),
                    });
                }
                if info.install_mo2 {
                    return Err(PreflightError::CannotInstallGlobal {
                        manager: MANAGER_NAME.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn destination_mods_path(&self, info: &InstanceInfo) -> Result<Utf8PathBuf, ManagerError> {
        Ok(self.info(info)?.mods_folder.clone())
    }

    fn create_instance(
        &self,
        info: &InstanceInfo,
        game_folder: &Utf8Path,
    ) -> Result<Instance, ManagerError> {
        let info = self.info(info)?;
        tracing::info!("Creating MO2 instance '{}' in {}", info.name, info.base_folder);

        if info.install_mo2 {
            let archive = self.release_archive.as_ref().ok_or_else(|| {
                ManagerError::Environment("Mod Organizer release archive".to_string())
            })?;
            self.archiver.load(archive)?.extract_all(&info.base_folder, true)?;
        }

        for folder in [
            info.base_folder.clone(),
            info.mods_folder.clone(),
            info.profile_folder(),
            info.overwrite_folder.clone(),
            info.base_folder.join("downloads"),
        ] {
            fs::create_dir_all(&folder).map_err(|e| ManagerError::io(&folder, e))?;
        }

        let mut ini = Ini::new();
        ini.set("General", "gameName", info.game.display_name.as_str());
        ini.set("General", "selected_profile", format!("@ByteArray({})", info.profile));
        ini.set("General", "gamePath", format!("@ByteArray({})", game_folder));
        ini.set("General", "first_start", "true");
        ini.set("Settings", "base_directory", info.base_folder.as_str());
        ini.set("Settings", "download_directory", format!("{}/downloads", BASE_DIR));
        ini.set("Settings", "mod_directory", relative_to_base(&info.mods_folder, &info.base_folder));
        ini.set(
            "Settings",
            "profiles_directory",
            relative_to_base(&info.profiles_folder, &info.base_folder),
        );
        ini.set(
            "Settings",
            "overwrite_directory",
            relative_to_base(&info.overwrite_folder, &info.base_folder),
        );
        ini.set("Settings", "language", "en");
        let ini_path = info.ini_path();
        ini.save(&ini_path).map_err(|e| ManagerError::io(&ini_path, e))?;

        let modlist = info.profile_folder().join("modlist.txt");
        filesystem::write_if_changed(&modlist, "").map_err(|e| ManagerError::io(&modlist, e))?;

        Ok(Instance::new(
            format!("{} > {}", info.name, info.profile),
            &info.base_folder,
            game_folder,
            &info.profile,
        ))
    }

    fn install_mod(
        &self,
        source_mod: &Mod,
        files: &ResolvedFiles,
        instance: &mut Instance,
        info: &InstanceInfo,
        options: &InstallOptions,
        merge: &MergeContext,
    ) -> Result<MergeStats, ManagerError> {
        let info = self.info(info)?;

        match source_mod.kind {
            ModKind::Separator => return self.install_separator(source_mod, instance, info, options),
            ModKind::Overwrite => {
                return Ok(filesystem::merge_files(
                    &files.root,
                    &files.files,
                    &info.overwrite_folder,
                    &options.merge,
                    merge.blacklist,
                    &merge.progress,
                    &merge.cancel,
                )?);
            }
            ModKind::Regular => {}
        }

        let folder_name = filesystem::mod_folder_name(&source_mod.display_name, options.modname_limit);
        let mod_folder = info.mods_folder.join(&folder_name);
        let mut managed = true;
        let target = match source_mod.deploy_path.as_deref() {
            Some(path) if path == Utf8Path::new(".") => {
                if info.use_root_builder {
                    mod_folder.join(ROOT_FOLDER)
                } else {
                    // Without Root Builder, root files go straight into the game folder.
                    managed = false;
                    instance.game_folder.clone()
                }
            }
            Some(path) => mod_folder.join(filesystem::clean_relative_path(path)),
            None => mod_folder.clone(),
        };
        fs::create_dir_all(&target).map_err(|e| ManagerError::io(&target, e))?;

        // A source meta.ini is blacklisted, so the destination's is always rebuilt from metadata.
        if managed {
            write_meta_ini(&mod_folder.join("meta.ini"), source_mod, &info.game)?;
        }

        tracing::info!("Installing '{}' into {}", source_mod.display_name, target);
        let stats = filesystem::merge_files(
            &files.root,
            &files.files,
            &target,
            &options.merge,
            merge.blacklist,
            &merge.progress,
            &merge.cancel,
        )?;

        if managed && instance.mod_by_name(&folder_name).is_none() {
            let priority = instance.mods.len();
            let mut installed = Mod::new(folder_name, ModSource::Folder(mod_folder))
                .with_priority(priority)
                .with_metadata(source_mod.metadata.clone());
            installed.deploy_path = source_mod.deploy_path.clone();
            instance.mods.push(installed);
        }
        Ok(stats)
    }

    fn add_tool(
        &self,
        tool: &Tool,
        instance: &mut Instance,
        info: &InstanceInfo,
    ) -> Result<(), ManagerError> {
        let info = self.info(info)?;
        let ini_path = info.ini_path();
        let mut ini = read_ini(&ini_path)?;

        let existing = Self::load_tools(&ini);
        if existing.iter().any(|t| t.display_name == tool.display_name) {
            tracing::info!("Tool '{}' already registered", tool.display_name);
        } else {
            let index = existing.len() + 1;
            ini.set("customExecutables", "size", index.to_string());
            ini.set("customExecutables", &format!("{}\\title", index), tool.display_name.as_str());
            ini.set("customExecutables", &format!("{}\\binary", index), tool.executable.as_str());
            ini.set("customExecutables", &format!("{}\\arguments", index), tool.command_line());
            ini.set(
                "customExecutables",
                &format!("{}\\workingDirectory", index),
                tool.working_dir.as_ref().map(|d| d.as_str()).unwrap_or(""),
            );
            ini.save(&ini_path).map_err(|e| ManagerError::io(&ini_path, e))?;
            tracing::info!("Registered tool '{}'", tool.display_name);
        }

        if !instance.tools.iter().any(|t| t.display_name == tool.display_name) {
            instance.tools.push(tool.clone());
        }
        Ok(())
    }

    fn additional_files(&self, info: &InstanceInfo) -> Vec<Utf8PathBuf> {
        let Ok(info) = self.info(info) else {
            return Vec::new();
        };
        let profile = info.profile_folder();
        info.game
            .additional_files
            .iter()
            .map(|name| profile.join(name))
            .filter(|path| path.is_file())
            .collect()
    }

    fn migrate_additional_file(
        &self,
        file: &Utf8Path,
        info: &InstanceInfo,
    ) -> Result<(), ManagerError> {
        let info = self.info(info)?;
        copy_into(file, &info.profile_folder())?;
        Ok(())
    }

    fn ini_folder(&self, info: &InstanceInfo) -> Option<Utf8PathBuf> {
        self.info(info).ok().map(Mo2InstanceInfo::profile_folder)
    }

    fn finalize(
        &self,
        instance: &Instance,
        info: &InstanceInfo,
        options: &FinalizeOptions,
    ) -> Result<(), ManagerError> {
        let info = self.info(info)?;
        self.write_modlist(instance, info)?;

        let settings_path = info.profile_folder().join("settings.ini");
        let mut settings = read_ini_or_default(&settings_path)?;
        settings.set("General", "LocalSaves", instance.separate_save_games.to_string());
        settings.set("General", "LocalSettings", instance.separate_ini_files.to_string());
        settings.save(&settings_path).map_err(|e| ManagerError::io(&settings_path, e))?;

        if options.activate {
            let ini_path = info.ini_path();
            let mut ini = read_ini(&ini_path)?;
            ini.set("General", "selected_profile", format!("@ByteArray({})", info.profile));
            ini.save(&ini_path).map_err(|e| ManagerError::io(&ini_path, e))?;
            tracing::info!("Selected profile '{}' in '{}'", info.profile, info.name);
        }
        Ok(())
    }

    fn completed_message(&self, info: &InstanceInfo) -> String {
        let Ok(info) = self.info(info) else {
            return format!("Migration to {} completed.", MANAGER_NAME);
        };
        let mut message = format!(
            "Migration to Mod Organizer instance '{}' (profile '{}') completed.",
            info.name, info.profile
        );
        if info.use_root_builder {
            message.push_str(
                "\nRoot mods were placed in 'Root' subfolders; install the Root Builder plugin to deploy them.",
            );
        }
        message
    }
}

/// Parse `modlist.txt` into `(folder name, enabled)` pairs, lowest priority first.
fn parse_modlist(contents: &str) -> Vec<(String, bool)> {
    contents
        .lines()
        .rev()
        .filter_map(|line| {
            let line = line.trim();
            if let Some(name) = line.strip_prefix('+') {
                Some((name.to_string(), true))
            } else {
                line.strip_prefix('-').map(|name| (name.to_string(), false))
            }
        })
        .collect()
}

fn read_meta_ini(path: &Utf8Path, game: &Game) -> Metadata {
    let Ok(ini) = Ini::load(path) else {
        return Metadata {
            game_id: game.id.clone(),
            ..Metadata::default()
        };
    };
    let parse_id = |value: Option<&str>| value.and_then(|v| v.parse::<u64>().ok()).filter(|id| *id > 0);

    Metadata {
        mod_id: parse_id(ini.get("General", "modid")),
        file_id: parse_id(ini.get("installedFiles", "1\\fileid")),
        version: normalize_version(ini.get("General", "version").unwrap_or_default()),
        file_name: ini
            .get("General", "installationFile")
            .filter(|f| !f.is_empty())
            .map(|f| f.rsplit(['/', '\\']).next().unwrap_or(f).to_string()),
        game_id: ini
            .get("General", "gameName")
            .and_then(Game::by_display_name)
            .map(|g| g.id.clone())
            .unwrap_or_else(|| game.id.clone()),
    }
}

fn write_meta_ini(path: &Utf8Path, source_mod: &Mod, game: &Game) -> Result<(), ManagerError> {
    let mut ini = read_ini_or_default(path)?;
    if ini.has_section("General") {
        return Ok(());
    }
    let meta = &source_mod.metadata;
    let game_name = Game::by_id(&meta.game_id)
        .map(|g| g.display_name.clone())
        .unwrap_or_else(|| game.display_name.clone());

    ini.set("General", "gameName", game_name);
    ini.set("General", "modid", meta.mod_id.unwrap_or(0).to_string());
    ini.set("General", "version", meta.version.as_str());
    ini.set("General", "installationFile", meta.file_name.as_deref().unwrap_or(""));
    ini.set("installedFiles", "size", "1");
    ini.set("installedFiles", "1\\modid", meta.mod_id.unwrap_or(0).to_string());
    ini.set("installedFiles", "1\\fileid", meta.file_id.unwrap_or(0).to_string());
    ini.save(path).map_err(|e| ManagerError::io(path, e))?;
    Ok(())
}

fn unwrap_byte_array(value: &str) -> &str {
    value
        .strip_prefix("@ByteArray(")
        .and_then(|v| v.strip_suffix(')'))
        .unwrap_or(value)
}

fn resolve_base_dir(value: &str, base: &Utf8Path) -> Utf8PathBuf {
    let value = unwrap_byte_array(value).replace('\\', "/");
    let resolved = Utf8PathBuf::from(value.replace(BASE_DIR, base.as_str()));
    if resolved.is_absolute() {
        resolved
    } else {
        base.join(resolved)
    }
}

fn relative_to_base(path: &Utf8Path, base: &Utf8Path) -> String {
    match path.strip_prefix(base) {
        Ok(relative) => format!("{}/{}", BASE_DIR, relative),
        Err(_) => path.to_string(),
    }
}

fn folder_has_files(folder: &Utf8Path) -> bool {
    filesystem::list_files(folder).is_ok_and(|files| !files.is_empty())
}

fn ini_bool(ini: &Ini, section: &str, key: &str) -> bool {
    ini.get(section, key).is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

fn read_ini(path: &Utf8Path) -> Result<Ini, ManagerError> {
    Ini::load(path).map_err(|e| ManagerError::io(path, e))
}

fn read_ini_or_default(path: &Utf8Path) -> Result<Ini, ManagerError> {
    Ini::load_or_default(path).map_err(|e| ManagerError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::blacklist::FileBlacklist;
    use crate::services::filesystem::MergeOptions;
    use crate::services::progress::{CancellationToken, ProgressReporter};
    use tempfile::TempDir;

    fn utf8(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap()
    }

    fn sse() -> Game {
        Game::by_id("skyrimse").unwrap().clone()
    }

    fn write(path: &Utf8Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    /// Portable instance with a separator, a disabled mod, a root mod and an unmanaged folder.
    fn fixture(root: &Utf8Path) -> Mo2InstanceInfo {
        let info = Mo2InstanceInfo::portable("Portable", sse(), root.join("MO2"));
        write(
            &info.ini_path(),
            "[General]\ngameName=Skyrim Special Edition\ngamePath=@ByteArray(/games/Skyrim)\nselected_profile=@ByteArray(Default)\n\n[Settings]\nmod_directory=%BASE_DIR%/mods\n\n[customExecutables]\nsize=1\n1\\title=SSEEdit\n1\\binary=/tools/SSEEdit.exe\n1\\arguments=-autoload \"My Plugin.esp\"\n1\\workingDirectory=\n",
        );
        write(
            &info.profile_folder().join("modlist.txt"),
            "# comment\n+RootMod\n+B\n-Disabled\n+Tools_separator\n+A\n*Unmanaged: DLC\n",
        );
        write(&info.mods_folder.join("A/textures/a.dds"), "a");
        write(&info.mods_folder.join("A/shared.esp"), "from a");
        write(
            &info.mods_folder.join("A/meta.ini"),
            "[General]\nmodid=266\nversion=2.0.0.0\ninstallationFile=C:/Downloads/A-266-2-0.7z\n\n[installedFiles]\n1\\modid=266\n1\\fileid=1000\n",
        );
        write(&info.mods_folder.join("B/shared.esp"), "from b");
        write(&info.mods_folder.join("RootMod/Root/skse_loader.exe"), "root");
        write(&info.mods_folder.join("Disabled/d.esp"), "d");
        fs::create_dir_all(info.mods_folder.join("Tools_separator")).unwrap();
        write(&info.mods_folder.join("Stray/s.esp"), "s");
        write(&info.profile_folder().join("settings.ini"), "[General]\nLocalSaves=true\n");
        info
    }

    fn adapter(root: &Utf8Path) -> ModOrganizer {
        ModOrganizer::new(root.join("global"), Archiver::default())
    }

    #[test]
    fn test_load_instance_reads_modlist_and_metadata() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        let info = fixture(&root);
        let mo2 = adapter(&root);

        let instance = mo2.load_instance(&InstanceInfo::ModOrganizer(info)).unwrap();
        let names: Vec<_> = instance.mods.iter().map(|m| m.display_name.as_str()).collect();
        assert_eq!(names, vec!["A", "Tools", "Disabled", "B", "RootMod", "Stray"]);

        let a = instance.mod_by_name("A").unwrap();
        assert_eq!(a.metadata.mod_id, Some(266));
        assert_eq!(a.metadata.file_id, Some(1000));
        assert_eq!(a.metadata.version, "2.0");
        assert_eq!(a.metadata.file_name.as_deref(), Some("A-266-2-0.7z"));
        assert_eq!(a.mod_conflicts, vec!["B".to_string()]);

        assert_eq!(instance.mod_by_name("Tools").unwrap().kind, ModKind::Separator);
        assert!(!instance.mod_by_name("Disabled").unwrap().enabled);
        assert!(!instance.mod_by_name("Stray").unwrap().enabled);
        assert_eq!(instance.game_folder, Utf8PathBuf::from("/games/Skyrim"));
        assert!(instance.separate_save_games);
        assert!(!instance.separate_ini_files);

        assert_eq!(instance.tools.len(), 1);
        assert_eq!(instance.tools[0].arguments, vec!["-autoload", "My Plugin.esp"]);
    }

    #[test]
    fn test_root_subfolder_marks_root_mod() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        let info = fixture(&root);
        let instance = adapter(&root)
            .load_instance(&InstanceInfo::ModOrganizer(info))
            .unwrap();
        let root_mod = instance.mod_by_name("RootMod").unwrap();
        assert!(root_mod.is_root_mod());
        assert!(root_mod.source.path().ends_with("RootMod/Root"));
        assert!(!instance.mod_by_name("B").unwrap().is_root_mod());
    }

    #[test]
    fn test_overwrite_loaded_as_disabled_pseudo_mod() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        let info = fixture(&root);
        write(&info.overwrite_folder.join("SKSE/log.txt"), "log");

        let instance = adapter(&root)
            .load_instance(&InstanceInfo::ModOrganizer(info))
            .unwrap();
        let overwrite = instance.mods.last().unwrap();
        assert_eq!(overwrite.kind, ModKind::Overwrite);
        assert!(!overwrite.enabled);
    }

    #[test]
    fn test_missing_instance_is_not_found() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        let info = Mo2InstanceInfo::portable("Nothing", sse(), root.join("nothing"));
        let err = adapter(&root)
            .load_instance(&InstanceInfo::ModOrganizer(info))
            .unwrap_err();
        assert!(matches!(err, ManagerError::InstanceNotFound { .. }));
    }

    #[test]
    fn test_detects_global_instances_per_profile() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        let mo2 = adapter(&root);
        let base = mo2.global_root().join("Skyrim");
        write(&base.join("ModOrganizer.ini"), "[General]\ngameName=Skyrim Special Edition\n");
        fs::create_dir_all(base.join("profiles/Default")).unwrap();
        fs::create_dir_all(base.join("profiles/Survival")).unwrap();
        let other = mo2.global_root().join("FO4");
        write(&other.join("ModOrganizer.ini"), "[General]\ngameName=Fallout 4\n");

        let found = mo2.detect_instances(&sse()).unwrap();
        assert_eq!(found.len(), 2);
        let InstanceInfo::ModOrganizer(first) = &found[0] else {
            panic!("expected an MO2 descriptor");
        };
        assert_eq!(first.kind, InstanceKind::Global);
        assert_eq!(first.profile, "Default");
    }

    #[test]
    fn test_portable_destination_rejected_when_globals_exist() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        let mo2 = adapter(&root);
        write(&mo2.global_root().join("Any/ModOrganizer.ini"), "[General]\n");
        let dst = InstanceInfo::ModOrganizer(Mo2InstanceInfo::portable("New", sse(), root.join("new")));
        let source = Instance::new("src", &root, &root, "Default");

        let err = mo2
            .run_preflight_checks(&dst, MigrationRole::Destination, &source)
            .unwrap_err();
        assert_eq!(err, PreflightError::GlobalInstanceDetected { count: 1 });
        assert!(mo2.run_preflight_checks(&dst, MigrationRole::Source, &source).is_ok());
    }

    #[test]
    fn test_global_destination_checks() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        let mo2 = adapter(&root);
        let source = Instance::new("src", &root, &root, "Default");

        let mut outside = Mo2InstanceInfo::portable("Elsewhere", sse(), root.join("elsewhere"));
        outside.kind = InstanceKind::Global;
        let err = mo2
            .run_preflight_checks(&InstanceInfo::ModOrganizer(outside), MigrationRole::Destination, &source)
            .unwrap_err();
        assert!(matches!(err, PreflightError::InvalidGlobalInstancePath { .. }));

        let mut bundled = Mo2InstanceInfo::global("New", sse(), mo2.global_root());
        bundled.install_mo2 = true;
        let err = mo2
            .run_preflight_checks(&InstanceInfo::ModOrganizer(bundled), MigrationRole::Destination, &source)
            .unwrap_err();
        assert!(matches!(err, PreflightError::CannotInstallGlobal { .. }));
    }

    #[test]
    fn test_create_install_and_finalize() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        let mo2 = adapter(&root);
        let info = InstanceInfo::ModOrganizer(Mo2InstanceInfo::portable("New", sse(), root.join("new")));

        let mut instance = mo2.create_instance(&info, Utf8Path::new("/games/Skyrim")).unwrap();
        assert!(mo2.instance_exists(&info));

        let src = root.join("src");
        write(&src.join("plugin.esp"), "esp");
        write(&src.join("meta.ini"), "ignored");
        let mut source_mod = Mod::new("Cool: Mod?", ModSource::Folder(src.clone()));
        source_mod.metadata.mod_id = Some(5);
        source_mod.metadata.file_id = Some(7);
        let files = ResolvedFiles {
            root: src.clone(),
            files: vec![Utf8PathBuf::from("plugin.esp")],
        };
        let options = InstallOptions {
            merge: MergeOptions {
                use_hardlinks: false,
                replace: false,
            },
            modname_limit: 100,
        };
        let merge = MergeContext {
            blacklist: FileBlacklist::global(),
            progress: ProgressReporter::silent(),
            cancel: CancellationToken::new(),
        };

        mo2.install_mod(&source_mod, &files, &mut instance, &info, &options, &merge)
            .unwrap();
        let separator = Mod::new("Extras", ModSource::Folder(root.join("none"))).with_kind(ModKind::Separator);
        mo2.install_mod(&separator, &ResolvedFiles { root: src.clone(), files: vec![] }, &mut instance, &info, &options, &merge)
            .unwrap();

        let base = root.join("new");
        assert!(base.join("mods/Cool Mod/plugin.esp").is_file());
        let meta = Ini::load(&base.join("mods/Cool Mod/meta.ini")).unwrap();
        assert_eq!(meta.get("General", "modid"), Some("5"));
        assert_eq!(meta.get("installedFiles", "1\\fileid"), Some("7"));
        assert!(base.join("mods/Extras_separator").is_dir());

        instance.separate_ini_files = true;
        mo2.finalize(&instance, &info, &FinalizeOptions { activate: true }).unwrap();
        let modlist = fs::read_to_string(base.join("profiles/Default/modlist.txt")).unwrap();
        assert_eq!(modlist, "+Extras_separator\n+Cool Mod\n");
        let settings = Ini::load(&base.join("profiles/Default/settings.ini")).unwrap();
        assert_eq!(settings.get("General", "LocalSettings"), Some("true"));

        let reloaded = mo2.load_instance(&info).unwrap();
        assert_eq!(reloaded.mods.len(), 2);
        assert_eq!(reloaded.mod_by_name("Cool Mod").unwrap().metadata.mod_id, Some(5));
    }

    #[test]
    fn test_add_tool_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        let info = fixture(&root);
        let mo2 = adapter(&root);
        let info = InstanceInfo::ModOrganizer(info);
        let mut instance = mo2.load_instance(&info).unwrap();

        let tool = Tool::new("LOOT", "/tools/loot.exe");
        mo2.add_tool(&tool, &mut instance, &info).unwrap();
        mo2.add_tool(&tool, &mut instance, &info).unwrap();

        let reloaded = mo2.load_instance(&info).unwrap();
        assert_eq!(reloaded.tools.len(), 2);
        assert_eq!(reloaded.tools[1].display_name, "LOOT");
    }

    #[test]
    fn test_resolve_base_dir() {
        let base = Utf8Path::new("/mo2");
        assert_eq!(resolve_base_dir("%BASE_DIR%/mods", base), Utf8PathBuf::from("/mo2/mods"));
        assert_eq!(resolve_base_dir("/elsewhere/mods", base), Utf8PathBuf::from("/elsewhere/mods"));
        assert_eq!(relative_to_base(Utf8Path::new("/mo2/profiles"), base), "%BASE_DIR%/profiles");
    }
}
