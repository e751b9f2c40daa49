//! Vortex adapter.
//!
//! Vortex keeps all of its state in one LevelDB database shared by every game and
//! profile, and stores mod files in a per-game staging folder. Profiles do not have a
//! meaningful load order; conflicts are expressed as `before`/`after` rules between mods.

pub mod database;

pub use database::{DatabaseError, LevelDbStore, MemoryStore, StateStore, VortexDatabase};

use crate::error::{ManagerError, PreflightError};
use crate::managers::{
    FinalizeOptions, InstallOptions, MergeContext, MigrationRole, ModManager, ResolvedFiles,
    copy_into, normalize_version,
};
use crate::models::{
    Game, Instance, InstanceInfo, Metadata, Mod, ModKind, ModSource, Tool, VortexProfileInfo,
    generate_id,
};
use crate::services::filesystem::{self, MergeStats};
use camino::{Utf8Path, Utf8PathBuf};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

const MANAGER_NAME: &str = "Vortex";
const DEPLOYMENT_MANIFEST: &str = "vortex.deployment.msgpack";
const DEFAULT_MODNAME_LIMIT: usize = 100;

/// Adapter for Vortex profiles.
#[derive(Debug)]
pub struct Vortex {
    appdata: Utf8PathBuf,
    db: VortexDatabase,
    modname_limit: usize,
    backed_up: AtomicBool,
}

impl Vortex {
    /// # Arguments
    /// * `appdata` - Vortex's application data folder (`%APPDATA%/Vortex`)
    /// * `store` - State database, normally a [`LevelDbStore`] on `<appdata>/state.v2`
    pub fn new(appdata: impl Into<Utf8PathBuf>, store: Arc<dyn StateStore>) -> Self {
        Self {
            appdata: appdata.into(),
            db: VortexDatabase::new(store),
            modname_limit: DEFAULT_MODNAME_LIMIT,
            backed_up: AtomicBool::new(false),
        }
    }

    /// Adapter for the on-disk database below `appdata`.
    pub fn open(appdata: impl Into<Utf8PathBuf>) -> Self {
        let appdata = appdata.into();
        let store = Arc::new(LevelDbStore::new(appdata.join("state.v2")));
        Self::new(appdata, store)
    }

    /// Default application data folder: `<roaming app data>/Vortex`.
    pub fn default_appdata() -> Result<Utf8PathBuf, ManagerError> {
        dirs::config_dir()
            .and_then(|d| Utf8PathBuf::from_path_buf(d).ok())
            .map(|d| d.join("Vortex"))
            .ok_or_else(|| ManagerError::Environment("roaming application data folder".to_string()))
    }

    /// Maximum length of display names read from the database.
    pub fn with_modname_limit(mut self, limit: usize) -> Self {
        self.modname_limit = limit.max(1);
        self
    }

    pub fn appdata(&self) -> &Utf8Path {
        &self.appdata
    }

    pub fn database(&self) -> &VortexDatabase {
        &self.db
    }

    /// Profiles of `game` stored in the database.
    pub fn profiles(&self, game: &Game) -> Result<Vec<VortexProfileInfo>, ManagerError> {
        if !self.db.exists() {
            tracing::debug!("No Vortex database below {}", self.appdata);
            return Ok(Vec::new());
        }
        let profiles = self.db.load_tree(&["persistent", "profiles"])?;
        Ok(profiles
            .iter()
            .filter(|(_, data)| {
                data.get("gameId")
                    .and_then(Value::as_str)
                    .is_some_and(|id| id.eq_ignore_ascii_case(&game.id))
            })
            .map(|(id, data)| {
                let name = data.get("name").and_then(Value::as_str).unwrap_or(id.as_str());
                VortexProfileInfo::new(name, game.clone(), id.as_str())
            })
            .collect())
    }

    /// Staging folder of `game`, with `{USERDATA}` and `{GAME}` expanded.
    pub fn staging_folder(&self, game: &Game) -> Result<Utf8PathBuf, ManagerError> {
        let game_id = game.id.to_lowercase();
        let configured = self
            .db
            .get(&["settings", "mods", "installPath", &game_id])?
            .and_then(|v| v.as_str().map(str::to_string));
        Ok(match configured {
            Some(path) => Utf8PathBuf::from(
                path.replace("{USERDATA}", self.appdata.as_str())
                    .replace("{userdata}", self.appdata.as_str())
                    .replace("{GAME}", &game_id)
                    .replace("{game}", &game_id)
                    .replace('\\', "/"),
            ),
            None => self.appdata.join(&game_id).join("mods"),
        })
    }

    /// Whether Vortex currently has mods deployed for `game`.
    pub fn is_deployed(&self, game: &Game) -> Result<bool, ManagerError> {
        Ok(self.staging_folder(game)?.join(DEPLOYMENT_MANIFEST).is_file())
    }

    fn profile_folder(&self, info: &VortexProfileInfo) -> Utf8PathBuf {
        self.appdata
            .join(info.game.id.to_lowercase())
            .join("profiles")
            .join(&info.id)
    }

    fn info<'a>(&self, info: &'a InstanceInfo) -> Result<&'a VortexProfileInfo, ManagerError> {
        match info {
            InstanceInfo::Vortex(info) => Ok(info),
            other => Err(ManagerError::WrongInstanceKind {
                manager: MANAGER_NAME.to_string(),
                got: other.variant_name().to_string(),
            }),
        }
    }

    fn game_path(&self, game: &Game) -> Result<Option<Utf8PathBuf>, ManagerError> {
        Ok(self
            .db
            .get(&["settings", "gameMode", "discovered", &game.id.to_lowercase(), "path"])?
            .and_then(|v| v.as_str().map(Utf8PathBuf::from)))
    }

    /// Copy the database folder once, before the first write of this adapter.
    fn ensure_backup(&self) -> Result<(), ManagerError> {
        if self.backed_up.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let Some(location) = self.db.store().location() else {
            return Ok(());
        };
        let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
        let backup = Utf8PathBuf::from(format!("{}.{}.bak", location, stamp));
        let copied = filesystem::copy_tree(location, &backup)?;
        tracing::info!("Backed up Vortex database ({} files) to {}", copied, backup);
        Ok(())
    }

    fn load_mods(&self, info: &VortexProfileInfo) -> Result<Vec<Mod>, ManagerError> {
        let game_id = info.game.id.to_lowercase();
        let profile = self.db.load_tree(&["persistent", "profiles", &info.id])?;
        let mod_state = profile
            .get("modState")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let installed = self.db.load_tree(&["persistent", "mods", &game_id])?;
        let staging = self.staging_folder(&info.game)?;

        let mut mods = Vec::new();
        let mut ids = Vec::new();
        let mut rules: Vec<(usize, Vec<Value>)> = Vec::new();
        for (mod_id, state) in &mod_state {
            let Some(data) = installed.get(mod_id) else {
                tracing::warn!("Skipping '{}': not installed", mod_id);
                continue;
            };
            let attributes = data.get("attributes").cloned().unwrap_or(Value::Null);
            let attr = |key: &str| non_empty_str(&attributes, key);

            let deploy_path = match data.get("type").and_then(Value::as_str) {
                Some("collection") => continue,
                Some(kind) if !kind.is_empty() => Some(Utf8PathBuf::from(".")),
                _ => None,
            };

            let raw_name = attr("customFileName")
                .or_else(|| attr("logicalFileName"))
                .or_else(|| attr("modName"))
                .unwrap_or(mod_id.as_str());
            let display_name = filesystem::clamp_name(raw_name, self.modname_limit)
                .trim_matches(['-', '_', '.', ' '])
                .to_string();

            let folder = staging.join(
                data.get("installationPath")
                    .and_then(Value::as_str)
                    .unwrap_or(mod_id.as_str()),
            );
            if !folder.is_dir() {
                tracing::warn!("Skipping '{}': {} does not exist", display_name, folder);
                continue;
            }

            let download_game = attr("downloadGame");
            let metadata = Metadata {
                mod_id: json_u64(attributes.get("modId")),
                file_id: json_u64(attributes.get("fileId")),
                version: normalize_version(attr("version").unwrap_or_default()),
                file_name: attr("fileName").map(str::to_string),
                game_id: download_game
                    .and_then(Game::by_id)
                    .map(|g| g.id.clone())
                    .unwrap_or_else(|| {
                        if let Some(other) = download_game {
                            tracing::warn!("Unknown download game '{}' for '{}'", other, display_name);
                        }
                        info.game.id.clone()
                    }),
            };

            let enabled = state.get("enabled").and_then(Value::as_bool).unwrap_or(false);
            let mut m = Mod::new(display_name, ModSource::Folder(folder))
                .with_enabled(enabled)
                .with_metadata(metadata);
            m.deploy_path = deploy_path;

            if let Some(mod_rules) = data.get("rules").and_then(Value::as_array) {
                rules.push((mods.len(), mod_rules.clone()));
            }
            ids.push(mod_id.clone());
            mods.push(m);
        }

        apply_rules(&mut mods, &ids, &rules);
        Ok(mods)
    }

    fn load_tools(&self, game: &Game) -> Result<Vec<Tool>, ManagerError> {
        let game_id = game.id.to_lowercase();
        let tools = self
            .db
            .load_tree(&["settings", "gameMode", "discovered", &game_id, "tools"])?;

        Ok(tools
            .iter()
            .filter_map(|(id, data)| {
                let name = data.get("name").and_then(Value::as_str);
                let path = data.get("path").and_then(Value::as_str);
                let (Some(name), Some(path)) = (name, path) else {
                    tracing::warn!("Skipping incomplete tool entry '{}'", id);
                    return None;
                };
                let mut tool = Tool::new(name, path);
                tool.arguments = data
                    .get("parameters")
                    .and_then(Value::as_array)
                    .map(|args| args.iter().filter_map(Value::as_str).map(str::to_string).collect())
                    .unwrap_or_default();
                tool.working_dir = data
                    .get("workingDirectory")
                    .and_then(Value::as_str)
                    .filter(|d| !d.is_empty())
                    .map(Utf8PathBuf::from);
                Some(tool)
            })
            .collect())
    }

    fn write_rules(&self, instance: &Instance, game_id: &str) -> Result<(), ManagerError> {
        let ids: HashMap<&str, String> = instance
            .mods
            .iter()
            .filter_map(|m| Some((m.display_name.as_str(), vortex_id(m)?)))
            .collect();

        for m in instance.mods.iter().filter(|m| !m.mod_conflicts.is_empty()) {
            let Some(id) = ids.get(m.display_name.as_str()) else {
                continue;
            };
            let path = ["persistent", "mods", game_id, id.as_str(), "rules"];
            let mut rules = self
                .db
                .get(&path)?
                .and_then(|v| v.as_array().cloned())
                .unwrap_or_default();
            let before = rules.len();

            for overwriting in &m.mod_conflicts {
                let Some(reference) = ids.get(overwriting.as_str()) else {
                    continue;
                };
                let exists = rules.iter().any(|rule| {
                    rule.pointer("/reference/id").and_then(Value::as_str) == Some(reference.as_str())
                });
                if !exists {
                    rules.push(json!({
                        "reference": {"id": reference, "idHint": reference, "versionMatch": "*"},
                        "type": "before",
                    }));
                }
            }

            if rules.len() != before {
                tracing::debug!("Added {} rule(s) for '{}'", rules.len() - before, m.display_name);
                self.db.set(&path, &Value::Array(rules))?;
            }
        }
        Ok(())
    }

    /// Unique file name of a mod without extension, used as its Vortex id and folder name.
    pub fn unique_file_name(m: &Mod) -> String {
        match &m.metadata.file_name {
            Some(file_name) => strip_extension(file_name).to_string(),
            None => Self::create_unique_file_name(
                &m.display_name,
                m.metadata.mod_id,
                m.metadata.file_id,
                &m.metadata.version,
            ),
        }
    }

    /// `name-modid-fileid-version`, leaving out missing parts.
    pub fn create_unique_file_name(
        name: &str,
        mod_id: Option<u64>,
        file_id: Option<u64>,
        version: &str,
    ) -> String {
        let mut file_name = filesystem::clean_fs_string(name);
        if let Some(mod_id) = mod_id.filter(|id| *id > 0) {
            file_name.push_str(&format!("-{}", mod_id));
        }
        if let Some(file_id) = file_id.filter(|id| *id > 0) {
            file_name.push_str(&format!("-{}", file_id));
        }
        if !version.is_empty() {
            file_name.push_str(&format!("-{}", version));
        }
        filesystem::clean_fs_string(&file_name)
    }

    /// Strip the Nexus `-<mod id>-...` suffix from a download's file name.
    pub fn logical_file_name(full_file_name: &str, mod_id: u64) -> String {
        let stem = strip_extension(full_file_name);
        let marker = format!("-{}-", mod_id);
        match stem.find(&marker) {
            Some(index) => stem[..index].to_string(),
            None => stem.to_string(),
        }
    }
}

impl ModManager for Vortex {
    fn id(&self) -> &'static str {
        "vortex"
    }

    fn display_name(&self) -> &'static str {
        MANAGER_NAME
    }

    fn detect_instances(&self, game: &Game) -> Result<Vec<InstanceInfo>, ManagerError> {
        let profiles = self.profiles(game)?;
        tracing::info!("Found {} Vortex profile(s) for {}", profiles.len(), game.id);
        Ok(profiles.into_iter().map(InstanceInfo::Vortex).collect())
    }

    fn load_instance(&self, info: &InstanceInfo) -> Result<Instance, ManagerError> {
        let info = self.info(info)?;
        if !self.profiles(&info.game)?.iter().any(|p| p.id == info.id) {
            return Err(ManagerError::InstanceNotFound {
                name: format!("{} ({})", info.name, info.id),
            });
        }
        let game_folder = self.game_path(&info.game)?.ok_or_else(|| {
            ManagerError::Other(format!("Vortex has not discovered {}", info.game.display_name))
        })?;

        tracing::info!("Loading Vortex profile '{}' ({})", info.name, info.id);
        let mut instance = Instance::new(
            &info.name,
            self.staging_folder(&info.game)?,
            game_folder,
            &info.name,
        );
        instance.order_matters = false;
        instance.mods = self.load_mods(info)?;
        instance.tools = self.load_tools(&info.game)?;

        let features = self
            .db
            .load_tree(&["persistent", "profiles", &info.id, "features"])?;
        let feature = |key: &str| features.get(key).and_then(Value::as_bool).unwrap_or(false);
        instance.separate_ini_files = feature("local_game_settings");
        instance.separate_save_games = feature("local_saves");

        tracing::info!(
            "Loaded {} mods and {} tools from '{}'",
            instance.mods.len(),
            instance.tools.len(),
            info.name
        );
        Ok(instance)
    }

    fn instance_exists(&self, info: &InstanceInfo) -> bool {
        let Ok(info) = self.info(info) else {
            return false;
        };
        self.profiles(&info.game)
            .is_ok_and(|profiles| profiles.iter().any(|p| p.id == info.id))
    }

    fn run_preflight_checks(
        &self,
        info: &InstanceInfo,
        role: MigrationRole,
        source: &Instance,
    ) -> Result<(), PreflightError> {
        let InstanceInfo::Vortex(info) = info else {
            return Ok(());
        };
        let not_set_up = |reason: String| PreflightError::NotFullySetup {
            manager: MANAGER_NAME.to_string(),
            reason,
        };

        if self.db.is_locked() {
            return Err(PreflightError::DatabaseLocked {
                manager: MANAGER_NAME.to_string(),
            });
        }
        let staging = self
            .staging_folder(&info.game)
            .map_err(|e| not_set_up(e.to_string()))?;
        if staging.join(DEPLOYMENT_MANIFEST).is_file() {
            return Err(PreflightError::StillDeployed {
                manager: MANAGER_NAME.to_string(),
                path: staging,
            });
        }
        if role == MigrationRole::Source {
            return Ok(());
        }

        let game_id = info.game.id.to_lowercase();
        if !self.appdata.join(&game_id).is_dir() {
            return Err(not_set_up(format!("{} has never been managed", info.game.display_name)));
        }
        match self.game_path(&info.game) {
            Ok(Some(_)) => {}
            Ok(None) => {
                return Err(not_set_up(format!("{} has not been discovered", info.game.display_name)));
            }
            Err(e) => return Err(not_set_up(e.to_string())),
        }
        let profiles_visible = self
            .db
            .get(&["settings", "interface", "profilesVisible"])
            .ok()
            .flatten()
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !profiles_visible {
            return Err(not_set_up("profile management is disabled".to_string()));
        }

        if let Some(overwrite) = source
            .enabled_mods()
            .find(|m| m.kind == ModKind::Overwrite)
        {
            return Err(PreflightError::UnsupportedModKind {
                mod_name: overwrite.display_name.clone(),
                kind: overwrite.kind.as_str().to_string(),
                manager: MANAGER_NAME.to_string(),
            });
        }
        Ok(())
    }

    fn destination_mods_path(&self, info: &InstanceInfo) -> Result<Utf8PathBuf, ManagerError> {
        self.staging_folder(&self.info(info)?.game)
    }

    fn create_instance(
        &self,
        info: &InstanceInfo,
        game_folder: &Utf8Path,
    ) -> Result<Instance, ManagerError> {
        let info = self.info(info)?;
        self.ensure_backup()?;
        tracing::info!("Creating Vortex profile '{}' with id {}", info.name, info.id);

        let profile = json!({
            "features": {
                "local_game_settings": false,
                "local_saves": false,
            },
            "gameId": info.game.id.to_lowercase(),
            "id": info.id,
            "lastActivated": chrono::Utc::now().timestamp_millis(),
            "name": info.name,
        });
        self.db.dump(&["persistent", "profiles", &info.id], &profile)?;

        let folder = self.profile_folder(info);
        fs::create_dir_all(&folder).map_err(|e| ManagerError::io(&folder, e))?;

        let mut instance = Instance::new(
            &info.name,
            self.staging_folder(&info.game)?,
            game_folder,
            &info.name,
        );
        instance.order_matters = false;
        instance.tools = self.load_tools(&info.game)?;
        Ok(instance)
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
            ModKind::Separator => {
                tracing::info!("Skipping separator '{}'", source_mod.display_name);
                return Ok(MergeStats::default());
            }
            ModKind::Overwrite => {
                return Err(ManagerError::Other(format!(
                    "{} cannot hold files outside a mod",
                    MANAGER_NAME
                )));
            }
            ModKind::Regular => {}
        }
        self.ensure_backup()?;

        let game_id = info.game.id.to_lowercase();
        let id = filesystem::mod_folder_name(&Self::unique_file_name(source_mod), options.modname_limit);
        let mod_folder = self.staging_folder(&info.game)?.join(&id);

        let entry_path = ["persistent", "mods", game_id.as_str(), id.as_str()];
        if self.db.load_tree(&entry_path)?.is_empty() {
            let meta = &source_mod.metadata;
            let full_file_name = meta.file_name.clone().unwrap_or_else(|| id.clone());
            let source = if meta.mod_id.is_some() { "nexus" } else { "other" };
            let mod_type = if source_mod.deploy_path.is_some() { "dinput" } else { "" };
            let entry = json!({
                "attributes": {
                    "customFileName": source_mod.display_name,
                    "downloadGame": meta.game_id.to_lowercase(),
                    "installTime": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                    "fileName": full_file_name,
                    "fileId": meta.file_id,
                    "modId": meta.mod_id,
                    "logicalFileName": Self::logical_file_name(&full_file_name, meta.mod_id.unwrap_or(0)),
                    "version": meta.version,
                    "source": source,
                },
                "id": id,
                "installationPath": id,
                "state": "installed",
                "type": mod_type,
            });
            self.db.dump(&entry_path, &entry)?;
        } else {
            tracing::info!("'{}' already registered as {}", source_mod.display_name, id);
        }

        tracing::info!("Installing '{}' into {}", source_mod.display_name, mod_folder);
        fs::create_dir_all(&mod_folder).map_err(|e| ManagerError::io(&mod_folder, e))?;
        let stats = filesystem::merge_files(
            &files.root,
            &files.files,
            &mod_folder,
            &options.merge,
            merge.blacklist,
            &merge.progress,
            &merge.cancel,
        )?;

        if !instance.mods.iter().any(|m| vortex_id(m).as_deref() == Some(id.as_str())) {
            let mut installed = Mod::new(&source_mod.display_name, ModSource::Folder(mod_folder))
                .with_enabled(source_mod.enabled)
                .with_metadata(source_mod.metadata.clone());
            installed.deploy_path = source_mod.deploy_path.clone();
            installed.mod_conflicts = source_mod.mod_conflicts.clone();
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
        if instance.tools.iter().any(|t| t.display_name == tool.display_name) {
            tracing::info!("Tool '{}' already registered", tool.display_name);
            return Ok(());
        }
        self.ensure_backup()?;

        let tool_id = generate_id(15);
        let executable = if tool.executable.is_absolute() {
            tool.executable.clone()
        } else {
            instance.game_folder.join(&tool.executable)
        };
        let data = json!({
            "custom": true,
            "defaultPrimary": false,
            "detach": true,
            "exclusive": false,
            "id": tool_id,
            "logo": format!("{}.png", tool_id),
            "name": tool.display_name,
            "parameters": tool.arguments,
            "path": executable.as_str(),
            "requiredFiles": [],
            "shell": false,
            "timestamp": chrono::Utc::now().timestamp(),
            "workingDirectory": tool.working_dir.as_ref().map(|d| d.as_str()).unwrap_or(""),
        });
        let game_id = info.game.id.to_lowercase();
        self.db.dump(
            &["settings", "gameMode", "discovered", &game_id, "tools", &tool_id],
            &data,
        )?;
        tracing::info!("Registered tool '{}' as {}", tool.display_name, tool_id);

        instance.tools.push(tool.clone());
        Ok(())
    }

    fn additional_files(&self, info: &InstanceInfo) -> Vec<Utf8PathBuf> {
        let Ok(info) = self.info(info) else {
            return Vec::new();
        };
        let folder = self.profile_folder(info);
        info.game
            .additional_files
            .iter()
            .map(|name| folder.join(name))
            .filter(|path| path.is_file())
            .collect()
    }

    fn migrate_additional_file(
        &self,
        file: &Utf8Path,
        info: &InstanceInfo,
    ) -> Result<(), ManagerError> {
        let info = self.info(info)?;
        copy_into(file, &self.profile_folder(info))?;
        Ok(())
    }

    fn ini_folder(&self, info: &InstanceInfo) -> Option<Utf8PathBuf> {
        self.info(info).ok().map(|info| self.profile_folder(info))
    }

    fn finalize(
        &self,
        instance: &Instance,
        info: &InstanceInfo,
        options: &FinalizeOptions,
    ) -> Result<(), ManagerError> {
        let info = self.info(info)?;
        self.ensure_backup()?;
        let game_id = info.game.id.to_lowercase();

        let existing_state = self
            .db
            .load_tree(&["persistent", "profiles", &info.id, "modState"])?;
        let now = chrono::Utc::now().timestamp_millis();
        let mut mod_state = Map::new();
        for m in instance.mods.iter().filter(|m| m.kind == ModKind::Regular) {
            let Some(id) = vortex_id(m) else {
                continue;
            };
            let mut state = Map::new();
            state.insert("enabled".to_string(), Value::Bool(m.enabled));
            if !existing_state.get(&id).is_some_and(|s| s.get("enabledTime").is_some()) {
                state.insert("enabledTime".to_string(), json!(now));
            }
            mod_state.insert(id, Value::Object(state));
        }

        let profile = json!({
            "features": {
                "local_game_settings": instance.separate_ini_files,
                "local_saves": instance.separate_save_games,
            },
            "modState": mod_state,
            "lastActivated": now,
        });
        self.db.dump(&["persistent", "profiles", &info.id], &profile)?;
        self.write_rules(instance, &game_id)?;

        if options.activate {
            let id = Value::String(info.id.clone());
            self.db.set(&["settings", "profiles", "activeProfileId"], &id)?;
            self.db
                .set(&["settings", "profiles", "lastActiveProfile", &game_id], &id)?;
            tracing::info!("Activated Vortex profile '{}'", info.name);
        }
        Ok(())
    }

    fn completed_message(&self, info: &InstanceInfo) -> String {
        let Ok(info) = self.info(info) else {
            return format!("Migration to {} completed.", MANAGER_NAME);
        };
        let mut message = format!(
            "Migration to Vortex profile '{}' completed. Deploy the profile in Vortex to apply the mods.",
            info.name
        );
        if self.is_deployed(&info.game).unwrap_or(false) {
            message.push_str(
                "\nVortex is currently deployed to the game folder; purge it before using the migrated profile.",
            );
        }
        message
    }
}

/// Vortex id of a mod: the name of its staging subfolder.
fn vortex_id(m: &Mod) -> Option<String> {
    m.source.path().file_name().map(str::to_string)
}

/// Turn `before`/`after` rules into overwrite lists.
///
/// A `before` rule on X referencing R means R overwrites X; `after` is the reverse.
fn apply_rules(mods: &mut [Mod], ids: &[String], rules: &[(usize, Vec<Value>)]) {
    let mut by_reference: HashMap<String, usize> = HashMap::new();
    for (index, m) in mods.iter().enumerate() {
        by_reference.insert(ids[index].clone(), index);
        by_reference.insert(Vortex::unique_file_name(m), index);
    }

    for (index, mod_rules) in rules {
        for rule in mod_rules {
            let reference = rule
                .pointer("/reference/id")
                .or_else(|| rule.pointer("/reference/fileExpression"))
                .and_then(Value::as_str);
            let Some(&other) = reference.and_then(|r| by_reference.get(r)) else {
                continue;
            };
            let (overwritten, overwriting) = match rule.get("type").and_then(Value::as_str) {
                Some("before") => (*index, other),
                Some("after") => (other, *index),
                other_type => {
                    tracing::warn!(
                        "Ignoring rule of type {:?} on '{}'",
                        other_type,
                        mods[*index].display_name
                    );
                    continue;
                }
            };
            let name = mods[overwriting].display_name.clone();
            if overwritten != overwriting && !mods[overwritten].mod_conflicts.contains(&name) {
                mods[overwritten].mod_conflicts.push(name);
            }
        }
    }
}

fn non_empty_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn strip_extension(file_name: &str) -> &str {
    file_name.rsplit_once('.').map_or(file_name, |(stem, _)| stem)
}

fn json_u64(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .filter(|id| *id > 0)
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

    /// Vortex with a discovered game and one profile holding two mods.
    fn fixture(appdata: &Utf8Path) -> (Arc<MemoryStore>, Vortex) {
        let store = Arc::new(MemoryStore::new());
        let vortex = Vortex::new(appdata, store.clone());
        let db = vortex.database();

        db.dump(
            &["persistent", "profiles", "prof1"],
            &json!({"name": "Main", "gameId": "skyrimse", "features": {"local_saves": true},
                    "modState": {"SkyUI-12604-5-2": {"enabled": true}, "Patch-1-2": {"enabled": false}}}),
        )
        .unwrap();
        db.dump(
            &["persistent", "profiles", "other"],
            &json!({"name": "Fallout", "gameId": "fallout4"}),
        )
        .unwrap();
        db.dump(
            &["persistent", "mods", "skyrimse", "SkyUI-12604-5-2"],
            &json!({"attributes": {"logicalFileName": "SkyUI", "modId": 12604, "fileId": "35407", "version": "5.2.0.0", "fileName": "SkyUI-12604-5-2.7z"},
                    "installationPath": "SkyUI-12604-5-2", "type": "",
                    "rules": [{"reference": {"id": "Patch-1-2"}, "type": "before"}]}),
        )
        .unwrap();
        db.dump(
            &["persistent", "mods", "skyrimse", "Patch-1-2"],
            &json!({"attributes": {"customFileName": "--Patch--"}, "installationPath": "Patch-1-2", "type": "dinput"}),
        )
        .unwrap();
        db.set(
            &["settings", "gameMode", "discovered", "skyrimse", "path"],
            &json!("/games/Skyrim"),
        )
        .unwrap();
        db.set(&["settings", "interface", "profilesVisible"], &json!(true))
            .unwrap();
        db.dump(
            &["settings", "gameMode", "discovered", "skyrimse", "tools", "t1"],
            &json!({"name": "SSEEdit", "path": "/tools/SSEEdit.exe", "parameters": ["-autoload"], "workingDirectory": ""}),
        )
        .unwrap();

        let staging = appdata.join("skyrimse/mods");
        for id in ["SkyUI-12604-5-2", "Patch-1-2"] {
            fs::create_dir_all(staging.join(id)).unwrap();
            fs::write(staging.join(id).join("file.esp"), id).unwrap();
        }
        (store, vortex)
    }

    fn profile_info(id: &str) -> InstanceInfo {
        InstanceInfo::Vortex(VortexProfileInfo::new("Main", sse(), id))
    }

    #[test]
    fn test_detects_profiles_of_game() {
        let dir = TempDir::new().unwrap();
        let (_, vortex) = fixture(&utf8(&dir));
        let found = vortex.detect_instances(&sse()).unwrap();
        assert_eq!(found, vec![profile_info("prof1")]);
    }

    #[test]
    fn test_load_instance() {
        let dir = TempDir::new().unwrap();
        let (_, vortex) = fixture(&utf8(&dir));
        let instance = vortex.load_instance(&profile_info("prof1")).unwrap();

        assert!(!instance.order_matters);
        assert_eq!(instance.game_folder, Utf8PathBuf::from("/games/Skyrim"));
        assert!(instance.separate_save_games);
        assert_eq!(instance.mods.len(), 2);

        let skyui = instance.mod_by_name("SkyUI").unwrap();
        assert!(skyui.enabled);
        assert_eq!(skyui.metadata.mod_id, Some(12604));
        assert_eq!(skyui.metadata.file_id, Some(35407));
        assert_eq!(skyui.metadata.version, "5.2");
        assert_eq!(skyui.mod_conflicts, vec!["Patch".to_string()]);

        let patch = instance.mod_by_name("Patch").unwrap();
        assert!(!patch.enabled);
        assert!(patch.is_root_mod());

        assert_eq!(instance.tools.len(), 1);
        assert_eq!(instance.tools[0].arguments, vec!["-autoload"]);
    }

    #[test]
    fn test_unknown_profile_is_not_found() {
        let dir = TempDir::new().unwrap();
        let (_, vortex) = fixture(&utf8(&dir));
        let err = vortex.load_instance(&profile_info("missing")).unwrap_err();
        assert!(matches!(err, ManagerError::InstanceNotFound { .. }));
    }

    #[test]
    fn test_preflight_rejects_locked_and_deployed() {
        let dir = TempDir::new().unwrap();
        let appdata = utf8(&dir);
        let (store, vortex) = fixture(&appdata);
        let source = Instance::new("src", "/src", "/games/Skyrim", "Default");

        store.set_locked(true);
        let err = vortex
            .run_preflight_checks(&profile_info("prof1"), MigrationRole::Source, &source)
            .unwrap_err();
        assert!(matches!(err, PreflightError::DatabaseLocked { .. }));
        store.set_locked(false);

        fs::write(appdata.join("skyrimse/mods").join(DEPLOYMENT_MANIFEST), "").unwrap();
        let err = vortex
            .run_preflight_checks(&profile_info("prof1"), MigrationRole::Destination, &source)
            .unwrap_err();
        assert!(matches!(err, PreflightError::StillDeployed { .. }));
    }

    #[test]
    fn test_destination_preflight_requires_setup() {
        let dir = TempDir::new().unwrap();
        let appdata = utf8(&dir);
        let (_, vortex) = fixture(&appdata);
        let source = Instance::new("src", "/src", "/games/Skyrim", "Default");
        let dst = profile_info("newprofile");

        assert!(vortex.run_preflight_checks(&dst, MigrationRole::Destination, &source).is_ok());

        vortex
            .database()
            .set(&["settings", "interface", "profilesVisible"], &json!(false))
            .unwrap();
        let err = vortex
            .run_preflight_checks(&dst, MigrationRole::Destination, &source)
            .unwrap_err();
        assert!(matches!(err, PreflightError::NotFullySetup { .. }));
    }

    #[test]
    fn test_enabled_overwrite_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let (_, vortex) = fixture(&utf8(&dir));
        let mut source = Instance::new("src", "/src", "/games/Skyrim", "Default");
        source.mods.push(
            Mod::new("Overwrite", ModSource::Folder(Utf8PathBuf::from("/src/overwrite")))
                .with_kind(ModKind::Overwrite),
        );
        let err = vortex
            .run_preflight_checks(&profile_info("new"), MigrationRole::Destination, &source)
            .unwrap_err();
        assert!(matches!(err, PreflightError::UnsupportedModKind { .. }));
    }

    #[test]
    fn test_create_install_finalize() {
        let dir = TempDir::new().unwrap();
        let appdata = utf8(&dir);
        let (store, vortex) = fixture(&appdata);
        let info = profile_info("newprof");

        let mut instance = vortex
            .create_instance(&info, Utf8Path::new("/games/Skyrim"))
            .unwrap();
        assert!(vortex.instance_exists(&info));
        assert!(appdata.join("skyrimse/profiles/newprof").is_dir());

        let src = appdata.join("source/USSEP");
        fs::create_dir_all(src.join("meshes")).unwrap();
        fs::write(src.join("meshes/a.nif"), "nif").unwrap();
        fs::write(src.join("meta.ini"), "[General]").unwrap();
        let mut source_mod = Mod::new("USSEP", ModSource::Folder(src.clone()));
        source_mod.metadata.mod_id = Some(266);
        source_mod.metadata.file_id = Some(1000);
        source_mod.metadata.version = "4.2".to_string();
        source_mod.mod_conflicts = vec!["Missing".to_string()];

        let files = ResolvedFiles {
            root: src.clone(),
            files: vec![Utf8PathBuf::from("meshes/a.nif"), Utf8PathBuf::from("meta.ini")],
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
        vortex
            .install_mod(&source_mod, &files, &mut instance, &info, &options, &merge)
            .unwrap();
        let separator = Mod::new("Section", ModSource::Folder(src.clone())).with_kind(ModKind::Separator);
        vortex
            .install_mod(&separator, &files, &mut instance, &info, &options, &merge)
            .unwrap();

        let folder = appdata.join("skyrimse/mods/USSEP-266-1000-4.2");
        assert!(folder.join("meshes/a.nif").is_file());
        assert!(!folder.join("meta.ini").exists());
        assert_eq!(instance.mods.len(), 1);

        vortex
            .finalize(&instance, &info, &FinalizeOptions { activate: true })
            .unwrap();
        let entries = store.snapshot();
        assert_eq!(
            entries.get("persistent###profiles###newprof###modState###USSEP-266-1000-4.2###enabled"),
            Some(&"true".to_string())
        );
        assert_eq!(
            entries.get("persistent###mods###skyrimse###USSEP-266-1000-4.2###attributes###modId"),
            Some(&"266".to_string())
        );
        assert_eq!(
            entries.get("settings###profiles###activeProfileId"),
            Some(&"\"newprof\"".to_string())
        );

        let reloaded = vortex.load_instance(&info).unwrap();
        assert_eq!(reloaded.mods.len(), 1);
        assert_eq!(reloaded.mods[0].display_name, "USSEP");
    }

    #[test]
    fn test_add_tool_writes_discovered_entry() {
        let dir = TempDir::new().unwrap();
        let (_, vortex) = fixture(&utf8(&dir));
        let info = profile_info("prof1");
        let mut instance = vortex.load_instance(&info).unwrap();

        let mut tool = Tool::new("LOOT", "/tools/loot.exe");
        tool.arguments = vec!["--game".to_string(), "Skyrim Special Edition".to_string()];
        vortex.add_tool(&tool, &mut instance, &info).unwrap();
        vortex.add_tool(&tool, &mut instance, &info).unwrap();

        let tools = vortex.load_tools(&sse()).unwrap();
        assert_eq!(tools.len(), 2);
        let loot = tools.iter().find(|t| t.display_name == "LOOT").unwrap();
        assert_eq!(loot.arguments, tool.arguments);
    }

    #[test]
    fn test_staging_folder_placeholders() {
        let dir = TempDir::new().unwrap();
        let appdata = utf8(&dir);
        let (_, vortex) = fixture(&appdata);
        assert_eq!(vortex.staging_folder(&sse()).unwrap(), appdata.join("skyrimse/mods"));

        vortex
            .database()
            .set(&["settings", "mods", "installPath", "skyrimse"], &json!("{USERDATA}\\{GAME}\\staging"))
            .unwrap();
        assert_eq!(
            vortex.staging_folder(&sse()).unwrap(),
            Utf8PathBuf::from(format!("{}/skyrimse/staging", appdata))
        );
    }

    #[test]
    fn test_file_name_helpers() {
        assert_eq!(
            Vortex::create_unique_file_name("Sky: UI", Some(12604), Some(35407), "5.2"),
            "Sky UI-12604-35407-5.2"
        );
        assert_eq!(Vortex::create_unique_file_name("Plain", None, None, ""), "Plain");
        assert_eq!(
            Vortex::logical_file_name("SSE Engine Fixes-17230-5-9-1-1664974289.7z", 17230),
            "SSE Engine Fixes"
        );
    }
}
