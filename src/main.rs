//! modmigrator - command-line front end.
//!
//! # Overview
//!
//! Thin caller of the library: it loads configuration, sets up logging, resolves instance
//! descriptors from command-line arguments and runs a migration on the worker thread while
//! printing the progress events of a [`StateManager`].
//!
//! # Commands
//!
//! - `detect`: list the instances a mod manager knows for a game
//! - `show`: print the mods (in load order) and tools of one instance
//! - `migrate`: copy an instance into another mod manager (or another instance)
//!
//! Ctrl+C during `migrate` requests cancellation; the run stops after the current file
//! and still writes the destination's load order for what was installed.

use anyhow::{Context, Result, anyhow, bail};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand, ValueEnum};
use modmigrator::managers::ModManager;
use modmigrator::models::{InstanceInfo, Mo2InstanceInfo, VortexProfileInfo};
use modmigrator::services::{ModOutcome, spawn_migration};
use modmigrator::{
    APP_NAME, AppContext, ConfigManager, Game, MigrationError, MigrationReport, MigrationRequest,
    ModOrganizer, StateChange, StateManager, VERSION, Vortex,
};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

#[derive(Parser, Debug)]
#[command(name = "modmigrator", version, about = "Migrate mod manager instances between Mod Organizer 2 and Vortex")]
struct Cli {
    /// Directory holding modmigrator.yaml
    #[arg(long, global = true)]
    config_dir: Option<String>,

    /// Log at debug level
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List instances of a mod manager for a game
    Detect {
        #[arg(long, value_enum)]
        manager: ManagerKind,
        #[arg(long)]
        game: String,
    },

    /// Print the mods and tools of an instance
    Show {
        #[arg(long, value_enum)]
        manager: ManagerKind,
        #[arg(long)]
        game: String,
        /// Instance name, folder or Vortex profile id
        #[arg(long)]
        instance: String,
        #[arg(long)]
        profile: Option<String>,
    },

    /// Migrate an instance into another mod manager
    Migrate(MigrateArgs),
}

#[derive(Args, Debug)]
struct MigrateArgs {
    #[arg(long)]
    game: String,

    #[arg(long, value_enum)]
    from: ManagerKind,

    /// Source instance name, folder or Vortex profile id
    #[arg(long)]
    source: String,

    /// Source profile (MO2 only)
    #[arg(long)]
    profile: Option<String>,

    #[arg(long, value_enum)]
    to: ManagerKind,

    /// Destination instance name, folder or Vortex profile name
    #[arg(long)]
    target: String,

    /// Create the destination as a global MO2 instance
    #[arg(long)]
    global: bool,

    /// Copy every file instead of trying hardlinks first
    #[arg(long)]
    no_hardlinks: bool,

    /// Overwrite files that already exist in the destination
    #[arg(long)]
    replace: bool,

    #[arg(long)]
    modname_limit: Option<usize>,

    /// Do not make the destination the active instance
    #[arg(long)]
    no_activate: bool,

    #[arg(long)]
    skip_tools: bool,

    /// Disable a mod of the source before migrating (repeatable)
    #[arg(long = "disable", value_name = "MOD")]
    disabled: Vec<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ManagerKind {
    Mo2,
    Vortex,
}

/// Concrete adapter for a command-line manager choice.
enum Adapter {
    ModOrganizer(Arc<ModOrganizer>),
    Vortex(Arc<Vortex>),
}

impl Adapter {
    fn new(ctx: &AppContext, kind: ManagerKind) -> Result<Self> {
        Ok(match kind {
            ManagerKind::Mo2 => Adapter::ModOrganizer(Arc::new(ctx.modorganizer()?)),
            ManagerKind::Vortex => Adapter::Vortex(Arc::new(ctx.vortex()?)),
        })
    }

    fn manager(&self) -> Arc<dyn ModManager> {
        match self {
            Adapter::ModOrganizer(mo2) => mo2.clone(),
            Adapter::Vortex(vortex) => vortex.clone(),
        }
    }

    /// Descriptor of an instance that must already exist.
    fn find(&self, game: &Game, instance: &str, profile: Option<&str>) -> Result<InstanceInfo> {
        match self {
            Adapter::ModOrganizer(mo2) => {
                let base = mo2_base_folder(mo2, instance);
                let info = mo2
                    .describe_instance(&base, game, profile)
                    .with_context(|| format!("No MO2 instance at {}", base))?;
                Ok(InstanceInfo::ModOrganizer(info))
            }
            Adapter::Vortex(vortex) => vortex
                .profiles(game)?
                .into_iter()
                .find(|p| p.id == instance || p.name == instance)
                .map(InstanceInfo::Vortex)
                .ok_or_else(|| anyhow!("No Vortex profile '{}' for {}", instance, game.display_name)),
        }
    }

    /// Descriptor of a destination, describing a new instance when none exists yet.
    fn find_or_describe(&self, game: &Game, target: &str, global: bool) -> Result<InstanceInfo> {
        if let Ok(info) = self.find(game, target, None) {
            return Ok(info);
        }
        Ok(match self {
            Adapter::ModOrganizer(mo2) => {
                let info = if global {
                    Mo2InstanceInfo::global(target, game.clone(), mo2.global_root())
                } else {
                    let base = Utf8PathBuf::from(target);
                    let name = base.file_name().unwrap_or(target).to_string();
                    Mo2InstanceInfo::portable(name, game.clone(), base)
                };
                InstanceInfo::ModOrganizer(info)
            }
            Adapter::Vortex(_) => {
                InstanceInfo::Vortex(VortexProfileInfo::new_profile(target, game.clone()))
            }
        })
    }
}

/// An existing folder is used as is; anything else names a global instance.
fn mo2_base_folder(mo2: &ModOrganizer, instance: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(instance);
    if path.is_dir() {
        path.to_path_buf()
    } else {
        mo2.global_root().join(instance)
    }
}

fn game(id: &str) -> Result<&'static Game> {
    Game::by_id(id).ok_or_else(|| {
        let known: Vec<&str> = Game::supported().iter().map(|g| g.short_name.as_str()).collect();
        anyhow!("Unknown game '{}', expected one of: {}", id, known.join(", "))
    })
}

/// Main entry point for the modmigrator CLI
///
/// # Errors
///
/// Fails if configuration or logging cannot be initialized, an instance cannot be found,
/// or the migration ends with an error.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_dir = cli
        .config_dir
        .as_deref()
        .map(Utf8PathBuf::from)
        .unwrap_or_else(ConfigManager::default_dir);
    let config_manager = ConfigManager::new(&config_dir)?;
    let config = config_manager.load_app_config()?;

    let _guard = modmigrator::logging::setup_logging(&config.logging, cli.debug)?;
    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let ctx = Arc::new(AppContext::new(config));

    match cli.command {
        Command::Detect { manager, game: id } => detect(&ctx, manager, game(&id)?),
        Command::Show {
            manager,
            game: id,
            instance,
            profile,
        } => show(&ctx, manager, game(&id)?, &instance, profile.as_deref()),
        Command::Migrate(args) => migrate(ctx, args).await,
    }
}

fn detect(ctx: &AppContext, kind: ManagerKind, game: &Game) -> Result<()> {
    let adapter = Adapter::new(ctx, kind)?;
    let manager = adapter.manager();
    let instances = manager.detect_instances(game)?;

    if instances.is_empty() {
        println!("No {} instances found for {}", manager.display_name(), game.display_name);
        return Ok(());
    }
    println!("{} instances for {}:", manager.display_name(), game.display_name);
    for info in instances {
        match info {
            InstanceInfo::ModOrganizer(info) => {
                println!("  {} > {} ({})", info.name, info.profile, info.base_folder)
            }
            InstanceInfo::Vortex(info) => println!("  {} (id {})", info.name, info.id),
        }
    }
    Ok(())
}

fn show(
    ctx: &AppContext,
    kind: ManagerKind,
    game: &Game,
    instance: &str,
    profile: Option<&str>,
) -> Result<()> {
    let adapter = Adapter::new(ctx, kind)?;
    let info = adapter.find(game, instance, profile)?;
    let instance = adapter.manager().load_instance(&info)?;

    println!("{} ({})", instance.display_name, instance.root);
    println!("Game folder: {}", instance.game_folder);
    println!("Mods:");
    for m in instance.load_order() {
        let marker = if m.enabled { '+' } else { '-' };
        let root = if m.is_root_mod() { " [root]" } else { "" };
        println!("  {} {} ({}){}", marker, m.display_name, m.kind.as_str(), root);
    }
    if !instance.tools.is_empty() {
        println!("Tools:");
        for tool in &instance.tools {
            println!("  {} -> {} {}", tool.display_name, tool.executable, tool.command_line());
        }
    }
    Ok(())
}

async fn migrate(ctx: Arc<AppContext>, args: MigrateArgs) -> Result<()> {
    let game = game(&args.game)?;
    let source = Adapter::new(&ctx, args.from)?;
    let destination = Adapter::new(&ctx, args.to)?;

    let src_info = source.find(game, &args.source, args.profile.as_deref())?;
    let dst_info = destination.find_or_describe(game, &args.target, args.global)?;

    let mut src_instance = source
        .manager()
        .load_instance(&src_info)
        .context("Failed to load the source instance")?;
    for name in &args.disabled {
        if !src_instance.set_mod_enabled(name, false) {
            tracing::warn!("Cannot disable '{}': no such mod", name);
            eprintln!("warning: no mod named '{}'", name);
        }
    }

    let mut options = ctx.migration_options();
    options.use_hardlinks &= !args.no_hardlinks;
    options.replace |= args.replace;
    options.activate_new_instance &= !args.no_activate;
    if let Some(limit) = args.modname_limit {
        options.modname_limit = limit;
    }

    let request = MigrationRequest {
        src_instance,
        src_info,
        dst_info,
        src: source.manager(),
        dst: destination.manager(),
        options,
        included_tools: args.skip_tools.then(Vec::new),
    };
    if modmigrator::Migrator::destination_exists(&request) {
        println!(
            "'{}' already exists, mods will be merged into it",
            request.dst_info.display_name()
        );
    }

    let state = StateManager::new();
    state.start_migration(request.src_instance.enabled_mods().count() as u64);
    let printer = tokio::spawn(print_progress(state.subscribe()));

    let dst = request.dst.clone();
    let dst_info = request.dst_info.clone();
    let handle = spawn_migration(ctx.clone(), request, state.progress_reporter())
        .context("Failed to start the migration worker")?;
    let cancel = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling after the current file...");
            cancel.cancel();
        }
    });

    let result = handle.join().await;
    match &result {
        Ok(report) => {
            state.finish_migration(report);
        }
        Err(e) => {
            state.abort_migration(&e.to_string());
        }
    }
    printer.abort();
    ctx.metrics.log_summary();

    match result {
        Ok(report) => {
            print_report(&report);
            if !report.cancelled() {
                println!("{}", dst.completed_message(&dst_info));
            }
            Ok(())
        }
        Err(e) => {
            print_error(&e);
            bail!("migration failed: {}", e.kind().code())
        }
    }
}

async fn print_progress(mut rx: broadcast::Receiver<StateChange>) {
    loop {
        match rx.recv().await {
            Ok(StateChange::PhaseChanged { phase }) => println!("== {} ==", phase),
            Ok(StateChange::ProgressUpdated {
                current,
                total,
                current_mod: Some(name),
            }) => println!("[{}/{}] {}", current + 1, total, name),
            Ok(StateChange::ModProcessed {
                name,
                outcome: outcome @ (ModOutcome::Failed | ModOutcome::Skipped),
            }) => println!("      {} {}", name, outcome),
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!("Progress printer skipped {} events", skipped)
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_report(report: &MigrationReport) {
    print!("{}", report.summary());
    if report.merged_into_existing() {
        println!("Mods were merged into an existing instance.");
    }
}

fn print_error(error: &MigrationError) {
    eprintln!("{}", error.kind().default_message());
    eprintln!("{}", error.details());
}
