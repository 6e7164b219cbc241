//! Command-line front-end definitions.

use clap::{Parser, Subcommand};

use crate::commands;
use crate::core::error::PanelResult;
use crate::core::platform::PanelPaths;

#[derive(Parser)]
#[command(name = "control-panel")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Installs, upgrades and runs the server modules", long_about = None)]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Accept proposed names and confirmations without asking
    #[arg(short = 'y', long, global = true)]
    pub yes: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the managed modules and whether they run
    Modules,

    /// Show releases available for a module
    Releases {
        module: String,

        /// Include pre-releases
        #[arg(long)]
        pre: bool,
    },

    /// List installed versions of a module
    Installed { module: String },

    /// Install a release (latest stable when no version is given)
    Install {
        module: String,
        version: Option<String>,
    },

    /// Install a newer release and carry an installed version's data over
    Upgrade {
        module: String,
        /// Installed version to upgrade from
        from: String,
        /// Release to install (latest stable when omitted)
        to: Option<String>,
    },

    /// Change the build metadata of an installed version
    Rename {
        module: String,
        version: String,
        metadata: String,
    },

    /// Copy an installed version under new build metadata
    Duplicate {
        module: String,
        version: String,
        metadata: String,
    },

    /// Delete an installed version
    Remove { module: String, version: String },

    /// Start a module and wait until it is ready
    Start {
        module: String,
        version: Option<String>,

        /// Return once the module is ready instead of supervising it
        #[arg(long)]
        detach: bool,

        /// Open the module in the browser once it is ready
        #[arg(long)]
        open: bool,
    },

    /// Stop a module started by this or another panel
    Stop { module: String },

    /// Kill whatever process holds a module's PID file
    #[command(name = "kill-lock")]
    KillLock { module: String },

    /// Manage the shared Java runtimes
    Java {
        #[command(subcommand)]
        action: JavaAction,
    },

    /// Locate or download the media toolchain
    Media,

    /// Open a module's install folder
    Folder { module: String },

    /// Print a help page
    Help { page: Option<String> },
}

#[derive(Subcommand)]
pub enum JavaAction {
    /// List installed runtimes
    List,
    /// Make sure a runtime of at least this major is installed
    Ensure { major: u32 },
    /// Delete runtimes no installed version needs
    Prune,
}

impl Cli {
    pub async fn execute(&self, paths: PanelPaths) -> PanelResult<()> {
        let yes = self.yes;
        match &self.command {
            Commands::Modules => commands::list_modules(paths),
            Commands::Releases { module, pre } => commands::list_releases(paths, module, *pre).await,
            Commands::Installed { module } => commands::list_installed(paths, module),
            Commands::Install { module, version } => {
                commands::install(paths, module, version.as_deref(), yes).await
            }
            Commands::Upgrade { module, from, to } => {
                commands::upgrade(paths, module, from, to.as_deref(), yes).await
            }
            Commands::Rename {
                module,
                version,
                metadata,
            } => commands::rename(paths, module, version, metadata),
            Commands::Duplicate {
                module,
                version,
                metadata,
            } => commands::duplicate(paths, module, version, metadata),
            Commands::Remove { module, version } => commands::remove(paths, module, version, yes),
            Commands::Start {
                module,
                version,
                detach,
                open,
            } => commands::start(paths, module, version.as_deref(), *detach, *open).await,
            Commands::Stop { module } | Commands::KillLock { module } => {
                commands::kill_lock(paths, module).await
            }
            Commands::Java { action } => match action {
                JavaAction::List => commands::java_list(paths),
                JavaAction::Ensure { major } => commands::java_ensure(paths, *major).await,
                JavaAction::Prune => commands::java_prune(paths),
            },
            Commands::Media => commands::media_ensure(paths).await,
            Commands::Folder { module } => commands::open_folder(paths, module),
            Commands::Help { page } => commands::help(page.as_deref()),
        }
    }
}
