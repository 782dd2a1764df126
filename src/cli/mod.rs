pub mod account;
pub mod report;

use std::{io, path::PathBuf};

use account::{process_login_command, process_logout_command, process_session_command, LoginCommand};
use anyhow::Result;
use clap::{Parser, Subcommand};
use report::{process_archive_command, process_recommend_command, RecommendCommand};
use tracing::level_filters::LevelFilter;

use crate::{
    service::serve,
    utils::{
        config::Config,
        dir::create_application_default_path,
        logging::{enable_logging, CLI_PREFIX, SERVE_PREFIX},
    },
};

#[derive(Parser, Debug)]
#[command(name = "Tabtrail", version, long_about = None)]
#[command(about = "Tracks browser tab activity and resurfaces the tabs worth returning to", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Enable trace logging to the console")]
    log: bool,
    #[arg(
        long,
        global = true,
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    dir: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        help = "Extra configuration file, applied over $XDG_CONFIG_HOME/tabtrail/config.toml"
    )]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(
        about = "Run the native messaging host. Meant to be launched by the browser extension"
    )]
    Serve {
        /// Browsers append the caller's origin when launching a host.
        #[arg(hide = true, trailing_var_arg = true, allow_hyphen_values = true)]
        caller: Vec<String>,
    },
    #[command(about = "Show the tabs worth returning to")]
    Recommend {
        #[command(flatten)]
        command: RecommendCommand,
    },
    #[command(about = "Archive a url so it stops being recommended")]
    Archive { url: String },
    #[command(about = "Store the credentials used to sync and query activity")]
    Login {
        #[command(flatten)]
        command: LoginCommand,
    },
    #[command(about = "Forget the stored credentials")]
    Logout,
    #[command(about = "Show the stored session")]
    Session,
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let dir = match args.dir {
        Some(dir) => match std::fs::create_dir_all(&dir) {
            Ok(_) => dir,
            Err(v) if v.kind() == io::ErrorKind::AlreadyExists => dir,
            Err(v) => return Err(v.into()),
        },
        None => create_application_default_path()?,
    };

    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    let prefix = match args.commands {
        Commands::Serve { .. } => SERVE_PREFIX,
        _ => CLI_PREFIX,
    };
    enable_logging(prefix, &dir, logging_level, args.log)?;

    let config = Config::load_from(args.config.as_deref())?;

    match args.commands {
        Commands::Serve { caller } => {
            if let Some(caller) = caller.first() {
                tracing::info!("Launched by {caller}");
            }
            serve(&config, &dir).await
        }
        Commands::Recommend { command } => process_recommend_command(command, &config, &dir).await,
        Commands::Archive { url } => process_archive_command(&url, &config, &dir).await,
        Commands::Login { command } => process_login_command(command, &dir).await,
        Commands::Logout => process_logout_command(&dir).await,
        Commands::Session => process_session_command(&dir).await,
    }
}
