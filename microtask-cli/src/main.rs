use anyhow::Result;
use clap::{Parser, Subcommand};
use microtask_api::HttpTaskSource;
use microtask_core::{StatStore, TaskSession, builtin_catalog};
use std::path::PathBuf;

mod auth;
mod config;
mod play;
mod report;
mod state;

use config::Config;
use state::FileStore;

const LONG_VERSION: &str =
    concat!(env!("CARGO_PKG_VERSION"), " (", env!("MICROTASK_BUILD_SHA"), ")");

#[derive(Parser, Debug)]
#[command(
    name = "microtask",
    version,
    long_version = LONG_VERSION,
    about = "Short timed tasks with experience, streaks and medals"
)]
struct Cli {
    /// Verbose logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage ~/.microtask/config.toml
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Log in with phone and password (password is prompted)
    Login { phone: String },

    /// Forget the saved token
    Logout,

    /// Interactive round: fetch, accept, complete
    Play,

    /// Level, experience and streak from local records
    Stats,

    /// Medal wall with progress
    Medals,

    /// Completion calendar for a month (defaults to the current one)
    Calendar {
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        month: Option<u32>,
    },

    /// Completion history from the server
    History {
        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = 10)]
        limit: u32,

        /// Also write this page to a CSV file
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Clear local stats and medals
    Reset {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Write the default config if none exists
    Init,
    /// Print the effective config
    Show,
}

type Session = TaskSession<HttpTaskSource, FileStore>;

fn open_session(cfg: &Config) -> Result<Session> {
    let source = auth::authed_source(cfg)?;
    let store = StatStore::new(FileStore::open_default()?);
    Ok(TaskSession::new(source, store, cfg.session_config()?).with_catalog(builtin_catalog()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load_config()?;

    match cli.command {
        Command::Config { command } => match command {
            ConfigCommand::Init => config::init_config()?,
            ConfigCommand::Show => {
                println!("# {}", config::config_path()?.display());
                print!("{}", toml::to_string_pretty(&cfg)?);
            }
        },

        Command::Login { phone } => auth::login(&cfg, &phone).await?,

        Command::Logout => auth::logout()?,

        Command::Play => {
            let mut session = open_session(&cfg)?;
            play::run(&mut session, cfg.tick()).await?;
        }

        Command::Stats => {
            let store = StatStore::new(FileStore::open_default()?);
            report::print_stats(&store);
        }

        Command::Medals => {
            let mut store = StatStore::new(FileStore::open_default()?);
            report::print_medals(&mut store, &builtin_catalog())?;
        }

        Command::Calendar { year, month } => {
            let mut session = open_session(&cfg)?;
            report::print_calendar(&mut session, cfg.tz()?, year, month).await?;
        }

        Command::History { page, limit, csv } => {
            let mut session = open_session(&cfg)?;
            report::print_history(&mut session, cfg.tz()?, page, limit, csv.as_deref()).await?;
        }

        Command::Reset { yes } => {
            let mut store = StatStore::new(FileStore::open_default()?);
            report::reset(&mut store, yes)?;
        }
    }

    Ok(())
}
