use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use kartavya::config::{CliOverrides, Config};
use kartavya::logging::init_tracing;

mod cmd;

#[derive(Parser)]
#[command(name = "kartavya")]
#[command(version, about = "Issue tracking, sprints and boards as a JSON API")]
pub struct Cli {
    /// Debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to kartavya.toml (defaults to .kartavya/kartavya.toml)
    #[arg(long, global = true, env = "KARTAVYA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database path. Overrides the config file and KARTAVYA_DB_PATH.
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,

        /// Enable dev mode (permissive CORS for a local front-end)
        #[arg(long)]
        dev: bool,
    },
    /// Create the config directory and an empty database
    Init,
    /// Load demo users, a project, a sprint and issues
    Seed {
        /// Admin email (defaults to KARTAVYA_ADMIN_EMAIL or admin@kartavya.local)
        #[arg(long)]
        admin_email: Option<String>,

        /// Admin password (defaults to KARTAVYA_ADMIN_PASSWORD or admin12345)
        #[arg(long)]
        admin_password: Option<String>,
    },
    /// Manage user accounts
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum UserCommands {
    /// Create a user account
    Add {
        #[arg(long)]
        name: String,

        #[arg(long)]
        email: String,

        #[arg(long)]
        password: String,

        /// admin, manager, developer or viewer
        #[arg(long, default_value = "developer")]
        role: String,
    },
    /// List user accounts
    List,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default kartavya.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_path(&std::env::current_dir()?),
    };

    let mut overrides = CliOverrides {
        db_path: cli.db_path.clone(),
        verbose: cli.verbose,
        ..Default::default()
    };
    if let Commands::Serve { host, port, dev } = &cli.command {
        overrides.host = host.clone();
        overrides.port = *port;
        overrides.dev_mode = *dev;
    }

    if let Commands::Config { command } = &cli.command {
        return cmd::cmd_config(&config_path, &overrides, command.clone());
    }

    let config = Config::load(&config_path, &overrides)?;
    init_tracing(&config.log_filter, config.log_format);
    tracing::debug!(config = %config_path.display(), "Configuration loaded");

    match &cli.command {
        Commands::Serve { .. } => cmd::cmd_serve(&config).await?,
        Commands::Init => cmd::cmd_init(&config_path, &config)?,
        Commands::Seed {
            admin_email,
            admin_password,
        } => cmd::cmd_seed(&config, admin_email.clone(), admin_password.clone())?,
        Commands::User { command } => cmd::cmd_user(&config, command.clone())?,
        Commands::Config { .. } => {}
    }

    Ok(())
}
