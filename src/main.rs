//! burrow - multi-user web file manager server
//!
//! Each account gets a private home directory under a shared root; clients
//! browse and edit it over a WebSocket JSON protocol.

mod accounts;
mod config;
mod daemon;
mod filesystem;
mod protocol;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;

use accounts::{AccountService, JsonCredentialStore};
use config::AppConfig;
use filesystem::FileSystemService;

#[derive(Parser, Debug)]
#[command(name = "burrow")]
#[command(version, about = "Multi-user web file manager", long_about = None)]
struct Cli {
    /// Path to a JSON configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the WebSocket server
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Directory holding the per-user home directories
        #[arg(long, value_name = "DIR")]
        root: Option<PathBuf>,
    },

    /// Create an account and its home directory
    Adduser {
        username: String,

        #[arg(long)]
        password: String,
    },

    /// Change an account's password
    Passwd {
        username: String,

        #[arg(long)]
        old: String,

        #[arg(long)]
        new: String,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "burrow=debug" } else { "burrow=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn account_service(config: &AppConfig) -> AccountService {
    let file_system = FileSystemService::new(config.filesystem.clone());
    let store = Arc::new(JsonCredentialStore::new(&config.user_db));
    AccountService::new(store, file_system.shared_resolver())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "✗".red(), e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Serve { port, root } => {
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(root) = root {
                config.filesystem.root = root;
            }
            println!(
                "{} burrow listening on {}:{}",
                "●".green(),
                config.bind,
                config.port
            );
            if let Err(e) = daemon::run(config).await {
                eprintln!("{} Server failed: {}", "✗".red(), e);
                return ExitCode::FAILURE;
            }
        }
        Commands::Adduser { username, password } => {
            match account_service(&config).create_account(&username, &password) {
                Ok(Some(root)) => println!(
                    "{} Created {} (home: {})",
                    "✓".green(),
                    username.bold(),
                    root.path().display()
                ),
                Ok(None) => {
                    eprintln!("{} Username {} already exists", "✗".red(), username);
                    return ExitCode::FAILURE;
                }
                Err(e) => {
                    eprintln!("{} {}", "✗".red(), e);
                    return ExitCode::FAILURE;
                }
            }
        }
        Commands::Passwd { username, old, new } => {
            match account_service(&config).change_password(&username, &old, &new) {
                Ok(true) => println!("{} Password changed for {}", "✓".green(), username.bold()),
                Ok(false) => {
                    eprintln!("{} Invalid username or password", "✗".red());
                    return ExitCode::FAILURE;
                }
                Err(e) => {
                    eprintln!("{} {}", "✗".red(), e);
                    return ExitCode::FAILURE;
                }
            }
        }
    }

    ExitCode::SUCCESS
}
