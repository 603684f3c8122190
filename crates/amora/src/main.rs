//! Amora: command-line client
//!
//! Subcommands:
//! - `login` / `signup` / `logout` / `whoami`: session management
//! - `profile`, `preferences`, `matches`: cached resources
//! - `thread`, `send`, `mark-read`: conversations

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use amora_sync::{AmoraClient, ClientConfig, DEFAULT_BASE_URL, FileStore};
use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "amora")]
#[command(about = "Amora dating client", long_about = None)]
struct Cli {
    /// API base URL
    #[arg(long, global = true, env = "AMORA_API_URL", default_value = DEFAULT_BASE_URL)]
    api_url: String,

    /// Path of the session and cache store
    #[arg(long, global = true, env = "AMORA_STORE_PATH")]
    store: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long, global = true, env = "AMORA_TIMEOUT_SECS", default_value = "30")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store the session
    Login {
        email: String,

        /// Password (prompted when omitted)
        #[arg(long, env = "AMORA_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Register a new account
    Signup {
        email: String,

        #[arg(long)]
        first_name: Option<String>,

        #[arg(long)]
        last_name: Option<String>,

        #[arg(long)]
        username: Option<String>,

        /// Account role
        #[arg(long, default_value = amora_sync::DEFAULT_ROLE)]
        role: String,

        /// Extra field forwarded as-is, as key=value (repeatable)
        #[arg(long = "field", value_parser = commands::parse_field)]
        fields: Vec<(String, String)>,

        /// Password (prompted when omitted)
        #[arg(long, env = "AMORA_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Clear the session and every cached resource
    Logout,

    /// Show the logged-in identity
    Whoami,

    /// Show your profile
    Profile {
        /// Skip the cached copy
        #[arg(long)]
        refresh: bool,
    },

    /// Show or change search preferences
    Preferences {
        #[command(subcommand)]
        action: Option<PreferencesAction>,
    },

    /// List matches with counterpart and unread summary
    Matches {
        /// Skip the cached copy
        #[arg(long)]
        refresh: bool,
    },

    /// Show a conversation, newest message first
    Thread {
        match_id: i64,

        /// Mark incoming messages as read
        #[arg(long)]
        open: bool,
    },

    /// Send a message within a match
    Send { match_id: i64, content: String },

    /// Mark messages as read
    MarkRead {
        #[arg(required = true)]
        message_ids: Vec<i64>,
    },
}

#[derive(Subcommand)]
enum PreferencesAction {
    /// Show current preferences
    Show {
        /// Skip the cached copy
        #[arg(long)]
        refresh: bool,
    },

    /// Update preferences; unset options keep their current value
    Set {
        #[arg(long)]
        min_age: Option<u8>,

        #[arg(long)]
        max_age: Option<u8>,

        /// Maximum distance in km
        #[arg(long)]
        max_distance: Option<u32>,

        /// MALE, FEMALE or OTHER
        #[arg(long)]
        gender: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "amora=info,amora_sync=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let client = connect(&cli).await?;

    match cli.command {
        Commands::Login { email, password } => {
            let password = commands::password_or_prompt(password)?;
            commands::login(&client, &email, &password).await
        }
        Commands::Signup {
            email,
            first_name,
            last_name,
            username,
            role,
            fields,
            password,
        } => {
            let password = commands::password_or_prompt(password)?;
            let mut registration = amora_sync::Registration::new(email, password)
                .names(
                    first_name.unwrap_or_default(),
                    last_name.unwrap_or_default(),
                )
                .username(username.unwrap_or_default());
            registration.role = role;
            for (key, value) in fields {
                registration = registration.field(key, value);
            }
            commands::signup(&client, &registration).await
        }
        Commands::Logout => {
            client.logout().await;
            println!("Logged out.");
            Ok(())
        }
        Commands::Whoami => commands::whoami(&client).await,
        Commands::Profile { refresh } => commands::profile(&client, refresh).await,
        Commands::Preferences { action } => match action {
            None => commands::show_preferences(&client, false).await,
            Some(PreferencesAction::Show { refresh }) => {
                commands::show_preferences(&client, refresh).await
            }
            Some(PreferencesAction::Set {
                min_age,
                max_age,
                max_distance,
                gender,
            }) => {
                let change = commands::PreferencesChange {
                    min_age,
                    max_age,
                    max_distance,
                    gender,
                };
                commands::set_preferences(&client, change).await
            }
        },
        Commands::Matches { refresh } => commands::matches(&client, refresh).await,
        Commands::Thread { match_id, open } => commands::thread(&client, match_id, open).await,
        Commands::Send { match_id, content } => commands::send(&client, match_id, &content).await,
        Commands::MarkRead { message_ids } => commands::mark_read(&client, &message_ids).await,
    }
}

/// Open the store and build the client from CLI settings.
async fn connect(cli: &Cli) -> Result<AmoraClient> {
    let path = match &cli.store {
        Some(path) => path.clone(),
        None => dirs::data_dir()
            .ok_or_else(|| miette::miette!("no data directory; pass --store"))?
            .join("amora")
            .join("store.json"),
    };

    let store = FileStore::open(&path)
        .await
        .map_err(|e| miette::miette!("failed to open store at {}: {}", path.display(), e))?;
    tracing::debug!(path = %store.path().display(), "opened store");

    let timeout = Duration::from_secs(cli.timeout);
    let config = ClientConfig::builder()
        .base_url(&cli.api_url)
        .request_timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .build()
        .map_err(|e| miette::miette!("invalid configuration: {}", e))?;

    AmoraClient::new(config, Arc::new(store)).map_err(|e| miette::miette!("{}", e))
}
