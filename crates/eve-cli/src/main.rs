//! CLI entry point for Eve.
//!
//! This binary provides the `eve` command for operators: initializing the
//! database, managing accounts and bots, and inspecting conversations
//! without going through the web frontend.

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use eve_store::{NewBot, NewMessage, Sender, Store, StoreConfig, StoreError};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Eve: companion-chat store administration.
#[derive(Parser)]
#[command(name = "eve", version, about = "Eve store administration")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, short, default_value = "config/eve.toml")]
    config: PathBuf,

    /// Default log level when RUST_LOG is unset.
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and apply migrations.
    Init,

    /// Register a user. The password is read from stdin.
    CreateUser { name: String },

    /// Check a user's password (from stdin) and print a new session key.
    Login { name: String },

    /// Show the user that owns a session key.
    Whoami { key: String },

    /// Create a bot for a user.
    CreateBot {
        #[arg(long)]
        owner: i64,
        name: String,
        #[arg(long, default_value = "")]
        image: String,
        #[arg(long, default_value = "")]
        gender: String,
    },

    /// List a user's bots.
    Bots { user_id: i64 },

    /// Append a message to a conversation.
    Say {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        bot: i64,
        /// Record the message as written by the bot.
        #[arg(long)]
        from_bot: bool,
        content: String,
    },

    /// Print a conversation.
    History {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        bot: i64,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Before tracing, so RUST_LOG may come from .env.
    let dotenv = dotenvy::dotenv();
    init_tracing(&cli.log_level);
    if let Ok(path) = dotenv {
        debug!(path = %path.display(), "loaded .env");
    }

    let config = load_config(&cli.config)?;
    if let Some(dir) = config.database_path.parent()
        && !dir.as_os_str().is_empty()
    {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let store = Store::open(&config).await.context("failed to open store")?;

    let result = run(&store, cli.command).await;
    finish(result, store.close().await)
}

/// Combine the command outcome with the close outcome.
///
/// A command error wins; a close failure after it is only logged.
fn finish(result: Result<()>, closed: eve_store::StoreResult<()>) -> Result<()> {
    match (result, closed) {
        (Err(err), Err(close_err)) => {
            warn!(error = %close_err, "failed to close store after command error");
            Err(err)
        }
        (Err(err), Ok(())) => Err(err),
        (Ok(()), closed) => closed.context("failed to close store"),
    }
}

async fn run(store: &Store, command: Commands) -> Result<()> {
    match command {
        Commands::Init => {
            println!("  Database ready.");
        }
        Commands::CreateUser { name } => {
            let password = read_password()?;
            let user = store.users.create(&name, &password).await.map_err(user_facing)?;
            println!("  Created user {} (id {})", user.name, user.id);
        }
        Commands::Login { name } => {
            let password = read_password()?;
            let user = store
                .users
                .check_credentials(&name, &password)
                .await
                .map_err(user_facing)?;
            let key = store.sessions.issue(user.id).await.map_err(user_facing)?;
            info!(user_id = user.id, "session issued");
            println!("{key}");
        }
        Commands::Whoami { key } => {
            match store
                .sessions
                .get_user_for_session(&key)
                .await
                .map_err(user_facing)?
            {
                Some(user) => println!("  {} (id {})", user.name, user.id),
                None => println!("  No such session."),
            }
        }
        Commands::CreateBot {
            owner,
            name,
            image,
            gender,
        } => {
            let bot = store
                .bots
                .create(NewBot {
                    name,
                    image,
                    gender,
                    user_id: owner,
                })
                .await
                .map_err(user_facing)?;
            println!("  Created bot {} (id {})", bot.name, bot.id);
        }
        Commands::Bots { user_id } => {
            let bots = store.bots.list_for_user(user_id).await.map_err(user_facing)?;
            if bots.is_empty() {
                println!("  No bots.");
            }
            for bot in bots {
                println!(
                    "  [{}] {:<16} gender={:<8} affection={:+.2} mood={:+.2}",
                    bot.id, bot.name, bot.gender, bot.affection, bot.mood
                );
            }
        }
        Commands::Say {
            user,
            bot,
            from_bot,
            content,
        } => {
            let sender = if from_bot { Sender::Bot } else { Sender::User };
            let message = store
                .messages
                .store(user, NewMessage::new(bot, sender, content))
                .await
                .map_err(user_facing)?;
            println!("  Stored message {}", message.id);
        }
        Commands::History { user, bot } => {
            let messages = store.messages.list(user, bot).await.map_err(user_facing)?;
            for message in messages {
                let who = match message.sender {
                    Sender::Bot => "bot ",
                    Sender::User => "user",
                };
                println!(
                    "  {} {who}: {}",
                    message.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    message.content
                );
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default log level.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

/// Config file, then `EVE_*` environment overrides.
fn load_config(path: &Path) -> Result<StoreConfig> {
    let config = StoreConfig::load(path)
        .and_then(StoreConfig::apply_env)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Read one line from stdin, without the trailing newline.
fn read_password() -> Result<String> {
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password from stdin")?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("no password given on stdin");
    }
    Ok(password)
}

/// Turn a store error into what an operator should see.
///
/// Detail for internal failures is already in the log.
fn user_facing(err: StoreError) -> anyhow::Error {
    anyhow!(err.public_message())
}
