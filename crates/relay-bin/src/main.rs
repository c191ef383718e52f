//! SimpleRelay command-line host.
//!
//! Joins, hosts or rejoins a relay session, prints state changes and
//! messages as JSON lines, and relays stdin lines as messages.

mod app;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use relay_client::{RelayConfig, RelayHub};
use relay_config_and_utils::{init_logging, Config, Paths};
use tracing::info;

/// SimpleRelay command-line interface.
#[derive(Parser)]
#[command(name = "simple-relay")]
#[command(about = "Join and host SimpleRelay sessions from the terminal")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Defaults to the config file value
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for runtime files (config, store, logs). Defaults to ~/.simple-relay
    #[arg(long, global = true, env = "SIMPLE_RELAY_BASE_DIR")]
    base_dir: Option<PathBuf>,

    /// Mirror logs to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Join any public session of a type
    JoinRandom {
        session_type: String,
        /// Number of members the session needs
        #[arg(short = 'n', long, default_value_t = 2)]
        members: u32,
        /// Local identity used to save and rejoin the session
        #[arg(long)]
        local_id: String,
    },
    /// Host a private session and print its share code
    Host {
        session_type: String,
        #[arg(short = 'n', long, default_value_t = 2)]
        members: u32,
        #[arg(long)]
        local_id: String,
    },
    /// Join a private session by its share code
    JoinPrivate {
        session_type: String,
        session_id: String,
        #[arg(long)]
        local_id: String,
    },
    /// Rejoin the session saved under a local id
    Rejoin {
        #[arg(long)]
        local_id: String,
    },
    /// Check whether a local id has a session to rejoin
    CanResume {
        #[arg(long)]
        local_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = Paths::resolve(cli.base_dir)?;
    paths.ensure_dirs()?;
    let config = Config::load(&paths)?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    init_logging(level, Some(paths.log_file()), cli.verbose);

    let store = relay_storage::open_file_store(&paths.store_file())?;
    let settings = RelayConfig {
        https_url: config.relay_https_url.clone(),
        wss_url: config.relay_wss_url.clone(),
        ..Default::default()
    };
    let hub = RelayHub::new(settings, store)?;

    let client = match cli.command {
        Commands::JoinRandom {
            session_type,
            members,
            local_id,
        } => hub.join_random(&session_type, members, &local_id)?,
        Commands::Host {
            session_type,
            members,
            local_id,
        } => hub.host_private(&session_type, members, &local_id)?,
        Commands::JoinPrivate {
            session_type,
            session_id,
            local_id,
        } => hub.join_private(&session_type, &session_id, &local_id)?,
        Commands::Rejoin { local_id } => hub.rejoin(&local_id)?,
        Commands::CanResume { local_id } => {
            println!("{}", hub.can_try_reconnecting(&local_id));
            return Ok(());
        }
    };

    info!(
        local_id = %client.local_id(),
        relay = %config.relay_wss_url,
        "Relay session starting"
    );
    app::run_session(client).await
}
