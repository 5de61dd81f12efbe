mod config_commands;
mod room_commands;
mod run_commands;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "herald", about = "Herald, message fan-out gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    // Gateway arguments (used when no subcommand is provided, or with `gateway` subcommand)
    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
    /// Custom config directory (overrides default ~/.config/herald/).
    #[arg(long, global = true, env = "HERALD_CONFIG_DIR")]
    config_dir: Option<std::path::PathBuf>,
    /// Custom data directory (overrides default data dir).
    #[arg(long, global = true, env = "HERALD_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server (default when no subcommand is provided).
    Gateway,
    /// Room management.
    Rooms {
        #[command(subcommand)]
        action: room_commands::RoomAction,
    },
    /// Sender management. Channels start the next time the gateway runs.
    Senders {
        #[command(subcommand)]
        action: room_commands::SenderAction,
    },
    /// Dispatch run history.
    Runs {
        #[command(subcommand)]
        action: run_commands::RunAction,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    // Directory overrides apply to every command, before config is loaded.
    if let Some(ref dir) = cli.config_dir {
        herald_config::set_config_dir(dir.clone());
    }
    if let Some(ref dir) = cli.data_dir {
        herald_config::set_data_dir(dir.clone());
    }

    match cli.command {
        // Default: start gateway when no subcommand is provided
        None | Some(Commands::Gateway) => {
            info!(version = env!("CARGO_PKG_VERSION"), "herald starting");
            let config = herald_config::discover_and_load();

            // CLI args override config values
            let bind = cli.bind.unwrap_or_else(|| config.server.bind.clone());
            let port = cli.port.unwrap_or(config.server.port);

            herald_gateway::start_gateway(config, &bind, port, cli.data_dir).await
        },
        Some(Commands::Rooms { action }) => {
            room_commands::handle_rooms(action, cli.data_dir).await
        },
        Some(Commands::Senders { action }) => {
            room_commands::handle_senders(action, cli.data_dir).await
        },
        Some(Commands::Runs { action }) => run_commands::handle_runs(action, cli.data_dir).await,
        Some(Commands::Config { action }) => config_commands::handle_config(action),
    }
}

/// Open the database the gateway would use, applying migrations.
async fn open_database(
    data_dir: Option<std::path::PathBuf>,
) -> anyhow::Result<sqlx::SqlitePool> {
    let config = herald_config::discover_and_load();
    let path = herald_gateway::server::database_path(&config, data_dir);
    herald_gateway::open_database(&path).await
}

/// Render a millisecond timestamp as UTC, or `-` when absent.
fn format_ms(ms: Option<i64>) -> String {
    ms.and_then(chrono::DateTime::from_timestamp_millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".into())
}
