//! feedwake: adaptive day/night news poller
//!
//! Main binary with subcommands:
//! - `daemon`: Wake loop (fetch, dedupe, notify, re-arm)
//! - `arm`: Install the update job
//! - `status`: Show the schedule and counters
//! - `config`, `ledger`, `stats`, `refreshed`: Inspect and adjust state

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use feedwake_updater::{ConnectionClass, DataDir};

/// Parse boolean from environment variable, accepting common truthy values.
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true.
/// Accepts "0", "false", "no", "off", "" (case-insensitive) as false.
fn parse_bool_env(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(format!(
            "invalid boolean value '{}', expected 1/true/yes/on or 0/false/no/off",
            s
        )),
    }
}

mod commands;
mod daemon;

#[derive(Parser)]
#[command(name = "feedwake")]
#[command(about = "Adaptive day/night news poller", long_about = None)]
struct Cli {
    /// Directory holding the ledger, jobs, preferences and statistics
    #[arg(long, global = true, env = "FEEDWAKE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the wake loop until interrupted
    Daemon {
        /// Feeds to poll, as comma-separated ID=URL pairs
        #[arg(long, env = "FEEDWAKE_FEEDS")]
        feeds: String,

        /// Connection class: unmetered, metered or offline
        #[arg(long, env = "FEEDWAKE_CONNECTION", default_value = "unmetered")]
        connection: ConnectionClass,

        /// Show desktop notifications through notify-send instead of logging.
        /// Accepts "1", "true", "yes", or "on".
        #[arg(long, env = "FEEDWAKE_DESKTOP", value_parser = parse_bool_env, default_value = "false")]
        desktop: bool,

        /// Seconds a thumbnail may delay its notification
        #[arg(long, default_value = "5")]
        thumbnail_timeout: u64,

        /// Concurrent feed fetches (defaults to available parallelism)
        #[arg(long)]
        max_parallel: Option<usize>,
    },

    /// Arm the update job for the current window
    Arm {
        /// Replace an already armed job
        #[arg(long)]
        force: bool,
    },

    /// Show the armed job, the current window and the counters
    Status,

    /// Read and write preferences
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Inspect the notification ledger
    Ledger {
        #[command(subcommand)]
        action: LedgerAction,
    },

    /// Show or reset execution statistics
    Stats {
        #[command(subcommand)]
        action: StatsAction,
    },

    /// Record that SOURCE was just refreshed by hand, so older items are not
    /// notified
    Refreshed {
        /// Source id, as used in --feeds
        source: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print one preference
    Get { key: String },
    /// Set a preference; schedule keys re-arm the job
    Set { key: String, value: String },
    /// Print every preference
    List,
}

#[derive(Subcommand)]
enum LedgerAction {
    /// Print shown items, oldest first
    List,
    /// Drop entries past the retention horizon
    Prune,
}

#[derive(Subcommand)]
enum StatsAction {
    /// Print the counters
    Show,
    /// Zero the counters and start a new window
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "feedwake=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let data_dir = resolve_data_dir(cli.data_dir)?;

    match cli.command {
        Commands::Daemon {
            feeds,
            connection,
            desktop,
            thumbnail_timeout,
            max_parallel,
        } => {
            daemon::run(daemon::DaemonConfig {
                data_dir,
                feeds,
                connection,
                desktop,
                thumbnail_timeout: std::time::Duration::from_secs(thumbnail_timeout),
                max_parallel,
            })
            .await
        }

        Commands::Arm { force } => commands::arm(&data_dir, force).await,

        Commands::Status => commands::status(&data_dir).await,

        Commands::Config { action } => match action {
            ConfigAction::Get { key } => commands::config_get(&data_dir, &key).await,
            ConfigAction::Set { key, value } => {
                commands::config_set(&data_dir, &key, &value).await
            }
            ConfigAction::List => commands::config_list(&data_dir).await,
        },

        Commands::Ledger { action } => match action {
            LedgerAction::List => commands::ledger_list(&data_dir).await,
            LedgerAction::Prune => commands::ledger_prune(&data_dir).await,
        },

        Commands::Stats { action } => match action {
            StatsAction::Show => commands::stats_show(&data_dir).await,
            StatsAction::Reset => commands::stats_reset(&data_dir).await,
        },

        Commands::Refreshed { source } => commands::refreshed(&data_dir, &source).await,
    }
}

fn resolve_data_dir(explicit: Option<PathBuf>) -> Result<DataDir> {
    let root = match explicit {
        Some(path) => path,
        None => dirs::data_dir()
            .map(|d| d.join("feedwake"))
            .ok_or_else(|| miette::miette!("could not determine a data directory, pass --data-dir"))?,
    };
    Ok(DataDir::new(root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_parse_bool_env() {
        assert_eq!(parse_bool_env("Yes"), Ok(true));
        assert_eq!(parse_bool_env("0"), Ok(false));
        assert_eq!(parse_bool_env(""), Ok(false));
        assert!(parse_bool_env("perhaps").is_err());
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_config_set() {
        let cli = Cli::try_parse_from([
            "feedwake",
            "--data-dir",
            "/tmp/fw",
            "config",
            "set",
            "interval.day_minutes",
            "20",
        ])
        .unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/fw")));
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Set { .. }
            }
        ));
    }

    #[test]
    fn test_parses_connection_class() {
        let cli = Cli::try_parse_from([
            "feedwake",
            "daemon",
            "--feeds",
            "bbc=https://bbc.example/rss",
            "--connection",
            "metered",
        ])
        .unwrap();
        match cli.command {
            Commands::Daemon { connection, .. } => assert_eq!(connection, ConnectionClass::Metered),
            _ => panic!("expected daemon"),
        }
    }

    #[test]
    fn test_explicit_data_dir_wins() {
        let dir = resolve_data_dir(Some(PathBuf::from("/srv/feedwake"))).unwrap();
        assert_eq!(dir.root(), std::path::Path::new("/srv/feedwake"));
    }
}
