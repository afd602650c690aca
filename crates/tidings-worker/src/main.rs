//! tidings-worker binary.
//!
//! Reads `tidings.toml` (or the path given with `--config`) plus `TIDINGS_`
//! environment variables, opens the SQLite store and runs the notification
//! pipeline until interrupted. The other subcommands inspect or adjust the
//! same store.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tidings_core::{
  flags::Channel,
  store::{FlagSource, SubscriptionStore},
};
use tidings_store_sqlite::SqliteStore;
use tidings_worker::{config::WorkerConfig, stats::collect_stats};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Event notification worker")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "tidings.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
  /// Process events and deliver notifications (default).
  Run,
  /// Print the delivery backlog as JSON.
  Stats,
  /// Inspect or change the degraded-mode switches.
  Flags {
    #[command(subcommand)]
    action: FlagsCommand,
  },
  /// Inspect subscriptions.
  Subscriptions {
    #[command(subcommand)]
    action: SubscriptionsCommand,
  },
}

#[derive(Subcommand)]
enum FlagsCommand {
  Show,
  /// Disable or re-enable delivery channels.
  Set {
    #[arg(long, value_delimiter = ',')]
    disable: Vec<Channel>,
    #[arg(long, value_delimiter = ',')]
    enable:  Vec<Channel>,
  },
}

#[derive(Subcommand)]
enum SubscriptionsCommand {
  List {
    #[arg(long)]
    owner: Option<String>,
  },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let config = WorkerConfig::load(&cli.config)
    .with_context(|| format!("failed to load configuration from {:?}", cli.config))?;

  let store_path = config.store_path();
  if let Some(parent) = store_path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create {parent:?}"))?;
  }
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  match cli.command.unwrap_or(Command::Run) {
    Command::Run => {
      tracing::info!(store = ?store_path, "starting tidings worker");
      let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
          tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
      };
      tidings_worker::run(Arc::new(store), &config, shutdown)
        .await
        .context("worker failed")?;
    }
    Command::Stats => {
      let stats = collect_stats(&store).await.context("failed to collect stats")?;
      println!("{}", serde_json::to_string_pretty(&stats)?);
    }
    Command::Flags { action } => match action {
      FlagsCommand::Show => {
        let flags = store.service_flags().await.context("failed to read flags")?;
        println!("{}", serde_json::to_string_pretty(&flags)?);
      }
      FlagsCommand::Set { disable, enable } => {
        let mut flags = store.service_flags().await.context("failed to read flags")?;
        for channel in disable {
          flags.set(channel, true);
        }
        for channel in enable {
          flags.set(channel, false);
        }
        store
          .set_service_flags(flags)
          .await
          .context("failed to write flags")?;
        println!("{}", serde_json::to_string_pretty(&flags)?);
      }
    },
    Command::Subscriptions {
      action: SubscriptionsCommand::List { owner },
    } => {
      let subscriptions = store
        .list_subscriptions(owner)
        .await
        .context("failed to list subscriptions")?;
      for sub in subscriptions {
        println!(
          "{}  {:<7}  {:<34}  {}  owner={}",
          sub.subscription_id, sub.resource_type, sub.trigger, sub.subscriber, sub.owner
        );
      }
    }
  }

  Ok(())
}
