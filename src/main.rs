mod cache;
mod clients;
mod config;
mod db;
mod fallback;
mod http;
mod logging;
mod network;
mod push;
mod server;
mod strategy;
mod sync;
#[cfg(test)]
mod testing;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::cache::SqliteStorage;
use crate::clients::ClientHub;
use crate::db::Database;
use crate::network::{Fetcher, HttpFetcher};
use crate::push::PushHandler;
use crate::server::AppState;
use crate::sync::{BackgroundSync, SyncQueue, SyncTag};
use crate::worker::CacheWorker;

#[derive(Parser, Debug)]
#[command(name = "swc")]
#[command(about = "An offline caching proxy with service-worker style strategies")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./swc.yaml, then $XDG_CONFIG_HOME/swc/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Origin to sit in front of, overriding the config file
  #[arg(long)]
  origin: Option<Url>,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install, activate, then serve (default)
  Serve,
  /// Populate the static partition and preload data
  Install,
  /// Delete partitions left over from previous versions
  Activate,
  /// List partitions and their sizes
  Inspect,
  /// Flush a background sync queue (analytics-sync or preferences-sync)
  Sync { tag: String },
  /// Show a push notification, optionally with a JSON payload
  Push { payload: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override origin if specified on command line
  let config = if let Some(origin) = args.origin {
    config::Config { origin, ..config }
  } else {
    config
  };

  let _log_guard = logging::init(&config.log)?;

  let db = Arc::new(Database::open(&config.database_path()?)?);
  let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(Duration::from_secs(
    config.network.timeout_secs,
  ))?);
  let clients = ClientHub::default();

  let worker = CacheWorker::new(
    &config,
    SqliteStorage::new(db.clone()),
    fetcher.clone(),
    clients.clone(),
  )?;
  let sync = BackgroundSync::new(
    SyncQueue::new(db),
    fetcher,
    config.resolve(&config.sync.analytics_endpoint)?,
    config.resolve(&config.sync.preferences_endpoint)?,
  );
  let push = PushHandler::new(config.notification.clone(), &config.product, clients.clone());

  match args.command.unwrap_or(Command::Serve) {
    Command::Serve => {
      worker.install().await?;
      worker.activate()?;

      let state = AppState {
        worker: Arc::new(worker),
        sync: Arc::new(sync),
        push,
        clients,
        origin: config.origin.clone(),
      };
      server::serve(config.server.listen, state).await?;
    }
    Command::Install => {
      let report = worker.install().await?;
      println!(
        "Installed {} static assets, preloaded {}",
        report.static_assets, report.preloaded
      );
    }
    Command::Activate => {
      let deleted = worker.activate()?;
      if deleted.is_empty() {
        println!("No obsolete partitions");
      }
      for name in deleted {
        println!("Deleted {}", name);
      }
    }
    Command::Inspect => {
      let names = worker.registry().names();
      for summary in worker.partition_summaries()? {
        let marker = if names.owned().contains(&summary.name.as_str()) {
          "*"
        } else {
          " "
        };
        println!("{} {:<32} {:>6} entries", marker, summary.name, summary.entries);
      }
    }
    Command::Sync { tag } => {
      let tag: SyncTag = tag.parse()?;
      let report = sync.run(tag).await?;
      let rendered =
        serde_json::to_string_pretty(&report).map_err(|e| eyre!("Failed to render report: {}", e))?;
      println!("{}", rendered);
    }
    Command::Push { payload } => {
      let notification = push.push(payload.as_deref().map(str::as_bytes));
      let rendered = serde_json::to_string_pretty(&notification)
        .map_err(|e| eyre!("Failed to render notification: {}", e))?;
      println!("{}", rendered);
    }
  }

  Ok(())
}
