use chrono::Duration;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

use synka_offline::cache::{CacheStorage, SqliteStorage};
use synka_offline::clock::SystemClock;
use synka_offline::config::Config;
use synka_offline::db::{Database, LocalStore, SqliteLocalStore};
use synka_offline::event::{EventHandle, EventLoop};
use synka_offline::logging::{self, LogConfig};
use synka_offline::net::{Destination, HttpFetcher, Request};
use synka_offline::offline::{ChangeType, Connectivity, OfflineQueue, OfflineSnapshots};
use synka_offline::worker::{
  ControlMessage, InstallReport, StartOutcome, Worker, WorkerContext, SYNC_DATA_TAG,
};

#[derive(Parser, Debug)]
#[command(name = "synka-offline")]
#[command(about = "Offline cache engine and sync queue for Synka")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/synka/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Use a throwaway in-memory database
  #[arg(long, global = true)]
  ephemeral: bool,

  /// Echo more log output to stderr (-v, -vv, -vvv)
  #[arg(short, long, action = clap::ArgAction::Count, global = true)]
  verbose: u8,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the configured version and prime the static partition
  Install,
  /// Bring the worker up, reusing an existing install when present
  Activate,
  /// Route a request through the worker
  Fetch {
    url: String,
    /// Treat as a full-page navigation
    #[arg(long)]
    navigate: bool,
    /// Request destination (image, font, script, style, document)
    #[arg(long, value_parser = parse_destination)]
    destination: Option<Destination>,
    /// Print the response body
    #[arg(long)]
    body: bool,
  },
  /// Post a JSON control message, e.g. '{"type":"CLEAR_CACHE"}'
  Message { json: String },
  /// Fire a background or periodic sync
  Sync {
    #[arg(default_value = SYNC_DATA_TAG)]
    tag: String,
    #[arg(long)]
    periodic: bool,
  },
  /// Inspect cache partitions
  Caches {
    #[command(subcommand)]
    action: Option<CachesAction>,
  },
  /// Manage the offline mutation queue
  Queue {
    #[command(subcommand)]
    action: QueueAction,
  },
  /// Manage offline read snapshots
  Snapshot {
    #[command(subcommand)]
    action: SnapshotAction,
  },
}

#[derive(Subcommand, Debug)]
enum CachesAction {
  /// List partitions in creation order
  List,
  /// List request keys in a partition
  Entries { partition: String },
  /// Delete every partition
  Clear,
}

#[derive(Subcommand, Debug)]
enum QueueAction {
  /// Record a change
  Add {
    #[arg(value_parser = parse_change_type)]
    change_type: ChangeType,
    table: String,
    /// JSON payload
    #[arg(default_value = "null")]
    data: String,
  },
  /// Show pending changes
  List,
  /// Flush the queue now
  Process {
    /// Pretend the network is down
    #[arg(long)]
    offline: bool,
  },
  /// Ask the worker to flush via background sync
  Sync,
}

#[derive(Subcommand, Debug)]
enum SnapshotAction {
  /// Save JSON data under a key
  Put { key: String, data: String },
  /// Read a snapshot
  Get {
    key: String,
    /// Ignore expiry, as when the network is down
    #[arg(long)]
    offline: bool,
  },
  /// Remove expired and unreadable snapshots
  Cleanup,
}

fn parse_destination(s: &str) -> Result<Destination, String> {
  serde_json::from_value(Value::String(s.to_ascii_lowercase()))
    .map_err(|_| format!("unknown destination '{}'", s))
}

fn parse_change_type(s: &str) -> Result<ChangeType, String> {
  s.parse()
}

fn parse_json(raw: &str) -> Result<Value> {
  serde_json::from_str(raw).map_err(|e| eyre!("Invalid JSON '{}': {}", raw, e))
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(&LogConfig::default().with_verbosity(args.verbose))?;

  let config = Config::load(args.config.as_deref())?;
  let db = if args.ephemeral {
    Database::open_in_memory()?
  } else {
    Database::open(config.storage.path.as_deref())?
  };

  match args.command {
    Command::Caches { action } => caches(&db, action.unwrap_or(CachesAction::List)),
    Command::Snapshot { action } => snapshot(&config, &db, action),
    Command::Queue { action } if !matches!(action, QueueAction::Sync) => {
      queue(&config, &db, action)
    }
    command => run_worker(&config, &db, command).await,
  }
}

fn local_store(config: &Config, db: &Database) -> Arc<dyn LocalStore> {
  Arc::new(SqliteLocalStore::new(db.clone(), config.offline.quota_bytes))
}

fn open_queue(config: &Config, db: &Database, online: bool) -> OfflineQueue {
  OfflineQueue::new(
    local_store(config, db),
    Connectivity::new(online),
    Arc::new(SystemClock),
  )
  .with_max_entries(config.offline.max_queue_entries)
}

/// Commands that need a running worker.
async fn run_worker(config: &Config, db: &Database, command: Command) -> Result<()> {
  let storage: Arc<dyn CacheStorage> = Arc::new(SqliteStorage::new(db.clone()));
  let fetcher = Arc::new(HttpFetcher::new(&config.network)?);
  let worker = Arc::new(Worker::new(WorkerContext::from_config(
    config, storage, fetcher,
  )?));

  let (event_loop, handle) = EventLoop::new(Arc::clone(&worker));
  let task = tokio::spawn(event_loop.run());

  let result = dispatch(config, db, &worker, &handle, command).await;

  handle.shutdown();
  task
    .await
    .map_err(|e| eyre!("Worker event loop failed: {}", e))?;
  result
}

async fn dispatch(
  config: &Config,
  db: &Database,
  worker: &Worker,
  handle: &EventHandle,
  command: Command,
) -> Result<()> {
  if let Command::Install = command {
    print_install(&handle.install().await?);
    return Ok(());
  }

  let outcome = worker.start().await?;
  match command {
    Command::Activate => match outcome {
      StartOutcome::Resumed { version } => println!("Version {} already installed, resumed", version),
      StartOutcome::Installed(report) => print_install(&report),
    },
    Command::Fetch {
      url,
      navigate,
      destination,
      body,
    } => {
      let url = Url::parse(&url).map_err(|e| eyre!("Invalid URL '{}': {}", url, e))?;
      let mut request = if navigate {
        Request::navigate(url)
      } else {
        Request::get(url)
      };
      if let Some(destination) = destination {
        request = request.with_destination(destination);
      }

      let result = handle.fetch(request).await?;
      println!(
        "{} {} bytes ({})",
        result.data.status,
        result.data.body.len(),
        result.source
      );
      if let Some(cached_at) = result.cached_at {
        println!("cached at {}", cached_at.to_rfc3339());
      }
      if body {
        println!("{}", result.data.text());
      }
    }
    Command::Message { json } => {
      handle.post_message(ControlMessage::parse(&json)?)?;
      println!("Message posted");
    }
    Command::Sync { tag, periodic } => {
      if periodic {
        handle.periodic_sync(&tag)?;
        println!("Periodic sync '{}' fired", tag);
      } else {
        let notified = handle.sync(&tag).await?;
        println!("Sync '{}' notified {} page(s)", tag, notified);
      }
    }
    Command::Queue {
      action: QueueAction::Sync,
    } => {
      let queue = open_queue(config, db, true);
      let request = queue.request_background_sync(Some(handle))?;
      println!("{:?}", request);
    }
    Command::Install | Command::Caches { .. } | Command::Queue { .. } | Command::Snapshot { .. } => {
      return Err(eyre!("Command does not need a worker"));
    }
  }
  Ok(())
}

fn print_install(report: &InstallReport) {
  println!(
    "Installed version {}: {} cached, {} failed",
    report.version,
    report.primed.cached.len(),
    report.primed.failed.len()
  );
  for (url, reason) in &report.primed.failed {
    println!("  failed {}: {}", url, reason);
  }
  match &report.activation {
    Some(activation) => {
      println!("Activated version {}", activation.version);
      for name in &activation.deleted {
        println!("  deleted {}", name);
      }
    }
    None => println!("Waiting for the previous version to be released"),
  }
}

fn caches(db: &Database, action: CachesAction) -> Result<()> {
  let storage = SqliteStorage::new(db.clone());
  match action {
    CachesAction::List => {
      let names = storage.keys()?;
      if names.is_empty() {
        println!("No partitions");
      }
      for name in names {
        let count = storage.entries(&name)?.len();
        println!("{}\t{} entries", name, count);
      }
    }
    CachesAction::Entries { partition } => {
      if !storage.has(&partition)? {
        return Err(eyre!("No partition named '{}'", partition));
      }
      for key in storage.entries(&partition)? {
        println!("{}", key);
      }
    }
    CachesAction::Clear => {
      let count = storage.clear_all()?;
      println!("Deleted {} partition(s)", count);
    }
  }
  Ok(())
}

fn queue(config: &Config, db: &Database, action: QueueAction) -> Result<()> {
  match action {
    QueueAction::Add {
      change_type,
      table,
      data,
    } => {
      let queue = open_queue(config, db, true);
      queue.queue_change(change_type, &table, parse_json(&data)?)?;
      println!("Queued {} on {}", change_type, table);
    }
    QueueAction::List => {
      let pending = open_queue(config, db, true).pending()?;
      if pending.is_empty() {
        println!("Queue is empty");
      }
      for change in pending {
        println!(
          "{}\t{}\t{}\t{}",
          change.timestamp, change.change_type, change.table, change.data
        );
      }
    }
    QueueAction::Process { offline } => {
      let outcome = open_queue(config, db, !offline).process_queue()?;
      println!("{:?}", outcome);
    }
    QueueAction::Sync => return Err(eyre!("Queue sync needs a running worker")),
  }
  Ok(())
}

fn snapshot(config: &Config, db: &Database, action: SnapshotAction) -> Result<()> {
  let online = !matches!(action, SnapshotAction::Get { offline: true, .. });
  let snapshots = OfflineSnapshots::new(
    local_store(config, db),
    Connectivity::new(online),
    Arc::new(SystemClock),
  )
  .with_ttl(Duration::days(config.offline.ttl_days));

  match action {
    SnapshotAction::Put { key, data } => {
      snapshots.persist_for_offline(&key, &parse_json(&data)?)?;
      println!("Saved {}", key);
    }
    SnapshotAction::Get { key, .. } => match snapshots.get_offline_data::<Value>(&key) {
      Some(data) => println!("{}", serde_json::to_string_pretty(&data)?),
      None => println!("No data for {}", key),
    },
    SnapshotAction::Cleanup => {
      let removed = snapshots.cleanup_old_offline_data()?;
      println!("Removed {} snapshot(s)", removed.len());
    }
  }
  Ok(())
}
