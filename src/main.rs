use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use url::Url;

use indalo_offline::cache::{KvCache, SqliteStore};
use indalo_offline::config::Config;
use indalo_offline::connectivity::{ConnectivityMonitor, ConnectivityStatus, HttpProbe};
use indalo_offline::db::{self, Database};
use indalo_offline::offline_data::{self, OfflineDataState, OfflineResource};
use indalo_offline::sync::{BackgroundSync, SyncQueue, SYNC_SCANS_TAG};
use indalo_offline::worker::{ReqwestTransport, Request, ServiceWorker, SqliteHttpCache, Transport};

#[derive(Parser, Debug)]
#[command(name = "indalo")]
#[command(about = "Offline-first data access for the Indalo API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/indalo/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Enable debug logging
  #[arg(short, long)]
  debug: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Load an API resource, falling back to the cache when offline
  Fetch {
    /// Cache key for the resource
    key: String,
    /// API path, e.g. /api/products
    path: String,
    /// Maximum cache age in seconds
    #[arg(long)]
    max_age: Option<u64>,
  },
  /// Keep an API resource loaded and print every state change
  Watch {
    key: String,
    path: String,
  },
  /// Verify a product code through the worker cache
  Verify { code: String },
  /// Inspect or clear the key-value cache
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },
  /// Precache static assets and activate the worker cache
  Install,
  /// Queue a scan (JSON) for background sync
  Queue { payload: String },
  /// Replay queued scans
  Sync,
}

#[derive(Subcommand, Debug)]
enum CacheAction {
  /// Print a fresh cached value
  Get { key: String },
  /// Clear one key, or everything except the preserved keys
  Clear {
    #[arg(long)]
    key: Option<String>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging(args.debug)?;

  let config = Config::load(args.config.as_deref())?;
  let db = Database::open(config.cache.database.as_deref())?;

  match args.command {
    Command::Fetch { key, path, max_age } => {
      let max_age = max_age
        .map(std::time::Duration::from_secs)
        .unwrap_or_else(|| config.max_age());
      let state = fetch(&config, &db, &key, &path, max_age).await?;
      println!("{}", serde_json::to_string_pretty(&state)?);
    }
    Command::Watch { key, path } => watch(&config, &db, key, &path).await?,
    Command::Verify { code } => verify(&config, &db, &code).await?,
    Command::Cache { action } => {
      let cache = kv_cache(&config, &db);
      match action {
        CacheAction::Get { key } => match cache.get::<Value>(&key, config.max_age()) {
          Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
          None => println!("No fresh cache entry for {}", key),
        },
        CacheAction::Clear { key } => {
          cache.clear(key.as_deref());
          println!("Cache cleared");
        }
      }
    }
    Command::Install => {
      let worker = service_worker(&config, &db)?;
      let count = worker.install().await?;
      let deleted = worker.activate().await?;
      println!(
        "Precached {} assets into {}; removed {} old buckets",
        count,
        worker.config().cache_name,
        deleted.len()
      );
    }
    Command::Queue { payload } => {
      let payload: Value =
        serde_json::from_str(&payload).map_err(|e| eyre!("Invalid scan payload: {}", e))?;
      let id = SyncQueue::new(db.clone()).enqueue(SYNC_SCANS_TAG, &payload)?;
      println!("Queued scan {}", id);
    }
    Command::Sync => {
      let transport = Arc::new(ReqwestTransport::new(&config.base_url()?)?);
      let (sync, mut notifications) = BackgroundSync::new(
        SyncQueue::new(db.clone()),
        transport,
        config.api_url("/api/scans")?,
      );
      let report = sync.handle(SYNC_SCANS_TAG).await?;
      while let Ok(notification) = notifications.try_recv() {
        println!("{}: {}", notification.title, notification.body);
      }
      println!("{} synced, {} remaining", report.synced, report.remaining);
    }
  }

  Ok(())
}

fn init_logging(debug: bool) -> Result<WorkerGuard> {
  let log_dir = db::data_dir()?.join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory: {}", e))?;

  let appender = tracing_appender::rolling::daily(log_dir, "indalo.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let default_level = if debug { "debug" } else { "info" };
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}

fn kv_cache(config: &Config, db: &Database) -> KvCache<SqliteStore> {
  KvCache::new(SqliteStore::new(db.clone()))
    .with_preserve_keys(config.cache.preserve_keys.iter().cloned())
}

fn service_worker(
  config: &Config,
  db: &Database,
) -> Result<ServiceWorker<SqliteHttpCache, ReqwestTransport>> {
  let transport = ReqwestTransport::new(&config.base_url()?)?;
  Ok(ServiceWorker::new(
    Arc::new(SqliteHttpCache::new(db.clone())),
    Arc::new(transport),
    config.worker_config()?,
  ))
}

async fn fetch(
  config: &Config,
  db: &Database,
  key: &str,
  path: &str,
  max_age: std::time::Duration,
) -> Result<OfflineDataState<Value>> {
  let monitor = ConnectivityMonitor::new(ConnectivityStatus::Online);
  let probe = HttpProbe::new(&config.base_url()?, &config.connectivity.probe_path)?;
  let status = monitor.refresh(&probe).await;
  info!("Connectivity for fetch of {}: {:?}", key, status);

  let url = config.api_url(path)?;
  let client = reqwest::Client::new();
  let cache = kv_cache(config, db);

  let state = offline_data::load(&cache, status, key, || get_json(client, url), max_age).await;
  Ok(state)
}

async fn watch(config: &Config, db: &Database, key: String, path: &str) -> Result<()> {
  let monitor = ConnectivityMonitor::new(ConnectivityStatus::Online);
  let probe = HttpProbe::new(&config.base_url()?, &config.connectivity.probe_path)?;
  monitor.refresh(&probe).await;
  monitor.start(probe, config.probe_interval());

  let url = config.api_url(path)?;
  let client = reqwest::Client::new();
  let mut resource = OfflineResource::spawn(
    kv_cache(config, db),
    Arc::clone(&monitor),
    key,
    move || get_json(client.clone(), url.clone()),
    config.max_age(),
  );

  println!("{}", serde_json::to_string_pretty(&resource.state())?);
  loop {
    tokio::select! {
      state = resource.changed() => match state {
        Some(state) => println!("{}", serde_json::to_string_pretty(&state)?),
        None => break,
      },
      _ = tokio::signal::ctrl_c() => break,
    }
  }

  info!("Stopping watch of {}", resource.key());
  monitor.stop();
  Ok(())
}

async fn get_json(client: reqwest::Client, url: Url) -> Result<Value> {
  let response = client
    .get(url.clone())
    .send()
    .await
    .map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?
    .error_for_status()
    .map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?;
  response
    .json::<Value>()
    .await
    .map_err(|e| eyre!("Failed to parse {}: {}", url, e))
}

async fn verify(config: &Config, db: &Database, code: &str) -> Result<()> {
  let worker = service_worker(config, db)?;
  if !worker.resume()? {
    warn!("Worker cache not installed; verification goes straight to the network");
  }

  let request = Request::get(config.api_url(&format!("/api/verify/{}", code))?);
  let response = match worker.handle_fetch(&request).await {
    Some(response) => response,
    None => {
      let transport = ReqwestTransport::new(&config.base_url()?)?;
      transport.fetch(&request).await?
    }
  };

  let body: Value = response.parse_json()?;
  println!("{}", serde_json::to_string_pretty(&body)?);
  Ok(())
}
