mod analytics;
mod cache;
mod clients;
mod config;
mod error;
mod lifecycle;
mod logging;
mod net;
mod push;
mod router;
#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use analytics::Analytics;
use cache::{CacheStorage, GenerationManager, GenerationTag, SqliteStorage, StoreRole};
use clients::{Clients, LocalClients};
use config::Config;
use lifecycle::{ControlMessage, LifecycleController};
use net::{Destination, HttpClient, Request, RequestMode};
use push::{ClickOutcome, NotificationTray, PushAdapter};
use router::Router;

#[derive(Parser, Debug)]
#[command(name = "cachegate")]
#[command(about = "An offline-resilient request interception and caching layer")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/cachegate/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Seed a new generation and make it current
  Install {
    /// Generation tag (default: `version` from the config)
    #[arg(long)]
    tag: Option<String>,
    /// Open window held by the current generation; the install waits for it
    #[arg(long = "client")]
    clients: Vec<String>,
  },
  /// Deliver a control message, e.g. '{"type":"SKIP_WAITING"}'
  Message { json: String },
  /// Report that no window is held by the current generation any more
  Release {
    /// Also take control of every open window
    #[arg(long)]
    claim: bool,
  },
  /// Serve one request through the strategy router
  Fetch {
    /// Absolute URL, or a path relative to the origin
    url: String,
    /// Treat the request as a top-level navigation
    #[arg(long)]
    navigate: bool,
    #[arg(long, default_value = "GET")]
    method: String,
    /// navigate, same-origin, cors or no-cors
    #[arg(long)]
    mode: Option<RequestMode>,
    /// document, script, style, image, font, manifest or other
    #[arg(long)]
    destination: Option<Destination>,
    /// Write the body here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// Show the current generation and every store
  Generations,
  /// Remove one entry from the current generation
  Evict {
    url: String,
    /// Evict from the upstream-data store instead of static assets
    #[arg(long)]
    data: bool,
  },
  /// Decode a push payload and show the resulting notification
  Push {
    /// JSON payload; omitted means an empty push
    payload: Option<String>,
    /// Also simulate a click on the notification
    #[arg(long)]
    click: bool,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init()?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let storage = Arc::new(SqliteStorage::open(config.cache.path.as_deref())?);
  let network = Arc::new(HttpClient::new(&config.origin, config.network_timeout())?);

  match args.command {
    Command::Install { tag, clients } => install(&config, storage, network, tag, &clients).await,
    Command::Message { json } => message(&config, storage, network, &json),
    Command::Release { claim } => release(&config, storage, network, claim),
    Command::Fetch {
      url,
      navigate,
      method,
      mode,
      destination,
      output,
    } => {
      let target = Target {
        url,
        navigate,
        method,
        mode,
        destination,
      };
      fetch(&config, storage, network, &target, output).await
    }
    Command::Generations => generations(&config, storage, network),
    Command::Evict { url, data } => evict(&config, storage.as_ref(), &url, data),
    Command::Push { payload, click } => push(&config, payload.as_deref(), click),
  }
}

type Controller = LifecycleController<SqliteStorage, HttpClient, LocalClients>;

/// A lifecycle controller that has picked up whatever a previous run left
/// current and waiting.
fn controller(
  config: &Config,
  storage: Arc<SqliteStorage>,
  network: Arc<HttpClient>,
  clients: Arc<LocalClients>,
) -> Result<Controller> {
  let generations = GenerationManager::new(storage, network, config.origin.clone());
  let mut controller = LifecycleController::new(generations, clients, config.lifecycle.clone())
    .with_analytics(Analytics::new(config.analytics.endpoint.clone()));
  controller.resume()?;
  Ok(controller)
}

fn report(controller: &Controller) {
  match controller.active() {
    Some(agent) => println!("current: {} (agent {})", agent.tag, agent.id),
    None => println!("current: (none)"),
  }
  if let Some(agent) = controller.waiting() {
    println!("waiting: {} (agent {})", agent.tag, agent.id);
  }
}

async fn install(
  config: &Config,
  storage: Arc<SqliteStorage>,
  network: Arc<HttpClient>,
  tag: Option<String>,
  open_windows: &[String],
) -> Result<()> {
  let tag = GenerationTag::new(tag.unwrap_or_else(|| config.version.clone()));
  let clients = Arc::new(LocalClients::new());
  let mut controller = controller(config, storage, network, Arc::clone(&clients))?;

  let holder = controller.active().map(|agent| agent.id);
  for window in open_windows {
    let url = config
      .origin
      .join(window)
      .map_err(|e| eyre!("Invalid client URL '{}': {}", window, e))?;
    clients.attach(url.as_str(), holder);
  }

  let id = controller.install(tag.clone(), &config.seed).await?;
  if let Some(state) = controller.state_of(id) {
    println!("Generation {} installed, agent {} is {:?}", tag, id, state);
  }
  report(&controller);
  Ok(())
}

fn message(
  config: &Config,
  storage: Arc<SqliteStorage>,
  network: Arc<HttpClient>,
  json: &str,
) -> Result<()> {
  let mut controller = controller(config, storage, network, Arc::new(LocalClients::new()))?;
  controller.handle_message(ControlMessage::parse(json)?)?;
  report(&controller);
  Ok(())
}

fn release(
  config: &Config,
  storage: Arc<SqliteStorage>,
  network: Arc<HttpClient>,
  claim: bool,
) -> Result<()> {
  let mut controller = controller(config, storage, network, Arc::new(LocalClients::new()))?;

  if !controller.clients_released()? {
    println!("Nothing waiting to activate");
  }
  if claim {
    controller.claim()?;
  }
  report(&controller);
  Ok(())
}

/// What `fetch` was asked to request.
struct Target {
  url: String,
  navigate: bool,
  method: String,
  mode: Option<RequestMode>,
  destination: Option<Destination>,
}

async fn fetch(
  config: &Config,
  storage: Arc<SqliteStorage>,
  network: Arc<HttpClient>,
  target: &Target,
  output: Option<PathBuf>,
) -> Result<()> {
  let tag = current_tag(storage.as_ref())?;
  let url = config
    .origin
    .join(&target.url)
    .map_err(|e| eyre!("Invalid URL '{}': {}", target.url, e))?;

  let mut request = if target.navigate {
    Request::navigate(url)
  } else {
    Request::get(url)
  }
  .with_method(&target.method);
  if let Some(mode) = target.mode {
    request = request.with_mode(mode);
  }
  if let Some(destination) = target.destination {
    request = request.with_destination(destination);
  }

  let router = Router::from_config(storage, network, config)?;
  let class = router.classify(&request);
  let result = router.dispatch(&tag, &request).await?;

  eprintln!(
    "{} {} ({} strategy, served from {})",
    result.data.status, result.data.status_text, class, result.source
  );
  if let Some(content_type) = result.data.header("content-type") {
    eprintln!("content-type: {}", content_type);
  }
  if let Some(cached_at) = result.cached_at {
    eprintln!("cached at {}", cached_at.format("%Y-%m-%d %H:%M:%S UTC"));
  }

  match output {
    Some(path) => std::fs::write(&path, &result.data.body)
      .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?,
    None => std::io::stdout()
      .write_all(&result.data.body)
      .map_err(|e| eyre!("Failed to write body: {}", e))?,
  }
  Ok(())
}

fn generations(config: &Config, storage: Arc<SqliteStorage>, network: Arc<HttpClient>) -> Result<()> {
  let manager = GenerationManager::new(Arc::clone(&storage), network, config.origin.clone());

  match manager.current_tag()? {
    Some(tag) => println!("current: {}", tag),
    None => println!("current: (none)"),
  }
  if let Some(tag) = manager.waiting_tag()? {
    println!("waiting: {}", tag);
  }

  for name in manager.generations()? {
    let entries = storage.keys(&name, "")?.len();
    println!("  {:<40} {} entries", name, entries);
  }
  Ok(())
}

fn evict(config: &Config, storage: &SqliteStorage, target: &str, data: bool) -> Result<()> {
  let tag = current_tag(storage)?;
  let url = config
    .origin
    .join(target)
    .map_err(|e| eyre!("Invalid URL '{}': {}", target, e))?;

  let role = if data {
    StoreRole::UpstreamData
  } else {
    StoreRole::StaticAssets
  };
  let key = Request::get(url).cache_key();

  if storage.delete(&tag.store_name(role), &key)? {
    println!("Evicted {}", key);
  } else {
    println!("Not cached: {}", key);
  }
  Ok(())
}

fn push(config: &Config, payload: Option<&str>, click: bool) -> Result<()> {
  let tray = Arc::new(NotificationTray::new());
  let clients = Arc::new(LocalClients::new());
  let adapter = PushAdapter::new(
    tray,
    Arc::clone(&clients),
    config.origin.clone(),
    config.push.clone(),
  );

  let notification = adapter.on_push(payload.map(str::as_bytes));
  let rendered = serde_json::to_string_pretty(&notification)
    .map_err(|e| eyre!("Failed to render notification: {}", e))?;
  println!("{}", rendered);

  if click {
    match adapter.on_click(&notification) {
      ClickOutcome::Focused(id) | ClickOutcome::Opened(id) => {
        let window = clients.windows().into_iter().find(|w| w.id == id);
        if let Some(window) = window {
          println!("Window {} at {}", window.id, window.url);
        }
      }
      ClickOutcome::Failed => println!("No window could be opened"),
    }
  }
  Ok(())
}

fn current_tag(storage: &SqliteStorage) -> Result<GenerationTag> {
  storage
    .current_generation()?
    .map(GenerationTag::new)
    .ok_or_else(|| eyre!("No generation is current. Run `cachegate install` first."))
}
