//! Request classification and dispatch to the matching fetch strategy.

use color_eyre::Result;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use url::Origin;

use crate::cache::{CacheLayer, CacheResult, CacheStorage, GenerationTag};
use crate::config::Config;
use crate::error::FetchError;
use crate::net::{Destination, Network, Request, Response};

/// Which strategy serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Non-GET; never intercepted by the cache
  Passthrough,
  /// Top-level navigation or document; network-first
  Navigation,
  /// The upstream data feed; race-with-timeout
  UpstreamData,
  /// Another origin's static asset; cache-first, store-after
  CrossOrigin,
  /// Our own static asset; cache-first, conditional store
  SameOrigin,
}

impl fmt::Display for RequestClass {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::Passthrough => "passthrough",
      Self::Navigation => "navigation",
      Self::UpstreamData => "upstream-data",
      Self::CrossOrigin => "cross-origin",
      Self::SameOrigin => "same-origin",
    };
    f.write_str(s)
  }
}

pub struct Router<S: CacheStorage, N: Network> {
  layer: CacheLayer<S, N>,
  origin: Origin,
  feed_host: String,
  feed_path_prefix: String,
}

impl<S: CacheStorage, N: Network> Router<S, N> {
  pub fn new(layer: CacheLayer<S, N>, config: &Config) -> Self {
    Self {
      layer,
      origin: config.origin.origin(),
      feed_host: config.data_feed.host.to_ascii_lowercase(),
      feed_path_prefix: config.data_feed.path_prefix.clone(),
    }
  }

  /// Build the cache layer from configuration and wrap it.
  pub fn from_config(storage: Arc<S>, network: Arc<N>, config: &Config) -> Result<Self> {
    let layer = CacheLayer::new(storage, network, config.root_document_url()?)
      .with_race_timeout(config.race_timeout())
      .with_background_refresh(config.cross_origin.background_refresh);
    Ok(Self::new(layer, config))
  }

  /// First match wins. Navigation is checked before any origin comparison:
  /// a same-origin document needs network-first freshness, not cache-first.
  pub fn classify(&self, request: &Request) -> RequestClass {
    if !request.is_get() {
      RequestClass::Passthrough
    } else if request.is_navigation()
      || request.destination == Destination::Document
      || looks_like_document(request.url.path())
    {
      RequestClass::Navigation
    } else if self.is_data_feed(request) {
      RequestClass::UpstreamData
    } else if request.url.origin() != self.origin {
      RequestClass::CrossOrigin
    } else {
      RequestClass::SameOrigin
    }
  }

  fn is_data_feed(&self, request: &Request) -> bool {
    request
      .url
      .host_str()
      .is_some_and(|host| host.eq_ignore_ascii_case(&self.feed_host))
      && request.url.path().starts_with(&self.feed_path_prefix)
  }

  /// Serve a request against the given generation.
  pub async fn dispatch(
    &self,
    tag: &GenerationTag,
    request: &Request,
  ) -> Result<CacheResult<Response>, FetchError> {
    let class = self.classify(request);
    debug!("{} classified as {} (generation {})", request, class, tag);

    match class {
      RequestClass::Passthrough => self.layer.passthrough(request).await,
      RequestClass::Navigation => self.layer.network_first(tag, request).await,
      RequestClass::UpstreamData => self.layer.race_with_timeout(tag, request).await,
      RequestClass::CrossOrigin => self.layer.cache_first(tag, request).await,
      RequestClass::SameOrigin => self.layer.cache_first_conditional(tag, request).await,
    }
  }
}

fn looks_like_document(path: &str) -> bool {
  let path = path.to_ascii_lowercase();
  path.ends_with(".html") || path.ends_with(".htm")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, GenerationManager, SqliteStorage};
  use crate::testing::{url, MockNetwork, ORIGIN};
  use std::time::Duration;
  use tokio::time::Instant;

  const FEED: &str = "https://docs.google.com/spreadsheets/d/e/2PACX/pub?output=csv";

  fn config() -> Config {
    Config::from_yaml(&format!("origin: {}", ORIGIN)).unwrap()
  }

  fn router() -> (
    Arc<SqliteStorage>,
    Arc<MockNetwork>,
    Router<SqliteStorage, MockNetwork>,
  ) {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = Arc::new(MockNetwork::new());
    let router = Router::from_config(Arc::clone(&storage), Arc::clone(&network), &config()).unwrap();
    (storage, network, router)
  }

  #[test]
  fn test_classification_order() {
    let (_, _, r) = router();

    assert_eq!(r.classify(&Request::navigate(url("/"))), RequestClass::Navigation);
    assert_eq!(
      r.classify(&Request::get(url("/docs/guide.HTML"))),
      RequestClass::Navigation
    );
    assert_eq!(
      r.classify(&Request::get(url("/x")).with_destination(Destination::Document)),
      RequestClass::Navigation
    );
    assert_eq!(r.classify(&Request::get(url(FEED))), RequestClass::UpstreamData);
    assert_eq!(
      r.classify(&Request::get(url("https://fonts.gstatic.com/s/inter.woff2"))),
      RequestClass::CrossOrigin
    );
    assert_eq!(r.classify(&Request::get(url("/app.js"))), RequestClass::SameOrigin);
    assert_eq!(
      r.classify(&Request::get(url("/api/vote")).with_method("POST")),
      RequestClass::Passthrough
    );
  }

  #[test]
  fn test_navigation_wins_over_feed_and_origin() {
    let (_, _, r) = router();
    assert_eq!(r.classify(&Request::navigate(url(FEED))), RequestClass::Navigation);
    assert_eq!(
      r.classify(&Request::navigate(url("https://elsewhere.example.org/"))),
      RequestClass::Navigation
    );
  }

  #[test]
  fn test_feed_host_outside_prefix_is_cross_origin() {
    let (_, _, r) = router();
    assert_eq!(
      r.classify(&Request::get(url("https://docs.google.com/forms/d/abc"))),
      RequestClass::CrossOrigin
    );
  }

  #[test]
  fn test_other_port_is_cross_origin() {
    let (_, _, r) = router();
    assert_eq!(
      r.classify(&Request::get(url("https://app.example.com:8443/app.js"))),
      RequestClass::CrossOrigin
    );
  }

  #[tokio::test]
  async fn test_installed_seed_served_without_network() {
    let (storage, network, router) = router();
    let config = config();
    for seed in &config.seed {
      network.respond(seed, Response::new(200, format!("seed {}", seed)));
    }

    let manager = GenerationManager::new(
      Arc::clone(&storage),
      Arc::clone(&network),
      config.origin.clone(),
    );
    let tag = GenerationTag::new("v1");
    manager.begin_install(&tag, &config.seed).await.unwrap();
    manager.activate(&tag).unwrap();
    let current = manager.current_tag().unwrap().unwrap();
    assert_eq!(current, tag);

    let calls_after_install = network.calls();
    network.set_offline(true);

    let result = router
      .dispatch(&current, &Request::get(url("/styles.css")))
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(result.data.body, b"seed /styles.css");
    assert_eq!(network.calls(), calls_after_install);
  }

  #[tokio::test]
  async fn test_offline_navigation_served_from_seeded_root() {
    let (storage, network, router) = router();
    let config = config();
    for seed in &config.seed {
      network.respond(seed, Response::new(200, format!("seed {}", seed)));
    }
    let manager = GenerationManager::new(Arc::clone(&storage), Arc::clone(&network), config.origin);
    let tag = GenerationTag::new("v1");
    manager.begin_install(&tag, &config.seed).await.unwrap();
    manager.activate(&tag).unwrap();
    network.set_offline(true);

    let result = router
      .dispatch(&tag, &Request::navigate(url("/profile/42")))
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::Fallback);
    assert_eq!(result.data.body, b"seed /");
  }

  #[tokio::test(start_paused = true)]
  async fn test_slow_feed_served_from_cache_at_deadline() {
    let (_, network, router) = router();
    let tag = GenerationTag::new("v1");
    let feed = Request::get(url(FEED));

    network.respond(FEED, Response::new(200, "rows: 1"));
    let first = router.dispatch(&tag, &feed).await.unwrap();
    assert_eq!(first.source, CacheSource::Network);

    network.respond_after(FEED, Response::new(200, "rows: 2"), Duration::from_secs(10));
    let start = Instant::now();
    let second = router.dispatch(&tag, &feed).await.unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_secs(8) && elapsed < Duration::from_secs(9));
    assert_eq!(second.source, CacheSource::Offline);
    assert_eq!(second.data.body, b"rows: 1");
  }

  #[tokio::test]
  async fn test_strategy_reads_only_the_given_generation() {
    let (storage, network, router) = router();
    let req = Request::get(url("/app.js"));
    storage
      .put("v1:static-assets", &req.cache_key(), &Response::new(200, "old"))
      .unwrap();
    network.respond("/app.js", Response::new(200, "new"));

    let result = router
      .dispatch(&GenerationTag::new("v2"), &req)
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data.body, b"new");
  }
}
