//! Cache layer that orchestrates caching logic with network fetching.
//!
//! Each strategy takes the current generation explicitly so the same layer can
//! serve whichever generation the lifecycle has made current.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use url::Url;

use super::storage::{CacheStorage, CachedEntry};
use super::traits::{CacheResult, GenerationTag, StoreRole};
use crate::error::FetchError;
use crate::net::{Network, RedirectMode, Request, Response};

/// Fixed race deadline for the upstream data feed.
pub const DEFAULT_RACE_TIMEOUT: Duration = Duration::from_millis(8000);

type Served = Result<CacheResult<Response>, FetchError>;

/// Cache layer that manages caching logic and network fetching.
///
/// This layer sits between the application and the network client,
/// providing transparent caching with offline support.
pub struct CacheLayer<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  /// Key served when a document is requested offline and not cached
  root_key: String,
  race_timeout: Duration,
  /// Refetch cross-origin hits in the background
  background_refresh: bool,
}

impl<S: CacheStorage, N: Network> CacheLayer<S, N> {
  pub fn new(storage: Arc<S>, network: Arc<N>, root_document: Url) -> Self {
    Self {
      storage,
      network,
      root_key: Request::get(root_document).cache_key(),
      race_timeout: DEFAULT_RACE_TIMEOUT,
      background_refresh: false,
    }
  }

  pub fn with_race_timeout(mut self, race_timeout: Duration) -> Self {
    self.race_timeout = race_timeout;
    self
  }

  pub fn with_background_refresh(mut self, background_refresh: bool) -> Self {
    self.background_refresh = background_refresh;
    self
  }

  /// Read failures are treated as misses so a broken store never takes the
  /// page down with it.
  fn lookup(&self, store: &str, key: &str) -> Option<CachedEntry> {
    match self.storage.get(store, key) {
      Ok(entry) => entry,
      Err(e) => {
        warn!("Cache read of {} in {} failed: {:#}", key, store, e);
        None
      }
    }
  }

  /// Network-first, for documents.
  ///
  /// 1. Fetch from network; store a copy of an ok response
  /// 2. On network failure, serve the exact cached entry
  /// 3. Otherwise serve the root document
  /// 4. Otherwise propagate the network error
  pub async fn network_first(&self, tag: &GenerationTag, request: &Request) -> Served {
    let store = tag.store_name(StoreRole::StaticAssets);
    let key = request.cache_key();

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.ok() {
          store_entry(self.storage.as_ref(), &store, &key, &response);
        }
        Ok(CacheResult::from_network(response))
      }
      Err(error) => {
        warn!("{} failed, trying cache: {}", request, error);

        if let Some(entry) = self.lookup(&store, &key) {
          return Ok(CacheResult::offline(entry.response, entry.cached_at));
        }
        if let Some(entry) = self.lookup(&store, &self.root_key) {
          debug!("Serving root document for {}", request);
          return Ok(CacheResult::fallback(entry.response, entry.cached_at));
        }
        Err(error)
      }
    }
  }

  /// Race the network against a timer, for the upstream data feed.
  ///
  /// The fetch runs on its own task and resolves a one-shot signal. If the
  /// timer wins, the cached entry is served and the fetch keeps running: when
  /// it finishes, its store write still happens but its response is dropped.
  /// Worst-case latency is the timeout plus one store read.
  pub async fn race_with_timeout(&self, tag: &GenerationTag, request: &Request) -> Served {
    let store = tag.store_name(StoreRole::UpstreamData);
    let key = request.cache_key();
    let (tx, rx) = oneshot::channel();

    {
      let storage = Arc::clone(&self.storage);
      let network = Arc::clone(&self.network);
      let request = request.clone();
      let store = store.clone();
      let key = key.clone();

      tokio::spawn(async move {
        let result = network.fetch(&request).await;
        if let Ok(response) = &result {
          if response.ok() {
            store_entry(storage.as_ref(), &store, &key, response);
          }
        }
        if tx.send(result).is_err() {
          debug!("Late response for {} discarded", request);
        }
      });
    }

    let failure = tokio::select! {
      result = rx => match result {
        Ok(Ok(response)) => return Ok(CacheResult::from_network(response)),
        Ok(Err(error)) => error,
        Err(_) => FetchError::Aborted(request.url.to_string()),
      },
      _ = tokio::time::sleep(self.race_timeout) => {
        debug!("{} exceeded {}ms, trying cache", request, self.race_timeout.as_millis());
        match self.lookup(&store, &key) {
          Some(entry) => return Ok(CacheResult::offline(entry.response, entry.cached_at)),
          None => FetchError::Timeout(self.race_timeout),
        }
      }
    };

    warn!("{} failed: {}", request, failure);
    match self.lookup(&store, &key) {
      Some(entry) => Ok(CacheResult::offline(entry.response, entry.cached_at)),
      None => Err(failure),
    }
  }

  /// Cache-first with store-after, for cross-origin assets.
  ///
  /// 1. Hit: return immediately (optionally refilling in the background)
  /// 2. Miss: fetch; store only ok responses; return whatever came back
  pub async fn cache_first(&self, tag: &GenerationTag, request: &Request) -> Served {
    let store = tag.store_name(StoreRole::StaticAssets);
    let key = request.cache_key();

    if let Some(entry) = self.lookup(&store, &key) {
      if self.background_refresh {
        self.spawn_refill(store, key, request.clone());
      }
      return Ok(CacheResult::from_cache(entry.response, entry.cached_at));
    }

    let response = self.network.fetch(request).await?;
    if response.ok() {
      store_entry(self.storage.as_ref(), &store, &key, &response);
    }
    Ok(CacheResult::from_network(response))
  }

  /// Cache-first with a conditional store, for same-origin static assets.
  ///
  /// Only a plain, non-redirected, same-origin 200 is stored. A network error
  /// on a navigation to `/` is answered with the root document.
  pub async fn cache_first_conditional(&self, tag: &GenerationTag, request: &Request) -> Served {
    let store = tag.store_name(StoreRole::StaticAssets);
    let key = request.cache_key();

    if let Some(entry) = self.lookup(&store, &key) {
      return Ok(CacheResult::from_cache(entry.response, entry.cached_at));
    }

    let follow = request.clone().with_redirect(RedirectMode::Follow);
    match self.network.fetch(&follow).await {
      Ok(response) => {
        if response.is_plain_success() {
          store_entry(self.storage.as_ref(), &store, &key, &response);
        } else {
          debug!(
            "Not caching {} (status {}, {}, redirected: {})",
            request,
            response.status,
            response.response_type.as_str(),
            response.redirected
          );
        }
        Ok(CacheResult::from_network(response))
      }
      Err(error) => {
        if request.is_navigation() && request.url.path() == "/" {
          if let Some(entry) = self.lookup(&store, &self.root_key) {
            return Ok(CacheResult::fallback(entry.response, entry.cached_at));
          }
        }
        Err(error)
      }
    }
  }

  /// Straight to the network, never cached.
  pub async fn passthrough(&self, request: &Request) -> Served {
    self
      .network
      .fetch(request)
      .await
      .map(CacheResult::from_network)
  }

  fn spawn_refill(&self, store: String, key: String, request: Request) {
    let storage = Arc::clone(&self.storage);
    let network = Arc::clone(&self.network);

    tokio::spawn(async move {
      match network.fetch(&request).await {
        Ok(response) if response.ok() => store_entry(storage.as_ref(), &store, &key, &response),
        Ok(response) => debug!("Refill of {} got status {}", request, response.status),
        Err(e) => debug!("Refill of {} failed: {}", request, e),
      }
    });
  }
}

impl<S: CacheStorage, N: Network> Clone for CacheLayer<S, N> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      network: Arc::clone(&self.network),
      root_key: self.root_key.clone(),
      race_timeout: self.race_timeout,
      background_refresh: self.background_refresh,
    }
  }
}

/// Write failures are logged; the response is still served.
fn store_entry<S: CacheStorage>(storage: &S, store: &str, key: &str, response: &Response) {
  match storage.put(store, key, response) {
    Ok(()) => debug!("Stored {} in {}", key, store),
    Err(e) => warn!("Failed to store {} in {}: {:#}", key, store, e),
  }
}
