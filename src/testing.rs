//! Scripted collaborators for tests.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use color_eyre::{eyre::eyre, Result};
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

use crate::cache::{CacheStorage, CachedEntry, SqliteStorage};
use crate::error::FetchError;
use crate::net::{Network, RedirectMode, Request, Response};

pub const ORIGIN: &str = "https://app.example.com";

pub fn url(s: &str) -> Url {
  if s.starts_with('/') {
    Url::parse(ORIGIN).unwrap().join(s).unwrap()
  } else {
    Url::parse(s).unwrap()
  }
}

#[derive(Clone)]
struct Route {
  outcome: Result<Response, FetchError>,
  delay: Duration,
}

/// Network that answers from a route table. Unknown URLs fail like an
/// unreachable host.
#[derive(Default)]
pub struct MockNetwork {
  routes: Mutex<HashMap<String, Route>>,
  calls: Mutex<Vec<(String, RedirectMode)>>,
  count: AtomicUsize,
  offline: AtomicBool,
}

impl MockNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, target: &str, response: Response) {
    self.respond_after(target, response, Duration::ZERO);
  }

  pub fn respond_after(&self, target: &str, response: Response, delay: Duration) {
    self.routes.lock().unwrap().insert(
      url(target).to_string(),
      Route {
        outcome: Ok(response),
        delay,
      },
    );
  }

  pub fn fail(&self, target: &str) {
    let target = url(target).to_string();
    self.routes.lock().unwrap().insert(
      target.clone(),
      Route {
        outcome: Err(FetchError::network(target, "connection refused")),
        delay: Duration::ZERO,
      },
    );
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize {
    self.count.load(Ordering::SeqCst)
  }

  pub fn calls_to(&self, target: &str) -> usize {
    let target = url(target).to_string();
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|(u, _)| *u == target)
      .count()
  }

  /// Redirect mode of every request sent to `target`, in order.
  pub fn redirects_to(&self, target: &str) -> Vec<RedirectMode> {
    let target = url(target).to_string();
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|(u, _)| *u == target)
      .map(|(_, redirect)| *redirect)
      .collect()
  }
}

impl Network for MockNetwork {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response, FetchError>> + Send {
    let target = request.url.to_string();
    self.count.fetch_add(1, Ordering::SeqCst);
    self
      .calls
      .lock()
      .unwrap()
      .push((target.clone(), request.redirect));

    let route = if self.offline.load(Ordering::SeqCst) {
      None
    } else {
      self.routes.lock().unwrap().get(&target).cloned()
    };

    async move {
      match route {
        Some(route) => {
          if !route.delay.is_zero() {
            tokio::time::sleep(route.delay).await;
          }
          route.outcome
        }
        None => Err(FetchError::network(target, "network unreachable")),
      }
    }
  }
}

/// In-memory storage that can be told to fail specific writes.
pub struct FaultyStorage {
  inner: SqliteStorage,
  failing_deletes: Mutex<Vec<String>>,
  fail_set_current: AtomicBool,
}

impl FaultyStorage {
  pub fn new() -> Self {
    Self {
      inner: SqliteStorage::open_in_memory().unwrap(),
      failing_deletes: Mutex::new(Vec::new()),
      fail_set_current: AtomicBool::new(false),
    }
  }

  pub fn fail_delete_of(&self, store: &str) {
    self.failing_deletes.lock().unwrap().push(store.to_string());
  }

  pub fn fail_set_current(&self, fail: bool) {
    self.fail_set_current.store(fail, Ordering::SeqCst);
  }
}

impl CacheStorage for FaultyStorage {
  fn open_store(&self, name: &str) -> Result<()> {
    self.inner.open_store(name)
  }

  fn put(&self, store: &str, key: &str, response: &Response) -> Result<()> {
    self.inner.put(store, key, response)
  }

  fn put_batch(&self, store: &str, entries: &[(String, Response)]) -> Result<()> {
    self.inner.put_batch(store, entries)
  }

  fn get(&self, store: &str, key: &str) -> Result<Option<CachedEntry>> {
    self.inner.get(store, key)
  }

  fn delete(&self, store: &str, key: &str) -> Result<bool> {
    self.inner.delete(store, key)
  }

  fn keys(&self, store: &str, url_prefix: &str) -> Result<Vec<String>> {
    self.inner.keys(store, url_prefix)
  }

  fn store_names(&self) -> Result<Vec<String>> {
    self.inner.store_names()
  }

  fn delete_store(&self, name: &str) -> Result<bool> {
    if self.failing_deletes.lock().unwrap().iter().any(|n| n == name) {
      return Err(eyre!("disk I/O error deleting {}", name));
    }
    self.inner.delete_store(name)
  }

  fn current_generation(&self) -> Result<Option<String>> {
    self.inner.current_generation()
  }

  fn set_current_generation(&self, tag: &str) -> Result<()> {
    if self.fail_set_current.load(Ordering::SeqCst) {
      return Err(eyre!("disk I/O error recording {}", tag));
    }
    self.inner.set_current_generation(tag)
  }

  fn waiting_generation(&self) -> Result<Option<String>> {
    self.inner.waiting_generation()
  }

  fn set_waiting_generation(&self, tag: Option<&str>) -> Result<()> {
    self.inner.set_waiting_generation(tag)
  }
}
