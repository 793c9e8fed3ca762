//! Core types shared by the store, the generation manager and the strategies.

use chrono::{DateTime, Utc};
use std::fmt;

/// Identifies one deployed build. Every store name is derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenerationTag(String);

impl GenerationTag {
  pub fn new(tag: impl Into<String>) -> Self {
    Self(tag.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Name of this generation's store for the given role.
  pub fn store_name(&self, role: StoreRole) -> String {
    format!("{}:{}", self.0, role.as_str())
  }

  /// Whether a store name belongs to this generation.
  pub fn owns(&self, store_name: &str) -> bool {
    store_name
      .rsplit_once(':')
      .is_some_and(|(tag, role)| tag == self.0 && StoreRole::parse(role).is_some())
  }
}

impl fmt::Display for GenerationTag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// What a generation-scoped store holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreRole {
  StaticAssets,
  UpstreamData,
}

impl StoreRole {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::StaticAssets => "static-assets",
      Self::UpstreamData => "upstream-data",
    }
  }

  fn parse(s: &str) -> Option<Self> {
    match s {
      "static-assets" => Some(Self::StaticAssets),
      "upstream-data" => Some(Self::UpstreamData),
      _ => None,
    }
  }
}

/// Result from a strategy, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Fresh data from the network.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Cache hit, network not consulted.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Network failed or timed out; serving what the store had.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  /// Network failed and the exact key was missing; serving the root document.
  pub fn fallback(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Fallback,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Cache hit on a cache-first strategy
  Cache,
  /// Offline mode - network unavailable or too slow, serving cached data
  Offline,
  /// Offline and the exact entry was missing; reserved root document served
  Fallback,
}

impl fmt::Display for CacheSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::Offline => "offline",
      Self::Fallback => "fallback",
    };
    f.write_str(s)
  }
}
