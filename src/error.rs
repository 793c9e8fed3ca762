//! Error types callers need to branch on.
//!
//! Everything else propagates as `color_eyre::Report`.

use std::time::Duration;
use thiserror::Error;

/// Failure to produce a response for an intercepted request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
  #[error("network request for {url} failed: {reason}")]
  Network { url: String, reason: String },

  #[error("upstream did not answer within {}ms and nothing is cached", .0.as_millis())]
  Timeout(Duration),

  /// The network task ended without reporting a result
  #[error("network task for {0} was dropped")]
  Aborted(String),
}

impl FetchError {
  pub fn network(url: impl ToString, reason: impl ToString) -> Self {
    Self::Network {
      url: url.to_string(),
      reason: reason.to_string(),
    }
  }
}

/// A failed install. The pending generation is discarded.
#[derive(Debug, Error)]
pub enum InstallError {
  #[error("seed key {key} could not be fetched: {source}")]
  Fetch {
    key: String,
    #[source]
    source: FetchError,
  },

  #[error("seed key {key} returned status {status}")]
  BadStatus { key: String, status: u16 },

  #[error("seed key {key} is not a valid URL: {reason}")]
  InvalidKey { key: String, reason: String },

  #[error("failed to write generation {tag}: {reason}")]
  Store { tag: String, reason: String },
}

#[derive(Debug, Error)]
pub enum LifecycleError {
  #[error("install failed: {0}")]
  Install(#[from] InstallError),

  #[error("no agent is waiting to activate")]
  NothingWaiting,

  #[error("no agent is active")]
  NothingActive,

  #[error("failed to activate generation {tag}: {reason}")]
  Activation { tag: String, reason: String },
}
