//! Versioned cache generations: seeding a pending generation and reaping
//! stale ones.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use super::storage::CacheStorage;
use super::traits::{GenerationTag, StoreRole};
use crate::error::InstallError;
use crate::net::{Network, Request};

/// Owns the set of generation-scoped stores.
///
/// Only one manager should drive installs for a given store at a time;
/// concurrent installs of different tags are not coordinated here.
pub struct GenerationManager<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  origin: Url,
}

impl<S: CacheStorage, N: Network> GenerationManager<S, N> {
  pub fn new(storage: Arc<S>, network: Arc<N>, origin: Url) -> Self {
    Self {
      storage,
      network,
      origin,
    }
  }

  /// Fetch every mandatory key and write them into `{tag}:static-assets`.
  ///
  /// All seeds are fetched before anything is written, and the write is a
  /// single batch, so a failure leaves the store exactly as it was.
  pub async fn begin_install(
    &self,
    tag: &GenerationTag,
    mandatory_keys: &[String],
  ) -> Result<usize, InstallError> {
    let store = tag.store_name(StoreRole::StaticAssets);
    info!(
      "Installing generation {} with {} seed keys",
      tag,
      mandatory_keys.len()
    );

    let requests = mandatory_keys
      .iter()
      .map(|key| {
        self
          .origin
          .join(key)
          .map(|url| (key.as_str(), Request::get(url)))
          .map_err(|e| InstallError::InvalidKey {
            key: key.clone(),
            reason: e.to_string(),
          })
      })
      .collect::<Result<Vec<_>, _>>()?;

    let fetches = requests.iter().map(|(key, request)| async move {
      let response = self
        .network
        .fetch(request)
        .await
        .map_err(|source| InstallError::Fetch {
          key: key.to_string(),
          source,
        })?;

      if !response.ok() {
        return Err(InstallError::BadStatus {
          key: key.to_string(),
          status: response.status,
        });
      }

      Ok((request.cache_key(), response))
    });

    let entries = futures::future::try_join_all(fetches)
      .await
      .inspect_err(|e| warn!("Install of {} abandoned: {}", tag, e))?;

    self
      .storage
      .put_batch(&store, &entries)
      .map_err(|e| InstallError::Store {
        tag: tag.to_string(),
        reason: format!("{:#}", e),
      })?;

    info!("Generation {} seeded ({} entries)", tag, entries.len());
    Ok(entries.len())
  }

  /// Make `tag` current and delete every store that does not belong to it.
  ///
  /// Recording the tag is the commit point: when it fails nothing has
  /// changed. A stale store that fails to delete after that is logged and
  /// left for the next activation. Returns the names of the deleted stores.
  /// Call only after a successful install of `tag`.
  pub fn activate(&self, tag: &GenerationTag) -> Result<Vec<String>> {
    self.storage.set_current_generation(tag.as_str())?;

    let names = match self.storage.store_names() {
      Ok(names) => names,
      Err(e) => {
        warn!("Generation {} is current but stores could not be listed: {:#}", tag, e);
        return Ok(Vec::new());
      }
    };

    let mut reaped = Vec::new();
    for name in names.into_iter().filter(|name| !tag.owns(name)) {
      match self.storage.delete_store(&name) {
        Ok(_) => {
          info!("Reaped stale store {}", name);
          reaped.push(name);
        }
        Err(e) => warn!("Failed to reap stale store {}: {:#}", name, e),
      }
    }

    Ok(reaped)
  }

  /// Remember `tag` as installed and waiting, so a later run can resume it.
  pub fn mark_waiting(&self, tag: &GenerationTag) -> Result<()> {
    self.storage.set_waiting_generation(Some(tag.as_str()))
  }

  pub fn waiting_tag(&self) -> Result<Option<GenerationTag>> {
    Ok(self.storage.waiting_generation()?.map(GenerationTag::new))
  }

  /// The tag most recently activated.
  pub fn current_tag(&self) -> Result<Option<GenerationTag>> {
    Ok(self.storage.current_generation()?.map(GenerationTag::new))
  }

  /// Names of all stores currently present.
  pub fn generations(&self) -> Result<Vec<String>> {
    self.storage.store_names()
  }
}
