//! Generation-scoped response cache.
//!
//! This module provides the durable side of the interception layer:
//! - Stores named `{generation}:{role}` holding response representations
//! - Atomic seeding of a pending generation and reaping of stale ones
//! - The four fetch strategies that combine store lookups with network fetches

mod generation;
mod layer;
mod storage;
mod traits;

pub use generation::GenerationManager;
pub use layer::{CacheLayer, DEFAULT_RACE_TIMEOUT};
pub use storage::{CacheStorage, SqliteStorage};
pub use traits::{CacheResult, GenerationTag, StoreRole};

#[cfg(test)]
pub use storage::CachedEntry;
#[cfg(test)]
pub use traits::CacheSource;
