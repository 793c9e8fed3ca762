//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::net::{Response, ResponseType};

/// A single cached response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
  /// The stored response representation
  pub response: Response,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Entries live in named stores. Keys are normalized request identities
/// (`"GET https://host/path?query"`).
pub trait CacheStorage: Send + Sync + 'static {
  /// Create the named store if it does not exist.
  #[allow(dead_code)]
  fn open_store(&self, name: &str) -> Result<()>;

  /// Insert or overwrite an entry, creating the store if needed.
  fn put(&self, store: &str, key: &str, response: &Response) -> Result<()>;

  /// Write all entries in one transaction. Either every entry lands or none do.
  fn put_batch(&self, store: &str, entries: &[(String, Response)]) -> Result<()>;

  /// Look up an entry by key.
  fn get(&self, store: &str, key: &str) -> Result<Option<CachedEntry>>;

  /// Evict a single entry. Returns whether it existed.
  fn delete(&self, store: &str, key: &str) -> Result<bool>;

  /// Keys in a store whose request URL starts with `url_prefix`.
  fn keys(&self, store: &str, url_prefix: &str) -> Result<Vec<String>>;

  /// Names of all existing stores.
  fn store_names(&self) -> Result<Vec<String>>;

  /// Drop a store and all its entries. Returns whether it existed.
  fn delete_store(&self, name: &str) -> Result<bool>;

  /// The generation tag most recently marked current.
  fn current_generation(&self) -> Result<Option<String>>;

  /// Mark `tag` current. A waiting marker naming `tag` is cleared in the
  /// same write.
  fn set_current_generation(&self, tag: &str) -> Result<()>;

  /// The installed generation waiting to become current, if any.
  fn waiting_generation(&self) -> Result<Option<String>>;

  fn set_waiting_generation(&self, tag: Option<&str>) -> Result<()>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the store at `path`, or at the default location when `None`.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a throwaway in-memory store.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("cachegate").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_stores (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per (store, request identity)
CREATE TABLE IF NOT EXISTS cache_entries (
    store TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    request_key TEXT NOT NULL,
    request_url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    response_url TEXT NOT NULL,
    response_type TEXT NOT NULL,
    redirected INTEGER NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (store, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_url
    ON cache_entries(store, request_url);

CREATE TABLE IF NOT EXISTS cache_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

const CURRENT_GENERATION: &str = "current_generation";
const WAITING_GENERATION: &str = "waiting_generation";

/// SHA256 of the request key for a stable, fixed-length primary key.
fn key_hash(key: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(key.as_bytes());
  hex::encode(hasher.finalize())
}

/// The URL half of a `"METHOD URL"` key.
fn request_url(key: &str) -> &str {
  key.split_once(' ').map(|(_, url)| url).unwrap_or(key)
}

fn ensure_store(conn: &Connection, name: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
      params![name],
    )
    .map_err(|e| eyre!("Failed to create store {}: {}", name, e))?;
  Ok(())
}

fn insert_entry(conn: &Connection, store: &str, key: &str, response: &Response) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries
         (store, key_hash, request_key, request_url, status, status_text, headers, body,
          response_url, response_type, redirected, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        store,
        key_hash(key),
        key,
        request_url(key),
        response.status,
        response.status_text,
        headers,
        response.body,
        response.url,
        response.response_type.as_str(),
        response.redirected,
      ],
    )
    .map_err(|e| eyre!("Failed to store entry {}: {}", key, e))?;

  Ok(())
}

type EntryRow = (u16, String, String, Vec<u8>, String, String, bool, String);

fn entry_from_row(row: EntryRow) -> Result<CachedEntry> {
  let (status, status_text, headers, body, url, response_type, redirected, cached_at) = row;

  let headers: Vec<(String, String)> =
    serde_json::from_str(&headers).map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
  let response_type: ResponseType = response_type.parse().map_err(|e: String| eyre!(e))?;

  Ok(CachedEntry {
    response: Response {
      status,
      status_text,
      headers,
      body,
      url,
      response_type,
      redirected,
    },
    cached_at: parse_datetime(&cached_at)?,
  })
}

impl CacheStorage for SqliteStorage {
  fn open_store(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;
    ensure_store(&conn, name)
  }

  fn put(&self, store: &str, key: &str, response: &Response) -> Result<()> {
    let conn = self.lock()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_store(&tx, store)?;
    insert_entry(&tx, store, key, response)?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn put_batch(&self, store: &str, entries: &[(String, Response)]) -> Result<()> {
    let conn = self.lock()?;
    // Dropping the transaction on an early return rolls everything back
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_store(&tx, store)?;
    for (key, response) in entries {
      insert_entry(&tx, store, key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn get(&self, store: &str, key: &str) -> Result<Option<CachedEntry>> {
    let conn = self.lock()?;

    let row: Option<EntryRow> = conn
      .query_row(
        "SELECT status, status_text, headers, body, response_url, response_type, redirected, cached_at
         FROM cache_entries WHERE store = ? AND key_hash = ?",
        params![store, key_hash(key)],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to read entry {}: {}", key, e))?;

    row.map(entry_from_row).transpose()
  }

  fn delete(&self, store: &str, key: &str) -> Result<bool> {
    let removed = self
      .lock()?
      .execute(
        "DELETE FROM cache_entries WHERE store = ? AND key_hash = ?",
        params![store, key_hash(key)],
      )
      .map_err(|e| eyre!("Failed to delete entry {}: {}", key, e))?;

    Ok(removed > 0)
  }

  fn keys(&self, store: &str, url_prefix: &str) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT request_key FROM cache_entries
         WHERE store = ? AND substr(request_url, 1, ?) = ?
         ORDER BY request_key",
      )
      .map_err(|e| eyre!("Failed to prepare key query: {}", e))?;

    let keys = stmt
      .query_map(
        params![store, url_prefix.chars().count(), url_prefix],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to list keys: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read key: {}", e))?;

    Ok(keys)
  }

  fn store_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_stores ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare store query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list stores: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read store name: {}", e))?;

    Ok(names)
  }

  fn delete_store(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM cache_entries WHERE store = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    let removed = tx
      .execute("DELETE FROM cache_stores WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete store {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(removed > 0)
  }

  fn current_generation(&self) -> Result<Option<String>> {
    let conn = self.lock()?;
    read_meta(&conn, CURRENT_GENERATION)
  }

  fn set_current_generation(&self, tag: &str) -> Result<()> {
    let conn = self.lock()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR REPLACE INTO cache_meta (key, value) VALUES (?, ?)",
      params![CURRENT_GENERATION, tag],
    )
    .map_err(|e| eyre!("Failed to record current generation: {}", e))?;
    tx.execute(
      "DELETE FROM cache_meta WHERE key = ? AND value = ?",
      params![WAITING_GENERATION, tag],
    )
    .map_err(|e| eyre!("Failed to clear waiting generation: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn waiting_generation(&self) -> Result<Option<String>> {
    let conn = self.lock()?;
    read_meta(&conn, WAITING_GENERATION)
  }

  fn set_waiting_generation(&self, tag: Option<&str>) -> Result<()> {
    let conn = self.lock()?;
    match tag {
      Some(tag) => conn.execute(
        "INSERT OR REPLACE INTO cache_meta (key, value) VALUES (?, ?)",
        params![WAITING_GENERATION, tag],
      ),
      None => conn.execute(
        "DELETE FROM cache_meta WHERE key = ?",
        params![WAITING_GENERATION],
      ),
    }
    .map_err(|e| eyre!("Failed to record waiting generation: {}", e))?;
    Ok(())
  }
}

fn read_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
  conn
    .query_row(
      "SELECT value FROM cache_meta WHERE key = ?",
      params![key],
      |row| row.get(0),
    )
    .optional()
    .map_err(|e| eyre!("Failed to read {}: {}", key, e))
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
