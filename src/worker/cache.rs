//! Named response buckets.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::db::Database;

use super::types::{CachedResponse, Request, ResponseKind};

/// Trait for response bucket backends.
pub trait HttpCache: Send + Sync {
  /// Create `bucket` if it does not exist yet.
  fn open(&self, bucket: &str) -> Result<()>;

  /// Store `response` for `request` in `bucket`, replacing any previous one.
  fn put(&self, bucket: &str, request: &Request, response: &CachedResponse) -> Result<()>;

  /// Stored response for `request` in `bucket`.
  fn match_request(&self, bucket: &str, request: &Request) -> Result<Option<CachedResponse>>;

  /// Names of all existing buckets.
  fn bucket_names(&self) -> Result<Vec<String>>;

  /// Delete `bucket` and its contents. Returns false if it did not exist.
  fn delete_bucket(&self, bucket: &str) -> Result<bool>;
}

/// In-process bucket store.
#[derive(Default)]
pub struct MemoryHttpCache {
  buckets: Mutex<BTreeMap<String, BTreeMap<String, CachedResponse>>>,
}

impl MemoryHttpCache {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(
    &self,
  ) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, BTreeMap<String, CachedResponse>>>> {
    self
      .buckets
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl HttpCache for MemoryHttpCache {
  fn open(&self, bucket: &str) -> Result<()> {
    self.lock()?.entry(bucket.to_string()).or_default();
    Ok(())
  }

  fn put(&self, bucket: &str, request: &Request, response: &CachedResponse) -> Result<()> {
    self
      .lock()?
      .entry(bucket.to_string())
      .or_default()
      .insert(request.cache_key(), response.clone());
    Ok(())
  }

  fn match_request(&self, bucket: &str, request: &Request) -> Result<Option<CachedResponse>> {
    Ok(
      self
        .lock()?
        .get(bucket)
        .and_then(|b| b.get(&request.cache_key()))
        .cloned(),
    )
  }

  fn bucket_names(&self) -> Result<Vec<String>> {
    Ok(self.lock()?.keys().cloned().collect())
  }

  fn delete_bucket(&self, bucket: &str) -> Result<bool> {
    Ok(self.lock()?.remove(bucket).is_some())
  }
}

/// SQLite-backed bucket store sharing the application database.
#[derive(Clone)]
pub struct SqliteHttpCache {
  db: Database,
}

impl SqliteHttpCache {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

impl HttpCache for SqliteHttpCache {
  fn open(&self, bucket: &str) -> Result<()> {
    let conn = self.db.conn()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO http_buckets (name) VALUES (?)",
        params![bucket],
      )
      .map_err(|e| eyre!("Failed to open bucket {}: {}", bucket, e))?;
    Ok(())
  }

  fn put(&self, bucket: &str, request: &Request, response: &CachedResponse) -> Result<()> {
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let conn = self.db.conn()?;
    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let result = conn
      .execute(
        "INSERT OR IGNORE INTO http_buckets (name) VALUES (?)",
        params![bucket],
      )
      .and_then(|_| {
        conn.execute(
          "INSERT OR REPLACE INTO http_cache (bucket, request_hash, url, status, headers, body, kind, cached_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
          params![
            bucket,
            request.cache_key(),
            request.url.as_str(),
            response.status,
            headers,
            response.body,
            response.kind.as_str()
          ],
        )
      });

    match result {
      Ok(_) => {
        conn
          .execute("COMMIT", [])
          .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
        Ok(())
      }
      Err(e) => {
        let _ = conn.execute("ROLLBACK", []);
        Err(eyre!("Failed to store response for {}: {}", request.url, e))
      }
    }
  }

  fn match_request(&self, bucket: &str, request: &Request) -> Result<Option<CachedResponse>> {
    let conn = self.db.conn()?;
    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, kind FROM http_cache
         WHERE bucket = ? AND request_hash = ?",
        params![bucket, request.cache_key()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query bucket {}: {}", bucket, e))?;

    match row {
      Some((status, headers, body, kind)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to parse cached headers: {}", e))?;
        Ok(Some(CachedResponse {
          status,
          headers,
          body,
          kind: ResponseKind::parse(&kind),
        }))
      }
      None => Ok(None),
    }
  }

  fn bucket_names(&self) -> Result<Vec<String>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM http_buckets ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list buckets: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }

  fn delete_bucket(&self, bucket: &str) -> Result<bool> {
    let conn = self.db.conn()?;
    conn
      .execute("DELETE FROM http_cache WHERE bucket = ?", params![bucket])
      .map_err(|e| eyre!("Failed to clear bucket {}: {}", bucket, e))?;
    let removed = conn
      .execute("DELETE FROM http_buckets WHERE name = ?", params![bucket])
      .map_err(|e| eyre!("Failed to delete bucket {}: {}", bucket, e))?;
    Ok(removed > 0)
  }
}
