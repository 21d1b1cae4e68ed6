//! Durable queue of offline writes, replayed when a sync event fires.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use crate::db::Database;
use crate::worker::{Request, Transport};

/// Tag for queued product scans.
pub const SYNC_SCANS_TAG: &str = "sync-scans";

/// A write waiting for the network.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedItem {
  pub id: i64,
  pub tag: String,
  pub payload: Value,
  pub queued_at: DateTime<Utc>,
}

/// FIFO queue stored in the application database.
#[derive(Clone)]
pub struct SyncQueue {
  db: Database,
}

impl SyncQueue {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  /// Append `payload` under `tag`, returning its id.
  pub fn enqueue(&self, tag: &str, payload: &Value) -> Result<i64> {
    let payload =
      serde_json::to_string(payload).map_err(|e| eyre!("Failed to serialize payload: {}", e))?;
    let conn = self.db.conn()?;
    conn
      .execute(
        "INSERT INTO sync_queue (tag, payload, queued_at) VALUES (?, ?, ?)",
        params![tag, payload, Utc::now().to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to enqueue {} item: {}", tag, e))?;
    Ok(conn.last_insert_rowid())
  }

  /// Items queued under `tag`, oldest first.
  pub fn pending(&self, tag: &str) -> Result<Vec<QueuedItem>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT id, tag, payload, queued_at FROM sync_queue WHERE tag = ? ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(i64, String, String, String)> = stmt
      .query_map(params![tag], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .map_err(|e| eyre!("Failed to query sync queue: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let mut items = Vec::with_capacity(rows.len());
    let mut unreadable = Vec::new();
    for (id, tag, payload, queued_at) in rows {
      let payload = match serde_json::from_str(&payload) {
        Ok(payload) => payload,
        Err(e) => {
          warn!("Dropping unreadable queued item {}: {}", id, e);
          unreadable.push(id);
          continue;
        }
      };
      let queued_at = match DateTime::parse_from_rfc3339(&queued_at) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(e) => {
          warn!("Dropping queued item {} with bad timestamp '{}': {}", id, queued_at, e);
          unreadable.push(id);
          continue;
        }
      };
      items.push(QueuedItem {
        id,
        tag,
        payload,
        queued_at,
      });
    }

    // Unreadable rows can never be replayed; leaving them would log forever.
    drop(stmt);
    for id in unreadable {
      if let Err(e) = conn.execute("DELETE FROM sync_queue WHERE id = ?", params![id]) {
        warn!("Failed to drop unreadable queued item {}: {}", id, e);
      }
    }

    Ok(items)
  }

  pub fn remove(&self, id: i64) -> Result<()> {
    let conn = self.db.conn()?;
    conn
      .execute("DELETE FROM sync_queue WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove queued item {}: {}", id, e))?;
    Ok(())
  }
}

/// User-facing notification raised by a sync.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub tag: String,
}

/// Outcome of one sync event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SyncReport {
  pub synced: usize,
  pub remaining: usize,
}

/// Replays queued writes against the API.
pub struct BackgroundSync<T: Transport> {
  queue: SyncQueue,
  transport: Arc<T>,
  scans_url: Url,
  notifications: mpsc::UnboundedSender<Notification>,
}

impl<T: Transport> BackgroundSync<T> {
  /// `scans_url` receives one POST per queued scan.
  pub fn new(
    queue: SyncQueue,
    transport: Arc<T>,
    scans_url: Url,
  ) -> (Self, mpsc::UnboundedReceiver<Notification>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
      Self {
        queue,
        transport,
        scans_url,
        notifications: tx,
      },
      rx,
    )
  }

  /// Handle a sync event. Unknown tags are ignored.
  pub async fn handle(&self, tag: &str) -> Result<SyncReport> {
    match tag {
      SYNC_SCANS_TAG => self.sync_scans().await,
      other => {
        debug!("Ignoring sync event for unknown tag {}", other);
        Ok(SyncReport::default())
      }
    }
  }

  /// Send queued scans oldest first, stopping at the first failure so
  /// ordering is kept for the next attempt.
  async fn sync_scans(&self) -> Result<SyncReport> {
    let pending = self.queue.pending(SYNC_SCANS_TAG)?;
    let mut synced = 0;

    for item in &pending {
      let request = Request::post_json(self.scans_url.clone(), &item.payload)?;
      match self.transport.fetch(&request).await {
        Ok(response) if response.is_success() => {
          synced += 1;
          // Delivered but still queued; the next run may resend it.
          if let Err(e) = self.queue.remove(item.id) {
            warn!("Sent queued scan {} but could not remove it: {}", item.id, e);
            break;
          }
        }
        Ok(response) => {
          warn!(
            "Server rejected queued scan {} with status {}",
            item.id, response.status
          );
          break;
        }
        Err(e) => {
          warn!("Failed to sync queued scan {}: {}", item.id, e);
          break;
        }
      }
    }

    let report = SyncReport {
      synced,
      remaining: pending.len() - synced,
    };

    if synced > 0 {
      info!("Synced {} offline scans", synced);
      let notification = Notification {
        title: "Sync complete".into(),
        body: format!("{} scans synced", synced),
        tag: SYNC_SCANS_TAG.into(),
      };
      if self.notifications.send(notification).is_err() {
        debug!("No notification listener");
      }
    }

    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::worker::CachedResponse;
  use futures::future::BoxFuture;
  use serde_json::json;
  use std::sync::Mutex;

  enum Refusal {
    Unreachable,
    Status(u16),
  }

  /// Accepts the first `accept` requests, then refuses.
  struct Api {
    accept: usize,
    refusal: Refusal,
    received: Mutex<Vec<Value>>,
    // Dropped after the first delivery to make removal fail.
    drop_queue_of: Option<Database>,
  }

  impl Api {
    fn accepting(accept: usize) -> Arc<Self> {
      Arc::new(Self {
        accept,
        refusal: Refusal::Unreachable,
        received: Mutex::new(Vec::new()),
        drop_queue_of: None,
      })
    }

    fn rejecting_after(accept: usize, status: u16) -> Arc<Self> {
      Arc::new(Self {
        accept,
        refusal: Refusal::Status(status),
        received: Mutex::new(Vec::new()),
        drop_queue_of: None,
      })
    }

    fn dropping_queue_of(db: Database) -> Arc<Self> {
      Arc::new(Self {
        accept: usize::MAX,
        refusal: Refusal::Unreachable,
        received: Mutex::new(Vec::new()),
        drop_queue_of: Some(db),
      })
    }
  }

  impl Transport for Api {
    fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<CachedResponse>> {
      Box::pin(async move {
        let mut received = self.received.lock().unwrap();
        if received.len() >= self.accept {
          return match self.refusal {
            Refusal::Unreachable => Err(eyre!("network unreachable")),
            Refusal::Status(status) => Ok(CachedResponse::new(status, "{}")),
          };
        }
        let body = request.body.as_deref().unwrap_or_default();
        received.push(serde_json::from_slice(body).unwrap());
        if let Some(db) = &self.drop_queue_of {
          db.conn().unwrap().execute("DROP TABLE sync_queue", []).unwrap();
        }
        Ok(CachedResponse::new(201, "{}"))
      })
    }
  }

  fn scans_url() -> Url {
    Url::parse("http://localhost:5000/api/scans").unwrap()
  }

  fn queue_with(codes: &[&str]) -> SyncQueue {
    let queue = SyncQueue::new(Database::in_memory().unwrap());
    for code in codes {
      queue
        .enqueue(SYNC_SCANS_TAG, &json!({ "code": code }))
        .unwrap();
    }
    queue
  }

  #[test]
  fn test_queue_is_fifo_per_tag() {
    let queue = queue_with(&["A", "B"]);
    queue.enqueue("other", &json!(1)).unwrap();

    let pending = queue.pending(SYNC_SCANS_TAG).unwrap();
    let codes: Vec<_> = pending.iter().map(|i| i.payload["code"].clone()).collect();
    assert_eq!(codes, vec![json!("A"), json!("B")]);

    queue.remove(pending[0].id).unwrap();
    assert_eq!(queue.pending(SYNC_SCANS_TAG).unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_sync_replays_in_order_and_notifies_once() {
    let api = Api::accepting(usize::MAX);
    let queue = queue_with(&["A", "B", "C"]);
    let (sync, mut notifications) =
      BackgroundSync::new(queue.clone(), Arc::clone(&api), scans_url());

    let report = sync.handle(SYNC_SCANS_TAG).await.unwrap();

    assert_eq!(report, SyncReport { synced: 3, remaining: 0 });
    assert_eq!(
      *api.received.lock().unwrap(),
      vec![json!({ "code": "A" }), json!({ "code": "B" }), json!({ "code": "C" })]
    );
    assert!(queue.pending(SYNC_SCANS_TAG).unwrap().is_empty());

    let notification = notifications.try_recv().unwrap();
    assert_eq!(notification.title, "Sync complete");
    assert_eq!(notification.body, "3 scans synced");
    assert!(notifications.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_sync_stops_at_first_failure() {
    let api = Api::accepting(1);
    let queue = queue_with(&["A", "B", "C"]);
    let (sync, _notifications) = BackgroundSync::new(queue.clone(), api, scans_url());

    let report = sync.handle(SYNC_SCANS_TAG).await.unwrap();

    assert_eq!(report, SyncReport { synced: 1, remaining: 2 });
    let left: Vec<_> = queue
      .pending(SYNC_SCANS_TAG)
      .unwrap()
      .into_iter()
      .map(|i| i.payload["code"].clone())
      .collect();
    assert_eq!(left, vec![json!("B"), json!("C")]);
  }

  #[tokio::test]
  async fn test_server_error_keeps_rest_of_queue() {
    let api = Api::rejecting_after(1, 500);
    let queue = queue_with(&["A", "B", "C"]);
    let (sync, mut notifications) =
      BackgroundSync::new(queue.clone(), Arc::clone(&api), scans_url());

    let report = sync.handle(SYNC_SCANS_TAG).await.unwrap();

    assert_eq!(report, SyncReport { synced: 1, remaining: 2 });
    let left: Vec<_> = queue
      .pending(SYNC_SCANS_TAG)
      .unwrap()
      .into_iter()
      .map(|i| i.payload["code"].clone())
      .collect();
    assert_eq!(left, vec![json!("B"), json!("C")]);

    let notification = notifications.try_recv().unwrap();
    assert_eq!(notification.body, "1 scans synced");
    assert!(notifications.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_failed_removal_stops_sync_and_still_reports() {
    let db = Database::in_memory().unwrap();
    let queue = SyncQueue::new(db.clone());
    for code in ["A", "B", "C"] {
      queue.enqueue(SYNC_SCANS_TAG, &json!({ "code": code })).unwrap();
    }
    let api = Api::dropping_queue_of(db);
    let (sync, mut notifications) = BackgroundSync::new(queue, Arc::clone(&api), scans_url());

    let report = sync.handle(SYNC_SCANS_TAG).await.unwrap();

    assert_eq!(report, SyncReport { synced: 1, remaining: 2 });
    assert_eq!(api.received.lock().unwrap().len(), 1);
    assert_eq!(notifications.try_recv().unwrap().body, "1 scans synced");
  }

  #[test]
  fn test_unreadable_items_are_dropped() {
    let db = Database::in_memory().unwrap();
    let queue = SyncQueue::new(db.clone());
    queue.enqueue(SYNC_SCANS_TAG, &json!({ "code": "A" })).unwrap();
    db.conn()
      .unwrap()
      .execute(
        "INSERT INTO sync_queue (tag, payload, queued_at) VALUES (?, ?, ?)",
        params![SYNC_SCANS_TAG, "{not json", Utc::now().to_rfc3339()],
      )
      .unwrap();

    let pending = queue.pending(SYNC_SCANS_TAG).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].payload, json!({ "code": "A" }));

    let rows: i64 = db
      .conn()
      .unwrap()
      .query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))
      .unwrap();
    assert_eq!(rows, 1);
  }

  #[tokio::test]
  async fn test_empty_queue_and_unknown_tag_do_nothing() {
    let api = Api::accepting(usize::MAX);
    let (sync, mut notifications) = BackgroundSync::new(queue_with(&[]), api, scans_url());

    assert_eq!(sync.handle(SYNC_SCANS_TAG).await.unwrap(), SyncReport::default());
    assert_eq!(sync.handle("sync-other").await.unwrap(), SyncReport::default());
    assert!(notifications.try_recv().is_err());
  }
}
