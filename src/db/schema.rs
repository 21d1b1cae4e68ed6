/// Schema for all persisted tables.
pub const SCHEMA: &str = r#"
-- Key-value cache, one JSON envelope per key
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Worker response buckets
CREATE TABLE IF NOT EXISTS http_cache (
    bucket TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    kind TEXT NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (bucket, request_hash)
);

CREATE INDEX IF NOT EXISTS idx_http_cache_bucket ON http_cache(bucket);

-- Marker rows so an empty bucket still exists after open()
CREATE TABLE IF NOT EXISTS http_buckets (
    name TEXT PRIMARY KEY
);

-- Offline scans waiting for background sync (FIFO by id)
CREATE TABLE IF NOT EXISTS sync_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tag TEXT NOT NULL,
    payload TEXT NOT NULL,
    queued_at TEXT NOT NULL
);
"#;
