/// Schema for cache partitions and the background sync queues.
pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Named cache partitions (static, dynamic, and anything left by older versions)
CREATE TABLE IF NOT EXISTS cache_partitions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses, keyed by request identity hash within a partition
CREATE TABLE IF NOT EXISTS cache_entries (
    partition_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (partition_name, request_key),
    FOREIGN KEY (partition_name) REFERENCES cache_partitions(name) ON DELETE CASCADE
);

-- Analytics events waiting for the next analytics-sync
CREATE TABLE IF NOT EXISTS pending_analytics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event TEXT NOT NULL,
    queued_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Latest preferences blob waiting for the next preferences-sync
CREATE TABLE IF NOT EXISTS pending_preferences (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    preferences TEXT NOT NULL,
    queued_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;
