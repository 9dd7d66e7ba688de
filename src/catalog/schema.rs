//! SQLite schema definition

/// SQL schema for the catalog database
pub const SCHEMA_SQL: &str = r#"
-- Events: append-only record of every received domain event
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ts INTEGER NOT NULL,
    session TEXT,
    type TEXT NOT NULL,
    body TEXT NOT NULL
);

-- Assets: one row per tracked project file, keyed by editor guid
CREATE TABLE IF NOT EXISTS assets (
    guid TEXT PRIMARY KEY,
    path TEXT NOT NULL,
    kind TEXT,
    mtime INTEGER,
    size INTEGER,
    hash TEXT,
    deleted INTEGER NOT NULL DEFAULT 0,
    updated_ts INTEGER NOT NULL
);

-- Asset dependencies, capped at 200 per asset on insert
CREATE TABLE IF NOT EXISTS asset_deps (
    guid TEXT NOT NULL REFERENCES assets(guid),
    dep TEXT NOT NULL,
    PRIMARY KEY (guid, dep)
);

-- Scenes: secondary index of latest scene paths
CREATE TABLE IF NOT EXISTS scenes (
    guid TEXT PRIMARY KEY,
    path TEXT NOT NULL,
    updated_ts INTEGER NOT NULL
);

-- Index state: one row per project, the cold-start verification witness
CREATE TABLE IF NOT EXISTS index_state (
    project_id TEXT PRIMARY KEY,
    snapshot_sha TEXT NOT NULL,
    total_items INTEGER NOT NULL,
    qdrant_count INTEGER,
    completed_at INTEGER NOT NULL
);

-- Indexes for performance
CREATE INDEX IF NOT EXISTS idx_events_ts ON events(ts DESC);
CREATE INDEX IF NOT EXISTS idx_assets_path ON assets(path);
"#;
