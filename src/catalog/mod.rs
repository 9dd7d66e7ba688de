//! Relational catalog over SQLite
//!
//! This module records every asset by stable guid, current path, content
//! fingerprint and lifecycle flags, plus the append-only event log, scene
//! mirror, and per-project index-state snapshots. Single writer, many
//! readers; the pool holds the only exclusive file locks taken during
//! maintenance.

mod schema;

pub use schema::*;

use crate::chunk::{normalize_guid, normalize_rel_path};
use crate::error::Result;
use crate::events::{AssetItem, Envelope};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::path::Path;
use tracing::{debug, info, warn};

/// Maximum dependency rows recorded per asset
pub const MAX_DEPS_PER_ASSET: usize = 200;

/// One asset row as stored
#[derive(Debug, Clone, FromRow)]
pub struct AssetRow {
    pub guid: String,
    pub path: String,
    pub kind: Option<String>,
    pub mtime: Option<i64>,
    pub size: Option<i64>,
    pub hash: Option<String>,
    pub deleted: i64,
    pub updated_ts: i64,
}

impl AssetRow {
    /// Change witness: content hash when present, else `<mtime>:<size>`
    pub fn version(&self) -> String {
        match &self.hash {
            Some(hash) => hash.clone(),
            None => format!("{}:{}", self.mtime.unwrap_or(0), self.size.unwrap_or(0)),
        }
    }
}

/// One scene row as stored
#[derive(Debug, Clone, FromRow)]
pub struct SceneRow {
    pub guid: String,
    pub path: String,
    pub updated_ts: i64,
}

/// Per-project snapshot record
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct IndexState {
    pub project_id: String,
    pub snapshot_sha: String,
    pub total_items: i64,
    pub qdrant_count: Option<i64>,
    pub completed_at: i64,
}

/// Deterministic digest over the live catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub sha: String,
    pub total: usize,
}

/// A validated, normalized asset upsert
#[derive(Debug, Clone)]
pub struct AssetUpsert {
    pub guid: String,
    pub path: String,
    pub kind: Option<String>,
    pub mtime: Option<i64>,
    pub size: Option<i64>,
    pub hash: Option<String>,
    pub deps: Vec<String>,
}

impl AssetUpsert {
    /// Coerce a wire item into an upsert row. Items missing guid or path are
    /// skipped (None).
    pub fn from_item(item: &AssetItem) -> Option<Self> {
        let guid = item.guid.as_deref().map(normalize_guid)?;
        let path = item.path.as_deref().map(normalize_rel_path)?;
        if guid.is_empty() || path.is_empty() {
            return None;
        }
        Some(Self {
            guid,
            path,
            kind: item.kind.clone(),
            mtime: item.mtime,
            size: item.size,
            hash: item.hash.clone(),
            deps: item.deps.iter().map(|d| normalize_guid(d)).collect(),
        })
    }
}

/// Compute the 16-hex-char project identifier for a root path
pub fn project_id(root: &Path) -> String {
    let normalized = root
        .to_string_lossy()
        .replace('\\', "/")
        .trim_end_matches('/')
        .to_string();
    let digest = Sha256::digest(normalized.as_bytes());
    to_hex(&digest)[..16].to_string()
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Catalog database handle
#[derive(Clone)]
pub struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    /// Open (and create if missing) the catalog database
    pub async fn connect(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true);

        debug!("Connecting to catalog at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let catalog = Self { pool };
        catalog.init_schema().await?;
        Ok(catalog)
    }

    /// Initialize the database schema
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    // ===== Event log =====

    /// Append one event to the log. Never silent: any failure surfaces.
    pub async fn log_event(&self, envelope: &Envelope) -> Result<()> {
        let body = serde_json::to_string(&envelope.body)?;
        sqlx::query("INSERT INTO events (ts, session, type, body) VALUES (?, ?, ?, ?)")
            .bind(envelope.ts)
            .bind(&envelope.session)
            .bind(&envelope.ty)
            .bind(body)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ===== Asset operations =====

    /// Upsert asset rows in one transaction.
    ///
    /// On guid conflict the path is overwritten unconditionally; kind, mtime,
    /// size and hash are overwritten only when the incoming value is present;
    /// the deleted flag is reset. Returns the number of rows applied.
    pub async fn upsert_assets(&self, rows: &[AssetUpsert], ts: i64) -> Result<usize> {
        match self.upsert_assets_tx(rows, ts).await {
            Err(e) if e.is_catalog_conflict() => {
                warn!("Catalog busy during asset upsert, retrying once");
                self.upsert_assets_tx(rows, ts).await
            }
            other => other,
        }
    }

    async fn upsert_assets_tx(&self, rows: &[AssetUpsert], ts: i64) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut applied = 0usize;

        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO assets (guid, path, kind, mtime, size, hash, deleted, updated_ts)
                VALUES (?, ?, ?, ?, ?, ?, 0, ?)
                ON CONFLICT(guid) DO UPDATE SET
                    path = excluded.path,
                    kind = COALESCE(excluded.kind, assets.kind),
                    mtime = COALESCE(excluded.mtime, assets.mtime),
                    size = COALESCE(excluded.size, assets.size),
                    hash = COALESCE(excluded.hash, assets.hash),
                    deleted = 0,
                    updated_ts = excluded.updated_ts
                "#,
            )
            .bind(&row.guid)
            .bind(&row.path)
            .bind(&row.kind)
            .bind(row.mtime)
            .bind(row.size)
            .bind(&row.hash)
            .bind(ts)
            .execute(&mut *tx)
            .await?;

            for dep in row.deps.iter().take(MAX_DEPS_PER_ASSET) {
                sqlx::query("INSERT OR IGNORE INTO asset_deps (guid, dep) VALUES (?, ?)")
                    .bind(&row.guid)
                    .bind(dep)
                    .execute(&mut *tx)
                    .await?;
            }

            applied += 1;
        }

        tx.commit().await?;
        Ok(applied)
    }

    /// Soft-delete assets by guid in one transaction
    pub async fn mark_deleted(&self, guids: &[String], ts: i64) -> Result<usize> {
        match self.mark_deleted_tx(guids, ts).await {
            Err(e) if e.is_catalog_conflict() => {
                warn!("Catalog busy during delete, retrying once");
                self.mark_deleted_tx(guids, ts).await
            }
            other => other,
        }
    }

    async fn mark_deleted_tx(&self, guids: &[String], ts: i64) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut marked = 0usize;
        for guid in guids {
            let result =
                sqlx::query("UPDATE assets SET deleted = 1, updated_ts = ? WHERE guid = ?")
                    .bind(ts)
                    .bind(guid)
                    .execute(&mut *tx)
                    .await?;
            marked += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(marked)
    }

    /// Get one asset row by guid
    pub async fn get_asset(&self, guid: &str) -> Result<Option<AssetRow>> {
        let row = sqlx::query_as::<_, AssetRow>("SELECT * FROM assets WHERE guid = ?")
            .bind(guid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// All live (not soft-deleted) asset rows, guid-ordered
    pub async fn live_assets(&self) -> Result<Vec<AssetRow>> {
        let rows = sqlx::query_as::<_, AssetRow>(
            "SELECT * FROM assets WHERE deleted = 0 ORDER BY guid",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ===== Scenes =====

    /// Upsert the latest path for a scene guid
    pub async fn upsert_scene(&self, guid: &str, path: &str, ts: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scenes (guid, path, updated_ts)
            VALUES (?, ?, ?)
            ON CONFLICT(guid) DO UPDATE SET
                path = excluded.path,
                updated_ts = excluded.updated_ts
            "#,
        )
        .bind(guid)
        .bind(path)
        .bind(ts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Latest scene paths, most recently updated first
    pub async fn scenes(&self) -> Result<Vec<SceneRow>> {
        let rows =
            sqlx::query_as::<_, SceneRow>("SELECT * FROM scenes ORDER BY updated_ts DESC")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    // ===== Snapshot =====

    /// Deterministic digest over `(guid, version)` pairs for all live
    /// assets, guid-sorted. The sha is the empty string on an empty catalog.
    pub async fn snapshot(&self) -> Result<Snapshot> {
        let rows: Vec<(String, Option<String>, Option<i64>, Option<i64>)> = sqlx::query_as(
            "SELECT guid, hash, mtime, size FROM assets WHERE deleted = 0 ORDER BY guid",
        )
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(Snapshot {
                sha: String::new(),
                total: 0,
            });
        }

        let mut hasher = Sha256::new();
        for (guid, hash, mtime, size) in &rows {
            let version = match hash {
                Some(hash) => hash.clone(),
                None => format!("{}:{}", mtime.unwrap_or(0), size.unwrap_or(0)),
            };
            hasher.update(guid.as_bytes());
            hasher.update(b":");
            hasher.update(version.as_bytes());
            hasher.update(b"\n");
        }

        Ok(Snapshot {
            sha: to_hex(&hasher.finalize()),
            total: rows.len(),
        })
    }

    // ===== Index state =====

    /// Idempotent replace of the per-project snapshot record
    pub async fn write_index_state(&self, state: &IndexState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO index_state
                (project_id, snapshot_sha, total_items, qdrant_count, completed_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&state.project_id)
        .bind(&state.snapshot_sha)
        .bind(state.total_items)
        .bind(state.qdrant_count)
        .bind(state.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Read the snapshot record for a project
    pub async fn read_index_state(&self, project_id: &str) -> Result<Option<IndexState>> {
        let row = sqlx::query_as::<_, IndexState>(
            "SELECT * FROM index_state WHERE project_id = ?",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // ===== Maintenance =====

    /// Row counts for every user table
    pub async fn table_row_counts(&self) -> Result<Vec<(String, i64)>> {
        let tables = self.user_tables().await?;
        let mut counts = Vec::with_capacity(tables.len());
        for table in tables {
            let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM \"{table}\""))
                .fetch_one(&self.pool)
                .await?;
            counts.push((table, count));
        }
        Ok(counts)
    }

    async fn user_tables(&self) -> Result<Vec<String>> {
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(tables)
    }

    /// Truncate every user table inside one exclusive transaction, resetting
    /// autoincrement counters. Returns per-table row counts before zeroing.
    pub async fn wipe_tables(&self) -> Result<Vec<(String, i64)>> {
        let tables = self.user_tables().await?;
        let mut conn = self.pool.acquire().await?;

        sqlx::query("BEGIN EXCLUSIVE").execute(&mut *conn).await?;

        let outcome: Result<Vec<(String, i64)>> = async {
            let mut counts = Vec::with_capacity(tables.len());
            for table in &tables {
                let count: i64 =
                    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM \"{table}\""))
                        .fetch_one(&mut *conn)
                        .await?;
                counts.push((table.clone(), count));
            }
            // Children before parents: the name sort puts asset_deps ahead
            // of assets, so foreign keys hold mid-wipe.
            for table in tables.iter() {
                sqlx::query(&format!("DELETE FROM \"{table}\""))
                    .execute(&mut *conn)
                    .await?;
            }
            let has_sequence: Option<String> = sqlx::query_scalar(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'sqlite_sequence'",
            )
            .fetch_optional(&mut *conn)
            .await?;
            if has_sequence.is_some() {
                sqlx::query("DELETE FROM sqlite_sequence")
                    .execute(&mut *conn)
                    .await?;
            }
            Ok(counts)
        }
        .await;

        match outcome {
            Ok(counts) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                info!("Catalog wiped: {} tables truncated", counts.len());
                Ok(counts)
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    /// Truncate the write-ahead log and reclaim space
    pub async fn checkpoint_and_vacuum(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&mut *conn)
            .await?;
        sqlx::query("VACUUM").execute(&mut *conn).await?;
        Ok(())
    }

    /// Close the pool, flushing connections
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn setup() -> (Catalog, TempDir) {
        let tmp = TempDir::new().unwrap();
        let catalog = Catalog::connect(&tmp.path().join("catalog.db"))
            .await
            .unwrap();
        (catalog, tmp)
    }

    fn upsert(guid: &str, path: &str, hash: Option<&str>) -> AssetUpsert {
        AssetUpsert {
            guid: guid.to_string(),
            path: path.to_string(),
            kind: Some("MonoScript".to_string()),
            mtime: None,
            size: None,
            hash: hash.map(str::to_string),
            deps: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_upsert_merge_semantics() {
        let (catalog, _tmp) = setup().await;

        catalog
            .upsert_assets(&[upsert("a", "Assets/S.cs", Some("H1"))], 100)
            .await
            .unwrap();

        // Path overwrites unconditionally; absent hash keeps the old value.
        let mut second = upsert("a", "Assets/src/S.cs", None);
        second.kind = None;
        catalog.upsert_assets(&[second], 200).await.unwrap();

        let row = catalog.get_asset("a").await.unwrap().unwrap();
        assert_eq!(row.path, "Assets/src/S.cs");
        assert_eq!(row.hash.as_deref(), Some("H1"));
        assert_eq!(row.kind.as_deref(), Some("MonoScript"));
        assert_eq!(row.updated_ts, 200);
    }

    #[tokio::test]
    async fn test_upsert_resets_deleted() {
        let (catalog, _tmp) = setup().await;

        catalog
            .upsert_assets(&[upsert("a", "Assets/S.cs", Some("H1"))], 100)
            .await
            .unwrap();
        catalog.mark_deleted(&["a".to_string()], 150).await.unwrap();
        assert_eq!(catalog.get_asset("a").await.unwrap().unwrap().deleted, 1);

        catalog
            .upsert_assets(&[upsert("a", "Assets/S.cs", Some("H2"))], 200)
            .await
            .unwrap();
        let row = catalog.get_asset("a").await.unwrap().unwrap();
        assert_eq!(row.deleted, 0);
        assert_eq!(row.hash.as_deref(), Some("H2"));
    }

    #[tokio::test]
    async fn test_dep_cap_and_duplicates() {
        let (catalog, _tmp) = setup().await;

        let mut row = upsert("a", "Assets/S.cs", None);
        row.deps = (0..250).map(|i| format!("dep{i}")).collect();
        row.deps.push("dep0".to_string());
        catalog.upsert_assets(&[row], 100).await.unwrap();

        let counts = catalog.table_row_counts().await.unwrap();
        let deps = counts.iter().find(|(t, _)| t == "asset_deps").unwrap().1;
        assert_eq!(deps, MAX_DEPS_PER_ASSET as i64);
    }

    #[tokio::test]
    async fn test_snapshot_determinism_and_empty() {
        let (catalog, _tmp) = setup().await;

        let empty = catalog.snapshot().await.unwrap();
        assert_eq!(empty.sha, "");
        assert_eq!(empty.total, 0);

        catalog
            .upsert_assets(
                &[
                    upsert("b", "Assets/B.cs", Some("H2")),
                    upsert("a", "Assets/A.cs", Some("H1")),
                ],
                100,
            )
            .await
            .unwrap();

        let first = catalog.snapshot().await.unwrap();
        assert_eq!(first.total, 2);
        assert!(!first.sha.is_empty());

        // Insertion order does not matter, only the live (guid, version) set.
        let (other, _tmp2) = setup().await;
        other
            .upsert_assets(
                &[
                    upsert("a", "Assets/A.cs", Some("H1")),
                    upsert("b", "Assets/B.cs", Some("H2")),
                ],
                999,
            )
            .await
            .unwrap();
        assert_eq!(other.snapshot().await.unwrap().sha, first.sha);

        // Soft-deleting an asset changes the digest.
        catalog.mark_deleted(&["b".to_string()], 200).await.unwrap();
        let after = catalog.snapshot().await.unwrap();
        assert_ne!(after.sha, first.sha);
        assert_eq!(after.total, 1);
    }

    #[tokio::test]
    async fn test_snapshot_version_witness_without_hash() {
        let (catalog, _tmp) = setup().await;

        let mut row = upsert("a", "Assets/A.cs", None);
        row.mtime = Some(1712000000);
        row.size = Some(420);
        catalog.upsert_assets(&[row], 100).await.unwrap();

        let asset = catalog.get_asset("a").await.unwrap().unwrap();
        assert_eq!(asset.version(), "1712000000:420");
    }

    #[tokio::test]
    async fn test_scene_upsert() {
        let (catalog, _tmp) = setup().await;

        catalog
            .upsert_scene("s1", "Assets/Main.unity", 100)
            .await
            .unwrap();
        catalog
            .upsert_scene("s1", "Assets/Scenes/Main.unity", 200)
            .await
            .unwrap();

        let scenes = catalog.scenes().await.unwrap();
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].path, "Assets/Scenes/Main.unity");
    }

    #[tokio::test]
    async fn test_index_state_roundtrip() {
        let (catalog, _tmp) = setup().await;

        let state = IndexState {
            project_id: "abcd1234abcd1234".to_string(),
            snapshot_sha: "sha".to_string(),
            total_items: 7,
            qdrant_count: Some(12),
            completed_at: 1712000000,
        };
        catalog.write_index_state(&state).await.unwrap();
        catalog.write_index_state(&state).await.unwrap();

        let read = catalog
            .read_index_state("abcd1234abcd1234")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read, state);
        assert!(catalog.read_index_state("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_event_log_appends() {
        let (catalog, _tmp) = setup().await;

        let envelope = Envelope {
            v: 1,
            source: "unity".to_string(),
            ty: "assets_imported".to_string(),
            ts: 1712000000,
            id: "e1".to_string(),
            body: json!({"items": []}),
            session: Some("s1".to_string()),
        };
        catalog.log_event(&envelope).await.unwrap();
        catalog.log_event(&envelope).await.unwrap();

        let counts = catalog.table_row_counts().await.unwrap();
        let events = counts.iter().find(|(t, _)| t == "events").unwrap().1;
        assert_eq!(events, 2);
    }

    #[tokio::test]
    async fn test_wipe_tables() {
        let (catalog, _tmp) = setup().await;

        catalog
            .upsert_assets(&[upsert("a", "Assets/S.cs", Some("H1"))], 100)
            .await
            .unwrap();
        catalog.upsert_scene("s1", "Assets/M.unity", 100).await.unwrap();

        let counts = catalog.wipe_tables().await.unwrap();
        let assets = counts.iter().find(|(t, _)| t == "assets").unwrap().1;
        assert_eq!(assets, 1);

        assert!(catalog.live_assets().await.unwrap().is_empty());
        assert!(catalog.scenes().await.unwrap().is_empty());

        catalog.checkpoint_and_vacuum().await.unwrap();
    }

    #[test]
    fn test_project_id_shape() {
        let id = project_id(Path::new("/home/user/Project/"));
        assert_eq!(id.len(), 16);
        assert_eq!(id, project_id(Path::new("/home/user/Project")));
        assert_ne!(id, project_id(Path::new("/home/user/Other")));
    }

    #[test]
    fn test_from_item_coercions() {
        let item = AssetItem {
            guid: Some("{ABC}".to_string()),
            path: Some(".\\Assets\\S.cs".to_string()),
            ..Default::default()
        };
        let row = AssetUpsert::from_item(&item).unwrap();
        assert_eq!(row.guid, "abc");
        assert_eq!(row.path, "Assets/S.cs");

        let missing = AssetItem {
            path: Some("Assets/S.cs".to_string()),
            ..Default::default()
        };
        assert!(AssetUpsert::from_item(&missing).is_none());
    }
}
