//! Bulk reconciliation of a project manifest against the catalog
//!
//! On receipt of a full manifest the reconciler diffs it against the live
//! catalog and emits the minimal set of adds, moves, modifies and deletes.
//! Re-indexing is delegated to the indexer as synthetic events: the indexer
//! is the sole code path that reads, chunks, embeds and guards. The
//! reconciler never touches the vector store except to delete stale points.

use crate::catalog::{AssetRow, AssetUpsert, Catalog};
use crate::error::Result;
use crate::events::{types, AssetItem, Envelope, RootedEvent};
use crate::indexer::{is_scene_path, is_textual, is_textual_kind, Indexer};
use crate::vector::VectorStore;
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Buffered manifest stream: begin → batches → end
#[derive(Default)]
pub struct ManifestCollector {
    expected_total: Option<usize>,
    items: Vec<AssetItem>,
}

impl ManifestCollector {
    pub fn begin(&mut self, total: usize) {
        self.expected_total = Some(total);
        self.items.clear();
    }

    pub fn push_batch(&mut self, items: Vec<AssetItem>) {
        self.items.extend(items);
    }

    /// Close the stream, returning the collected items
    pub fn end(&mut self, total: usize) -> Vec<AssetItem> {
        let collected = std::mem::take(&mut self.items);
        if collected.len() != total {
            warn!(
                "Manifest item count {} does not match declared total {}",
                collected.len(),
                total
            );
        }
        self.expected_total = None;
        collected
    }

    pub fn in_progress(&self) -> bool {
        self.expected_total.is_some()
    }
}

/// Reconciliation statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub added: usize,
    pub deleted: usize,
    pub moved: usize,
    pub modified: usize,
}

/// Manifest-vs-catalog reconciler
pub struct Reconciler {
    catalog: Catalog,
    vectors: Arc<dyn VectorStore>,
    indexer: Arc<Indexer>,
}

impl Reconciler {
    pub fn new(catalog: Catalog, vectors: Arc<dyn VectorStore>, indexer: Arc<Indexer>) -> Self {
        Self {
            catalog,
            vectors,
            indexer,
        }
    }

    /// Single-pass diff of a complete manifest against the live catalog
    pub async fn reconcile(
        &self,
        root: &Path,
        session: Option<&str>,
        items: &[AssetItem],
        ts: i64,
    ) -> Result<ReconcileStats> {
        let live = self.catalog.live_assets().await?;
        let catalog_rows: HashMap<String, AssetRow> = live
            .into_iter()
            .map(|row| (row.guid.clone(), row))
            .collect();

        let mut seen: HashSet<String> = HashSet::new();
        let mut upserts: Vec<AssetUpsert> = Vec::new();
        let mut moves: Vec<(String, String)> = Vec::new();
        let mut reindex: Vec<AssetUpsert> = Vec::new();
        let mut stats = ReconcileStats::default();

        for item in items {
            if item.is_folder {
                continue;
            }
            let Some(row) = AssetUpsert::from_item(item) else {
                continue;
            };
            seen.insert(row.guid.clone());

            let wants_reindex = is_textual(row.kind.as_deref(), &row.path)
                || is_scene_path(&row.path);

            match catalog_rows.get(&row.guid) {
                None => {
                    stats.added += 1;
                    if wants_reindex {
                        reindex.push(row.clone());
                    }
                    upserts.push(row);
                }
                Some(existing) if existing.path != row.path => {
                    stats.moved += 1;
                    moves.push((row.guid.clone(), existing.path.clone()));
                    if wants_reindex {
                        reindex.push(row.clone());
                    }
                    upserts.push(row);
                }
                Some(existing) => {
                    if witness_changed(&row, existing) {
                        stats.modified += 1;
                        // Stale points at the unchanged path go immediately;
                        // the delegated reindex rebuilds them.
                        self.vectors.delete_by_path(&row.path).await?;
                        if wants_reindex {
                            reindex.push(row.clone());
                        }
                        upserts.push(row);
                    }
                }
            }
        }

        // Every catalog row the manifest no longer mentions is deleted.
        let removed: Vec<&AssetRow> = catalog_rows
            .values()
            .filter(|row| !seen.contains(&row.guid))
            .collect();
        if !removed.is_empty() {
            let guids: Vec<String> = removed.iter().map(|row| row.guid.clone()).collect();
            self.catalog.mark_deleted(&guids, ts).await?;
            for row in &removed {
                self.vectors.delete_by_path(&row.path).await?;
            }
            stats.deleted = removed.len();
        }

        self.catalog.upsert_assets(&upserts, ts).await?;

        // Delegate re-embedding through the indexer's own pipeline.
        for row in &reindex {
            let envelope = synthetic_event(row, session, ts);
            let event = RootedEvent {
                root: root.to_path_buf(),
                envelope,
            };
            if let Err(e) = self.indexer.handle_event(event).await {
                warn!("Reindex of {} failed: {e}", row.path);
            }
        }

        for (_guid, from) in &moves {
            self.vectors.delete_by_path(from).await?;
        }

        info!(
            "Reconcile finished: {} added, {} deleted, {} moved, {} modified",
            stats.added, stats.deleted, stats.moved, stats.modified
        );
        Ok(stats)
    }
}

/// Change witness: hashes when both sides have them, mtimes when neither
/// does. A hash appearing on the manifest side counts as modified.
fn witness_changed(incoming: &AssetUpsert, existing: &AssetRow) -> bool {
    match (&incoming.hash, &existing.hash) {
        (Some(new), Some(old)) => new != old,
        (Some(_), None) => true,
        (None, None) => match (incoming.mtime, existing.mtime) {
            (Some(new), Some(old)) => new != old,
            _ => false,
        },
        (None, Some(_)) => false,
    }
}

/// Build the synthetic event that re-runs the indexing pipeline for one
/// manifest row: `scene_saved` for scenes, `assets_imported` for scripts.
fn synthetic_event(row: &AssetUpsert, session: Option<&str>, ts: i64) -> Envelope {
    let (ty, body) = if is_scene_path(&row.path) {
        (
            types::SCENE_SAVED,
            json!({
                "guid": row.guid,
                "path": row.path,
                "kind": "Scene",
                "hash": row.hash,
            }),
        )
    } else {
        let kind = match row.kind.as_deref() {
            Some(kind) if is_textual_kind(Some(kind)) => kind.to_string(),
            _ => "MonoScript".to_string(),
        };
        (
            types::ASSETS_IMPORTED,
            json!({
                "items": [{
                    "guid": row.guid,
                    "path": row.path,
                    "kind": kind,
                    "hash": row.hash,
                    "mtime": row.mtime,
                    "size": row.size,
                }],
            }),
        )
    };

    Envelope {
        v: 1,
        source: "unity".to_string(),
        ty: ty.to_string(),
        ts,
        id: format!("reconcile-{}", Uuid::new_v4()),
        body,
        session: session.map(str::to_string),
    }
}
