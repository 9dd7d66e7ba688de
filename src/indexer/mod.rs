//! Event-driven incremental indexer
//!
//! Consumes change events, updates the catalog, and re-embeds changed
//! textual assets. One event is applied to completion at a time, in arrival
//! order; stale points for a path are always removed before the replacement
//! batch is written.

use crate::catalog::{project_id, AssetUpsert, Catalog, IndexState};
use crate::chunk::{chunk_lines, normalize_guid, normalize_rel_path, ChunkProfile};
use crate::config::ChunkConfig;
use crate::embed::{guard_embeddings, Embedder};
use crate::error::{Error, Result};
use crate::events::{types, AssetItem, AssetsBody, RootedEvent};
use crate::progress::{ProgressBus, Status};
use crate::session::{CompileFence, COMPILE_FINISH_EXTEND, COMPILE_SUSPEND};
use crate::vector::{PointPayload, VectorPoint, VectorStore};
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

/// Settling delay after pause() so in-flight work can finish
const PAUSE_SETTLE: Duration = Duration::from_millis(100);

/// File-read retry budget for events that race the editor's flush
const READ_ATTEMPTS: u32 = 5;
const READ_BACKOFF: Duration = Duration::from_millis(150);

/// Asset class driving the chunking profile and point payload kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetClass {
    Script,
    Scene,
}

impl AssetClass {
    pub fn label(self) -> &'static str {
        match self {
            AssetClass::Script => "Script",
            AssetClass::Scene => "Scene",
        }
    }
}

/// True for scene documents
pub fn is_scene_path(path: &str) -> bool {
    path.ends_with(".unity")
}

/// Kinds the per-event pipeline embeds
pub fn is_textual_kind(kind: Option<&str>) -> bool {
    matches!(kind, Some("MonoScript") | Some("TextAsset"))
}

/// Reconciler-side textual classification: kind or a `.cs` path
pub fn is_textual(kind: Option<&str>, path: &str) -> bool {
    is_textual_kind(kind) || path.ends_with(".cs")
}

struct QueuedEvent {
    event: RootedEvent,
    done: oneshot::Sender<Result<()>>,
}

#[derive(Default)]
struct PauseState {
    paused: bool,
    queue: VecDeque<QueuedEvent>,
}

/// Event-driven writer over catalog and vector store
pub struct Indexer {
    catalog: Catalog,
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    progress: ProgressBus,
    chunking: ChunkConfig,
    fence: CompileFence,
    paused: AtomicBool,
    state: Mutex<PauseState>,
    work: Mutex<()>,
}

impl Indexer {
    pub fn new(
        catalog: Catalog,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        progress: ProgressBus,
        chunking: ChunkConfig,
        fence: CompileFence,
    ) -> Self {
        Self {
            catalog,
            vectors,
            embedder,
            progress,
            chunking,
            fence,
            paused: AtomicBool::new(false),
            state: Mutex::new(PauseState::default()),
            work: Mutex::new(()),
        }
    }

    /// Apply one event, or queue it when paused.
    ///
    /// While paused the returned future resolves only after `resume()` has
    /// drained this event, with the result of its application.
    pub async fn handle_event(&self, event: RootedEvent) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if state.paused {
                let (tx, rx) = oneshot::channel();
                state.queue.push_back(QueuedEvent { event, done: tx });
                drop(state);
                return match rx.await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Other("indexer dropped a queued event".to_string())),
                };
            }
        }
        self.apply(event).await
    }

    /// Stop accepting new work. Already-running work is not cancelled; the
    /// settling delay lets it complete.
    pub async fn pause(&self) {
        {
            let mut state = self.state.lock().await;
            state.paused = true;
        }
        self.paused.store(true, Ordering::SeqCst);
        tokio::time::sleep(PAUSE_SETTLE).await;
    }

    /// Drain queued events in arrival order, then unset the pause flag.
    /// A failing event rejects its own completion without halting the drain.
    pub async fn resume(&self) {
        loop {
            let next = {
                let mut state = self.state.lock().await;
                match state.queue.pop_front() {
                    Some(next) => Some(next),
                    None => {
                        state.paused = false;
                        self.paused.store(false, Ordering::SeqCst);
                        None
                    }
                }
            };
            let Some(QueuedEvent { event, done }) = next else {
                break;
            };
            let result = self.apply(event).await;
            let _ = done.send(result);
        }
    }

    /// Racy observer of the pause flag
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    async fn apply(&self, event: RootedEvent) -> Result<()> {
        let _work = self.work.lock().await;
        let result = self.apply_inner(&event).await;
        if let Err(ref e) = result {
            warn!("Event {} failed: {e}", event.envelope.ty);
            self.progress.publish(Status::error(e.to_string()));
        }
        result
    }

    async fn apply_inner(&self, event: &RootedEvent) -> Result<()> {
        let envelope = &event.envelope;
        self.catalog.log_event(envelope).await?;

        match envelope.ty.as_str() {
            types::ASSETS_IMPORTED => self.on_assets_imported(event).await,
            types::ASSETS_MOVED => self.on_assets_moved(event).await,
            types::ASSETS_DELETED => self.on_assets_deleted(event).await,
            types::SCENE_SAVED => self.on_scene_saved(event).await,
            types::COMPILE_STARTED => {
                self.fence.suspend_for(COMPILE_SUSPEND);
                Ok(())
            }
            types::COMPILE_FINISHED => {
                self.fence.extend(COMPILE_FINISH_EXTEND);
                Ok(())
            }
            // Liveness and handshake traffic is handled upstream.
            types::HELLO | types::HEARTBEAT | types::ACK => Ok(()),
            other => {
                debug!("Logged event type {other} with no indexing effect");
                Ok(())
            }
        }
    }

    async fn on_assets_imported(&self, event: &RootedEvent) -> Result<()> {
        let envelope = &event.envelope;
        let body: AssetsBody = envelope.body_as()?;
        let ts = envelope.ts;
        let session = envelope.session.as_deref();

        let rows: Vec<AssetUpsert> = body
            .items
            .iter()
            .filter_map(AssetUpsert::from_item)
            .collect();
        self.catalog.upsert_assets(&rows, ts).await?;

        for row in &rows {
            if is_scene_path(&row.path) {
                self.catalog.upsert_scene(&row.guid, &row.path, ts).await?;
            }
        }

        let textual: Vec<&AssetUpsert> = rows
            .iter()
            .filter(|row| is_textual_kind(row.kind.as_deref()))
            .collect();
        let total = textual.len();
        if total > 0 {
            self.progress
                .publish(Status::scanning(total, 0, "Indexing imported assets"));
        }

        for (done, row) in textual.iter().enumerate() {
            self.progress
                .publish(Status::embedding(total, done, row.path.clone()));
            let class = if is_scene_path(&row.path) {
                AssetClass::Scene
            } else {
                AssetClass::Script
            };
            self.index_file(&event.root, &row.path, class, Some(&row.guid), session, ts)
                .await?;
        }

        self.finish_batch(&event.root, total, None).await
    }

    async fn on_assets_moved(&self, event: &RootedEvent) -> Result<()> {
        let envelope = &event.envelope;
        let body: AssetsBody = envelope.body_as()?;
        let ts = envelope.ts;
        let session = envelope.session.as_deref();

        let rows: Vec<AssetUpsert> = body
            .items
            .iter()
            .filter_map(AssetUpsert::from_item)
            .collect();
        self.catalog.upsert_assets(&rows, ts).await?;

        for row in &rows {
            if is_scene_path(&row.path) {
                self.catalog.upsert_scene(&row.guid, &row.path, ts).await?;
            }
        }

        // Old points must be gone before anything lands at the new path.
        for item in &body.items {
            if let Some(from) = item.from.as_deref() {
                self.vectors.delete_by_path(from).await?;
            }
        }

        let textual: Vec<&AssetUpsert> = rows
            .iter()
            .filter(|row| is_textual_kind(row.kind.as_deref()))
            .collect();
        let total = textual.len();
        for (done, row) in textual.iter().enumerate() {
            self.progress
                .publish(Status::embedding(total, done, row.path.clone()));
            let class = if is_scene_path(&row.path) {
                AssetClass::Scene
            } else {
                AssetClass::Script
            };
            self.index_file(&event.root, &row.path, class, Some(&row.guid), session, ts)
                .await?;
        }

        self.finish_batch(&event.root, total, None).await
    }

    async fn on_assets_deleted(&self, event: &RootedEvent) -> Result<()> {
        let envelope = &event.envelope;
        let body: AssetsBody = envelope.body_as()?;
        let ts = envelope.ts;

        let guids: Vec<String> = body
            .items
            .iter()
            .filter_map(|item| item.guid.as_deref().map(normalize_guid))
            .collect();
        self.catalog.mark_deleted(&guids, ts).await?;

        for item in &body.items {
            if let Some(path) = item.path.as_deref() {
                self.vectors.delete_by_path(path).await?;
            }
            // Filter delete by guid as backup for points whose path drifted.
            if let Some(guid) = item.guid.as_deref() {
                self.vectors.delete_by_guid(guid).await?;
            }
        }

        self.finish_batch(&event.root, 0, Some("Deletions applied"))
            .await
    }

    async fn on_scene_saved(&self, event: &RootedEvent) -> Result<()> {
        let envelope = &event.envelope;
        let mut item: AssetItem = envelope.body_as()?;
        if item.kind.is_none() {
            item.kind = Some("Scene".to_string());
        }

        let Some(row) = AssetUpsert::from_item(&item) else {
            warn!("scene_saved without guid/path, logged only");
            return Ok(());
        };

        let ts = envelope.ts;
        let session = envelope.session.as_deref();

        self.catalog.upsert_assets(&[row.clone()], ts).await?;
        self.catalog.upsert_scene(&row.guid, &row.path, ts).await?;

        self.progress
            .publish(Status::embedding(1, 0, row.path.clone()));
        self.index_file(
            &event.root,
            &row.path,
            AssetClass::Scene,
            Some(&row.guid),
            session,
            ts,
        )
        .await?;

        self.finish_batch(&event.root, 1, None).await
    }

    /// Per-event pipeline for one textual asset:
    /// delete stale points, read with bounded retry, chunk, embed, guard,
    /// upsert. Returns the number of points written.
    pub async fn index_file(
        &self,
        root: &Path,
        rel_path: &str,
        class: AssetClass,
        guid: Option<&str>,
        session: Option<&str>,
        ts: i64,
    ) -> Result<usize> {
        let rel = normalize_rel_path(rel_path);
        self.vectors.delete_by_path(&rel).await?;

        let abs = root.join(&rel);
        let text = read_with_retry(&abs).await?;

        let profile = match class {
            AssetClass::Scene => ChunkProfile::scene(&self.chunking),
            AssetClass::Script => ChunkProfile::script(&self.chunking),
        };
        let abs_key = abs.to_string_lossy().replace('\\', "/");
        let chunks = chunk_lines(&text, &abs_key, profile);
        if chunks.is_empty() {
            debug!("No chunks for {rel}, nothing to embed");
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(texts).await?;
        guard_embeddings(&vectors, chunks.len(), self.embedder.dimension())?;

        let guid = guid.map(normalize_guid);
        let points: Vec<VectorPoint> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorPoint {
                id: chunk.point_id,
                vector,
                payload: PointPayload {
                    rel_path: rel.clone(),
                    range: format!("{}-{}", chunk.line_start, chunk.line_end),
                    file_hash: chunk.fingerprint,
                    kind: class.label().to_string(),
                    guid: guid.clone(),
                    session: session.map(str::to_string),
                    updated_ts: ts,
                    text: chunk.text,
                },
            })
            .collect();

        let written = points.len();
        self.vectors.upsert_points(points).await?;
        Ok(written)
    }

    /// Batch epilogue: final `complete` status, then the IndexState snapshot
    /// write as the last effect.
    async fn finish_batch(&self, root: &Path, total: usize, message: Option<&str>) -> Result<()> {
        let qdrant_count = self.vectors.count_points().await.ok();
        let mut status = Status::complete(total, qdrant_count);
        if let Some(message) = message {
            status = status.with_message(message);
        }
        self.progress.publish(status);
        self.write_snapshot(root, qdrant_count).await
    }

    async fn write_snapshot(&self, root: &Path, qdrant_count: Option<u64>) -> Result<()> {
        let snapshot = self.catalog.snapshot().await?;
        let state = IndexState {
            project_id: project_id(root),
            snapshot_sha: snapshot.sha,
            total_items: snapshot.total as i64,
            qdrant_count: qdrant_count.map(|c| c as i64),
            completed_at: chrono::Utc::now().timestamp(),
        };
        self.catalog.write_index_state(&state).await
    }
}

/// Read a file the editor may not have flushed yet: up to five attempts
/// with exponential backoff, retrying on not-found only.
async fn read_with_retry(path: &Path) -> Result<String> {
    let mut delay = READ_BACKOFF;
    let mut attempt = 1;
    loop {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => return Ok(text),
            Err(e) if e.kind() == ErrorKind::NotFound && attempt < READ_ATTEMPTS => {
                debug!("File {:?} not yet visible (attempt {attempt}), retrying", path);
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
