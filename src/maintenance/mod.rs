//! Maintenance coordination: writer fencing and the wipe-all protocol
//!
//! Wipe quiesces every registered writer, drops and recreates the vector
//! collection, truncates the catalog inside one exclusive transaction, then
//! resumes writers in reverse pause order. Writers are resumed on every
//! path, including failures.

use crate::catalog::Catalog;
use crate::error::Result;
use crate::indexer::Indexer;
use crate::vector::VectorStore;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Settling fence after pausing writers
const WIPE_FENCE: Duration = Duration::from_millis(200);

/// Gate for catalog writers outside the indexer (the event router's log
/// path). Pausing blocks `guard()` callers until resume.
#[derive(Default)]
pub struct DbFence {
    paused: AtomicBool,
    notify: Notify,
}

impl DbFence {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Wait until writes are allowed
    pub async fn guard(&self) {
        while self.paused.load(Ordering::SeqCst) {
            let notified = self.notify.notified();
            if !self.paused.load(Ordering::SeqCst) {
                break;
            }
            notified.await;
        }
    }
}

/// The two writers maintenance can quiesce
#[derive(Clone)]
pub enum Writer {
    Indexer(Arc<Indexer>),
    DbFence(Arc<DbFence>),
}

impl Writer {
    pub fn name(&self) -> &'static str {
        match self {
            Writer::Indexer(_) => "indexer",
            Writer::DbFence(_) => "db-fence",
        }
    }

    pub async fn pause(&self) {
        match self {
            Writer::Indexer(indexer) => indexer.pause().await,
            Writer::DbFence(fence) => fence.pause(),
        }
    }

    pub async fn resume(&self) {
        match self {
            Writer::Indexer(indexer) => indexer.resume().await,
            Writer::DbFence(fence) => fence.resume(),
        }
    }
}

/// Wipe outcome, with per-table row counts in the message
#[derive(Debug, Clone, Serialize)]
pub struct WipeReport {
    pub success: bool,
    pub message: String,
}

/// Coordinates pause/resume fencing and the wipe-all operation
pub struct MaintenanceCoordinator {
    catalog: Catalog,
    vectors: Arc<dyn VectorStore>,
    dimension: usize,
    writers: StdMutex<Vec<Writer>>,
}

impl MaintenanceCoordinator {
    pub fn new(catalog: Catalog, vectors: Arc<dyn VectorStore>, dimension: usize) -> Self {
        Self {
            catalog,
            vectors,
            dimension,
            writers: StdMutex::new(Vec::new()),
        }
    }

    /// Register a writer for maintenance fencing
    pub fn register(&self, writer: Writer) {
        self.writers.lock().expect("writer registry poisoned").push(writer);
    }

    /// Quiesce all writers, wipe vector collection and catalog, resume.
    pub async fn wipe_all(&self) -> WipeReport {
        let writers: Vec<Writer> = self
            .writers
            .lock()
            .expect("writer registry poisoned")
            .clone();

        for writer in &writers {
            info!("Pausing writer {}", writer.name());
            writer.pause().await;
        }
        tokio::time::sleep(WIPE_FENCE).await;

        let outcome = self.wipe_inner().await;

        for writer in writers.iter().rev() {
            info!("Resuming writer {}", writer.name());
            writer.resume().await;
        }

        match outcome {
            Ok(message) => WipeReport {
                success: true,
                message,
            },
            Err(e) => WipeReport {
                success: false,
                message: format!("Wipe failed: {e}"),
            },
        }
    }

    async fn wipe_inner(&self) -> Result<String> {
        // The catalog wipe must happen even when the backend is down.
        let vector_note = match self.reset_collection().await {
            Ok(()) => "collection reset".to_string(),
            Err(e) => {
                warn!("Vector backend unreachable during wipe, continuing: {e}");
                "collection unreachable, skipped".to_string()
            }
        };

        let counts = self.catalog.wipe_tables().await?;
        self.catalog.checkpoint_and_vacuum().await?;

        let tables = counts
            .iter()
            .map(|(table, count)| format!("{table}={count}"))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!("Wiped catalog ({tables}); {vector_note}"))
    }

    async fn reset_collection(&self) -> Result<()> {
        self.vectors.drop_collection().await?;
        self.vectors.ensure_collection(self.dimension).await
    }
}
