//! Session-to-project-root resolution and pre-resolution buffering
//!
//! Each transport session maps 1:1 to a project root after its `hello`.
//! Events that arrive before resolution completes are buffered FIFO per
//! session and drained through the indexer once the root is known.

use crate::events::{types, Envelope, HelloBody, RootedEvent};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Liveness suspension on compile: the editor stops emitting heartbeats
/// while domain reloads run.
pub const COMPILE_SUSPEND: Duration = Duration::from_secs(120);
/// Extra suspension granted when the compile finishes
pub const COMPILE_FINISH_EXTEND: Duration = Duration::from_secs(30);

/// Suspends connection-liveness termination across editor compiles
#[derive(Clone, Default)]
pub struct CompileFence {
    deadline: Arc<StdMutex<Option<Instant>>>,
}

impl CompileFence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspend liveness checks until at least `duration` from now
    pub fn suspend_for(&self, duration: Duration) {
        let mut guard = self.deadline.lock().expect("fence lock poisoned");
        *guard = Some(Instant::now() + duration);
    }

    /// Extend the current suspension; never shortens an existing deadline
    pub fn extend(&self, duration: Duration) {
        let mut guard = self.deadline.lock().expect("fence lock poisoned");
        let candidate = Instant::now() + duration;
        *guard = Some(match *guard {
            Some(existing) if existing > candidate => existing,
            _ => candidate,
        });
    }

    pub fn is_suspended(&self) -> bool {
        let guard = self.deadline.lock().expect("fence lock poisoned");
        matches!(*guard, Some(deadline) if deadline > Instant::now())
    }
}

/// Routing outcome for one envelope
#[derive(Debug)]
pub enum Routed {
    /// A hello resolved this session; buffered events drain in arrival order
    Resolved {
        root: PathBuf,
        drained: Vec<Envelope>,
    },
    /// The session is resolved and the event is ready for the indexer
    Event(RootedEvent),
    /// No root yet; the event was buffered
    Buffered,
    /// Liveness-only traffic, consumed here
    Ignored,
}

#[derive(Default)]
struct SessionState {
    root: Option<PathBuf>,
    external_root: Option<PathBuf>,
    buffer: Vec<Envelope>,
    hello: Option<HelloBody>,
    last_heartbeat: Option<Instant>,
}

/// Maps sessions to project roots and buffers events until resolution
pub struct SessionResolver {
    candidates: Vec<PathBuf>,
    fence: CompileFence,
    sessions: Mutex<HashMap<String, SessionState>>,
}

impl SessionResolver {
    /// `candidates` are scanned during productGUID resolution: configured
    /// extra roots plus any recent-project list the host supplies.
    pub fn new(candidates: Vec<PathBuf>, fence: CompileFence) -> Self {
        Self {
            candidates,
            fence,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Route one envelope through the resolver
    pub async fn route(&self, envelope: Envelope) -> Routed {
        let key = envelope.session_key().to_string();
        let mut sessions = self.sessions.lock().await;
        let state = sessions.entry(key.clone()).or_default();

        match envelope.ty.as_str() {
            types::HEARTBEAT | types::ACK => {
                state.last_heartbeat = Some(Instant::now());
                Routed::Ignored
            }
            types::HELLO => {
                let hello: HelloBody = envelope.body_as().unwrap_or_default();
                state.hello = Some(hello.clone());

                match self.resolve(&hello, state.external_root.as_deref()) {
                    Some(root) => {
                        info!("Session {} resolved to {:?}", key, root);
                        state.root = Some(root.clone());
                        let drained = std::mem::take(&mut state.buffer);
                        Routed::Resolved { root, drained }
                    }
                    None => {
                        warn!("Session {} hello did not resolve to a project root", key);
                        Routed::Buffered
                    }
                }
            }
            _ => match &state.root {
                Some(root) => Routed::Event(RootedEvent {
                    root: root.clone(),
                    envelope,
                }),
                None => {
                    debug!("Buffering {} for unresolved session {}", envelope.ty, key);
                    state.buffer.push(envelope);
                    Routed::Buffered
                }
            },
        }
    }

    /// Root resolved by an outer transport layer. Returns the buffered
    /// events now ready to drain.
    pub async fn set_external_root(&self, session: &str, root: PathBuf) -> Vec<Envelope> {
        let mut sessions = self.sessions.lock().await;
        let state = sessions.entry(session.to_string()).or_default();
        state.external_root = Some(root.clone());
        state.root = Some(root);
        std::mem::take(&mut state.buffer)
    }

    /// Current root for a session, if resolved
    pub async fn root_of(&self, session: &str) -> Option<PathBuf> {
        let sessions = self.sessions.lock().await;
        sessions.get(session).and_then(|s| s.root.clone())
    }

    /// Liveness check; always alive while the compile fence is suspended
    pub async fn is_alive(&self, session: &str, timeout: Duration) -> bool {
        if self.fence.is_suspended() {
            return true;
        }
        let sessions = self.sessions.lock().await;
        match sessions.get(session).and_then(|s| s.last_heartbeat) {
            Some(seen) => seen.elapsed() < timeout,
            None => false,
        }
    }

    /// Resolution order, stopping at the first hit:
    /// 1. candidate roots matched by productGUID
    /// 2. dataPath's parent when it exists and ends in `Assets`
    /// 3. a root supplied by the outer transport
    /// 4. candidate roots matched by major editor version
    fn resolve(&self, hello: &HelloBody, external: Option<&Path>) -> Option<PathBuf> {
        if let Some(guid) = hello.product_guid.as_deref() {
            for root in &self.candidates {
                if matches_product_guid(root, guid) {
                    return Some(root.clone());
                }
            }
        }

        if let Some(data_path) = hello.data_path.as_deref() {
            if let Some(root) = root_from_data_path(data_path) {
                return Some(root);
            }
        }

        if let Some(external) = external {
            return Some(external.to_path_buf());
        }

        if let Some(version) = hello.unity_version.as_deref() {
            for root in &self.candidates {
                if matches_major_version(root, version) {
                    return Some(root.clone());
                }
            }
        }

        None
    }
}

/// Derive the project root from an assets directory path
pub fn root_from_data_path(data_path: &Path) -> Option<PathBuf> {
    if !data_path.exists() {
        return None;
    }
    if data_path.file_name()?.to_str()? != "Assets" {
        return None;
    }
    data_path.parent().map(Path::to_path_buf)
}

/// True when the root's project settings mention the product guid
pub fn matches_product_guid(root: &Path, product_guid: &str) -> bool {
    let settings = root.join("ProjectSettings").join("ProjectSettings.asset");
    match std::fs::read(&settings) {
        Ok(bytes) => String::from_utf8_lossy(&bytes)
            .to_lowercase()
            .contains(&product_guid.to_lowercase()),
        Err(_) => false,
    }
}

/// True when the root's recorded editor version shares the major version
pub fn matches_major_version(root: &Path, unity_version: &str) -> bool {
    let major = match unity_version.split('.').next() {
        Some(major) if !major.is_empty() => major,
        _ => return false,
    };
    let version_file = root.join("ProjectSettings").join("ProjectVersion.txt");
    match std::fs::read_to_string(&version_file) {
        Ok(content) => content.lines().any(|line| {
            line.strip_prefix("m_EditorVersion:")
                .map(|v| v.trim().split('.').next() == Some(major))
                .unwrap_or(false)
        }),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn envelope(ty: &str, session: &str, body: serde_json::Value) -> Envelope {
        Envelope {
            v: 1,
            source: "unity".to_string(),
            ty: ty.to_string(),
            ts: 1712000000,
            id: format!("{ty}-id"),
            body,
            session: Some(session.to_string()),
        }
    }

    fn project_root(tmp: &TempDir, guid: &str, version: &str) -> PathBuf {
        let root = tmp.path().join("Project");
        let settings = root.join("ProjectSettings");
        std::fs::create_dir_all(&settings).unwrap();
        std::fs::create_dir_all(root.join("Assets")).unwrap();
        std::fs::write(
            settings.join("ProjectSettings.asset"),
            format!("PlayerSettings:\n  productGUID: {guid}\n"),
        )
        .unwrap();
        std::fs::write(
            settings.join("ProjectVersion.txt"),
            format!("m_EditorVersion: {version}\n"),
        )
        .unwrap();
        root
    }

    #[tokio::test]
    async fn test_resolution_by_product_guid() {
        let tmp = TempDir::new().unwrap();
        let root = project_root(&tmp, "d2f5a3b1c4e6", "2022.3.14f1");
        let resolver = SessionResolver::new(vec![root.clone()], CompileFence::new());

        let routed = resolver
            .route(envelope(
                types::HELLO,
                "s1",
                json!({"productGUID": "D2F5A3B1C4E6"}),
            ))
            .await;

        match routed {
            Routed::Resolved { root: resolved, drained } => {
                assert_eq!(resolved, root);
                assert!(drained.is_empty());
            }
            other => panic!("expected resolution, got {other:?}"),
        }
        assert_eq!(resolver.root_of("s1").await, Some(root));
    }

    #[tokio::test]
    async fn test_resolution_by_data_path() {
        let tmp = TempDir::new().unwrap();
        let root = project_root(&tmp, "unrelated", "2022.3.14f1");
        let resolver = SessionResolver::new(Vec::new(), CompileFence::new());

        let routed = resolver
            .route(envelope(
                types::HELLO,
                "s1",
                json!({"dataPath": root.join("Assets")}),
            ))
            .await;

        assert!(matches!(routed, Routed::Resolved { root: r, .. } if r == root));
    }

    #[tokio::test]
    async fn test_resolution_by_major_version_tiebreak() {
        let tmp = TempDir::new().unwrap();
        let root = project_root(&tmp, "other-guid", "2022.3.14f1");
        let resolver = SessionResolver::new(vec![root.clone()], CompileFence::new());

        let routed = resolver
            .route(envelope(
                types::HELLO,
                "s1",
                json!({"productGUID": "no-match", "unityVersion": "2022.1.0f1"}),
            ))
            .await;

        assert!(matches!(routed, Routed::Resolved { root: r, .. } if r == root));
    }

    #[tokio::test]
    async fn test_buffering_until_resolution() {
        let tmp = TempDir::new().unwrap();
        let root = project_root(&tmp, "pg-1", "2022.3.14f1");
        let resolver = SessionResolver::new(vec![root.clone()], CompileFence::new());

        // Events before hello are buffered in arrival order.
        let first = resolver
            .route(envelope(types::ASSETS_IMPORTED, "s1", json!({"items": []})))
            .await;
        assert!(matches!(first, Routed::Buffered));
        let second = resolver
            .route(envelope(types::SCENE_SAVED, "s1", json!({})))
            .await;
        assert!(matches!(second, Routed::Buffered));

        let routed = resolver
            .route(envelope(types::HELLO, "s1", json!({"productGUID": "pg-1"})))
            .await;
        match routed {
            Routed::Resolved { drained, .. } => {
                let types: Vec<&str> = drained.iter().map(|e| e.ty.as_str()).collect();
                assert_eq!(types, vec![types::ASSETS_IMPORTED, types::SCENE_SAVED]);
            }
            other => panic!("expected resolution, got {other:?}"),
        }

        // Subsequent events flow straight through with the resolved root.
        let after = resolver
            .route(envelope(types::ASSETS_DELETED, "s1", json!({"items": []})))
            .await;
        assert!(matches!(after, Routed::Event(e) if e.root == root));
    }

    #[tokio::test]
    async fn test_unresolved_hello_stays_buffered() {
        let resolver = SessionResolver::new(Vec::new(), CompileFence::new());
        let routed = resolver
            .route(envelope(types::HELLO, "s1", json!({"productGUID": "none"})))
            .await;
        assert!(matches!(routed, Routed::Buffered));
        assert_eq!(resolver.root_of("s1").await, None);
    }

    #[tokio::test]
    async fn test_external_root_drains_buffer() {
        let resolver = SessionResolver::new(Vec::new(), CompileFence::new());
        resolver
            .route(envelope(types::ASSETS_IMPORTED, "s1", json!({"items": []})))
            .await;

        let drained = resolver
            .set_external_root("s1", PathBuf::from("/proj"))
            .await;
        assert_eq!(drained.len(), 1);
        assert_eq!(resolver.root_of("s1").await, Some(PathBuf::from("/proj")));
    }

    #[tokio::test]
    async fn test_heartbeat_liveness_and_fence() {
        let fence = CompileFence::new();
        let resolver = SessionResolver::new(Vec::new(), fence.clone());

        assert!(!resolver.is_alive("s1", Duration::from_secs(30)).await);

        resolver
            .route(envelope(types::HEARTBEAT, "s1", json!({})))
            .await;
        assert!(resolver.is_alive("s1", Duration::from_secs(30)).await);

        // A suspended fence keeps even unseen sessions alive.
        fence.suspend_for(COMPILE_SUSPEND);
        assert!(resolver.is_alive("s2", Duration::from_secs(30)).await);
    }

    #[test]
    fn test_fence_extend_never_shortens() {
        let fence = CompileFence::new();
        fence.suspend_for(Duration::from_secs(120));
        fence.extend(Duration::from_secs(30));
        assert!(fence.is_suspended());
    }
}
