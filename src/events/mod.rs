//! Wire-level event envelope and typed event bodies
//!
//! The editor agent streams change events as JSON envelopes. The envelope is
//! bit-exact on the transport; bodies are opaque JSON decoded per event type
//! with tolerant field coercions for legacy editor builds.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

pub mod types {
    //! Event type strings as they appear on the wire

    pub const HELLO: &str = "hello";
    pub const HEARTBEAT: &str = "hb";
    pub const ACK: &str = "ack";
    pub const ASSETS_IMPORTED: &str = "assets_imported";
    pub const ASSETS_DELETED: &str = "assets_deleted";
    pub const ASSETS_MOVED: &str = "assets_moved";
    pub const SCENE_SAVED: &str = "scene_saved";
    pub const PROJECT_CHANGED: &str = "project_changed";
    pub const COMPILE_STARTED: &str = "compile_started";
    pub const COMPILE_FINISHED: &str = "compile_finished";
    pub const WILL_SAVE_ASSETS: &str = "will_save_assets";
    pub const MANIFEST_BEGIN: &str = "manifest_begin";
    pub const MANIFEST_BATCH: &str = "manifest_batch";
    pub const MANIFEST_END: &str = "manifest_end";
}

/// Event envelope as framed by the transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default = "default_version")]
    pub v: i64,
    pub source: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub ts: i64,
    pub id: String,
    #[serde(default)]
    pub body: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

fn default_version() -> i64 {
    1
}

impl Envelope {
    /// Parse one envelope from a JSON line, rejecting malformed frames.
    pub fn parse(line: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(line)
            .map_err(|e| Error::InvalidEnvelope(e.to_string()))?;
        envelope.validate()?;
        Ok(envelope)
    }

    /// Minimal structural validation before routing
    pub fn validate(&self) -> Result<()> {
        if self.ty.is_empty() {
            return Err(Error::InvalidEnvelope("missing event type".to_string()));
        }
        if self.id.is_empty() {
            return Err(Error::InvalidEnvelope("missing event id".to_string()));
        }
        Ok(())
    }

    /// Session key, defaulting for transports that do not tag sessions
    pub fn session_key(&self) -> &str {
        self.session.as_deref().unwrap_or("default")
    }

    /// Decode the body into a typed structure
    pub fn body_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.body.clone())
            .map_err(|e| Error::InvalidEnvelope(format!("{} body: {}", self.ty, e)))
    }
}

/// Whether the transport is expected to ACK this event type.
/// `hb` and `ack` are never acknowledged.
pub fn should_ack(ty: &str) -> bool {
    matches!(
        ty,
        types::ASSETS_IMPORTED
            | types::ASSETS_DELETED
            | types::ASSETS_MOVED
            | types::SCENE_SAVED
            | types::PROJECT_CHANGED
            | types::COMPILE_STARTED
            | types::COMPILE_FINISHED
            | types::WILL_SAVE_ASSETS
            | types::HELLO
    )
}

/// One asset entry in an event body or manifest batch.
///
/// Legacy editor builds have shipped the guid under several names and the
/// content digest under `sha256`; both are coerced here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetItem {
    #[serde(default, alias = "assetGuid", alias = "id")]
    pub guid: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub mtime: Option<i64>,
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(default, alias = "sha256")]
    pub hash: Option<String>,
    #[serde(default, alias = "isFolder")]
    pub is_folder: bool,
    #[serde(default)]
    pub deps: Vec<String>,
}

/// Body of `assets_imported` / `assets_moved` / `assets_deleted`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetsBody {
    #[serde(default)]
    pub items: Vec<AssetItem>,
}

/// Body of `hello`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HelloBody {
    #[serde(default, alias = "productGUID")]
    pub product_guid: Option<String>,
    #[serde(default, alias = "cloudProjectId")]
    pub cloud_project_id: Option<String>,
    #[serde(default, alias = "unityVersion")]
    pub unity_version: Option<String>,
    #[serde(default, alias = "dataPath")]
    pub data_path: Option<PathBuf>,
}

/// Body of `manifest_begin` / `manifest_end`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestMark {
    #[serde(default)]
    pub total: usize,
}

/// Body of `manifest_batch`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestBatch {
    #[serde(default)]
    pub items: Vec<AssetItem>,
}

/// An envelope paired with the project root its session resolved to
#[derive(Debug, Clone)]
pub struct RootedEvent {
    pub envelope: Envelope,
    pub root: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_envelope() {
        let line = r#"{"v":1,"source":"unity","type":"assets_imported","ts":1712000000,"id":"e1","body":{"items":[]},"session":"s1"}"#;
        let env = Envelope::parse(line).unwrap();
        assert_eq!(env.ty, "assets_imported");
        assert_eq!(env.session_key(), "s1");
    }

    #[test]
    fn test_parse_rejects_missing_type() {
        let line = r#"{"source":"unity","type":"","ts":0,"id":"e1"}"#;
        assert!(Envelope::parse(line).is_err());
    }

    #[test]
    fn test_guid_and_hash_coercion() {
        let item: AssetItem = serde_json::from_str(
            r#"{"assetGuid":"ABC","path":"Assets/S.cs","sha256":"deadbeef"}"#,
        )
        .unwrap();
        assert_eq!(item.guid.as_deref(), Some("ABC"));
        assert_eq!(item.hash.as_deref(), Some("deadbeef"));

        let item: AssetItem =
            serde_json::from_str(r#"{"id":"DEF","path":"Assets/T.cs","hash":"h"}"#).unwrap();
        assert_eq!(item.guid.as_deref(), Some("DEF"));
    }

    #[test]
    fn test_hello_aliases() {
        let body: HelloBody = serde_json::from_str(
            r#"{"productGUID":"pg","cloudProjectId":"cp","unityVersion":"2022.3.1f1","dataPath":"/proj/Assets"}"#,
        )
        .unwrap();
        assert_eq!(body.product_guid.as_deref(), Some("pg"));
        assert_eq!(body.unity_version.as_deref(), Some("2022.3.1f1"));
        assert!(body.data_path.unwrap().ends_with("Assets"));
    }

    #[test]
    fn test_ack_table() {
        assert!(should_ack(types::ASSETS_IMPORTED));
        assert!(should_ack(types::HELLO));
        assert!(should_ack(types::WILL_SAVE_ASSETS));
        assert!(!should_ack(types::HEARTBEAT));
        assert!(!should_ack(types::ACK));
        assert!(!should_ack("unknown_type"));
    }
}
