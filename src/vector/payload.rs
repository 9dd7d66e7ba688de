//! Point and payload schema for the vector collection

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// A point ready to be upserted
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

impl VectorPoint {
    /// REST body fragment for one point
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id.to_string(),
            "vector": self.vector,
            "payload": self.payload,
        })
    }
}

/// Payload stored with each chunk point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointPayload {
    /// Project-relative path, forward-slash normalized, no leading `./`
    pub rel_path: String,

    /// Inclusive 1-based line range, rendered `start-end`
    pub range: String,

    /// FNV-1a 32 fingerprint of the chunk text, hex
    pub file_hash: String,

    /// Asset class of the owning file (`Script` | `Scene`)
    pub kind: String,

    /// Owning asset guid, when the originating event carried one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,

    /// Transport session that produced this point
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,

    /// Unix seconds of the write
    pub updated_ts: i64,

    /// Chunk text
    pub text: String,
}

/// One search hit
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Value,
}

/// Optional payload filter for top-K search
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub rel_path: Option<String>,
    pub kind: Option<String>,
    pub guid: Option<String>,
    pub session: Option<String>,
}

/// One exact-match condition on a keyword payload field
pub(crate) fn match_condition(key: &str, value: &str) -> Value {
    json!({"key": key, "match": {"value": value}})
}

impl SearchFilter {
    /// Build the REST filter body, or None when no condition is set
    pub fn to_json(&self) -> Option<Value> {
        let mut must = Vec::new();
        if let Some(ref rel_path) = self.rel_path {
            must.push(match_condition("rel_path", rel_path));
        }
        if let Some(ref kind) = self.kind {
            must.push(match_condition("kind", kind));
        }
        if let Some(ref guid) = self.guid {
            must.push(match_condition("guid", guid));
        }
        if let Some(ref session) = self.session {
            must.push(match_condition("session", session));
        }
        if must.is_empty() {
            None
        } else {
            Some(json!({ "must": must }))
        }
    }
}
