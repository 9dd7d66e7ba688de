//! Vector backend integration
//!
//! Thin client over Qdrant's REST surface:
//! - Collection management and payload indices
//! - Point upsert/delete operations with `wait=true`
//! - Scroll-by-filter and top-K search
//! - Readiness probe
//!
//! Every non-2xx response keeps the backend's error body verbatim.

mod payload;

pub use payload::*;

use crate::chunk::{normalize_guid, normalize_rel_path};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

/// Scroll page size when collecting point IDs by filter
const SCROLL_PAGE: usize = 256;

/// Contract every vector backend implementation satisfies.
///
/// The store is idempotent at the point-ID level: duplicate upserts of the
/// same point are safe.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Idempotent collection bring-up with payload indices on `rel_path`
    /// and `guid`
    async fn ensure_collection(&self, dim: usize) -> Result<()>;

    /// Poll the readiness probe until success or deadline
    async fn wait_ready(&self, timeout: Duration) -> Result<()>;

    /// Upsert one batch of points; atomic from the caller's perspective
    async fn upsert_points(&self, points: Vec<VectorPoint>) -> Result<()>;

    /// Remove every point whose `rel_path` payload matches exactly.
    /// Returns the number of points removed.
    async fn delete_by_path(&self, rel_path: &str) -> Result<usize>;

    /// Filter-based delete by owning asset guid
    async fn delete_by_guid(&self, guid: &str) -> Result<()>;

    /// Delete explicit point IDs
    async fn delete_by_ids(&self, ids: &[Uuid]) -> Result<()>;

    /// Top-K cosine search with optional payload filter and score threshold
    async fn search_top_k(
        &self,
        vector: Vec<f32>,
        k: usize,
        filter: Option<SearchFilter>,
        threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>>;

    /// Exact point count
    async fn count_points(&self) -> Result<u64>;

    /// Drop the collection if it exists
    async fn drop_collection(&self) -> Result<()>;
}

/// Qdrant REST gateway
pub struct QdrantGateway {
    client: Client,
    base_url: Url,
    collection: String,
}

impl QdrantGateway {
    pub fn new(base_url: &str, collection: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url,
            collection: collection.to_string(),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("Invalid vector backend URL: {e}")))
    }

    fn collection_path(&self, suffix: &str) -> String {
        format!("/collections/{}{}", self.collection, suffix)
    }

    /// Check a response, preserving the error body on non-2xx
    async fn into_json(resp: reqwest::Response) -> Result<Value> {
        let status = resp.status();
        if status.is_success() {
            if status == StatusCode::NO_CONTENT {
                return Ok(Value::Null);
            }
            Ok(resp.json().await?)
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(Error::VectorStore {
                status: status.as_u16(),
                body,
            })
        }
    }

    /// Like [`into_json`] but treating the listed statuses as success
    async fn into_json_accepting(
        resp: reqwest::Response,
        accepted: &[StatusCode],
    ) -> Result<Value> {
        let status = resp.status();
        if accepted.contains(&status) {
            return Ok(Value::Null);
        }
        Self::into_json(resp).await
    }

    async fn create_payload_index(&self, field: &str) -> Result<()> {
        let url = self.endpoint(&self.collection_path("/index"))?;
        let body = json!({
            "field_name": field,
            "field_schema": "keyword",
        });
        let resp = self
            .client
            .put(url)
            .query(&[("wait", "true")])
            .json(&body)
            .send()
            .await?;
        Self::into_json_accepting(resp, &[StatusCode::CONFLICT]).await?;
        Ok(())
    }

    /// One scroll page of point IDs matching a filter
    async fn scroll_ids(
        &self,
        filter: &Value,
        offset: Option<Value>,
    ) -> Result<(Vec<Value>, Option<Value>)> {
        let url = self.endpoint(&self.collection_path("/points/scroll"))?;
        let mut body = json!({
            "filter": filter,
            "limit": SCROLL_PAGE,
            "with_payload": false,
            "with_vector": false,
        });
        if let Some(offset) = offset {
            body["offset"] = offset;
        }

        let resp = self.client.post(url).json(&body).send().await?;
        let value = Self::into_json(resp).await?;

        let points = value["result"]["points"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        let ids = points
            .into_iter()
            .filter_map(|p| p.get("id").cloned())
            .collect();
        let next = match &value["result"]["next_page_offset"] {
            Value::Null => None,
            other => Some(other.clone()),
        };
        Ok((ids, next))
    }

    async fn delete_points_body(&self, body: Value) -> Result<()> {
        let url = self.endpoint(&self.collection_path("/points/delete"))?;
        let resp = self
            .client
            .post(url)
            .query(&[("wait", "true")])
            .json(&body)
            .send()
            .await?;
        Self::into_json(resp).await?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantGateway {
    async fn ensure_collection(&self, dim: usize) -> Result<()> {
        let url = self.endpoint(&self.collection_path(""))?;
        let body = json!({
            "vectors": {
                "size": dim,
                "distance": "Cosine",
            },
            "on_disk_payload": false,
        });

        let resp = self.client.put(url).json(&body).send().await?;
        let status = resp.status();
        Self::into_json_accepting(resp, &[StatusCode::CONFLICT]).await?;

        if status == StatusCode::CONFLICT {
            debug!("Collection {} already exists", self.collection);
        } else {
            info!(
                "Created collection {} with dimension {}",
                self.collection, dim
            );
        }

        self.create_payload_index("rel_path").await?;
        self.create_payload_index("guid").await?;
        Ok(())
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let url = self.endpoint("/readyz")?;
        let mut last_error = String::from("no probe attempted");

        loop {
            match self.client.get(url.clone()).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => last_error = format!("probe returned HTTP {}", resp.status()),
                Err(e) => last_error = e.to_string(),
            }
            if Instant::now() >= deadline {
                return Err(Error::VectorBackendUnavailable(last_error));
            }
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
    }

    async fn upsert_points(&self, points: Vec<VectorPoint>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        debug!(
            "Upserting {} points to collection {}",
            points.len(),
            self.collection
        );

        let body = json!({
            "points": points.iter().map(VectorPoint::to_json).collect::<Vec<_>>(),
        });
        let url = self.endpoint(&self.collection_path("/points"))?;
        let resp = self
            .client
            .put(url)
            .query(&[("wait", "true")])
            .json(&body)
            .send()
            .await?;
        Self::into_json(resp).await?;
        Ok(())
    }

    async fn delete_by_path(&self, rel_path: &str) -> Result<usize> {
        let normalized = normalize_rel_path(rel_path);
        let filter = json!({
            "must": [match_condition("rel_path", &normalized)],
        });

        let mut removed = 0usize;
        let mut offset: Option<Value> = None;
        loop {
            let (ids, next) = self.scroll_ids(&filter, offset).await?;
            if !ids.is_empty() {
                removed += ids.len();
                self.delete_points_body(json!({ "points": ids })).await?;
            }
            match next {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        if removed > 0 {
            debug!("Removed {} points for path {}", removed, normalized);
        }
        Ok(removed)
    }

    async fn delete_by_guid(&self, guid: &str) -> Result<()> {
        let normalized = normalize_guid(guid);
        self.delete_points_body(json!({
            "filter": {
                "must": [match_condition("guid", &normalized)],
            },
        }))
        .await
    }

    async fn delete_by_ids(&self, ids: &[Uuid]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let ids: Vec<Value> = ids.iter().map(|id| json!(id.to_string())).collect();
        self.delete_points_body(json!({ "points": ids })).await
    }

    async fn search_top_k(
        &self,
        vector: Vec<f32>,
        k: usize,
        filter: Option<SearchFilter>,
        threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>> {
        let mut body = json!({
            "vector": vector,
            "limit": k,
            "with_payload": true,
        });
        if let Some(filter) = filter.and_then(|f| f.to_json()) {
            body["filter"] = filter;
        }
        if let Some(threshold) = threshold {
            body["score_threshold"] = json!(threshold);
        }

        let url = self.endpoint(&self.collection_path("/points/search"))?;
        let resp = self.client.post(url).json(&body).send().await?;
        let value = Self::into_json(resp).await?;

        let hits = value["result"].as_array().cloned().unwrap_or_default();
        let results = hits
            .into_iter()
            .map(|hit| ScoredPoint {
                id: match &hit["id"] {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                },
                score: hit["score"].as_f64().unwrap_or(0.0) as f32,
                payload: hit["payload"].clone(),
            })
            .collect();
        Ok(results)
    }

    async fn count_points(&self) -> Result<u64> {
        let url = self.endpoint(&self.collection_path("/points/count"))?;
        let resp = self
            .client
            .post(url)
            .json(&json!({"exact": true}))
            .send()
            .await?;
        let value = Self::into_json(resp).await?;
        Ok(value["result"]["count"].as_u64().unwrap_or(0))
    }

    async fn drop_collection(&self) -> Result<()> {
        let url = self.endpoint(&self.collection_path(""))?;
        let resp = self.client.delete(url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            warn!("Collection {} was already absent", self.collection);
            return Ok(());
        }
        Self::into_json(resp).await?;
        info!("Dropped collection {}", self.collection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_paths() {
        let gateway = QdrantGateway::new("http://127.0.0.1:6333", "movesia").unwrap();
        assert_eq!(gateway.collection(), "movesia");
        assert_eq!(
            gateway.collection_path("/points/scroll"),
            "/collections/movesia/points/scroll"
        );
        assert_eq!(
            gateway
                .endpoint(&gateway.collection_path(""))
                .unwrap()
                .as_str(),
            "http://127.0.0.1:6333/collections/movesia"
        );
    }

    #[test]
    fn test_rejects_invalid_url() {
        assert!(QdrantGateway::new("not a url", "movesia").is_err());
    }
}
