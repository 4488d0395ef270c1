// src/vector/mod.rs
//
// Vector index client — cosine nearest-neighbour storage for session
// fingerprints.
//
// The index is an external Qdrant instance spoken over its REST surface:
//   PUT  /collections/{name}                 create (idempotent here)
//   PUT  /collections/{name}/points?wait=true  upsert by point id
//   POST /collections/{name}/points/search   cosine k-NN with payload
//
// Points are keyed by the fingerprint UUID, so re-upserting the same
// session replaces rather than duplicates. All operations are safe to call
// from concurrent requests; collection creation collapses to one attempt.

pub mod embed;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::error::VectorError;
use crate::events::{Neighbour, VectorPoint};
use embed::EMBED_DIM;

/// The one collection the core owns.
pub const COLLECTION: &str = "geo_spoofer_sessions";

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Idempotently create the collection (cosine, EMBED_DIM).
    async fn ensure_collection(&self) -> Result<(), VectorError>;

    /// Write one point; same id replaces, never duplicates.
    async fn upsert(&self, point: VectorPoint) -> Result<(), VectorError>;

    /// Cosine nearest neighbours, best first. Empty when the collection has
    /// no points.
    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<Neighbour>, VectorError>;
}

pub struct QdrantIndex {
    client:   Client,
    base_url: String,
    api_key:  Option<String>,
    created:  OnceCell<()>,
}

impl QdrantIndex {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url, api_key, created: OnceCell::new() }
    }

    /// None when QDRANT_URL is not configured — the pipeline then runs with
    /// pattern analysis degraded.
    pub fn from_env(client: &Client) -> Option<Self> {
        let url = std::env::var("QDRANT_URL").ok().filter(|u| !u.trim().is_empty())?;
        let api_key = std::env::var("QDRANT_API_KEY").ok().filter(|k| !k.trim().is_empty());
        Some(Self::new(client.clone(), url, api_key))
    }

    fn request(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("api-key", key),
            None      => req,
        }
    }

    async fn create_collection(&self) -> Result<(), VectorError> {
        let url = format!("{}/collections/{COLLECTION}", self.base_url);
        let body = json!({
            "vectors": { "size": EMBED_DIM, "distance": "Cosine" },
        });
        let resp = self.request(self.client.put(&url).json(&body)).send().await?;
        let status = resp.status().as_u16();

        // 409 = collection already exists; that is the idempotent success path.
        if status == 409 {
            return Ok(());
        }
        if status >= 400 {
            let text = resp.text().await.unwrap_or_default();
            if text.contains("already exists") {
                return Ok(());
            }
            return Err(VectorError::Status(status, text));
        }
        info!("created vector collection {COLLECTION} (dim {EMBED_DIM}, cosine)");
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn ensure_collection(&self) -> Result<(), VectorError> {
        // OnceCell collapses concurrent callers to a single creation attempt;
        // a failed attempt leaves the cell empty so the next request retries.
        self.created
            .get_or_try_init(|| self.create_collection())
            .await
            .map(|_| ())
    }

    async fn upsert(&self, point: VectorPoint) -> Result<(), VectorError> {
        let url = format!("{}/collections/{COLLECTION}/points?wait=true", self.base_url);
        let body = json!({
            "points": [{
                "id":      point.id.to_string(),
                "vector":  point.vector,
                "payload": point.payload,
            }],
        });
        let resp = self.request(self.client.put(&url).json(&body)).send().await?;
        let status = resp.status().as_u16();
        if status >= 400 {
            return Err(VectorError::Status(status, resp.text().await.unwrap_or_default()));
        }
        Ok(())
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<Neighbour>, VectorError> {
        let url = format!("{}/collections/{COLLECTION}/points/search", self.base_url);
        let body = json!({
            "vector":       vector,
            "limit":        limit,
            "with_payload": true,
        });
        let resp = self.request(self.client.post(&url).json(&body)).send().await?;
        let status = resp.status().as_u16();
        if status >= 400 {
            return Err(VectorError::Status(status, resp.text().await.unwrap_or_default()));
        }
        let parsed: Value = resp
            .json()
            .await
            .map_err(|e| VectorError::Malformed(e.to_string()))?;
        Ok(parse_search_results(&parsed))
    }
}

/// Pull neighbours out of a Qdrant search response. Hits with unparseable
/// payloads are skipped rather than failing the search.
fn parse_search_results(response: &Value) -> Vec<Neighbour> {
    let Some(hits) = response.get("result").and_then(|r| r.as_array()) else {
        return Vec::new();
    };

    hits.iter()
        .filter_map(|hit| {
            let id = match hit.get("id") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _                      => return None,
            };
            let score = hit.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0) as f32;
            let payload = hit.get("payload")?;
            match serde_json::from_value(payload.clone()) {
                Ok(fingerprint) => Some(Neighbour {
                    id,
                    score: score.clamp(0.0, 1.0),
                    fingerprint,
                }),
                Err(e) => {
                    warn!("skipping neighbour {id} with unparseable payload: {e}");
                    None
                }
            }
        })
        .collect()
}
