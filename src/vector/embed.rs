// src/vector/embed.rs
//
// Embedding generation for fingerprint text projections.
//
// Two backends behind one enum, both producing EMBED_DIM-dimensional
// vectors:
//
//   Remote — Gemini text-embedding-004 over REST (GEMINI_API_KEY). The
//            model's native size is 768; anything else is rejected as a
//            malformed response.
//   Local  — deterministic random-feature-hashing embedding, used when no
//            key is configured so neighbour search degrades instead of
//            disappearing:
//              1. lowercase + strip punctuation + collapse whitespace
//              2. word n-grams, n = 1..3
//              3. SHA-256 each n-gram into ±1 features across all dims
//              4. sum and L2-normalise
//
// Identical projections embed to identical vectors on both backends (the
// remote model is expected to be deterministic for a fixed version; the
// system only relies on this through idempotent upsert by stable id).

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::error::ProviderError;

/// Fixed embedding dimensionality — the remote model's native size, shared
/// by the local backend and the vector collection schema.
pub const EMBED_DIM: usize = 768;

const GEMINI_EMBED_MODEL: &str = "text-embedding-004";

pub enum Embedder {
    Remote(GeminiEmbedder),
    Local(LocalEmbedder),
}

impl Embedder {
    /// Remote when GEMINI_API_KEY is configured, local otherwise.
    pub fn from_env(client: &Client) -> Self {
        match std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.trim().is_empty()) {
            Some(key) => Self::Remote(GeminiEmbedder::new(client.clone(), key)),
            None      => Self::Local(LocalEmbedder),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Remote(_) => "gemini",
            Self::Local(_)  => "local-hash",
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        match self {
            Self::Remote(remote) => remote.embed(text).await,
            Self::Local(local)   => Ok(local.embed(text)),
        }
    }
}

// ── Remote backend ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct EmbedContentResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

pub struct GeminiEmbedder {
    client:  Client,
    api_key: String,
}

impl GeminiEmbedder {
    pub fn new(client: Client, api_key: String) -> Self {
        Self { client, api_key }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{GEMINI_EMBED_MODEL}:embedContent?key={}",
            self.api_key,
        );
        let body = json!({
            "model": format!("models/{GEMINI_EMBED_MODEL}"),
            "content": { "parts": [{ "text": text }] },
        });

        let resp = self.client.post(&url).json(&body).send().await?;
        let status = resp.status();
        if status.as_u16() >= 400 {
            return Err(ProviderError::Status(status.as_u16()));
        }
        let parsed: EmbedContentResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        if parsed.embedding.values.len() != EMBED_DIM {
            return Err(ProviderError::Malformed(format!(
                "embedding dimension {} != {EMBED_DIM}",
                parsed.embedding.values.len(),
            )));
        }
        Ok(parsed.embedding.values)
    }
}

// ── Local backend ─────────────────────────────────────────────────────────────

pub struct LocalEmbedder;

impl LocalEmbedder {
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let normalized = normalize_text(text);
        let tokens: Vec<&str> = normalized.split_whitespace().collect();
        let mut vec = vec![0.0f32; EMBED_DIM];

        for n in 1..=3usize {
            for window in tokens.windows(n) {
                let feature = token_feature(&window.join(" "));
                for (slot, value) in vec.iter_mut().zip(feature.iter()) {
                    *slot += value;
                }
            }
        }

        let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 1e-8 {
            for v in vec.iter_mut() {
                *v /= norm;
            }
        }
        vec
    }
}

/// Deterministic ±1 feature vector for one token, derived from SHA-256.
fn token_feature(token: &str) -> Vec<f32> {
    let mut hasher = Sha256::new();
    hasher.update(b"geogate_rfh_v1:");
    hasher.update(token.as_bytes());
    let digest = hasher.finalize();

    let mut feature = vec![0.0f32; EMBED_DIM];
    for (i, slot) in feature.iter_mut().enumerate() {
        let byte = digest[i % digest.len()];
        let bit = (byte >> (i % 8)) & 1;
        *slot = if bit == 1 { 1.0 } else { -1.0 };
    }
    feature
}

fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == ' ' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
