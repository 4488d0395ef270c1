// src/risk/mod.rs
//
// Risk evaluator — final tier from the fingerprint plus its neighbours.
//
// Two paths produce the same RiskEvaluation shape: the deterministic lite
// tally (default) and the generative full assessment. The full path falls
// back to lite whenever the generative model is missing or misbehaving;
// neither path ever propagates an error to the caller.

pub mod full;
pub mod lite;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

use crate::error::GenerativeError;
use crate::events::{EvaluationMode, Neighbour, RiskEvaluation, SessionFingerprint};
use crate::thresholds::Thresholds;

/// Neighbours included in the full-path prompt.
const MAX_PROMPT_NEIGHBOURS: usize = 5;

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerativeError>;
}

pub struct RiskEvaluator {
    generator: Option<Arc<dyn TextGenerator>>,
}

impl RiskEvaluator {
    pub fn new(generator: Option<Arc<dyn TextGenerator>>) -> Self {
        Self { generator }
    }

    pub fn from_env(client: &Client) -> Self {
        let generator = GeminiGenerator::from_env(client)
            .map(|g| Arc::new(g) as Arc<dyn TextGenerator>);
        Self::new(generator)
    }

    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    /// Evaluate one session. Infallible by construction: internal errors
    /// surface as an UNKNOWN-tier evaluation with the error marker.
    pub async fn evaluate(
        &self,
        mode:        EvaluationMode,
        fingerprint: &SessionFingerprint,
        neighbours:  &[Neighbour],
        thresholds:  &Thresholds,
    ) -> RiskEvaluation {
        if mode == EvaluationMode::Full {
            if let Some(generator) = self.generator.as_deref() {
                match full::evaluate(generator, fingerprint, neighbours).await {
                    Ok(evaluation) => return evaluation,
                    Err(e) => warn!("full risk path unavailable, falling back to lite: {e}"),
                }
            }
        }
        lite::evaluate(self.generator.as_deref(), fingerprint, neighbours, thresholds).await
    }
}

// ── Gemini generative backend ─────────────────────────────────────────────────

const GEMINI_MODEL: &str = "gemini-2.0-flash";

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

pub struct GeminiGenerator {
    client:  Client,
    api_key: String,
}

impl GeminiGenerator {
    pub fn new(client: Client, api_key: String) -> Self {
        Self { client, api_key }
    }

    pub fn from_env(client: &Client) -> Option<Self> {
        let key = std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.trim().is_empty())?;
        Some(Self::new(client.clone(), key))
    }
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerativeError> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{GEMINI_MODEL}:generateContent?key={}",
            self.api_key,
        );
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
        });

        let resp = self.client.post(&url).json(&body).send().await?;
        let status = resp.status();
        if status.as_u16() >= 400 {
            return Err(GenerativeError::Status(status.as_u16()));
        }
        let parsed: GenerateContentResponse =
            resp.json().await.map_err(GenerativeError::Http)?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(GenerativeError::Empty);
        }
        Ok(text)
    }
}

/// Compact neighbour digest shared by both prompt builders.
pub(crate) fn neighbour_digest(neighbours: &[Neighbour]) -> String {
    neighbours
        .iter()
        .take(MAX_PROMPT_NEIGHBOURS)
        .map(|n| {
            format!(
                "- similarity {:.2}, risk {}, indicators: {}",
                n.score,
                n.fingerprint.summary.overall_risk,
                if n.fingerprint.summary.spoofing_indicators.is_empty() {
                    "none".to_string()
                } else {
                    n.fingerprint.summary.spoofing_indicators.join("; ")
                },
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
