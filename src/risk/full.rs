// src/risk/full.rs
//
// Full risk path — one generative-model round trip per session.
//
// The fingerprint and up to five neighbours go out in a single prompt that
// demands a strict JSON object. The parse outcome is an explicit variant,
// never an exception path:
//
//   Parsed(assessment) — the model answered in shape
//   Fallback(raw)      — anything else; mapped to {MEDIUM, 70, raw text}
//
// A transport-level failure (HTTP, empty response) is returned as an error
// so the caller can drop to the lite path instead.

use serde::Deserialize;

use crate::error::GenerativeError;
use crate::events::{
    Neighbour, ProcessingMarker, RiskEvaluation, RiskTier, SessionFingerprint,
};
use crate::fingerprint::text_projection;
use crate::risk::{neighbour_digest, TextGenerator};

/// Confidence assigned when the model's reply did not parse as JSON.
const FALLBACK_CONFIDENCE: u8 = 70;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GenerativeAssessment {
    risk_assessment:      String,
    confidence:           Option<f64>,
    explanation:          String,
    patterns:             Vec<String>,
    technical_indicators: Vec<String>,
    spoofing_techniques:  Vec<String>,
    recommendations:      Vec<String>,
    similarity_insights:  Option<String>,
}

enum Outcome {
    Parsed(GenerativeAssessment),
    Fallback(String),
}

pub async fn evaluate(
    generator:   &dyn TextGenerator,
    fingerprint: &SessionFingerprint,
    neighbours:  &[Neighbour],
) -> Result<RiskEvaluation, GenerativeError> {
    let prompt = build_prompt(fingerprint, neighbours);
    let raw = generator.generate(&prompt).await?;

    Ok(match parse_response(&raw) {
        Outcome::Parsed(assessment) => {
            let confidence = assessment
                .confidence
                .map(|c| c.clamp(0.0, 100.0).round() as u8)
                .unwrap_or(FALLBACK_CONFIDENCE);
            let mut patterns = assessment.patterns;
            patterns.extend(assessment.spoofing_techniques);

            RiskEvaluation {
                tier:                parse_tier(&assessment.risk_assessment),
                confidence,
                explanation:         assessment.explanation,
                risk_factors:        assessment.technical_indicators,
                patterns,
                recommendations:     assessment.recommendations,
                similarity_insights: assessment.similarity_insights,
                processing:          ProcessingMarker::Full,
            }
        }
        Outcome::Fallback(text) => RiskEvaluation {
            tier:                RiskTier::Medium,
            confidence:          FALLBACK_CONFIDENCE,
            explanation:         text,
            risk_factors:        Vec::new(),
            patterns:            Vec::new(),
            recommendations:     Vec::new(),
            similarity_insights: None,
            processing:          ProcessingMarker::Full,
        },
    })
}

fn build_prompt(fingerprint: &SessionFingerprint, neighbours: &[Neighbour]) -> String {
    let neighbour_block = if neighbours.is_empty() {
        "none".to_string()
    } else {
        neighbour_digest(neighbours)
    };
    format!(
        "You are a location-spoofing and device-fraud analyst. Assess this \
         session fingerprint:\n\n{}\n\nNearest stored sessions:\n{}\n\n\
         Reply with ONLY a JSON object, no prose and no code fences, with the \
         fields: riskAssessment (LOW|MEDIUM|HIGH), confidence (0-100), \
         explanation, patterns (array), technicalIndicators (array), \
         spoofingTechniques (array), recommendations (array), \
         similarityInsights.",
        text_projection(fingerprint),
        neighbour_block,
    )
}

/// Tolerate code fences and leading prose around the JSON object; anything
/// that still fails to parse becomes the fallback variant.
fn parse_response(raw: &str) -> Outcome {
    let candidate = extract_json_object(raw);
    match serde_json::from_str::<GenerativeAssessment>(candidate) {
        Ok(assessment) => Outcome::Parsed(assessment),
        Err(_)         => Outcome::Fallback(raw.trim().to_string()),
    }
}

fn extract_json_object(raw: &str) -> &str {
    let trimmed = raw.trim();
    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    match (start, end) {
        (Some(s), Some(e)) if e > s => &trimmed[s..=e],
        _                           => trimmed,
    }
}

fn parse_tier(word: &str) -> RiskTier {
    match word.trim().to_ascii_uppercase().as_str() {
        "LOW"    => RiskTier::Low,
        "MEDIUM" => RiskTier::Medium,
        "HIGH"   => RiskTier::High,
        _        => RiskTier::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use uuid::Uuid;

    use crate::events::{
        FingerprintEnvironment, FingerprintLocation, FingerprintNetwork, FingerprintSummary,
    };

    struct ScriptedGenerator(String);

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String, GenerativeError> {
            Ok(self.0.clone())
        }
    }

    struct DeadGenerator;

    #[async_trait]
    impl TextGenerator for DeadGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String, GenerativeError> {
            Err(GenerativeError::Status(503))
        }
    }

    fn fingerprint() -> SessionFingerprint {
        SessionFingerprint {
            id:          Uuid::new_v4(),
            timestamp:   Utc::now(),
            location:    FingerprintLocation::default(),
            environment: FingerprintEnvironment::default(),
            network:     FingerprintNetwork::default(),
            summary: FingerprintSummary {
                location_score:      50,
                environment_score:   Some(50),
                overall_risk:        RiskTier::Medium,
                spoofing_indicators: vec!["VPN/Proxy detected".into()],
            },
        }
    }

    #[tokio::test]
    async fn well_formed_json_maps_onto_the_evaluation() {
        let generator = ScriptedGenerator(
            r#"{
                "riskAssessment": "HIGH",
                "confidence": 85,
                "explanation": "VPN plus VM graphics stack",
                "patterns": ["anonymised egress"],
                "technicalIndicators": ["vmware renderer"],
                "spoofingTechniques": ["coordinate injection"],
                "recommendations": ["block"],
                "similarityInsights": "matches a known cluster"
            }"#
            .to_string(),
        );
        let eval = evaluate(&generator, &fingerprint(), &[]).await.unwrap();
        assert_eq!(eval.tier, RiskTier::High);
        assert_eq!(eval.confidence, 85);
        assert_eq!(eval.processing, ProcessingMarker::Full);
        assert_eq!(eval.patterns, vec!["anonymised egress", "coordinate injection"]);
        assert_eq!(eval.risk_factors, vec!["vmware renderer"]);
    }

    #[tokio::test]
    async fn code_fenced_json_still_parses() {
        let generator = ScriptedGenerator(
            "```json\n{\"riskAssessment\": \"LOW\", \"explanation\": \"clean\"}\n```".to_string(),
        );
        let eval = evaluate(&generator, &fingerprint(), &[]).await.unwrap();
        assert_eq!(eval.tier, RiskTier::Low);
        assert_eq!(eval.explanation, "clean");
    }

    #[tokio::test]
    async fn prose_reply_becomes_the_medium_fallback() {
        let generator =
            ScriptedGenerator("This session looks quite suspicious to me.".to_string());
        let eval = evaluate(&generator, &fingerprint(), &[]).await.unwrap();
        assert_eq!(eval.tier, RiskTier::Medium);
        assert_eq!(eval.confidence, 70);
        assert_eq!(eval.explanation, "This session looks quite suspicious to me.");
    }

    #[tokio::test]
    async fn transport_failure_propagates_for_lite_fallback() {
        let err = evaluate(&DeadGenerator, &fingerprint(), &[]).await;
        assert!(err.is_err());
    }

    #[test]
    fn tier_words_parse_case_insensitively() {
        assert_eq!(parse_tier("high"), RiskTier::High);
        assert_eq!(parse_tier(" Medium "), RiskTier::Medium);
        assert_eq!(parse_tier("catastrophic"), RiskTier::Unknown);
    }
}
