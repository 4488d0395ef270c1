// src/risk/lite.rs
//
// Lite risk path — deterministic tally over the fingerprint and its
// neighbours. Every matching factor adds its registry-configured bonus;
// factors never subtract, so adding one can never lower the score.
//
//   VPN detected                 +30
//   accuracy past the low bound  +15
//   sub-10ms geolocation fix     +20
//   virtual-machine GPU          +25
//   reduced colour depth         +15
//   high-risk neighbour majority +20
//
// Tier: ≥60 HIGH, ≥30 MEDIUM, else LOW.
// Confidence: min(90, 50 + 10 per factor).

use tracing::{error, warn};

use crate::analyzers::environment::is_vm_renderer;
use crate::error::GateError;
use crate::events::{
    Neighbour, ProcessingMarker, RiskEvaluation, RiskTier, SessionFingerprint,
};
use crate::risk::TextGenerator;
use crate::thresholds::Thresholds;

const TIER_HIGH_AT: u32 = 60;
const TIER_MEDIUM_AT: u32 = 30;

pub async fn evaluate(
    generator:   Option<&dyn TextGenerator>,
    fingerprint: &SessionFingerprint,
    neighbours:  &[Neighbour],
    thresholds:  &Thresholds,
) -> RiskEvaluation {
    let tally = match try_tally(fingerprint, neighbours, thresholds) {
        Ok(tally) => tally,
        Err(e) => {
            error!("lite risk tally failed: {e}");
            return RiskEvaluation::internal_error("pattern tally failed");
        }
    };

    let tier = if tally.score >= TIER_HIGH_AT {
        RiskTier::High
    } else if tally.score >= TIER_MEDIUM_AT {
        RiskTier::Medium
    } else {
        RiskTier::Low
    };
    let confidence = (50 + 10 * tally.factors.len() as u32).min(90) as u8;

    let explanation = match generator {
        Some(generator) => {
            summarise(generator, tier, &tally.factors)
                .await
                .unwrap_or_else(|| templated_explanation(tier, &tally.factors))
        }
        None => templated_explanation(tier, &tally.factors),
    };

    RiskEvaluation {
        tier,
        confidence,
        explanation,
        risk_factors: tally.factors,
        patterns: tally.patterns,
        recommendations: recommendations_for(tier),
        similarity_insights: tally.similarity_insights,
        processing: ProcessingMarker::Fast,
    }
}

struct Tally {
    score:               u32,
    factors:             Vec<String>,
    patterns:            Vec<String>,
    similarity_insights: Option<String>,
}

fn try_tally(
    fingerprint: &SessionFingerprint,
    neighbours:  &[Neighbour],
    thresholds:  &Thresholds,
) -> Result<Tally, GateError> {
    let bonuses = &thresholds.pattern_analysis;
    let mut score = 0u32;
    let mut factors = Vec::new();
    let mut patterns = Vec::new();

    if fingerprint.location.vpn_detected {
        score += bonuses.vpn_detected as u32;
        factors.push(format!(
            "VPN or proxy in use ({}% provider consensus)",
            fingerprint.location.vpn_confidence,
        ));
    }

    if let Some(accuracy) = fingerprint.location.accuracy_m {
        if accuracy > thresholds.location.accuracy.low {
            score += bonuses.low_accuracy as u32;
            factors.push(format!("Low-accuracy location fix ({accuracy:.0} m)"));
        }
    }

    if let Some(rt) = fingerprint.location.response_time_ms {
        if rt < thresholds.location.response_time.suspicious {
            score += bonuses.fast_response as u32;
            factors.push(format!("Near-instant geolocation response ({rt:.1} ms)"));
        }
    }

    if let Some(gpu) = fingerprint.environment.gpu.as_deref() {
        if is_vm_renderer(gpu) {
            score += bonuses.vm_gpu as u32;
            factors.push(format!("Virtual machine GPU ({gpu})"));
        }
    }

    if let Some(depth) = fingerprint.environment.color_depth {
        if depth < thresholds.environment.color_depth.rdp_indicator {
            score += bonuses.low_color_depth as u32;
            factors.push(format!("Reduced colour depth ({depth}-bit)"));
        }
    }

    let similarity_insights = if neighbours.is_empty() {
        None
    } else {
        let high = neighbours
            .iter()
            .filter(|n| n.fingerprint.summary.overall_risk == RiskTier::High)
            .count();
        if high * 2 > neighbours.len() {
            score += bonuses.risky_neighbours as u32;
            factors.push(format!(
                "Resembles known high-risk sessions ({high} of {})",
                neighbours.len(),
            ));
        }
        patterns.push(format!(
            "{} similar stored sessions, {high} high-risk",
            neighbours.len(),
        ));
        Some(format!(
            "Nearest stored session at {:.2} cosine similarity",
            neighbours[0].score,
        ))
    };

    // Bonuses are capped well below this; anything larger means the registry
    // was fed absurd values.
    if score > 1000 {
        return Err(GateError::Invariant(format!("risk tally {score} out of range")));
    }

    Ok(Tally { score, factors, patterns, similarity_insights })
}

fn templated_explanation(tier: RiskTier, factors: &[String]) -> String {
    if factors.is_empty() {
        return format!("{tier} risk: no spoofing or anonymisation patterns matched.");
    }
    format!("{tier} risk: {}.", factors.join("; "))
}

async fn summarise(
    generator: &dyn TextGenerator,
    tier:      RiskTier,
    factors:   &[String],
) -> Option<String> {
    let prompt = format!(
        "In one short sentence, summarise the fraud risk of a session rated {tier} \
         with these findings: {}. Respond with the sentence only.",
        if factors.is_empty() { "none".to_string() } else { factors.join("; ") },
    );
    match generator.generate(&prompt).await {
        Ok(sentence) => Some(sentence.trim().to_string()),
        Err(e) => {
            warn!("explanation summarisation unavailable: {e}");
            None
        }
    }
}

fn recommendations_for(tier: RiskTier) -> Vec<String> {
    match tier {
        RiskTier::High => vec![
            "Deny or escalate this session to manual review".to_string(),
            "Require a hardware-backed attestation before retry".to_string(),
        ],
        RiskTier::Medium => vec![
            "Apply a step-up challenge before granting access".to_string(),
        ],
        RiskTier::Low => vec!["Allow".to_string()],
        RiskTier::Unknown => vec![
            "Re-run verification; evidence was insufficient".to_string(),
        ],
    }
}
