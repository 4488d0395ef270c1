// src/fingerprint.rs
//
// Fingerprint builder — canonical structured record of one session.
//
// build() is pure over the session record: identical inputs produce an
// identical fingerprint body and a byte-identical text projection. Only the
// opaque id and the stamp differ between runs, and neither participates in
// the projection, so equal sessions embed to equal vectors.

use chrono::Utc;
use uuid::Uuid;

use crate::events::{
    FingerprintEnvironment, FingerprintLocation, FingerprintNetwork, FingerprintSummary,
    RiskTier, SessionFingerprint, SessionRecord,
};

/// Mean-score boundaries for the summary risk bucket.
const RISK_HIGH_BELOW: f64 = 40.0;
const RISK_MEDIUM_BELOW: f64 = 70.0;

pub fn build(record: &SessionRecord) -> SessionFingerprint {
    let location = FingerprintLocation {
        latitude:         record.location.as_ref().and_then(|l| l.latitude),
        longitude:        record.location.as_ref().and_then(|l| l.longitude),
        accuracy_m:       record.location.as_ref().and_then(|l| l.accuracy_m),
        response_time_ms: record.location.as_ref().and_then(|l| l.response_time_ms),
        vpn_detected:     record.vpn.is_vpn,
        vpn_confidence:   record.vpn.confidence,
    };

    let environment = match record.environment.as_ref() {
        Some(env) => FingerprintEnvironment {
            platform:    env.platform.clone(),
            resolution:  env.resolution().map(|(w, h)| format!("{w}x{h}")),
            color_depth: env.color_depth,
            gpu:         env.webgl_renderer.clone(),
            timezone:    env.timezone.clone(),
            language:    env.language.clone(),
            user_agent:  env.user_agent.clone(),
        },
        None => FingerprintEnvironment::default(),
    };

    let network = FingerprintNetwork {
        client_ip:             record.client_ip.clone(),
        observed_ips:          record
            .network
            .as_ref()
            .map(|n| n.candidate_ips.clone())
            .unwrap_or_default(),
        suspicious_properties: record
            .network
            .as_ref()
            .map(|n| n.suspicious_properties.clone())
            .unwrap_or_default(),
    };

    let summary = FingerprintSummary {
        location_score:      record.location_score,
        environment_score:   record.environment_score,
        overall_risk:        overall_risk(record.location_score, record.environment_score),
        spoofing_indicators: record
            .flags
            .iter()
            .filter(|f| f.is_adverse())
            .map(|f| f.message.clone())
            .collect(),
    };

    SessionFingerprint {
        id: Uuid::new_v4(),
        timestamp: Utc::now(),
        location,
        environment,
        network,
        summary,
    }
}

fn overall_risk(location_score: u8, environment_score: Option<u8>) -> RiskTier {
    let Some(environment_score) = environment_score else {
        return RiskTier::Unknown;
    };
    let mean = (location_score as f64 + environment_score as f64) / 2.0;
    if mean < RISK_HIGH_BELOW {
        RiskTier::High
    } else if mean < RISK_MEDIUM_BELOW {
        RiskTier::Medium
    } else {
        RiskTier::Low
    }
}

/// Canonical line-oriented projection for embedding. The line set and
/// formatting are fixed: equal fingerprint content must serialise to
/// byte-identical text. The opaque id and stamp are deliberately absent.
pub fn text_projection(fp: &SessionFingerprint) -> String {
    let mut lines = Vec::with_capacity(11);

    lines.push(match (fp.location.latitude, fp.location.longitude) {
        (Some(lat), Some(lon)) => format!("location: {lat:.4},{lon:.4}"),
        _                      => "location: unknown".to_string(),
    });
    lines.push(match fp.location.accuracy_m {
        Some(acc) => format!("accuracy: {acc:.0}"),
        None      => "accuracy: unknown".to_string(),
    });
    lines.push(format!(
        "vpn: {} confidence={}",
        if fp.location.vpn_detected { "detected" } else { "clean" },
        fp.location.vpn_confidence,
    ));
    lines.push(format!("platform: {}", text_or_unknown(fp.environment.platform.as_deref())));
    lines.push(format!("resolution: {}", text_or_unknown(fp.environment.resolution.as_deref())));
    lines.push(format!("gpu: {}", text_or_unknown(fp.environment.gpu.as_deref())));
    lines.push(format!("ua: {}", text_or_unknown(fp.environment.user_agent.as_deref())));
    lines.push(if fp.network.observed_ips.is_empty() {
        "ips: none".to_string()
    } else {
        format!("ips: {}", fp.network.observed_ips.join(","))
    });
    lines.push(format!("risk: {}", risk_word(fp.summary.overall_risk)));
    lines.push(format!(
        "scores: location={} environment={}",
        fp.summary.location_score,
        fp.summary
            .environment_score
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
    ));
    lines.push(if fp.summary.spoofing_indicators.is_empty() {
        "indicators: none".to_string()
    } else {
        format!("indicators: {}", fp.summary.spoofing_indicators.join("; "))
    });

    lines.join("\n")
}

fn text_or_unknown(value: Option<&str>) -> &str {
    match value {
        Some(v) if !v.is_empty() => v,
        _                        => "unknown",
    }
}

fn risk_word(tier: RiskTier) -> &'static str {
    match tier {
        RiskTier::Low     => "low",
        RiskTier::Medium  => "medium",
        RiskTier::High    => "high",
        RiskTier::Unknown => "unknown",
    }
}
