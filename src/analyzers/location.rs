// src/analyzers/location.rs
//
// Location verifier — scores a LocationSignal plus the VPN aggregate.
//
// Rule ladder (fixed order, each rule deducts once):
//   null island      critical −50
//   integer coords   warning  −20
//   low accuracy     warning  −30   (> location.accuracy.low metres)
//   stale timestamp  warning  −10   (older than 60 s)
//   fast response    warning  −20   (< location.responseTime.suspicious ms)
//   vpn detected     warning  −30
//   tor detected     fail     −20   (on top of the VPN rule)
//   high fraud score fail     −20   (any provider > 90)
//
// Null Island fires together with the integer rule: (0, 0) is also an exact
// integer pair, and the deductions compose.

use crate::events::{Flag, LocationSignal, Severity, VerificationStatus, VpnAggregateResult};
use crate::thresholds::Thresholds;

/// Location timestamps older than this are stale (ms).
const STALE_AFTER_MS: i64 = 60_000;

/// Fraud scores above this mark a provider-confirmed bad IP.
const FRAUD_SCORE_FAIL: u8 = 90;

#[derive(Debug, Clone)]
pub struct LocationAssessment {
    pub status: VerificationStatus,
    pub score:  u8,
    pub flags:  Vec<Flag>,
}

pub fn analyze(
    signal:     Option<&LocationSignal>,
    vpn:        &VpnAggregateResult,
    thresholds: &Thresholds,
    now_ms:     i64,
) -> LocationAssessment {
    let unavailable = || LocationAssessment {
        status: VerificationStatus::UnableToVerify,
        score:  0,
        flags:  vec![Flag::new(Severity::Fail, "Location data not provided")],
    };
    let Some(signal) = signal else { return unavailable(); };
    let Some((lat, lon)) = signal.coordinates() else { return unavailable(); };

    let mut score: i32 = 100;
    let mut flags = Vec::new();

    if lat == 0.0 && lon == 0.0 {
        flags.push(
            Flag::new(Severity::Critical, "Null Island coordinates")
                .with_detail("(0, 0) is the default output of broken or naive spoofers"),
        );
        score -= 50;
    }

    if lat.fract() == 0.0 && lon.fract() == 0.0 {
        flags.push(
            Flag::new(Severity::Warning, "Integer coordinates")
                .with_detail(format!("lat={lat}, lon={lon}: real GPS fixes carry fractional degrees")),
        );
        score -= 20;
    }

    if let Some(accuracy) = signal.accuracy_m {
        if accuracy > thresholds.location.accuracy.low {
            flags.push(
                Flag::new(Severity::Warning, "Low GPS accuracy")
                    .with_detail(format!("{accuracy:.0} m radius")),
            );
            score -= 30;
        }
    }

    if let Some(ts) = signal.timestamp_ms {
        if now_ms - ts > STALE_AFTER_MS {
            flags.push(
                Flag::new(Severity::Warning, "Stale location timestamp")
                    .with_detail(format!("{} ms old", now_ms - ts)),
            );
            score -= 10;
        }
    }

    if let Some(rt) = signal.response_time_ms {
        if rt < thresholds.location.response_time.suspicious {
            flags.push(
                Flag::new(Severity::Warning, "Suspiciously fast response")
                    .with_detail(format!("{rt:.1} ms: a real geolocation fix takes longer")),
            );
            score -= 20;
        }
    }

    if vpn.is_vpn {
        flags.push(
            Flag::new(Severity::Warning, "VPN/Proxy detected")
                .with_detail(format!("{}% provider consensus", vpn.confidence)),
        );
        score -= 30;
    }

    if vpn.any_tor() {
        flags.push(Flag::new(Severity::Fail, "Tor exit node detected"));
        score -= 20;
    }

    if vpn.max_fraud_score().is_some_and(|s| s > FRAUD_SCORE_FAIL) {
        flags.push(
            Flag::new(Severity::Fail, "High provider fraud score")
                .with_detail(format!("max fraud score {}", vpn.max_fraud_score().unwrap_or(0))),
        );
        score -= 20;
    }

    let score = score.clamp(0, 100) as u8;
    let status = if score < thresholds.location.score.likely_spoofed {
        VerificationStatus::LikelySpoofed
    } else if score < thresholds.location.score.suspicious {
        VerificationStatus::Suspicious
    } else {
        VerificationStatus::Authentic
    };

    LocationAssessment { status, score, flags }
}
