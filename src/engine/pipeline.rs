// src/engine/pipeline.rs
//
// Session orchestrator — drives one verification request end to end.
//
//   1. validate the envelope (the only step that can fail the request)
//   2. run the environment analyzer and the {VPN aggregate → location
//      verifier} chain concurrently
//   3. assemble the session record
//   4. build the fingerprint
//   5. best-effort: embed, upsert, search K=5 neighbours — failures land in
//      verdict.diagnostics, never in an error
//   6. risk evaluation (lite default, full on request)
//   7. assemble the verdict
//
// No state outlives the request; the pipeline struct only composes the
// long-lived clients.

use chrono::Utc;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::analyzers::{environment, location};
use crate::error::GateError;
use crate::events::{
    EnvironmentKind, Flag, Neighbour, SessionFingerprint, SessionRecord, SessionVerdict,
    Severity, VectorPoint, VerifyRequest, VpnAggregateResult,
};
use crate::fingerprint::{self, text_projection};
use crate::risk::RiskEvaluator;
use crate::thresholds::{ScoringDeductions, ThresholdRegistry};
use crate::vector::embed::Embedder;
use crate::vector::VectorIndex;
use crate::vpn::VpnAggregator;

/// Neighbours fetched for pattern analysis.
const NEIGHBOUR_K: usize = 5;

pub struct Pipeline {
    thresholds: Arc<ThresholdRegistry>,
    vpn:        VpnAggregator,
    embedder:   Embedder,
    index:      Option<Arc<dyn VectorIndex>>,
    risk:       RiskEvaluator,
}

impl Pipeline {
    pub fn new(
        thresholds: Arc<ThresholdRegistry>,
        vpn:        VpnAggregator,
        embedder:   Embedder,
        index:      Option<Arc<dyn VectorIndex>>,
        risk:       RiskEvaluator,
    ) -> Self {
        Self { thresholds, vpn, embedder, index, risk }
    }

    /// Wire every component from the environment. `client` is the shared
    /// connection pool for all outbound calls.
    pub fn from_env(thresholds: Arc<ThresholdRegistry>, client: &reqwest::Client) -> Self {
        let index = crate::vector::QdrantIndex::from_env(client)
            .map(|i| Arc::new(i) as Arc<dyn VectorIndex>);
        let pipeline = Self::new(
            thresholds,
            VpnAggregator::from_env(client),
            Embedder::from_env(client),
            index,
            RiskEvaluator::from_env(client),
        );
        info!(
            "pipeline ready: providers={:?} embedder={} vector_index={} generator={}",
            pipeline.vpn.provider_names(),
            pipeline.embedder.backend_name(),
            pipeline.index.is_some(),
            pipeline.risk.has_generator(),
        );
        pipeline
    }

    pub fn thresholds(&self) -> &ThresholdRegistry {
        &self.thresholds
    }

    /// The aggregator surfaced directly (the checkIP contract).
    pub async fn check_ip(&self, ip: &str) -> VpnAggregateResult {
        let thresholds = self.thresholds.get();
        self.vpn.detect(ip, &thresholds).await
    }

    /// Verify one session. Only a malformed envelope produces an error;
    /// every downstream failure degrades into flags or diagnostics.
    pub async fn verify(&self, request: VerifyRequest) -> Result<SessionVerdict, GateError> {
        validate(&request)?;

        let thresholds = self.thresholds.get();
        let now_ms = Utc::now().timestamp_millis();

        // Environment scoring and the VPN→location chain are independent;
        // run them concurrently and wait for both.
        let ((vpn, location), environment) = tokio::join!(
            async {
                let vpn = self.vpn.detect(&request.client_ip, &thresholds).await;
                let location =
                    location::analyze(request.location.as_ref(), &vpn, &thresholds, now_ms);
                (vpn, location)
            },
            async {
                request
                    .environment
                    .as_ref()
                    .map(|env| environment::analyze(env, &thresholds))
            },
        );

        let network_flags = network_flags(&request);
        let environment_score = environment.as_ref().map(|e| e.score);
        let environment_kind = environment
            .as_ref()
            .map(|e| e.kind)
            .unwrap_or(EnvironmentKind::LocalDesktop);
        let environment_flags = environment.map(|e| e.flags).unwrap_or_default();

        let mut flags_in_order =
            Vec::with_capacity(location.flags.len() + environment_flags.len() + network_flags.len());
        flags_in_order.extend(location.flags.iter().cloned());
        flags_in_order.extend(environment_flags.iter().cloned());
        flags_in_order.extend(network_flags.iter().cloned());

        let record = SessionRecord {
            client_ip:         request.client_ip.clone(),
            location:          request.location.clone(),
            environment:       request.environment.clone(),
            network:           request.network.clone(),
            vpn:               vpn.clone(),
            location_score:    location.score,
            environment_score,
            flags:             flags_in_order,
        };
        let fingerprint = fingerprint::build(&record);

        let mut diagnostics = Vec::new();
        let neighbours = self.pattern_analysis(&fingerprint, &mut diagnostics).await;

        let risk = self
            .risk
            .evaluate(request.mode, &fingerprint, &neighbours, &thresholds)
            .await;

        let overall_score = overall_score(
            &location.flags,
            &environment_flags,
            &thresholds.scoring.deductions,
        );

        Ok(SessionVerdict {
            status: location.status,
            location_score: location.score,
            environment_score: environment_score.unwrap_or(0),
            overall_score,
            environment_kind,
            location_flags: location.flags,
            environment_flags,
            network_flags,
            vpn,
            fingerprint,
            risk,
            diagnostics,
            timestamp: Utc::now(),
        })
    }

    /// Embed → ensure collection → upsert → neighbour search. Every failure
    /// is captured as a diagnostic and shrinks the result, never the verdict.
    async fn pattern_analysis(
        &self,
        fingerprint: &SessionFingerprint,
        diagnostics: &mut Vec<String>,
    ) -> Vec<Neighbour> {
        let Some(index) = self.index.as_ref() else {
            diagnostics.push("vector index not configured; pattern analysis skipped".to_string());
            return Vec::new();
        };

        let text = text_projection(fingerprint);
        let vector = match self.embedder.embed(&text).await {
            Ok(vector) => vector,
            Err(e) => {
                diagnostics.push(format!("embedding unavailable: {e}"));
                return Vec::new();
            }
        };

        if let Err(e) = index.ensure_collection().await {
            diagnostics.push(format!("vector store unavailable: {e}"));
            return Vec::new();
        }

        let point = VectorPoint {
            id:      fingerprint.id,
            vector:  vector.clone(),
            payload: fingerprint.clone(),
        };
        if let Err(e) = index.upsert(point).await {
            diagnostics.push(format!("fingerprint not persisted: {e}"));
        }

        // Over-fetch by one: the point just written is its own best match.
        match index.search(&vector, NEIGHBOUR_K + 1).await {
            Ok(mut neighbours) => {
                let own_id = fingerprint.id.to_string();
                neighbours.retain(|n| n.id != own_id);
                neighbours.truncate(NEIGHBOUR_K);
                debug!("pattern analysis found {} neighbours", neighbours.len());
                neighbours
            }
            Err(e) => {
                diagnostics.push(format!("neighbour search unavailable: {e}"));
                Vec::new()
            }
        }
    }
}

fn validate(request: &VerifyRequest) -> Result<(), GateError> {
    if request.client_ip.trim().is_empty() {
        return Err(GateError::InvalidInput("client_ip is required".to_string()));
    }
    if request.client_ip.parse::<IpAddr>().is_err() {
        return Err(GateError::InvalidInput(format!(
            "client_ip {:?} is not an IP address",
            request.client_ip,
        )));
    }
    if let Some(location) = request.location.as_ref() {
        if location.has_partial_coordinates() {
            return Err(GateError::InvalidInput(
                "latitude and longitude must be supplied together".to_string(),
            ));
        }
        if let Some(accuracy) = location.accuracy_m {
            if accuracy < 0.0 || !accuracy.is_finite() {
                return Err(GateError::InvalidInput(
                    "accuracy_m must be a non-negative number".to_string(),
                ));
            }
        }
        if let Some((lat, lon)) = location.coordinates() {
            if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
                return Err(GateError::InvalidInput(format!(
                    "coordinates ({lat}, {lon}) outside valid ranges",
                )));
            }
        }
    }
    Ok(())
}

/// Non-scoring observations from the network signal. These surface in the
/// spoofing indicators but never move a score.
fn network_flags(request: &VerifyRequest) -> Vec<Flag> {
    let Some(network) = request.network.as_ref() else {
        return Vec::new();
    };
    let mut flags = Vec::new();

    if !network.suspicious_properties.is_empty() {
        flags.push(
            Flag::new(Severity::Warning, "Suspicious browser properties")
                .with_detail(network.suspicious_properties.join(", ")),
        );
    }

    // A public peer-connection candidate that disagrees with the transport
    // IP is the classic WebRTC leak shape.
    let mismatch = network.candidate_ips.iter().any(|candidate| {
        candidate != &request.client_ip
            && candidate
                .parse::<IpAddr>()
                .map(|addr| !crate::vpn::is_private_ip(&addr))
                .unwrap_or(false)
    });
    if mismatch {
        flags.push(
            Flag::new(Severity::Warning, "WebRTC IP mismatch")
                .with_detail("a public candidate IP differs from the reported client IP"),
        );
    }

    flags
}

/// Severity-weighted session score: every adverse location/environment flag
/// deducts its configured amount (Critical counts as Fail).
fn overall_score(
    location_flags:    &[Flag],
    environment_flags: &[Flag],
    deductions:        &ScoringDeductions,
) -> u8 {
    let mut score: i32 = 100;
    for flag in location_flags {
        score -= match flag.severity {
            Severity::Info    => 0,
            Severity::Warning => deductions.location_warning as i32,
            _                 => deductions.location_fail as i32,
        };
    }
    for flag in environment_flags {
        score -= match flag.severity {
            Severity::Info    => 0,
            Severity::Warning => deductions.environment_warning as i32,
            _                 => deductions.environment_fail as i32,
        };
    }
    score.clamp(0, 100) as u8
}
