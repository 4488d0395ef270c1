// src/events.rs
//
// Shared domain types flowing through Geogate.
// Everything here is a plain value record: request-scoped, serde-friendly,
// no inheritance. Closed sets (status, kind, tier, severity) are enums.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// ── Client-collected signals ──────────────────────────────────────────────────

/// Client-reported geolocation reading. Coordinates are both present or both
/// absent; a one-sided pair is rejected at the envelope boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocationSignal {
    pub latitude:         Option<f64>,   // signed decimal degrees
    pub longitude:        Option<f64>,
    pub accuracy_m:       Option<f64>,   // reported GPS accuracy, metres
    pub timestamp_ms:     Option<i64>,   // client-reported epoch millis
    pub response_time_ms: Option<f64>,   // measured geolocation callback latency
}

impl LocationSignal {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _                      => None,
        }
    }

    /// One coordinate without the other — a malformed envelope.
    pub fn has_partial_coordinates(&self) -> bool {
        self.latitude.is_some() != self.longitude.is_some()
    }
}

/// Client environment snapshot. Every field is optional; missing fields skip
/// the rules that need them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentSignal {
    pub screen_width:   Option<u32>,
    pub screen_height:  Option<u32>,
    pub color_depth:    Option<u8>,      // bits
    pub touch_support:  Option<bool>,
    pub webgl_renderer: Option<String>,  // free-form GPU string, may be empty
    pub platform:       Option<String>,
    pub timezone:       Option<String>,  // IANA identifier
    pub language:       Option<String>,  // BCP-47 tag
    pub user_agent:     Option<String>,
}

impl EnvironmentSignal {
    pub fn resolution(&self) -> Option<(u32, u32)> {
        match (self.screen_width, self.screen_height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _                                    => None,
        }
    }
}

/// Network-side observations: peer-connection candidate IPs and the fixed
/// list of suspicious browser property names the collector probes for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkSignal {
    #[serde(default)]
    pub candidate_ips:         Vec<String>,
    #[serde(default)]
    pub suspicious_properties: Vec<String>,
}

// ── Flags ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity { Info, Warning, Fail, Critical }

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info     => write!(f, "info"),
            Self::Warning  => write!(f, "warning"),
            Self::Fail     => write!(f, "fail"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Flag {
    pub severity: Severity,
    pub message:  String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail:   Option<String>,
}

impl Flag {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self { severity, message: message.into(), detail: None }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// True for every severity above Info — these surface as spoofing
    /// indicators and count against the overall score.
    pub fn is_adverse(&self) -> bool {
        self.severity > Severity::Info
    }
}

// ── VPN / proxy intelligence ──────────────────────────────────────────────────

/// Normalised verdict from one IP-reputation provider. A failed call is
/// carried as a result with `error` set so aggregation can see it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VpnProviderResult {
    pub provider:     String,
    pub is_vpn:       bool,
    pub is_proxy:     bool,
    pub is_tor:       bool,
    pub is_hosting:   bool,
    pub is_relay:     bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fraud_score:  Option<u8>,        // 0–100 where the provider reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organisation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asn:          Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isp:          Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city:         Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region:       Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country:      Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error:        Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra:        HashMap<String, serde_json::Value>,
}

impl VpnProviderResult {
    pub fn named(provider: impl Into<String>) -> Self {
        Self { provider: provider.into(), ..Default::default() }
    }

    pub fn errored(provider: impl Into<String>, error: impl Into<String>) -> Self {
        Self { provider: provider.into(), error: Some(error.into()), ..Default::default() }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VpnDetails {
    pub total_checks:   usize,
    pub vpn_detections: usize,
    /// All provider results, success and error, in registry order.
    pub services:       Vec<VpnProviderResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error:          Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpnAggregateResult {
    pub ip:         String,
    pub is_vpn:     bool,
    /// Percentage of successfully responding providers that flagged the IP.
    pub confidence: u8,
    pub flagged_by: Vec<String>,
    pub details:    VpnDetails,
}

impl VpnAggregateResult {
    /// A clean non-verdict with a diagnostic — private IPs, empty registry,
    /// all-provider failure.
    pub fn clean(ip: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Self {
            ip:         ip.into(),
            is_vpn:     false,
            confidence: 0,
            flagged_by: Vec::new(),
            details:    VpnDetails { error: Some(diagnostic.into()), ..Default::default() },
        }
    }

    pub fn any_tor(&self) -> bool {
        self.details.services.iter().any(|s| s.succeeded() && s.is_tor)
    }

    pub fn max_fraud_score(&self) -> Option<u8> {
        self.details.services.iter()
            .filter(|s| s.succeeded())
            .filter_map(|s| s.fraud_score)
            .max()
    }
}

// ── Verdict vocabulary ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus { Authentic, Suspicious, LikelySpoofed, UnableToVerify }

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authentic      => write!(f, "authentic"),
            Self::Suspicious     => write!(f, "suspicious"),
            Self::LikelySpoofed  => write!(f, "likely_spoofed"),
            Self::UnableToVerify => write!(f, "unable_to_verify"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentKind { LocalDesktop, PossiblyRemote, RemoteDesktop, VirtualMachine }

impl std::fmt::Display for EnvironmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalDesktop   => write!(f, "local_desktop"),
            Self::PossiblyRemote => write!(f, "possibly_remote"),
            Self::RemoteDesktop  => write!(f, "remote_desktop"),
            Self::VirtualMachine => write!(f, "virtual_machine"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier { Low, Medium, High, Unknown }

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low     => write!(f, "LOW"),
            Self::Medium  => write!(f, "MEDIUM"),
            Self::High    => write!(f, "HIGH"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ── Fingerprint ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FingerprintLocation {
    pub latitude:         Option<f64>,
    pub longitude:        Option<f64>,
    pub accuracy_m:       Option<f64>,
    pub response_time_ms: Option<f64>,
    pub vpn_detected:     bool,
    pub vpn_confidence:   u8,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FingerprintEnvironment {
    pub platform:    Option<String>,
    pub resolution:  Option<String>,  // "1920x1080"
    pub color_depth: Option<u8>,
    pub gpu:         Option<String>,
    pub timezone:    Option<String>,
    pub language:    Option<String>,
    pub user_agent:  Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FingerprintNetwork {
    pub client_ip:             String,
    pub observed_ips:          Vec<String>,
    pub suspicious_properties: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FingerprintSummary {
    pub location_score:      u8,
    pub environment_score:   Option<u8>,  // None when no environment signal came in
    pub overall_risk:        RiskTier,
    pub spoofing_indicators: Vec<String>,
}

/// Canonical structured record of one session: the vector-store payload and
/// the source of the embedding text. Content (everything except the opaque
/// id and timestamp) is deterministic given identical inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionFingerprint {
    pub id:          Uuid,
    pub timestamp:   DateTime<Utc>,
    pub location:    FingerprintLocation,
    pub environment: FingerprintEnvironment,
    pub network:     FingerprintNetwork,
    pub summary:     FingerprintSummary,
}

/// One point in the vector index: the embedding keyed by the fingerprint id,
/// with the full fingerprint as payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPoint {
    pub id:      Uuid,
    pub vector:  Vec<f32>,
    pub payload: SessionFingerprint,
}

/// One nearest-neighbour hit from the vector index. Score is cosine
/// similarity in [0, 1], 1 = identical.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neighbour {
    pub id:          String,
    pub score:       f32,
    pub fingerprint: SessionFingerprint,
}

// ── Risk evaluation ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMarker { Fast, Full, Error }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEvaluation {
    pub tier:                RiskTier,
    pub confidence:          u8,
    pub explanation:         String,
    pub risk_factors:        Vec<String>,
    pub patterns:            Vec<String>,
    pub recommendations:     Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_insights: Option<String>,
    pub processing:          ProcessingMarker,
}

impl RiskEvaluation {
    /// The absorbed-error shape: UNKNOWN tier, zero confidence, error marker.
    pub fn internal_error(context: &str) -> Self {
        Self {
            tier:                RiskTier::Unknown,
            confidence:          0,
            explanation:         format!("Risk evaluation unavailable: {context}"),
            risk_factors:        Vec::new(),
            patterns:            Vec::new(),
            recommendations:     Vec::new(),
            similarity_insights: None,
            processing:          ProcessingMarker::Error,
        }
    }
}

// ── Request envelope + verdict ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationMode {
    #[default]
    Lite,
    Full,
}

/// The single inbound envelope: already-collected signals plus the client IP
/// as seen by the transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub client_ip:   String,
    #[serde(default)]
    pub location:    Option<LocationSignal>,
    #[serde(default)]
    pub environment: Option<EnvironmentSignal>,
    #[serde(default)]
    pub network:     Option<NetworkSignal>,
    #[serde(default)]
    pub mode:        EvaluationMode,
}

/// Mid-pipeline aggregation: the scored session handed to the fingerprint
/// builder. `flags` carries every category in verdict order (location,
/// environment, network).
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub client_ip:         String,
    pub location:          Option<LocationSignal>,
    pub environment:       Option<EnvironmentSignal>,
    pub network:           Option<NetworkSignal>,
    pub vpn:               VpnAggregateResult,
    pub location_score:    u8,
    pub environment_score: Option<u8>,
    pub flags:             Vec<Flag>,
}

/// The full response record: status, scores, flags, VPN aggregate,
/// fingerprint, and risk evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionVerdict {
    pub status:            VerificationStatus,
    pub location_score:    u8,
    pub environment_score: u8,
    /// Severity-weighted session score across all categories (0–100).
    pub overall_score:     u8,
    pub environment_kind:  EnvironmentKind,
    pub location_flags:    Vec<Flag>,
    pub environment_flags: Vec<Flag>,
    pub network_flags:     Vec<Flag>,
    pub vpn:               VpnAggregateResult,
    pub fingerprint:       SessionFingerprint,
    pub risk:              RiskEvaluation,
    /// Degraded subsystems (vector store down, generative model down).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics:       Vec<String>,
    pub timestamp:         DateTime<Utc>,
}
