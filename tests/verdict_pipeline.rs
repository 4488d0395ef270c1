// tests/verdict_pipeline.rs
//
// End-to-end pipeline scenarios with scripted collaborator doubles:
// providers with fixed verdicts/errors/hangs, an in-memory cosine vector
// index, and a canned text generator. No network is touched.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use geogate::error::{GenerativeError, ProviderError, VectorError};
use geogate::events::{
    EnvironmentKind, EnvironmentSignal, EvaluationMode, LocationSignal, Neighbour, NetworkSignal,
    ProcessingMarker, RiskTier, Severity, VectorPoint, VerificationStatus, VerifyRequest,
    VpnProviderResult,
};
use geogate::risk::{RiskEvaluator, TextGenerator};
use geogate::thresholds::ThresholdRegistry;
use geogate::vector::embed::{Embedder, LocalEmbedder};
use geogate::vector::VectorIndex;
use geogate::vpn::providers::IpReputationProvider;
use geogate::vpn::VpnAggregator;
use geogate::Pipeline;

// ── Provider doubles ──────────────────────────────────────────────────────────

enum Script {
    Clean,
    Vpn,
    Tor,
    Error,
    Hang,
}

struct StubProvider {
    name:   &'static str,
    script: Script,
    calls:  Arc<AtomicUsize>,
}

impl StubProvider {
    fn arc(name: &'static str, script: Script) -> Arc<dyn IpReputationProvider> {
        Arc::new(Self { name, script, calls: Arc::new(AtomicUsize::new(0)) })
    }

    fn counted(
        name:   &'static str,
        script: Script,
    ) -> (Arc<dyn IpReputationProvider>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(Self { name, script, calls: Arc::clone(&calls) });
        (provider, calls)
    }
}

#[async_trait]
impl IpReputationProvider for StubProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn check(&self, _ip: &str) -> Result<VpnProviderResult, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::Clean => Ok(VpnProviderResult::named(self.name)),
            Script::Vpn => {
                let mut r = VpnProviderResult::named(self.name);
                r.is_vpn = true;
                Ok(r)
            }
            Script::Tor => {
                let mut r = VpnProviderResult::named(self.name);
                r.is_vpn = true;
                r.is_tor = true;
                Ok(r)
            }
            Script::Error => Err(ProviderError::Status(502)),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ProviderError::Timeout)
            }
        }
    }
}

// ── Vector index double ───────────────────────────────────────────────────────

#[derive(Default)]
struct MemoryIndex {
    points:      Mutex<Vec<VectorPoint>>,
    fail_search: bool,
}

impl MemoryIndex {
    fn arc() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self { fail_search: true, ..Default::default() })
    }

    fn len(&self) -> usize {
        self.points.lock().len()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 { 0.0 } else { dot / (na * nb) }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn ensure_collection(&self) -> Result<(), VectorError> {
        Ok(())
    }

    async fn upsert(&self, point: VectorPoint) -> Result<(), VectorError> {
        let mut points = self.points.lock();
        points.retain(|p| p.id != point.id);
        points.push(point);
        Ok(())
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<Neighbour>, VectorError> {
        if self.fail_search {
            return Err(VectorError::Status(503, "index offline".into()));
        }
        let points = self.points.lock();
        let mut hits: Vec<Neighbour> = points
            .iter()
            .map(|p| Neighbour {
                id:          p.id.to_string(),
                score:       cosine(vector, &p.vector).clamp(0.0, 1.0),
                fingerprint: p.payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }
}

// ── Generator double ──────────────────────────────────────────────────────────

struct CannedGenerator(&'static str);

#[async_trait]
impl TextGenerator for CannedGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, GenerativeError> {
        Ok(self.0.to_string())
    }
}

struct OfflineGenerator;

#[async_trait]
impl TextGenerator for OfflineGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, GenerativeError> {
        Err(GenerativeError::Status(503))
    }
}

// ── Harness ───────────────────────────────────────────────────────────────────

fn pipeline(
    providers: Vec<Arc<dyn IpReputationProvider>>,
    index:     Option<Arc<dyn VectorIndex>>,
    generator: Option<Arc<dyn TextGenerator>>,
) -> Pipeline {
    Pipeline::new(
        Arc::new(ThresholdRegistry::with_defaults()),
        VpnAggregator::new(providers),
        Embedder::Local(LocalEmbedder),
        index,
        RiskEvaluator::new(generator),
    )
}

fn residential_request() -> VerifyRequest {
    VerifyRequest {
        client_ip: "203.0.113.9".into(),
        location: Some(LocationSignal {
            latitude:         Some(37.7749),
            longitude:        Some(-122.4194),
            accuracy_m:       Some(15.0),
            timestamp_ms:     Some(chrono::Utc::now().timestamp_millis()),
            response_time_ms: Some(250.0),
        }),
        environment: Some(EnvironmentSignal {
            screen_width:   Some(1920),
            screen_height:  Some(1080),
            color_depth:    Some(24),
            touch_support:  Some(false),
            webgl_renderer: Some("NVIDIA GeForce GTX 1080".into()),
            platform:       Some("Win32".into()),
            timezone:       Some("America/Los_Angeles".into()),
            language:       Some("en-US".into()),
            user_agent:     Some("Mozilla/5.0 (Windows NT 10.0; Win64; x64)".into()),
        }),
        network: Some(NetworkSignal {
            candidate_ips:         vec!["203.0.113.9".into()],
            suspicious_properties: vec![],
        }),
        mode: EvaluationMode::Lite,
    }
}

fn spoofed_request() -> VerifyRequest {
    VerifyRequest {
        client_ip: "203.0.113.66".into(),
        location: Some(LocationSignal {
            latitude:         Some(0.0),
            longitude:        Some(0.0),
            accuracy_m:       Some(5000.0),
            timestamp_ms:     Some(chrono::Utc::now().timestamp_millis()),
            response_time_ms: Some(3.0),
        }),
        environment: Some(EnvironmentSignal {
            screen_width:   Some(1280),
            screen_height:  Some(720),
            color_depth:    Some(16),
            touch_support:  Some(false),
            webgl_renderer: Some("VMware SVGA 3D".into()),
            platform:       Some("Win32".into()),
            timezone:       None,
            language:       None,
            user_agent:     None,
        }),
        network: None,
        mode: EvaluationMode::Lite,
    }
}

// ── Scenario 1: authentic suburban session ────────────────────────────────────

#[tokio::test]
async fn authentic_residential_session_scores_clean() {
    let pipeline = pipeline(
        vec![
            StubProvider::arc("a", Script::Clean),
            StubProvider::arc("b", Script::Clean),
            StubProvider::arc("c", Script::Clean),
        ],
        Some(MemoryIndex::arc() as Arc<dyn VectorIndex>),
        None,
    );

    let verdict = pipeline.verify(residential_request()).await.unwrap();
    assert_eq!(verdict.status, VerificationStatus::Authentic);
    assert!(verdict.location_score >= 80);
    assert_eq!(verdict.environment_kind, EnvironmentKind::LocalDesktop);
    assert_eq!(verdict.risk.tier, RiskTier::Low);
    assert_eq!(verdict.risk.processing, ProcessingMarker::Fast);
    assert!(!verdict.vpn.is_vpn);
    assert!(verdict.fingerprint.summary.spoofing_indicators.is_empty());
}

// ── Scenario 2: null-island spoof in a VM ─────────────────────────────────────

#[tokio::test]
async fn null_island_vm_session_is_flagged_high_risk() {
    let pipeline = pipeline(
        vec![StubProvider::arc("a", Script::Clean)],
        Some(MemoryIndex::arc() as Arc<dyn VectorIndex>),
        None,
    );

    let verdict = pipeline.verify(spoofed_request()).await.unwrap();
    assert_eq!(verdict.status, VerificationStatus::LikelySpoofed);
    assert!(verdict.location_score <= 20);
    assert_eq!(verdict.environment_kind, EnvironmentKind::VirtualMachine);
    assert!(verdict.location_flags.iter().any(|f| {
        f.severity == Severity::Critical && f.message.contains("Null Island")
    }));
    assert_eq!(verdict.risk.tier, RiskTier::High);
    assert_eq!(verdict.fingerprint.summary.overall_risk, RiskTier::High);
}

// ── Scenario 3: VPN consensus with one errored provider ───────────────────────

#[tokio::test]
async fn vpn_consensus_excludes_errored_providers_from_denominator() {
    let pipeline = pipeline(
        vec![
            StubProvider::arc("a", Script::Vpn),
            StubProvider::arc("b", Script::Vpn),
            StubProvider::arc("c", Script::Vpn),
            StubProvider::arc("d", Script::Error),
        ],
        None,
        None,
    );

    let verdict = pipeline.verify(residential_request()).await.unwrap();
    assert!(verdict.vpn.is_vpn);
    assert_eq!(verdict.vpn.confidence, 100);
    assert_eq!(verdict.vpn.details.total_checks, 4);
    assert_eq!(verdict.vpn.details.vpn_detections, 3);
    // Exactly the VPN rule's 30 points off an otherwise clean fix.
    assert_eq!(verdict.location_score, 70);
    assert!(verdict
        .location_flags
        .iter()
        .any(|f| f.message == "VPN/Proxy detected"));
}

// ── Scenario 4: Tor exit node ─────────────────────────────────────────────────

#[tokio::test]
async fn tor_exit_node_adds_a_fail_flag_and_twenty_more_points() {
    let pipeline = pipeline(vec![StubProvider::arc("a", Script::Tor)], None, None);

    let verdict = pipeline.verify(residential_request()).await.unwrap();
    assert!(verdict.vpn.is_vpn);
    // −30 VPN then −20 Tor.
    assert_eq!(verdict.location_score, 50);
    assert!(verdict.location_flags.iter().any(|f| {
        f.severity == Severity::Fail && f.message == "Tor exit node detected"
    }));
}

// ── Scenario 5: provider timeout storm ────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn provider_timeout_storm_still_returns_a_verdict() {
    let pipeline = pipeline(
        vec![
            StubProvider::arc("a", Script::Hang),
            StubProvider::arc("b", Script::Hang),
            StubProvider::arc("c", Script::Hang),
        ],
        None,
        None,
    );

    let verdict = pipeline.verify(residential_request()).await.unwrap();
    assert!(!verdict.vpn.is_vpn);
    assert_eq!(verdict.vpn.confidence, 0);
    assert!(verdict.vpn.details.services.iter().all(|s| s.error.is_some()));
    assert_eq!(verdict.vpn.details.error.as_deref(), Some("All provider checks failed"));
    // The rest of the verdict is intact.
    assert_eq!(verdict.status, VerificationStatus::Authentic);
    assert_eq!(verdict.location_score, 100);
}

// ── Scenario 6: private-IP short-circuit ──────────────────────────────────────

#[tokio::test]
async fn private_client_ip_never_reaches_providers() {
    let (provider, calls) = StubProvider::counted("a", Script::Vpn);
    let pipeline = pipeline(vec![provider], None, None);

    let mut request = residential_request();
    request.client_ip = "192.168.1.5".into();
    let verdict = pipeline.verify(request).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(verdict.vpn.details.error.as_deref(), Some("Private IP"));
    assert!(!verdict.vpn.is_vpn);
}

// ── Round-trip determinism ────────────────────────────────────────────────────

#[tokio::test]
async fn resubmitted_sessions_score_and_flag_identically() {
    let providers = || {
        vec![
            StubProvider::arc("a", Script::Vpn),
            StubProvider::arc("b", Script::Clean),
        ]
    };
    let first = pipeline(providers(), None, None)
        .verify(spoofed_request())
        .await
        .unwrap();
    let second = pipeline(providers(), None, None)
        .verify(spoofed_request())
        .await
        .unwrap();

    assert_eq!(first.location_score, second.location_score);
    assert_eq!(first.environment_score, second.environment_score);
    assert_eq!(first.overall_score, second.overall_score);
    assert_eq!(first.location_flags, second.location_flags);
    assert_eq!(first.environment_flags, second.environment_flags);
    assert_eq!(
        geogate::fingerprint::text_projection(&first.fingerprint),
        geogate::fingerprint::text_projection(&second.fingerprint),
    );
}

// ── Neighbour flow through the index ──────────────────────────────────────────

#[tokio::test]
async fn stored_sessions_become_neighbours_for_later_requests() {
    let index = MemoryIndex::arc();
    let pipeline = pipeline(
        vec![StubProvider::arc("a", Script::Clean)],
        Some(Arc::clone(&index) as Arc<dyn VectorIndex>),
        None,
    );

    // Seed three spoofed sessions, then verify a fourth just like them.
    for _ in 0..3 {
        pipeline.verify(spoofed_request()).await.unwrap();
    }
    assert_eq!(index.len(), 3);

    let verdict = pipeline.verify(spoofed_request()).await.unwrap();
    assert_eq!(index.len(), 4);
    // Its own point is excluded; the three seeds resemble it strongly and
    // are all high-risk, so the neighbour factor fires.
    assert!(verdict
        .risk
        .risk_factors
        .iter()
        .any(|f| f.contains("high-risk sessions")));
    assert!(verdict.risk.similarity_insights.is_some());
}

// ── Degradation paths ─────────────────────────────────────────────────────────

#[tokio::test]
async fn vector_store_failure_degrades_but_does_not_fail() {
    let pipeline = pipeline(
        vec![StubProvider::arc("a", Script::Clean)],
        Some(MemoryIndex::failing() as Arc<dyn VectorIndex>),
        None,
    );

    let verdict = pipeline.verify(residential_request()).await.unwrap();
    assert_eq!(verdict.status, VerificationStatus::Authentic);
    assert!(verdict
        .diagnostics
        .iter()
        .any(|d| d.contains("neighbour search unavailable")));
    assert_eq!(verdict.risk.tier, RiskTier::Low);
}

#[tokio::test]
async fn missing_location_is_unable_to_verify_not_an_error() {
    let pipeline = pipeline(vec![StubProvider::arc("a", Script::Clean)], None, None);

    let mut request = residential_request();
    request.location = None;
    let verdict = pipeline.verify(request).await.unwrap();

    assert_eq!(verdict.status, VerificationStatus::UnableToVerify);
    assert_eq!(verdict.location_score, 0);
    assert!(verdict
        .location_flags
        .iter()
        .any(|f| f.message == "Location data not provided"));
}

#[tokio::test]
async fn malformed_envelope_is_the_only_request_failure() {
    let pipeline = pipeline(vec![StubProvider::arc("a", Script::Clean)], None, None);

    let mut request = residential_request();
    request.client_ip = "not an ip".into();
    assert!(pipeline.verify(request).await.is_err());

    let mut request = residential_request();
    request.location.as_mut().unwrap().longitude = None;
    assert!(pipeline.verify(request).await.is_err());
}

// ── Full evaluation mode ──────────────────────────────────────────────────────

#[tokio::test]
async fn full_mode_uses_the_generative_assessment() {
    let generator = CannedGenerator(
        r#"{"riskAssessment": "HIGH", "confidence": 92,
            "explanation": "VM graphics with anonymised egress",
            "patterns": [], "technicalIndicators": ["vmware"],
            "spoofingTechniques": [], "recommendations": ["block"]}"#,
    );
    let pipeline = pipeline(
        vec![StubProvider::arc("a", Script::Vpn)],
        None,
        Some(Arc::new(generator) as Arc<dyn TextGenerator>),
    );

    let mut request = spoofed_request();
    request.mode = EvaluationMode::Full;
    let verdict = pipeline.verify(request).await.unwrap();

    assert_eq!(verdict.risk.processing, ProcessingMarker::Full);
    assert_eq!(verdict.risk.tier, RiskTier::High);
    assert_eq!(verdict.risk.confidence, 92);
}

#[tokio::test]
async fn full_mode_falls_back_to_lite_when_the_model_is_down() {
    let pipeline = pipeline(
        vec![StubProvider::arc("a", Script::Clean)],
        None,
        Some(Arc::new(OfflineGenerator) as Arc<dyn TextGenerator>),
    );

    let mut request = residential_request();
    request.mode = EvaluationMode::Full;
    let verdict = pipeline.verify(request).await.unwrap();

    assert_eq!(verdict.risk.processing, ProcessingMarker::Fast);
    assert_eq!(verdict.risk.tier, RiskTier::Low);
}

// ── Concurrency safety ────────────────────────────────────────────────────────

#[tokio::test]
async fn parallel_verifications_match_sequential_results() {
    let pipeline = Arc::new(pipeline(
        vec![
            StubProvider::arc("a", Script::Vpn),
            StubProvider::arc("b", Script::Clean),
        ],
        None,
        None,
    ));

    let sequential = pipeline.verify(spoofed_request()).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let pipeline = Arc::clone(&pipeline);
        tasks.push(tokio::spawn(async move {
            pipeline.verify(spoofed_request()).await.unwrap()
        }));
    }
    for task in tasks {
        let verdict = task.await.unwrap();
        assert_eq!(verdict.location_score, sequential.location_score);
        assert_eq!(verdict.overall_score, sequential.overall_score);
        assert_eq!(verdict.location_flags, sequential.location_flags);
        assert_eq!(verdict.risk.tier, sequential.risk.tier);
    }
}
