// src/vpn/mod.rs
//
// VPN/proxy aggregator — concurrent fan-out over the provider registry.
//
// detect() never fails the enclosing request:
//   private/reserved IP  → clean verdict, zero provider calls
//   provider failure     → error-marked result, other providers unaffected
//   all providers failed → {is_vpn: false, confidence: 0} + diagnostic
//
// confidence = round(100 · detections / successful_checks); errored
// providers are excluded from the denominator. The verdict is VPN when
// confidence reaches vpn.confidence.detected.
//
// details.services preserves registry order, not arrival order.

pub mod providers;

use dashmap::DashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::events::{VpnAggregateResult, VpnDetails, VpnProviderResult};
use crate::thresholds::Thresholds;
use providers::IpReputationProvider;

/// Per-provider call deadline.
pub const PROVIDER_DEADLINE: Duration = Duration::from_secs(5);

/// Consecutive failures before a provider is called out in the log.
const ERROR_STREAK_NOTICE: u64 = 3;

pub struct VpnAggregator {
    registry:      Vec<Arc<dyn IpReputationProvider>>,
    error_streaks: DashMap<&'static str, u64>,
}

impl VpnAggregator {
    pub fn new(registry: Vec<Arc<dyn IpReputationProvider>>) -> Self {
        Self { registry, error_streaks: DashMap::new() }
    }

    /// Registry built from configured credentials; the keyword fallback is
    /// always enabled, so at least one provider exists.
    pub fn from_env(client: &reqwest::Client) -> Self {
        Self::new(providers::registry_from_env(client))
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.registry.iter().map(|p| p.name()).collect()
    }

    /// How many times in a row a provider has errored. Resets on success.
    pub fn consecutive_errors(&self, provider: &str) -> u64 {
        self.error_streaks.get(provider).map(|e| *e).unwrap_or(0)
    }

    /// Aggregate verdict for one IP. See the module header for the failure
    /// semantics; this function itself is infallible.
    pub async fn detect(&self, ip: &str, thresholds: &Thresholds) -> VpnAggregateResult {
        let parsed: IpAddr = match ip.parse() {
            Ok(addr) => addr,
            Err(_)   => return VpnAggregateResult::clean(ip, "Unparseable IP address"),
        };
        if is_private_ip(&parsed) {
            debug!("skipping providers for private IP {ip}");
            return VpnAggregateResult::clean(ip, "Private IP");
        }
        if self.registry.is_empty() {
            return VpnAggregateResult::clean(ip, "No providers configured");
        }

        let services = self.dispatch(ip).await;
        self.note_streaks(&services);

        let successful: Vec<&VpnProviderResult> =
            services.iter().filter(|s| s.succeeded()).collect();
        let detections: Vec<&&VpnProviderResult> =
            successful.iter().filter(|s| s.is_vpn).collect();

        let confidence = if successful.is_empty() {
            0
        } else {
            ((100.0 * detections.len() as f64) / successful.len() as f64).round() as u8
        };
        let is_vpn = !successful.is_empty() && confidence >= thresholds.vpn.confidence.detected;

        let flagged_by = detections.iter().map(|s| s.provider.clone()).collect();
        let error = if successful.is_empty() {
            Some("All provider checks failed".to_string())
        } else {
            None
        };

        VpnAggregateResult {
            ip: ip.to_string(),
            is_vpn,
            confidence,
            flagged_by,
            details: VpnDetails {
                total_checks:   services.len(),
                vpn_detections: detections.len(),
                services,
                error,
            },
        }
    }

    /// Run every provider concurrently with its own deadline, collecting
    /// results back into registry order. JoinSet aborts in-flight calls when
    /// the enclosing future is dropped, so request cancellation propagates.
    async fn dispatch(&self, ip: &str) -> Vec<VpnProviderResult> {
        let mut set = JoinSet::new();
        for (idx, provider) in self.registry.iter().enumerate() {
            let provider = Arc::clone(provider);
            let ip = ip.to_string();
            set.spawn(async move {
                let result = match tokio::time::timeout(PROVIDER_DEADLINE, provider.check(&ip)).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(e))     => VpnProviderResult::errored(provider.name(), e.to_string()),
                    Err(_)         => VpnProviderResult::errored(
                        provider.name(),
                        ProviderError::Timeout.to_string(),
                    ),
                };
                (idx, result)
            });
        }

        let mut slots: Vec<Option<VpnProviderResult>> = vec![None; self.registry.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result),
                Err(e)            => warn!("provider task failed to join: {e}"),
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| {
                slot.unwrap_or_else(|| {
                    VpnProviderResult::errored(self.registry[idx].name(), "task aborted")
                })
            })
            .collect()
    }

    fn note_streaks(&self, services: &[VpnProviderResult]) {
        for (idx, service) in services.iter().enumerate() {
            let name = self.registry[idx].name();
            if service.succeeded() {
                self.error_streaks.insert(name, 0);
            } else {
                let mut streak = self.error_streaks.entry(name).or_insert(0);
                *streak += 1;
                if *streak == ERROR_STREAK_NOTICE {
                    warn!(
                        "provider {name} has failed {ERROR_STREAK_NOTICE} consecutive checks: {}",
                        service.error.as_deref().unwrap_or("unknown"),
                    );
                }
            }
        }
    }
}

/// Reserved/private/loopback test. These never reach a provider.
pub fn is_private_ip(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => is_private_v6(v6),
    }
}

fn is_private_v4(v4: &Ipv4Addr) -> bool {
    v4.is_private()
        || v4.is_loopback()
        || v4.is_link_local()
        || v4.is_unspecified()
        || v4.is_broadcast()
        || is_cgnat(v4)
}

// 100.64.0.0/10 — carrier-grade NAT, not globally routable.
fn is_cgnat(v4: &Ipv4Addr) -> bool {
    let octets = v4.octets();
    octets[0] == 100 && (64..=127).contains(&octets[1])
}

fn is_private_v6(v6: &Ipv6Addr) -> bool {
    v6.is_loopback()
        || v6.is_unspecified()
        || (v6.segments()[0] & 0xfe00) == 0xfc00   // unique local fc00::/7
        || (v6.segments()[0] & 0xffc0) == 0xfe80   // link local fe80::/10
}
