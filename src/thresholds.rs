// src/thresholds.rs
//
// Threshold registry — the single source of numeric decision boundaries.
//
// Every analyzer reads from an immutable snapshot behind an Arc; hot reload
// parses the JSON document off to the side and swaps the Arc in one motion,
// so in-flight readers keep the snapshot they started with and new readers
// see the new one. A failed reload leaves the previous snapshot in place.
//
// JSON layout mirrors the group names below; unknown keys are ignored and
// missing keys fall back to the built-in defaults.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::GateError;

// ── Snapshot groups ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponseTimeThresholds {
    /// Geolocation callbacks faster than this are likely cached/scripted (ms).
    pub suspicious: f64,
}

impl Default for ResponseTimeThresholds {
    fn default() -> Self { Self { suspicious: 10.0 } }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccuracyThresholds {
    /// Accuracy radii above this are treated as low quality (metres).
    pub low: f64,
}

impl Default for AccuracyThresholds {
    fn default() -> Self { Self { low: 1000.0 } }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocationScoreThresholds {
    pub likely_spoofed: u8,
    pub suspicious:     u8,
}

impl Default for LocationScoreThresholds {
    fn default() -> Self { Self { likely_spoofed: 60, suspicious: 80 } }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocationThresholds {
    pub response_time: ResponseTimeThresholds,
    pub accuracy:      AccuracyThresholds,
    pub score:         LocationScoreThresholds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvironmentScoreThresholds {
    pub likely_remote:   u8,
    pub possibly_remote: u8,
}

impl Default for EnvironmentScoreThresholds {
    fn default() -> Self { Self { likely_remote: 50, possibly_remote: 75 } }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ColorDepthThresholds {
    /// Colour depths below this bit count indicate an RDP-style session.
    pub rdp_indicator: u8,
}

impl Default for ColorDepthThresholds {
    fn default() -> Self { Self { rdp_indicator: 24 } }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvironmentThresholds {
    pub score:       EnvironmentScoreThresholds,
    pub color_depth: ColorDepthThresholds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VpnConfidenceThresholds {
    /// Consensus percentage at or above which the aggregate verdict is VPN.
    pub detected: u8,
}

impl Default for VpnConfidenceThresholds {
    fn default() -> Self { Self { detected: 50 } }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VpnThresholds {
    pub confidence: VpnConfidenceThresholds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoringDeductions {
    pub location_warning:    u8,
    pub location_fail:       u8,
    pub environment_warning: u8,
    pub environment_fail:    u8,
}

impl Default for ScoringDeductions {
    fn default() -> Self {
        Self {
            location_warning:    20,
            location_fail:       40,
            environment_warning: 25,
            environment_fail:    50,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoringThresholds {
    pub deductions: ScoringDeductions,
}

/// Per-factor risk bonuses consumed by the lite risk evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PatternAnalysisBonuses {
    pub vpn_detected:     u8,
    pub low_accuracy:     u8,
    pub fast_response:    u8,
    pub vm_gpu:           u8,
    pub low_color_depth:  u8,
    pub risky_neighbours: u8,
}

impl Default for PatternAnalysisBonuses {
    fn default() -> Self {
        Self {
            vpn_detected:     30,
            low_accuracy:     15,
            fast_response:    20,
            vm_gpu:           25,
            low_color_depth:  15,
            risky_neighbours: 20,
        }
    }
}

/// One immutable snapshot of every decision threshold.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Thresholds {
    pub location:         LocationThresholds,
    pub environment:      EnvironmentThresholds,
    pub vpn:              VpnThresholds,
    pub scoring:          ScoringThresholds,
    pub pattern_analysis: PatternAnalysisBonuses,
}

impl Thresholds {
    pub fn from_json(json: &str) -> Result<Self, GateError> {
        serde_json::from_str(json)
            .map_err(|e| GateError::InvalidInput(format!("threshold document: {e}")))
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Process-scoped registry holding the atomically replaceable snapshot.
/// `get()` clones the Arc under a read lock held only for the clone, so
/// readers never block writers or each other for any meaningful time, and a
/// reader always observes exactly one snapshot.
pub struct ThresholdRegistry {
    snapshot: RwLock<Arc<Thresholds>>,
}

impl ThresholdRegistry {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { snapshot: RwLock::new(Arc::new(thresholds)) }
    }

    pub fn with_defaults() -> Self {
        Self::new(Thresholds::default())
    }

    /// Current snapshot. Hold the Arc for the duration of one request so all
    /// decisions within it see a consistent view.
    pub fn get(&self) -> Arc<Thresholds> {
        self.snapshot.read().clone()
    }

    /// Atomically replace the snapshot.
    pub fn replace(&self, thresholds: Thresholds) {
        *self.snapshot.write() = Arc::new(thresholds);
    }

    /// Parse the JSON document at `path` and swap it in. On any error the
    /// previous snapshot stays active and the error is returned.
    pub fn reload_from_file(&self, path: &Path) -> Result<(), GateError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| GateError::InvalidInput(format!("{}: {e}", path.display())))?;
        let parsed = Thresholds::from_json(&text)?;
        self.replace(parsed);
        info!("thresholds reloaded from {}", path.display());
        Ok(())
    }

    /// Build a registry from an optional file, falling back to the built-in
    /// defaults when the file is absent or unreadable.
    pub fn from_file_or_default(path: Option<&Path>) -> Self {
        let registry = Self::with_defaults();
        if let Some(path) = path {
            if let Err(e) = registry.reload_from_file(path) {
                warn!("threshold file unusable, using defaults: {e}");
            }
        }
        registry
    }
}
