// src/analyzers/environment.rs
//
// Environment analyzer — classifies the client environment and scores it.
//
// Rule ladder (fixed order):
//   odd aspect ratio      warning  −20
//   low colour depth      warning  −25   (< environment.colorDepth.rdpIndicator)
//   VM GPU string         critical −50   → kind virtual_machine
//   android without touch warning  −30
//   uncommon resolution   warning  −15
//
// Kind refinement only applies when the GPU rule did not already pin the
// kind to virtual_machine: below environment.score.likelyRemote the session
// reads as a remote desktop, below possiblyRemote as possibly remote.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use std::sync::OnceLock;

use crate::events::{EnvironmentKind, EnvironmentSignal, Flag, Severity};
use crate::thresholds::Thresholds;

// Desktop aspect ratios considered normal, matched within ±0.01.
const NORMAL_ASPECTS: [f64; 4] = [16.0 / 9.0, 16.0 / 10.0, 4.0 / 3.0, 21.0 / 9.0];
const ASPECT_TOLERANCE: f64 = 0.01;

// The ten resolutions that cover the overwhelming majority of real desktops
// and laptops. Anything else earns a mild deduction.
const COMMON_RESOLUTIONS: [(u32, u32); 10] = [
    (1920, 1080),
    (1366, 768),
    (1536, 864),
    (1440, 900),
    (1280, 720),
    (2560, 1440),
    (1600, 900),
    (1680, 1050),
    (3840, 2160),
    (1280, 800),
];

// Renderer substrings that only show up inside virtualized GPUs.
const VM_RENDERERS: &[&str] = &["vmware", "virtualbox", "microsoft basic", "llvmpipe"];

static VM_AC: OnceLock<AhoCorasick> = OnceLock::new();

fn vm_automaton() -> &'static AhoCorasick {
    VM_AC.get_or_init(|| {
        AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .build(VM_RENDERERS)
            .expect("static pattern set")
    })
}

/// Case-insensitive test against the virtual-machine renderer set. Shared
/// with the lite risk evaluator's GPU bonus.
pub fn is_vm_renderer(renderer: &str) -> bool {
    !renderer.is_empty() && vm_automaton().is_match(renderer)
}

#[derive(Debug, Clone)]
pub struct EnvironmentAssessment {
    pub kind:  EnvironmentKind,
    pub score: u8,
    pub flags: Vec<Flag>,
}

pub fn analyze(signal: &EnvironmentSignal, thresholds: &Thresholds) -> EnvironmentAssessment {
    let mut score: i32 = 100;
    let mut kind = EnvironmentKind::LocalDesktop;
    let mut flags = Vec::new();

    if let Some((w, h)) = signal.resolution() {
        let ratio = w as f64 / h as f64;
        let normal = NORMAL_ASPECTS.iter().any(|a| (ratio - a).abs() <= ASPECT_TOLERANCE);
        if !normal {
            flags.push(
                Flag::new(Severity::Warning, "Non-standard aspect ratio")
                    .with_detail(format!("{w}x{h} = {ratio:.3}")),
            );
            score -= 20;
        }
    }

    if let Some(depth) = signal.color_depth {
        if depth < thresholds.environment.color_depth.rdp_indicator {
            flags.push(
                Flag::new(Severity::Warning, "Low color depth")
                    .with_detail(format!("{depth}-bit: remote desktop sessions often run reduced depth")),
            );
            score -= 25;
        }
    }

    if let Some(renderer) = signal.webgl_renderer.as_deref() {
        if is_vm_renderer(renderer) {
            flags.push(
                Flag::new(Severity::Critical, "Virtual machine GPU detected")
                    .with_detail(renderer.to_string()),
            );
            score -= 50;
            kind = EnvironmentKind::VirtualMachine;
        }
    }

    if let Some(platform) = signal.platform.as_deref() {
        if platform.to_ascii_lowercase().contains("android") && signal.touch_support == Some(false) {
            flags.push(Flag::new(
                Severity::Warning,
                "Android platform without touch support",
            ));
            score -= 30;
        }
    }

    if let Some((w, h)) = signal.resolution() {
        if !COMMON_RESOLUTIONS.contains(&(w, h)) {
            flags.push(
                Flag::new(Severity::Warning, "Uncommon screen resolution")
                    .with_detail(format!("{w}x{h}")),
            );
            score -= 15;
        }
    }

    let score = score.clamp(0, 100) as u8;
    if kind != EnvironmentKind::VirtualMachine {
        if score < thresholds.environment.score.likely_remote {
            kind = EnvironmentKind::RemoteDesktop;
        } else if score < thresholds.environment.score.possibly_remote {
            kind = EnvironmentKind::PossiblyRemote;
        }
    }

    EnvironmentAssessment { kind, score, flags }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desktop() -> EnvironmentSignal {
        EnvironmentSignal {
            screen_width:   Some(1920),
            screen_height:  Some(1080),
            color_depth:    Some(24),
            touch_support:  Some(false),
            webgl_renderer: Some("NVIDIA GeForce GTX 1080".into()),
            platform:       Some("Win32".into()),
            timezone:       Some("America/Los_Angeles".into()),
            language:       Some("en-US".into()),
            user_agent:     Some("Mozilla/5.0 (Windows NT 10.0; Win64; x64)".into()),
        }
    }

    #[test]
    fn clean_desktop_scores_full() {
        let a = analyze(&desktop(), &Thresholds::default());
        assert_eq!(a.kind, EnvironmentKind::LocalDesktop);
        assert_eq!(a.score, 100);
        assert!(a.flags.is_empty());
    }

    #[test]
    fn vmware_renderer_forces_virtual_machine() {
        let mut s = desktop();
        s.webgl_renderer = Some("VMware SVGA 3D".into());
        // Even with an otherwise perfect environment, the kind is pinned.
        let a = analyze(&s, &Thresholds::default());
        assert_eq!(a.kind, EnvironmentKind::VirtualMachine);
        assert_eq!(a.score, 50);
        assert!(a.flags.iter().any(|f| f.severity == Severity::Critical));

        // Case-insensitive match.
        s.webgl_renderer = Some("Gallium 0.4 on LLVMPIPE (LLVM 10.0)".into());
        let a = analyze(&s, &Thresholds::default());
        assert_eq!(a.kind, EnvironmentKind::VirtualMachine);
    }

    #[test]
    fn low_depth_and_odd_resolution_read_as_remote_desktop() {
        let mut s = desktop();
        s.color_depth = Some(16);
        s.screen_width = Some(1152);
        s.screen_height = Some(864);
        // 1152x864 is 4:3 (no aspect flag) but not in the common set.
        let a = analyze(&s, &Thresholds::default());
        assert_eq!(a.score, 60);
        assert_eq!(a.kind, EnvironmentKind::PossiblyRemote);
    }

    #[test]
    fn android_without_touch_is_flagged() {
        let mut s = desktop();
        s.platform = Some("Linux armv8l Android".into());
        s.touch_support = Some(false);
        let a = analyze(&s, &Thresholds::default());
        assert_eq!(a.score, 70);
        assert!(a.flags.iter().any(|f| f.message.contains("Android")));

        // An absent touch flag degrades gracefully: rule skipped.
        s.touch_support = None;
        let a = analyze(&s, &Thresholds::default());
        assert_eq!(a.score, 100);
    }

    #[test]
    fn missing_fields_skip_their_rules() {
        let a = analyze(&EnvironmentSignal::default(), &Thresholds::default());
        assert_eq!(a.score, 100);
        assert_eq!(a.kind, EnvironmentKind::LocalDesktop);
        assert!(a.flags.is_empty());
    }

    #[test]
    fn heavy_deductions_reach_remote_desktop() {
        let mut s = desktop();
        s.color_depth = Some(16);             // −25
        s.screen_width = Some(1111);          // odd aspect −20, uncommon −15
        s.screen_height = Some(600);
        let a = analyze(&s, &Thresholds::default());
        assert_eq!(a.score, 40);
        assert_eq!(a.kind, EnvironmentKind::RemoteDesktop);
    }
}
