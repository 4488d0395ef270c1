// src/main.rs
//
// Geogate CLI driver — thin wiring around the verification pipeline.
//
// Three modes:
//   verify      — stream VerifyRequest JSONL from a file (or stdin) and emit
//                 one verdict per line
//   check-ip    — run the VPN/proxy aggregator for a single IP
//   thresholds  — dump the effective threshold snapshot
//
// Usage:
//   geogate --mode verify --path sessions.jsonl
//   cat sessions.jsonl | geogate --mode verify --path -
//   geogate --mode check-ip --ip 203.0.113.9
//   geogate --mode thresholds --thresholds ./thresholds.json

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use geogate::events::{RiskTier, SessionVerdict};
use geogate::{Pipeline, ThresholdRegistry};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "geogate",
    about   = "Geo-spoofing and remote-environment detection core",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(long, value_enum, default_value = "verify")]
    mode: Mode,

    #[arg(long, default_value = "-",
          help = "VerifyRequest JSONL path, '-' for stdin (verify mode)")]
    path: PathBuf,

    #[arg(long, help = "IP to check (check-ip mode)")]
    ip: Option<String>,

    #[arg(long, help = "Threshold JSON document (defaults apply when absent)")]
    thresholds: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "text",
          help = "Verdict output: coloured summaries or raw JSONL")]
    format: Format,
}

#[derive(Clone, ValueEnum)]
enum Mode {
    Verify,     // stream session envelopes, emit verdicts
    CheckIp,    // aggregator only
    Thresholds, // dump the effective snapshot
}

#[derive(Clone, Copy, PartialEq, ValueEnum)]
enum Format {
    Text,
    Jsonl,
}

// ── Terminal output ───────────────────────────────────────────────────────────

fn print_verdict(verdict: &SessionVerdict) {
    let (color, icon) = match verdict.risk.tier {
        RiskTier::High    => ("\x1b[91;1m", "▲"),
        RiskTier::Medium  => ("\x1b[93;1m", "◆"),
        RiskTier::Low     => ("\x1b[92m", "●"),
        RiskTier::Unknown => ("\x1b[90m", "?"),
    };
    let reset = "\x1b[0m";
    let indicators = verdict
        .fingerprint
        .summary
        .spoofing_indicators
        .iter()
        .take(3)
        .cloned()
        .collect::<Vec<_>>()
        .join(" | ");

    println!(
        "\n{color}{icon} {} → {} risk{reset}",
        verdict.status, verdict.risk.tier,
    );
    println!("  IP        : {}", verdict.vpn.ip);
    println!(
        "  Scores    : location={} environment={} overall={}",
        verdict.location_score, verdict.environment_score, verdict.overall_score,
    );
    println!("  Environment: {}", verdict.environment_kind);
    println!(
        "  VPN       : {} ({}% of {} providers)",
        if verdict.vpn.is_vpn { "detected" } else { "clean" },
        verdict.vpn.confidence,
        verdict.vpn.details.total_checks,
    );
    if !indicators.is_empty() {
        println!("  Indicators: {indicators}");
    }
    if !verdict.diagnostics.is_empty() {
        println!("  Degraded  : {}", verdict.diagnostics.join("; "));
    }
    println!("  Why       : {}", verdict.risk.explanation);
}

// ── Modes ─────────────────────────────────────────────────────────────────────

async fn run_verify(pipeline: &Pipeline, path: &PathBuf, format: Format) -> Result<()> {
    let reader: Box<dyn tokio::io::AsyncBufRead + Unpin> = if path.as_os_str() == "-" {
        Box::new(BufReader::new(tokio::io::stdin()))
    } else {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("open {}", path.display()))?;
        Box::new(BufReader::new(file))
    };

    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let request = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                warn!("skipping unparseable envelope: {e}");
                continue;
            }
        };
        match pipeline.verify(request).await {
            Ok(verdict) => match format {
                Format::Text  => print_verdict(&verdict),
                Format::Jsonl => println!("{}", serde_json::to_string(&verdict)?),
            },
            Err(e) => eprintln!("rejected: {e}"),
        }
    }
    Ok(())
}

async fn run_check_ip(pipeline: &Pipeline, ip: &str) -> Result<()> {
    let result = pipeline.check_ip(ip).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn run_thresholds(registry: &ThresholdRegistry) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&*registry.get())?);
    Ok(())
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("geogate=info".parse()?),
        )
        .compact()
        .init();

    let cli = Cli::parse();

    let thresholds_path = cli
        .thresholds
        .clone()
        .or_else(|| std::env::var("GEOGATE_THRESHOLDS").ok().map(PathBuf::from));
    let registry = Arc::new(ThresholdRegistry::from_file_or_default(
        thresholds_path.as_deref(),
    ));

    if matches!(cli.mode, Mode::Thresholds) {
        return run_thresholds(&registry);
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .context("build http client")?;
    let pipeline = Pipeline::from_env(Arc::clone(&registry), &client);

    match cli.mode {
        Mode::Verify => run_verify(&pipeline, &cli.path, cli.format).await,
        Mode::CheckIp => {
            let ip = cli.ip.context("--ip is required in check-ip mode")?;
            run_check_ip(&pipeline, &ip).await
        }
        Mode::Thresholds => unreachable!("handled above"),
    }
}
