// src/vpn/providers.rs
//
// IP-reputation provider adapters.
//
// Each adapter speaks one backend's schema and normalises it into
// VpnProviderResult. A provider is registered only when its credential is
// configured; the ipapi.co fallback needs none and is always registered.
//
// Adapter normalisation: `is_vpn` is the union of the backend's anonymity
// booleans (vpn/proxy/tor/relay/hosting as each backend exposes them), so
// the aggregate consensus counts every anonymising technology, while the
// individual booleans stay available for the Tor and fraud-score rules.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::OnceLock;

use crate::error::ProviderError;
use crate::events::VpnProviderResult;

#[async_trait]
pub trait IpReputationProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn check(&self, ip: &str) -> Result<VpnProviderResult, ProviderError>;
}

/// GET a JSON document, mapping HTTP ≥ 400 and body decode failures into
/// ProviderError.
async fn get_json<T: serde::de::DeserializeOwned>(
    client:  &Client,
    url:     &str,
    headers: &[(&str, &str)],
) -> Result<T, ProviderError> {
    let mut req = client.get(url);
    for (k, v) in headers {
        req = req.header(*k, *v);
    }
    let resp = req.send().await?;
    let status = resp.status();
    if status.as_u16() >= 400 {
        return Err(ProviderError::Status(status.as_u16()));
    }
    resp.json::<T>().await.map_err(|e| ProviderError::Malformed(e.to_string()))
}

// ── ipinfo.io ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct IpInfoPrivacy {
    #[serde(default)] vpn:     bool,
    #[serde(default)] proxy:   bool,
    #[serde(default)] tor:     bool,
    #[serde(default)] hosting: bool,
}

#[derive(Debug, Deserialize)]
struct IpInfoResponse {
    #[serde(default)]
    privacy: IpInfoPrivacy,
    org:     Option<String>,
    asn:     Option<serde_json::Value>,
    city:    Option<String>,
    region:  Option<String>,
    country: Option<String>,
}

pub struct IpInfoProvider {
    client: Client,
    token:  String,
}

impl IpInfoProvider {
    pub fn new(client: Client, token: String) -> Self {
        Self { client, token }
    }
}

#[async_trait]
impl IpReputationProvider for IpInfoProvider {
    fn name(&self) -> &'static str { "ipinfo" }

    async fn check(&self, ip: &str) -> Result<VpnProviderResult, ProviderError> {
        let url = format!("https://ipinfo.io/{ip}/json?token={}", self.token);
        let body: IpInfoResponse = get_json(&self.client, &url, &[]).await?;

        let mut result = VpnProviderResult::named(self.name());
        result.is_vpn     = body.privacy.vpn || body.privacy.proxy
                            || body.privacy.tor || body.privacy.hosting;
        result.is_proxy   = body.privacy.proxy;
        result.is_tor     = body.privacy.tor;
        result.is_hosting = body.privacy.hosting;
        result.organisation = body.org;
        result.asn        = body.asn.as_ref().map(flatten_asn);
        result.city       = body.city;
        result.region     = body.region;
        result.country    = body.country;
        Ok(result)
    }
}

// ipinfo serves `asn` as either a bare string or an object with an `asn` key
// depending on plan tier.
fn flatten_asn(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(map) => map
            .get("asn")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        other => other.to_string(),
    }
}

// ── vpnapi.io ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct VpnApiSecurity {
    #[serde(default)] vpn:   bool,
    #[serde(default)] proxy: bool,
    #[serde(default)] tor:   bool,
    #[serde(default)] relay: bool,
}

#[derive(Debug, Default, Deserialize)]
struct VpnApiRisk {
    score: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct VpnApiNetwork {
    autonomous_system_number:       Option<String>,
    autonomous_system_organization: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct VpnApiLocation {
    city:    Option<String>,
    region:  Option<String>,
    country: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VpnApiResponse {
    #[serde(default)] security: VpnApiSecurity,
    #[serde(default)] risk:     VpnApiRisk,
    #[serde(default)] network:  VpnApiNetwork,
    #[serde(default)] location: VpnApiLocation,
}

pub struct VpnApiProvider {
    client: Client,
    key:    String,
}

impl VpnApiProvider {
    pub fn new(client: Client, key: String) -> Self {
        Self { client, key }
    }
}

#[async_trait]
impl IpReputationProvider for VpnApiProvider {
    fn name(&self) -> &'static str { "vpnapi" }

    async fn check(&self, ip: &str) -> Result<VpnProviderResult, ProviderError> {
        let url = format!("https://vpnapi.io/api/{ip}?key={}", self.key);
        let body: VpnApiResponse = get_json(&self.client, &url, &[]).await?;

        let mut result = VpnProviderResult::named(self.name());
        result.is_vpn   = body.security.vpn || body.security.proxy
                          || body.security.tor || body.security.relay;
        result.is_proxy = body.security.proxy;
        result.is_tor   = body.security.tor;
        result.is_relay = body.security.relay;
        result.fraud_score = body.risk.score.map(|s| s.clamp(0.0, 100.0).round() as u8);
        result.organisation = body.network.autonomous_system_organization;
        result.asn      = body.network.autonomous_system_number;
        result.city     = body.location.city;
        result.region   = body.location.region;
        result.country  = body.location.country;
        if body.security.relay {
            result.extra.insert("relay".into(), json!(true));
        }
        Ok(result)
    }
}

// ── ipqualityscore.com ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct IpQualityScoreResponse {
    #[serde(default)] vpn:          bool,
    #[serde(default)] proxy:        bool,
    #[serde(default)] tor:          bool,
    #[serde(default)] is_crawler:   bool,
    fraud_score:                    Option<f64>,
    #[serde(rename = "ISP")]        isp:          Option<String>,
    organization:                   Option<String>,
    #[serde(rename = "ASN")]        asn:          Option<serde_json::Value>,
    country_code:                   Option<String>,
    city:                           Option<String>,
    #[serde(default)] recent_abuse: bool,
}

pub struct IpQualityScoreProvider {
    client: Client,
    key:    String,
}

impl IpQualityScoreProvider {
    pub fn new(client: Client, key: String) -> Self {
        Self { client, key }
    }
}

#[async_trait]
impl IpReputationProvider for IpQualityScoreProvider {
    fn name(&self) -> &'static str { "ipqualityscore" }

    async fn check(&self, ip: &str) -> Result<VpnProviderResult, ProviderError> {
        let url = format!("https://ipqualityscore.com/api/json/ip/{}/{ip}", self.key);
        let body: IpQualityScoreResponse = get_json(&self.client, &url, &[]).await?;

        let mut result = VpnProviderResult::named(self.name());
        result.is_vpn   = body.vpn || body.proxy || body.tor;
        result.is_proxy = body.proxy;
        result.is_tor   = body.tor;
        result.fraud_score = body.fraud_score.map(|s| s.clamp(0.0, 100.0).round() as u8);
        result.isp      = body.isp;
        result.organisation = body.organization;
        result.asn      = body.asn.as_ref().map(|v| v.to_string());
        result.country  = body.country_code;
        result.city     = body.city;
        result.extra.insert("recent_abuse".into(), json!(body.recent_abuse));
        result.extra.insert("is_crawler".into(), json!(body.is_crawler));
        Ok(result)
    }
}

// ── iphub.info ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct IpHubResponse {
    #[serde(default)]
    block:       u8,   // 0 = residential, 1 = non-residential, 2 = mixed
    isp:         Option<String>,
    asn:         Option<serde_json::Value>,
    hostname:    Option<String>,
    #[serde(rename = "countryCode")]
    country_code: Option<String>,
    #[serde(rename = "countryName")]
    country_name: Option<String>,
}

pub struct IpHubProvider {
    client: Client,
    key:    String,
}

impl IpHubProvider {
    pub fn new(client: Client, key: String) -> Self {
        Self { client, key }
    }
}

#[async_trait]
impl IpReputationProvider for IpHubProvider {
    fn name(&self) -> &'static str { "iphub" }

    async fn check(&self, ip: &str) -> Result<VpnProviderResult, ProviderError> {
        let url = format!("http://v2.api.iphub.info/ip/{ip}");
        let body: IpHubResponse =
            get_json(&self.client, &url, &[("X-Key", self.key.as_str())]).await?;

        let mut result = VpnProviderResult::named(self.name());
        result.is_vpn     = body.block >= 1;
        result.is_hosting = body.block >= 1;
        result.isp        = body.isp;
        result.asn        = body.asn.as_ref().map(|v| v.to_string());
        result.country    = body.country_code.or(body.country_name);
        result.extra.insert("block".into(), json!(body.block));
        if let Some(hostname) = body.hostname {
            result.extra.insert("hostname".into(), json!(hostname));
        }
        Ok(result)
    }
}

// ── ipapi.co fallback (no credential) ─────────────────────────────────────────

// Organisation/ASN keywords that read as anonymising or datacenter
// infrastructure. The fallback has no anonymity API, only whois-style text.
const ORG_KEYWORDS: &[&str] = &["vpn", "proxy", "hosting", "datacenter", "cloud", "server"];

static ORG_AC: OnceLock<AhoCorasick> = OnceLock::new();

fn org_automaton() -> &'static AhoCorasick {
    ORG_AC.get_or_init(|| {
        AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .build(ORG_KEYWORDS)
            .expect("static pattern set")
    })
}

/// Keyword classification over free-form org/ASN text.
pub fn org_matches_keywords(text: &str) -> bool {
    org_automaton().is_match(text)
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    org:          Option<String>,
    asn:          Option<String>,
    city:         Option<String>,
    region:       Option<String>,
    country_name: Option<String>,
    country_code: Option<String>,
}

pub struct IpApiProvider {
    client: Client,
    key:    Option<String>,
}

impl IpApiProvider {
    pub fn new(client: Client, key: Option<String>) -> Self {
        Self { client, key }
    }
}

#[async_trait]
impl IpReputationProvider for IpApiProvider {
    fn name(&self) -> &'static str { "ipapi" }

    async fn check(&self, ip: &str) -> Result<VpnProviderResult, ProviderError> {
        let url = match &self.key {
            Some(key) => format!("https://ipapi.co/{ip}/json/?key={key}"),
            None      => format!("https://ipapi.co/{ip}/json/"),
        };
        let body: IpApiResponse = get_json(&self.client, &url, &[]).await?;

        let haystack = format!(
            "{} {}",
            body.org.as_deref().unwrap_or_default(),
            body.asn.as_deref().unwrap_or_default(),
        );
        let flagged = org_matches_keywords(&haystack);

        let mut result = VpnProviderResult::named(self.name());
        result.is_vpn       = flagged;
        result.is_hosting   = flagged;
        result.organisation = body.org;
        result.asn          = body.asn;
        result.city         = body.city;
        result.region       = body.region;
        result.country      = body.country_code.or(body.country_name);
        Ok(result)
    }
}

// ── Registry construction ─────────────────────────────────────────────────────

/// Build the provider registry from the environment. Absent credentials
/// disable only their provider; the fallback is always present, so the
/// registry is never empty.
pub fn registry_from_env(client: &Client) -> Vec<std::sync::Arc<dyn IpReputationProvider>> {
    use std::sync::Arc;

    let mut providers: Vec<Arc<dyn IpReputationProvider>> = Vec::new();

    if let Some(token) = non_empty_env("IPINFO_TOKEN") {
        providers.push(Arc::new(IpInfoProvider::new(client.clone(), token)));
    }
    if let Some(key) = non_empty_env("VPNAPI_KEY") {
        providers.push(Arc::new(VpnApiProvider::new(client.clone(), key)));
    }
    if let Some(key) = non_empty_env("IPQUALITYSCORE_KEY") {
        providers.push(Arc::new(IpQualityScoreProvider::new(client.clone(), key)));
    }
    if let Some(key) = non_empty_env("IPHUB_KEY") {
        providers.push(Arc::new(IpHubProvider::new(client.clone(), key)));
    }
    providers.push(Arc::new(IpApiProvider::new(
        client.clone(),
        non_empty_env("IPAPI_KEY"),
    )));

    providers
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn org_keywords_match_case_insensitively() {
        assert!(org_matches_keywords("M247 Europe VPN Services"));
        assert!(org_matches_keywords("HETZNER-CLOUD2-AS"));
        assert!(org_matches_keywords("AS14061 DigitalOcean Datacenter"));
        assert!(!org_matches_keywords("Comcast Cable Communications"));
        assert!(!org_matches_keywords("Deutsche Telekom AG"));
    }

    #[test]
    fn iphub_block_levels_map_to_vpn() {
        let blocked: IpHubResponse =
            serde_json::from_str(r#"{"block": 1, "isp": "M247", "countryCode": "RO"}"#).unwrap();
        assert!(blocked.block >= 1);

        let residential: IpHubResponse =
            serde_json::from_str(r#"{"block": 0, "isp": "Comcast", "countryCode": "US"}"#).unwrap();
        assert!(residential.block < 1);
    }

    #[test]
    fn ipinfo_privacy_defaults_when_absent() {
        // Free-tier responses omit the privacy block entirely.
        let body: IpInfoResponse = serde_json::from_str(
            r#"{"org": "AS7922 Comcast", "city": "Seattle", "region": "WA", "country": "US"}"#,
        )
        .unwrap();
        assert!(!body.privacy.vpn && !body.privacy.tor);
    }
}
