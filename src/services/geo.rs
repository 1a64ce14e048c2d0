use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeoInfo {
    pub country: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub postal: Option<String>,
    pub timezone: Option<String>,
}

/// Geolocation boundary. Lookups are enrichment only: a failure must never
/// fail the containing request, so the contract is Option, not Result.
#[async_trait]
pub trait GeoProvider: Send + Sync {
    async fn lookup(&self, ip: &str) -> Option<GeoInfo>;
}

/// HTTP provider against an ip-api style JSON endpoint
/// (`GET {base}/{ip}` returning country/city/region/postal/timezone fields).
pub struct HttpGeoProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGeoProvider {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(2))
                .build()
                .unwrap_or_default(),
            base_url,
        }
    }
}

#[async_trait]
impl GeoProvider for HttpGeoProvider {
    async fn lookup(&self, ip: &str) -> Option<GeoInfo> {
        // Private and loopback addresses resolve to nothing useful
        if ip.starts_with("127.") || ip.starts_with("10.") || ip.starts_with("192.168.") {
            return None;
        }

        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), ip);
        match self.client.get(&url).send().await {
            Ok(res) if res.status().is_success() => match res.json::<GeoInfo>().await {
                Ok(info) => Some(info),
                Err(e) => {
                    tracing::warn!("Geo response parse failed for {}: {}", ip, e);
                    None
                }
            },
            Ok(res) => {
                tracing::warn!("Geo lookup for {} returned {}", ip, res.status());
                None
            }
            Err(e) => {
                tracing::warn!("Geo lookup failed for {}: {}", ip, e);
                None
            }
        }
    }
}

/// Default when no provider is configured.
pub struct NoopGeoProvider;

#[async_trait]
impl GeoProvider for NoopGeoProvider {
    async fn lookup(&self, _ip: &str) -> Option<GeoInfo> {
        None
    }
}
