//! Pinata client for publishing JSON documents to IPFS
//!
//! API Reference: `POST {api_url}/pinning/pinJSONToIPFS` with a Bearer JWT.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

/// Default timeout for pinning requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Public IPFS gateway used for token URIs
const PUBLIC_GATEWAY: &str = "https://ipfs.io/ipfs";

/// A published document and the URLs it is reachable under
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PinnedDocument {
    pub cid: String,
    pub name: String,
    pub size: Option<i64>,
    /// `ipfs://<cid>`
    pub ipfs_url: String,
    /// Dedicated gateway URL
    pub gateway_url: String,
    /// Public gateway URL, used as token URI
    pub public_url: String,
}

impl PinnedDocument {
    pub fn new(cid: &str, name: &str, size: Option<i64>, gateway_domain: &str) -> Self {
        Self {
            cid: cid.to_string(),
            name: name.to_string(),
            size,
            ipfs_url: format!("ipfs://{}", cid),
            gateway_url: format!("https://{}/ipfs/{}", gateway_domain.trim_end_matches('/'), cid),
            public_url: format!("{}/{}", PUBLIC_GATEWAY, cid),
        }
    }
}

/// Content-addressed JSON publishing
#[async_trait]
pub trait PinningService: Send + Sync {
    async fn pin_json(&self, content: &Value, name: &str) -> Result<PinnedDocument>;
}

#[derive(Debug, Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
    #[serde(rename = "PinSize")]
    pin_size: Option<i64>,
}

/// Pinata REST client
pub struct PinataClient {
    http_client: Client,
    api_url: String,
    jwt: String,
    gateway_domain: String,
}

impl PinataClient {
    pub fn new(api_url: &str, jwt: &str, gateway_domain: &str) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            api_url: api_url.trim_end_matches('/').to_string(),
            jwt: jwt.to_string(),
            gateway_domain: gateway_domain
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_end_matches('/')
                .to_string(),
        })
    }
}

#[async_trait]
impl PinningService for PinataClient {
    async fn pin_json(&self, content: &Value, name: &str) -> Result<PinnedDocument> {
        let url = format!("{}/pinning/pinJSONToIPFS", self.api_url);
        debug!(url = %url, name, "Pinning JSON document");

        let body = json!({
            "pinataContent": content,
            "pinataMetadata": { "name": name },
        });

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.jwt)
            .json(&body)
            .send()
            .await
            .context("Pinata request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Pinata API error: {} - {}", status.as_u16(), text));
        }

        let parsed: PinResponse = response
            .json()
            .await
            .context("Failed to parse Pinata response")?;

        let document = PinnedDocument::new(&parsed.ipfs_hash, name, parsed.pin_size, &self.gateway_domain);
        info!(cid = %document.cid, gateway_url = %document.gateway_url, "JSON pinned to IPFS");
        Ok(document)
    }
}
