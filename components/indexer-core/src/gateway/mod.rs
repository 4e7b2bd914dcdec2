//! Typed, read-only accessor over the upstream Ordinals gateway (spec 4.1).
//! Every call is wrapped with bounded exponential backoff with jitter and
//! distinguishes transient upstream failures from permanent (absent
//! resource) ones for the caller.

use std::time::Duration;

use config::GatewayConfig;
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::error::IndexerError;
use crate::logging::Context;
use crate::{try_debug, try_warn};

#[derive(Debug, Clone, Deserialize)]
pub struct BlockInscriptions {
    pub inscriptions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Output {
    pub address: Option<String>,
    pub value: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoutEntry {
    pub scriptpubkey_address: Option<String>,
    pub value: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddressTx {
    pub vout: Vec<VoutEntry>,
}

#[derive(Debug, Clone)]
pub struct Content {
    pub bytes: Vec<u8>,
    pub mime: String,
}

/// Builds the idempotency-free, read-only surface consumed by the indexing
/// pipeline. `reqwest::Client` is internally `Arc`-backed, so cloning this
/// struct is cheap (same pattern as the teacher's `build_http_client`).
#[derive(Clone)]
pub struct GatewayClient {
    http: Client,
    config: GatewayConfig,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> GatewayClient {
        let http = Client::builder()
            .user_agent("ord420-indexer/0.1")
            .build()
            .expect("unable to build gateway http client");
        GatewayClient { http, config }
    }

    pub async fn get_tip_height(&self, ctx: &Context) -> Result<u64, IndexerError> {
        let url = format!("{}/r/blockheight", self.config.api_url);
        let body = self
            .get_with_retry(&url, self.config.max_retries, ctx)
            .await?;
        let text = String::from_utf8_lossy(&body);
        text.trim()
            .trim_matches('"')
            .parse::<u64>()
            .map_err(|e| IndexerError::Internal(format!("malformed tip height {text}: {e}")))
    }

    pub async fn get_block(&self, height: u64, ctx: &Context) -> Result<BlockInscriptions, IndexerError> {
        let url = format!("{}/block/{height}", self.config.api_url);
        let body = self
            .get_with_retry(&url, self.config.max_retries, ctx)
            .await?;
        serde_json::from_slice(&body)
            .map_err(|e| IndexerError::Internal(format!("malformed block body for {height}: {e}")))
    }

    pub async fn get_content(&self, id: &str, ctx: &Context) -> Result<Content, IndexerError> {
        let url = format!("{}/content/{id}", self.config.api_url);
        let response = self
            .request_with_retry(&url, self.config.max_retries, ctx)
            .await?;
        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = response.bytes().await.map_err(IndexerError::from)?.to_vec();
        Ok(Content { bytes, mime })
    }

    pub async fn get_content_type(&self, id: &str, ctx: &Context) -> Result<String, IndexerError> {
        let url = format!("{}/content/{id}", self.config.api_url);
        for attempt in 0..self.config.max_retries {
            let outcome = self.http.head(&url).send().await;
            match outcome {
                Ok(response) if response.status().is_success() => {
                    return Ok(response
                        .headers()
                        .get(reqwest::header::CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("application/octet-stream")
                        .to_string());
                }
                Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                    return Err(IndexerError::Absent(format!("content {id} not found")));
                }
                Ok(response) if response.status().is_server_error() => {
                    try_warn!(ctx, "HEAD /content/{id} returned {}, retrying", response.status());
                    self.backoff(attempt).await;
                }
                Ok(response) => {
                    return Err(IndexerError::Internal(format!(
                        "unexpected status {} for HEAD /content/{id}",
                        response.status()
                    )));
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    try_warn!(ctx, "HEAD /content/{id} failed: {e}, retrying");
                    self.backoff(attempt).await;
                }
                Err(e) => return Err(IndexerError::from(e)),
            }
        }
        Err(IndexerError::Transient(format!(
            "HEAD /content/{id} exhausted {} retries",
            self.config.max_retries
        )))
    }

    pub async fn get_output(&self, txid_vout: &str, ctx: &Context) -> Result<Option<Output>, IndexerError> {
        let url = format!("{}/output/{txid_vout}", self.config.api_url);
        match self.get_with_retry_opt(&url, self.config.max_retries, ctx).await? {
            Some(body) => serde_json::from_slice(&body)
                .map(Some)
                .map_err(|e| IndexerError::Internal(format!("malformed output body for {txid_vout}: {e}"))),
            None => Ok(None),
        }
    }

    /// Fetches the full address transaction history used for royalty-payment
    /// verification (spec 4.5). A 504 here follows a separate, smaller retry
    /// budget, and exhausting it triggers a recovery pause before surfacing
    /// a transient failure to the caller (spec 4.1, 7).
    pub async fn get_address_txs(&self, address: &str, ctx: &Context) -> Result<Vec<AddressTx>, IndexerError> {
        let url = format!("{}/address/{address}/txs", self.config.api_wallet_url);
        for attempt in 0..self.config.royalty_retry_budget {
            match self.http.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    let body = response.bytes().await.map_err(IndexerError::from)?;
                    return serde_json::from_slice(&body).map_err(|e| {
                        IndexerError::Internal(format!("malformed address txs body for {address}: {e}"))
                    });
                }
                Ok(response) if response.status() == StatusCode::NOT_FOUND => return Ok(vec![]),
                Ok(response) if response.status() == StatusCode::GATEWAY_TIMEOUT => {
                    try_warn!(ctx, "504 fetching address txs for {address}, attempt {attempt}");
                    self.backoff(attempt).await;
                }
                Ok(response) if response.status().is_server_error() => {
                    try_warn!(ctx, "address txs for {address} returned {}, retrying", response.status());
                    self.backoff(attempt).await;
                }
                Ok(response) => {
                    return Err(IndexerError::Internal(format!(
                        "unexpected status {} fetching address txs for {address}",
                        response.status()
                    )));
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    try_warn!(ctx, "address txs fetch for {address} failed: {e}, attempt {attempt}");
                    self.backoff(attempt).await;
                }
                Err(e) => return Err(IndexerError::from(e)),
            }
        }
        tokio::time::sleep(self.config.recovery_pause).await;
        Err(IndexerError::Transient(format!(
            "gateway unavailable fetching address txs for {address} after {} attempts",
            self.config.royalty_retry_budget
        )))
    }

    async fn get_with_retry(&self, url: &str, max_retries: u32, ctx: &Context) -> Result<Vec<u8>, IndexerError> {
        match self.get_with_retry_opt(url, max_retries, ctx).await? {
            Some(body) => Ok(body),
            None => Err(IndexerError::Absent(format!("{url} not found"))),
        }
    }

    async fn get_with_retry_opt(
        &self,
        url: &str,
        max_retries: u32,
        ctx: &Context,
    ) -> Result<Option<Vec<u8>>, IndexerError> {
        for attempt in 0..max_retries {
            match self.http.get(url).send().await {
                Ok(response) if response.status().is_success() => {
                    try_debug!(ctx, "GET {url} -> {}", response.status());
                    return Ok(Some(response.bytes().await.map_err(IndexerError::from)?.to_vec()));
                }
                Ok(response) if response.status() == StatusCode::NOT_FOUND => return Ok(None),
                Ok(response) if response.status().is_server_error() => {
                    try_warn!(ctx, "GET {url} returned {}, attempt {attempt}", response.status());
                    self.backoff(attempt).await;
                }
                Ok(response) => {
                    return Err(IndexerError::Internal(format!(
                        "unexpected status {} for GET {url}",
                        response.status()
                    )));
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    try_warn!(ctx, "GET {url} failed: {e}, attempt {attempt}");
                    self.backoff(attempt).await;
                }
                Err(e) => return Err(IndexerError::from(e)),
            }
        }
        Err(IndexerError::Transient(format!(
            "GET {url} exhausted {max_retries} retries"
        )))
    }

    async fn request_with_retry(
        &self,
        url: &str,
        max_retries: u32,
        ctx: &Context,
    ) -> Result<reqwest::Response, IndexerError> {
        for attempt in 0..max_retries {
            match self.http.get(url).send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                    return Err(IndexerError::Absent(format!("{url} not found")));
                }
                Ok(response) if response.status().is_server_error() => {
                    try_warn!(ctx, "GET {url} returned {}, attempt {attempt}", response.status());
                    self.backoff(attempt).await;
                }
                Ok(response) => {
                    return Err(IndexerError::Internal(format!(
                        "unexpected status {} for GET {url}",
                        response.status()
                    )));
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    try_warn!(ctx, "GET {url} failed: {e}, attempt {attempt}");
                    self.backoff(attempt).await;
                }
                Err(e) => return Err(IndexerError::from(e)),
            }
        }
        Err(IndexerError::Transient(format!(
            "GET {url} exhausted {max_retries} retries"
        )))
    }

    /// delay = base * 2^attempt + uniform(0, jitter_ms) (spec 4.1).
    async fn backoff(&self, attempt: u32) {
        let base = self.config.retry_delay.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << attempt.min(16));
        let jitter = rand::thread_rng().gen_range(0..=base.max(1));
        tokio::time::sleep(Duration::from_millis(exp + jitter)).await;
    }
}

/// Converts an inscription id to `txid:vout` form (spec 4.1): the last
/// character is the vout digit, and the txid is everything before it minus
/// the trailing `i` separator.
pub fn txid_of(inscription_id: &str) -> String {
    let chars: Vec<char> = inscription_id.chars().collect();
    let Some(&last) = chars.last() else {
        return inscription_id.to_string();
    };
    let txid: String = chars[..chars.len().saturating_sub(2)].iter().collect();
    let mut out = txid;
    out.push(':');
    out.push(last);
    out
}

/// Inverse of [`txid_of`] under the reversible construction rule (spec 8):
/// reassembles an inscription id from a `txid:vout` pair.
pub fn inscription_id_of(txid: &str, vout: u32) -> String {
    format!("{txid}i{vout}")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn txid_of_matches_spec_rule() {
        let id = "b61b0172d95e266c18aea0c624db987e971a5d6d4ebc2aaed85da4642d635735i0";
        let txid_vout = txid_of(id);
        assert_eq!(
            txid_vout,
            "b61b0172d95e266c18aea0c624db987e971a5d6d4ebc2aaed85da4642d635735:0"
        );
    }

    #[test]
    fn txid_and_inscription_id_compose_to_identity() {
        let id = "abcd1234i0";
        let txid_vout = txid_of(id);
        let (txid, vout) = txid_vout.split_once(':').unwrap();
        let reconstructed = inscription_id_of(txid, vout.parse().unwrap());
        assert_eq!(reconstructed, id);
    }
}
