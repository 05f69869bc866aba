//! The relay trait and its HTTP implementation.
//!
//! The relay is untrusted for content integrity (all signatures verify
//! locally) but trusted to assign per-jar sequence numbers.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::StatusCode;
use tracing::debug;

use budsync_core::{Cid, Ed25519Signature, Envelope, JarId};

use crate::error::{RelayError, Result};
use crate::wire::{FetchReceiptsResponse, StoreReceiptRequest, StoreReceiptResponse, StoredReceipt};

/// Supplies bearer tokens from the external auth provider.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<String>;
}

/// A fixed token, for tests and long-lived sessions.
pub struct StaticTokenProvider(String);

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn bearer_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// The three relay operations the sync core needs.
#[async_trait]
pub trait Relay: Send + Sync {
    /// Submit an unsequenced receipt; the relay computes the CID and
    /// assigns the next sequence number, which is authoritative.
    async fn store_receipt(
        &self,
        jar_id: &JarId,
        receipt_data: &[u8],
        signature: &Ed25519Signature,
        parent_cid: Option<&Cid>,
    ) -> Result<StoredReceipt>;

    /// Fetch envelopes with sequence > `after_sequence`, up to `limit`.
    async fn fetch_after(
        &self,
        jar_id: &JarId,
        after_sequence: u64,
        limit: u32,
    ) -> Result<Vec<Envelope>>;

    /// Fetch envelopes with sequence in `[from_sequence, to_sequence]`.
    async fn fetch_range(
        &self,
        jar_id: &JarId,
        from_sequence: u64,
        to_sequence: u64,
    ) -> Result<Vec<Envelope>>;
}

/// Configuration for the HTTP relay client.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Base URL, e.g. `https://relay.example.com`.
    pub base_url: String,
    /// Timeout for receipt submission.
    pub store_timeout: Duration,
    /// Timeout for fetches.
    pub fetch_timeout: Duration,
}

impl RelayConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            store_timeout: Duration::from_secs(15),
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP relay client.
pub struct HttpRelay<T> {
    client: reqwest::Client,
    config: RelayConfig,
    tokens: T,
}

impl<T: TokenProvider> HttpRelay<T> {
    pub fn new(config: RelayConfig, tokens: T) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(RelayError::from)?;
        Ok(Self {
            client,
            config,
            tokens,
        })
    }

    fn receipts_url(&self, jar_id: &JarId) -> String {
        format!("{}/api/jars/{}/receipts", self.config.base_url, jar_id)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(RelayError::Forbidden);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RelayError::Http {
            status: status.as_u16(),
            body,
        })
    }

    async fn fetch_envelopes(&self, url: String) -> Result<Vec<Envelope>> {
        let token = self.tokens.bearer_token().await?;
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .timeout(self.config.fetch_timeout)
            .send()
            .await?;

        let response = Self::check_status(response).await?;
        let body: FetchReceiptsResponse = response
            .json()
            .await
            .map_err(|e| RelayError::MalformedResponse(e.to_string()))?;

        debug!(count = body.receipts.len(), url = %url, "fetched envelopes");
        body.receipts
            .into_iter()
            .map(|w| w.into_envelope())
            .collect()
    }
}

#[async_trait]
impl<T: TokenProvider> Relay for HttpRelay<T> {
    async fn store_receipt(
        &self,
        jar_id: &JarId,
        receipt_data: &[u8],
        signature: &Ed25519Signature,
        parent_cid: Option<&Cid>,
    ) -> Result<StoredReceipt> {
        let token = self.tokens.bearer_token().await?;
        let request = StoreReceiptRequest {
            receipt_data: BASE64.encode(receipt_data),
            signature: BASE64.encode(signature.as_bytes()),
            parent_cid: parent_cid.map(|c| c.to_string()),
        };

        let response = self
            .client
            .post(self.receipts_url(jar_id))
            .bearer_auth(token)
            .timeout(self.config.store_timeout)
            .json(&request)
            .send()
            .await?;

        let response = Self::check_status(response).await?;
        let body: StoreReceiptResponse = response
            .json()
            .await
            .map_err(|e| RelayError::MalformedResponse(e.to_string()))?;

        body.into_stored()
    }

    async fn fetch_after(
        &self,
        jar_id: &JarId,
        after_sequence: u64,
        limit: u32,
    ) -> Result<Vec<Envelope>> {
        let url = format!(
            "{}?after={}&limit={}",
            self.receipts_url(jar_id),
            after_sequence,
            limit
        );
        self.fetch_envelopes(url).await
    }

    async fn fetch_range(
        &self,
        jar_id: &JarId,
        from_sequence: u64,
        to_sequence: u64,
    ) -> Result<Vec<Envelope>> {
        let url = format!(
            "{}?from={}&to={}",
            self.receipts_url(jar_id),
            from_sequence,
            to_sequence
        );
        self.fetch_envelopes(url).await
    }
}
