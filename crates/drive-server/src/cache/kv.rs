use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, RequestBuilder, Response, StatusCode};
use tracing::{debug, instrument, warn};

use super::{CacheError, CacheStore};

const MAX_RETRIES: u32 = 5;
const BASE_DELAY_MS: u64 = 200;
/// Cloudflare KV rejects expirations shorter than a minute.
const MIN_EXPIRATION_TTL_SECS: u64 = 60;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Cloudflare KV REST API cache store.
///
/// Uses the Cloudflare API v4 to read and write a single KV namespace.
/// All requests use exponential backoff retry on 429 (rate limit) and are
/// bounded by a request timeout, so a stalled namespace reads as a miss.
pub struct KvCacheStore {
    http_client: HttpClient,
    base_url: String,
    api_token: String,
}

impl KvCacheStore {
    pub fn new(
        account_id: &str,
        namespace_id: &str,
        api_token: String,
    ) -> Result<Self, CacheError> {
        Self::with_base_url(
            format!(
                "https://api.cloudflare.com/client/v4/accounts/{}/storage/kv/namespaces/{}",
                account_id, namespace_id
            ),
            api_token,
        )
    }

    /// Point the store at an arbitrary namespace URL.
    pub fn with_base_url(
        base_url: impl Into<String>,
        api_token: String,
    ) -> Result<Self, CacheError> {
        Self::with_timeouts(base_url, api_token, CONNECT_TIMEOUT, REQUEST_TIMEOUT)
    }

    pub fn with_timeouts(
        base_url: impl Into<String>,
        api_token: String,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, CacheError> {
        let http_client = HttpClient::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| CacheError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
        })
    }

    fn value_url(&self, key: &str) -> String {
        format!("{}/values/{}", self.base_url, urlencoding::encode(key))
    }

    /// Send a request with exponential backoff retry on 429.
    async fn send_with_retry(
        &self,
        build_request: impl Fn() -> RequestBuilder,
    ) -> Result<Response, CacheError> {
        let mut delay = Duration::from_millis(BASE_DELAY_MS);
        let mut attempt = 0;

        loop {
            let response = build_request()
                .send()
                .await
                .map_err(|e| CacheError::Unavailable(format!("KV request failed: {}", e)))?;

            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }

            if attempt == MAX_RETRIES {
                let text = response.text().await.unwrap_or_default();
                return Err(CacheError::Unavailable(format!(
                    "KV rate limited after {} retries: {}",
                    MAX_RETRIES, text
                )));
            }

            attempt += 1;
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "KV rate limited (429), retrying"
            );
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }

    async fn failure(method: &str, response: Response) -> CacheError {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        CacheError::Unavailable(format!(
            "KV {} failed with status {}: {}",
            method, status, text
        ))
    }
}

#[async_trait]
impl CacheStore for KvCacheStore {
    fn name(&self) -> &'static str {
        "kv"
    }

    #[instrument(skip(self), level = "debug")]
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let url = self.value_url(key);

        let response = self
            .send_with_retry(|| self.http_client.get(&url).bearer_auth(&self.api_token))
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!("KV key not found: {}", key);
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Self::failure("GET", response).await);
        }

        let value = response
            .text()
            .await
            .map_err(|e| CacheError::Unavailable(format!("Failed to read KV response: {}", e)))?;

        debug!("KV GET {} ({} bytes)", key, value.len());
        Ok(Some(value))
    }

    #[instrument(skip(self, value), level = "debug", fields(value_len = value.len()))]
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let url = self.value_url(key);
        let expiration_ttl = ttl.as_secs().max(MIN_EXPIRATION_TTL_SECS).to_string();

        let response = self
            .send_with_retry(|| {
                self.http_client
                    .put(&url)
                    .bearer_auth(&self.api_token)
                    .query(&[("expiration_ttl", expiration_ttl.as_str())])
                    .header("Content-Type", "text/plain")
                    .body(value.clone())
            })
            .await?;

        if !response.status().is_success() {
            return Err(Self::failure("PUT", response).await);
        }

        debug!("KV PUT {} ({} bytes)", key, value.len());
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let url = self.value_url(key);

        let response = self
            .send_with_retry(|| self.http_client.delete(&url).bearer_auth(&self.api_token))
            .await?;

        let status = response.status();
        if status != StatusCode::NOT_FOUND && !status.is_success() {
            return Err(Self::failure("DELETE", response).await);
        }

        debug!("KV DELETE {}", key);
        Ok(())
    }
}
