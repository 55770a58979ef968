//! HTTP cache backend
//!
//! Talks to a small REST blob service:
//!
//! | Method | Path | Meaning |
//! |--------|------|---------|
//! | GET | `/health` | 2xx when the cache is usable |
//! | PUT | `/entries/{key}` | store the request body |
//! | GET | `/entries/{key}` | payload, `x-created-at` header; 404 on miss |
//! | GET | `/entries?prefix=..` | JSON list of entries |
//! | DELETE | `/entries/{key}` | 404 when absent |
//!
//! Transient failures (5xx, timeouts, connection errors) are retried with
//! exponential backoff.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

use super::backend::{resolve_restore_key, CacheBackend, CacheEntry, EntryInfo};

const CREATED_AT_HEADER: &str = "x-created-at";
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Connection settings for [`HttpBackend`].
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    pub base_url: String,
    /// Sent as `Authorization: Bearer ..`
    pub token: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl HttpBackendConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            token: None,
            timeout_secs: 30,
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveResponse {
    id: Option<String>,
}

pub struct HttpBackend {
    config: HttpBackendConfig,
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> Result<Self> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::config("cacheUrl", "", "must not be empty"));
        }

        let mut headers = HeaderMap::new();
        if let Some(token) = &config.token {
            let auth_value = format!("Bearer {}", token);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value)
                    .map_err(|e| Error::config("cacheToken", "[REDACTED]", e.to_string()))?,
            );
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Store(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
            base_url,
        })
    }

    fn entry_url(&self, key: &str) -> String {
        format!("{}/entries/{}", self.base_url, urlencoding::encode(key))
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, mut attempt_fn: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = None;
        let mut delay = self.config.initial_backoff;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tracing::debug!(
                    operation,
                    attempt = attempt + 1,
                    max_attempts = self.config.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying cache request"
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, MAX_BACKOFF);
            }

            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(e) if is_retryable_error(&e) => {
                    tracing::warn!(operation, error = %e, "Transient cache error");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Store("max retries exceeded".to_string())))
    }

    async fn fetch(&self, key: &str) -> Result<Option<CacheEntry>> {
        let response = self
            .http_client
            .get(self.entry_url(key))
            .send()
            .await
            .map_err(request_failed)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(api_error(response).await);
        }

        let created_at = response
            .headers()
            .get(CREATED_AT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let payload = response.bytes().await.map_err(request_failed)?;

        Ok(Some(CacheEntry {
            key: key.to_string(),
            payload: payload.to_vec(),
            created_at,
        }))
    }

    async fn list_once(&self, prefix: &str) -> Result<Vec<EntryInfo>> {
        let url = format!(
            "{}/entries?prefix={}",
            self.base_url,
            urlencoding::encode(prefix)
        );
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(request_failed)?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| Error::Store(format!("failed to parse response: {}", e)))
    }
}

fn request_failed(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Store(format!("HTTP request failed: timeout: {}", e))
    } else {
        Error::Store(format!("HTTP request failed: {}", e))
    }
}

async fn api_error(response: reqwest::Response) -> Error {
    let status = response.status();
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown".to_string());
    Error::Store(format!("API error ({}): {}", status.as_u16(), error_text))
}

/// Transient errors: 5xx responses, timeouts and connection failures.
fn is_retryable_error(error: &Error) -> bool {
    match error {
        Error::Store(msg) => {
            msg.starts_with("API error (5")
                || msg.contains("timeout")
                || msg.contains("connection")
                || msg.starts_with("HTTP request failed")
        }
        _ => false,
    }
}

#[async_trait]
impl CacheBackend for HttpBackend {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.http_client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "Cache health check failed");
                false
            }
        }
    }

    async fn save(&self, key: &str, payload: &[u8]) -> Result<String> {
        self.with_retry("save", move || async move {
            let response = self
                .http_client
                .put(self.entry_url(key))
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(payload.to_vec())
                .send()
                .await
                .map_err(request_failed)?;

            if !response.status().is_success() {
                return Err(api_error(response).await);
            }
            // An empty or non-JSON body still means the write landed
            let id = response
                .json::<SaveResponse>()
                .await
                .ok()
                .and_then(|r| r.id)
                .unwrap_or_else(|| key.to_string());
            Ok(id)
        })
        .await
    }

    async fn restore(&self, key: &str, restore_keys: &[String]) -> Result<Option<CacheEntry>> {
        if let Some(entry) = self.with_retry("restore", move || self.fetch(key)).await? {
            return Ok(Some(entry));
        }

        for prefix in restore_keys {
            let candidates = self.list(prefix).await?;
            let prefixes = std::slice::from_ref(prefix);
            if let Some(matched) = resolve_restore_key(key, prefixes, &candidates) {
                let matched = matched.as_str();
                return self.with_retry("restore", move || self.fetch(matched)).await;
            }
        }
        Ok(None)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<EntryInfo>> {
        self.with_retry("list", move || self.list_once(prefix)).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.with_retry("delete", move || async move {
            let response = self
                .http_client
                .delete(self.entry_url(key))
                .send()
                .await
                .map_err(request_failed)?;

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                Ok(false)
            } else if status.is_success() {
                Ok(true)
            } else {
                Err(api_error(response).await)
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_requires_base_url() {
        assert!(HttpBackend::new(HttpBackendConfig::new("  ")).is_err());
        assert!(HttpBackend::new(HttpBackendConfig::new("https://cache.example.com/")).is_ok());
    }

    #[test]
    fn test_entry_url_encodes_key() {
        let backend =
            HttpBackend::new(HttpBackendConfig::new("https://cache.example.com/")).unwrap();
        assert_eq!(
            backend.entry_url("a b/c"),
            "https://cache.example.com/entries/a%20b%2Fc"
        );
    }

    #[test]
    fn test_is_retryable_error() {
        assert!(is_retryable_error(&Error::Store(
            "API error (503): unavailable".to_string()
        )));
        assert!(is_retryable_error(&Error::Store(
            "HTTP request failed: timeout: deadline".to_string()
        )));
        assert!(!is_retryable_error(&Error::Store(
            "API error (400): bad request".to_string()
        )));
        assert!(!is_retryable_error(&Error::Store(
            "API error (401): unauthorized".to_string()
        )));
        assert!(!is_retryable_error(&Error::Collector("timeout".to_string())));
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_retries() {
        let mut config = HttpBackendConfig::new("http://127.0.0.1:9");
        config.max_retries = 2;
        config.initial_backoff = Duration::from_millis(1);
        let backend = HttpBackend::new(config).unwrap();

        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let result: Result<()> = backend
            .with_retry("test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::Store("API error (500): boom".to_string()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let mut config = HttpBackendConfig::new("http://127.0.0.1:9");
        config.initial_backoff = Duration::from_millis(1);
        let backend = HttpBackend::new(config).unwrap();

        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let result: Result<()> = backend
            .with_retry("test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::Store("API error (403): forbidden".to_string()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
