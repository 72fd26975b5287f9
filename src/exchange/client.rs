//! Key-exchange protocol client
//!
//! Issues batched key queries against the U2 endpoint, applying the
//! service's retry contract: 503 honors `Retry-After`, 403 is terminal
//! for the whole run, anything else transient is retried a bounded
//! number of times with the same byte-identical payload.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::cli::Config;
use crate::error::KeyResetError;
use crate::exchange::{Batch, KeyResponse, DEFAULT_ENDPOINT};

/// Retries allowed per batch beyond the initial attempt
pub const MAX_RETRIES: u32 = 5;

/// Default wait applied before every retry (added to `Retry-After` on 503)
pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(5);

/// Source of new secret keys for a batch of torrents
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Exchange a batch of torrent hashes for new secret keys
    async fn exchange(&self, batch: &Batch) -> Result<Vec<KeyResponse>, KeyResetError>;
}

/// HTTP client for the U2 key-issuing endpoint
pub struct KeyExchangeClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    retry_base: Duration,
}

impl KeyExchangeClient {
    /// Create a client from the run config
    ///
    /// An invalid proxy string is reported and ignored, matching the
    /// behavior operators already rely on.
    pub fn new(config: &Config) -> Result<Self, KeyResetError> {
        let mut builder = reqwest::Client::builder();

        if config.has_proxy() {
            match url::Url::parse(&config.proxy)
                .map_err(|e| e.to_string())
                .and_then(|_| reqwest::Proxy::all(&config.proxy).map_err(|e| e.to_string()))
            {
                Ok(proxy) => {
                    info!("Using proxy {} for U2 requests", config.proxy);
                    builder = builder.proxy(proxy);
                }
                Err(e) => {
                    warn!("Invalid proxy config {}: {}", config.proxy, e);
                }
            }
        }

        let client = builder.build().map_err(|e| {
            KeyResetError::exchange_error_with_source("Failed to build HTTP client", e.to_string())
        })?;

        Ok(Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: config.api_key.clone(),
            retry_base: RETRY_BASE_DELAY,
        })
    }

    /// Override the endpoint (tests point this at a local listener)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Override the base retry delay
    pub fn with_retry_base(mut self, retry_base: Duration) -> Self {
        self.retry_base = retry_base;
        self
    }

    fn request_url(&self) -> String {
        format!("{}?apikey={}", self.endpoint, self.api_key)
    }
}

#[async_trait]
impl KeySource for KeyExchangeClient {
    async fn exchange(&self, batch: &Batch) -> Result<Vec<KeyResponse>, KeyResetError> {
        let url = self.request_url();
        let mut retry_count: u32 = 0;

        loop {
            let response = self
                .client
                .post(&url)
                .header("Content-Type", "application/json")
                .body(batch.body().to_vec())
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();
                    debug!("Key-exchange response status: {}", status);

                    if status.as_u16() == 200 {
                        let body = response.bytes().await.map_err(|e| {
                            KeyResetError::exchange_error_with_source(
                                "Error while reading key-exchange response",
                                e.to_string(),
                            )
                        })?;
                        // A malformed body is not retried; the batch is
                        // abandoned and picked up by the next full run.
                        return serde_json::from_slice::<Vec<KeyResponse>>(&body).map_err(|e| {
                            KeyResetError::exchange_error_with_source(
                                "Error while processing key-exchange response",
                                e.to_string(),
                            )
                        });
                    }

                    if status.as_u16() == 403 {
                        let body = response.text().await.unwrap_or_default();
                        warn!("Wrong API key! Please note: API Key IS NOT passkey!");
                        if !body.is_empty() {
                            warn!("{}", body);
                        }
                        return Err(KeyResetError::authorization_error(
                            "Key service rejected the API key",
                        ));
                    }

                    let wait = if status.as_u16() == 503 {
                        let retry_after = response
                            .headers()
                            .get("Retry-After")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        // Body must be consumed before the next attempt.
                        let _ = response.bytes().await;
                        let wait = retry_wait(self.retry_base, retry_after.as_deref());
                        info!("Rate limit! Waiting {} seconds", wait.as_secs());
                        wait
                    } else {
                        let body = response.text().await.unwrap_or_default();
                        warn!(
                            "Unrecognized key-exchange status {}; retry after {} seconds",
                            status,
                            self.retry_base.as_secs()
                        );
                        if !body.is_empty() {
                            debug!("Response body: {}", body);
                        }
                        self.retry_base
                    };

                    retry_count += 1;
                    if retry_count > MAX_RETRIES {
                        return Err(KeyResetError::exchange_error_with_status(
                            format!("Abandoning batch after {} retries", MAX_RETRIES),
                            status.as_u16(),
                        ));
                    }
                    tokio::time::sleep(wait).await;
                }
                Err(e) => {
                    warn!(
                        "Key-exchange request failed: {}; retry after {} seconds",
                        e,
                        self.retry_base.as_secs()
                    );
                    retry_count += 1;
                    if retry_count > MAX_RETRIES {
                        return Err(KeyResetError::exchange_error_with_source(
                            format!("Abandoning batch after {} retries", MAX_RETRIES),
                            e.to_string(),
                        ));
                    }
                    tokio::time::sleep(self.retry_base).await;
                }
            }
        }
    }
}

/// Wait before retrying a 503: the base delay plus the server's
/// `Retry-After` seconds when the header parses
fn retry_wait(base: Duration, retry_after: Option<&str>) -> Duration {
    match retry_after.and_then(|v| v.trim().parse::<u64>().ok()) {
        Some(seconds) => base + Duration::from_secs(seconds),
        None => {
            if retry_after.is_some() {
                warn!("Convert Retry-After failed; using default wait time");
            }
            base
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendHandle, Torrent};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn test_config() -> Config {
        Config {
            target: "transmission".to_string(),
            host: "127.0.0.1".to_string(),
            port: 9091,
            secure: false,
            user: String::new(),
            pass: String::new(),
            api_key: "testkey".to_string(),
            proxy: String::new(),
        }
    }

    fn test_batch() -> Batch {
        Batch::build(vec![Torrent {
            hash: "abc123".to_string(),
            handle: BackendHandle::Transmission {
                id: 1,
                tracker_id: 0,
                name: "abc123".to_string(),
            },
        }])
        .expect("build batch")
    }

    /// Serve canned HTTP responses on a local port, counting requests
    async fn canned_server(response: String) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                hits_clone.fetch_add(1, Ordering::SeqCst);

                // Read the full request (headers plus Content-Length body)
                // before answering, so the client never sees a reset
                // mid-send.
                let mut request = Vec::new();
                let mut buf = [0u8; 4096];
                loop {
                    let Ok(n) = socket.read(&mut buf).await else {
                        break;
                    };
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                    if let Some(header_end) = find_subslice(&request, b"\r\n\r\n") {
                        let headers = String::from_utf8_lossy(&request[..header_end]);
                        let content_length = headers
                            .lines()
                            .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().parse::<usize>().unwrap_or(0)))
                            .unwrap_or(0);
                        if request.len() >= header_end + 4 + content_length {
                            break;
                        }
                    }
                }

                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}/jsonrpc_torrentkey.php", addr), hits)
    }

    fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    #[test]
    fn test_retry_wait_with_header() {
        assert_eq!(
            retry_wait(Duration::from_secs(5), Some("7")),
            Duration::from_secs(12)
        );
    }

    #[test]
    fn test_retry_wait_without_header() {
        assert_eq!(retry_wait(Duration::from_secs(5), None), Duration::from_secs(5));
    }

    #[test]
    fn test_retry_wait_with_garbage_header() {
        assert_eq!(
            retry_wait(Duration::from_secs(5), Some("soon")),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_request_url_appends_api_key() {
        let client = KeyExchangeClient::new(&test_config()).expect("build client");
        assert_eq!(
            client.request_url(),
            "https://u2.dmhy.org/jsonrpc_torrentkey.php?apikey=testkey"
        );
    }

    #[tokio::test]
    async fn test_exchange_success() {
        let body = r#"[{"id":1,"result":"SECRETKEY"}]"#;
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let (endpoint, hits) = canned_server(response).await;

        let client = KeyExchangeClient::new(&test_config())
            .expect("build client")
            .with_endpoint(endpoint)
            .with_retry_base(Duration::ZERO);

        let responses = client.exchange(&test_batch()).await.expect("exchange");
        assert_eq!(responses.len(), 1);
        assert!(responses[0].is_success());
        assert_eq!(responses[0].result, "SECRETKEY");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exchange_retry_bound_on_persistent_503() {
        let response = "HTTP/1.1 503 Service Unavailable\r\nRetry-After: 0\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string();
        let (endpoint, hits) = canned_server(response).await;

        let client = KeyExchangeClient::new(&test_config())
            .expect("build client")
            .with_endpoint(endpoint)
            .with_retry_base(Duration::ZERO);

        let err = client.exchange(&test_batch()).await.unwrap_err();
        assert!(matches!(err, KeyResetError::ExchangeError { .. }));
        // One initial attempt plus five retries.
        assert_eq!(hits.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_exchange_403_short_circuits() {
        let response =
            "HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string();
        let (endpoint, hits) = canned_server(response).await;

        let client = KeyExchangeClient::new(&test_config())
            .expect("build client")
            .with_endpoint(endpoint)
            .with_retry_base(Duration::ZERO);

        let err = client.exchange(&test_batch()).await.unwrap_err();
        assert!(matches!(err, KeyResetError::AuthorizationError { .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exchange_malformed_body_is_not_retried() {
        let body = "this is not json";
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let (endpoint, hits) = canned_server(response).await;

        let client = KeyExchangeClient::new(&test_config())
            .expect("build client")
            .with_endpoint(endpoint)
            .with_retry_base(Duration::ZERO);

        let err = client.exchange(&test_batch()).await.unwrap_err();
        assert!(matches!(err, KeyResetError::ExchangeError { .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
