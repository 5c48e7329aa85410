//! HTTP fetch collaborator

use async_trait::async_trait;
use reqwest::{Client, Proxy};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Too many redirects")]
    TooManyRedirects,
}

pub type Result<T> = std::result::Result<T, FetchError>;

/// Performs one fetch and reports the status code
///
/// Implementations may take arbitrary time and may fail; callers treat
/// the fetch as opaque.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<u16>;
}

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
    pub proxy: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            user_agent: "fetchpool/0.1.0".to_string(),
            proxy: None,
        }
    }
}

/// reqwest-backed fetcher
///
/// Non-2xx responses are reported as status codes, not errors.
/// There is no retry: one call, one request.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(10));

        if let Some(url) = &config.proxy {
            let proxy = Proxy::all(url)
                .map_err(|e| FetchError::InvalidUrl(format!("Invalid proxy: {}", e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| FetchError::RequestFailed(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<u16> {
        debug!(url, "Starting fetch");

        let response = self.client.get(url).send().await.map_err(classify)?;
        let status = response.status();

        // Drain the body so latency covers the whole transfer
        let body = response.bytes().await.map_err(classify)?;

        debug!(url, status = status.as_u16(), size = body.len(), "Fetch completed");

        Ok(status.as_u16())
    }
}

fn classify(error: reqwest::Error) -> FetchError {
    if error.is_builder() {
        FetchError::InvalidUrl(error.to_string())
    } else if error.is_timeout() {
        FetchError::Timeout
    } else if error.is_redirect() {
        FetchError::TooManyRedirects
    } else {
        FetchError::RequestFailed(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_config_defaults() {
        let config = HttpConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.user_agent, "fetchpool/0.1.0");
        assert!(config.proxy.is_none());
    }

    #[tokio::test]
    async fn test_malformed_url_is_invalid() {
        let fetcher = HttpFetcher::new(&HttpConfig::default()).unwrap();
        let result = fetcher.fetch("definitely not a url").await;
        assert!(matches!(result, Err(FetchError::InvalidUrl(_))));
    }
}
