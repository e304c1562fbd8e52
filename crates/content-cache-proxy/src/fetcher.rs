//! Upstream blob fetching

use crate::error::{ProxyError, Result};
use async_trait::async_trait;
use content_cache::{BlobLoader, LoadError};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// HTTP client used to resolve full cache misses
pub struct HttpBlobLoader {
    client: Client,
}

impl HttpBlobLoader {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Only absolute http(s) URLs are fetched
    pub fn parse_url(raw: &str) -> Result<Url> {
        let url = Url::parse(raw).map_err(|e| ProxyError::Config(format!("invalid URL: {}", e)))?;

        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(ProxyError::Config(format!(
                "unsupported URL scheme: {}",
                scheme
            ))),
        }
    }
}

#[async_trait]
impl BlobLoader for HttpBlobLoader {
    async fn load(&self, key: &str) -> std::result::Result<Vec<u8>, LoadError> {
        let url = Self::parse_url(key)?;
        debug!(url = %url, "Fetching blob upstream");

        let response = self.client.get(url.clone()).send().await?;

        if !response.status().is_success() {
            warn!(status = %response.status(), url = %url, "Upstream refused blob");
            return Err(format!("upstream returned status {}", response.status()).into());
        }

        let data = response.bytes().await?.to_vec();
        debug!(url = %url, size = data.len(), "Fetched blob upstream");
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url_accepts_http() {
        let url = HttpBlobLoader::parse_url("https://cdn.example.com/a.jpg").unwrap();
        assert_eq!(url.host_str(), Some("cdn.example.com"));

        assert!(HttpBlobLoader::parse_url("http://localhost:8080/b.png").is_ok());
    }

    #[test]
    fn test_parse_url_rejects_other_schemes() {
        let err = HttpBlobLoader::parse_url("file:///etc/passwd").unwrap_err();
        assert!(err.to_string().contains("unsupported URL scheme"));

        assert!(HttpBlobLoader::parse_url("not a url").is_err());
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_key() {
        let loader = HttpBlobLoader::new(Duration::from_secs(1)).unwrap();

        let result = loader.load("ftp://example.com/file").await;
        assert!(result.is_err());
    }
}
