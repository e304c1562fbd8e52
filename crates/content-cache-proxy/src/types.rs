//! Core types for the content cache proxy

use content_cache::{CacheConfig, CacheStatistics};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the proxy process
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub port: u16,
    pub fetch_timeout: Duration,
    pub cache: CacheConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            fetch_timeout: Duration::from_secs(30),
            cache: CacheConfig::default(),
        }
    }
}

impl ProxyConfig {
    /// Parse configuration from environment variables
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(3001);

        let fetch_timeout = std::env::var("FETCH_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));

        Self {
            port,
            fetch_timeout,
            cache: CacheConfig::from_env(),
        }
    }
}

/// Query for the blob endpoint
#[derive(Debug, Deserialize)]
pub struct BlobQuery {
    pub url: String,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub cache: CacheStatistics,
}

/// Response for maintenance endpoints
#[derive(Debug, Serialize)]
pub struct MaintenanceResponse {
    /// False when an optimization run was already in progress
    pub ran: bool,
    pub statistics: CacheStatistics,
}
