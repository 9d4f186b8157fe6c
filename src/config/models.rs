//! Configuration data structures for Lectern.
//!
//! These types map directly to YAML (also JSON / TOML) configuration files. Every section
//! carries defaults so a minimal config only needs the signing secret.
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Token issuance and verification settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret used to sign bearer tokens
    pub secret: String,
    /// Token lifetime in seconds
    pub token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            token_ttl_secs: 86_400,
        }
    }
}

impl AuthConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

/// Where and how to reach the external recommendation service
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RecommendationServiceConfig {
    pub base_url: String,
    /// Upper bound for a single outbound call, in milliseconds
    pub timeout_ms: u64,
}

impl Default for RecommendationServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            timeout_ms: 5_000,
        }
    }
}

impl RecommendationServiceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Local degradation settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct FallbackConfig {
    /// A book must have strictly more ratings than this to count as popular
    pub popular_min_rating_count: u32,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            popular_min_rating_count: 10,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Database file for the sqlite backend
    pub path: Option<String>,
    /// JSON file with `books` and `users` loaded at startup
    pub seed_path: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub recommendation: RecommendationServiceConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

impl ServerConfig {
    /// Create a new server configuration builder
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            auth: AuthConfig::default(),
            recommendation: RecommendationServiceConfig::default(),
            fallback: FallbackConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Builder for ServerConfig to allow for cleaner configuration creation
#[derive(Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.config.auth.secret = secret.into();
        self
    }

    pub fn token_ttl_secs(mut self, ttl: u64) -> Self {
        self.config.auth.token_ttl_secs = ttl;
        self
    }

    pub fn recommendation_url(mut self, url: impl Into<String>) -> Self {
        self.config.recommendation.base_url = url.into();
        self
    }

    pub fn recommendation_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.recommendation.timeout_ms = timeout_ms;
        self
    }

    pub fn popular_min_rating_count(mut self, count: u32) -> Self {
        self.config.fallback.popular_min_rating_count = count;
        self
    }

    pub fn sqlite(mut self, path: impl Into<String>) -> Self {
        self.config.storage.backend = StorageBackend::Sqlite;
        self.config.storage.path = Some(path.into());
        self
    }

    pub fn seed_path(mut self, path: impl Into<String>) -> Self {
        self.config.storage.seed_path = Some(path.into());
        self
    }

    pub fn build(self) -> ServerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.auth.token_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.recommendation.base_url, "http://localhost:5000");
        assert_eq!(config.recommendation.timeout(), Duration::from_secs(5));
        assert_eq!(config.fallback.popular_min_rating_count, 10);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn test_builder() {
        let config = ServerConfig::builder()
            .listen_addr("0.0.0.0:9000")
            .secret("s")
            .recommendation_url("http://algo:5000")
            .recommendation_timeout_ms(250)
            .sqlite("/tmp/lectern.db")
            .build();

        assert_eq!(config.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.auth.secret, "s");
        assert_eq!(config.recommendation.timeout(), Duration::from_millis(250));
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.storage.path.as_deref(), Some("/tmp/lectern.db"));
    }
}
