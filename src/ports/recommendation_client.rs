use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Operations exposed by the external recommendation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    UserBased,
    ItemBased,
    SimilarUsers,
    SimilarItems,
    AlgorithmInfo,
    Health,
    CacheClear,
    CachePrecompute,
}

impl Endpoint {
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::UserBased => "/api/recommend/user-based",
            Endpoint::ItemBased => "/api/recommend/item-based",
            Endpoint::SimilarUsers => "/api/recommend/similar-users",
            Endpoint::SimilarItems => "/api/recommend/similar-items",
            Endpoint::AlgorithmInfo => "/api/algorithm/info",
            Endpoint::Health => "/health",
            Endpoint::CacheClear => "/api/cache/clear",
            Endpoint::CachePrecompute => "/api/cache/precompute",
        }
    }

    /// `GET` endpoints take no body; everything else is a JSON `POST`.
    pub fn is_get(self) -> bool {
        matches!(self, Endpoint::AlgorithmInfo | Endpoint::Health)
    }

    /// Stable label for logs and metrics
    pub fn label(self) -> &'static str {
        match self {
            Endpoint::UserBased => "user_based",
            Endpoint::ItemBased => "item_based",
            Endpoint::SimilarUsers => "similar_users",
            Endpoint::SimilarItems => "similar_items",
            Endpoint::AlgorithmInfo => "algorithm_info",
            Endpoint::Health => "health",
            Endpoint::CacheClear => "cache_clear",
            Endpoint::CachePrecompute => "cache_precompute",
        }
    }
}

/// Wire envelope `{success, data, message}` returned by every non-health endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceEnvelope {
    pub success: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub message: Option<String>,
}

/// Decoded service answer.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceReply {
    Success(Value),
    Failure(String),
}

impl From<ServiceEnvelope> for ServiceReply {
    fn from(envelope: ServiceEnvelope) -> Self {
        if envelope.success {
            ServiceReply::Success(envelope.data)
        } else {
            ServiceReply::Failure(
                envelope
                    .message
                    .unwrap_or_else(|| "request rejected by recommendation service".to_string()),
            )
        }
    }
}

/// Custom error type for recommendation service calls
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ClientError {
    /// Error when connection to the service fails
    #[error("Connection error: {0}")]
    Connection(String),

    /// Error when request times out
    #[error("Timeout error after {0:?}")]
    Timeout(Duration),

    /// Error when the service returns a non-success status code
    #[error("Service returned error status: {status}, url: {url}")]
    Status { url: String, status: u16 },

    /// Error when the response body does not match the envelope
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ClientError {
    /// Connect and timeout failures, as opposed to protocol failures.
    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Connection(_) | ClientError::Timeout(_))
    }
}

/// Result type alias for recommendation service calls
pub type ClientResult<T> = Result<T, ClientError>;

/// RecommendationClient defines the port for talking to the external service
#[async_trait]
pub trait RecommendationClient: Send + Sync + 'static {
    /// Issue one call. `body` is sent as JSON for `POST` endpoints and ignored for `GET`.
    async fn call(&self, endpoint: Endpoint, body: Option<Value>) -> ClientResult<ServiceReply>;

    /// `Ok(true)` when `/health` answers 200.
    async fn health_check(&self) -> ClientResult<bool>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_envelope_to_reply() {
        let ok: ServiceEnvelope =
            serde_json::from_value(json!({"success": true, "data": [1, 2]})).unwrap();
        assert_eq!(ServiceReply::from(ok), ServiceReply::Success(json!([1, 2])));

        let rejected: ServiceEnvelope =
            serde_json::from_value(json!({"success": false, "message": "cold start"})).unwrap();
        assert_eq!(
            ServiceReply::from(rejected),
            ServiceReply::Failure("cold start".to_string())
        );
    }

    #[test]
    fn test_envelope_requires_success_flag() {
        assert!(serde_json::from_value::<ServiceEnvelope>(json!({"data": []})).is_err());
    }

    #[test]
    fn test_endpoint_methods() {
        assert!(Endpoint::Health.is_get());
        assert!(Endpoint::AlgorithmInfo.is_get());
        assert!(!Endpoint::CacheClear.is_get());
        assert_eq!(Endpoint::CachePrecompute.path(), "/api/cache/precompute");
    }
}
